//! Remote descriptor fetching

use crate::verifier::{validate_base_url, validate_size};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wfref_config::FetchConfig;
use wfref_foundation::identity::DEFAULT_RAW_BASE_URL;
use wfref_foundation::{ActionDescriptor, ActionIdentity, CoreError, CoreResult, ResolutionError};

/// Turns a remote identity into its declared inputs and outputs.
///
/// Implementations classify every failure as `NotFound`, `Network` or
/// `Parse`; they never panic and never retry.
#[async_trait]
pub trait DescriptorFetcher: Send + Sync {
    async fn fetch(&self, identity: &ActionIdentity) -> Result<ActionDescriptor, ResolutionError>;
}

/// Runtime settings for [`HttpFetcher`]
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub raw_base_url: String,
    /// Base of the REST API used for release queries
    pub api_base_url: String,
    pub timeout: Duration,
    pub user_agent: String,
    pub token: Option<String>,
    pub require_https: bool,
    pub max_descriptor_bytes: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for FetchSettings {
    fn from(config: &FetchConfig) -> Self {
        Self {
            raw_base_url: config.raw_base_url.clone(),
            api_base_url: config.api_base_url.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            user_agent: config.user_agent.clone(),
            token: config.token.clone(),
            require_https: config.require_https,
            max_descriptor_bytes: config.max_descriptor_bytes,
        }
    }
}

/// Fetches descriptors from a raw-content host over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http_client: Client,
    base_url: String,
    token: Option<String>,
    max_descriptor_bytes: u64,
}

impl HttpFetcher {
    pub fn new(settings: FetchSettings) -> CoreResult<Self> {
        validate_base_url(&settings.raw_base_url, settings.require_https)?;

        let http_client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.as_str())
            .build()
            .map_err(|e| CoreError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: settings.raw_base_url.trim_end_matches('/').to_string(),
            token: settings.token,
            max_descriptor_bytes: settings.max_descriptor_bytes,
        })
    }

    /// Fetcher against raw.githubusercontent.com with default settings
    pub fn github() -> CoreResult<Self> {
        Self::new(FetchSettings {
            raw_base_url: DEFAULT_RAW_BASE_URL.to_string(),
            ..FetchSettings::default()
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET one candidate; `Ok(None)` on 404 so the caller can try the next one
    async fn get(&self, url: &str) -> Result<Option<String>, ResolutionError> {
        let mut builder = self.http_client.get(url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ResolutionError::network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ResolutionError::network(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        if let Some(size) = response.content_length() {
            validate_size(size, self.max_descriptor_bytes)?;
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ResolutionError::network(e.to_string()))?;
        validate_size(body.len() as u64, self.max_descriptor_bytes)?;

        String::from_utf8(body.to_vec())
            .map(Some)
            .map_err(|_| ResolutionError::parse("descriptor is not valid UTF-8"))
    }
}

#[async_trait]
impl DescriptorFetcher for HttpFetcher {
    async fn fetch(&self, identity: &ActionIdentity) -> Result<ActionDescriptor, ResolutionError> {
        if identity.is_local() {
            return Err(ResolutionError::not_found(format!(
                "{} is a local reference",
                identity
            )));
        }

        let started = Instant::now();
        for path in identity.descriptor_paths() {
            let url = format!("{}/{}", self.base_url, path);
            match self.get(&url).await {
                Ok(Some(body)) => {
                    debug!(
                        identity = %identity,
                        url = %url,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Fetched descriptor"
                    );
                    return ActionDescriptor::parse(identity.kind(), &body);
                }
                Ok(None) => debug!(identity = %identity, url = %url, "Descriptor candidate missing"),
                Err(e) => {
                    warn!(identity = %identity, url = %url, error = %e, "Descriptor fetch failed");
                    return Err(e);
                }
            }
        }

        Err(ResolutionError::not_found(identity.key()))
    }
}
