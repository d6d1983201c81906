//! Latest release lookup
//!
//! Pinning `owner/repo@v3` while `v4` is out is legal but worth a warning.
//! Only tags that start with a numeric major version are compared; branches
//! and commit shas are never reported as outdated.

use crate::fetcher::FetchSettings;
use crate::verifier::{validate_base_url, validate_size};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use wfref_foundation::{CoreError, CoreResult, ResolutionError};

/// Reports the latest published release of a repository
#[async_trait]
pub trait VersionFetcher: Send + Sync {
    /// Tag of the latest release of `slug` (`owner/repo`), `Ok(None)` when
    /// the repository has no release
    async fn latest_version(&self, slug: &str) -> Result<Option<String>, ResolutionError>;
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
}

/// Queries `GET /repos/{owner}/{repo}/releases/latest` on a GitHub REST API
#[derive(Debug, Clone)]
pub struct HttpVersionFetcher {
    http_client: Client,
    base_url: String,
    token: Option<String>,
    max_body_bytes: u64,
}

impl HttpVersionFetcher {
    pub fn new(settings: &FetchSettings) -> CoreResult<Self> {
        validate_base_url(&settings.api_base_url, settings.require_https)?;

        let http_client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.as_str())
            .build()
            .map_err(|e| CoreError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
            max_body_bytes: settings.max_descriptor_bytes,
        })
    }
}

#[async_trait]
impl VersionFetcher for HttpVersionFetcher {
    async fn latest_version(&self, slug: &str) -> Result<Option<String>, ResolutionError> {
        let url = format!("{}/repos/{}/releases/latest", self.base_url, slug);
        let mut builder = self
            .http_client
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ResolutionError::network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(slug = %slug, "No published release");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ResolutionError::network(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ResolutionError::network(e.to_string()))?;
        validate_size(body.len() as u64, self.max_body_bytes)?;

        let release: Release = serde_json::from_slice(&body)
            .map_err(|e| ResolutionError::parse(format!("Invalid release response: {}", e)))?;
        debug!(slug = %slug, latest = %release.tag_name, "Fetched latest release");
        Ok(Some(release.tag_name))
    }
}

/// Major version of a tag: `v4.1.0` and `4` both give 4
fn major_version(tag: &str) -> Option<u64> {
    let tag = tag.strip_prefix(['v', 'V']).unwrap_or(tag);
    tag.split('.').next()?.parse().ok()
}

/// Whether `current_ref` is behind `latest` by at least one major version
pub fn is_outdated(current_ref: &str, latest: &str) -> bool {
    match (major_version(current_ref), major_version(latest)) {
        (Some(current), Some(latest)) => current < latest,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_major_versions_are_compared() {
        assert!(is_outdated("v3", "v4.0.0"));
        assert!(is_outdated("v3.5.2", "4.1"));
        assert!(!is_outdated("v4", "v4.0.0"));
        assert!(!is_outdated("v4.5.2", "v4.0.0"));
        assert!(!is_outdated("v5", "v4.0.0"));
    }

    #[test]
    fn test_non_numeric_refs_are_never_outdated() {
        assert!(!is_outdated("main", "v4.0.0"));
        assert!(!is_outdated("8f4b7f84864484a7bf31766abe9204da3cbe65b3", "v4.0.0"));
        assert!(!is_outdated("v3", "nightly"));
    }
}
