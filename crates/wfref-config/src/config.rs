//! Configuration management for wfref

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use wfref_foundation::identity::{
    DEFAULT_API_BASE_URL, DEFAULT_RAW_BASE_URL, DEFAULT_WEB_BASE_URL,
};
use wfref_foundation::{CoreError, CoreResult};

/// File name of the persisted cache snapshot inside the cache directory
pub const DEFAULT_SNAPSHOT_FILE: &str = "action-cache.json";

const CONFIG_DIR: &str = ".wfref";
const ENV_PREFIX: &str = "WFREF__";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Action cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Descriptor fetch configuration
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Change trigger configuration
    #[serde(default)]
    pub trigger: TriggerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Action cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Lifetime of a successful resolution in seconds
    pub ttl_seconds: u64,
    /// Save the cache on exit and restore it on start
    pub persistent: bool,
    /// Snapshot location (defaults to `~/.wfref/action-cache.json`)
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

/// Descriptor fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchConfig {
    /// Host serving raw descriptor files
    pub raw_base_url: String,
    /// Host serving the browsable repository view
    pub web_base_url: String,
    /// REST API queried for the latest release of an action
    pub api_base_url: String,
    /// Look up the latest release of every remote action
    pub check_versions: bool,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// User agent sent with every request
    pub user_agent: String,
    /// Bearer token for authenticated raw access; never written by `save`
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    /// Reject plain-http base URLs
    pub require_https: bool,
    /// Upper bound on a descriptor body
    pub max_descriptor_bytes: u64,
}

/// Change trigger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    /// Quiet period after the last edit before a document is re-scanned
    pub debounce_ms: u64,
}

/// Log output format
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format for development
    #[default]
    Pretty,
    /// Structured JSON format for production
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 24 * 60 * 60, // 1 day
            persistent: true,
            snapshot_path: None,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            raw_base_url: DEFAULT_RAW_BASE_URL.to_string(),
            web_base_url: DEFAULT_WEB_BASE_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            check_versions: true,
            timeout_ms: 5000,
            user_agent: format!("wfref/{}", env!("CARGO_PKG_VERSION")),
            token: None,
            require_https: true,
            max_descriptor_bytes: 1024 * 1024, // 1 MiB
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self { debounce_ms: 1000 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl CacheConfig {
    /// Where the snapshot lives, `None` when persistence is off or no home
    /// directory can be determined
    pub fn resolved_snapshot_path(&self) -> Option<PathBuf> {
        if !self.persistent {
            return None;
        }
        self.snapshot_path.clone().or_else(|| {
            dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(DEFAULT_SNAPSHOT_FILE))
        })
    }
}

impl AppConfig {
    /// Save configuration to a specified file path
    ///
    /// A `.toml` path gets TOML that [`AppConfig::load_from`] reads back;
    /// anything else gets pretty JSON. The fetch token is never written.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = self.render(path.extension().is_some_and(|ext| ext == "toml"))?;

        std::fs::write(path, content)
            .map_err(|e| CoreError::config(format!("Failed to write configuration file: {}", e)))?;

        Ok(())
    }

    /// Serialize as TOML or pretty JSON
    pub fn render(&self, as_toml: bool) -> CoreResult<String> {
        let rendered = if as_toml {
            toml::to_string_pretty(self).map_err(|e| e.to_string())
        } else {
            serde_json::to_string_pretty(self).map_err(|e| e.to_string())
        };
        rendered.map_err(|e| CoreError::config(format!("Failed to serialize configuration: {}", e)))
    }

    /// Load configuration from config files and the environment
    ///
    /// Priority order (highest to lowest):
    /// 1. Environment variables (`WFREF__SECTION__KEY`)
    /// 2. `wfref.toml` or `.wfref/config.toml` in the working directory
    /// 3. Default values
    pub fn load() -> CoreResult<Self> {
        Self::load_from(None)
    }

    /// Like [`AppConfig::load`] but with an explicit TOML file taking the
    /// place of the discovered one
    pub fn load_from(explicit: Option<&Path>) -> CoreResult<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Toml},
            Figment,
        };

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(CoreError::config(format!(
                        "Configuration file not found: {}",
                        path.display()
                    )));
                }
                tracing::info!(path = %path.display(), "Loading TOML configuration");
                figment = figment.merge(Toml::file(path));
            }
            None => {
                let config_dir_file = Path::new(CONFIG_DIR).join("config.toml");
                let candidates = [PathBuf::from("wfref.toml"), config_dir_file];
                if let Some(path) = candidates.iter().find(|p| p.exists()) {
                    tracing::info!(path = %path.display(), "Loading TOML configuration");
                    figment = figment.merge(Toml::file(path));
                }
            }
        }

        // Env names are case-insensitive; `lowercase(false)` must follow the
        // last `map`, which resets it
        let fields = field_names();
        figment = figment.merge(
            Env::prefixed(ENV_PREFIX)
                .split("__")
                .map(move |key| restore_casing(key.as_str(), &fields).into())
                .lowercase(false),
        );

        let app_config: AppConfig = figment
            .extract()
            .map_err(|e| CoreError::config(format!("Failed to load configuration: {}", e)))?;

        app_config.validate()?;

        tracing::debug!(
            ttl_seconds = app_config.cache.ttl_seconds,
            debounce_ms = app_config.trigger.debounce_ms,
            raw_base_url = %app_config.fetch.raw_base_url,
            "Configuration loaded"
        );

        Ok(app_config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> CoreResult<()> {
        if self.cache.ttl_seconds == 0 {
            return Err(CoreError::config("Cache TTL cannot be 0"));
        }

        if self.fetch.timeout_ms == 0 {
            return Err(CoreError::config("Fetch timeout cannot be 0"));
        }

        if self.fetch.raw_base_url.trim().is_empty() {
            return Err(CoreError::config("Raw base URL cannot be empty"));
        }

        if self.fetch.check_versions && self.fetch.api_base_url.trim().is_empty() {
            return Err(CoreError::config("API base URL cannot be empty"));
        }

        if self.fetch.max_descriptor_bytes == 0 {
            return Err(CoreError::config("Maximum descriptor size cannot be 0"));
        }

        if self.trigger.debounce_ms == 0 {
            return Err(CoreError::config("Debounce window cannot be 0"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(CoreError::config(format!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }
}

/// Every key of the serialized defaults, at any depth
fn field_names() -> Vec<String> {
    fn collect(value: &serde_json::Value, names: &mut Vec<String>) {
        if let serde_json::Value::Object(map) = value {
            for (name, child) in map {
                names.push(name.clone());
                collect(child, names);
            }
        }
    }

    let mut names = Vec::new();
    if let Ok(defaults) = serde_json::to_value(AppConfig::default()) {
        collect(&defaults, &mut names);
    }
    names
}

/// `FETCH.TIMEOUTMS` -> `fetch.timeoutMs`
fn restore_casing(key: &str, fields: &[String]) -> String {
    key.split('.')
        .map(|segment| {
            fields
                .iter()
                .find(|field| field.eq_ignore_ascii_case(segment))
                .cloned()
                .unwrap_or_else(|| segment.to_ascii_lowercase())
        })
        .collect::<Vec<_>>()
        .join(".")
}
