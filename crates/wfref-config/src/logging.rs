//! Centralized logging initialization with environment variable support

use crate::{AppConfig, LogFormat};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing subscriber with environment variable support
///
/// Environment variables (in priority order):
/// - `RUST_LOG`: Standard Rust log filter (takes precedence over all)
/// - `LOG_FORMAT`: Override format (json, pretty)
///
/// # Examples
///
/// ```bash
/// # Trace cache decisions while scanning a workflow
/// RUST_LOG=wfref_cache=debug wfref resolve .github/workflows/ci.yml
///
/// # Structured logs for a long-running watcher
/// LOG_FORMAT=json wfref watch .github/workflows
/// ```
pub fn initialize(config: &AppConfig) {
    let log_level: tracing::Level = config.logging.level.parse().unwrap_or(tracing::Level::INFO);

    // RUST_LOG replaces the configured level entirely when set
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(log_level.into()));

    let format = format_override(std::env::var("LOG_FORMAT").ok().as_deref())
        .unwrap_or_else(|| config.logging.format.clone());

    // Always stderr: stdout carries command output
    let result = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}

fn format_override(value: Option<&str>) -> Option<LogFormat> {
    match value?.to_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" | "human" => Some(LogFormat::Pretty),
        _ => None,
    }
}

/// Span wrapping the resolution of one identity
///
/// Nested fetch and commit logs carry the identity automatically.
pub fn resolution_span(identity: &str, origin: &str) -> tracing::Span {
    tracing::info_span!(
        "resolution",
        identity = %identity,
        origin = %origin
    )
}
