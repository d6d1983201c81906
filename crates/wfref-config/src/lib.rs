//! Configuration management for wfref

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, CacheConfig, FetchConfig, LogFormat, LoggingConfig, TriggerConfig,
    DEFAULT_SNAPSHOT_FILE,
};
pub use logging::resolution_span;
