//! Error handling for wfref-foundation and the broader wfref system

use thiserror::Error;

/// Core error type used for configuration, persistence and other
/// non-resolution failures
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoreError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Snapshot error: {message}")]
    Snapshot { message: String },

    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CoreError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new snapshot error
    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::Snapshot {
            message: message.into(),
        }
    }

    /// Create a new invalid data error
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type alias for convenience
pub type CoreResult<T> = Result<T, CoreError>;

/// Why resolving a single action reference failed.
///
/// These never escape the cache as fatal errors: they are recorded on the
/// action record and, for an explicit reload, handed back to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// The remote descriptor does not exist
    #[error("Descriptor not found: {0}")]
    NotFound(String),

    /// Transport failure, timeout or unexpected HTTP status
    #[error("Network error: {0}")]
    Network(String),

    /// The descriptor was fetched but could not be understood
    #[error("Malformed descriptor: {0}")]
    Parse(String),

    /// A local reference points at a path missing from the repository
    #[error("Local reference not found: {0}")]
    LocalNotFound(String),
}

/// Discriminant of [`ResolutionError`] without the message payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionErrorKind {
    NotFound,
    Network,
    Parse,
    LocalNotFound,
}

impl ResolutionError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn local_not_found(message: impl Into<String>) -> Self {
        Self::LocalNotFound(message.into())
    }

    pub fn kind(&self) -> ResolutionErrorKind {
        match self {
            Self::NotFound(_) => ResolutionErrorKind::NotFound,
            Self::Network(_) => ResolutionErrorKind::Network,
            Self::Parse(_) => ResolutionErrorKind::Parse,
            Self::LocalNotFound(_) => ResolutionErrorKind::LocalNotFound,
        }
    }

    /// Permanent failures stick until the user reloads or clears the entry.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Parse(_))
    }
}
