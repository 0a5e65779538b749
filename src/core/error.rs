//! Error handling types

use thiserror::Error;

/// Result type alias for operations that can fail
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the container
#[derive(Error, Debug)]
pub enum Error {
    #[error("resolution failed: {message}\n{construction_log}")]
    Resolution {
        message: String,
        construction_log: String,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("container disposed")]
    Disposed,

    #[error("{} errors during dispose: {}", .0.len(), format_aggregate(.0))]
    Aggregate(Vec<Error>),
}

fn format_aggregate(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a resolution error carrying the pretty-printed construction log
    pub fn resolution<S: Into<String>>(message: S, construction_log: S) -> Self {
        Self::Resolution {
            message: message.into(),
            construction_log: construction_log.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Self::Internal { message: s }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Self::Internal {
            message: s.to_string(),
        }
    }
}
