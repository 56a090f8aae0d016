use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the qloop engine
#[derive(Error, Debug)]
pub enum QloopError {
    #[error("Malformed objective: {message}")]
    MalformedObjective { message: String },

    #[error("Generator failed: {message}")]
    Generator { message: String },

    #[error("Persistence error: {message}")]
    Persistence {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("IO error: {source}")]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Invalid hyperparameter: {message}")]
    InvalidHyperparameter { message: String },

    #[error("{0}")]
    Other(String),
}

impl QloopError {
    /// Create a new malformed objective error
    pub fn malformed_objective(message: impl Into<String>) -> Self {
        Self::MalformedObjective {
            message: message.into(),
        }
    }

    /// Create a new generator error
    pub fn generator(message: impl Into<String>) -> Self {
        Self::Generator {
            message: message.into(),
        }
    }

    /// Create a new persistence error with optional path context
    pub fn persistence(message: impl Into<String>, path: Option<impl Into<PathBuf>>) -> Self {
        Self::Persistence {
            message: message.into(),
            path: path.map(|p| p.into()),
        }
    }

    /// Create a new IO error with path context
    pub fn io_error(err: std::io::Error, path: Option<impl Into<PathBuf>>) -> Self {
        Self::Io {
            source: err,
            path: path.map(|p| p.into()),
        }
    }

    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a new invalid hyperparameter error
    pub fn invalid_hyperparameter(message: impl Into<String>) -> Self {
        Self::InvalidHyperparameter {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<std::io::Error> for QloopError {
    fn from(error: std::io::Error) -> Self {
        QloopError::io_error(error, None::<PathBuf>)
    }
}

impl From<serde_json::Error> for QloopError {
    fn from(error: serde_json::Error) -> Self {
        QloopError::serialization(error.to_string())
    }
}

/// Result type alias using QloopError
pub type QloopResult<T> = Result<T, QloopError>;
