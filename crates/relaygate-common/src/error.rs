use std::path::PathBuf;

use thiserror::Error;

/// Common errors for relaygate operations
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Config error in {path:?}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("Another operation is modifying the configuration (lock held at {0:?})")]
    ConfigLocked(PathBuf),

    #[error("Tunnel is not installed (no configuration found)")]
    NotInstalled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Certificate error: {0}")]
    Certificate(String),
}

impl RelayError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a config error for a specific file
    pub fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }
}
