//! Error types for hostd

use thiserror::Error;
use uuid::Uuid;

/// Main error type for hostd
#[derive(Error, Debug)]
pub enum HostError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The proxy configuration rendered to nothing. Never retried.
    #[error("Proxy configuration is not synced for server {0}")]
    ConfigNotSynced(Uuid),

    #[error("Remote command `{command}` failed with exit code {exit_code}: {output}")]
    Remote {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Pipeline error: {0}")]
    PipelineError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HostError {
    /// Whether retrying the same operation could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HostError::IoError(_) | HostError::HttpError(_) | HostError::Remote { .. }
        )
    }
}

impl From<anyhow::Error> for HostError {
    fn from(err: anyhow::Error) -> Self {
        HostError::Internal(err.to_string())
    }
}
