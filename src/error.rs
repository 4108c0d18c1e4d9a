use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single network fetch inside a strategy.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("blocked by remote (status {status})")]
    Blocked { status: u16 },

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("failed to parse page: {0}")]
    Parse(String),

    #[error("browser service error: {0}")]
    Browser(String),
}

impl FetchError {
    /// Whether the proxy used for the request should be retired.
    pub fn is_proxy_fault(&self) -> bool {
        matches!(
            self,
            FetchError::Blocked { .. } | FetchError::Timeout | FetchError::Transport(_)
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to read proxy list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed proxy endpoint '{0}'")]
    Malformed(String),

    #[error("no working proxies to save")]
    NoneAlive,

    #[error("failed to write proxy list {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("failed to encode document: {0}")]
    Encode(#[from] mongodb::bson::ser::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Failure of an NLP or embedding collaborator call.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("inference request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("inference service returned status {status}: {message}")]
    Service { status: u16, message: String },

    #[error("invalid collaborator output: {0}")]
    InvalidOutput(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("storage failed during {stage} stage: {source}")]
    Storage {
        stage: &'static str,
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no firms selected for this run")]
    NoFirms,

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("directory {path} is not writable: {source}")]
    Unwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing required setting {0}")]
    Missing(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_faults_cover_blocking_and_transport() {
        assert!(FetchError::Blocked { status: 403 }.is_proxy_fault());
        assert!(FetchError::Timeout.is_proxy_fault());
        assert!(FetchError::Transport("reset".into()).is_proxy_fault());
        assert!(!FetchError::Parse("no cards".into()).is_proxy_fault());
        assert!(!FetchError::Status(500).is_proxy_fault());
    }
}
