use std::time::Duration;

use thiserror::Error;

/// A single source could not produce a reading.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{source_id}: request failed: {message}")]
    Network { source_id: String, message: String },
    #[error("{source_id}: timed out after {secs}s")]
    Timeout { source_id: String, secs: u64 },
    #[error("{source_id}: HTTP {status}")]
    Status { source_id: String, status: u16 },
    #[error("{source_id}: malformed payload: {message}")]
    Malformed { source_id: String, message: String },
}

impl SourceError {
    pub fn malformed(source_id: &str, message: impl Into<String>) -> Self {
        SourceError::Malformed {
            source_id: source_id.to_string(),
            message: message.into(),
        }
    }

    pub fn from_reqwest(source_id: &str, timeout_secs: u64, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout {
                source_id: source_id.to_string(),
                secs: timeout_secs,
            }
        } else if let Some(status) = err.status() {
            SourceError::Status {
                source_id: source_id.to_string(),
                status: status.as_u16(),
            }
        } else {
            // keyed endpoints carry the API key in the query string
            SourceError::Network {
                source_id: source_id.to_string(),
                message: err.without_url().to_string(),
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    /// The transport asked us to back off before retrying.
    #[error("rate limited, retry after {0:?}")]
    RetryAfter(Duration),
    #[error("send failed: {0}")]
    Fatal(String),
}
