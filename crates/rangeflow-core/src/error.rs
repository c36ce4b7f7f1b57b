//! Error types for Rangeflow core

use thiserror::Error;

/// Failure of a single fetch attempt
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: u64, received: u64 },

    #[error("Source did not report a content length")]
    MissingLength,

    #[error("Range mismatch: requested offset {requested}, server sent {served}")]
    UnexpectedRange { requested: u64, served: u64 },
}

impl FetchError {
    /// Check if this error is worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(e) => {
                if let Some(status) = e.status() {
                    return status_is_retryable(status.as_u16());
                }
                !e.is_builder() && !e.is_redirect()
            }
            FetchError::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::InvalidInput
                    | std::io::ErrorKind::Unsupported
            ),
            FetchError::Status { status, .. } => status_is_retryable(*status),
            FetchError::ShortRead { .. } => true,
            FetchError::MissingLength | FetchError::UnexpectedRange { .. } => false,
        }
    }
}

fn status_is_retryable(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

/// Errors surfaced by transfer engines
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Download already started")]
    AlreadyStarted,

    #[error("Fetch failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: FetchError,
    },

    #[error("Fetch failed: {0}")]
    NonRetryable(#[source] FetchError),

    #[error("Transfer was aborted")]
    Aborted,

    #[error("Write error: {0}")]
    Write(#[from] std::io::Error),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Chunk task failed: {0}")]
    TaskFailed(String),
}

impl TransferError {
    /// Whether this error came from the fetch side of the pipeline
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            TransferError::RetryExhausted { .. } | TransferError::NonRetryable(_)
        )
    }
}

pub type TransferResult<T> = Result<T, TransferError>;
