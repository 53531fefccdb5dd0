//! Error types for fetching and syncing.

use thiserror::Error;

/// Why a single file could not be fetched.
///
/// Collected per path into a [`crate::FetchReport`]; never aborts a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("invalid relative path: {0}")]
    InvalidPath(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("content hash mismatch: {0}")]
    Integrity(String),

    #[error("cancelled")]
    Cancelled,
}

/// Errors that stop a sync operation as a whole.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] vpk_format::Error),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, Error>;
