use thiserror::Error;

/// Errors that can occur when building manifests or working with `.vpk` packages.
#[derive(Debug, Error)]
pub enum Error {
    /// The input is structurally invalid (manifest JSON, package header, container layout).
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// An unknown compression or encryption identifier was supplied.
    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),

    /// Authentication or length verification failed.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Key derivation parameters were rejected.
    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    /// The supplied key has an unusable length.
    #[error("invalid key length: expected {expected}, got {got}")]
    KeyLength {
        /// Human readable description of the accepted lengths.
        expected: String,
        /// Length of the key that was supplied.
        got: usize,
    },

    /// CBC padding could not be removed.
    #[error("invalid padding")]
    Padding,

    /// A compression codec failed to decode its input.
    #[error("decode error: {0}")]
    Decode(String),

    /// A referenced path is absent.
    #[error("missing entry: {0}")]
    MissingEntry(String),

    /// The operation was aborted between two units of work.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("json parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("toml parsing error: {0}")]
    TomlError(String),
}

/// Result type for vpk-format operations.
pub type Result<T> = std::result::Result<T, Error>;
