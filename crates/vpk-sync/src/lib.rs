//! # vpk-sync
//!
//! Manifest-driven file synchronization.
//!
//! This crate provides:
//! - Fetching files from an HTTP(S) base URL or a local mirror directory
//! - Bounded concurrent batch fetches with per-file failure reports
//! - Loading manifests from paths or URLs
//! - [`SyncJob`], which ties scanning, diffing, fetching and merging together
//!
//! The `vpk` command line tool is built with the `cli` feature.
//!
//! ## Example
//!
//! ```ignore
//! use vpk_sync::{FetchOptions, SyncJob};
//!
//! let outcome = SyncJob::new("game", "https://cdn.example.com/game")
//!     .with_fetch(FetchOptions::default().with_workers(8))
//!     .run()?;
//!
//! for (path, err) in &outcome.report.failed {
//!     eprintln!("{}: {}", path, err);
//! }
//! ```

mod error;
mod fetch;
mod loader;
mod sync;

pub use error::{Error, FetchError, Result};
pub use fetch::{
    fetch, fetch_all, fetch_all_mapped, source_for, DirSource, FetchOptions, FetchReport,
    HttpSource, Source, DEFAULT_TIMEOUT, DEFAULT_WORKERS,
};
pub use loader::load_manifest;
pub use sync::{SyncJob, SyncOutcome, DEFAULT_MANIFEST_NAME};

// Re-export vpk-format types for convenience
pub use vpk_format::{BuildOptions, CancelFlag, Manifest, UpdateSet};
