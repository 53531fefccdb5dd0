//! # vpk-format
//!
//! Core library for directory manifests and `.vpk` packages.
//!
//! This crate provides:
//! - Manifest building (content hashes, optionally size and mtime) over a directory tree
//! - Manifest diffing and merging
//! - `.vpk` package reading, writing and in-place updating
//! - AES (GCM, CTR, CBC) encryption with Argon2id key derivation
//! - Payload compression (gzip, bzip2, lzma, lz4, zstd)
//! - Sectioned configuration, optionally sealed in a `.vcf` file
//!
//! ## Example
//!
//! ```ignore
//! use vpk_format::{build, diff, BuildOptions, Manifest, PackageArchive, PackageBuilder};
//!
//! // Compare a local tree with a published manifest
//! let local = build(&BuildOptions::new("assets"))?.manifest;
//! let remote = Manifest::load("remote/manifest.json")?;
//! let stale = diff(&local, &remote);
//!
//! // Package a directory and read it back
//! PackageBuilder::new()
//!     .with_dir("assets".as_ref())?
//!     .write_to("assets.vpk", &key)?;
//! let payload = PackageArchive::open("assets.vpk")?.payload(&key)?;
//! ```

mod builder;
mod cancel;
pub mod compression;
mod config;
pub mod crypto;
mod diff;
mod error;
mod fingerprint;
mod format;
mod manifest;
pub mod payload;
mod value;
mod vcf;

pub use builder::PackageBuilder;
pub use cancel::CancelFlag;
pub use compression::CompressionMode;
pub use config::{Config, ConfigFormat};
pub use crypto::{derive_key, EncryptionMode, KdfParams, Sealed};
pub use diff::{diff, merge, UpdateSet};
pub use error::{Error, Result};
pub use fingerprint::{build, build_paths, verify_local, BuildOptions, BuildOutput};
pub use format::{
    create, encode, read, read_header, update, PackageArchive, PackageHeader, FORMAT_VERSION,
};
pub use manifest::{
    format_modified, hash_bytes, hash_file, hash_reader, write_atomic, FileMeta, Manifest,
    ManifestEntry, ManifestMode,
};
pub use payload::{normalize_entry_path, unpack, PackagePayload};
pub use value::{match_dict, parse_value, TypedValue};
pub use vcf::VcfContainer;
