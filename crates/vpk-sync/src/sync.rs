//! One-shot synchronization of a local tree against a published manifest.

use crate::error::{FetchError, Result};
use crate::fetch::{fetch_all_mapped, source_for, FetchOptions, FetchReport};
use crate::loader::load_manifest;
use std::path::PathBuf;
use vpk_format::{build, build_paths, diff, merge, BuildOptions, Manifest, UpdateSet};

/// File name of the manifest published next to the remote files.
pub const DEFAULT_MANIFEST_NAME: &str = "manifest.json";

/// Everything needed to bring `local_root` in line with `remote_base`.
#[derive(Debug, Clone)]
pub struct SyncJob {
    /// Directory brought up to date; created if missing.
    pub local_root: PathBuf,
    /// URL or directory holding the files and their manifest.
    pub remote_base: String,
    /// Manifest file name, both remote and under `local_root`.
    pub manifest_name: String,
    /// How the local tree is scanned and keys map to paths.
    pub build: BuildOptions,
    /// Concurrency, timeout and cancellation of the fetch step.
    pub fetch: FetchOptions,
    /// Write the merged manifest to `local_root/manifest_name`.
    pub save_manifest: bool,
}

/// Result of [`SyncJob::run`].
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// Paths that were out of date before the run.
    pub update_set: UpdateSet,
    /// Per-path outcome of the fetch and hash check.
    pub report: FetchReport,
    /// Local manifest after merging the successfully fetched paths.
    pub manifest: Manifest,
}

impl SyncJob {
    /// Job with default build and fetch options that saves the merged manifest.
    pub fn new(local_root: impl Into<PathBuf>, remote_base: impl Into<String>) -> Self {
        let local_root = local_root.into();
        Self {
            build: BuildOptions::new(local_root.clone()),
            local_root,
            remote_base: remote_base.into(),
            manifest_name: DEFAULT_MANIFEST_NAME.to_string(),
            fetch: FetchOptions::default(),
            save_manifest: true,
        }
    }

    /// Use a manifest file name other than [`DEFAULT_MANIFEST_NAME`].
    pub fn with_manifest_name(mut self, name: impl Into<String>) -> Self {
        self.manifest_name = name.into();
        self
    }

    /// Replace the scan options.
    pub fn with_build(mut self, build: BuildOptions) -> Self {
        self.build = build;
        self
    }

    /// Replace the fetch options.
    pub fn with_fetch(mut self, fetch: FetchOptions) -> Self {
        self.fetch = fetch;
        self
    }

    /// Whether `run` writes the merged manifest to disk.
    pub fn with_save_manifest(mut self, save: bool) -> Self {
        self.save_manifest = save;
        self
    }

    /// Location of the remote manifest.
    pub fn remote_manifest_location(&self) -> String {
        format!(
            "{}/{}",
            self.remote_base.trim_end_matches('/'),
            self.manifest_name
        )
    }

    /// Scan, compare, fetch, and merge.
    ///
    /// Fetched files are re-fingerprinted and checked against the remote
    /// hash; only matching paths are merged. A mismatch is reported as
    /// [`FetchError::Integrity`]. Local files absent from the remote manifest
    /// are left alone.
    pub fn run(&self) -> Result<SyncOutcome> {
        let build_options = self.build.clone().with_exclude(self.manifest_name.clone());
        std::fs::create_dir_all(&self.local_root)?;

        let local = build(&build_options)?.manifest;
        let remote = load_manifest(&self.remote_manifest_location(), &self.fetch)?;

        let update_set = diff(&local, &remote);
        log::info!(
            "{} of {} remote files need updating",
            update_set.len(),
            remote.len()
        );

        let source = source_for(&self.remote_base, &self.fetch)?;
        let mut report = fetch_all_mapped(
            &update_set,
            source.as_ref(),
            |path| build_options.local_path(path),
            &self.fetch,
        )?;

        let fresh = build_paths(&build_options, &report.succeeded)?;
        reject_mismatches(&mut report, &fresh, &remote);
        let manifest = merge(&local, &report.succeeded, &fresh)?;

        if self.save_manifest {
            manifest.save(self.local_root.join(&self.manifest_name))?;
        }
        if !report.is_complete() {
            log::warn!("{} files could not be fetched", report.failed.len());
        }

        Ok(SyncOutcome {
            update_set,
            report,
            manifest,
        })
    }
}

/// Move fetched paths whose content does not hash to the published value
/// from `succeeded` to `failed`.
fn reject_mismatches(report: &mut FetchReport, fresh: &Manifest, remote: &Manifest) {
    let mismatched: Vec<String> = report
        .succeeded
        .iter()
        .filter(|path| {
            let got = fresh.get(path.as_str()).map(|e| &e.content_hash);
            let want = remote.get(path.as_str()).map(|e| &e.content_hash);
            got != want
        })
        .cloned()
        .collect();

    for path in mismatched {
        log::warn!("Content of {} does not match the remote manifest", path);
        report.succeeded.remove(&path);
        report.failed.insert(path.clone(), FetchError::Integrity(path));
    }
}
