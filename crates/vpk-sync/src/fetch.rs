//! Fetching files listed in an update set.
//!
//! A [`Source`] resolves a manifest path against a base location. Batches run
//! on a bounded rayon pool and every path ends up in exactly one half of the
//! returned [`FetchReport`].

use crate::error::{FetchError, Result};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vpk_format::{normalize_entry_path, write_atomic, CancelFlag, UpdateSet};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of concurrent fetches.
pub const DEFAULT_WORKERS: usize = 4;

/// Settings shared by every fetch in a batch.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Upper bound on concurrent fetches.
    pub workers: usize,
    /// Timeout of a single HTTP request.
    pub timeout: Duration,
    /// Checked before each path is fetched.
    pub cancel: CancelFlag,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            timeout: DEFAULT_TIMEOUT,
            cancel: CancelFlag::new(),
        }
    }
}

impl FetchOptions {
    /// Set the number of concurrent fetches; zero is treated as one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Share a cancellation flag with the caller.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A place files can be read from by relative path.
pub trait Source: Send + Sync {
    /// Read `path` relative to the source's base.
    fn fetch(&self, path: &str) -> std::result::Result<Vec<u8>, FetchError>;

    /// Base location, for logging.
    fn base(&self) -> &str;
}

/// Files served over HTTP(S) below a base URL.
#[derive(Debug, Clone)]
pub struct HttpSource {
    base: String,
    client: reqwest::blocking::Client,
}

impl HttpSource {
    /// Client for files below `base`, with `timeout` applied to each request.
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub(crate) fn get(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().map_err(|e| transport_error(url, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Network(format!("{}: HTTP {}", url, status)));
        }

        let body = response.bytes().map_err(|e| transport_error(url, e))?;
        Ok(body.to_vec())
    }
}

impl Source for HttpSource {
    fn fetch(&self, path: &str) -> std::result::Result<Vec<u8>, FetchError> {
        validate_path(path)?;
        self.get(&format!("{}/{}", self.base, path))
    }

    fn base(&self) -> &str {
        &self.base
    }
}

/// Files below a local directory, e.g. a mounted mirror.
#[derive(Debug, Clone)]
pub struct DirSource {
    base: String,
    root: PathBuf,
}

impl DirSource {
    /// Source reading files below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            base: root.display().to_string(),
            root,
        }
    }
}

impl Source for DirSource {
    fn fetch(&self, path: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let relative = validate_path(path)?;
        let full = self.root.join(relative);
        fs::read(&full).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => FetchError::NotFound(full.display().to_string()),
            _ => FetchError::Network(format!("{}: {}", full.display(), e)),
        })
    }

    fn base(&self) -> &str {
        &self.base
    }
}

/// Pick a source for `base`: HTTP for `http://` and `https://`, a directory otherwise.
pub fn source_for(base: &str, options: &FetchOptions) -> Result<Box<dyn Source>> {
    if is_url(base) {
        Ok(Box::new(HttpSource::new(base, options.timeout)?))
    } else {
        Ok(Box::new(DirSource::new(base)))
    }
}

pub(crate) fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Fetch a single file from `base_url` with default options.
pub fn fetch(path: &str, base_url: &str) -> std::result::Result<Vec<u8>, FetchError> {
    let source = source_for(base_url, &FetchOptions::default())
        .map_err(|e| FetchError::Network(e.to_string()))?;
    source.fetch(path)
}

/// Outcome of a batch fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Paths written to their target.
    pub succeeded: BTreeSet<String>,
    /// Paths that could not be fetched, with the reason.
    pub failed: BTreeMap<String, FetchError>,
}

impl FetchReport {
    /// Whether every requested path was fetched.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of paths attempted.
    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fetch every path of `update_set` into `local_root/<path>`.
pub fn fetch_all(
    update_set: &UpdateSet,
    source: &dyn Source,
    local_root: &Path,
    options: &FetchOptions,
) -> Result<FetchReport> {
    fetch_all_mapped(update_set, source, |path| local_root.join(path), options)
}

/// Fetch every path of `update_set`, writing each to `target(path)`.
///
/// Individual failures are recorded in the report; the batch always runs to
/// the end. Paths not started before cancellation are reported as
/// [`FetchError::Cancelled`]; files already written stay in place.
pub fn fetch_all_mapped<F>(
    update_set: &UpdateSet,
    source: &dyn Source,
    target: F,
    options: &FetchOptions,
) -> Result<FetchReport>
where
    F: Fn(&str) -> PathBuf + Sync,
{
    log::info!(
        "Fetching {} files from {} with {} workers",
        update_set.len(),
        source.base(),
        options.workers.max(1)
    );
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .build()?;

    let outcomes: Vec<(String, std::result::Result<(), FetchError>)> = pool.install(|| {
        update_set
            .par_iter()
            .map(|path| {
                let outcome = fetch_one(path, source, &target, &options.cancel);
                (path.clone(), outcome)
            })
            .collect()
    });

    let mut report = FetchReport::default();
    for (path, outcome) in outcomes {
        match outcome {
            Ok(()) => {
                report.succeeded.insert(path);
            }
            Err(err) => {
                log::warn!("Failed to fetch {}: {}", path, err);
                report.failed.insert(path, err);
            }
        }
    }

    log::info!(
        "Fetched {} of {} files",
        report.succeeded.len(),
        report.len()
    );
    Ok(report)
}

fn fetch_one<F>(
    path: &str,
    source: &dyn Source,
    target: &F,
    cancel: &CancelFlag,
) -> std::result::Result<(), FetchError>
where
    F: Fn(&str) -> PathBuf,
{
    if cancel.is_cancelled() {
        return Err(FetchError::Cancelled);
    }
    validate_path(path)?;

    let data = source.fetch(path)?;
    let destination = target(path);
    write_atomic(&destination, &data)
        .map_err(|e| FetchError::Write(format!("{}: {}", destination.display(), e)))?;
    log::debug!("Fetched {} ({} bytes)", path, data.len());
    Ok(())
}

fn validate_path(path: &str) -> std::result::Result<PathBuf, FetchError> {
    normalize_entry_path(path).map_err(|_| FetchError::InvalidPath(path.to_string()))
}

fn transport_error(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(url.to_string())
    } else {
        FetchError::Network(format!("{}: {}", url, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn set(paths: &[&str]) -> UpdateSet {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_source_for_dispatch() {
        let options = FetchOptions::default();
        assert_eq!(
            source_for("http://example.com/files/", &options).unwrap().base(),
            "http://example.com/files"
        );
        assert_eq!(source_for("/srv/mirror", &options).unwrap().base(), "/srv/mirror");
    }

    #[test]
    fn test_dir_source_fetch() {
        let remote = tempdir().unwrap();
        fs::create_dir_all(remote.path().join("sub")).unwrap();
        fs::write(remote.path().join("sub/a.txt"), b"alpha").unwrap();

        let source = DirSource::new(remote.path());
        assert_eq!(source.fetch("sub/a.txt").unwrap(), b"alpha");
        assert!(matches!(source.fetch("missing"), Err(FetchError::NotFound(_))));
        assert!(matches!(source.fetch("../etc"), Err(FetchError::InvalidPath(_))));
    }

    #[test]
    fn test_fetch_all_partial_success() {
        let remote = tempdir().unwrap();
        let local = tempdir().unwrap();
        fs::write(remote.path().join("a"), b"A").unwrap();
        fs::create_dir_all(remote.path().join("d")).unwrap();
        fs::write(remote.path().join("d/b"), b"B").unwrap();

        let report = fetch_all(
            &set(&["a", "d/b", "missing", "/abs"]),
            &DirSource::new(remote.path()),
            local.path(),
            &FetchOptions::default().with_workers(2),
        )
        .unwrap();

        assert_eq!(report.succeeded, set(&["a", "d/b"]));
        assert_eq!(report.failed.len(), 2);
        assert!(matches!(report.failed["missing"], FetchError::NotFound(_)));
        assert!(matches!(report.failed["/abs"], FetchError::InvalidPath(_)));
        assert!(!report.is_complete());
        assert_eq!(fs::read(local.path().join("d/b")).unwrap(), b"B");
    }

    #[test]
    fn test_fetch_all_overwrites_existing() {
        let remote = tempdir().unwrap();
        let local = tempdir().unwrap();
        fs::write(remote.path().join("f"), b"new").unwrap();
        fs::write(local.path().join("f"), b"old contents").unwrap();

        let report = fetch_all(
            &set(&["f"]),
            &DirSource::new(remote.path()),
            local.path(),
            &FetchOptions::default(),
        )
        .unwrap();
        assert!(report.is_complete());
        assert_eq!(fs::read(local.path().join("f")).unwrap(), b"new");
    }

    #[test]
    fn test_fetch_all_cancelled() {
        let remote = tempdir().unwrap();
        let local = tempdir().unwrap();
        fs::write(remote.path().join("a"), b"A").unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let report = fetch_all(
            &set(&["a"]),
            &DirSource::new(remote.path()),
            local.path(),
            &FetchOptions::default().with_cancel(cancel),
        )
        .unwrap();
        assert_eq!(report.failed["a"], FetchError::Cancelled);
        assert!(!local.path().join("a").exists());
    }

    #[test]
    fn test_write_failure_reported() {
        let remote = tempdir().unwrap();
        let local = tempdir().unwrap();
        fs::write(remote.path().join("a"), b"A").unwrap();
        // A file where the parent directory should be.
        fs::write(local.path().join("blocked"), b"").unwrap();

        let report = fetch_all_mapped(
            &set(&["a"]),
            &DirSource::new(remote.path()),
            |path| local.path().join("blocked").join(path),
            &FetchOptions::default(),
        )
        .unwrap();
        assert!(matches!(report.failed["a"], FetchError::Write(_)));
    }
}
