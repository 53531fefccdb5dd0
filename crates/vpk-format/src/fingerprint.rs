//! Directory fingerprinting.
//!
//! Walks a directory tree and records a content hash (plus size and mtime in
//! full mode) for every regular file. Hashing runs on the rayon pool; the
//! results are collected into a fresh [`Manifest`].

use crate::cancel::CancelFlag;
use crate::diff::UpdateSet;
use crate::manifest::{format_modified, hash_file, Manifest, ManifestEntry, ManifestMode};
use crate::payload::normalize_entry_path;
use crate::{Error, Result};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Explicit configuration for a single build.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Directory to fingerprint.
    pub root: PathBuf,
    /// Leading path components removed from every key when present.
    pub strip_prefix: Option<String>,
    /// Prefix prepended to every key after stripping.
    pub replace_prefix: Option<String>,
    /// Record size and modification time as well as the hash.
    pub full: bool,
    /// Root-relative paths that are never fingerprinted (e.g. the manifest file).
    pub exclude: Vec<String>,
    /// Checked before each file is hashed.
    pub cancel: CancelFlag,
}

impl BuildOptions {
    /// Options for fingerprinting `root` in basic mode.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Enable or disable full mode.
    pub fn with_full(mut self, full: bool) -> Self {
        self.full = full;
        self
    }

    /// Strip a leading prefix from every key.
    pub fn with_strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.strip_prefix = Some(normalize_prefix(&prefix.into()));
        self
    }

    /// Prepend a prefix to every key.
    pub fn with_replace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.replace_prefix = Some(normalize_prefix(&prefix.into()));
        self
    }

    /// Skip a root-relative path.
    pub fn with_exclude(mut self, path: impl Into<String>) -> Self {
        self.exclude.push(normalize_prefix(&path.into()));
        self
    }

    /// Use a shared cancellation flag.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Mode of the manifests these options produce.
    pub fn mode(&self) -> ManifestMode {
        if self.full {
            ManifestMode::Full
        } else {
            ManifestMode::Basic
        }
    }

    /// Manifest key for a root-relative, `/`-separated path.
    pub fn manifest_key(&self, relative: &str) -> String {
        let stripped = match self.strip_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => relative
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(relative),
            _ => relative,
        };
        match self.replace_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{}/{}", prefix, stripped),
            _ => stripped.to_string(),
        }
    }

    /// Root-relative path for a manifest key; the inverse of [`Self::manifest_key`].
    pub fn relative_path(&self, key: &str) -> String {
        let unreplaced = match self.replace_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => key
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(key),
            _ => key,
        };
        match self.strip_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{}/{}", prefix, unreplaced),
            _ => unreplaced.to_string(),
        }
    }

    /// Location on disk of the file a manifest key refers to.
    pub fn local_path(&self, key: &str) -> PathBuf {
        self.root.join(self.relative_path(key))
    }
}

/// Result of [`build`].
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// The fingerprints.
    pub manifest: Manifest,
    /// Directories that could not be descended into.
    pub skipped_dirs: Vec<PathBuf>,
}

/// A regular file found under a root.
#[derive(Debug, Clone)]
pub(crate) struct FoundFile {
    pub path: PathBuf,
    pub relative: String,
}

/// Enumerate regular files under `root`, sorted by relative path.
///
/// Directories that cannot be read are returned separately; an unreadable
/// root is an error.
pub(crate) fn walk(root: &Path) -> Result<(Vec<FoundFile>, Vec<PathBuf>)> {
    let mut files = Vec::new();
    let mut skipped = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() > 0 => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                log::warn!("Skipping unreadable directory {}: {}", path.display(), err);
                skipped.push(path);
                continue;
            }
            Err(err) => return Err(Error::IoError(io::Error::from(err))),
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| Error::InvalidFormat(format!("{} escapes root", entry.path().display())))?;
        files.push(FoundFile {
            path: entry.path().to_path_buf(),
            relative: normalize_relative(relative)?,
        });
    }

    Ok((files, skipped))
}

/// Fingerprint every regular file under `options.root`.
///
/// Fails fast on the first file that cannot be read.
pub fn build(options: &BuildOptions) -> Result<BuildOutput> {
    log::info!("Starting manifest creation for {}", options.root.display());
    let (files, skipped_dirs) = walk(&options.root)?;

    let excluded: BTreeSet<&str> = options.exclude.iter().map(String::as_str).collect();
    let files: Vec<FoundFile> = files
        .into_iter()
        .filter(|file| !excluded.contains(file.relative.as_str()))
        .collect();
    log::debug!("Gathered {} files", files.len());

    let entries = fingerprint_all(
        files
            .iter()
            .map(|file| (file.path.clone(), options.manifest_key(&file.relative)))
            .collect(),
        options,
    )?;

    let mut manifest = Manifest::new(options.mode());
    for (key, entry) in entries {
        if manifest.contains(&key) {
            return Err(Error::InvalidFormat(format!(
                "two files map to manifest path '{}'",
                key
            )));
        }
        manifest.insert(key, entry)?;
    }

    match manifest.total_size() {
        Some(total) => log::info!(
            "Hashed {} files ({} bytes), {} directories skipped",
            manifest.len(),
            total,
            skipped_dirs.len()
        ),
        None => log::info!(
            "Hashed {} files, {} directories skipped",
            manifest.len(),
            skipped_dirs.len()
        ),
    }

    Ok(BuildOutput {
        manifest,
        skipped_dirs,
    })
}

/// Fingerprint just the given manifest keys.
pub fn build_paths<'a, I>(options: &BuildOptions, keys: I) -> Result<Manifest>
where
    I: IntoIterator<Item = &'a String>,
{
    let targets = keys
        .into_iter()
        .map(|key| (options.local_path(key), key.clone()))
        .collect();
    Manifest::from_entries(options.mode(), fingerprint_all(targets, options)?)
}

/// Keys of `manifest` whose file is missing under `options.root` or whose
/// current content hash differs from the recorded one.
///
/// Keys that would resolve outside the root (absolute or containing `..`)
/// are skipped and never read.
pub fn verify_local(manifest: &Manifest, options: &BuildOptions) -> Result<UpdateSet> {
    let entries: Vec<(&String, &ManifestEntry)> = manifest.iter().collect();
    let changed: Vec<Option<String>> = entries
        .par_iter()
        .map(|(key, entry)| {
            if options.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if normalize_entry_path(&options.relative_path(key)).is_err() {
                log::debug!("Skipping unsafe manifest key {}", key);
                return Ok(None);
            }
            let path = options.local_path(key);
            if !path.is_file() {
                return Ok(Some((*key).clone()));
            }
            let hash = hash_file(&path).map_err(|e| with_path(&path, e))?;
            Ok((hash != entry.content_hash).then(|| (*key).clone()))
        })
        .collect::<Result<_>>()?;

    let modified: UpdateSet = changed.into_iter().flatten().collect();
    log::debug!("Modified or missing files: {}", modified.len());
    Ok(modified)
}

fn fingerprint_all(
    targets: Vec<(PathBuf, String)>,
    options: &BuildOptions,
) -> Result<Vec<(String, ManifestEntry)>> {
    targets
        .into_par_iter()
        .map(|(path, key)| {
            if options.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let entry = fingerprint(&path, options.full)?;
            Ok((key, entry))
        })
        .collect()
}

fn fingerprint(path: &Path, full: bool) -> Result<ManifestEntry> {
    let hash = hash_file(path).map_err(|e| with_path(path, e))?;
    if !full {
        return Ok(ManifestEntry::basic(hash));
    }

    let metadata = fs::metadata(path).map_err(|e| with_path(path, e))?;
    let modified = metadata.modified().map_err(|e| with_path(path, e))?;
    Ok(ManifestEntry::full(
        hash,
        metadata.len(),
        format_modified(modified),
    ))
}

fn with_path(path: &Path, err: io::Error) -> Error {
    Error::IoError(io::Error::new(
        err.kind(),
        format!("{}: {}", path.display(), err),
    ))
}

fn normalize_prefix(prefix: &str) -> String {
    prefix.replace('\\', "/").trim_matches('/').to_string()
}

/// Join the normal components of a relative path with `/`.
pub(crate) fn normalize_relative(path: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| {
                        Error::InvalidFormat(format!("non UTF-8 path: {}", path.display()))
                    })?
                    .to_string(),
            ),
            Component::CurDir => {}
            _ => {
                return Err(Error::InvalidFormat(format!(
                    "not a relative path: {}",
                    path.display()
                )))
            }
        }
    }
    Ok(parts.join("/"))
}
