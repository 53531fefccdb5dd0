//! Directory manifests: path to content hash, optionally with size and mtime.
//!
//! Content hashes are MD5 hex digests, so manifests published by other
//! tooling for the same tree compare equal.

use crate::{Error, Result};
use chrono::{DateTime, Local, NaiveDateTime};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::SystemTime;

/// Length in bytes of a content hash.
pub const HASH_LEN: usize = 16;

/// Textual format of `modified_at`.
pub const MODIFIED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Whether a manifest records only hashes or hashes plus size and mtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManifestMode {
    /// Path to hash only.
    #[default]
    Basic,
    /// Path to `[hash, size, modified_at]`.
    Full,
}

/// Size and modification time recorded in full mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// Byte length of the file.
    pub size: u64,
    /// Last modification, second precision, `YYYY-MM-DD HH:MM:SS`.
    pub modified_at: String,
}

/// Fingerprint of a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Lower-case hex digest of the file contents.
    pub content_hash: String,
    /// Present only in full mode.
    pub meta: Option<FileMeta>,
}

impl ManifestEntry {
    /// Entry carrying only a hash.
    pub fn basic(content_hash: impl Into<String>) -> Self {
        Self {
            content_hash: content_hash.into(),
            meta: None,
        }
    }

    /// Entry carrying hash, size and modification time.
    pub fn full(content_hash: impl Into<String>, size: u64, modified_at: impl Into<String>) -> Self {
        Self {
            content_hash: content_hash.into(),
            meta: Some(FileMeta {
                size,
                modified_at: modified_at.into(),
            }),
        }
    }

    /// Mode this entry belongs to.
    pub fn mode(&self) -> ManifestMode {
        if self.meta.is_some() {
            ManifestMode::Full
        } else {
            ManifestMode::Basic
        }
    }

    /// Same entry without size and modification time.
    pub fn to_basic(&self) -> Self {
        Self::basic(self.content_hash.clone())
    }
}

/// Mapping of relative, `/`-separated paths to file fingerprints.
///
/// The mode is manifest-wide: every entry of a [`ManifestMode::Full`] manifest
/// carries metadata and no entry of a [`ManifestMode::Basic`] one does.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Manifest {
    mode: ManifestMode,
    entries: BTreeMap<String, ManifestEntry>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Basic(String),
    Full(String, u64, String),
}

impl Manifest {
    /// Create an empty manifest.
    pub fn new(mode: ManifestMode) -> Self {
        Self {
            mode,
            entries: BTreeMap::new(),
        }
    }

    /// Create a manifest from entries, checking they all match `mode`.
    pub fn from_entries(
        mode: ManifestMode,
        entries: impl IntoIterator<Item = (String, ManifestEntry)>,
    ) -> Result<Self> {
        let mut manifest = Self::new(mode);
        for (path, entry) in entries {
            manifest.insert(path, entry)?;
        }
        Ok(manifest)
    }

    /// Manifest-wide mode.
    pub fn mode(&self) -> ManifestMode {
        self.mode
    }

    /// Insert or replace an entry. Rejects entries of the other mode.
    pub fn insert(&mut self, path: impl Into<String>, entry: ManifestEntry) -> Result<()> {
        let path = path.into();
        if entry.mode() != self.mode {
            return Err(Error::InvalidFormat(format!(
                "entry '{}' is {:?} but manifest is {:?}",
                path,
                entry.mode(),
                self.mode
            )));
        }
        self.entries.insert(path, entry);
        Ok(())
    }

    /// Look up an entry by path.
    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    /// Whether the manifest lists `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Iterate over entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.entries.iter()
    }

    /// Iterate over paths in order.
    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of recorded sizes. `None` for basic manifests.
    pub fn total_size(&self) -> Option<u64> {
        match self.mode {
            ManifestMode::Basic => None,
            ManifestMode::Full => Some(
                self.entries
                    .values()
                    .filter_map(|entry| entry.meta.as_ref())
                    .map(|meta| meta.size)
                    .sum(),
            ),
        }
    }

    /// Parse a manifest from JSON bytes.
    ///
    /// The mode is inferred from the entries; an empty object yields an empty
    /// basic manifest.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let raw: BTreeMap<String, RawEntry> = serde_json::from_slice(data)
            .map_err(|e| Error::InvalidFormat(format!("manifest json: {}", e)))?;

        let mode = match raw.values().next() {
            Some(RawEntry::Full(..)) => ManifestMode::Full,
            _ => ManifestMode::Basic,
        };

        let mut manifest = Self::new(mode);
        for (path, entry) in raw {
            let entry = match entry {
                RawEntry::Basic(hash) => ManifestEntry::basic(hash),
                RawEntry::Full(hash, size, modified_at) => {
                    NaiveDateTime::parse_from_str(&modified_at, MODIFIED_AT_FORMAT).map_err(
                        |e| Error::InvalidFormat(format!("bad modified_at for '{}': {}", path, e)),
                    )?;
                    ManifestEntry::full(hash, size, modified_at)
                }
            };
            validate_hash(&path, &entry.content_hash)?;
            manifest.insert(path, entry)?;
        }
        Ok(manifest)
    }

    /// Serialize to tab-indented JSON with sorted keys.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut serializer)?;
        Ok(out)
    }

    /// Read a manifest from a local file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Loading local manifest: {}", path.display());
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        Self::from_json(&data)
    }

    /// Write the manifest next to `path` and rename it into place.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let data = self.to_json()?;
        write_atomic(path, &data)?;
        log::info!(
            "Saved manifest with {} entries to {}",
            self.len(),
            path.display()
        );
        Ok(())
    }
}

impl Serialize for Manifest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (path, entry) in &self.entries {
            let raw = match &entry.meta {
                None => RawEntry::Basic(entry.content_hash.clone()),
                Some(meta) => RawEntry::Full(
                    entry.content_hash.clone(),
                    meta.size,
                    meta.modified_at.clone(),
                ),
            };
            map.serialize_entry(path, &raw)?;
        }
        map.end()
    }
}

/// Compute the content hash of everything `reader` yields.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Md5::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compute the content hash of a byte slice.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Compute the content hash of a file.
pub fn hash_file<P: AsRef<Path>>(path: P) -> io::Result<String> {
    hash_reader(File::open(path)?)
}

/// Format a modification time the way manifests record it.
pub fn format_modified(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format(MODIFIED_AT_FORMAT)
        .to_string()
}

fn validate_hash(path: &str, hash: &str) -> Result<()> {
    let valid = hash.len() == HASH_LEN * 2 && hash.bytes().all(|b| b.is_ascii_hexdigit());
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidFormat(format!(
            "bad content hash for '{}': {}",
            path, hash
        )))
    }
}

/// Write `data` to a temporary file beside `path` and rename it into place.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".tmp.vpk-")
        .tempfile_in(parent)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| Error::IoError(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const H1: &str = "0123456789abcdef0123456789abcdef";
    const H2: &str = "fedcba9876543210fedcba9876543210";

    #[test]
    fn test_basic_json_shape() {
        let manifest = Manifest::from_entries(
            ManifestMode::Basic,
            [
                ("b/file.txt".to_string(), ManifestEntry::basic(H2)),
                ("a.txt".to_string(), ManifestEntry::basic(H1)),
            ],
        )
        .unwrap();

        let json: serde_json::Value = serde_json::from_slice(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({ "a.txt": H1, "b/file.txt": H2 }));
        assert!(String::from_utf8(manifest.to_json().unwrap())
            .unwrap()
            .contains("\n\t\"a.txt\""));
    }

    #[test]
    fn test_full_json_shape() {
        let manifest = Manifest::from_entries(
            ManifestMode::Full,
            [(
                "a.txt".to_string(),
                ManifestEntry::full(H1, 42, "2023-10-03 12:00:00"),
            )],
        )
        .unwrap();

        let json: serde_json::Value = serde_json::from_slice(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "a.txt": [H1, 42, "2023-10-03 12:00:00"] })
        );
        assert_eq!(manifest.total_size(), Some(42));
    }

    #[test]
    fn test_parse_infers_mode() {
        let basic = Manifest::from_json(format!(r#"{{"a": "{}"}}"#, H1).as_bytes()).unwrap();
        assert_eq!(basic.mode(), ManifestMode::Basic);
        assert_eq!(basic.get("a").unwrap().content_hash, H1);
        assert_eq!(basic.total_size(), None);

        let full = Manifest::from_json(
            format!(r#"{{"a": ["{}", 5, "2024-01-01 00:00:00"]}}"#, H1).as_bytes(),
        )
        .unwrap();
        assert_eq!(full.mode(), ManifestMode::Full);
        assert_eq!(full.get("a").unwrap().meta.as_ref().unwrap().size, 5);

        let empty = Manifest::from_json(b"{}").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_parse_rejects_mixed_and_malformed() {
        let mixed = format!(
            r#"{{"a": "{}", "b": ["{}", 5, "2024-01-01 00:00:00"]}}"#,
            H1, H2
        );
        assert!(matches!(
            Manifest::from_json(mixed.as_bytes()),
            Err(Error::InvalidFormat(_))
        ));

        for bad in [
            r#"[1, 2]"#.to_string(),
            r#"{"a": 5}"#.to_string(),
            r#"{"a": "not-a-hash"}"#.to_string(),
            format!(r#"{{"a": ["{}", 5, "yesterday"]}}"#, H1),
            format!(r#"{{"a": ["{}", -1, "2024-01-01 00:00:00"]}}"#, H1),
            "not json".to_string(),
        ] {
            assert!(
                matches!(Manifest::from_json(bad.as_bytes()), Err(Error::InvalidFormat(_))),
                "accepted {}",
                bad
            );
        }
    }

    #[test]
    fn test_insert_rejects_other_mode() {
        let mut manifest = Manifest::new(ManifestMode::Basic);
        let err = manifest
            .insert("a", ManifestEntry::full(H1, 1, "2024-01-01 00:00:00"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("manifest.json");
        let manifest = Manifest::from_entries(
            ManifestMode::Basic,
            [("x.txt".to_string(), ManifestEntry::basic(hash_bytes(b"hello")))],
        )
        .unwrap();

        manifest.save(&path).unwrap();
        assert_eq!(Manifest::load(&path).unwrap(), manifest);
    }

    #[test]
    fn test_hash_is_32_hex_chars_and_stable() {
        let hash = hash_bytes(b"hello");
        assert_eq!(hash.len(), 32);
        assert!(hash.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(hash, hash_reader(&b"hello"[..]).unwrap());
        assert_ne!(hash, hash_bytes(b"hellp"));
    }

    #[test]
    fn test_hash_known_vectors() {
        assert_eq!(hash_bytes(b"hello"), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(hash_bytes(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
