//! The `.vpk` container.
//!
//! ```text
//! "VPK\0" | header_len u32 LE | header JSON | iv_len u8 | iv | tag_len u8 | tag | ciphertext
//! ```
//!
//! The header is plaintext. The ciphertext is the serialized payload,
//! compressed and then encrypted.

use crate::compression::{self, CompressionMode};
use crate::crypto::{self, EncryptionMode, Sealed};
use crate::manifest::write_atomic;
use crate::payload::{self, PackagePayload};
use crate::value::{match_dict, TypedValue};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Leading bytes of every container.
pub const MAGIC: &[u8; 4] = b"VPK\0";
/// Container format version written by this crate.
pub const FORMAT_VERSION: u32 = 3;
/// Package name used when none can be derived from a path.
pub const DEFAULT_NAME: &str = "package";

/// Plaintext metadata stored in front of the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageHeader {
    /// Package name.
    pub name: String,
    /// Free-text description.
    pub info: String,
    /// Length of the serialized payload before compression.
    pub data_size: u64,
    /// Author of the package.
    pub author: String,
    /// License or copyright notice.
    pub copyright: String,
    /// Creation time in unix seconds.
    pub timestamp: i64,
    /// Cipher mode of the ciphertext.
    pub encryption: EncryptionMode,
    /// Key length in bytes.
    pub key_size: usize,
    /// Container format version.
    pub version: u32,
    /// Compression applied before encryption.
    pub compression: CompressionMode,
}

#[derive(Deserialize)]
struct RawHeader {
    name: String,
    #[serde(default)]
    info: String,
    data_size: u64,
    #[serde(default)]
    author: String,
    #[serde(default)]
    copyright: String,
    timestamp: i64,
    encryption: String,
    key_size: usize,
    version: u32,
    compression: String,
}

impl PackageHeader {
    /// A header for a fresh package; sizes and timestamp are filled in on encode.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            info: String::new(),
            data_size: 0,
            author: String::new(),
            copyright: String::new(),
            timestamp: 0,
            encryption: EncryptionMode::default(),
            key_size: 0,
            version: FORMAT_VERSION,
            compression: CompressionMode::default(),
        }
    }

    /// Build a header from loosely-typed string fields.
    ///
    /// Unknown keys are ignored; numeric fields must coerce to integers.
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        let typed = match_dict(fields);
        let text = |key: &str| -> String {
            fields.get(key).cloned().unwrap_or_default()
        };
        let int = |key: &str| -> Result<i64> {
            match typed.get(key) {
                Some(TypedValue::Integer(v)) => Ok(*v),
                Some(other) => Err(Error::InvalidFormat(format!(
                    "header field '{}' is not an integer: {}",
                    key, other
                ))),
                None => Err(Error::InvalidFormat(format!("missing header field '{}'", key))),
            }
        };
        let non_negative = |key: &str| -> Result<u64> {
            u64::try_from(int(key)?)
                .map_err(|_| Error::InvalidFormat(format!("header field '{}' is negative", key)))
        };

        Ok(Self {
            name: text("name"),
            info: text("info"),
            data_size: non_negative("data_size")?,
            author: text("author"),
            copyright: text("copyright"),
            timestamp: int("timestamp")?,
            encryption: text("encryption").parse()?,
            key_size: non_negative("key_size")? as usize,
            version: u32::try_from(non_negative("version")?)
                .map_err(|_| Error::InvalidFormat("header version out of range".to_string()))?,
            compression: text("compression").parse()?,
        })
    }

    /// Header fields as strings, the inverse of [`Self::from_fields`].
    pub fn to_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), self.name.clone());
        fields.insert("info".to_string(), self.info.clone());
        fields.insert("data_size".to_string(), self.data_size.to_string());
        fields.insert("author".to_string(), self.author.clone());
        fields.insert("copyright".to_string(), self.copyright.clone());
        fields.insert("timestamp".to_string(), self.timestamp.to_string());
        fields.insert("encryption".to_string(), self.encryption.to_string());
        fields.insert("key_size".to_string(), self.key_size.to_string());
        fields.insert("version".to_string(), self.version.to_string());
        fields.insert("compression".to_string(), self.compression.to_string());
        fields
    }

    fn from_json(data: &[u8]) -> Result<Self> {
        let raw: RawHeader = serde_json::from_slice(data)
            .map_err(|e| Error::InvalidFormat(format!("package header: {}", e)))?;
        if raw.version != FORMAT_VERSION {
            log::warn!(
                "Package '{}' has format version {}, expected {}",
                raw.name,
                raw.version,
                FORMAT_VERSION
            );
        }
        Ok(Self {
            name: raw.name,
            info: raw.info,
            data_size: raw.data_size,
            author: raw.author,
            copyright: raw.copyright,
            timestamp: raw.timestamp,
            encryption: raw.encryption.parse()?,
            key_size: raw.key_size,
            version: raw.version,
            compression: raw.compression.parse()?,
        })
    }
}

/// Serialize, compress and encrypt `payload` behind `header`.
///
/// `data_size`, `key_size`, `version` and `timestamp` are taken from the
/// payload, the key and the clock; the rest of `header` is kept.
pub fn encode(header: &PackageHeader, payload: &PackagePayload, key: &[u8]) -> Result<Vec<u8>> {
    let raw = payload::serialize(payload);
    let header = PackageHeader {
        data_size: raw.len() as u64,
        key_size: key.len(),
        version: FORMAT_VERSION,
        timestamp: chrono::Utc::now().timestamp(),
        ..header.clone()
    };

    let compressed = compression::deflate(&raw, header.compression)?;
    let sealed = crypto::encrypt(key, &compressed, header.encryption)?;
    let container = write_container(&header, &sealed)?;

    log::info!(
        "Encoded package '{}': {} entries, {} bytes raw, {} bytes sealed",
        header.name,
        payload.len(),
        raw.len(),
        container.len()
    );
    Ok(container)
}

/// Package every regular file under `dir`.
pub fn create(
    dir: &Path,
    key: &[u8],
    compression: CompressionMode,
    encryption: EncryptionMode,
) -> Result<Vec<u8>> {
    let payload = payload::collect(dir)?;
    let header = PackageHeader {
        compression,
        encryption,
        ..PackageHeader::new(default_name(dir))
    };
    encode(&header, &payload, key)
}

/// Parse the plaintext header without a key.
pub fn read_header(container: &[u8]) -> Result<PackageHeader> {
    Ok(parse_container(container)?.0)
}

/// Decrypt and decode a container.
///
/// No payload is returned unless every check passes.
pub fn read(container: &[u8], key: &[u8]) -> Result<(PackageHeader, PackagePayload)> {
    let (header, sealed) = parse_container(container)?;
    if header.key_size != key.len() {
        return Err(Error::KeyLength {
            expected: format!("{} bytes", header.key_size),
            got: key.len(),
        });
    }

    let compressed = crypto::decrypt(key, &sealed, header.encryption)?;
    let raw = compression::inflate(&compressed, header.compression)?;
    if raw.len() as u64 != header.data_size {
        return Err(Error::Integrity(format!(
            "payload is {} bytes, header declares {}",
            raw.len(),
            header.data_size
        )));
    }

    let payload = payload::deserialize(&raw)?;
    log::debug!(
        "Read package '{}' with {} entries",
        header.name,
        payload.len()
    );
    Ok((header, payload))
}

/// Rewrite the container at `vpk_path` with `existing_payload` changed.
///
/// Paths in `removals` are dropped first (absent ones are ignored), then
/// `update_entries` overwrite or add entries by exact path. The metadata of
/// the container already at `vpk_path` is carried over; nothing else is
/// removed.
pub fn update(
    existing_payload: &PackagePayload,
    update_entries: &PackagePayload,
    removals: &BTreeSet<String>,
    key: &[u8],
    vpk_path: &Path,
) -> Result<Vec<u8>> {
    let current = fs::read(vpk_path)?;
    let header = read_header(&current)?;

    let mut merged = existing_payload.clone();
    for path in removals {
        if merged.remove(path).is_none() {
            log::debug!("Removal of '{}' ignored, not in package", path);
        }
    }
    for (path, data) in update_entries {
        merged.insert(path.clone(), data.clone());
    }

    let container = encode(&header, &merged, key)?;
    write_atomic(vpk_path, &container)?;
    log::info!(
        "Updated {}: {} changed, {} removed",
        vpk_path.display(),
        update_entries.len(),
        removals.len()
    );
    Ok(container)
}

/// An opened `.vpk` file whose header has been parsed.
#[derive(Debug, Clone)]
pub struct PackageArchive {
    path: PathBuf,
    header: PackageHeader,
}

impl PackageArchive {
    /// Open a container and parse its header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let header = read_header(&fs::read(path)?)?;
        Ok(Self {
            path: path.to_path_buf(),
            header,
        })
    }

    /// The plaintext header.
    pub fn header(&self) -> &PackageHeader {
        &self.header
    }

    /// Location of the container.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without extension.
    pub fn file_stem(&self) -> Option<String> {
        self.path
            .file_stem()
            .map(|v| v.to_string_lossy().to_string())
    }

    /// Decrypt the payload.
    pub fn payload(&self, key: &[u8]) -> Result<PackagePayload> {
        Ok(read(&fs::read(&self.path)?, key)?.1)
    }

    /// Decrypt the payload and write it below `dest`.
    pub fn extract(&self, key: &[u8], dest: &Path) -> Result<Vec<PathBuf>> {
        payload::unpack(&self.payload(key)?, dest)
    }

    /// Apply removals and updates, rewrite the file and reload the header.
    pub fn update(
        &mut self,
        key: &[u8],
        update_entries: &PackagePayload,
        removals: &BTreeSet<String>,
    ) -> Result<()> {
        let existing = self.payload(key)?;
        let container = update(&existing, update_entries, removals, key, &self.path)?;
        self.header = read_header(&container)?;
        Ok(())
    }
}

/// Package name for a source directory or a `.vpk` file.
///
/// Directories keep their full name (`game.v2` stays `game.v2`); only a
/// `.vpk` extension is dropped. Paths without a final component, such as
/// `.`, are named after the directory they resolve to.
pub(crate) fn default_name(path: &Path) -> String {
    fn named(path: &Path) -> Option<String> {
        let name = if path.extension().is_some_and(|ext| ext == "vpk") {
            path.file_stem()
        } else {
            path.file_name()
        };
        name.map(|v| v.to_string_lossy().to_string())
            .filter(|v| !v.is_empty() && v != "." && v != "..")
    }

    named(path)
        .or_else(|| path.canonicalize().ok().and_then(|full| named(&full)))
        .unwrap_or_else(|| DEFAULT_NAME.to_string())
}

fn write_container(header: &PackageHeader, sealed: &Sealed) -> Result<Vec<u8>> {
    let header_json = serde_json::to_vec(header)?;
    let header_len = u32::try_from(header_json.len())
        .map_err(|_| Error::InvalidFormat("package header too large".to_string()))?;
    let iv_len = u8::try_from(sealed.iv.len())
        .map_err(|_| Error::InvalidFormat("iv too long".to_string()))?;
    let tag = sealed.tag.as_deref().unwrap_or_default();
    let tag_len =
        u8::try_from(tag.len()).map_err(|_| Error::InvalidFormat("tag too long".to_string()))?;

    let mut out = Vec::with_capacity(
        MAGIC.len() + 4 + header_json.len() + 2 + sealed.iv.len() + tag.len() + sealed.ciphertext.len(),
    );
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&header_json);
    out.push(iv_len);
    out.extend_from_slice(&sealed.iv);
    out.push(tag_len);
    out.extend_from_slice(tag);
    out.extend_from_slice(&sealed.ciphertext);
    Ok(out)
}

fn parse_container(container: &[u8]) -> Result<(PackageHeader, Sealed)> {
    let truncated = || Error::InvalidFormat("truncated package container".to_string());

    let rest = container
        .strip_prefix(MAGIC.as_slice())
        .ok_or_else(|| Error::InvalidFormat("not a vpk container".to_string()))?;

    let (len_bytes, rest) = split(rest, 4).ok_or_else(truncated)?;
    let mut header_len = [0u8; 4];
    header_len.copy_from_slice(len_bytes);
    let (header_json, rest) =
        split(rest, u32::from_le_bytes(header_len) as usize).ok_or_else(truncated)?;
    let header = PackageHeader::from_json(header_json)?;

    let (iv_len, rest) = split(rest, 1).ok_or_else(truncated)?;
    let (iv, rest) = split(rest, iv_len[0] as usize).ok_or_else(truncated)?;
    let (tag_len, rest) = split(rest, 1).ok_or_else(truncated)?;
    let (tag, ciphertext) = split(rest, tag_len[0] as usize).ok_or_else(truncated)?;

    let sealed = Sealed {
        ciphertext: ciphertext.to_vec(),
        iv: iv.to_vec(),
        tag: (!tag.is_empty()).then(|| tag.to_vec()),
    };
    Ok((header, sealed))
}

fn split(data: &[u8], at: usize) -> Option<(&[u8], &[u8])> {
    (data.len() >= at).then(|| data.split_at(at))
}
