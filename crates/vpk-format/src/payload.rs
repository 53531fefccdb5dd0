//! Flat serialization of a package payload.
//!
//! Records are written in path order as
//! `path_len (u32 LE) | path | data_len (u64 LE) | data`.

use crate::fingerprint;
use crate::manifest::write_atomic;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Relative file path to raw bytes.
pub type PackagePayload = BTreeMap<String, Vec<u8>>;

/// Read every regular file under `dir` into a payload keyed by relative path.
pub fn collect(dir: &Path) -> Result<PackagePayload> {
    let (files, skipped) = fingerprint::walk(dir)?;
    if !skipped.is_empty() {
        log::warn!(
            "{} directories under {} could not be read",
            skipped.len(),
            dir.display()
        );
    }

    let mut payload = PackagePayload::new();
    for file in files {
        let data = fs::read(&file.path).map_err(|e| {
            Error::IoError(std::io::Error::new(
                e.kind(),
                format!("{}: {}", file.path.display(), e),
            ))
        })?;
        payload.insert(file.relative, data);
    }
    Ok(payload)
}

/// Serialize `payload` into one buffer.
pub fn serialize(payload: &PackagePayload) -> Vec<u8> {
    let capacity = payload
        .iter()
        .map(|(path, data)| 4 + path.len() + 8 + data.len())
        .sum();
    let mut buffer = Vec::with_capacity(capacity);
    for (path, data) in payload {
        buffer.extend_from_slice(&(path.len() as u32).to_le_bytes());
        buffer.extend_from_slice(path.as_bytes());
        buffer.extend_from_slice(&(data.len() as u64).to_le_bytes());
        buffer.extend_from_slice(data);
    }
    buffer
}

/// Parse a buffer produced by [`serialize`].
pub fn deserialize(buffer: &[u8]) -> Result<PackagePayload> {
    let mut payload = PackagePayload::new();
    let mut cursor = Cursor { buffer, pos: 0 };

    while !cursor.is_empty() {
        let path_len = u32::from_le_bytes(cursor.array()?) as usize;
        let path = std::str::from_utf8(cursor.take(path_len)?)
            .map_err(|_| Error::InvalidFormat("payload path is not UTF-8".to_string()))?
            .to_string();
        let data_len = usize::try_from(u64::from_le_bytes(cursor.array()?))
            .map_err(|_| Error::InvalidFormat("payload record too large".to_string()))?;
        let data = cursor.take(data_len)?.to_vec();

        if payload.insert(path.clone(), data).is_some() {
            return Err(Error::InvalidFormat(format!(
                "duplicate payload path '{}'",
                path
            )));
        }
    }

    Ok(payload)
}

/// Validate a payload or manifest key and turn it into a relative path.
///
/// Empty keys, absolute paths, and `..` components are rejected.
pub fn normalize_entry_path(key: &str) -> Result<PathBuf> {
    if key.is_empty() || key.starts_with('/') || key.starts_with('\\') {
        return Err(Error::InvalidFormat(format!("invalid entry path '{}'", key)));
    }

    let rel = Path::new(key);
    for component in rel.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidFormat(format!("invalid entry path '{}'", key)));
            }
            _ => {}
        }
    }

    Ok(rel.to_path_buf())
}

/// Write every entry of `payload` below `dest`.
pub fn unpack(payload: &PackagePayload, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(payload.len());
    for (key, data) in payload {
        let target = dest.join(normalize_entry_path(key)?);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&target, data)?;
        written.push(target);
    }
    log::info!("Unpacked {} files into {}", written.len(), dest.display());
    Ok(written)
}

struct Cursor<'a> {
    buffer: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn is_empty(&self) -> bool {
        self.pos >= self.buffer.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buffer.len())
            .ok_or_else(|| Error::InvalidFormat("truncated payload record".to_string()))?;
        let slice = &self.buffer[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}
