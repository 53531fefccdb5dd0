use crate::compression::CompressionMode;
use crate::crypto::EncryptionMode;
use crate::format::{self, default_name, PackageHeader};
use crate::manifest::write_atomic;
use crate::payload::{self, PackagePayload};
use crate::Result;
use std::path::{Path, PathBuf};

/// Builder for creating `.vpk` packages.
#[derive(Debug, Clone)]
pub struct PackageBuilder {
    header: PackageHeader,
    payload: PackagePayload,
}

impl Default for PackageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageBuilder {
    /// Create a new builder with default modes and an empty payload.
    pub fn new() -> Self {
        Self {
            header: PackageHeader::new(format::DEFAULT_NAME),
            payload: PackagePayload::new(),
        }
    }

    /// Set the package name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.header.name = name.into();
        self
    }

    /// Set the description.
    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.header.info = info.into();
        self
    }

    /// Set the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.header.author = author.into();
        self
    }

    /// Set the copyright notice.
    pub fn with_copyright(mut self, copyright: impl Into<String>) -> Self {
        self.header.copyright = copyright.into();
        self
    }

    /// Set the compression mode.
    pub fn with_compression(mut self, mode: CompressionMode) -> Self {
        self.header.compression = mode;
        self
    }

    /// Set the encryption mode.
    pub fn with_encryption(mut self, mode: EncryptionMode) -> Self {
        self.header.encryption = mode;
        self
    }

    /// Add or replace a single entry.
    pub fn with_entry(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.payload.insert(path.into(), data.into());
        self
    }

    /// Replace the payload.
    pub fn with_payload(mut self, payload: PackagePayload) -> Self {
        self.payload = payload;
        self
    }

    /// Add every regular file under `dir` and name the package after it.
    pub fn with_dir(mut self, dir: &Path) -> Result<Self> {
        self.payload.extend(payload::collect(dir)?);
        self.header.name = default_name(dir);
        Ok(self)
    }

    /// Name recorded in the header.
    pub fn name(&self) -> &str {
        &self.header.name
    }

    /// Encode the container in memory.
    pub fn encode(&self, key: &[u8]) -> Result<Vec<u8>> {
        format::encode(&self.header, &self.payload, key)
    }

    /// Write the package to the specified path.
    pub fn write_to<P: AsRef<Path>>(&self, path: P, key: &[u8]) -> Result<PathBuf> {
        let path = path.as_ref();
        let container = self.encode(key)?;
        write_atomic(path, &container)?;
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{read, PackageArchive};
    use tempfile::tempdir;

    #[test]
    fn test_builder_writes_readable_package() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/out.vpk");
        let key = [1u8; 16];

        PackageBuilder::new()
            .with_name("demo")
            .with_author("someone")
            .with_copyright("(c) 2024")
            .with_compression(CompressionMode::Gzip)
            .with_encryption(EncryptionMode::AesCbc)
            .with_entry("readme.md", b"# demo".to_vec())
            .write_to(&path, &key)
            .unwrap();

        let archive = PackageArchive::open(&path).unwrap();
        let header = archive.header();
        assert_eq!(header.name, "demo");
        assert_eq!(header.copyright, "(c) 2024");
        assert_eq!(header.compression, CompressionMode::Gzip);
        assert_eq!(header.encryption, EncryptionMode::AesCbc);
        assert_eq!(archive.payload(&key).unwrap()["readme.md"], b"# demo");
    }

    #[test]
    fn test_with_dir_names_package() {
        let root = tempdir().unwrap();
        let src = root.path().join("assets");
        std::fs::create_dir_all(src.join("img")).unwrap();
        std::fs::write(src.join("img/logo.png"), [0x89, b'P', b'N', b'G']).unwrap();

        let builder = PackageBuilder::new().with_dir(&src).unwrap();
        let (header, payload) = read(&builder.encode(&[2u8; 32]).unwrap(), &[2u8; 32]).unwrap();
        assert_eq!(header.name, "assets");
        assert!(payload.contains_key("img/logo.png"));
    }

    #[test]
    fn test_with_dir_keeps_dotted_name() {
        let root = tempdir().unwrap();
        let src = root.path().join("game.v2");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("a.txt"), b"a").unwrap();

        let builder = PackageBuilder::new().with_dir(&src).unwrap();
        assert_eq!(builder.name(), "game.v2");
    }
}
