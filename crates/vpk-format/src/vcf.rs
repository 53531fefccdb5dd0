//! Sealed configuration files (`.vcf`).
//!
//! A `.vcf` file is a JSON object holding the hex-encoded ciphertext, GCM tag
//! and nonce of a TOML or JSON config.

use crate::crypto::{self, EncryptionMode, Sealed, GCM_NONCE_LEN, TAG_LEN};
use crate::manifest::write_atomic;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// An AES-GCM sealed blob stored as a JSON object of hex strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VcfContainer {
    /// Encrypted config bytes.
    pub ciphertext: String,
    /// 16-byte GCM authentication tag.
    pub tag: String,
    /// 12-byte GCM nonce.
    pub iv: String,
}

impl VcfContainer {
    /// Encrypt `blob` with a fresh nonce.
    pub fn seal(key: &[u8], blob: &[u8]) -> Result<Self> {
        let sealed = crypto::encrypt(key, blob, EncryptionMode::AesGcm)?;
        Ok(Self {
            ciphertext: hex::encode(&sealed.ciphertext),
            tag: hex::encode(sealed.tag.unwrap_or_default()),
            iv: hex::encode(&sealed.iv),
        })
    }

    /// Decrypt and authenticate the blob.
    pub fn open(&self, key: &[u8]) -> Result<Vec<u8>> {
        let ciphertext = decode_hex("ciphertext", &self.ciphertext)?;
        let tag = decode_hex("tag", &self.tag)?;
        let iv = decode_hex("iv", &self.iv)?;

        if tag.len() != TAG_LEN {
            return Err(Error::InvalidFormat(format!(
                "vcf tag must be {} bytes, got {}",
                TAG_LEN,
                tag.len()
            )));
        }
        if iv.len() != GCM_NONCE_LEN {
            return Err(Error::InvalidFormat(format!(
                "vcf iv must be {} bytes, got {}",
                GCM_NONCE_LEN,
                iv.len()
            )));
        }

        let sealed = Sealed {
            ciphertext,
            iv,
            tag: Some(tag),
        };
        crypto::decrypt(key, &sealed, EncryptionMode::AesGcm)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::InvalidFormat(format!("vcf: {}", e)))
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json(&fs::read(path)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_atomic(path.as_ref(), &self.to_json()?)
    }
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|e| Error::InvalidFormat(format!("vcf {}: {}", field, e)))
}
