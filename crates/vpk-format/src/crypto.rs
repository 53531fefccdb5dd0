//! Symmetric encryption and key derivation.
//!
//! AES in GCM, CTR or CBC mode with 128, 192 or 256 bit keys, and Argon2id
//! for turning a secret into key material.

use crate::{Error, Result};
use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit, Nonce};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use argon2::{Algorithm, Argon2, Params, Version};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

type Aes192Gcm = AesGcm<Aes192, U12>;
type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Nonce length for AES-GCM.
pub const GCM_NONCE_LEN: usize = 12;
/// IV length for AES-CTR and AES-CBC.
pub const BLOCK_IV_LEN: usize = 16;
/// Authentication tag length for AES-GCM.
pub const TAG_LEN: usize = 16;
/// Accepted AES key sizes in bytes.
pub const KEY_SIZES: [usize; 3] = [16, 24, 32];

/// Cipher mode used to encrypt a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EncryptionMode {
    /// AES in Galois/Counter mode (authenticated).
    #[default]
    #[serde(rename = "AES-GCM")]
    AesGcm,
    /// AES in counter mode.
    #[serde(rename = "AES-CTR")]
    AesCtr,
    /// AES in cipher block chaining mode with PKCS#7 padding.
    #[serde(rename = "AES-CBC")]
    AesCbc,
}

impl EncryptionMode {
    /// All supported modes.
    pub const ALL: [EncryptionMode; 3] = [
        EncryptionMode::AesGcm,
        EncryptionMode::AesCtr,
        EncryptionMode::AesCbc,
    ];

    /// Identifier used in package headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionMode::AesGcm => "AES-GCM",
            EncryptionMode::AesCtr => "AES-CTR",
            EncryptionMode::AesCbc => "AES-CBC",
        }
    }

    /// Whether the mode produces an authentication tag.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, EncryptionMode::AesGcm)
    }

    /// Length of the IV/nonce generated for this mode.
    pub fn iv_len(&self) -> usize {
        match self {
            EncryptionMode::AesGcm => GCM_NONCE_LEN,
            EncryptionMode::AesCtr | EncryptionMode::AesCbc => BLOCK_IV_LEN,
        }
    }
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EncryptionMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| Error::UnsupportedMode(format!("encryption mode '{}'", s)))
    }
}

/// Output of [`encrypt`]: ciphertext plus the values needed to decrypt it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Encrypted bytes (without the tag).
    pub ciphertext: Vec<u8>,
    /// Random nonce (GCM) or IV (CTR/CBC).
    pub iv: Vec<u8>,
    /// GCM authentication tag; `None` for unauthenticated modes.
    pub tag: Option<Vec<u8>>,
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Length of the derived key in bytes.
    pub key_length: usize,
    /// Number of passes over memory.
    pub time_cost: u32,
    /// Memory size in KiB.
    pub memory_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            key_length: 32,
            time_cost: 2,
            memory_cost: 10_000,
            parallelism: 8,
        }
    }
}

/// Derive a key from `secret` and `salt` with Argon2id.
///
/// Deterministic for fixed inputs. Zero costs, a zero key length, or a salt
/// shorter than eight bytes are rejected with [`Error::KeyDerivation`].
pub fn derive_key(secret: &[u8], salt: &[u8], params: &KdfParams) -> Result<Vec<u8>> {
    if params.key_length == 0 {
        return Err(Error::KeyDerivation("key length must be positive".to_string()));
    }
    if params.time_cost == 0 || params.memory_cost == 0 || params.parallelism == 0 {
        return Err(Error::KeyDerivation(
            "cost parameters must be positive".to_string(),
        ));
    }

    let argon_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(params.key_length),
    )
    .map_err(|e| Error::KeyDerivation(e.to_string()))?;

    let mut key = vec![0u8; params.key_length];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params)
        .hash_password_into(secret, salt, &mut key)
        .map_err(|e| Error::KeyDerivation(e.to_string()))?;

    Ok(key)
}

/// Encrypt `plaintext` with a fresh random IV.
pub fn encrypt(key: &[u8], plaintext: &[u8], mode: EncryptionMode) -> Result<Sealed> {
    check_key(key)?;
    let mut iv = vec![0u8; mode.iv_len()];
    OsRng.fill_bytes(&mut iv);

    match mode {
        EncryptionMode::AesGcm => {
            let mut sealed = match key.len() {
                16 => gcm_seal::<Aes128Gcm>(key, &iv, plaintext)?,
                24 => gcm_seal::<Aes192Gcm>(key, &iv, plaintext)?,
                _ => gcm_seal::<Aes256Gcm>(key, &iv, plaintext)?,
            };
            let tag = sealed.split_off(sealed.len() - TAG_LEN);
            Ok(Sealed {
                ciphertext: sealed,
                iv,
                tag: Some(tag),
            })
        }
        EncryptionMode::AesCtr => {
            let mut buffer = plaintext.to_vec();
            match key.len() {
                16 => ctr_apply::<Aes128Ctr>(key, &iv, &mut buffer)?,
                24 => ctr_apply::<Aes192Ctr>(key, &iv, &mut buffer)?,
                _ => ctr_apply::<Aes256Ctr>(key, &iv, &mut buffer)?,
            }
            Ok(Sealed {
                ciphertext: buffer,
                iv,
                tag: None,
            })
        }
        EncryptionMode::AesCbc => {
            let ciphertext = match key.len() {
                16 => cbc_encrypt::<Aes128>(key, &iv, plaintext)?,
                24 => cbc_encrypt::<Aes192>(key, &iv, plaintext)?,
                _ => cbc_encrypt::<Aes256>(key, &iv, plaintext)?,
            };
            Ok(Sealed {
                ciphertext,
                iv,
                tag: None,
            })
        }
    }
}

/// Decrypt a [`Sealed`] value produced by [`encrypt`] under the same mode.
///
/// GCM tag failures return [`Error::Integrity`] and never any plaintext.
pub fn decrypt(key: &[u8], sealed: &Sealed, mode: EncryptionMode) -> Result<Vec<u8>> {
    check_key(key)?;
    if sealed.iv.len() != mode.iv_len() {
        return Err(Error::InvalidFormat(format!(
            "{} expects a {}-byte iv, got {}",
            mode,
            mode.iv_len(),
            sealed.iv.len()
        )));
    }

    match mode {
        EncryptionMode::AesGcm => {
            let tag = sealed
                .tag
                .as_ref()
                .ok_or_else(|| Error::InvalidFormat("AES-GCM requires a tag".to_string()))?;
            if tag.len() != TAG_LEN {
                return Err(Error::InvalidFormat(format!(
                    "tag must be {} bytes, got {}",
                    TAG_LEN,
                    tag.len()
                )));
            }
            let mut combined = Vec::with_capacity(sealed.ciphertext.len() + TAG_LEN);
            combined.extend_from_slice(&sealed.ciphertext);
            combined.extend_from_slice(tag);
            match key.len() {
                16 => gcm_open::<Aes128Gcm>(key, &sealed.iv, &combined),
                24 => gcm_open::<Aes192Gcm>(key, &sealed.iv, &combined),
                _ => gcm_open::<Aes256Gcm>(key, &sealed.iv, &combined),
            }
        }
        EncryptionMode::AesCtr => {
            reject_tag(sealed, mode)?;
            let mut buffer = sealed.ciphertext.clone();
            match key.len() {
                16 => ctr_apply::<Aes128Ctr>(key, &sealed.iv, &mut buffer)?,
                24 => ctr_apply::<Aes192Ctr>(key, &sealed.iv, &mut buffer)?,
                _ => ctr_apply::<Aes256Ctr>(key, &sealed.iv, &mut buffer)?,
            }
            Ok(buffer)
        }
        EncryptionMode::AesCbc => {
            reject_tag(sealed, mode)?;
            match key.len() {
                16 => cbc_decrypt::<Aes128>(key, &sealed.iv, &sealed.ciphertext),
                24 => cbc_decrypt::<Aes192>(key, &sealed.iv, &sealed.ciphertext),
                _ => cbc_decrypt::<Aes256>(key, &sealed.iv, &sealed.ciphertext),
            }
        }
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    if KEY_SIZES.contains(&key.len()) {
        Ok(())
    } else {
        Err(key_length_error(key.len()))
    }
}

fn key_length_error(got: usize) -> Error {
    Error::KeyLength {
        expected: "16, 24 or 32 bytes".to_string(),
        got,
    }
}

fn reject_tag(sealed: &Sealed, mode: EncryptionMode) -> Result<()> {
    if sealed.tag.is_some() {
        return Err(Error::InvalidFormat(format!("{} does not use a tag", mode)));
    }
    Ok(())
}

fn gcm_seal<C: Aead + KeyInit>(key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = C::new_from_slice(key).map_err(|_| key_length_error(key.len()))?;
    cipher
        .encrypt(Nonce::<C>::from_slice(nonce), plaintext)
        .map_err(|e| Error::InvalidFormat(format!("AES-GCM encryption failed: {}", e)))
}

fn gcm_open<C: Aead + KeyInit>(key: &[u8], nonce: &[u8], combined: &[u8]) -> Result<Vec<u8>> {
    let cipher = C::new_from_slice(key).map_err(|_| key_length_error(key.len()))?;
    cipher
        .decrypt(Nonce::<C>::from_slice(nonce), combined)
        .map_err(|_| Error::Integrity("authentication tag mismatch".to_string()))
}

fn ctr_apply<C: KeyIvInit + StreamCipher>(key: &[u8], iv: &[u8], buffer: &mut [u8]) -> Result<()> {
    let mut cipher = C::new_from_slices(key, iv).map_err(|_| key_length_error(key.len()))?;
    cipher.apply_keystream(buffer);
    Ok(())
}

fn cbc_encrypt<B>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>
where
    cbc::Encryptor<B>: KeyIvInit + BlockEncryptMut,
    B: aes::cipher::BlockCipher + aes::cipher::BlockEncryptMut,
{
    let cipher = cbc::Encryptor::<B>::new_from_slices(key, iv)
        .map_err(|_| key_length_error(key.len()))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn cbc_decrypt<B>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>
where
    cbc::Decryptor<B>: KeyIvInit + BlockDecryptMut,
    B: aes::cipher::BlockCipher + aes::cipher::BlockDecryptMut,
{
    let cipher = cbc::Decryptor::<B>::new_from_slices(key, iv)
        .map_err(|_| key_length_error(key.len()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::Padding)
}
