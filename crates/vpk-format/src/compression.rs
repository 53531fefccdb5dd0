//! Payload compression codecs.
//!
//! Every mode compresses a whole buffer at once; `None` passes bytes through.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

const ZSTD_LEVEL: i32 = 3;
const XZ_PRESET: u32 = 6;

/// Compression algorithm applied to a serialized payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    /// gzip (DEFLATE with gzip framing).
    Gzip,
    /// bzip2.
    Bzip2,
    /// LZMA2 in the `.xz` container.
    Lzma,
    /// LZ4 frame format.
    Lz4,
    /// Zstandard.
    #[default]
    Zstd,
    /// Identity.
    None,
}

impl CompressionMode {
    /// All supported modes.
    pub const ALL: [CompressionMode; 6] = [
        CompressionMode::Gzip,
        CompressionMode::Bzip2,
        CompressionMode::Lzma,
        CompressionMode::Lz4,
        CompressionMode::Zstd,
        CompressionMode::None,
    ];

    /// Identifier used in package headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMode::Gzip => "gzip",
            CompressionMode::Bzip2 => "bzip2",
            CompressionMode::Lzma => "lzma",
            CompressionMode::Lz4 => "lz4",
            CompressionMode::Zstd => "zstd",
            CompressionMode::None => "none",
        }
    }
}

impl fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CompressionMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| Error::UnsupportedMode(format!("compression mode '{}'", s)))
    }
}

/// Compress `raw` with the given mode.
pub fn deflate(raw: &[u8], mode: CompressionMode) -> Result<Vec<u8>> {
    let compressed = match mode {
        CompressionMode::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(raw)?;
            encoder.finish()?
        }
        CompressionMode::Bzip2 => {
            let mut encoder =
                bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
            encoder.write_all(raw)?;
            encoder.finish()?
        }
        CompressionMode::Lzma => {
            let mut encoder = xz2::write::XzEncoder::new(Vec::new(), XZ_PRESET);
            encoder.write_all(raw)?;
            encoder.finish()?
        }
        CompressionMode::Lz4 => {
            let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
            encoder.write_all(raw)?;
            encoder
                .finish()
                .map_err(|e| Error::IoError(std::io::Error::other(e)))?
        }
        CompressionMode::Zstd => zstd::encode_all(raw, ZSTD_LEVEL)?,
        CompressionMode::None => raw.to_vec(),
    };

    log::debug!(
        "deflate {}: {} -> {} bytes",
        mode,
        raw.len(),
        compressed.len()
    );
    Ok(compressed)
}

/// Decompress data produced by [`deflate`] with the same mode.
///
/// Any codec failure, including data produced under another mode, is
/// reported as [`Error::Decode`].
pub fn inflate(compressed: &[u8], mode: CompressionMode) -> Result<Vec<u8>> {
    let raw = match mode {
        CompressionMode::Gzip => read_all(flate2::read::GzDecoder::new(compressed)),
        CompressionMode::Bzip2 => read_all(bzip2::read::BzDecoder::new(compressed)),
        CompressionMode::Lzma => read_all(xz2::read::XzDecoder::new(compressed)),
        CompressionMode::Lz4 => read_all(lz4_flex::frame::FrameDecoder::new(compressed)),
        CompressionMode::Zstd => zstd::decode_all(compressed),
        CompressionMode::None => Ok(compressed.to_vec()),
    };

    raw.map_err(|e| Error::Decode(format!("{}: {}", mode, e)))
}

fn read_all<R: Read>(mut reader: R) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn samples() -> Vec<Vec<u8>> {
        let mut random = vec![0u8; 4096];
        rand::thread_rng().fill_bytes(&mut random);
        vec![
            Vec::new(),
            b"Sample data to be compressed".to_vec(),
            b"abc".repeat(10_000),
            random,
        ]
    }

    #[test]
    fn test_roundtrip_every_mode() {
        for mode in CompressionMode::ALL {
            for sample in samples() {
                let compressed = deflate(&sample, mode).unwrap();
                assert_eq!(inflate(&compressed, mode).unwrap(), sample, "mode {}", mode);
            }
        }
    }

    #[test]
    fn test_none_is_identity() {
        let data = b"unchanged".to_vec();
        assert_eq!(deflate(&data, CompressionMode::None).unwrap(), data);
        assert_eq!(inflate(&data, CompressionMode::None).unwrap(), data);
    }

    #[test]
    fn test_repetitive_data_shrinks() {
        let data = b"valkyrie".repeat(4096);
        for mode in CompressionMode::ALL {
            if mode == CompressionMode::None {
                continue;
            }
            assert!(deflate(&data, mode).unwrap().len() < data.len());
        }
    }

    #[test]
    fn test_inflate_under_wrong_mode() {
        let data = b"some payload bytes".repeat(64);
        let gzip = deflate(&data, CompressionMode::Gzip).unwrap();
        for mode in [
            CompressionMode::Bzip2,
            CompressionMode::Lzma,
            CompressionMode::Lz4,
            CompressionMode::Zstd,
        ] {
            let err = inflate(&gzip, mode).unwrap_err();
            assert!(matches!(err, Error::Decode(_)), "mode {}", mode);
        }

        let zstd = deflate(&data, CompressionMode::Zstd).unwrap();
        assert!(matches!(
            inflate(&zstd, CompressionMode::Gzip),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(matches!(
            "unknown".parse::<CompressionMode>(),
            Err(Error::UnsupportedMode(_))
        ));
        assert!(matches!(
            "ZSTD".parse::<CompressionMode>(),
            Err(Error::UnsupportedMode(_))
        ));
        for mode in CompressionMode::ALL {
            assert_eq!(mode.as_str().parse::<CompressionMode>().unwrap(), mode);
        }
    }
}
