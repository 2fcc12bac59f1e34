//! Pluggable chunk compression.
//!
//! The chunker and the restorer only ever see a [`Compressor`]; hashing and
//! verification operate on whatever bytes the selected compressor produced, so
//! swapping zstd for the identity pass-through needs no changes downstream.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;

/// Default zstd compression level
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// A byte-level compression strategy
pub trait Compressor: Send + Sync + fmt::Debug {
    /// The scheme this compressor implements, as recorded in the snapshot manifest
    fn scheme(&self) -> CompressionScheme;

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>>;
}

/// Compression schemes known to the vault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompressionScheme {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "zstd")]
    Zstd,
}

impl CompressionScheme {
    /// Name written to the `compression` field of `manifest.json`
    pub fn name(&self) -> &'static str {
        match self {
            CompressionScheme::None => "none",
            CompressionScheme::Zstd => "zstd",
        }
    }

    /// Whether this build can encode and decode the scheme
    pub fn is_available(&self) -> bool {
        match self {
            CompressionScheme::None => true,
            CompressionScheme::Zstd => cfg!(feature = "zstd"),
        }
    }

    /// Instantiate the compressor for this scheme.
    ///
    /// Fails with [`Error::Configuration`] when the scheme was compiled out.
    pub fn compressor(&self, level: i32) -> Result<Arc<dyn Compressor>> {
        match self {
            CompressionScheme::None => Ok(Arc::new(IdentityCompressor)),
            #[cfg(feature = "zstd")]
            CompressionScheme::Zstd => Ok(Arc::new(ZstdCompressor::new(level))),
            #[cfg(not(feature = "zstd"))]
            CompressionScheme::Zstd => {
                let _ = level;
                Err(Error::Configuration {
                    reason: "zstd compression is not available in this build".to_string(),
                })
            }
        }
    }
}

impl fmt::Display for CompressionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(CompressionScheme::None),
            "zstd" => Ok(CompressionScheme::Zstd),
            other => Err(Error::Configuration {
                reason: format!("Unknown compression scheme: {}", other),
            }),
        }
    }
}

/// Pass-through compressor
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCompressor;

impl Compressor for IdentityCompressor {
    fn scheme(&self) -> CompressionScheme {
        CompressionScheme::None
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// zstd-backed compressor
#[cfg(feature = "zstd")]
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    level: i32,
}

#[cfg(feature = "zstd")]
impl ZstdCompressor {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

#[cfg(feature = "zstd")]
impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}

#[cfg(feature = "zstd")]
impl Compressor for ZstdCompressor {
    fn scheme(&self) -> CompressionScheme {
        CompressionScheme::Zstd
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        zstd::encode_all(data, self.level)
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        zstd::decode_all(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_pass_through() -> std::io::Result<()> {
        let data = b"unchanged bytes";
        let compressor = IdentityCompressor;

        assert_eq!(compressor.compress(data)?, data);
        assert_eq!(compressor.decompress(data)?, data);
        assert_eq!(compressor.scheme(), CompressionScheme::None);
        Ok(())
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn test_zstd_shrinks_repetitive_input() -> std::io::Result<()> {
        let data = vec![0x42u8; 8192];
        let compressor = ZstdCompressor::default();

        let packed = compressor.compress(&data)?;
        assert!(packed.len() < data.len());
        assert_eq!(compressor.decompress(&packed)?, data);
        Ok(())
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn test_zstd_rejects_garbage() {
        let compressor = ZstdCompressor::default();
        assert!(compressor.decompress(b"definitely not a zstd frame").is_err());
    }

    #[test]
    fn test_scheme_names_parse_back() {
        for scheme in [CompressionScheme::None, CompressionScheme::Zstd] {
            assert_eq!(scheme.name().parse::<CompressionScheme>().ok(), Some(scheme));
        }
        assert!("lzfse".parse::<CompressionScheme>().is_err());
    }
}
