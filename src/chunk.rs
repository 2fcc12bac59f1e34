//! Fixed-size chunking with content addressing using SHA-256
//!
//! Each window is compressed, hashed, then sealed. The hash is taken over the
//! compressed bytes before encryption, so identical content always lands on the
//! same address even though every ciphertext carries a fresh nonce.

use crate::compression::Compressor;
use crate::crypto::ChunkCipher;
use crate::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Default chunk size for file splitting (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Length of a hex-encoded digest
pub const HASH_HEX_LEN: usize = 64;

/// A SHA-256 digest, written as 64 lowercase hex characters
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkHash([u8; 32]);

impl ChunkHash {
    /// Hash a byte slice
    pub fn digest(data: &[u8]) -> Self {
        Self::from_hasher(Sha256::new_with_prefix(data))
    }

    fn from_hasher(hasher: Sha256) -> Self {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        Self(digest)
    }

    /// Wrap an already computed digest
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    /// Parse a lowercase hex digest
    pub fn parse(value: &str) -> Result<Self> {
        let canonical = value.len() == HASH_HEX_LEN
            && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !canonical {
            return Err(Error::InvalidHash {
                value: value.to_string(),
            });
        }

        let mut digest = [0u8; 32];
        hex::decode_to_slice(value, &mut digest).map_err(|_| Error::InvalidHash {
            value: value.to_string(),
        })?;
        Ok(Self(digest))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkHash({})", self.to_hex())
    }
}

impl FromStr for ChunkHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ChunkHash {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ChunkHash> for String {
    fn from(hash: ChunkHash) -> Self {
        hash.to_hex()
    }
}

/// A sealed chunk ready for the object store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Content address: hash of the compressed, pre-encryption bytes
    pub hash: ChunkHash,
    /// `nonce || ciphertext || tag`
    pub ciphertext: Vec<u8>,
}

/// Splits buffers into fixed windows and seals each one
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    compressor: Arc<dyn Compressor>,
    cipher: ChunkCipher,
    parallel: bool,
}

impl Chunker {
    pub fn new(
        chunk_size: usize,
        compressor: Arc<dyn Compressor>,
        cipher: ChunkCipher,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Configuration {
                reason: "chunk size must be greater than 0".to_string(),
            });
        }

        Ok(Self {
            chunk_size,
            compressor,
            cipher,
            parallel: true,
        })
    }

    /// Seal windows one after another instead of on the rayon pool
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn compressor(&self) -> &Arc<dyn Compressor> {
        &self.compressor
    }

    pub fn cipher(&self) -> &ChunkCipher {
        &self.cipher
    }

    /// Split `data` into `ceil(len / chunk_size)` sealed chunks, in byte order.
    /// Empty input yields no chunks.
    pub fn chunk_and_encrypt(&self, data: &[u8]) -> Result<Vec<Chunk>> {
        if self.parallel {
            data.par_chunks(self.chunk_size)
                .map(|window| self.seal_window(window))
                .collect()
        } else {
            data.chunks(self.chunk_size)
                .map(|window| self.seal_window(window))
                .collect()
        }
    }

    fn seal_window(&self, window: &[u8]) -> Result<Chunk> {
        let compressed = self
            .compressor
            .compress(window)
            .map_err(|e| Error::CompressionFailed {
                reason: e.to_string(),
            })?;

        let hash = ChunkHash::digest(&compressed);
        let ciphertext = self.cipher.seal(&compressed)?;

        Ok(Chunk { hash, ciphertext })
    }
}

/// Compute the SHA-256 of a file in streaming fashion
pub fn hash_file<P: AsRef<Path>>(file_path: P) -> Result<ChunkHash> {
    let file = File::open(file_path)?;
    hash_reader(file)
}

/// Compute the SHA-256 of everything a reader yields
pub fn hash_reader<R: Read>(mut reader: R) -> Result<ChunkHash> {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(ChunkHash::from_hasher(hasher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::{CompressionScheme, IdentityCompressor};
    use crate::crypto::{EncryptionKey, EncryptionScheme};
    use pretty_assertions::assert_eq;

    fn chunker(chunk_size: usize) -> Chunker {
        let cipher = ChunkCipher::new(EncryptionScheme::AesGcm256, EncryptionKey::generate());
        let compressor = CompressionScheme::Zstd
            .compressor(3)
            .unwrap_or_else(|_| Arc::new(IdentityCompressor));
        Chunker::new(chunk_size, compressor, cipher).unwrap()
    }

    #[test]
    fn test_chunk_hash_digest() {
        let hash = ChunkHash::digest(b"hello world");

        // SHA-256 of "hello world"
        assert_eq!(
            hash.to_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_chunk_hash_parse_is_strict() {
        let hex = ChunkHash::digest(b"x").to_hex();
        assert_eq!(ChunkHash::parse(&hex).unwrap().to_hex(), hex);

        assert!(ChunkHash::parse(&hex.to_uppercase()).is_err());
        assert!(ChunkHash::parse(&hex[..62]).is_err());
        assert!(ChunkHash::parse("../../etc/passwd").is_err());
    }

    #[test]
    fn test_chunk_hash_serializes_as_hex_string() {
        let hash = ChunkHash::digest(b"abc");
        let json = serde_json::to_string(&hash).unwrap();

        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        assert_eq!(serde_json::from_str::<ChunkHash>(&json).unwrap(), hash);
        assert!(serde_json::from_str::<ChunkHash>("\"abc\"").is_err());
    }

    #[test]
    fn test_chunk_count_is_ceiling_of_length() -> Result<()> {
        let chunker = chunker(1024);

        assert_eq!(chunker.chunk_and_encrypt(&[0x42; 500])?.len(), 1);
        assert_eq!(chunker.chunk_and_encrypt(&[0x42; 1024])?.len(), 1);
        assert_eq!(chunker.chunk_and_encrypt(&[0x42; 1025])?.len(), 2);
        assert_eq!(chunker.chunk_and_encrypt(&[0x42; 5000])?.len(), 5);
        assert!(chunker.chunk_and_encrypt(&[])?.is_empty());
        Ok(())
    }

    #[test]
    fn test_chunks_open_back_to_their_address() -> Result<()> {
        let chunker = chunker(7);
        let data: Vec<u8> = (0u8..=200).collect();

        let chunks = chunker.chunk_and_encrypt(&data)?;
        let mut rebuilt = Vec::new();
        for chunk in &chunks {
            let compressed = chunker.cipher().open(&chunk.ciphertext).unwrap();
            assert_eq!(ChunkHash::digest(&compressed), chunk.hash);
            rebuilt.extend(chunker.compressor().decompress(&compressed)?);
        }

        assert_eq!(rebuilt, data);
        Ok(())
    }

    #[test]
    fn test_identical_windows_share_an_address() -> Result<()> {
        let chunker = chunker(4).sequential();
        let chunks = chunker.chunk_and_encrypt(b"abcdabcd")?;

        assert_eq!(chunks[0].hash, chunks[1].hash);
        assert_ne!(chunks[0].ciphertext, chunks[1].ciphertext);
        Ok(())
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let cipher = ChunkCipher::new(EncryptionScheme::AesGcm256, EncryptionKey::generate());
        let result = Chunker::new(0, Arc::new(IdentityCompressor), cipher);
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_hash_reader_matches_digest() -> Result<()> {
        let data = vec![7u8; 100_000];
        assert_eq!(hash_reader(&data[..])?, ChunkHash::digest(&data));
        Ok(())
    }
}
