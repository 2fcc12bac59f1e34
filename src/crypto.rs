//! Authenticated encryption of chunk payloads.
//!
//! Sealed chunks are self-describing: `nonce || ciphertext || tag` in a single
//! blob, so nothing outside the object is needed to open it again.

use crate::{Error, Result};
use aes_gcm::aead::generic_array::typenum::Unsigned;
use aes_gcm::aead::{self, Aead, AeadCore, KeyInit, Nonce, OsRng};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::XChaCha20Poly1305;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, Zeroizing};

/// Symmetric key length in bytes
pub const KEY_LEN: usize = 32;

/// A 256-bit symmetric key, wiped from memory on drop
#[derive(Clone)]
pub struct EncryptionKey(Zeroizing<[u8; KEY_LEN]>);

impl EncryptionKey {
    /// Use raw key material
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| Error::InvalidKey {
            reason: format!("expected {} bytes, got {}", KEY_LEN, bytes.len()),
        })?;
        Ok(Self(Zeroizing::new(key)))
    }

    /// Parse a 64-character hex key
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = Zeroizing::new(hex::decode(hex_key.trim()).map_err(|e| Error::InvalidKey {
            reason: e.to_string(),
        })?);
        Self::from_bytes(&bytes)
    }

    /// Derive a key from a passphrase with a single SHA-256 pass.
    ///
    /// This offers no resistance to brute-force search. Callers that need it
    /// should run a memory-hard KDF with a persisted salt and hand the result
    /// to [`EncryptionKey::from_bytes`].
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&digest);
        Self(key)
    }

    /// Fresh random key from the OS RNG
    pub fn generate() -> Self {
        let mut generated = Aes256Gcm::generate_key(&mut OsRng);
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&generated);
        generated.as_mut_slice().zeroize();
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// AEAD schemes available for sealing chunks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionScheme {
    #[default]
    #[serde(rename = "AES-GCM-256")]
    AesGcm256,
    #[serde(rename = "XChaCha20-Poly1305")]
    XChaCha20Poly1305,
}

impl EncryptionScheme {
    /// Name written to the `encryption` field of `manifest.json`
    pub fn name(&self) -> &'static str {
        match self {
            EncryptionScheme::AesGcm256 => "AES-GCM-256",
            EncryptionScheme::XChaCha20Poly1305 => "XChaCha20-Poly1305",
        }
    }

    /// Bytes added to every sealed payload (nonce plus tag)
    pub fn overhead(&self) -> usize {
        match self {
            EncryptionScheme::AesGcm256 => overhead_of::<Aes256Gcm>(),
            EncryptionScheme::XChaCha20Poly1305 => overhead_of::<XChaCha20Poly1305>(),
        }
    }
}

impl fmt::Display for EncryptionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EncryptionScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "AES-GCM-256" => Ok(EncryptionScheme::AesGcm256),
            "XChaCha20-Poly1305" => Ok(EncryptionScheme::XChaCha20Poly1305),
            other => Err(Error::Configuration {
                reason: format!("Unknown encryption scheme: {}", other),
            }),
        }
    }
}

/// A key bound to an AEAD scheme
#[derive(Debug, Clone)]
pub struct ChunkCipher {
    scheme: EncryptionScheme,
    key: EncryptionKey,
}

impl ChunkCipher {
    pub fn new(scheme: EncryptionScheme, key: EncryptionKey) -> Self {
        Self { scheme, key }
    }

    pub fn scheme(&self) -> EncryptionScheme {
        self.scheme
    }

    /// Encrypt under a fresh random nonce
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match self.scheme {
            EncryptionScheme::AesGcm256 => seal_with::<Aes256Gcm>(self.key.as_bytes(), plaintext),
            EncryptionScheme::XChaCha20Poly1305 => {
                seal_with::<XChaCha20Poly1305>(self.key.as_bytes(), plaintext)
            }
        }
    }

    /// Authenticate and decrypt a sealed blob.
    ///
    /// Truncated input, a wrong key and any flipped bit all fail the same way.
    pub fn open(&self, sealed: &[u8]) -> std::result::Result<Vec<u8>, aead::Error> {
        match self.scheme {
            EncryptionScheme::AesGcm256 => open_with::<Aes256Gcm>(self.key.as_bytes(), sealed),
            EncryptionScheme::XChaCha20Poly1305 => {
                open_with::<XChaCha20Poly1305>(self.key.as_bytes(), sealed)
            }
        }
    }
}

fn overhead_of<C: AeadCore>() -> usize {
    <C as AeadCore>::NonceSize::USIZE + <C as AeadCore>::TagSize::USIZE
}

fn seal_with<C>(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>
where
    C: Aead + AeadCore + KeyInit,
{
    let cipher = C::new_from_slice(key).map_err(|e| Error::EncryptionFailed {
        reason: e.to_string(),
    })?;
    let nonce = C::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| Error::EncryptionFailed {
            reason: "AEAD seal failed".to_string(),
        })?;

    let mut sealed = Vec::with_capacity(nonce.len() + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

fn open_with<C>(key: &[u8], sealed: &[u8]) -> std::result::Result<Vec<u8>, aead::Error>
where
    C: Aead + AeadCore + KeyInit,
{
    let nonce_len = <C as AeadCore>::NonceSize::USIZE;
    if sealed.len() < overhead_of::<C>() {
        return Err(aead::Error);
    }

    let cipher = C::new_from_slice(key).map_err(|_| aead::Error)?;
    let (nonce, ciphertext) = sealed.split_at(nonce_len);
    cipher.decrypt(Nonce::<C>::from_slice(nonce), ciphertext)
}
