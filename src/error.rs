//! Error types for nova-vault

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for vault operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    // Write path
    #[error("Compression failed: {reason}")]
    CompressionFailed { reason: String },

    #[error("Encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    // Read path
    #[error("Missing chunk: {hash}")]
    MissingChunk { hash: String },

    #[error("Decryption failed for chunk: {hash}")]
    DecryptionFailed { hash: String },

    #[error("Decompression failed for chunk: {hash}")]
    DecompressionFailed { hash: String },

    #[error("Chunk checksum mismatch: expected {expected}, got {got}")]
    ChunkChecksumMismatch { expected: String, got: String },

    #[error("File checksum mismatch for {path}: expected {expected}, got {got}")]
    FileChecksumMismatch {
        path: String,
        expected: String,
        got: String,
    },

    #[error("File size mismatch for {path}: expected {expected} bytes, got {got}")]
    FileSizeMismatch { path: String, expected: u64, got: u64 },

    #[error("Merkle root mismatch for {path}: expected {expected}, got {got}")]
    MerkleRootMismatch {
        path: String,
        expected: String,
        got: String,
    },

    #[error("Snapshot root mismatch: expected {expected}, got {got}")]
    SnapshotRootMismatch { expected: String, got: String },

    #[error("Invalid file record {}: {source}", path.display())]
    InvalidRecord {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error("Files directory not found in snapshot: {}", path.display())]
    FilesDirectoryNotFound { path: PathBuf },

    #[error("Failed to restore {path}: {source}")]
    FileRestore {
        path: String,
        #[source]
        source: Box<Error>,
    },

    // Store initialization
    #[error("Failed to create directory {}: {source}", path.display())]
    DirectoryCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest: {reason}")]
    InvalidManifest { reason: String },

    #[error("Invalid content hash: {value:?}")]
    InvalidHash { value: String },

    #[error("Invalid file entry path: {path:?}")]
    InvalidEntryPath { path: String },

    #[error("Invalid encryption key: {reason}")]
    InvalidKey { reason: String },

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Logging setup failed: {reason}")]
    Logging { reason: String },
}

impl Error {
    /// Whether this error signals corrupted or tampered data rather than an
    /// environmental failure.
    pub fn is_integrity_failure(&self) -> bool {
        match self {
            Error::MissingChunk { .. }
            | Error::DecryptionFailed { .. }
            | Error::DecompressionFailed { .. }
            | Error::ChunkChecksumMismatch { .. }
            | Error::FileChecksumMismatch { .. }
            | Error::FileSizeMismatch { .. }
            | Error::InvalidRecord { .. }
            | Error::MerkleRootMismatch { .. }
            | Error::SnapshotRootMismatch { .. } => true,
            Error::FileRestore { source, .. } => source.is_integrity_failure(),
            _ => false,
        }
    }
}

/// Result type alias for vault operations
pub type Result<T> = std::result::Result<T, Error>;
