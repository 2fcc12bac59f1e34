//! # nova-vault
//!
//! Content-addressed, encrypted, crash-resumable backup store.
//!
//! ## Features
//!
//! - **Chunking**: fixed-size windows, compressed then sealed with an AEAD cipher
//! - **Content addressing**: SHA-256 over the compressed bytes, so identical data
//!   deduplicates even though every ciphertext is unique
//! - **Resumable writes**: atomic object writes plus a `commit.log` audit trail
//! - **Integrity**: per-file Merkle roots, whole-file hashes and a snapshot root,
//!   all verified on restore
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nova_vault::{BackupAssembler, EncryptionKey, Restorer, VaultConfig};
//!
//! # fn main() -> nova_vault::Result<()> {
//! let key = EncryptionKey::from_passphrase("correct horse battery staple");
//! let assembler = BackupAssembler::open("./snapshot", &VaultConfig::default(), key.clone())?;
//! assembler.backup_tree("./my-data")?;
//! let manifest = assembler.finish()?;
//! println!("Backed up {} files", manifest.files_count);
//!
//! let restorer = Restorer::open("./snapshot", key)?;
//! restorer.restore_all("./restored")?;
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod chunk;
pub mod commit_log;
pub mod compression;
pub mod config;
pub mod crypto;
pub mod error;
pub mod layout;
pub mod logging;
pub mod manifest;
pub mod merkle;
pub mod restore;
pub mod store;

// Re-export commonly used types
pub use backup::BackupAssembler;
pub use chunk::{Chunk, ChunkHash, Chunker};
pub use compression::{CompressionScheme, Compressor};
pub use config::VaultConfig;
pub use crypto::{ChunkCipher, EncryptionKey, EncryptionScheme};
pub use error::{Error, Result};
pub use manifest::{FileEntry, Metadata, MetadataValue, SnapshotManifest};
pub use merkle::merkle_root;
pub use restore::{RestorePolicy, RestoreReport, Restorer};
pub use store::{AuditWarning, ObjectStore, ResumableObjectWriter, WriteSummary};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
