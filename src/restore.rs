//! Restore functionality for reconstructing and verifying files from snapshots

use crate::chunk::ChunkHash;
use crate::compression::{CompressionScheme, Compressor, DEFAULT_COMPRESSION_LEVEL};
use crate::config::VaultConfig;
use crate::crypto::{ChunkCipher, EncryptionKey, EncryptionScheme};
use crate::layout::{self, SnapshotLayout};
use crate::manifest::{load_entries, load_records, snapshot_root, FileEntry, SnapshotManifest};
use crate::merkle::merkle_root;
use crate::store::ObjectStore;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, span, warn, Level};

/// What `restore_all_with` does when one file fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestorePolicy {
    /// Stop at the first failing file
    #[default]
    FailFast,
    /// Restore every file that can be restored and report the rest
    KeepGoing,
}

/// A file that could not be restored
#[derive(Debug)]
pub struct RestoreFailure {
    pub path: String,
    pub error: Error,
}

impl RestoreFailure {
    fn into_error(self) -> Error {
        Error::FileRestore {
            path: self.path,
            source: Box::new(self.error),
        }
    }
}

/// Outcome of a multi-file restore or verification
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Entry paths that were reconstructed and verified
    pub restored: Vec<String>,
    pub failed: Vec<RestoreFailure>,
    pub bytes_written: u64,
    /// Set when the records on disk do not add up to the snapshot root
    pub snapshot_error: Option<Error>,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.snapshot_error.is_none()
    }
}

/// Reads a snapshot back, verifying every chunk and file on the way
#[derive(Debug)]
pub struct Restorer {
    layout: SnapshotLayout,
    store: ObjectStore,
    cipher: ChunkCipher,
    compressor: Arc<dyn Compressor>,
}

impl Restorer {
    pub fn new<P: AsRef<Path>>(
        snapshot_root: P,
        cipher: ChunkCipher,
        compressor: Arc<dyn Compressor>,
    ) -> Self {
        let layout = SnapshotLayout::new(snapshot_root);
        let store = ObjectStore::new(layout.root());

        Self {
            layout,
            store,
            cipher,
            compressor,
        }
    }

    /// Open a snapshot, taking the cipher and compression schemes from its
    /// `manifest.json`. Without a manifest the default schemes are assumed.
    pub fn open<P: AsRef<Path>>(snapshot_root: P, key: EncryptionKey) -> Result<Self> {
        let layout = SnapshotLayout::new(snapshot_root.as_ref());

        let (encryption, compression) = if layout.manifest_path().is_file() {
            let manifest = SnapshotManifest::load(&layout)?;
            (
                manifest.encryption.parse::<EncryptionScheme>()?,
                manifest.compression.parse::<CompressionScheme>()?,
            )
        } else {
            let defaults = VaultConfig::default();
            warn!(
                "No manifest in {}, assuming {} with {}",
                layout.root().display(),
                defaults.encryption,
                defaults.compression
            );
            (defaults.encryption, defaults.compression)
        };

        // Decoding is level independent
        let compressor = compression.compressor(DEFAULT_COMPRESSION_LEVEL)?;
        Ok(Self::new(
            layout.root(),
            ChunkCipher::new(encryption, key),
            compressor,
        ))
    }

    pub fn layout(&self) -> &SnapshotLayout {
        &self.layout
    }

    /// Rebuild a file's bytes in memory, verifying each chunk, the entry's
    /// Merkle root, the file size and the whole-file hash. Nothing is written.
    pub fn reconstruct(&self, entry: &FileEntry) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();

        for hash in &entry.chunk_hashes {
            let sealed = self.store.read(hash)?;

            let compressed = self
                .cipher
                .open(&sealed)
                .map_err(|_| Error::DecryptionFailed {
                    hash: hash.to_hex(),
                })?;

            let got = ChunkHash::digest(&compressed);
            if got != *hash {
                return Err(Error::ChunkChecksumMismatch {
                    expected: hash.to_hex(),
                    got: got.to_hex(),
                });
            }

            let plain = self
                .compressor
                .decompress(&compressed)
                .map_err(|_| Error::DecompressionFailed {
                    hash: hash.to_hex(),
                })?;
            buffer.extend_from_slice(&plain);
        }

        // Checked before the content hash so a reordered chunk list is
        // reported as a tampered record
        let root = merkle_root(&entry.chunk_hashes);
        if root != entry.merkle_root {
            return Err(Error::MerkleRootMismatch {
                path: entry.path.clone(),
                expected: entry.merkle_root.to_hex(),
                got: root.to_hex(),
            });
        }

        if buffer.len() as u64 != entry.size {
            return Err(Error::FileSizeMismatch {
                path: entry.path.clone(),
                expected: entry.size,
                got: buffer.len() as u64,
            });
        }

        let file_hash = ChunkHash::digest(&buffer);
        if file_hash != entry.file_hash {
            return Err(Error::FileChecksumMismatch {
                path: entry.path.clone(),
                expected: entry.file_hash.to_hex(),
                got: file_hash.to_hex(),
            });
        }

        Ok(buffer)
    }

    /// Reconstruct one file and write it to `destination` atomically
    pub fn restore_file<P: AsRef<Path>>(&self, entry: &FileEntry, destination: P) -> Result<u64> {
        let destination = destination.as_ref();
        let span = span!(Level::DEBUG, "restore_file", path = %entry.path);
        let _enter = span.enter();

        let data = self.reconstruct(entry)?;
        layout::write_atomic(destination, &data)?;

        debug!("Restored {} to {} ({} bytes)", entry.path, destination.display(), data.len());
        Ok(data.len() as u64)
    }

    /// Every file record in the snapshot, ordered by path
    pub fn load_entries(&self) -> Result<Vec<FileEntry>> {
        load_entries(&self.layout)
    }

    /// Restore every file, stopping at the first failure
    pub fn restore_all<P: AsRef<Path>>(&self, destination_root: P) -> Result<RestoreReport> {
        self.restore_all_with(destination_root, RestorePolicy::FailFast)
    }

    /// Restore every file under `destination_root`.
    ///
    /// Each record is loaded and its Merkle root checked first, then the
    /// snapshot root in `manifest.json` is checked against the records, all
    /// before anything is written. Under [`RestorePolicy::FailFast`] the first
    /// per-file failure is returned as [`Error::FileRestore`] and a snapshot root
    /// mismatch as [`Error::SnapshotRootMismatch`]. Under
    /// [`RestorePolicy::KeepGoing`] every file that verifies is restored, per-file
    /// failures are collected into the report and a snapshot root mismatch is
    /// recorded in [`RestoreReport::snapshot_error`].
    pub fn restore_all_with<P: AsRef<Path>>(
        &self,
        destination_root: P,
        policy: RestorePolicy,
    ) -> Result<RestoreReport> {
        let destination_root = destination_root.as_ref();
        let span = span!(Level::INFO, "restore_all", destination = %destination_root.display());
        let _enter = span.enter();

        let mut report = RestoreReport::default();
        let entries = self.checked_entries(&mut report)?;
        if policy == RestorePolicy::FailFast && !report.failed.is_empty() {
            return Err(report.failed.remove(0).into_error());
        }

        if let Err(e) = self.verify_snapshot_root(&entries) {
            if policy == RestorePolicy::FailFast {
                return Err(e);
            }
            warn!("{}", e);
            report.snapshot_error = Some(e);
        }
        info!("Restoring {} files to {}", entries.len(), destination_root.display());

        for entry in &entries {
            let destination = destination_path(destination_root, &entry.path);
            match self.restore_file(entry, &destination) {
                Ok(bytes) => {
                    report.bytes_written += bytes;
                    report.restored.push(entry.path.clone());
                }
                Err(e) if policy == RestorePolicy::FailFast => {
                    return Err(Error::FileRestore {
                        path: entry.path.clone(),
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!("Failed to restore {}: {}", entry.path, e);
                    report.failed.push(RestoreFailure {
                        path: entry.path.clone(),
                        error: e,
                    });
                }
            }
        }

        info!(
            "Restore finished: {} restored, {} failed, {} bytes",
            report.restored.len(),
            report.failed.len(),
            report.bytes_written
        );
        Ok(report)
    }

    /// Reconstruct every file without writing, reporting each one that fails
    pub fn verify_all(&self) -> Result<RestoreReport> {
        let span = span!(Level::INFO, "verify_all");
        let _enter = span.enter();

        let mut report = RestoreReport::default();
        let entries = self.checked_entries(&mut report)?;
        if let Err(e) = self.verify_snapshot_root(&entries) {
            warn!("{}", e);
            report.snapshot_error = Some(e);
        }

        for entry in &entries {
            match self.reconstruct(entry) {
                Ok(_) => report.restored.push(entry.path.clone()),
                Err(e) => {
                    warn!("Verification failed for {}: {}", entry.path, e);
                    report.failed.push(RestoreFailure {
                        path: entry.path.clone(),
                        error: e,
                    });
                }
            }
        }

        info!(
            "Verified {} files, {} failed",
            report.restored.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Load each record on its own and check its Merkle root. Records that fail
    /// either step land in `report.failed`; the rest are returned.
    fn checked_entries(&self, report: &mut RestoreReport) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();

        for (path, loaded) in load_records(&self.layout)? {
            let checked = loaded.and_then(|entry| {
                let root = merkle_root(&entry.chunk_hashes);
                if root == entry.merkle_root {
                    Ok(entry)
                } else {
                    Err(Error::MerkleRootMismatch {
                        path: entry.path.clone(),
                        expected: entry.merkle_root.to_hex(),
                        got: root.to_hex(),
                    })
                }
            });

            match checked {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!("Rejected record for {}: {}", path, e);
                    report.failed.push(RestoreFailure { path, error: e });
                }
            }
        }

        Ok(entries)
    }

    fn verify_snapshot_root(&self, entries: &[FileEntry]) -> Result<()> {
        if !self.layout.manifest_path().is_file() {
            debug!("No manifest.json, skipping snapshot root check");
            return Ok(());
        }

        let manifest = SnapshotManifest::load(&self.layout)?;
        match manifest.root_hash() {
            Some(expected) => {
                let got = snapshot_root(entries);
                if got != expected {
                    return Err(Error::SnapshotRootMismatch {
                        expected: expected.to_hex(),
                        got: got.to_hex(),
                    });
                }
                Ok(())
            }
            None => {
                warn!(
                    "Snapshot root {:?} is not a digest, skipping snapshot root check",
                    manifest.root_merkle
                );
                Ok(())
            }
        }
    }
}

/// Join a validated entry path onto a destination root one component at a time
fn destination_path(destination_root: &Path, entry_path: &str) -> PathBuf {
    let mut destination = destination_root.to_path_buf();
    destination.extend(entry_path.split('/'));
    destination
}
