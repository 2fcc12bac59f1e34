//! Backup assembly: chunk, seal and store files, then describe the snapshot

use crate::chunk::{ChunkHash, Chunker};
use crate::compression::{CompressionScheme, IdentityCompressor};
use crate::config::VaultConfig;
use crate::crypto::{ChunkCipher, EncryptionKey};
use crate::layout::{self, SnapshotLayout};
use crate::manifest::{
    entry_path_from, load_entries, snapshot_root, validate_entry_path, FileEntry, Metadata,
    SnapshotManifest, SNAPSHOT_VERSION,
};
use crate::store::{AuditWarning, ResumableObjectWriter, WriteSummary};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, span, warn, Level};
use walkdir::WalkDir;

/// Builds one snapshot under a root directory
#[derive(Debug)]
pub struct BackupAssembler {
    layout: SnapshotLayout,
    chunker: Chunker,
    writer: ResumableObjectWriter,
    device_id: String,
    parallel: bool,
    totals: Mutex<WriteSummary>,
}

impl BackupAssembler {
    /// Open (or resume) a snapshot at `snapshot_root`.
    ///
    /// A new snapshot gets a `manifest.json` straight away recording the
    /// schemes in use. Resuming a snapshot whose manifest names different
    /// schemes fails with [`Error::Configuration`].
    pub fn open<P: AsRef<Path>>(
        snapshot_root: P,
        config: &VaultConfig,
        key: EncryptionKey,
    ) -> Result<Self> {
        config.validate()?;

        let layout = SnapshotLayout::new(snapshot_root.as_ref());
        let writer = ResumableObjectWriter::open(layout.root())?;
        layout::ensure_dir(&layout.files_dir())?;

        let compressor = match config.compression.compressor(config.compression_level) {
            Ok(compressor) => compressor,
            Err(e) => {
                warn!("{}; storing chunks uncompressed", e);
                Arc::new(IdentityCompressor)
            }
        };
        let cipher = ChunkCipher::new(config.encryption, key);

        let mut chunker = Chunker::new(config.chunk_size, compressor, cipher)?;
        if !config.parallel {
            chunker = chunker.sequential();
        }

        // Objects already present are skipped, so every run against one root
        // must seal and compress the same way
        let existing = if layout.manifest_path().is_file() {
            Some(SnapshotManifest::load(&layout)?)
        } else {
            None
        };
        if let Some(manifest) = &existing {
            let compression = chunker.compressor().scheme();
            if manifest.encryption != config.encryption.name()
                || manifest.compression != compression.name()
            {
                return Err(Error::Configuration {
                    reason: format!(
                        "snapshot at {} uses {} with {}, refusing to continue with {} with {}",
                        layout.root().display(),
                        manifest.encryption,
                        manifest.compression,
                        config.encryption,
                        compression
                    ),
                });
            }
        }
        let device_id = match (&config.device_id, &existing) {
            (None, Some(manifest)) => manifest.device_id.clone(),
            _ => config.resolve_device_id(),
        };

        info!(
            "Opened snapshot at {} ({}, {}, {} byte chunks)",
            layout.root().display(),
            config.encryption,
            chunker.compressor().scheme(),
            config.chunk_size
        );

        let assembler = Self {
            layout,
            chunker,
            writer,
            device_id,
            parallel: config.parallel,
            totals: Mutex::new(WriteSummary::default()),
        };

        // Record the schemes before the first object lands
        if existing.is_none() {
            assembler.write_manifest()?;
        }
        Ok(assembler)
    }

    pub fn layout(&self) -> &SnapshotLayout {
        &self.layout
    }

    /// Scheme actually used for new chunks
    pub fn compression(&self) -> CompressionScheme {
        self.chunker.compressor().scheme()
    }

    /// Objects written and skipped so far
    pub fn write_totals(&self) -> WriteSummary {
        *self.totals.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Back up an in-memory buffer as `path` and persist its file record
    pub fn backup_bytes(&self, path: &str, data: &[u8], metadata: Metadata) -> Result<FileEntry> {
        validate_entry_path(path)?;
        let span = span!(Level::DEBUG, "backup_bytes", path = %path);
        let _enter = span.enter();

        let chunks = self.chunker.chunk_and_encrypt(data)?;
        let summary = self.writer.write(&chunks)?;
        self.totals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .merge(summary);

        let entry = FileEntry::new(
            path,
            data.len() as u64,
            chunks.iter().map(|chunk| chunk.hash).collect(),
            ChunkHash::digest(data),
            metadata,
        )?;
        entry.save(&self.layout)?;

        debug!(
            "Backed up {} ({} bytes, {} chunks, {} new)",
            path,
            entry.size,
            entry.chunk_hashes.len(),
            summary.written
        );
        Ok(entry)
    }

    /// Back up a file from disk, recording its modification time and
    /// read-only flag
    pub fn backup_file<P: AsRef<Path>>(&self, source: P, entry_path: &str) -> Result<FileEntry> {
        let source = source.as_ref();
        let data = fs::read(source)?;
        let metadata = file_metadata(&fs::metadata(source)?);
        self.backup_bytes(entry_path, &data, metadata)
    }

    /// Back up every regular file below `source_root`
    pub fn backup_tree<P: AsRef<Path>>(&self, source_root: P) -> Result<Vec<FileEntry>> {
        let source_root = source_root.as_ref();
        let span = span!(Level::INFO, "backup_tree", source = %source_root.display());
        let _enter = span.enter();

        let mut files: Vec<(PathBuf, String)> = Vec::new();
        for dir_entry in WalkDir::new(source_root).sort_by_file_name() {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type().is_file() {
                continue;
            }

            let relative = dir_entry
                .path()
                .strip_prefix(source_root)
                .map_err(|_| Error::InvalidEntryPath {
                    path: dir_entry.path().display().to_string(),
                })?;
            files.push((dir_entry.path().to_path_buf(), entry_path_from(relative)?));
        }

        info!("Backing up {} files from {}", files.len(), source_root.display());

        let backup_one = |(source, entry_path): &(PathBuf, String)| self.backup_file(source, entry_path);
        let entries: Vec<FileEntry> = if self.parallel {
            files.par_iter().map(backup_one).collect::<Result<_>>()?
        } else {
            files.iter().map(backup_one).collect::<Result<_>>()?
        };

        let total_bytes: u64 = entries.iter().map(|entry| entry.size).sum();
        info!("Backed up {} files, {} bytes", entries.len(), total_bytes);
        Ok(entries)
    }

    /// Scan the commit log for interrupted writes
    pub fn audit(&self) -> Result<Vec<AuditWarning>> {
        self.writer.audit_log()
    }

    /// Write `manifest.json` describing every file record in the snapshot,
    /// including records from earlier runs against the same root
    pub fn finish(&self) -> Result<SnapshotManifest> {
        let manifest = self.write_manifest()?;
        info!(
            "Snapshot complete: {} files, {} chunks, root {}",
            manifest.files_count, manifest.chunks_count, manifest.root_merkle
        );
        Ok(manifest)
    }

    fn write_manifest(&self) -> Result<SnapshotManifest> {
        let entries = load_entries(&self.layout)?;
        let chunks_count = entries
            .iter()
            .map(|entry| entry.chunk_hashes.len() as u64)
            .sum();

        let manifest = SnapshotManifest {
            snapshot_version: SNAPSHOT_VERSION.to_string(),
            device_id: self.device_id.clone(),
            created_at: Utc::now(),
            files_count: entries.len() as u64,
            chunks_count,
            root_merkle: snapshot_root(&entries).to_hex(),
            encryption: self.chunker.cipher().scheme().name().to_string(),
            compression: self.compression().name().to_string(),
        };
        manifest.save(&self.layout)?;
        Ok(manifest)
    }
}

fn file_metadata(fs_metadata: &fs::Metadata) -> Metadata {
    let mut metadata = Metadata::new();
    if let Ok(modified) = fs_metadata.modified() {
        let modified: DateTime<Utc> = modified.into();
        metadata.insert("modified".to_string(), modified.to_rfc3339().into());
    }
    metadata.insert(
        "readonly".to_string(),
        fs_metadata.permissions().readonly().into(),
    );
    metadata
}
