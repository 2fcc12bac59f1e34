//! Content-addressed object store with resumable, crash-safe writes
//!
//! Objects live at `objects/<hex-hash>.chunk`. A write lands in a temporary
//! sibling first and becomes visible through a single rename, so an object that
//! exists is always complete. Each completed write is then recorded in
//! `commit.log` for post-crash auditing.

use crate::chunk::{Chunk, ChunkHash};
use crate::commit_log::CommitLog;
use crate::layout::{self, SnapshotLayout, OBJECT_EXTENSION};
use crate::{Error, Result};
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::Builder;
use tracing::{debug, info, span, warn, Level};

const TEMP_SUFFIX: &str = ".chunk.tmp";

/// Read access to the objects of one snapshot root
#[derive(Debug, Clone)]
pub struct ObjectStore {
    layout: SnapshotLayout,
}

impl ObjectStore {
    /// Bind to an existing snapshot root without creating anything
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            layout: SnapshotLayout::new(root),
        }
    }

    pub fn layout(&self) -> &SnapshotLayout {
        &self.layout
    }

    pub fn object_path(&self, hash: &ChunkHash) -> PathBuf {
        self.layout.object_path(hash)
    }

    /// Check if an object exists in the store
    pub fn contains(&self, hash: &ChunkHash) -> bool {
        self.object_path(hash).is_file()
    }

    /// Read an object's ciphertext; absence is [`Error::MissingChunk`]
    pub fn read(&self, hash: &ChunkHash) -> Result<Vec<u8>> {
        match fs::read(self.object_path(hash)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::MissingChunk {
                hash: hash.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// List all objects in the store
    pub fn list(&self) -> Result<Vec<ChunkHash>> {
        let mut hashes = Vec::new();
        let objects_dir = self.layout.objects_dir();
        if !objects_dir.is_dir() {
            return Ok(hashes);
        }

        for entry in fs::read_dir(&objects_dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == OBJECT_EXTENSION) {
                if let Some(hash) = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| ChunkHash::parse(stem).ok())
                {
                    hashes.push(hash);
                }
            }
        }

        hashes.sort();
        Ok(hashes)
    }

    /// Temporary files left behind by writes that never reached their rename
    fn stale_temp_files(&self) -> Result<Vec<PathBuf>> {
        let objects_dir = self.layout.objects_dir();
        if !objects_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut stale = Vec::new();
        for entry in fs::read_dir(&objects_dir)? {
            let path = entry?.path();
            let is_temp = path
                .file_name()
                .and_then(|name| name.to_str())
                .map_or(false, |name| name.ends_with(TEMP_SUFFIX));
            if is_temp {
                stale.push(path);
            }
        }

        stale.sort();
        Ok(stale)
    }
}

/// Outcome of a batch write
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    /// Objects newly made durable by this call
    pub written: usize,
    /// Objects that were already present
    pub skipped: usize,
}

impl WriteSummary {
    pub fn merge(&mut self, other: WriteSummary) {
        self.written += other.written;
        self.skipped += other.skipped;
    }
}

/// Something the commit-log audit found worth reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditWarning {
    /// Logged as committed but absent from `objects/`; the chunk must be
    /// regenerated from its source and written again
    InterruptedWrite { hash: ChunkHash },
    /// A complete log line that is not a `PUT` record
    MalformedRecord { line_number: usize, content: String },
    /// A temporary object file whose write never completed
    StaleTempFile { path: PathBuf },
}

/// Writes sealed chunks into a snapshot's object store
#[derive(Debug)]
pub struct ResumableObjectWriter {
    store: ObjectStore,
    log: Mutex<CommitLog>,
}

impl ResumableObjectWriter {
    /// Open the store at `root`, creating `objects/` if needed
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let store = ObjectStore::new(root);
        layout::ensure_dir(&store.layout().objects_dir())?;
        let log = CommitLog::new(store.layout().commit_log_path());

        Ok(Self {
            store,
            log: Mutex::new(log),
        })
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// Persist chunks in order. Chunks whose address already exists are
    /// skipped. A failure stops the batch; everything before it stays committed.
    pub fn write(&self, chunks: &[Chunk]) -> Result<WriteSummary> {
        let mut summary = WriteSummary::default();

        for chunk in chunks {
            if self.write_one(chunk)? {
                summary.written += 1;
            } else {
                summary.skipped += 1;
            }
        }

        Ok(summary)
    }

    /// Persist a single chunk, returning whether it was newly written
    pub fn write_one(&self, chunk: &Chunk) -> Result<bool> {
        let final_path = self.store.object_path(&chunk.hash);
        if final_path.is_file() {
            debug!("Object {} already present, skipping", chunk.hash);
            return Ok(false);
        }

        let objects_dir = self.store.layout().objects_dir();
        let mut temp = Builder::new()
            .prefix(".")
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&objects_dir)?;
        temp.write_all(&chunk.ciphertext)?;
        temp.as_file().sync_all()?;

        // Racing writers of the same address carry identical payloads, so
        // whichever rename lands last leaves the same complete object.
        temp.persist(&final_path).map_err(|e| Error::Io(e.error))?;
        sync_dir(&objects_dir)?;

        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .append(&chunk.hash)?;

        debug!("Committed object {} ({} bytes)", chunk.hash, chunk.ciphertext.len());
        Ok(true)
    }

    /// Scan the commit log for writes that were logged but whose object is
    /// gone. Findings are reported, never repaired.
    pub fn audit_log(&self) -> Result<Vec<AuditWarning>> {
        let span = span!(Level::INFO, "audit_log");
        let _enter = span.enter();

        let replay = CommitLog::replay(self.store.layout().commit_log_path())?;
        let mut warnings = Vec::new();
        let mut seen = HashSet::new();

        for hash in replay.records {
            if seen.insert(hash) && !self.store.contains(&hash) {
                warn!("Missing chunk {} - needs rewrite", hash);
                warnings.push(AuditWarning::InterruptedWrite { hash });
            }
        }

        for line in replay.malformed {
            warn!("Malformed commit log line {}: {:?}", line.line_number, line.content);
            warnings.push(AuditWarning::MalformedRecord {
                line_number: line.line_number,
                content: line.content,
            });
        }

        if let Some(tail) = replay.incomplete_tail {
            debug!("Ignoring incomplete trailing commit log record {:?}", tail);
        }

        for path in self.store.stale_temp_files()? {
            warn!("Stale temporary object {}", path.display());
            warnings.push(AuditWarning::StaleTempFile { path });
        }

        info!("Commit log audit finished with {} warnings", warnings.len());
        Ok(warnings)
    }

    /// Hashes the audit found logged but missing, in log order
    pub fn interrupted_writes(&self) -> Result<Vec<ChunkHash>> {
        Ok(self
            .audit_log()?
            .into_iter()
            .filter_map(|warning| match warning {
                AuditWarning::InterruptedWrite { hash } => Some(hash),
                _ => None,
            })
            .collect())
    }
}

/// Make a completed rename durable
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn chunk(payload: &[u8]) -> Chunk {
        Chunk {
            hash: ChunkHash::digest(payload),
            ciphertext: payload.iter().rev().copied().collect(),
        }
    }

    #[test]
    fn test_write_creates_objects_and_log() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let writer = ResumableObjectWriter::open(temp_dir.path())?;
        let chunks = vec![chunk(b"one"), chunk(b"two")];

        let summary = writer.write(&chunks)?;
        assert_eq!(summary, WriteSummary { written: 2, skipped: 0 });

        for c in &chunks {
            assert_eq!(writer.store().read(&c.hash)?, c.ciphertext);
        }
        let log = fs::read_to_string(temp_dir.path().join("commit.log"))?;
        assert_eq!(log, format!("PUT {}\nPUT {}\n", chunks[0].hash, chunks[1].hash));
        Ok(())
    }

    #[test]
    fn test_rewrite_is_a_no_op() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let writer = ResumableObjectWriter::open(temp_dir.path())?;
        let chunks = vec![chunk(b"dedup me")];

        writer.write(&chunks)?;
        let log_before = fs::read(temp_dir.path().join("commit.log"))?;
        let listing_before = writer.store().list()?;

        let summary = writer.write(&chunks)?;
        assert_eq!(summary, WriteSummary { written: 0, skipped: 1 });
        assert_eq!(fs::read(temp_dir.path().join("commit.log"))?, log_before);
        assert_eq!(writer.store().list()?, listing_before);
        Ok(())
    }

    #[test]
    fn test_reopened_writer_skips_existing_objects() -> Result<()> {
        let temp_dir = TempDir::new()?;
        ResumableObjectWriter::open(temp_dir.path())?.write(&[chunk(b"a")])?;

        let writer = ResumableObjectWriter::open(temp_dir.path())?;
        let summary = writer.write(&[chunk(b"a"), chunk(b"b")])?;

        assert_eq!(summary, WriteSummary { written: 1, skipped: 1 });
        assert_eq!(writer.store().list()?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_missing_object_reads_as_missing_chunk() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let writer = ResumableObjectWriter::open(temp_dir.path())?;
        let hash = ChunkHash::digest(b"never written");

        match writer.store().read(&hash) {
            Err(Error::MissingChunk { hash: missing }) => assert_eq!(missing, hash.to_hex()),
            other => panic!("expected MissingChunk, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_audit_reports_logged_but_missing_objects() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let writer = ResumableObjectWriter::open(temp_dir.path())?;
        let kept = chunk(b"kept");
        let lost = chunk(b"lost");
        writer.write(&[kept.clone(), lost.clone()])?;
        assert!(writer.audit_log()?.is_empty());

        fs::remove_file(writer.store().object_path(&lost.hash))?;
        fs::write(writer.store().layout().objects_dir().join(".abc.chunk.tmp"), b"partial")?;

        let warnings = writer.audit_log()?;
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0], AuditWarning::InterruptedWrite { hash: lost.hash });
        assert!(matches!(warnings[1], AuditWarning::StaleTempFile { .. }));
        assert_eq!(writer.interrupted_writes()?, vec![lost.hash]);
        Ok(())
    }

    #[test]
    fn test_open_fails_when_directory_cannot_be_created() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let blocker = temp_dir.path().join("not-a-dir");
        fs::write(&blocker, b"file in the way")?;

        let result = ResumableObjectWriter::open(&blocker);
        assert!(matches!(result, Err(Error::DirectoryCreateFailed { .. })));
        Ok(())
    }

    #[test]
    fn test_concurrent_writers_of_same_object() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let writer = Arc::new(ResumableObjectWriter::open(temp_dir.path())?);
        let shared = chunk(b"contended");

        let summaries: Vec<Result<WriteSummary>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let writer = Arc::clone(&writer);
                    let shared = shared.clone();
                    scope.spawn(move || writer.write(&[shared]))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("writer thread panicked"))
                .collect()
        });
        for summary in summaries {
            let summary = summary?;
            assert_eq!(summary.written + summary.skipped, 1);
        }

        assert_eq!(writer.store().read(&shared.hash)?, shared.ciphertext);
        assert_eq!(writer.store().list()?, vec![shared.hash]);
        assert!(writer.audit_log()?.is_empty());

        let log = fs::read_to_string(temp_dir.path().join("commit.log"))?;
        assert!(log.lines().all(|line| line == format!("PUT {}", shared.hash)));
        Ok(())
    }
}
