//! On-disk snapshot layout
//!
//! ```text
//! <snapshot-root>/
//!   manifest.json
//!   commit.log
//!   objects/<hex-hash>.chunk
//!   files/<relative-path>.json
//! ```

use crate::chunk::ChunkHash;
use crate::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const COMMIT_LOG_FILE: &str = "commit.log";
pub const OBJECTS_DIR: &str = "objects";
pub const FILES_DIR: &str = "files";
pub const OBJECT_EXTENSION: &str = "chunk";
pub const RECORD_EXTENSION: &str = "json";

/// Paths inside one snapshot root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLayout {
    root: PathBuf,
}

impl SnapshotLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn commit_log_path(&self) -> PathBuf {
        self.root.join(COMMIT_LOG_FILE)
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.root.join(OBJECTS_DIR)
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    /// `objects/<hex-hash>.chunk`
    pub fn object_path(&self, hash: &ChunkHash) -> PathBuf {
        self.objects_dir()
            .join(format!("{}.{}", hash, OBJECT_EXTENSION))
    }

    /// `files/<relative-path>.json` for an already validated entry path
    pub fn record_path(&self, entry_path: &str) -> PathBuf {
        let mut path = self.files_dir();
        path.extend(entry_path.split('/'));
        let mut record = path.into_os_string();
        record.push(".");
        record.push(RECORD_EXTENSION);
        PathBuf::from(record)
    }
}

/// Create a directory tree, reporting which path could not be created
pub(crate) fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| Error::DirectoryCreateFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `contents` to a temporary sibling of `target`, sync it, then rename it
/// into place. The temporary file is removed on every early return.
pub(crate) fn write_atomic(target: &Path, contents: &[u8]) -> Result<()> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    ensure_dir(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = SnapshotLayout::new("/backups/snap");
        let hash = ChunkHash::digest(b"chunk");

        assert_eq!(layout.manifest_path(), Path::new("/backups/snap/manifest.json"));
        assert_eq!(layout.commit_log_path(), Path::new("/backups/snap/commit.log"));
        assert_eq!(
            layout.object_path(&hash),
            Path::new("/backups/snap/objects").join(format!("{}.chunk", hash))
        );
        assert_eq!(
            layout.record_path("photos/2024/img.jpg"),
            Path::new("/backups/snap/files/photos/2024/img.jpg.json")
        );
    }

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp_files() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let target = temp_dir.path().join("nested/dir/out.bin");

        write_atomic(&target, b"first")?;
        write_atomic(&target, b"second")?;

        assert_eq!(fs::read(&target)?, b"second");
        let siblings = fs::read_dir(target.parent().unwrap())?.count();
        assert_eq!(siblings, 1);
        Ok(())
    }
}
