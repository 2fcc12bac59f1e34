//! Append-only commit log of completed object writes
//!
//! One `PUT <hex-hash>\n` line per object made visible in the store. The log is
//! an audit trail only; object presence in `objects/` is what restores rely on.

use crate::chunk::ChunkHash;
use crate::Result;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const PUT_PREFIX: &str = "PUT ";

/// Appender for `commit.log`
#[derive(Debug)]
pub struct CommitLog {
    path: PathBuf,
    file: Option<File>,
}

impl CommitLog {
    /// Bind to a log path; the file itself is created on the first append
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one `PUT` record and flush it to disk
    pub fn append(&mut self, hash: &ChunkHash) -> io::Result<()> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.file = Some(file);
        }

        if let Some(file) = self.file.as_mut() {
            // A single write per record keeps lines whole under O_APPEND
            file.write_all(format!("{}{}\n", PUT_PREFIX, hash).as_bytes())?;
            file.sync_data()?;
        }
        Ok(())
    }

    /// Read back every record in the log at `path`
    pub fn replay<P: AsRef<Path>>(path: P) -> Result<Replay> {
        let content = match fs::read(path.as_ref()) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e.into()),
        };

        let mut replay = Replay::default();
        let mut lines: Vec<&str> = content.split('\n').collect();

        // Anything after the final newline was never completed
        if let Some(tail) = lines.pop() {
            if !tail.is_empty() {
                replay.incomplete_tail = Some(tail.to_string());
            }
        }

        for (index, line) in lines.into_iter().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            match line
                .strip_prefix(PUT_PREFIX)
                .and_then(|hash| ChunkHash::parse(hash.trim()).ok())
            {
                Some(hash) => replay.records.push(hash),
                None => replay.malformed.push(MalformedLine {
                    line_number: index + 1,
                    content: line.to_string(),
                }),
            }
        }

        Ok(replay)
    }
}

/// Parsed contents of a commit log
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Replay {
    /// Hashes in the order they were committed
    pub records: Vec<ChunkHash>,
    /// Complete lines that are not a valid `PUT` record
    pub malformed: Vec<MalformedLine>,
    /// Trailing bytes with no terminating newline, left by an interrupted append
    pub incomplete_tail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedLine {
    pub line_number: usize,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_log_is_created_on_first_append() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("commit.log");
        let mut log = CommitLog::new(&path);
        assert!(!path.exists());

        let a = ChunkHash::digest(b"a");
        let b = ChunkHash::digest(b"b");
        log.append(&a)?;
        log.append(&b)?;

        assert_eq!(fs::read_to_string(&path)?, format!("PUT {}\nPUT {}\n", a, b));
        assert_eq!(CommitLog::replay(&path)?.records, vec![a, b]);
        Ok(())
    }

    #[test]
    fn test_reopened_log_appends_at_end() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("commit.log");
        let a = ChunkHash::digest(b"a");
        let b = ChunkHash::digest(b"b");

        CommitLog::new(&path).append(&a)?;
        CommitLog::new(&path).append(&b)?;

        assert_eq!(CommitLog::replay(&path)?.records, vec![a, b]);
        Ok(())
    }

    #[test]
    fn test_missing_log_replays_empty() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let replay = CommitLog::replay(temp_dir.path().join("absent.log"))?;
        assert_eq!(replay, Replay::default());
        Ok(())
    }

    #[test]
    fn test_replay_ignores_torn_tail_and_flags_garbage() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("commit.log");
        let a = ChunkHash::digest(b"a");
        fs::write(&path, format!("PUT {}\nDEL nonsense\n\nPUT {}", a, &a.to_hex()[..10]))?;

        let replay = CommitLog::replay(&path)?;
        assert_eq!(replay.records, vec![a]);
        assert_eq!(
            replay.malformed,
            vec![MalformedLine {
                line_number: 2,
                content: "DEL nonsense".to_string()
            }]
        );
        assert_eq!(replay.incomplete_tail, Some(format!("PUT {}", &a.to_hex()[..10])));
        Ok(())
    }
}
