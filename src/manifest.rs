//! Manifest types: per-file entries and the snapshot manifest

use crate::chunk::ChunkHash;
use crate::layout::{self, SnapshotLayout, RECORD_EXTENSION};
use crate::merkle::merkle_root;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Component, Path};
use walkdir::WalkDir;

/// Snapshot manifest format version
pub const SNAPSHOT_VERSION: &str = "1";

/// A small JSON-like annotation value attached to a file entry
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<MetadataValue>),
    Object(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Number(value.into())
    }
}

impl From<u64> for MetadataValue {
    fn from(value: u64) -> Self {
        MetadataValue::Number(value.into())
    }
}

impl From<f64> for MetadataValue {
    /// Non-finite floats have no JSON form and become `Null`
    fn from(value: f64) -> Self {
        serde_json::Number::from_f64(value)
            .map(MetadataValue::Number)
            .unwrap_or(MetadataValue::Null)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl<T: Into<MetadataValue>> From<Vec<T>> for MetadataValue {
    fn from(values: Vec<T>) -> Self {
        MetadataValue::Array(values.into_iter().map(Into::into).collect())
    }
}

impl Serialize for MetadataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            MetadataValue::Null => serializer.serialize_unit(),
            MetadataValue::Bool(b) => serializer.serialize_bool(*b),
            MetadataValue::Number(n) => n.serialize(serializer),
            MetadataValue::String(s) => serializer.serialize_str(s),
            MetadataValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            MetadataValue::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

struct MetadataValueVisitor;

impl<'de> Visitor<'de> for MetadataValueVisitor {
    type Value = MetadataValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("null, a boolean, a number, a string, an array or an object")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<MetadataValue, E> {
        Ok(MetadataValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<MetadataValue, E> {
        Ok(MetadataValue::Null)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<MetadataValue, E> {
        Ok(MetadataValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<MetadataValue, E> {
        Ok(MetadataValue::Number(v.into()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<MetadataValue, E> {
        Ok(MetadataValue::Number(v.into()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<MetadataValue, E> {
        serde_json::Number::from_f64(v)
            .map(MetadataValue::Number)
            .ok_or_else(|| E::custom("non-finite number in metadata"))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<MetadataValue, E> {
        Ok(MetadataValue::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<MetadataValue, E> {
        Ok(MetadataValue::String(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<MetadataValue, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<MetadataValue>()? {
            items.push(item);
        }
        Ok(MetadataValue::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<MetadataValue, A::Error> {
        let mut fields = BTreeMap::new();
        while let Some((key, value)) = map.next_entry::<String, MetadataValue>()? {
            fields.insert(key, value);
        }
        Ok(MetadataValue::Object(fields))
    }
}

impl<'de> Deserialize<'de> for MetadataValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(MetadataValueVisitor)
    }
}

/// Metadata attached to a file entry
pub type Metadata = BTreeMap<String, MetadataValue>;

/// One backed-up file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Relative, forward-slash separated path
    pub path: String,
    /// Original size in bytes
    pub size: u64,
    /// Content addresses in byte order
    #[serde(rename = "chunkHashes")]
    pub chunk_hashes: Vec<ChunkHash>,
    /// SHA-256 of the complete original content
    #[serde(rename = "fileSHA256")]
    pub file_hash: ChunkHash,
    #[serde(default)]
    pub metadata: Metadata,
    /// Merkle root of `chunk_hashes`
    #[serde(rename = "merkleRoot")]
    pub merkle_root: ChunkHash,
}

impl FileEntry {
    /// Create a new entry, computing its Merkle root
    pub fn new(
        path: impl Into<String>,
        size: u64,
        chunk_hashes: Vec<ChunkHash>,
        file_hash: ChunkHash,
        metadata: Metadata,
    ) -> Result<Self> {
        let path = path.into();
        validate_entry_path(&path)?;
        let merkle_root = merkle_root(&chunk_hashes);

        Ok(Self {
            path,
            size,
            chunk_hashes,
            file_hash,
            metadata,
            merkle_root,
        })
    }

    /// Whether the stored Merkle root still matches the chunk list
    pub fn verify_integrity(&self) -> bool {
        merkle_root(&self.chunk_hashes) == self.merkle_root
    }

    /// Persist as `files/<path>.json`
    pub fn save(&self, layout: &SnapshotLayout) -> Result<()> {
        validate_entry_path(&self.path)?;
        let json = serde_json::to_vec_pretty(self)?;
        layout::write_atomic(&layout.record_path(&self.path), &json)
    }

    /// Load a single entry record
    ///
    /// Any failure is reported as [`Error::InvalidRecord`] naming the record.
    pub fn load<P: AsRef<Path>>(record_path: P) -> Result<Self> {
        let record_path = record_path.as_ref();
        Self::read_record(record_path).map_err(|source| Error::InvalidRecord {
            path: record_path.to_path_buf(),
            source: Box::new(source),
        })
    }

    fn read_record(record_path: &Path) -> Result<Self> {
        let bytes = fs::read(record_path)?;
        let entry: FileEntry = serde_json::from_slice(&bytes)?;
        validate_entry_path(&entry.path)?;
        Ok(entry)
    }
}

/// Check that an entry path is relative, forward-slash separated and cannot
/// escape the directory it is restored into.
pub fn validate_entry_path(path: &str) -> Result<()> {
    let invalid = || Error::InvalidEntryPath {
        path: path.to_string(),
    };

    if path.is_empty() || path.starts_with('/') || path.contains('\\') || path.contains('\0') {
        return Err(invalid());
    }
    for component in path.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(invalid());
        }
        // A drive or stream separator would escape the restore root on Windows
        if cfg!(windows) && component.contains(':') {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Build an entry path from a path relative to a backup source root
pub fn entry_path_from(relative: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str().ok_or_else(|| Error::InvalidEntryPath {
                path: relative.display().to_string(),
            })?),
            _ => {
                return Err(Error::InvalidEntryPath {
                    path: relative.display().to_string(),
                })
            }
        }
    }

    let path = parts.join("/");
    validate_entry_path(&path)?;
    Ok(path)
}

/// Snapshot-level summary written once a backup run completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub snapshot_version: String,
    pub device_id: String,
    pub created_at: DateTime<Utc>,
    pub files_count: u64,
    pub chunks_count: u64,
    /// Merkle root over every entry's `merkleRoot`, ordered by path
    pub root_merkle: String,
    pub encryption: String,
    pub compression: String,
}

impl SnapshotManifest {
    /// Save to `manifest.json`
    pub fn save(&self, layout: &SnapshotLayout) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        layout::write_atomic(&layout.manifest_path(), &json)
    }

    /// Load from `manifest.json`, rejecting unknown format versions
    pub fn load(layout: &SnapshotLayout) -> Result<Self> {
        let bytes = fs::read(layout.manifest_path())?;
        let manifest: SnapshotManifest = serde_json::from_slice(&bytes)?;

        if manifest.snapshot_version != SNAPSHOT_VERSION {
            return Err(Error::InvalidManifest {
                reason: format!(
                    "Unsupported snapshot version: {} (expected {})",
                    manifest.snapshot_version, SNAPSHOT_VERSION
                ),
            });
        }

        Ok(manifest)
    }

    /// Parsed `root_merkle`, if it holds a digest rather than a placeholder
    pub fn root_hash(&self) -> Option<ChunkHash> {
        ChunkHash::parse(&self.root_merkle).ok()
    }
}

/// Root over a set of entries: each entry's Merkle root, ordered by path
pub fn snapshot_root(entries: &[FileEntry]) -> ChunkHash {
    let mut roots: Vec<(&str, ChunkHash)> = entries
        .iter()
        .map(|entry| (entry.path.as_str(), entry.merkle_root))
        .collect();
    roots.sort_by(|a, b| a.0.cmp(b.0));

    let leaves: Vec<ChunkHash> = roots.into_iter().map(|(_, root)| root).collect();
    merkle_root(&leaves)
}

/// Load every file record under `files/` individually, ordered by the entry
/// path implied by each record's location. A record that fails to load does not
/// stop the others.
pub fn load_records(layout: &SnapshotLayout) -> Result<Vec<(String, Result<FileEntry>)>> {
    let files_dir = layout.files_dir();
    if !files_dir.is_dir() {
        return Err(Error::FilesDirectoryNotFound { path: files_dir });
    }

    let mut records = Vec::new();
    for dir_entry in WalkDir::new(&files_dir).sort_by_file_name() {
        let dir_entry = dir_entry?;
        let is_record = dir_entry.file_type().is_file()
            && dir_entry
                .path()
                .extension()
                .map_or(false, |ext| ext == RECORD_EXTENSION);
        if !is_record {
            continue;
        }

        let relative = dir_entry
            .path()
            .strip_prefix(&files_dir)
            .unwrap_or_else(|_| dir_entry.path())
            .with_extension("");
        let entry_path =
            entry_path_from(&relative).unwrap_or_else(|_| relative.display().to_string());
        records.push((entry_path, FileEntry::load(dir_entry.path())));
    }

    records.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(records)
}

/// Load every file record under `files/`, ordered by entry path. The first
/// unreadable record fails the whole load.
pub fn load_entries(layout: &SnapshotLayout) -> Result<Vec<FileEntry>> {
    let mut entries = load_records(layout)?
        .into_iter()
        .map(|(_, entry)| entry)
        .collect::<Result<Vec<_>>>()?;

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}
