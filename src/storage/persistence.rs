//! JSON snapshots of a document store, written atomically.

use super::Collection;
use super::memory::CommittedState;
use crate::core::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub collection: Collection,
    pub id: String,
    pub version: u64,
    pub body: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub documents: Vec<SnapshotEntry>,
}

impl StoreSnapshot {
    pub(crate) fn from_state(state: &CommittedState) -> Self {
        let documents = state
            .iter()
            .map(|((collection, id), doc)| SnapshotEntry {
                collection: *collection,
                id: id.clone(),
                version: doc.version,
                body: doc.body.clone(),
            })
            .collect();

        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            created_at: Utc::now(),
            documents,
        }
    }

    pub fn count(&self, collection: Collection) -> usize {
        self.documents
            .iter()
            .filter(|entry| entry.collection == collection)
            .count()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = fs::File::open(path).map_err(|err| {
            StoreError::IoError(format!("Failed to open snapshot '{}': {}", path.display(), err))
        })?;
        let snapshot: StoreSnapshot = serde_json::from_reader(BufReader::new(file))?;
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(StoreError::Serialization(format!(
                "Unsupported snapshot format version {} in '{}'",
                snapshot.format_version,
                path.display()
            )));
        }
        Ok(snapshot)
    }

    /// Writes to a temporary file next to `path`, then renames it into place.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir()?,
        };
        fs::create_dir_all(&dir)?;

        let temp = tempfile::NamedTempFile::new_in(&dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|err| {
            StoreError::IoError(format!(
                "Failed to persist snapshot '{}': {}",
                path.display(),
                err.error
            ))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_save_and_load_round_trip() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("nested").join("store.json");

        let snapshot = StoreSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            created_at: Utc::now(),
            documents: vec![SnapshotEntry {
                collection: Collection::Bikes,
                id: "b1".to_string(),
                version: 3,
                body: json!({"id": "b1"}),
            }],
        };
        snapshot.save(&path).expect("save snapshot");

        let loaded = StoreSnapshot::load(&path).expect("load snapshot");
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.count(Collection::Bikes), 1);
        assert_eq!(loaded.count(Collection::Reviews), 0);
    }

    #[test]
    fn test_load_rejects_unknown_format_version() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("store.json");
        fs::write(
            &path,
            r#"{"format_version": 99, "created_at": "2024-01-01T00:00:00Z", "documents": []}"#,
        )
        .expect("write file");

        let err = StoreSnapshot::load(&path).unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
