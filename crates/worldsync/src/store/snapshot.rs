use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::actor::record::{ActorRecord, TransformUpdate};
use crate::script::WorldScript;

use super::atomic_io::write_text_atomic;

pub const SNAPSHOT_VERSION: u32 = 1;

/// On-disk copy of every document in a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    #[serde(default)]
    pub actors: Vec<ActorRecord>,
    #[serde(default)]
    pub placements: Vec<TransformUpdate>,
    #[serde(default)]
    pub waypoints: Vec<TransformUpdate>,
    #[serde(default)]
    pub scripts: Vec<WorldScript>,
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("snapshot {path} has version {found}, expected {expected}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    #[error("snapshot {path} actor #{index} has no _id")]
    MissingActorId { path: PathBuf, index: usize },
}

impl StoreSnapshot {
    pub fn write_to(&self, path: &Path) -> Result<(), SnapshotError> {
        let text = serde_json::to_string_pretty(self).map_err(SnapshotError::Encode)?;
        write_text_atomic(path, &text).map_err(|source| SnapshotError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn read_from(path: &Path) -> Result<Self, SnapshotError> {
        let text = fs::read_to_string(path).map_err(|source| SnapshotError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot: Self = serde_json::from_str(&text).map_err(|source| SnapshotError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        if let Some(index) = snapshot.actors.iter().position(|actor| actor.id.is_none()) {
            return Err(SnapshotError::MissingActorId {
                path: path.to_path_buf(),
                index,
            });
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::record::ActorRecord;

    #[test]
    fn rejects_future_versions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("world.json");
        fs::write(&path, r#"{"version": 7}"#).expect("write");

        let error = StoreSnapshot::read_from(&path).expect_err("version mismatch");
        assert!(matches!(
            error,
            SnapshotError::UnsupportedVersion { found: 7, .. }
        ));
    }

    #[test]
    fn rejects_actor_without_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("world.json");
        let snapshot = StoreSnapshot {
            version: SNAPSHOT_VERSION,
            actors: vec![ActorRecord::default()],
            ..StoreSnapshot::default()
        };
        snapshot.write_to(&path).expect("write");

        let error = StoreSnapshot::read_from(&path).expect_err("missing id");
        assert!(matches!(error, SnapshotError::MissingActorId { index: 0, .. }));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let error =
            StoreSnapshot::read_from(&dir.path().join("absent.json")).expect_err("missing");
        assert!(matches!(error, SnapshotError::Read { .. }));
    }
}
