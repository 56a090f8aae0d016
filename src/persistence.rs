// Snapshot persistence for the Q-table and the experience buffer.
// Two independent JSON files, rewritten wholesale on every save and opaque
// to callers. Last writer wins when sessions overlap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::action::{Action, ACTION_SPACE_VERSION};
use crate::config::Hyperparameters;
use crate::error::{QloopError, QloopResult};
use crate::experience::{Experience, ExperienceBuffer};
use crate::policy::QTable;

const QTABLE_FILE: &str = "qtable.json";
const EXPERIENCES_FILE: &str = "experiences.json";

/// Persisted form of the Q-table, with the hyperparameters that produced it
#[derive(Debug, Serialize, Deserialize)]
pub struct QTableSnapshot {
    /// Action-space version the table was written under
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub hyperparams: Hyperparameters,
    pub table: BTreeMap<String, HashMap<Action, f64>>,
}

/// File-backed store for learning state snapshots
#[derive(Debug, Clone)]
pub struct FileStore {
    qtable_path: PathBuf,
    experience_path: PathBuf,
}

impl FileStore {
    /// Store rooted at an explicit directory
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            qtable_path: dir.join(QTABLE_FILE),
            experience_path: dir.join(EXPERIENCES_FILE),
        }
    }

    /// Store under the platform data directory, e.g.
    /// `~/.local/share/qloop/` on Linux
    pub fn default_location() -> Self {
        let dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("qloop");
        Self::new(dir)
    }

    pub fn qtable_path(&self) -> &Path {
        &self.qtable_path
    }

    pub fn experience_path(&self) -> &Path {
        &self.experience_path
    }

    fn ensure_parent(path: &Path) -> QloopResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| QloopError::io_error(e, Some(parent)))?;
        }
        Ok(())
    }

    /// Write the Q-table snapshot, replacing any previous one
    pub fn save_qtable(
        &self,
        qtable: &QTable,
        hyperparams: &Hyperparameters,
    ) -> QloopResult<()> {
        Self::ensure_parent(&self.qtable_path)?;

        let snapshot = QTableSnapshot {
            version: ACTION_SPACE_VERSION,
            updated_at: Utc::now(),
            hyperparams: hyperparams.clone(),
            table: qtable
                .entries()
                .map(|(key, actions)| (key.clone(), actions.clone()))
                .collect(),
        };

        let serialized = serde_json::to_string_pretty(&snapshot)?;
        fs::write(&self.qtable_path, serialized)
            .map_err(|e| QloopError::io_error(e, Some(&self.qtable_path)))?;
        debug!(
            path = %self.qtable_path.display(),
            states = qtable.len(),
            "Q-table snapshot written"
        );
        Ok(())
    }

    /// Load the persisted Q-table and the hyperparameters saved with it.
    /// A missing, unreadable-as-JSON or version-mismatched snapshot is a cold
    /// start (`None`), never an error.
    pub fn load_qtable(
        &self,
        max_size: usize,
    ) -> QloopResult<Option<(QTable, Hyperparameters)>> {
        if !self.qtable_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.qtable_path)
            .map_err(|e| QloopError::io_error(e, Some(&self.qtable_path)))?;

        let snapshot: QTableSnapshot = match serde_json::from_str(&content) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    path = %self.qtable_path.display(),
                    error = %e,
                    "Q-table snapshot unreadable, starting cold"
                );
                return Ok(None);
            }
        };

        if snapshot.version != ACTION_SPACE_VERSION {
            warn!(
                found = snapshot.version,
                expected = ACTION_SPACE_VERSION,
                "Q-table snapshot from another action-space version, starting cold"
            );
            return Ok(None);
        }

        let qtable = QTable::from_entries(snapshot.table, max_size);
        Ok(Some((qtable, snapshot.hyperparams)))
    }

    /// Write the whole experience buffer in order
    pub fn save_experiences(&self, buffer: &ExperienceBuffer) -> QloopResult<()> {
        Self::ensure_parent(&self.experience_path)?;

        let serialized = serde_json::to_string_pretty(&buffer.to_vec())?;
        fs::write(&self.experience_path, serialized)
            .map_err(|e| QloopError::io_error(e, Some(&self.experience_path)))?;
        debug!(
            path = %self.experience_path.display(),
            entries = buffer.len(),
            "experience snapshot written"
        );
        Ok(())
    }

    /// Load the persisted experience buffer; missing or unreadable snapshots
    /// are a cold start.
    pub fn load_experiences(&self, capacity: usize) -> QloopResult<Option<ExperienceBuffer>> {
        if !self.experience_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.experience_path)
            .map_err(|e| QloopError::io_error(e, Some(&self.experience_path)))?;

        match serde_json::from_str::<Vec<Experience>>(&content) {
            Ok(entries) => Ok(Some(ExperienceBuffer::from_entries(entries, capacity))),
            Err(e) => {
                warn!(
                    path = %self.experience_path.display(),
                    error = %e,
                    "experience snapshot unreadable, starting cold"
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qtable_round_trip_is_bit_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let mut qtable = QTable::new(50);
        qtable.insert_value("s1", Action::AddFilter, 15.8);
        qtable.insert_value("s1", Action::UseGenerator, 0.1 + 0.2);
        qtable.insert_value("s2", Action::NoOp, -7.25e-3);

        store
            .save_qtable(&qtable, &Hyperparameters::default())
            .unwrap();
        let (restored, params) = store.load_qtable(50).unwrap().unwrap();

        assert_eq!(restored.q_value("s1", Action::AddFilter), 15.8);
        assert_eq!(restored.q_value("s1", Action::UseGenerator), 0.1 + 0.2);
        assert_eq!(restored.q_value("s2", Action::NoOp), -7.25e-3);
        assert_eq!(params, Hyperparameters::default());
    }

    #[test]
    fn test_missing_snapshot_is_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.load_qtable(10).unwrap().is_none());
        assert!(store.load_experiences(10).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_snapshot_is_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        fs::write(store.qtable_path(), "{not json").unwrap();
        fs::write(store.experience_path(), "[broken").unwrap();

        assert!(store.load_qtable(10).unwrap().is_none());
        assert!(store.load_experiences(10).unwrap().is_none());
    }

    #[test]
    fn test_version_mismatch_is_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let qtable = QTable::new(10);
        store
            .save_qtable(&qtable, &Hyperparameters::default())
            .unwrap();

        let content = fs::read_to_string(store.qtable_path()).unwrap();
        let mut snapshot: serde_json::Value = serde_json::from_str(&content).unwrap();
        snapshot["version"] = serde_json::json!(ACTION_SPACE_VERSION + 1);
        fs::write(store.qtable_path(), snapshot.to_string()).unwrap();

        assert!(store.load_qtable(10).unwrap().is_none());
    }

    #[test]
    fn test_experiences_round_trip_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let mut buffer = ExperienceBuffer::new(10);
        for i in 0..4 {
            buffer.add(Experience::new(
                format!("s{}", i),
                Action::AddField,
                i as f64,
                format!("s{}", i + 1),
                i == 3,
                "obj".to_string(),
            ));
        }

        store.save_experiences(&buffer).unwrap();
        let restored = store.load_experiences(10).unwrap().unwrap();

        assert_eq!(restored.len(), 4);
        let rewards: Vec<f64> = restored.iter().map(|e| e.reward).collect();
        assert_eq!(rewards, vec![0.0, 1.0, 2.0, 3.0]);
        assert!((restored.success_rate() - 0.25).abs() < 1e-12);
    }
}
