//! Durable per-firm snapshots for the harvest and processing layers.
//!
//! One JSON file per firm per checkpoint kind. Saves go through a temp file
//! and a rename, loads happen once at firm/stage start, and a file is only
//! removed after the work it covers is confirmed complete.
//!
//! Every snapshot carries a `schema_version`. A file written with another
//! version is discarded on load (and the work restarts from scratch) rather
//! than being half-decoded into the current layout.

use std::marker::PhantomData;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CheckpointError;
use crate::models::{ProcessedReview, Review, TopicDescriptor};
use crate::pipeline::Stage;
use crate::utils::{load_json, safe_file_name, save_json_atomic};

pub trait Snapshot: Serialize + DeserializeOwned {
    /// File name suffix, one per checkpoint kind.
    const KIND: &'static str;
    const SCHEMA_VERSION: u32;
}

/// Harvest progress for one firm. `reviews` always holds exactly the reviews
/// of pages `1..=last_page`, in page order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestCheckpoint {
    pub schema_version: u32,
    pub firm_name: String,
    pub last_page: u32,
    pub reviews: Vec<Review>,
    pub strategy: Option<String>,
    pub saved_at: DateTime<Utc>,
}

impl HarvestCheckpoint {
    pub fn new(firm_name: &str, last_page: u32, reviews: Vec<Review>, strategy: &str) -> Self {
        Self {
            schema_version: Self::SCHEMA_VERSION,
            firm_name: firm_name.to_string(),
            last_page,
            reviews,
            strategy: Some(strategy.to_string()),
            saved_at: Utc::now(),
        }
    }
}

impl Snapshot for HarvestCheckpoint {
    const KIND: &'static str = "harvest";
    const SCHEMA_VERSION: u32 = 1;
}

/// Processing progress for one firm: the stage to run next, how many batches
/// of that stage are already done, and the whole working set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineCheckpoint {
    pub schema_version: u32,
    pub firm_name: String,
    pub stage: Stage,
    pub cursor: usize,
    pub reviews: Vec<ProcessedReview>,
    #[serde(default)]
    pub topics: Vec<TopicDescriptor>,
    pub saved_at: DateTime<Utc>,
}

impl PipelineCheckpoint {
    pub fn new(
        firm_name: &str,
        stage: Stage,
        cursor: usize,
        reviews: &[ProcessedReview],
        topics: &[TopicDescriptor],
    ) -> Self {
        Self {
            schema_version: Self::SCHEMA_VERSION,
            firm_name: firm_name.to_string(),
            stage,
            cursor,
            reviews: reviews.to_vec(),
            topics: topics.to_vec(),
            saved_at: Utc::now(),
        }
    }
}

impl Snapshot for PipelineCheckpoint {
    const KIND: &'static str = "pipeline";
    const SCHEMA_VERSION: u32 = 1;
}

/// Directory-backed store for one checkpoint kind.
#[derive(Debug, Clone)]
pub struct CheckpointStore<T> {
    dir: PathBuf,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Snapshot> CheckpointStore<T> {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _kind: PhantomData,
        }
    }

    pub fn path_for(&self, firm_name: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{}.json", safe_file_name(firm_name), T::KIND))
    }

    pub fn exists(&self, firm_name: &str) -> bool {
        self.path_for(firm_name).exists()
    }

    pub fn load(&self, firm_name: &str) -> Result<Option<T>, CheckpointError> {
        let path = self.path_for(firm_name);
        let raw: Option<serde_json::Value> =
            load_json(&path).map_err(|source| CheckpointError::Io {
                path: path.clone(),
                source,
            })?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let version = raw.get("schema_version").and_then(|v| v.as_u64());
        if version != Some(T::SCHEMA_VERSION as u64) {
            warn!(
                firm = %firm_name,
                kind = T::KIND,
                found = ?version,
                expected = T::SCHEMA_VERSION,
                "Discarding checkpoint with unknown schema version"
            );
            return Ok(None);
        }

        Ok(Some(serde_json::from_value(raw)?))
    }

    pub fn save(&self, firm_name: &str, snapshot: &T) -> Result<(), CheckpointError> {
        let path = self.path_for(firm_name);
        save_json_atomic(snapshot, &path).map_err(|source| CheckpointError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(firm = %firm_name, kind = T::KIND, "Saved checkpoint");
        Ok(())
    }

    pub fn delete(&self, firm_name: &str) -> Result<(), CheckpointError> {
        let path = self.path_for(firm_name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(firm = %firm_name, kind = T::KIND, "Cleared checkpoint");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CheckpointError::Io { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::review;

    #[test]
    fn harvest_checkpoint_save_load_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::<HarvestCheckpoint>::new(tmp.path());
        let snapshot = HarvestCheckpoint::new("Acme Corp", 5, vec![review("r1", "hello there")], "direct");

        store.save("Acme Corp", &snapshot).unwrap();
        assert!(store.path_for("Acme Corp").ends_with("Acme_Corp_harvest.json"));
        assert_eq!(store.load("Acme Corp").unwrap(), Some(snapshot));

        store.delete("Acme Corp").unwrap();
        assert!(store.load("Acme Corp").unwrap().is_none());
        // deleting twice is fine
        store.delete("Acme Corp").unwrap();
    }

    #[test]
    fn kinds_do_not_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let harvest = CheckpointStore::<HarvestCheckpoint>::new(tmp.path());
        let pipeline = CheckpointStore::<PipelineCheckpoint>::new(tmp.path());
        assert_ne!(harvest.path_for("Acme"), pipeline.path_for("Acme"));
    }

    #[test]
    fn unknown_schema_version_is_discarded() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::<HarvestCheckpoint>::new(tmp.path());
        let mut snapshot = HarvestCheckpoint::new("Acme", 1, vec![], "direct");
        snapshot.schema_version = 99;
        store.save("Acme", &snapshot).unwrap();

        assert!(store.load("Acme").unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::<HarvestCheckpoint>::new(tmp.path());
        std::fs::write(store.path_for("Acme"), b"{not json").unwrap();
        assert!(store.load("Acme").is_err());
    }
}
