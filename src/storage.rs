//! Storage seam for processed reviews, topics and the processing queue.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::models::{ProcessedReview, TopicDescriptor, PROCESSING_VERSION};
use crate::nlp::OUTLIER_TOPIC;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Processing,
    Completed,
    Failed,
}

/// One row of the processing queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_id: String,
    pub firm_name: String,
    pub status: BatchStatus,
    pub total_reviews: u32,
    pub processed_reviews: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Create collections and indexes. Safe to call on every run.
    async fn initialize(&self) -> Result<(), StorageError>;

    async fn create_batch(&self, batch_id: &str, firm_name: &str, total: usize) -> Result<(), StorageError>;

    async fn record_batch_progress(&self, batch_id: &str, processed: usize) -> Result<(), StorageError>;

    /// Close a batch; `error` marks it failed.
    async fn finish_batch(&self, batch_id: &str, error: Option<&str>) -> Result<(), StorageError>;

    /// Insert or overwrite by `review_id`. Returns how many were written.
    async fn upsert_reviews(&self, reviews: &[ProcessedReview]) -> Result<usize, StorageError>;

    /// Replace the firm's topic set. The outlier topic is never stored.
    async fn insert_topics(&self, firm_name: &str, topics: &[TopicDescriptor]) -> Result<usize, StorageError>;
}

/// Copy of `review` as it is written: stamped with the write time and the
/// current record layout.
pub fn stamped(review: &ProcessedReview, now: DateTime<Utc>) -> ProcessedReview {
    let mut out = review.clone();
    out.processed_at = Some(now);
    out.processing_version = PROCESSING_VERSION.to_string();
    out
}

pub fn storable_topics(topics: &[TopicDescriptor]) -> impl Iterator<Item = &TopicDescriptor> {
    topics.iter().filter(|t| t.topic_id != OUTLIER_TOPIC)
}

#[derive(Default)]
struct MemoryState {
    reviews: BTreeMap<String, ProcessedReview>,
    topics: BTreeMap<String, Vec<TopicDescriptor>>,
    batches: BTreeMap<String, BatchRecord>,
    upsert_calls: usize,
}

/// In-process store used by `process --dry-run` and by tests.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn review_count(&self) -> usize {
        self.lock().reviews.len()
    }

    pub fn review(&self, review_id: &str) -> Option<ProcessedReview> {
        self.lock().reviews.get(review_id).cloned()
    }

    pub fn reviews_for(&self, firm_name: &str) -> Vec<ProcessedReview> {
        self.lock()
            .reviews
            .values()
            .filter(|r| r.firm_name == firm_name)
            .cloned()
            .collect()
    }

    pub fn topics(&self, firm_name: &str) -> Vec<TopicDescriptor> {
        self.lock().topics.get(firm_name).cloned().unwrap_or_default()
    }

    pub fn batch(&self, batch_id: &str) -> Option<BatchRecord> {
        self.lock().batches.get(batch_id).cloned()
    }

    pub fn batches(&self) -> Vec<BatchRecord> {
        self.lock().batches.values().cloned().collect()
    }

    pub fn upsert_calls(&self) -> usize {
        self.lock().upsert_calls
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn initialize(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn create_batch(&self, batch_id: &str, firm_name: &str, total: usize) -> Result<(), StorageError> {
        let now = Utc::now();
        self.lock().batches.insert(
            batch_id.to_string(),
            BatchRecord {
                batch_id: batch_id.to_string(),
                firm_name: firm_name.to_string(),
                status: BatchStatus::Processing,
                total_reviews: total as u32,
                processed_reviews: 0,
                error_message: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn record_batch_progress(&self, batch_id: &str, processed: usize) -> Result<(), StorageError> {
        let mut state = self.lock();
        let record = state
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| StorageError::Unavailable(format!("unknown batch {}", batch_id)))?;
        record.processed_reviews = processed as u32;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn finish_batch(&self, batch_id: &str, error: Option<&str>) -> Result<(), StorageError> {
        let mut state = self.lock();
        let record = state
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| StorageError::Unavailable(format!("unknown batch {}", batch_id)))?;
        record.status = if error.is_some() {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        };
        record.error_message = error.map(str::to_string);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn upsert_reviews(&self, reviews: &[ProcessedReview]) -> Result<usize, StorageError> {
        let now = Utc::now();
        let mut state = self.lock();
        state.upsert_calls += 1;
        for review in reviews {
            state.reviews.insert(review.review_id.clone(), stamped(review, now));
        }
        Ok(reviews.len())
    }

    async fn insert_topics(&self, firm_name: &str, topics: &[TopicDescriptor]) -> Result<usize, StorageError> {
        let kept: Vec<TopicDescriptor> = storable_topics(topics).cloned().collect();
        let count = kept.len();
        self.lock().topics.insert(firm_name.to_string(), kept);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::review;

    fn topic(id: i32) -> TopicDescriptor {
        TopicDescriptor {
            topic_id: id,
            topic_name: format!("{}_t", id),
            keywords: vec![],
            representative_docs: vec![],
            count: 1,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_keeps_latest() {
        let store = MemoryStore::new();
        let mut r = ProcessedReview::from_raw("Acme", &review("1", "first version"));
        store.upsert_reviews(&[r.clone()]).await.unwrap();

        r.content = "second version".to_string();
        store.upsert_reviews(&[r.clone()]).await.unwrap();

        assert_eq!(store.review_count(), 1);
        let stored = store.review("Acme_1").unwrap();
        assert_eq!(stored.content, "second version");
        assert!(stored.processed_at.is_some());
        assert_eq!(stored.processing_version, PROCESSING_VERSION);
    }

    #[tokio::test]
    async fn topics_replace_and_skip_outliers() {
        let store = MemoryStore::new();
        store.insert_topics("Acme", &[topic(0), topic(1)]).await.unwrap();
        let stored = store.insert_topics("Acme", &[topic(-1), topic(2)]).await.unwrap();

        assert_eq!(stored, 1);
        let ids: Vec<i32> = store.topics("Acme").iter().map(|t| t.topic_id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn batch_lifecycle() {
        let store = MemoryStore::new();
        store.create_batch("Acme_20240301_120000", "Acme", 250).await.unwrap();
        store.record_batch_progress("Acme_20240301_120000", 100).await.unwrap();
        store.finish_batch("Acme_20240301_120000", None).await.unwrap();

        let record = store.batch("Acme_20240301_120000").unwrap();
        assert_eq!(record.processed_reviews, 100);
        assert_eq!(record.status, BatchStatus::Completed);
        assert!(store.record_batch_progress("missing", 1).await.is_err());
    }
}
