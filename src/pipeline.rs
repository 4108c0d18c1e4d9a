//! The processing pipeline: validation → enrichment → topic modeling →
//! embedding → storage, one firm at a time.
//!
//! Each firm's progress lives in one [`PipelineCheckpoint`]: the stage to run
//! next, how many batches of that stage are done, and the working set. The
//! batched stages (enrichment, embedding, storage) save a checkpoint every
//! `checkpoint_every_batches` batches and on their last batch, so a restart
//! picks up at the first batch that was not yet saved. Validation and topic
//! modeling are rerun whole.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::batch_queue::{slice_ranges, BatchQueue, ProcessingBatch};
use crate::checkpoint::{CheckpointStore, PipelineCheckpoint};
use crate::config::PipelineConfig;
use crate::embeddings::{normalize, HashingEmbedder};
use crate::error::{PipelineError, StorageError};
use crate::models::{ProcessedReview, TopicDescriptor};
use crate::nlp::{prune_distribution, Collaborators, Embedder, OUTLIER_TOPIC};
use crate::storage::ReviewStore;
use crate::validator::Validator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validation,
    Enrichment,
    TopicModeling,
    Embedding,
    Storage,
    Done,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Validation => "validation",
            Stage::Enrichment => "enrichment",
            Stage::TopicModeling => "topic_modeling",
            Stage::Embedding => "embedding",
            Stage::Storage => "storage",
            Stage::Done => "done",
        }
    }

    pub fn next(self) -> Stage {
        match self {
            Stage::Validation => Stage::Enrichment,
            Stage::Enrichment => Stage::TopicModeling,
            Stage::TopicModeling => Stage::Embedding,
            Stage::Embedding => Stage::Storage,
            Stage::Storage | Stage::Done => Stage::Done,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a firm's run ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmOutcome {
    pub firm_name: String,
    pub final_stage: Stage,
    pub resumed_from: Option<Stage>,
    pub total_reviews: usize,
    pub valid_reviews: usize,
    pub topics: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub firms: Vec<FirmOutcome>,
}

impl PipelineReport {
    pub fn completed(&self) -> usize {
        self.firms.iter().filter(|f| f.final_stage == Stage::Done).count()
    }

    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(70));
        println!("PROCESSING SUMMARY");
        println!("{}", "=".repeat(70));
        println!("Firms:             {}", self.firms.len());
        println!("Completed:         {}", self.completed());
        println!(
            "Valid reviews:     {} / {}",
            self.firms.iter().map(|f| f.valid_reviews).sum::<usize>(),
            self.firms.iter().map(|f| f.total_reviews).sum::<usize>()
        );
        println!("Duration:          {:.1} min", self.duration_secs / 60.0);

        println!("\nPer firm:");
        for firm in &self.firms {
            let mark = if firm.final_stage == Stage::Done { "✓" } else { "✗" };
            println!(
                "  {} {:<20} {:>6}/{:<6} valid  {:>3} topics  {}",
                mark,
                firm.firm_name,
                firm.valid_reviews,
                firm.total_reviews,
                firm.topics,
                firm.final_stage
            );
            if let Some(error) = &firm.error {
                println!("      error: {}", error);
            }
        }
        println!("{}", "=".repeat(70));
    }
}

pub struct PipelineOrchestrator {
    config: PipelineConfig,
    collaborators: Collaborators,
    store: Arc<dyn ReviewStore>,
    checkpoints: CheckpointStore<PipelineCheckpoint>,
    validator: Validator,
    fallback: HashingEmbedder,
    storage_backoff: Duration,
}

impl PipelineOrchestrator {
    pub fn new(config: PipelineConfig, collaborators: Collaborators, store: Arc<dyn ReviewStore>) -> Self {
        let validator = Validator::new(collaborators.language.clone(), config.primary_language.clone());
        Self {
            checkpoints: CheckpointStore::new(config.checkpoint_dir.clone()),
            fallback: HashingEmbedder::new(config.embedding_dim),
            validator,
            collaborators,
            store,
            config,
            storage_backoff: Duration::from_secs(1),
        }
    }

    /// Pause between storage retries, multiplied by the attempt number.
    pub fn with_storage_backoff(mut self, backoff: Duration) -> Self {
        self.storage_backoff = backoff;
        self
    }

    pub fn checkpoints(&self) -> &CheckpointStore<PipelineCheckpoint> {
        &self.checkpoints
    }

    /// Process every pending capture. A firm that fails keeps its checkpoint
    /// and the run moves on to the next one.
    pub async fn run(&mut self, queue: &BatchQueue) -> PipelineReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let pending = queue.pending(&self.checkpoints);
        info!(firms = pending.len(), "Starting processing pipeline");

        let mut firms = Vec::with_capacity(pending.len());
        for work in pending {
            let batch = queue.open(&work).await;
            let total = work.reviews.len();

            match self.process_firm(&work.firm_name, work.reviews, Some(&batch)).await {
                Ok(outcome) => {
                    batch.finish(self.store.as_ref(), None).await;
                    firms.push(outcome);
                }
                Err(e) => {
                    error!(firm = %work.firm_name, error = %e, "Processing failed");
                    batch.finish(self.store.as_ref(), Some(&e.to_string())).await;
                    let stage = self
                        .checkpoints
                        .load(&work.firm_name)
                        .ok()
                        .flatten()
                        .map(|cp| cp.stage)
                        .unwrap_or(Stage::Validation);
                    firms.push(FirmOutcome {
                        firm_name: work.firm_name,
                        final_stage: stage,
                        resumed_from: None,
                        total_reviews: total,
                        valid_reviews: 0,
                        topics: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        info!("Pipeline processing completed");
        PipelineReport {
            started_at,
            duration_secs: start.elapsed().as_secs_f64(),
            firms,
        }
    }

    /// Carry one firm through the remaining stages. `reviews` is only used
    /// when no checkpoint exists; otherwise the checkpointed working set wins.
    pub async fn process_firm(
        &mut self,
        firm_name: &str,
        reviews: Vec<ProcessedReview>,
        batch: Option<&ProcessingBatch>,
    ) -> Result<FirmOutcome, PipelineError> {
        let (mut stage, mut cursor, mut working, mut topics, resumed_from) =
            match self.checkpoints.load(firm_name) {
                Ok(Some(cp)) => {
                    info!(firm = %firm_name, stage = %cp.stage, cursor = cp.cursor, "Resuming from checkpoint");
                    (cp.stage, cp.cursor, cp.reviews, cp.topics, Some(cp.stage))
                }
                Ok(None) => (Stage::Validation, 0, reviews, Vec::new(), None),
                Err(e) => {
                    warn!(firm = %firm_name, error = %e, "Unreadable checkpoint, starting from validation");
                    (Stage::Validation, 0, reviews, Vec::new(), None)
                }
            };
        let total = working.len();
        info!(firm = %firm_name, reviews = total, stage = %stage, "Processing firm");

        while stage != Stage::Done {
            match stage {
                Stage::Validation => {
                    self.validator.reset();
                    self.validator.validate_all(&mut working);
                }
                Stage::Enrichment => self.enrich(firm_name, &mut working, cursor, &topics).await?,
                Stage::TopicModeling => {
                    topics = self.model_topics(firm_name, &mut working).await;
                    if let Err(source) = self.store_topics(firm_name, &topics).await {
                        self.save(firm_name, Stage::TopicModeling, 0, &working, &[])?;
                        return Err(PipelineError::Storage {
                            stage: Stage::TopicModeling.name(),
                            source,
                        });
                    }
                }
                Stage::Embedding => self.embed(firm_name, &mut working, cursor, &topics).await?,
                Stage::Storage => self.store_reviews(firm_name, &working, cursor, &topics, batch).await?,
                Stage::Done => {}
            }

            stage = stage.next();
            cursor = 0;
            if stage != Stage::Done {
                self.save(firm_name, stage, cursor, &working, &topics)?;
            }
        }

        self.checkpoints.delete(firm_name)?;
        let valid = working.iter().filter(|r| r.is_valid).count();
        info!(firm = %firm_name, valid, total, topics = topics.len(), "Finished processing firm");

        Ok(FirmOutcome {
            firm_name: firm_name.to_string(),
            final_stage: Stage::Done,
            resumed_from,
            total_reviews: total,
            valid_reviews: valid,
            topics: topics.len(),
            error: None,
        })
    }

    fn save(
        &self,
        firm_name: &str,
        stage: Stage,
        cursor: usize,
        working: &[ProcessedReview],
        topics: &[TopicDescriptor],
    ) -> Result<(), PipelineError> {
        let snapshot = PipelineCheckpoint::new(firm_name, stage, cursor, working, topics);
        self.checkpoints.save(firm_name, &snapshot)?;
        Ok(())
    }

    /// Whether a checkpoint is due after finishing batch `index` of `count`.
    fn checkpoint_due(&self, index: usize, count: usize) -> bool {
        (index + 1) % self.config.checkpoint_every_batches == 0 || index + 1 == count
    }

    async fn enrich(
        &self,
        firm_name: &str,
        working: &mut [ProcessedReview],
        cursor: usize,
        topics: &[TopicDescriptor],
    ) -> Result<(), PipelineError> {
        let size = self.config.nlp_batch_size;
        let count = working.len().div_ceil(size);
        if cursor > 0 {
            info!(firm = %firm_name, cursor, batches = count, "Enrichment resuming");
        }

        for (index, range) in slice_ranges(working.len(), size, cursor) {
            info!(firm = %firm_name, batch = index + 1, batches = count, "Enrichment batch");
            for review in working[range].iter_mut().filter(|r| r.is_valid) {
                self.collaborators.enrich(review).await;
            }
            if self.checkpoint_due(index, count) {
                self.save(firm_name, Stage::Enrichment, index + 1, working, topics)?;
            }
        }
        Ok(())
    }

    async fn model_topics(&self, firm_name: &str, working: &mut [ProcessedReview]) -> Vec<TopicDescriptor> {
        let documents: Vec<String> = working
            .iter()
            .filter(|r| r.is_valid)
            .map(|r| r.content.clone())
            .collect();

        for review in working.iter_mut() {
            review.primary_topic_id = Some(OUTLIER_TOPIC);
            review.topic_distribution.clear();
        }

        if documents.len() < self.config.min_topic_corpus {
            info!(
                firm = %firm_name,
                documents = documents.len(),
                minimum = self.config.min_topic_corpus,
                "Too few valid reviews for topic modeling"
            );
            return Vec::new();
        }

        let model = match self.collaborators.topics.fit(&documents).await {
            Ok(model) if model.assignments.len() == documents.len() => model,
            Ok(model) => {
                warn!(
                    firm = %firm_name,
                    assignments = model.assignments.len(),
                    documents = documents.len(),
                    "Topic model output does not line up with its input"
                );
                return Vec::new();
            }
            Err(e) => {
                warn!(firm = %firm_name, error = %e, "Topic modeling failed");
                return Vec::new();
            }
        };

        let valid = working.iter_mut().filter(|r| r.is_valid);
        for (review, assignment) in valid.zip(model.assignments) {
            review.primary_topic_id = Some(assignment.topic_id);
            review.topic_distribution = prune_distribution(assignment.distribution);
        }

        info!(firm = %firm_name, topics = model.topics.len(), "Topic modeling complete");
        model.topics
    }

    async fn store_topics(&self, firm_name: &str, topics: &[TopicDescriptor]) -> Result<(), StorageError> {
        let mut last_error = None;
        for attempt in 1..=self.config.storage_retries {
            match self.store.insert_topics(firm_name, topics).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(firm = %firm_name, attempt, error = %e, "Storing topics failed");
                    last_error = Some(e);
                    if attempt < self.config.storage_retries {
                        tokio::time::sleep(self.storage_backoff * attempt).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| StorageError::Unavailable("no attempt made".to_string())))
    }

    async fn embed(
        &self,
        firm_name: &str,
        working: &mut [ProcessedReview],
        cursor: usize,
        topics: &[TopicDescriptor],
    ) -> Result<(), PipelineError> {
        let size = self.config.nlp_batch_size;
        let count = working.len().div_ceil(size);

        for (index, range) in slice_ranges(working.len(), size, cursor) {
            info!(firm = %firm_name, batch = index + 1, batches = count, "Embedding batch");
            self.embed_batch(firm_name, &mut working[range]).await;
            if self.checkpoint_due(index, count) {
                self.save(firm_name, Stage::Embedding, index + 1, working, topics)?;
            }
        }
        Ok(())
    }

    /// Valid reviews get a unit vector, invalid ones the zero vector.
    async fn embed_batch(&self, firm_name: &str, batch: &mut [ProcessedReview]) {
        let dim = self.config.embedding_dim;
        let texts: Vec<String> = batch
            .iter()
            .filter(|r| r.is_valid)
            .map(|r| r.content.clone())
            .collect();

        let mut vectors = if texts.is_empty() {
            Vec::new()
        } else {
            match self.collaborators.embedder.embed(&texts).await {
                Ok(vectors) if vectors.len() == texts.len() => vectors,
                Ok(vectors) => {
                    warn!(firm = %firm_name, got = vectors.len(), expected = texts.len(), "Embedder returned wrong count");
                    Vec::new()
                }
                Err(e) => {
                    warn!(firm = %firm_name, error = %e, "Embedding failed, using hashing fallback");
                    Vec::new()
                }
            }
        };
        if vectors.is_empty() && !texts.is_empty() {
            vectors = match self.fallback.embed(&texts).await {
                Ok(vectors) => vectors,
                Err(_) => texts.iter().map(|t| self.fallback.embed_one(t)).collect(),
            };
        }

        let mut vectors = vectors.into_iter().zip(texts.iter());
        for review in batch.iter_mut() {
            if !review.is_valid {
                review.embedding = Some(vec![0.0; dim]);
                continue;
            }
            let Some((mut vector, text)) = vectors.next() else {
                review.embedding = Some(self.fallback.embed_one(&review.content));
                continue;
            };
            if vector.len() != dim || !normalize(&mut vector) {
                vector = self.fallback.embed_one(text);
            }
            review.embedding = Some(vector);
        }
    }

    async fn store_reviews(
        &self,
        firm_name: &str,
        working: &[ProcessedReview],
        cursor: usize,
        topics: &[TopicDescriptor],
        batch: Option<&ProcessingBatch>,
    ) -> Result<(), PipelineError> {
        // the queue's slicing when a processing batch is open
        let (count, slices): (usize, Vec<(usize, Range<usize>)>) = match batch {
            Some(batch) => (batch.slice_count(working.len()), batch.slices(working.len(), cursor).collect()),
            None => {
                let size = self.config.queue_batch_size;
                (working.len().div_ceil(size), slice_ranges(working.len(), size, cursor).collect())
            }
        };

        for (index, range) in slices {
            let stored_through = range.end;
            if let Err(source) = self.upsert_with_retry(firm_name, &working[range]).await {
                error!(firm = %firm_name, batch = index + 1, batches = count, "Storage failed, keeping checkpoint");
                self.save(firm_name, Stage::Storage, index, working, topics)?;
                return Err(PipelineError::Storage {
                    stage: Stage::Storage.name(),
                    source,
                });
            }
            if let Some(batch) = batch {
                batch.record(self.store.as_ref(), stored_through).await;
            }
            if self.checkpoint_due(index, count) && index + 1 < count {
                self.save(firm_name, Stage::Storage, index + 1, working, topics)?;
            }
        }
        info!(firm = %firm_name, reviews = working.len(), "Stored reviews");
        Ok(())
    }

    async fn upsert_with_retry(&self, firm_name: &str, reviews: &[ProcessedReview]) -> Result<(), StorageError> {
        let mut last_error = None;
        for attempt in 1..=self.config.storage_retries {
            match self.store.upsert_reviews(reviews).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(firm = %firm_name, attempt, error = %e, "Upsert failed");
                    last_error = Some(e);
                    if attempt < self.config.storage_retries {
                        tokio::time::sleep(self.storage_backoff * attempt).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| StorageError::Unavailable("no attempt made".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::is_unit;
    use crate::error::CollaboratorError;
    use crate::models::fixtures::review;
    use crate::models::ValidationFlag;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            checkpoint_dir: dir.join("checkpoints"),
            parsed_data_dir: dir.join("parsed"),
            nlp_batch_size: 2,
            queue_batch_size: 3,
            embedding_dim: 16,
            min_topic_corpus: 2,
            ..PipelineConfig::default()
        }
    }

    fn reviews(contents: &[&str]) -> Vec<ProcessedReview> {
        contents
            .iter()
            .enumerate()
            .map(|(i, c)| ProcessedReview::from_raw("Acme", &review(&i.to_string(), c)))
            .collect()
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn dimension(&self) -> usize {
            16
        }
        async fn embed(&self, _: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
            Err(CollaboratorError::InvalidOutput("model not loaded".into()))
        }
    }

    struct WrongDimension;

    #[async_trait]
    impl Embedder for WrongDimension {
        fn dimension(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
    }

    /// Lets `budget` upserts through, then fails until topped up.
    struct FlakyStore {
        inner: MemoryStore,
        budget: AtomicUsize,
    }

    #[async_trait]
    impl ReviewStore for FlakyStore {
        async fn initialize(&self) -> Result<(), StorageError> {
            Ok(())
        }
        async fn create_batch(&self, id: &str, firm: &str, total: usize) -> Result<(), StorageError> {
            self.inner.create_batch(id, firm, total).await
        }
        async fn record_batch_progress(&self, id: &str, processed: usize) -> Result<(), StorageError> {
            self.inner.record_batch_progress(id, processed).await
        }
        async fn finish_batch(&self, id: &str, error: Option<&str>) -> Result<(), StorageError> {
            self.inner.finish_batch(id, error).await
        }
        async fn upsert_reviews(&self, reviews: &[ProcessedReview]) -> Result<usize, StorageError> {
            let left = self.budget.load(Ordering::SeqCst);
            if left == 0 {
                return Err(StorageError::Unavailable("connection refused".into()));
            }
            self.budget.store(left - 1, Ordering::SeqCst);
            self.inner.upsert_reviews(reviews).await
        }
        async fn insert_topics(&self, firm: &str, topics: &[TopicDescriptor]) -> Result<usize, StorageError> {
            self.inner.insert_topics(firm, topics).await
        }
    }

    const CONTENTS: [&str; 5] = [
        "Payout was quick and support was helpful",
        "buy now http://x.co",
        "Withdrawal took two days, support team answered fast",
        "Platform crashed twice during news, very frustrating",
        "ok",
    ];

    #[test]
    fn stages_advance_in_order() {
        let mut stage = Stage::Validation;
        let mut seen = vec![stage];
        while stage != Stage::Done {
            stage = stage.next();
            seen.push(stage);
        }
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[2].name(), "topic_modeling");
        assert_eq!(serde_json::to_string(&Stage::TopicModeling).unwrap(), "\"topic_modeling\"");
    }

    #[tokio::test]
    async fn full_run_stores_every_review_and_clears_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut orchestrator = PipelineOrchestrator::new(config(tmp.path()), Collaborators::local(16), store.clone());

        let outcome = orchestrator.process_firm("Acme", reviews(&CONTENTS), None).await.unwrap();

        assert_eq!(outcome.final_stage, Stage::Done);
        assert_eq!(outcome.total_reviews, 5);
        assert_eq!(outcome.valid_reviews, 3);
        assert!(!orchestrator.checkpoints().exists("Acme"));
        assert_eq!(store.review_count(), 5);

        let spam = store.review("Acme_1").unwrap();
        assert!(spam.validation_flags.contains(&ValidationFlag::Spam));
        assert_eq!(spam.embedding, Some(vec![0.0; 16]));
        assert_eq!(spam.sentiment_label, None);

        let good = store.review("Acme_0").unwrap();
        assert!(is_unit(good.embedding.as_ref().unwrap()));
        assert_eq!(good.sentiment_label.as_deref(), Some("neutral"));
        assert!(good.primary_topic_id.is_some());
        assert!(store.topics("Acme").iter().all(|t| t.topic_id != OUTLIER_TOPIC));
    }

    #[tokio::test]
    async fn small_corpus_skips_topic_modeling() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            min_topic_corpus: 20,
            ..config(tmp.path())
        };
        let store = Arc::new(MemoryStore::new());
        let mut orchestrator = PipelineOrchestrator::new(config, Collaborators::local(16), store.clone());

        let outcome = orchestrator.process_firm("Acme", reviews(&CONTENTS), None).await.unwrap();

        assert_eq!(outcome.topics, 0);
        for r in store.reviews_for("Acme") {
            assert_eq!(r.primary_topic_id, Some(OUTLIER_TOPIC));
            assert!(r.topic_distribution.is_empty());
        }
    }

    #[tokio::test]
    async fn embedder_failures_fall_back_to_unit_vectors() {
        let embedders: [Arc<dyn Embedder>; 2] = [Arc::new(BrokenEmbedder), Arc::new(WrongDimension)];
        for embedder in embedders {
            let tmp = tempfile::tempdir().unwrap();
            let store = Arc::new(MemoryStore::new());
            let collaborators = Collaborators {
                embedder,
                ..Collaborators::local(16)
            };
            let mut orchestrator = PipelineOrchestrator::new(config(tmp.path()), collaborators, store.clone());
            orchestrator.process_firm("Acme", reviews(&CONTENTS), None).await.unwrap();

            for r in store.reviews_for("Acme") {
                let v = r.embedding.unwrap();
                assert_eq!(v.len(), 16);
                if r.is_valid {
                    assert!(is_unit(&v));
                } else {
                    assert!(v.iter().all(|x| *x == 0.0));
                }
            }
        }
    }

    #[tokio::test]
    async fn storage_failure_keeps_checkpoint_and_retry_stores_the_rest() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            budget: AtomicUsize::new(1),
        });
        let config = PipelineConfig {
            storage_retries: 2,
            ..config(tmp.path())
        };
        let mut orchestrator = PipelineOrchestrator::new(config, Collaborators::local(16), store.clone())
            .with_storage_backoff(Duration::from_millis(1));

        let mut contents = CONTENTS.to_vec();
        contents.extend(["Sixth review about spreads", "Seventh review about leverage"]);

        // slices of 3, 3 and 1: the first lands, the second never does
        let err = orchestrator.process_firm("Acme", reviews(&contents), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Storage { stage: "storage", .. }));
        assert_eq!(store.inner.review_count(), 3);

        let cp = orchestrator.checkpoints().load("Acme").unwrap().unwrap();
        assert_eq!(cp.stage, Stage::Storage);
        assert_eq!(cp.cursor, 1);

        store.budget.store(10, Ordering::SeqCst);
        let outcome = orchestrator.process_firm("Acme", Vec::new(), None).await.unwrap();

        assert_eq!(outcome.resumed_from, Some(Stage::Storage));
        assert_eq!(store.inner.review_count(), 7);
        assert_eq!(store.inner.upsert_calls(), 3);
        assert!(!orchestrator.checkpoints().exists("Acme"));
    }

    #[tokio::test]
    async fn corrupt_checkpoint_restarts_from_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut orchestrator = PipelineOrchestrator::new(config(tmp.path()), Collaborators::local(16), store.clone());
        let path = orchestrator.checkpoints().path_for("Acme");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{\"schema_version\": 1, \"stage\": ").unwrap();

        let outcome = orchestrator.process_firm("Acme", reviews(&CONTENTS), None).await.unwrap();

        assert_eq!(outcome.resumed_from, None);
        assert_eq!(outcome.final_stage, Stage::Done);
        assert_eq!(store.review_count(), 5);
        assert!(!orchestrator.checkpoints().exists("Acme"));
    }

    #[tokio::test]
    async fn run_processes_captures_and_closes_batches() {
        use crate::models::FirmResult;
        use crate::storage::BatchStatus;
        use crate::utils::save_json_atomic;

        let tmp = tempfile::tempdir().unwrap();
        let config = config(tmp.path());
        let capture = FirmResult {
            firm_name: "Acme".to_string(),
            source_url: "https://example.com/review/acme".to_string(),
            category: None,
            firm: None,
            reviews: CONTENTS.iter().enumerate().map(|(i, c)| review(&i.to_string(), c)).collect(),
            scrape_date: Utc::now(),
            strategy: Some("direct".to_string()),
            total_pages: 1,
            success: true,
            errors: vec![],
        };
        save_json_atomic(&capture, config.parsed_data_dir.join("Acme.json")).unwrap();

        let store = Arc::new(MemoryStore::new());
        // the queue slices by 2 while the config says 3: storage follows the queue
        let queue = BatchQueue::new(&config.parsed_data_dir, 2, store.clone());
        let mut orchestrator = PipelineOrchestrator::new(config, Collaborators::local(16), store.clone());

        let report = orchestrator.run(&queue).await;

        assert_eq!(report.completed(), 1);
        assert_eq!(store.upsert_calls(), 3);
        let batches = store.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].status, BatchStatus::Completed);
        assert_eq!(batches[0].processed_reviews, 5);
    }
}
