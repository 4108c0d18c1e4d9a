use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::checkpoint::{CheckpointStore, PipelineCheckpoint};
use crate::harvest::REPORT_FILE_NAME;
use crate::models::{FirmResult, ProcessedReview};
use crate::storage::ReviewStore;
use crate::utils::load_json;

/// All reviews of one saved firm capture, ready for the pipeline.
#[derive(Debug, Clone)]
pub struct FirmWork {
    pub firm_name: String,
    pub reviews: Vec<ProcessedReview>,
    /// A pipeline checkpoint exists for this firm.
    pub resuming: bool,
}

/// Batch index and row range of every fixed-size batch from `cursor` on.
/// The last batch may be shorter.
pub fn slice_ranges(len: usize, size: usize, cursor: usize) -> impl Iterator<Item = (usize, Range<usize>)> {
    let size = size.max(1);
    (cursor..len.div_ceil(size)).map(move |i| (i, i * size..((i + 1) * size).min(len)))
}

/// A row in the processing queue for one firm run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingBatch {
    pub batch_id: String,
    pub firm_name: String,
    pub total: usize,
    slice_size: usize,
}

impl ProcessingBatch {
    pub fn new(firm_name: &str, total: usize, slice_size: usize) -> Self {
        Self {
            batch_id: format!("{}_{}", firm_name, Utc::now().format("%Y%m%d_%H%M%S")),
            firm_name: firm_name.to_string(),
            total,
            slice_size: slice_size.max(1),
        }
    }

    /// Storage slices of a working set of `len` reviews, from slice `cursor` on.
    pub fn slices(&self, len: usize, cursor: usize) -> impl Iterator<Item = (usize, Range<usize>)> {
        slice_ranges(len, self.slice_size, cursor)
    }

    pub fn slice_count(&self, len: usize) -> usize {
        len.div_ceil(self.slice_size)
    }

    /// Best effort: a failed progress write is logged, never fatal.
    pub async fn record(&self, store: &dyn ReviewStore, processed: usize) {
        if let Err(e) = store.record_batch_progress(&self.batch_id, processed).await {
            warn!(batch_id = %self.batch_id, error = %e, "Failed to record batch progress");
        }
    }

    pub async fn finish(&self, store: &dyn ReviewStore, error: Option<&str>) {
        if let Err(e) = store.finish_batch(&self.batch_id, error).await {
            warn!(batch_id = %self.batch_id, error = %e, "Failed to close batch");
        }
    }
}

/// Reads harvested firm captures and hands them to the pipeline firm by firm.
pub struct BatchQueue {
    parsed_dir: PathBuf,
    batch_size: usize,
    store: Arc<dyn ReviewStore>,
}

impl BatchQueue {
    pub fn new(parsed_dir: impl Into<PathBuf>, batch_size: usize, store: Arc<dyn ReviewStore>) -> Self {
        Self {
            parsed_dir: parsed_dir.into(),
            batch_size: batch_size.max(1),
            store,
        }
    }

    /// Capture files in the parsed directory, sorted by name.
    pub fn capture_files(&self) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(&self.parsed_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.parsed_dir.display(), error = %e, "Cannot read parsed data directory");
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter(|path| path.file_name().is_some_and(|name| name != REPORT_FILE_NAME))
            .collect();
        files.sort();
        files
    }

    /// Load one capture. Unreadable files and captures without reviews give `None`.
    pub fn load_capture(path: &Path) -> Option<FirmWork> {
        let result: FirmResult = match load_json(path) {
            Ok(Some(result)) => result,
            Ok(None) => return None,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Skipping unreadable capture");
                return None;
            }
        };

        if result.reviews.is_empty() {
            info!(firm = %result.firm_name, "Capture has no reviews, skipping");
            return None;
        }

        let reviews: Vec<ProcessedReview> = result
            .reviews
            .iter()
            .map(|r| ProcessedReview::from_raw(&result.firm_name, r))
            .collect();
        info!(firm = %result.firm_name, reviews = reviews.len(), "Loaded capture");

        Some(FirmWork {
            firm_name: result.firm_name,
            reviews,
            resuming: false,
        })
    }

    /// Every capture, firms with a pending pipeline checkpoint first.
    pub fn pending(&self, checkpoints: &CheckpointStore<PipelineCheckpoint>) -> Vec<FirmWork> {
        let (mut resuming, fresh): (Vec<FirmWork>, Vec<FirmWork>) = self
            .capture_files()
            .iter()
            .filter_map(|path| Self::load_capture(path))
            .map(|mut work| {
                work.resuming = checkpoints.exists(&work.firm_name);
                work
            })
            .partition(|work| work.resuming);

        if !resuming.is_empty() {
            info!(firms = resuming.len(), "Resuming firms with pending checkpoints first");
        }
        resuming.extend(fresh);
        resuming
    }

    /// Register a processing batch for `work` in the queue collection.
    pub async fn open(&self, work: &FirmWork) -> ProcessingBatch {
        let batch = ProcessingBatch::new(&work.firm_name, work.reviews.len(), self.batch_size);
        if let Err(e) = self
            .store
            .create_batch(&batch.batch_id, &batch.firm_name, batch.total)
            .await
        {
            warn!(batch_id = %batch.batch_id, error = %e, "Failed to create processing batch");
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::review;
    use crate::pipeline::Stage;
    use crate::storage::{BatchStatus, MemoryStore};
    use crate::utils::save_json_atomic;

    fn capture(firm: &str, count: usize) -> FirmResult {
        FirmResult {
            firm_name: firm.to_string(),
            source_url: format!("https://example.com/review/{}", firm),
            category: None,
            firm: None,
            reviews: (0..count).map(|i| review(&i.to_string(), "Fast payouts and helpful support")).collect(),
            scrape_date: Utc::now(),
            strategy: Some("direct".to_string()),
            total_pages: 1,
            success: true,
            errors: vec![],
        }
    }

    #[test]
    fn report_and_empty_captures_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        save_json_atomic(&capture("Alpha", 3), tmp.path().join("Alpha.json")).unwrap();
        save_json_atomic(&capture("Empty", 0), tmp.path().join("Empty.json")).unwrap();
        std::fs::write(tmp.path().join(REPORT_FILE_NAME), b"{}").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"x").unwrap();

        let queue = BatchQueue::new(tmp.path(), 100, Arc::new(MemoryStore::new()));
        let checkpoints = CheckpointStore::<PipelineCheckpoint>::new(tmp.path().join("cp"));
        let pending = queue.pending(&checkpoints);

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].firm_name, "Alpha");
        assert_eq!(pending[0].reviews[2].review_id, "Alpha_2");
    }

    #[test]
    fn checkpointed_firms_come_first() {
        let tmp = tempfile::tempdir().unwrap();
        save_json_atomic(&capture("Alpha", 1), tmp.path().join("Alpha.json")).unwrap();
        save_json_atomic(&capture("Zeta", 1), tmp.path().join("Zeta.json")).unwrap();

        let checkpoints = CheckpointStore::<PipelineCheckpoint>::new(tmp.path().join("cp"));
        checkpoints
            .save("Zeta", &PipelineCheckpoint::new("Zeta", Stage::Embedding, 0, &[], &[]))
            .unwrap();

        let queue = BatchQueue::new(tmp.path(), 100, Arc::new(MemoryStore::new()));
        let order: Vec<String> = queue.pending(&checkpoints).into_iter().map(|w| w.firm_name).collect();
        assert_eq!(order, vec!["Zeta", "Alpha"]);
    }

    #[tokio::test]
    async fn open_registers_batch_and_slices_split_evenly() {
        let tmp = tempfile::tempdir().unwrap();
        save_json_atomic(&capture("Alpha", 250), tmp.path().join("Alpha.json")).unwrap();

        let store = Arc::new(MemoryStore::new());
        let queue = BatchQueue::new(tmp.path(), 100, store.clone());
        let work = BatchQueue::load_capture(&tmp.path().join("Alpha.json")).unwrap();
        let batch = queue.open(&work).await;

        assert!(batch.batch_id.starts_with("Alpha_"));
        let record = store.batch(&batch.batch_id).unwrap();
        assert_eq!(record.total_reviews, 250);
        assert_eq!(record.status, BatchStatus::Processing);

        let sizes: Vec<usize> = batch.slices(work.reviews.len(), 0).map(|(_, r)| r.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(batch.slice_count(work.reviews.len()), 3);
        let resumed: Vec<usize> = batch.slices(work.reviews.len(), 2).map(|(i, _)| i).collect();
        assert_eq!(resumed, vec![2]);
    }

    #[test]
    fn slice_ranges_start_at_cursor() {
        let ranges: Vec<(usize, Range<usize>)> = slice_ranges(5, 2, 1).collect();
        assert_eq!(ranges, vec![(1, 2..4), (2, 4..5)]);
        assert_eq!(slice_ranges(0, 2, 0).count(), 0);
    }
}
