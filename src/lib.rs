pub mod batch_queue;
pub mod browser_client;
pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod crawl_client;
pub mod direct_client;
pub mod embeddings;
pub mod error;
pub mod fetch;
pub mod harvest;
pub mod inference_client;
pub mod logging;
pub mod models;
pub mod mongodb;
pub mod nlp;
pub mod parser;
pub mod pipeline;
pub mod proxy_manager;
pub mod rate_limit;
pub mod storage;
pub mod utils;
pub mod validator;

// Re-export main types
pub use batch_queue::{BatchQueue, FirmWork, ProcessingBatch};
pub use catalog::{select_firms, Category, CategoryFilter, FirmEntry};
pub use checkpoint::{CheckpointStore, HarvestCheckpoint, PipelineCheckpoint};
pub use config::{HarvestConfig, MongoSettings, PipelineConfig};
pub use fetch::{FetchContext, FetchStrategy};
pub use harvest::{standard_strategies, HarvestOrchestrator, RunReport};
pub use models::{FirmInfo, FirmResult, ProcessedReview, Review, ReviewPage, TopicDescriptor};
pub use nlp::Collaborators;
pub use pipeline::{PipelineOrchestrator, PipelineReport, Stage};
pub use proxy_manager::{HttpProbe, ProxyHandle, ProxyPool, ProxyProbe};
pub use rate_limit::RateLimiter;
pub use storage::{MemoryStore, ReviewStore};
