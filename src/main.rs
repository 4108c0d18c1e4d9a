use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use review_harvester::catalog::{select_firms, CategoryFilter};
use review_harvester::config::{ensure_writable_dir, HarvestConfig, MongoSettings, PipelineConfig};
use review_harvester::error::ConfigError;
use review_harvester::fetch::FetchContext;
use review_harvester::harvest::{standard_strategies, HarvestOrchestrator};
use review_harvester::inference_client::InferenceClient;
use review_harvester::logging::init_tracing;
use review_harvester::mongodb::MongoStore;
use review_harvester::nlp::Collaborators;
use review_harvester::pipeline::PipelineOrchestrator;
use review_harvester::proxy_manager::{HttpProbe, ProxyPool};
use review_harvester::rate_limit::RateLimiter;
use review_harvester::storage::{MemoryStore, ReviewStore};
use review_harvester::BatchQueue;

#[derive(Parser)]
#[command(name = "review_harvester")]
#[command(about = "Harvest firm reviews and run them through the processing pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape review pages for the selected firms
    Harvest {
        /// forex, futures or all
        #[arg(long, env = "HARVEST_CATEGORY", default_value = "all")]
        category: CategoryFilter,

        /// Explicit firm names (overrides --category)
        #[arg(long, num_args = 1..)]
        firms: Vec<String>,

        /// Stop after this many firms
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Validate, enrich, embed and store every saved firm capture
    Process {
        /// Use an in-memory store instead of MongoDB
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Harvest {
            category,
            firms,
            limit,
        } => harvest(category, &firms, limit).await,
        Commands::Process { dry_run } => process(dry_run).await,
    }
}

async fn harvest(category: CategoryFilter, names: &[String], limit: Option<usize>) -> Result<()> {
    let config = HarvestConfig::from_env()?;
    config.ensure_dirs()?;

    let firms = select_firms(names, category, limit);
    if firms.is_empty() {
        return Err(ConfigError::NoFirms.into());
    }
    info!(firms = firms.len(), "Selected firms");

    let pool = if config.proxy.enabled {
        let pool = ProxyPool::new(Arc::new(HttpProbe::new(config.proxy.clone())));
        pool.load(&config.proxy.list_path)?;
        pool.validate_all().await;
        pool
    } else {
        info!("Proxy rotation disabled");
        ProxyPool::disabled()
    };
    let pool = Arc::new(pool);
    let limiter = Arc::new(RateLimiter::per_second(config.max_requests_per_second));

    let ctx = FetchContext::from_config(&config, pool.clone(), limiter.clone());
    let strategies = standard_strategies(&config, ctx).context("failed to set up fetch strategies")?;
    let orchestrator = HarvestOrchestrator::new(config, strategies, pool, limiter);

    let report = orchestrator.run(&firms).await;
    report.print_summary();
    Ok(())
}

async fn process(dry_run: bool) -> Result<()> {
    let config = PipelineConfig::from_env()?;
    ensure_writable_dir(&config.checkpoint_dir)?;

    let store: Arc<dyn ReviewStore> = if dry_run {
        info!("Dry run, results stay in memory");
        Arc::new(MemoryStore::new())
    } else {
        let settings = MongoSettings::from_env()?;
        Arc::new(MongoStore::from_settings(&settings).await.context("failed to connect to MongoDB")?)
    };
    store.initialize().await.context("failed to initialize storage")?;

    let collaborators = match &config.inference_url {
        Some(url) => InferenceClient::new(url, config.embedding_dim)
            .context("failed to set up inference client")?
            .into_collaborators(),
        None => {
            info!("INFERENCE_URL not set, using local collaborators");
            Collaborators::local(config.embedding_dim)
        }
    };

    let queue = BatchQueue::new(&config.parsed_data_dir, config.queue_batch_size, store.clone());
    let mut orchestrator = PipelineOrchestrator::new(config, collaborators, store);

    let report = orchestrator.run(&queue).await;
    report.print_summary();
    Ok(())
}
