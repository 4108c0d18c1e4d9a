//! Per-firm harvest state machine.
//!
//! For each firm: metadata once through the cheapest strategy, then pages
//! through the ranked strategies, escalating after repeated failures. Pages
//! are taken strictly in order and only confirmed pages ever reach a
//! checkpoint, so a checkpoint is always a prefix of the final result.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::browser_client::BrowserClient;
use crate::catalog::FirmEntry;
use crate::checkpoint::{CheckpointStore, HarvestCheckpoint};
use crate::config::HarvestConfig;
use crate::crawl_client::CrawlClient;
use crate::direct_client::DirectClient;
use crate::error::FetchError;
use crate::fetch::{FetchContext, FetchStrategy};
use crate::models::{FirmResult, Review};
use crate::proxy_manager::ProxyPool;
use crate::rate_limit::RateLimiter;
use crate::utils::{safe_file_name, save_json_atomic};

pub const REPORT_FILE_NAME: &str = "scraping_report.json";

/// The ranked strategy list: direct, crawl, then browser when a browser
/// service is configured.
pub fn standard_strategies(
    config: &HarvestConfig,
    ctx: FetchContext,
) -> Result<Vec<Arc<dyn FetchStrategy>>, FetchError> {
    let mut strategies: Vec<Arc<dyn FetchStrategy>> = vec![
        Arc::new(DirectClient::new(ctx.clone())),
        Arc::new(CrawlClient::new(ctx.clone())),
    ];
    match &config.browser {
        Some(settings) => strategies.push(Arc::new(BrowserClient::new(ctx, settings)?)),
        None => warn!("BROWSERLESS_URL not set, browser strategy disabled"),
    }
    Ok(strategies)
}

/// How one strategy's page loop ended.
#[derive(Debug)]
enum PageRun {
    Completed {
        reviews: Vec<Review>,
        last_page: u32,
        /// The page count shown by the site agrees with where we stopped.
        corroborated: bool,
    },
    Escalate {
        reviews: Vec<Review>,
        last_page: u32,
        reason: String,
    },
}

pub struct HarvestOrchestrator {
    config: HarvestConfig,
    strategies: Vec<Arc<dyn FetchStrategy>>,
    pool: Arc<ProxyPool>,
    limiter: Arc<RateLimiter>,
    checkpoints: CheckpointStore<HarvestCheckpoint>,
}

impl HarvestOrchestrator {
    pub fn new(
        config: HarvestConfig,
        strategies: Vec<Arc<dyn FetchStrategy>>,
        pool: Arc<ProxyPool>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let checkpoints = CheckpointStore::new(config.checkpoint_dir.clone());
        Self {
            config,
            strategies,
            pool,
            limiter,
            checkpoints,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointStore<HarvestCheckpoint> {
        &self.checkpoints
    }

    /// Harvest every firm in order and return the run report. One firm's
    /// failure never stops the run.
    pub async fn run(&self, firms: &[&FirmEntry]) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport::new();

        info!(firms = firms.len(), strategies = self.strategies.len(), "Starting harvest run");

        for (index, firm) in firms.iter().enumerate() {
            let result = self.harvest_firm(firm).await;

            if result.success {
                if let Err(e) = self.save_result(&result) {
                    error!(firm = %result.firm_name, error = %e, "Failed to save firm result");
                }
            }
            report.record(&result);

            let done = index + 1;
            let elapsed = started.elapsed().as_secs_f64();
            let per_firm = elapsed / done as f64;
            let eta_secs = per_firm * (firms.len() - done) as f64;
            info!(
                done,
                total = firms.len(),
                success_rate = %format!("{:.1}%", report.success_rate() * 100.0),
                reviews = report.total_reviews,
                eta_secs = eta_secs.round() as u64,
                "Progress"
            );

            if done % self.config.resurrect_every_firms == 0 && done < firms.len() {
                let revived = self.pool.resurrect().await;
                info!(revived, alive = self.pool.alive_count(), "Proxy resurrection pass");
            }
        }

        report.finish(started.elapsed().as_secs_f64());
        let report_path = self.config.parsed_data_dir.join(REPORT_FILE_NAME);
        if let Err(e) = save_json_atomic(&report, &report_path) {
            error!(path = %report_path.display(), error = %e, "Failed to save run report");
        }
        report
    }

    /// Run the full state machine for one firm.
    pub async fn harvest_firm(&self, firm: &FirmEntry) -> FirmResult {
        let mut result = FirmResult {
            firm_name: firm.name.to_string(),
            source_url: firm.url.to_string(),
            category: Some(firm.category.to_string()),
            firm: None,
            reviews: Vec::new(),
            scrape_date: Utc::now(),
            strategy: None,
            total_pages: 0,
            success: false,
            errors: Vec::new(),
        };

        let Some(cheapest) = self.strategies.first() else {
            result.errors.push("no fetch strategies configured".to_string());
            return result;
        };

        info!(firm = %firm.name, url = %firm.url, "Fetching firm metadata");
        self.limiter.wait().await;
        match cheapest.fetch_firm_metadata(firm.url).await {
            Ok(info) => result.firm = Some(info),
            Err(e) => {
                warn!(firm = %firm.name, strategy = cheapest.name(), error = %e, "Metadata fetch failed");
                result.errors.push(format!("metadata: {}", e));
            }
        }

        let kept_page = match self.checkpoints.load(firm.name) {
            Ok(Some(checkpoint)) if checkpoint.last_page > 0 => Some(checkpoint.last_page),
            _ => None,
        };

        for strategy in &self.strategies {
            info!(firm = %firm.name, strategy = strategy.name(), "Harvesting pages");

            match self.harvest_pages(firm, strategy.as_ref(), kept_page).await {
                PageRun::Completed {
                    reviews,
                    last_page,
                    corroborated,
                } => {
                    if strategy.authoritative() || corroborated {
                        if let Err(e) = self.checkpoints.delete(firm.name) {
                            warn!(firm = %firm.name, error = %e, "Failed to clear checkpoint");
                        }
                    } else {
                        info!(
                            firm = %firm.name,
                            strategy = strategy.name(),
                            "Completion not corroborated, keeping checkpoint"
                        );
                        self.save_checkpoint(firm.name, last_page, &reviews, strategy.name());
                    }

                    info!(
                        firm = %firm.name,
                        strategy = strategy.name(),
                        pages = last_page,
                        reviews = reviews.len(),
                        "Firm completed"
                    );
                    result.reviews = reviews;
                    result.total_pages = last_page;
                    result.strategy = Some(strategy.name().to_string());
                    result.success = true;
                    return result;
                }
                PageRun::Escalate {
                    reviews,
                    last_page,
                    reason,
                } => {
                    warn!(
                        firm = %firm.name,
                        strategy = strategy.name(),
                        last_page,
                        %reason,
                        "Strategy abandoned, escalating"
                    );
                    result.errors.push(format!("{}: {}", strategy.name(), reason));
                    result.reviews = reviews;
                    result.total_pages = last_page;
                }
            }
        }

        error!(firm = %firm.name, "All strategies exhausted");
        result.errors.push("all strategies exhausted".to_string());
        result
    }

    /// Page loop for one strategy. `kept_page` is the last page of a checkpoint
    /// that existed before this firm's run began; the page right after it is
    /// the only place a 404 or an empty page may end the harvest.
    async fn harvest_pages(&self, firm: &FirmEntry, strategy: &dyn FetchStrategy, kept_page: Option<u32>) -> PageRun {
        let (mut last_page, mut reviews) = match self.checkpoints.load(firm.name) {
            Ok(Some(checkpoint)) => {
                info!(
                    firm = %firm.name,
                    last_page = checkpoint.last_page,
                    reviews = checkpoint.reviews.len(),
                    "Resuming from checkpoint"
                );
                (checkpoint.last_page, checkpoint.reviews)
            }
            Ok(None) => (0, Vec::new()),
            Err(e) => {
                warn!(firm = %firm.name, error = %e, "Unreadable checkpoint, starting from page 1");
                (0, Vec::new())
            }
        };

        let mut consecutive_failures = 0;
        let mut page = last_page + 1;

        loop {
            if page > self.config.max_pages {
                warn!(firm = %firm.name, max_pages = self.config.max_pages, "Reached page ceiling");
                return PageRun::Completed {
                    reviews,
                    last_page,
                    corroborated: false,
                };
            }

            let at_kept_end = kept_page == Some(last_page);

            self.limiter.wait().await;
            let failure = match strategy.fetch_review_page(firm.url, page).await {
                Ok(fetched) if !fetched.reviews.is_empty() => {
                    consecutive_failures = 0;
                    reviews.extend(fetched.reviews);
                    last_page = page;

                    if page % self.config.checkpoint_interval == 0 {
                        self.save_checkpoint(firm.name, last_page, &reviews, strategy.name());
                    }

                    if !fetched.has_next {
                        return PageRun::Completed {
                            reviews,
                            last_page,
                            corroborated: fetched.total_pages == Some(page),
                        };
                    }
                    page += 1;
                    continue;
                }
                // Resuming a kept checkpoint: the site has nothing beyond it.
                Ok(fetched) if at_kept_end && fetched.total_pages.map_or(true, |total| total < page) => {
                    info!(firm = %firm.name, last_page, "Nothing past the kept checkpoint");
                    return PageRun::Completed {
                        reviews,
                        last_page,
                        corroborated: fetched.total_pages.map_or(true, |total| total == last_page),
                    };
                }
                Err(FetchError::Status(404)) if at_kept_end => {
                    info!(firm = %firm.name, last_page, "Nothing past the kept checkpoint");
                    return PageRun::Completed {
                        reviews,
                        last_page,
                        corroborated: true,
                    };
                }
                Ok(_) => "page returned no reviews".to_string(),
                Err(e) => e.to_string(),
            };

            consecutive_failures += 1;
            warn!(
                firm = %firm.name,
                strategy = strategy.name(),
                page,
                consecutive_failures,
                error = %failure,
                "Page attempt failed"
            );

            if consecutive_failures >= self.config.max_consecutive_failures {
                if last_page > 0 {
                    self.save_checkpoint(firm.name, last_page, &reviews, strategy.name());
                }
                return PageRun::Escalate {
                    reviews,
                    last_page,
                    reason: format!("{} consecutive failures at page {}: {}", consecutive_failures, page, failure),
                };
            }

            tokio::time::sleep(self.config.retry_delay).await;
        }
    }

    fn save_checkpoint(&self, firm_name: &str, last_page: u32, reviews: &[Review], strategy: &str) {
        let snapshot = HarvestCheckpoint::new(firm_name, last_page, reviews.to_vec(), strategy);
        match self.checkpoints.save(firm_name, &snapshot) {
            Ok(()) => info!(firm = %firm_name, last_page, reviews = reviews.len(), "Checkpoint saved"),
            Err(e) => error!(firm = %firm_name, error = %e, "Failed to save checkpoint"),
        }
    }

    fn save_result(&self, result: &FirmResult) -> std::io::Result<()> {
        let path = self
            .config
            .parsed_data_dir
            .join(format!("{}.json", safe_file_name(&result.firm_name)));
        save_json_atomic(result, &path)?;
        info!(firm = %result.firm_name, path = %path.display(), "Saved firm result");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmSummary {
    pub firm: String,
    pub success: bool,
    pub reviews: usize,
    pub pages: u32,
    pub strategy: Option<String>,
    pub rating: Option<f32>,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// End-of-run summary, printed and saved next to the firm results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub total_firms: usize,
    pub successful_firms: usize,
    pub failed_firms: usize,
    pub total_reviews: usize,
    pub strategy_usage: BTreeMap<String, usize>,
    pub firms: Vec<FirmSummary>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            duration_secs: 0.0,
            total_firms: 0,
            successful_firms: 0,
            failed_firms: 0,
            total_reviews: 0,
            strategy_usage: BTreeMap::new(),
            firms: Vec::new(),
        }
    }

    pub fn record(&mut self, result: &FirmResult) {
        self.total_firms += 1;
        if result.success {
            self.successful_firms += 1;
            self.total_reviews += result.reviews.len();
            if let Some(strategy) = &result.strategy {
                *self.strategy_usage.entry(strategy.clone()).or_default() += 1;
            }
        } else {
            self.failed_firms += 1;
        }

        self.firms.push(FirmSummary {
            firm: result.firm_name.clone(),
            success: result.success,
            reviews: result.reviews.len(),
            pages: result.total_pages,
            strategy: result.strategy.clone(),
            rating: result.firm.as_ref().map(|f| f.rating),
            errors: result.errors.clone(),
        });
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_firms == 0 {
            0.0
        } else {
            self.successful_firms as f64 / self.total_firms as f64
        }
    }

    fn finish(&mut self, duration_secs: f64) {
        self.finished_at = Some(Utc::now());
        self.duration_secs = duration_secs;
    }

    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(70));
        println!("SCRAPING SUMMARY");
        println!("{}", "=".repeat(70));
        println!("Firms processed:   {}", self.total_firms);
        println!(
            "Successful:        {} ({:.1}%)",
            self.successful_firms,
            self.success_rate() * 100.0
        );
        println!("Failed:            {}", self.failed_firms);
        println!("Total reviews:     {}", self.total_reviews);
        println!("Duration:          {:.1} min", self.duration_secs / 60.0);

        if !self.strategy_usage.is_empty() {
            println!("\nStrategy usage:");
            for (strategy, count) in &self.strategy_usage {
                println!("  {:<10} {}", strategy, count);
            }
        }

        println!("\nPer firm:");
        for firm in &self.firms {
            let mark = if firm.success { "✓" } else { "✗" };
            println!(
                "  {} {:<20} {:>6} reviews  {:>4} pages  {}",
                mark,
                firm.firm,
                firm.reviews,
                firm.pages,
                firm.strategy.as_deref().unwrap_or("-")
            );
        }
        println!("{}", "=".repeat(70));
    }
}
