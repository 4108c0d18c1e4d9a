use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::fetch::{build_client, check_status, page_url, FetchContext, FetchStrategy};
use crate::models::{FirmInfo, ReviewPage};
use crate::parser;
use crate::proxy_manager::ProxyHandle;
use crate::rate_limit::RateLimiter;

/// Statuses worth another attempt.
const RETRY_HTTP_CODES: &[u16] = &[500, 502, 503, 504, 408, 429, 403];

const DOWNLOAD_DELAY: Duration = Duration::from_secs(2);

struct Session {
    proxy: Option<ProxyHandle>,
    client: Client,
}

/// Crawler-style client: one cookie-keeping session reused across pages,
/// a per-site download delay, and retries on a fixed status set. The session
/// is rebuilt on a new proxy whenever the remote blocks it.
pub struct CrawlClient {
    ctx: FetchContext,
    session: Mutex<Option<Session>>,
    download_gate: RateLimiter,
}

impl CrawlClient {
    pub fn new(ctx: FetchContext) -> Self {
        Self {
            ctx,
            session: Mutex::new(None),
            download_gate: RateLimiter::new(DOWNLOAD_DELAY),
        }
    }

    fn current_session(&self) -> Result<(Option<ProxyHandle>, Client), FetchError> {
        let mut guard = self.session.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(session) = guard.as_ref() {
            return Ok((session.proxy.clone(), session.client.clone()));
        }

        let proxy = self.ctx.pool.acquire();
        let client = build_client(proxy.as_ref(), self.ctx.timeouts, true)?;
        *guard = Some(Session {
            proxy: proxy.clone(),
            client: client.clone(),
        });
        Ok((proxy, client))
    }

    fn drop_session(&self) {
        *self.session.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let mut last_error = FetchError::Transport("no attempt made".to_string());

        for attempt in 0..=self.ctx.max_retries {
            let (proxy, client) = self.current_session()?;

            self.download_gate.wait().await;
            self.ctx.limiter.wait().await;
            debug!(url, attempt, "Crawl GET");

            let outcome = match client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    match check_status(status) {
                        Ok(()) => return Ok(response.text().await?),
                        Err(e) if RETRY_HTTP_CODES.contains(&status.as_u16()) => e,
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => FetchError::from(e),
            };

            warn!(url, attempt, error = %outcome, "Crawl request failed, retrying");
            if outcome.is_proxy_fault() {
                self.ctx.report(proxy.as_ref(), &outcome);
                self.drop_session();
            }
            last_error = outcome;
        }

        Err(last_error)
    }
}

#[async_trait]
impl FetchStrategy for CrawlClient {
    fn name(&self) -> &'static str {
        "crawl"
    }

    async fn fetch_firm_metadata(&self, url: &str) -> Result<FirmInfo, FetchError> {
        let html = self.fetch_html(url).await?;
        parser::parse_firm(&html, url)
    }

    async fn fetch_review_page(&self, url: &str, page: u32) -> Result<ReviewPage, FetchError> {
        let html = self.fetch_html(&page_url(url, page)).await?;
        let parsed = parser::parse_review_page(&html)?;
        info!(page, reviews = parsed.reviews.len(), has_next = parsed.has_next, "Crawled page");
        Ok(parsed)
    }
}
