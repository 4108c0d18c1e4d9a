use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::fetch::{build_client, get_text, page_url, FetchContext, FetchStrategy};
use crate::models::{FirmInfo, ReviewPage};
use crate::parser;

/// Plain HTTP client with browser-like headers. Cheapest strategy, first in
/// the ranked list.
pub struct DirectClient {
    ctx: FetchContext,
}

impl DirectClient {
    pub fn new(ctx: FetchContext) -> Self {
        Self { ctx }
    }

    /// Fetch `url`, trying a fresh proxy (and fresh user agent) per attempt.
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let mut last_error = FetchError::Transport("no attempt made".to_string());

        for attempt in 1..=self.ctx.max_retries {
            let proxy = self.ctx.pool.acquire();
            let client = build_client(proxy.as_ref(), self.ctx.timeouts, false)?;

            self.ctx.limiter.wait().await;
            debug!(url, attempt, proxy = ?proxy.as_ref().map(|p| p.address()), "GET");

            match get_text(&client, url).await {
                Ok(html) => return Ok(html),
                Err(e) => {
                    warn!(url, attempt, error = %e, "Direct request failed");
                    self.ctx.report(proxy.as_ref(), &e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

#[async_trait]
impl FetchStrategy for DirectClient {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn fetch_firm_metadata(&self, url: &str) -> Result<FirmInfo, FetchError> {
        let html = self.fetch_html(url).await?;
        parser::parse_firm(&html, url)
    }

    async fn fetch_review_page(&self, url: &str, page: u32) -> Result<ReviewPage, FetchError> {
        let html = self.fetch_html(&page_url(url, page)).await?;
        let parsed = parser::parse_review_page(&html)?;
        info!(page, reviews = parsed.reviews.len(), has_next = parsed.has_next, "Scraped page");
        Ok(parsed)
    }
}
