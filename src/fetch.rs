use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, USER_AGENT};
use reqwest::{Client, StatusCode};

use crate::config::HarvestConfig;
use crate::error::FetchError;
use crate::models::{FirmInfo, ReviewPage};
use crate::proxy_manager::{ProxyHandle, ProxyPool};
use crate::rate_limit::RateLimiter;

/// One way of getting review pages off the site. Implementations are ranked
/// cheapest first by the harvest orchestrator.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a "no next page" from this strategy can be trusted to end a
    /// firm's harvest on its own.
    fn authoritative(&self) -> bool {
        false
    }

    async fn fetch_firm_metadata(&self, url: &str) -> Result<FirmInfo, FetchError>;

    async fn fetch_review_page(&self, url: &str, page: u32) -> Result<ReviewPage, FetchError>;
}

pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Browser-like header set with a random desktop user agent.
pub fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert("DNT", HeaderValue::from_static("1"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
    headers.insert(USER_AGENT, HeaderValue::from_static(random_user_agent()));
    headers
}

/// URL of review page `page`; page 1 is the bare firm URL.
pub fn page_url(base: &str, page: u32) -> String {
    if page <= 1 {
        base.to_string()
    } else if base.contains('?') {
        format!("{}&page={}", base, page)
    } else {
        format!("{}?page={}", base, page)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub request: Duration,
}

/// What every strategy shares: the proxy pool, the run-wide rate limiter and
/// per-request limits.
#[derive(Clone)]
pub struct FetchContext {
    pub pool: Arc<ProxyPool>,
    pub limiter: Arc<RateLimiter>,
    pub timeouts: Timeouts,
    pub max_retries: u32,
}

impl FetchContext {
    pub fn from_config(config: &HarvestConfig, pool: Arc<ProxyPool>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            pool,
            limiter,
            timeouts: Timeouts {
                connect: config.connect_timeout,
                request: config.request_timeout,
            },
            max_retries: config.max_retries.max(1),
        }
    }

    /// Retire `proxy` when `err` says it is to blame.
    pub fn report(&self, proxy: Option<&ProxyHandle>, err: &FetchError) {
        if let (Some(proxy), true) = (proxy, err.is_proxy_fault()) {
            self.pool.mark_dead(proxy);
        }
    }
}

/// Build an HTTP client routed through `proxy` when one is given.
pub fn build_client(
    proxy: Option<&ProxyHandle>,
    timeouts: Timeouts,
    cookie_store: bool,
) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .default_headers(browser_headers())
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.request)
        .cookie_store(cookie_store);

    if let Some(proxy) = proxy {
        builder = builder.proxy(proxy.to_proxy()?);
    }

    Ok(builder.build()?)
}

pub fn check_status(status: StatusCode) -> Result<(), FetchError> {
    match status.as_u16() {
        403 | 429 => Err(FetchError::Blocked { status: status.as_u16() }),
        _ if status.is_success() => Ok(()),
        code => Err(FetchError::Status(code)),
    }
}

/// GET `url` and return the body of a successful response.
pub async fn get_text(client: &Client, url: &str) -> Result<String, FetchError> {
    let response = client.get(url).send().await?;
    check_status(response.status())?;
    Ok(response.text().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_page_uses_bare_url() {
        let base = "https://www.trustpilot.com/review/ftmo.com";
        assert_eq!(page_url(base, 1), base);
        assert_eq!(page_url(base, 3), format!("{}?page=3", base));
        assert_eq!(page_url("https://x.test/r?languages=all", 2), "https://x.test/r?languages=all&page=2");
    }

    #[test]
    fn blocking_statuses_are_classified() {
        assert!(matches!(
            check_status(StatusCode::FORBIDDEN),
            Err(FetchError::Blocked { status: 403 })
        ));
        assert!(matches!(
            check_status(StatusCode::TOO_MANY_REQUESTS),
            Err(FetchError::Blocked { status: 429 })
        ));
        assert!(matches!(check_status(StatusCode::BAD_GATEWAY), Err(FetchError::Status(502))));
        assert!(check_status(StatusCode::OK).is_ok());
    }

    #[test]
    fn headers_carry_known_user_agent() {
        let headers = browser_headers();
        let ua = headers.get(USER_AGENT).unwrap().to_str().unwrap();
        assert!(USER_AGENTS.contains(&ua));
        assert_eq!(headers.get("DNT").unwrap(), "1");
    }
}
