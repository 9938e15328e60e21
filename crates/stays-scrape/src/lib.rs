//! Collaborator boundary for page fetching plus the paginating link
//! collector.
//!
//! The browser-automation detail scraper lives outside this workspace; it is
//! reached only through [`HotelPageFetcher`]. Listing search is plain HTTP
//! and gets a reqwest-backed default implementation here.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use stays_core::RawHotelRecord;
use stays_storage::{CsvStore, HotelCsvRow, LinkRow};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "stays-scrape";

/// Failure taxonomy at the fetch boundary.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request blocked by the source")]
    Blocked,
    #[error("request timed out")]
    Timeout,
    #[error("page not found")]
    NotFound,
    #[error("unparseable page: {0}")]
    ParseFailure(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

impl FetchError {
    pub fn retry_disposition(&self) -> RetryDisposition {
        match self {
            Self::Blocked | Self::Timeout | Self::Request(_) => RetryDisposition::Retryable,
            Self::NotFound | Self::ParseFailure(_) => RetryDisposition::NonRetryable,
        }
    }

    pub fn from_status(status: StatusCode, url: &str) -> Self {
        if status == StatusCode::FORBIDDEN
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
        {
            Self::Blocked
        } else if status == StatusCode::NOT_FOUND {
            Self::NotFound
        } else {
            Self::ParseFailure(format!("http status {status} for {url}"))
        }
    }

    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(err)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// One configured city/search seed for link collection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedConfig {
    pub name: String,
    #[serde(default = "default_dest_type")]
    pub dest_type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_dest_type() -> String {
    "city".to_string()
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedRegistry {
    pub seeds: Vec<SeedConfig>,
}

impl SeedRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn enabled_seeds(&self) -> Vec<SeedConfig> {
        self.seeds.iter().filter(|s| s.enabled).cloned().collect()
    }
}

/// Boundary to the excluded browser-automation layer: one hotel detail page
/// in, one raw record out.
#[async_trait]
pub trait HotelPageFetcher: Send + Sync {
    async fn fetch_hotel_page(&self, url: &str) -> Result<RawHotelRecord, FetchError>;
}

/// Boundary to the listing search layer: one seed + page number in, the
/// detail URLs found on that page out. Pages are 1-based.
#[async_trait]
pub trait ListingPageFetcher: Send + Sync {
    async fn fetch_listing_page(
        &self,
        seed: &SeedConfig,
        page: u32,
    ) -> Result<Vec<String>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct SearchClientConfig {
    pub endpoint: String,
    /// Detail URL built from each result's page name; `{page}` is replaced.
    pub detail_url_template: String,
    pub rows_per_page: u32,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for SearchClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9980/search".to_string(),
            detail_url_template: "https://www.booking.com/hotel/sa/{page}.ar.html".to_string(),
            rows_per_page: 100,
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

/// Reqwest-backed listing search client. Posts a paginated search request to
/// the configured endpoint and reads `results[].pageName` out of the JSON
/// response.
#[derive(Debug)]
pub struct SearchListingClient {
    client: reqwest::Client,
    config: SearchClientConfig,
}

impl SearchListingClient {
    pub fn new(config: SearchClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client, config })
    }

    fn detail_url(&self, page_name: &str) -> String {
        self.config.detail_url_template.replace("{page}", page_name)
    }
}

#[async_trait]
impl ListingPageFetcher for SearchListingClient {
    async fn fetch_listing_page(
        &self,
        seed: &SeedConfig,
        page: u32,
    ) -> Result<Vec<String>, FetchError> {
        let offset = (page.saturating_sub(1)) * self.config.rows_per_page;
        let payload = json!({
            "seed": seed.name,
            "destType": seed.dest_type,
            "pagination": {
                "offset": offset,
                "rowsPerPage": self.config.rows_per_page,
            },
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(FetchError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status, &self.config.endpoint));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| FetchError::ParseFailure(err.to_string()))?;
        let results = body
            .get("results")
            .and_then(|v| v.as_array())
            .ok_or_else(|| FetchError::ParseFailure("missing results array".to_string()))?;

        Ok(results
            .iter()
            .filter_map(|r| r.get("pageName").and_then(|v| v.as_str()))
            .filter(|name| !name.trim().is_empty())
            .map(|name| self.detail_url(name.trim()))
            .collect())
    }
}

/// What one collection run produced.
#[derive(Debug, Default)]
pub struct CollectOutcome {
    pub links: Vec<LinkRow>,
    pub pages_fetched: usize,
    pub failed_seeds: usize,
    /// True when cancellation was observed before the run finished; `links`
    /// then holds the partial output collected so far.
    pub stopped: bool,
}

/// Paginates listing pages per seed into a globally deduplicated set of
/// hotel-detail links.
#[derive(Debug, Clone, Copy)]
pub struct LinkCollector {
    pub max_pages_per_seed: u32,
    pub backoff: BackoffPolicy,
}

impl Default for LinkCollector {
    fn default() -> Self {
        Self {
            max_pages_per_seed: 50,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl LinkCollector {
    /// Walks every enabled seed. A seed stops at its first empty page, its
    /// first page with no new links, or the page cap. Fetch failures are
    /// retried per the backoff policy; an exhausted seed is skipped and
    /// counted, never fatal to the run. The token is checked before every
    /// seed and every page.
    pub async fn collect<F>(
        &self,
        fetcher: &F,
        seeds: &[SeedConfig],
        cancel: &CancellationToken,
    ) -> CollectOutcome
    where
        F: ListingPageFetcher + ?Sized,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut outcome = CollectOutcome::default();

        'seeds: for seed in seeds.iter().filter(|s| s.enabled) {
            if cancel.is_cancelled() {
                outcome.stopped = true;
                break;
            }
            info!(seed = %seed.name, "collecting links");

            for page in 1..=self.max_pages_per_seed {
                if cancel.is_cancelled() {
                    outcome.stopped = true;
                    break 'seeds;
                }

                let urls = match self.fetch_page_with_retry(fetcher, seed, page).await {
                    Ok(urls) => urls,
                    Err(err) => {
                        warn!(seed = %seed.name, page, %err, "seed abandoned after retries");
                        outcome.failed_seeds += 1;
                        continue 'seeds;
                    }
                };
                outcome.pages_fetched += 1;

                if urls.is_empty() {
                    info!(seed = %seed.name, page, "empty page, seed finished");
                    break;
                }

                let mut fresh = 0usize;
                for url in urls {
                    if seen.insert(url.clone()) {
                        outcome.links.push(LinkRow {
                            page,
                            url,
                            seed: seed.name.clone(),
                        });
                        fresh += 1;
                    }
                }
                info!(seed = %seed.name, page, fresh, "page collected");

                if fresh == 0 {
                    break;
                }
            }
        }

        outcome
    }

    async fn fetch_page_with_retry<F>(
        &self,
        fetcher: &F,
        seed: &SeedConfig,
        page: u32,
    ) -> Result<Vec<String>, FetchError>
    where
        F: ListingPageFetcher + ?Sized,
    {
        let mut attempt = 0usize;
        loop {
            match fetcher.fetch_listing_page(seed, page).await {
                Ok(urls) => return Ok(urls),
                Err(err)
                    if err.retry_disposition() == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries =>
                {
                    warn!(seed = %seed.name, page, attempt, %err, "retrying listing page");
                    tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Fetches one hotel detail page with the same bounded retry discipline as
/// the collector.
pub async fn fetch_hotel_with_retry<F>(
    fetcher: &F,
    url: &str,
    backoff: &BackoffPolicy,
) -> Result<RawHotelRecord, FetchError>
where
    F: HotelPageFetcher + ?Sized,
{
    let mut attempt = 0usize;
    loop {
        match fetcher.fetch_hotel_page(url).await {
            Ok(record) => return Ok(record),
            Err(err)
                if err.retry_disposition() == RetryDisposition::Retryable
                    && attempt < backoff.max_retries =>
            {
                warn!(url, attempt, %err, "retrying hotel page");
                tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Replays previously checkpointed records by URL.
///
/// The real detail fetcher (browser automation) lives outside this workspace
/// and is injected by its host binary; replay is the default for local runs
/// and makes re-imports work entirely from the hotels checkpoint file.
pub struct CsvReplayFetcher {
    records: HashMap<String, RawHotelRecord>,
}

impl CsvReplayFetcher {
    pub fn from_store(store: &CsvStore<HotelCsvRow>) -> Result<Self> {
        let mut records = HashMap::new();
        if store.exists() {
            for row in store.read_all()? {
                let record = row.into_record();
                records.insert(record.url.clone(), record);
            }
        }
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl HotelPageFetcher for CsvReplayFetcher {
    async fn fetch_hotel_page(&self, url: &str) -> Result<RawHotelRecord, FetchError> {
        self.records.get(url).cloned().ok_or(FetchError::NotFound)
    }
}
