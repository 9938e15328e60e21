use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use stays_scrape::{
    BackoffPolicy, CollectOutcome, FetchError, LinkCollector, ListingPageFetcher, SeedConfig,
};
use tokio_util::sync::CancellationToken;

/// Scripted fetcher: each (seed, page) holds a queue of responses so retry
/// behavior is observable. An exhausted queue yields an empty page.
struct ScriptedFetcher {
    pages: Mutex<HashMap<(String, u32), Vec<Result<Vec<String>, FetchError>>>>,
    cancel_on_first_call: Option<CancellationToken>,
}

impl ScriptedFetcher {
    fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            cancel_on_first_call: None,
        }
    }

    fn page(self, seed: &str, page: u32, urls: &[&str]) -> Self {
        self.push(seed, page, Ok(urls.iter().map(ToString::to_string).collect()))
    }

    fn failure(self, seed: &str, page: u32, err: FetchError) -> Self {
        self.push(seed, page, Err(err))
    }

    fn push(self, seed: &str, page: u32, response: Result<Vec<String>, FetchError>) -> Self {
        self.pages
            .lock()
            .unwrap()
            .entry((seed.to_string(), page))
            .or_default()
            .push(response);
        self
    }
}

#[async_trait]
impl ListingPageFetcher for ScriptedFetcher {
    async fn fetch_listing_page(
        &self,
        seed: &SeedConfig,
        page: u32,
    ) -> Result<Vec<String>, FetchError> {
        if let Some(token) = &self.cancel_on_first_call {
            token.cancel();
        }
        let mut pages = self.pages.lock().unwrap();
        match pages.get_mut(&(seed.name.clone(), page)) {
            Some(queue) if !queue.is_empty() => queue.remove(0),
            _ => Ok(Vec::new()),
        }
    }
}

fn seed(name: &str) -> SeedConfig {
    SeedConfig {
        name: name.to_string(),
        dest_type: "city".to_string(),
        enabled: true,
    }
}

fn fast_collector() -> LinkCollector {
    LinkCollector {
        max_pages_per_seed: 50,
        backoff: BackoffPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
    }
}

fn collected_urls(outcome: &CollectOutcome) -> Vec<&str> {
    outcome.links.iter().map(|l| l.url.as_str()).collect()
}

#[tokio::test]
async fn pagination_stops_on_empty_page_and_dedups_across_pages() {
    let fetcher = ScriptedFetcher::new()
        .page("جدة", 1, &["https://h/a", "https://h/b"])
        .page("جدة", 2, &["https://h/b", "https://h/c"])
        .page("جدة", 3, &[]);

    let outcome = fast_collector()
        .collect(&fetcher, &[seed("جدة")], &CancellationToken::new())
        .await;

    assert_eq!(
        collected_urls(&outcome),
        vec!["https://h/a", "https://h/b", "https://h/c"]
    );
    assert_eq!(outcome.pages_fetched, 3);
    assert!(!outcome.stopped);
    assert_eq!(outcome.failed_seeds, 0);
}

#[tokio::test]
async fn page_with_no_new_links_ends_the_seed() {
    let fetcher = ScriptedFetcher::new()
        .page("جدة", 1, &["https://h/a"])
        .page("جدة", 2, &["https://h/a"])
        .page("جدة", 3, &["https://h/z"]);

    let outcome = fast_collector()
        .collect(&fetcher, &[seed("جدة")], &CancellationToken::new())
        .await;

    assert_eq!(collected_urls(&outcome), vec!["https://h/a"]);
    assert_eq!(outcome.pages_fetched, 2);
}

#[tokio::test]
async fn dedup_is_global_across_seeds() {
    let fetcher = ScriptedFetcher::new()
        .page("جدة", 1, &["https://h/a"])
        .page("الرياض", 1, &["https://h/a", "https://h/b"]);

    let outcome = fast_collector()
        .collect(
            &fetcher,
            &[seed("جدة"), seed("الرياض")],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(collected_urls(&outcome), vec!["https://h/a", "https://h/b"]);
    assert_eq!(outcome.links[0].seed, "جدة");
    assert_eq!(outcome.links[1].seed, "الرياض");
}

#[tokio::test]
async fn disabled_seeds_are_skipped() {
    let fetcher = ScriptedFetcher::new().page("جدة", 1, &["https://h/a"]);
    let mut disabled = seed("جدة");
    disabled.enabled = false;

    let outcome = fast_collector()
        .collect(&fetcher, &[disabled], &CancellationToken::new())
        .await;

    assert!(outcome.links.is_empty());
    assert_eq!(outcome.pages_fetched, 0);
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let fetcher = ScriptedFetcher::new()
        .failure("جدة", 1, FetchError::Timeout)
        .failure("جدة", 1, FetchError::Blocked)
        .page("جدة", 1, &["https://h/a"]);

    let outcome = fast_collector()
        .collect(&fetcher, &[seed("جدة")], &CancellationToken::new())
        .await;

    assert_eq!(collected_urls(&outcome), vec!["https://h/a"]);
    assert_eq!(outcome.failed_seeds, 0);
}

#[tokio::test]
async fn exhausted_retries_skip_the_seed_but_not_the_run() {
    let fetcher = ScriptedFetcher::new()
        .failure("جدة", 1, FetchError::Timeout)
        .failure("جدة", 1, FetchError::Timeout)
        .failure("جدة", 1, FetchError::Timeout)
        .failure("جدة", 1, FetchError::Timeout)
        .page("الرياض", 1, &["https://h/r"]);

    let outcome = fast_collector()
        .collect(
            &fetcher,
            &[seed("جدة"), seed("الرياض")],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(outcome.failed_seeds, 1);
    assert_eq!(collected_urls(&outcome), vec!["https://h/r"]);
}

#[tokio::test]
async fn non_retryable_failure_abandons_the_seed_immediately() {
    let fetcher = ScriptedFetcher::new()
        .failure("جدة", 1, FetchError::NotFound)
        .page("جدة", 1, &["https://h/late"]);

    let outcome = fast_collector()
        .collect(&fetcher, &[seed("جدة")], &CancellationToken::new())
        .await;

    assert_eq!(outcome.failed_seeds, 1);
    assert!(outcome.links.is_empty());
    // The queued success response was never consumed.
    assert!(!fetcher.pages.lock().unwrap()[&("جدة".to_string(), 1)].is_empty());
}

#[tokio::test]
async fn pre_cancelled_token_yields_an_empty_stopped_outcome() {
    let fetcher = ScriptedFetcher::new().page("جدة", 1, &["https://h/a"]);
    let token = CancellationToken::new();
    token.cancel();

    let outcome = fast_collector().collect(&fetcher, &[seed("جدة")], &token).await;

    assert!(outcome.stopped);
    assert!(outcome.links.is_empty());
}

#[tokio::test]
async fn cancellation_mid_run_keeps_partial_links() {
    let token = CancellationToken::new();
    let mut fetcher = ScriptedFetcher::new()
        .page("جدة", 1, &["https://h/a", "https://h/b"])
        .page("جدة", 2, &["https://h/c"]);
    // First page fetch flips the token, so the page-2 boundary check stops.
    fetcher.cancel_on_first_call = Some(token.clone());

    let outcome = fast_collector().collect(&fetcher, &[seed("جدة")], &token).await;

    assert!(outcome.stopped);
    assert_eq!(collected_urls(&outcome), vec!["https://h/a", "https://h/b"]);
}
