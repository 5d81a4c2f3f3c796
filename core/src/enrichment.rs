//! Dictionary summaries for hover, cached per term.
//!
//! Lookups never feed the diagnostic pipeline. Responses (including 404 and
//! other non-success statuses) are cached for the TTL; transport failures are
//! not, so the next lookup for the same term retries.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

pub const DEFAULT_ENDPOINT: &str = "https://ja.wikipedia.org/api/rest_v1/page/summary/";
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    Success,
    NotFound,
    Error,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub summary: Option<String>,
    pub status: LookupStatus,
    pub fetched_at: Instant,
}

impl CacheEntry {
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() >= ttl
    }
}

/// Result of a request that produced an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Found(Option<String>),
    NotFound,
    Failed(u16),
}

impl FetchOutcome {
    fn into_entry(self) -> CacheEntry {
        let (summary, status) = match self {
            FetchOutcome::Found(summary) => (summary, LookupStatus::Success),
            FetchOutcome::NotFound => (None, LookupStatus::NotFound),
            FetchOutcome::Failed(_) => (None, LookupStatus::Error),
        };
        CacheEntry {
            summary,
            status,
            fetched_at: Instant::now(),
        }
    }
}

/// Source of term summaries. `Err` means the request never got a response.
pub trait SummaryFetcher: Send + Sync {
    fn fetch(&self, term: &str) -> impl Future<Output = Result<FetchOutcome>> + Send;
}

#[derive(Debug, Deserialize)]
struct PageSummary {
    #[serde(default)]
    extract: Option<String>,
}

/// Fetches page summaries from the Japanese Wikipedia REST API.
#[derive(Debug, Clone)]
pub struct WikipediaFetcher {
    client: Client,
    endpoint: String,
}

impl WikipediaFetcher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kotoba/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AnalysisError::Network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Endpoint URL with `term` appended as a percent-encoded path segment.
    pub fn url_for(&self, term: &str) -> Result<Url> {
        let mut url =
            Url::parse(&self.endpoint).map_err(|e| AnalysisError::Network(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| AnalysisError::Network(format!("invalid endpoint: {}", self.endpoint)))?
            .pop_if_empty()
            .push(term);
        Ok(url)
    }
}

impl SummaryFetcher for WikipediaFetcher {
    async fn fetch(&self, term: &str) -> Result<FetchOutcome> {
        let url = self.url_for(term)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AnalysisError::Network(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(FetchOutcome::NotFound);
        }
        if !status.is_success() {
            return Ok(FetchOutcome::Failed(status.as_u16()));
        }
        match response.json::<PageSummary>().await {
            Ok(page) => Ok(FetchOutcome::Found(page.extract)),
            Err(err) => {
                tracing::debug!(term, error = %err, "unreadable summary body");
                Ok(FetchOutcome::Failed(status.as_u16()))
            }
        }
    }
}

pub struct EnrichmentCache<F> {
    fetcher: F,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl<F: SummaryFetcher> EnrichmentCache<F> {
    pub fn new(fetcher: F) -> Self {
        Self::with_ttl(fetcher, DEFAULT_TTL)
    }

    pub fn with_ttl(fetcher: F, ttl: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Summary for `term`, or `None` when there is none or the lookup failed.
    pub async fn lookup(&self, term: &str) -> Option<String> {
        if let Some(entry) = self.entry(term) {
            if !entry.is_expired(self.ttl) {
                return entry.summary;
            }
        }
        match self.fetcher.fetch(term).await {
            Ok(outcome) => {
                let entry = outcome.into_entry();
                let summary = entry.summary.clone();
                self.lock().insert(term.to_string(), entry);
                summary
            }
            Err(err) => {
                tracing::debug!(term, error = %err, "enrichment lookup failed");
                None
            }
        }
    }

    pub fn entry(&self, term: &str) -> Option<CacheEntry> {
        self.lock().get(term).cloned()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        calls: AtomicUsize,
        replies: Mutex<VecDeque<Result<FetchOutcome>>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<FetchOutcome>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                replies: Mutex::new(replies.into()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SummaryFetcher for &Scripted {
        async fn fetch(&self, _term: &str) -> Result<FetchOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(FetchOutcome::NotFound))
        }
    }

    #[tokio::test]
    async fn not_found_is_cached() {
        let fetcher = Scripted::new(vec![Ok(FetchOutcome::NotFound)]);
        let cache = EnrichmentCache::new(&fetcher);
        assert_eq!(cache.lookup("猫").await, None);
        assert_eq!(cache.entry("猫").unwrap().status, LookupStatus::NotFound);
        assert_eq!(cache.lookup("猫").await, None);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn transport_errors_are_retried() {
        let fetcher = Scripted::new(vec![
            Err(AnalysisError::Network("timed out".into())),
            Ok(FetchOutcome::Found(Some("ネコ科の動物。".into()))),
        ]);
        let cache = EnrichmentCache::new(&fetcher);
        assert_eq!(cache.lookup("猫").await, None);
        assert!(cache.entry("猫").is_none());
        assert_eq!(cache.lookup("猫").await.as_deref(), Some("ネコ科の動物。"));
        assert_eq!(cache.lookup("猫").await.as_deref(), Some("ネコ科の動物。"));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn error_statuses_are_cached() {
        let fetcher = Scripted::new(vec![Ok(FetchOutcome::Failed(503))]);
        let cache = EnrichmentCache::new(&fetcher);
        assert_eq!(cache.lookup("犬").await, None);
        assert_eq!(cache.entry("犬").unwrap().status, LookupStatus::Error);
        cache.lookup("犬").await;
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let fetcher = Scripted::new(vec![
            Ok(FetchOutcome::Found(Some("一".into()))),
            Ok(FetchOutcome::Found(Some("二".into()))),
        ]);
        let cache = EnrichmentCache::with_ttl(&fetcher, Duration::ZERO);
        assert_eq!(cache.lookup("語").await.as_deref(), Some("一"));
        assert_eq!(cache.lookup("語").await.as_deref(), Some("二"));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn clear_drops_entries() {
        let fetcher = Scripted::new(vec![]);
        let cache = EnrichmentCache::new(&fetcher);
        cache.lookup("猫").await;
        cache.clear();
        assert!(cache.entry("猫").is_none());
        cache.lookup("猫").await;
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn encodes_terms_as_path_segments() {
        let fetcher = WikipediaFetcher::new(DEFAULT_ENDPOINT, DEFAULT_TIMEOUT).unwrap();
        let url = fetcher.url_for("猫/犬").unwrap();
        assert_eq!(
            url.as_str(),
            "https://ja.wikipedia.org/api/rest_v1/page/summary/%E7%8C%AB%2F%E7%8A%AC"
        );
    }
}
