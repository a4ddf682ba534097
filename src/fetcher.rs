//! Rate-limited, retrying, memoizing HTTP fetcher.
//!
//! Every enrichment source and registry fetcher talks to the outside world
//! through a [`RateLimitedFetcher`]:
//!
//! - **Pacing**: a [`RateGate`] enforces a minimum gap between two outbound
//!   calls. The gate can be shared (`Arc`) by many workers, so parallel
//!   callers are still paced globally.
//! - **Retry**: rate-limit responses and timeouts are retried up to
//!   `max_retries` times. The wait is the server's `Retry-After` (or the
//!   source's reset header) when present, else `backoff * 2^attempt`.
//!   5xx responses are retried the same way.
//! - **Not found**: 404 returns `None` at once and is cached.
//! - **Cache**: results are memoized by identifier in a [`FetchCache`]
//!   owned by the caller and injected, so one cache can serve several
//!   runs (different target collections) in the same process. Entries are
//!   never evicted.
//!
//! Nothing here returns an error to the caller: exhausted retries,
//! unexpected statuses and transport failures are logged and yield `None`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RateLimitConfig;

/// Outcome of a single outbound attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("not found")]
    NotFound,
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("unparseable response: {0}")]
    Unparseable(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    fn retryable(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. } | FetchError::Transient(_))
    }
}

/// Decode a JSON body.
pub fn json_body<T: DeserializeOwned>(body: &str) -> Result<T, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::Unparseable(e.to_string()))
}

// ============ Rate gate ============

/// Minimum interval between outbound calls, shared by everyone holding it.
pub struct RateGate {
    min_interval: Duration,
    last: tokio::sync::Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: tokio::sync::Mutex::new(None),
        }
    }

    pub fn shared(min_interval: Duration) -> Arc<Self> {
        Arc::new(Self::new(min_interval))
    }

    /// Wait until the next call is allowed, then claim the slot.
    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

// ============ Retry policy ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    /// Upper bound for any single wait, server-provided or computed.
    pub max_wait: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: config.backoff(),
            max_wait: Duration::from_secs(3600),
        }
    }

    /// `backoff * 2^attempt`, attempt starting at 0.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(1u32 << attempt.min(10))
            .min(self.max_wait)
    }
}

// ============ Cache ============

/// Identifier → result map. `None` records a known absence.
pub struct FetchCache<T> {
    entries: Mutex<HashMap<String, Option<T>>>,
}

impl<T: Clone> FetchCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// `Some(entry)` on a hit; the entry itself may be `None`.
    pub fn get(&self, identifier: &str) -> Option<Option<T>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(identifier).cloned()
    }

    pub fn insert(&self, identifier: &str, value: Option<T>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(identifier.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for FetchCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Rate-limit detection ============

/// Returns `Some(wait)` when `response` is a rate-limit response; the inner
/// value is the server-requested wait, if any.
pub type RateLimitDetector = fn(&Response) -> Option<Option<Duration>>;

fn header_u64(response: &Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// `Retry-After` as (possibly fractional) seconds.
fn retry_after(response: &Response) -> Option<Duration> {
    let secs: f64 = response
        .headers()
        .get("retry-after")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

/// 429 with an optional `Retry-After` in seconds.
pub fn retry_after_detector(response: &Response) -> Option<Option<Duration>> {
    if response.status() != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    Some(retry_after(response))
}

/// GitHub style: 403/429 with `x-ratelimit-remaining: 0`, wait until
/// `x-ratelimit-reset` (epoch seconds). Plain 429 falls back to
/// `Retry-After`.
pub fn github_detector(response: &Response) -> Option<Option<Duration>> {
    let status = response.status();
    if status != StatusCode::FORBIDDEN && status != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    if header_u64(response, "x-ratelimit-remaining") == Some(0) {
        let wait = header_u64(response, "x-ratelimit-reset").map(|reset| {
            let now = chrono::Utc::now().timestamp().max(0) as u64;
            Duration::from_secs(reset.saturating_sub(now))
        });
        return Some(wait);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return retry_after_detector(response);
    }
    None
}

// ============ Fetcher ============

pub struct RateLimitedFetcher<T> {
    source: String,
    http: reqwest::Client,
    gate: Arc<RateGate>,
    policy: RetryPolicy,
    cache: Arc<FetchCache<T>>,
    detector: RateLimitDetector,
    memoize: bool,
    calls: AtomicU64,
}

impl<T: Clone + Send + Sync> RateLimitedFetcher<T> {
    pub fn new(source: &str, http: reqwest::Client, config: &RateLimitConfig) -> Self {
        Self {
            source: source.to_string(),
            http,
            gate: RateGate::shared(config.delay()),
            policy: RetryPolicy::from_config(config),
            cache: FetchCache::shared(),
            detector: retry_after_detector,
            memoize: true,
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_cache(mut self, cache: Arc<FetchCache<T>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_gate(mut self, gate: Arc<RateGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_detector(mut self, detector: RateLimitDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Skip the cache entirely. Used by the registry scans, which read each
    /// release exactly once and would otherwise hold the whole registry.
    pub fn without_memo(mut self) -> Self {
        self.memoize = false;
        self
    }

    pub fn cache(&self) -> &Arc<FetchCache<T>> {
        &self.cache
    }

    pub fn gate(&self) -> &Arc<RateGate> {
        &self.gate
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Outbound calls issued so far (retries included).
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Cache-aside fetch of `identifier`.
    ///
    /// `build` creates the request (called once per attempt), `parse`
    /// turns the body into a result.
    pub async fn fetch<B, P>(&self, identifier: &str, build: B, parse: P) -> Option<T>
    where
        B: Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
        P: Fn(&str) -> Result<T, FetchError> + Send + Sync,
    {
        if self.memoize {
            if let Some(hit) = self.cache.get(identifier) {
                debug!(source = %self.source, identifier, "cache hit");
                return hit;
            }
        }

        let mut attempt = 0;
        loop {
            let err = match self.attempt(&build).await {
                Ok(body) => match parse(&body) {
                    Ok(value) => {
                        self.remember(identifier, Some(value.clone()));
                        return Some(value);
                    }
                    Err(e) => e,
                },
                Err(e) => e,
            };

            match err {
                FetchError::NotFound => {
                    debug!(source = %self.source, identifier, "not found");
                    self.remember(identifier, None);
                    return None;
                }
                FetchError::Unparseable(msg) => {
                    warn!(source = %self.source, identifier, error = %msg, "unparseable response");
                    self.remember(identifier, None);
                    return None;
                }
                e if e.retryable() && attempt < self.policy.max_retries => {
                    let wait = match &e {
                        FetchError::RateLimited {
                            retry_after: Some(wait),
                        } => (*wait).min(self.policy.max_wait),
                        _ => self.policy.delay(attempt),
                    };
                    attempt += 1;
                    info!(
                        source = %self.source,
                        identifier,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        reason = %e,
                        "backing off"
                    );
                    tokio::time::sleep(wait).await;
                }
                e if e.retryable() => {
                    warn!(source = %self.source, identifier, attempts = attempt + 1, reason = %e, "retries exhausted");
                    return None;
                }
                e => {
                    warn!(source = %self.source, identifier, error = %e, "fetch failed");
                    return None;
                }
            }
        }
    }

    fn remember(&self, identifier: &str, value: Option<T>) {
        if self.memoize {
            self.cache.insert(identifier, value);
        }
    }

    async fn attempt<B>(&self, build: &B) -> Result<String, FetchError>
    where
        B: Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
    {
        self.gate.wait().await;
        self.calls.fetch_add(1, Ordering::Relaxed);

        let response = build(&self.http).send().await.map_err(classify_transport)?;
        if let Some(retry_after) = (self.detector)(&response) {
            return Err(FetchError::RateLimited { retry_after });
        }
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if status.is_server_error() {
            return Err(FetchError::Transient(format!("server error {}", status)));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        response.text().await.map_err(classify_transport)
    }
}

fn classify_transport(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Transient(e.to_string())
    } else {
        FetchError::Transport(e.to_string())
    }
}

/// Shared HTTP client with the given timeout and a descriptive user agent.
pub fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("pkgindex/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(100),
            max_wait: Duration::from_secs(1),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(4), Duration::from_secs(1));
        assert_eq!(policy.delay(40), Duration::from_secs(1));
    }

    #[test]
    fn cache_records_absence() {
        let cache: FetchCache<u32> = FetchCache::new();
        assert_eq!(cache.get("a"), None);
        cache.insert("a", None);
        cache.insert("b", Some(2));
        assert_eq!(cache.get("a"), Some(None));
        assert_eq!(cache.get("b"), Some(Some(2)));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn gate_spaces_calls() {
        let gate = RateGate::new(Duration::from_millis(50));
        let start = Instant::now();
        gate.wait().await;
        gate.wait().await;
        gate.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn json_body_reports_unparseable() {
        let err = json_body::<serde_json::Value>("<html>").unwrap_err();
        assert!(matches!(err, FetchError::Unparseable(_)));
    }
}
