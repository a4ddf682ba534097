//! Recent download counts from pypistats.org.
//!
//! The `recent` endpoint has no all-time total, so `download_total` is
//! never written by this source. npm documents are skipped.

use std::sync::Arc;

use async_trait::async_trait;
use pkgindex_core::enrich::EnrichmentSource;
use pkgindex_core::models::{registry_of, str_field, Document, DownloadStats, Registry};
use serde::Deserialize;

use crate::config::RateLimitConfig;
use crate::fetcher::{json_body, FetchCache, FetchError, RateLimitedFetcher};

#[derive(Debug, Deserialize)]
struct RecentPayload {
    #[serde(default)]
    data: RecentCounts,
}

#[derive(Debug, Default, Deserialize)]
struct RecentCounts {
    #[serde(default)]
    last_day: Option<i64>,
    #[serde(default)]
    last_week: Option<i64>,
    #[serde(default)]
    last_month: Option<i64>,
}

pub fn parse_recent(body: &str, now: i64) -> Result<DownloadStats, FetchError> {
    let payload: RecentPayload = json_body(body)?;
    Ok(DownloadStats {
        last_day: payload.data.last_day.unwrap_or(0),
        last_week: payload.data.last_week.unwrap_or(0),
        last_month: payload.data.last_month.unwrap_or(0),
        total: None,
        updated: now,
    })
}

pub struct DownloadsSource {
    api_url: String,
    fetcher: RateLimitedFetcher<DownloadStats>,
}

impl DownloadsSource {
    pub fn new(
        http: reqwest::Client,
        config: &RateLimitConfig,
        cache: Arc<FetchCache<DownloadStats>>,
    ) -> Self {
        Self {
            api_url: config.base_url.trim_end_matches('/').to_string(),
            fetcher: RateLimitedFetcher::new("downloads", http, config).with_cache(cache),
        }
    }

    pub fn calls(&self) -> u64 {
        self.fetcher.calls()
    }
}

#[async_trait]
impl EnrichmentSource for DownloadsSource {
    type Data = DownloadStats;

    fn name(&self) -> &str {
        "downloads"
    }

    fn identifier(&self, doc: &Document) -> Option<String> {
        if registry_of(doc) != Registry::Pypi {
            return None;
        }
        Some(str_field(doc, "name").to_string()).filter(|n| !n.is_empty())
    }

    async fn fetch(&self, identifier: &str, _doc: &Document) -> Option<DownloadStats> {
        let url = format!("{}/api/packages/{}/recent", self.api_url, identifier);
        let now = chrono::Utc::now().timestamp();
        self.fetcher
            .fetch(identifier, |http| http.get(&url), |body| parse_recent(body, now))
            .await
    }

    fn update_fields(&self, data: &DownloadStats, _doc: &Document) -> Document {
        data.to_fields()
    }
}
