//! Repository activity from the GitHub REST API.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use pkgindex_core::enrich::EnrichmentSource;
use pkgindex_core::models::{map_field, str_field, Document, RepositoryStats};
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;

use crate::config::GithubSourceConfig;
use crate::fetcher::{github_detector, json_body, FetchCache, FetchError, RateLimitedFetcher};
use crate::registry::parse_timestamp;

/// Subset of `GET /repos/{owner}/{repo}`.
#[derive(Debug, Deserialize)]
struct RepoPayload {
    #[serde(default)]
    stargazers_count: i64,
    #[serde(default)]
    subscribers_count: i64,
    #[serde(default)]
    open_issues_count: Option<i64>,
    #[serde(default)]
    open_issues: Option<i64>,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    updated_at: Option<String>,
}

fn slug_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(https?://|www\.)(?:www\.)?github\.com/(.+/.+)")
            .expect("github url pattern is valid")
    })
}

/// `owner/repo` from a GitHub URL; extra path segments and `.git` dropped.
pub fn repository_slug(url: &str) -> Option<String> {
    let caps = slug_pattern().captures(url.trim())?;
    let path = caps.get(2)?.as_str();
    let mut parts = path.split(['/', '?', '#']).filter(|p| !p.is_empty());
    let owner = parts.next()?;
    let repo = parts.next()?.trim_end_matches(".git");
    if repo.is_empty() {
        return None;
    }
    Some(format!("{}/{}", owner, repo))
}

/// First GitHub slug among the document's URLs.
pub fn document_slug(doc: &Document) -> Option<String> {
    let fixed = ["home_page", "project_url", "repository_url"]
        .into_iter()
        .map(|key| str_field(doc, key).to_string());
    fixed
        .chain(map_field(doc, "project_urls").into_values())
        .filter(|url| !url.is_empty())
        .find_map(|url| repository_slug(&crate::registry_npm::git_url_to_https(&url)))
}

pub struct GithubSource {
    api_url: String,
    token: Option<String>,
    fetcher: RateLimitedFetcher<RepositoryStats>,
}

impl GithubSource {
    pub fn new(
        http: reqwest::Client,
        config: &GithubSourceConfig,
        cache: Arc<FetchCache<RepositoryStats>>,
    ) -> Self {
        Self {
            api_url: config.rate.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            fetcher: RateLimitedFetcher::new("github", http, &config.rate)
                .with_detector(github_detector)
                .with_cache(cache),
        }
    }

    pub fn calls(&self) -> u64 {
        self.fetcher.calls()
    }
}

fn parse_repo(slug: &str, body: &str) -> Result<RepositoryStats, FetchError> {
    let payload: RepoPayload = json_body(body)?;
    Ok(RepositoryStats {
        slug: slug.to_string(),
        stars: payload.stargazers_count,
        watchers: payload.subscribers_count,
        open_issues: payload.open_issues_count.or(payload.open_issues).unwrap_or(0),
        is_archived: payload.archived,
        updated: payload
            .updated_at
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(0),
    })
}

#[async_trait]
impl EnrichmentSource for GithubSource {
    type Data = RepositoryStats;

    fn name(&self) -> &str {
        "github"
    }

    fn identifier(&self, doc: &Document) -> Option<String> {
        let slug = document_slug(doc);
        if slug.is_none() {
            tracing::debug!(package = str_field(doc, "name"), "no github repository url");
        }
        slug
    }

    async fn fetch(&self, identifier: &str, _doc: &Document) -> Option<RepositoryStats> {
        let url = format!("{}/repos/{}", self.api_url, identifier);
        self.fetcher
            .fetch(
                identifier,
                |http| {
                    let request = http
                        .get(&url)
                        .header(ACCEPT, "application/vnd.github+json");
                    match &self.token {
                        Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
                        None => request,
                    }
                },
                |body| parse_repo(identifier, body),
            )
            .await
    }

    fn update_fields(&self, data: &RepositoryStats, _doc: &Document) -> Document {
        data.to_fields()
    }
}
