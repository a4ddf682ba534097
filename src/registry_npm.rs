//! npm scanner.
//!
//! Discovery searches `/-/v1/search` once per configured keyword
//! (`keywords:<kw>`) and scope (`scope:<scope>`), paging with `size`/`from`.
//! Search hits are re-checked locally because the search is fuzzy: a
//! package is kept when its name sits in a configured scope or one of its
//! keywords matches a configured keyword (case-insensitive).
//!
//! The full package documents are then fetched by a bounded worker pool
//! (`max_workers` tasks). Every worker goes through the same [`RateGate`],
//! so outbound pacing stays global. Results are forwarded as they complete;
//! order is irrelevant since indexing is an upsert.
//!
//! npm has no changes feed usable here, so incremental mode scans in full.
//!
//! [`RateGate`]: crate::fetcher::RateGate

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use pkgindex_core::models::{keyword_list, PackageDocument, Registry};
use reqwest::header::AUTHORIZATION;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::NpmSourceConfig;
use crate::fetcher::{json_body, RateLimitedFetcher};
use crate::registry::{parse_timestamp, RegistryScanner, ScanOptions, ScanSummary};

/// A search hit kept for fetching, with its search scores.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub name: String,
    pub scores: Map<String, Value>,
}

pub struct NpmScanner {
    search_url: String,
    registry_url: String,
    search_size: u32,
    max_workers: usize,
    auth_token: Option<String>,
    keywords: Vec<String>,
    scopes: Vec<String>,
    search: RateLimitedFetcher<Value>,
    packuments: Arc<RateLimitedFetcher<Value>>,
}

impl NpmScanner {
    pub fn new(
        http: reqwest::Client,
        config: &NpmSourceConfig,
        keywords: Vec<String>,
        scopes: Vec<String>,
    ) -> Self {
        let search = RateLimitedFetcher::new("npm-search", http.clone(), &config.rate).without_memo();
        let packuments = RateLimitedFetcher::new("npm", http, &config.rate)
            .with_gate(search.gate().clone())
            .without_memo();
        Self {
            search_url: config.rate.base_url.trim_end_matches('/').to_string(),
            registry_url: config.registry_url.trim_end_matches('/').to_string(),
            search_size: config.search_size.max(1),
            max_workers: config.max_workers.max(1),
            auth_token: config.auth_token.clone(),
            keywords,
            scopes: scopes
                .into_iter()
                .map(|s| s.trim_start_matches('@').to_string())
                .collect(),
            search,
            packuments: Arc::new(packuments),
        }
    }

    pub fn calls(&self) -> u64 {
        self.search.calls() + self.packuments.calls()
    }

    /// All pages of one search query.
    async fn search_all(&self, query: &str) -> Vec<Value> {
        let mut objects = Vec::new();
        let mut from: u64 = 0;
        loop {
            let url = format!("{}/-/v1/search", self.search_url);
            let size = self.search_size.to_string();
            let offset = from.to_string();
            let key = format!("{}@{}", query, from);
            let page = self
                .search
                .fetch(
                    &key,
                    |http| {
                        self.authorize(http.get(&url)).query(&[
                            ("text", query),
                            ("size", size.as_str()),
                            ("from", offset.as_str()),
                        ])
                    },
                    json_body::<Value>,
                )
                .await;
            let Some(page) = page else {
                warn!(query, from, "search page unavailable");
                break;
            };
            let hits = page
                .get("objects")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let total = page.get("total").and_then(Value::as_u64).unwrap_or(0);
            if hits.is_empty() {
                break;
            }
            from += hits.len() as u64;
            objects.extend(hits);
            if from >= total {
                break;
            }
        }
        debug!(query, hits = objects.len(), "search finished");
        objects
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Matching packages, first hit per name wins.
    pub async fn discover(&self) -> Vec<SearchHit> {
        let mut packages: BTreeMap<String, SearchHit> = BTreeMap::new();
        let mut rejected = 0u64;
        let queries = self
            .keywords
            .iter()
            .map(|k| format!("keywords:{}", k))
            .chain(self.scopes.iter().map(|s| format!("scope:{}", s)));
        for query in queries {
            info!(query = %query, "searching npm");
            for object in self.search_all(&query).await {
                let Some(name) = object
                    .get("package")
                    .and_then(|p| p.get("name"))
                    .and_then(Value::as_str)
                else {
                    continue;
                };
                if packages.contains_key(name) {
                    continue;
                }
                if !is_valid_package(&object, &self.keywords, &self.scopes) {
                    debug!(package = name, "rejected: no matching keyword or scope");
                    rejected += 1;
                    continue;
                }
                packages.insert(
                    name.to_string(),
                    SearchHit {
                        name: name.to_string(),
                        scores: search_scores(&object),
                    },
                );
            }
        }
        info!(valid = packages.len(), rejected, "npm discovery finished");
        packages.into_values().collect()
    }
}

async fn fetch_versions(
    fetcher: Arc<RateLimitedFetcher<Value>>,
    registry_url: String,
    auth_token: Option<String>,
    hit: SearchHit,
) -> Vec<PackageDocument> {
    let url = format!("{}/{}", registry_url, packument_path(&hit.name));
    let packument = fetcher
        .fetch(
            &hit.name,
            |http| {
                let request = http.get(&url);
                match &auth_token {
                    Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
                    None => request,
                }
            },
            json_body::<Value>,
        )
        .await;
    match packument {
        Some(packument) => version_documents(&hit, &packument),
        None => Vec::new(),
    }
}

#[async_trait]
impl RegistryScanner for NpmScanner {
    fn registry(&self) -> Registry {
        Registry::Npm
    }

    async fn scan(
        &self,
        options: &ScanOptions,
        tx: mpsc::Sender<PackageDocument>,
    ) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();
        let mut hits: Vec<SearchHit> = self
            .discover()
            .await
            .into_iter()
            .filter(|h| options.accepts_name(&h.name))
            .collect();
        if let Some(limit) = options.limit.filter(|l| *l > 0) {
            hits.truncate(limit);
        }
        if hits.is_empty() {
            warn!("no npm packages matched the search criteria");
            return Ok(summary);
        }

        let total = hits.len();
        info!(packages = total, workers = self.max_workers, "fetching npm packages");
        let permits = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();
        for hit in hits {
            let permits = permits.clone();
            let fetcher = self.packuments.clone();
            let registry_url = self.registry_url.clone();
            let auth_token = self.auth_token.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let name = hit.name.clone();
                (name, fetch_versions(fetcher, registry_url, auth_token, hit).await)
            });
        }

        let mut completed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            completed += 1;
            let (name, docs) = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "npm worker failed");
                    summary.skipped += 1;
                    continue;
                }
            };
            if completed % 10 == 0 {
                info!(completed, total, "npm progress");
            }
            if docs.is_empty() {
                debug!(package = %name, "no versions");
                summary.skipped += 1;
                continue;
            }
            summary.packages += 1;
            for doc in docs {
                if tx.send(doc).await.is_err() {
                    tasks.abort_all();
                    return Ok(summary);
                }
                summary.releases += 1;
            }
        }
        Ok(summary)
    }
}

/// Registry path for a package: the scope slash is escaped.
pub fn packument_path(name: &str) -> String {
    name.replace('/', "%2F")
}

/// Kept when the name is in a scope or a keyword matches, ignoring case.
/// Scopes are given without `@`.
pub fn is_valid_package(object: &Value, keywords: &[String], scopes: &[String]) -> bool {
    let package = object.get("package").unwrap_or(&Value::Null);
    let name = package.get("name").and_then(Value::as_str).unwrap_or("");
    if scopes
        .iter()
        .any(|scope| name.starts_with(&format!("@{}/", scope)))
    {
        return true;
    }
    let own: Vec<String> = package
        .get("keywords")
        .and_then(Value::as_array)
        .map(|ks| {
            ks.iter()
                .filter_map(Value::as_str)
                .map(str::to_lowercase)
                .collect()
        })
        .unwrap_or_default();
    keywords.iter().any(|k| own.contains(&k.to_lowercase()))
}

fn search_scores(object: &Value) -> Map<String, Value> {
    let score = object.get("score").unwrap_or(&Value::Null);
    let detail = score.get("detail").unwrap_or(&Value::Null);
    let number = |v: Option<&Value>| Value::from(v.and_then(Value::as_f64).unwrap_or(0.0));
    let mut scores = Map::new();
    scores.insert("npm_quality_score".into(), number(detail.get("quality")));
    scores.insert("npm_popularity_score".into(), number(detail.get("popularity")));
    scores.insert("npm_maintenance_score".into(), number(detail.get("maintenance")));
    scores.insert("npm_final_score".into(), number(score.get("final")));
    scores
}

/// `git+https://`, `git://`, `git+ssh://git@` and `git@host:` forms to a
/// browsable https URL without `.git`.
pub fn git_url_to_https(url: &str) -> String {
    let mut url = url.trim();
    if url.is_empty() {
        return String::new();
    }
    url = url.strip_prefix("git+").unwrap_or(url);
    let mut out = if let Some(rest) = url.strip_prefix("git://") {
        format!("https://{}", rest)
    } else if let Some(rest) = url.strip_prefix("ssh://git@") {
        format!("https://{}", rest)
    } else if let Some(rest) = url.strip_prefix("git@") {
        format!("https://{}", rest.replacen(':', "/", 1))
    } else {
        url.to_string()
    };
    if out.ends_with(".git") {
        out.truncate(out.len() - 4);
    }
    out
}

fn text<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("")
}

/// `(name, email)` from a string or `{name, email}` person entry.
fn person(v: Option<&Value>) -> (String, String) {
    match v {
        Some(Value::String(s)) => (s.clone(), String::new()),
        Some(p @ Value::Object(_)) => (text(p, "name").to_string(), text(p, "email").to_string()),
        _ => (String::new(), String::new()),
    }
}

/// One record for one version of a packument.
pub fn version_document(
    name: &str,
    data: &Value,
    packument: &Value,
    scores: &Map<String, Value>,
) -> Option<PackageDocument> {
    let version = text(data, "version");
    if version.is_empty() {
        return None;
    }
    let mut doc = PackageDocument::new(Registry::Npm, name, version);
    if let Some(scope) = name.strip_prefix('@').and_then(|n| n.split('/').next()) {
        doc.npm_scope = scope.to_string();
    }

    doc.repository_url = match data.get("repository") {
        Some(Value::String(s)) => s.clone(),
        Some(r) => text(r, "url").to_string(),
        None => String::new(),
    };
    doc.home_page = match text(data, "homepage") {
        "" => git_url_to_https(&doc.repository_url),
        home => home.to_string(),
    };
    if !doc.home_page.is_empty() {
        doc.project_urls
            .insert("Homepage".to_string(), doc.home_page.clone());
    }

    (doc.author, doc.author_email) = person(data.get("author"));
    (doc.maintainer, doc.maintainer_email) =
        person(data.get("maintainers").and_then(|m| m.as_array()?.first()));

    doc.keywords = keyword_list(data.get("keywords"));
    doc.requires_dist = data
        .get("dependencies")
        .and_then(Value::as_object)
        .map(|deps| {
            deps.iter()
                .map(|(k, v)| format!("{}@{}", k, v.as_str().unwrap_or("*")))
                .collect()
        })
        .unwrap_or_default();

    doc.summary = text(data, "description").to_string();
    doc.description = text(packument, "readme").to_string();
    doc.description_content_type = "text/markdown".to_string();
    doc.license = match data.get("license") {
        Some(Value::String(s)) => s.clone(),
        Some(l) => text(l, "type").to_string(),
        None => String::new(),
    };
    doc.platform = "node".to_string();
    doc.package_url = format!("https://www.npmjs.com/package/{}", name);
    doc.release_url = format!("https://www.npmjs.com/package/{}/v/{}", name, version);
    match data.get("deprecated") {
        Some(Value::String(reason)) => {
            doc.yanked = true;
            doc.yanked_reason = reason.clone();
        }
        Some(Value::Bool(flag)) => doc.yanked = *flag,
        _ => {}
    }
    doc.upload_timestamp = packument
        .get("time")
        .and_then(|t| t.get(version))
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or(0);
    if let Some(bugs) = data.get("bugs").map(|b| text(b, "url")).filter(|u| !u.is_empty()) {
        doc.extra.insert("bugtrack_url".into(), Value::from(bugs));
    }
    doc.extra.extend(scores.clone());
    Some(doc)
}

/// Every version of a packument, sorted by version string.
pub fn version_documents(hit: &SearchHit, packument: &Value) -> Vec<PackageDocument> {
    let Some(versions) = packument.get("versions").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut keys: Vec<&String> = versions.keys().collect();
    keys.sort();
    keys.into_iter()
        .filter_map(|v| version_document(&hit.name, &versions[v.as_str()], packument, &hit.scores))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn git_urls_normalised() {
        assert_eq!(
            git_url_to_https("git+https://github.com/plone/volto.git"),
            "https://github.com/plone/volto"
        );
        assert_eq!(git_url_to_https("git://github.com/a/b.git"), "https://github.com/a/b");
        assert_eq!(git_url_to_https("git+ssh://git@github.com/a/b.git"), "https://github.com/a/b");
        assert_eq!(git_url_to_https("git@github.com:a/b.git"), "https://github.com/a/b");
        assert_eq!(git_url_to_https(""), "");
    }

    #[test]
    fn validity_by_scope_or_keyword() {
        let scopes = strings(&["plone"]);
        let keywords = strings(&["plone"]);
        let scoped = json!({"package": {"name": "@plone/volto", "keywords": []}});
        let tagged = json!({"package": {"name": "volto-slate", "keywords": ["Plone", "slate"]}});
        let other = json!({"package": {"name": "@plonex/thing", "keywords": ["cms"]}});
        assert!(is_valid_package(&scoped, &[], &scopes));
        assert!(is_valid_package(&tagged, &keywords, &[]));
        assert!(!is_valid_package(&other, &keywords, &scopes));
    }

    #[test]
    fn scoped_names_are_escaped() {
        assert_eq!(packument_path("@plone/volto"), "@plone%2Fvolto");
        assert_eq!(packument_path("react"), "react");
    }

    #[test]
    fn packument_versions_become_records() {
        let hit = SearchHit {
            name: "@plone/volto".into(),
            scores: search_scores(&json!({"score": {"final": 0.5, "detail": {"quality": 0.9}}})),
        };
        let packument = json!({
            "readme": "# Volto",
            "time": {"17.0.0": "2023-10-01T12:00:00.000Z"},
            "versions": {
                "17.0.0": {
                    "version": "17.0.0",
                    "description": "Plone frontend",
                    "repository": {"type": "git", "url": "git+https://github.com/plone/volto.git"},
                    "author": "Plone Foundation",
                    "maintainers": [{"name": "sneridagh", "email": "s@example.org"}],
                    "keywords": "plone, react",
                    "dependencies": {"react": "^18"},
                    "deprecated": "use 18"
                },
                "16.0.0": {"version": "16.0.0", "license": {"type": "MIT"}}
            }
        });
        let docs = version_documents(&hit, &packument);
        assert_eq!(docs.len(), 2);
        let v17 = &docs[1];
        assert_eq!(v17.id, "npm:@plone/volto:17.0.0");
        assert_eq!(v17.npm_scope, "plone");
        assert_eq!(v17.home_page, "https://github.com/plone/volto");
        assert_eq!(v17.maintainer, "sneridagh");
        assert_eq!(v17.keywords, strings(&["plone", "react"]));
        assert_eq!(v17.requires_dist, strings(&["react@^18"]));
        assert!(v17.yanked);
        assert_eq!(v17.upload_timestamp, 1_696_161_600);
        assert_eq!(v17.extra["npm_quality_score"], json!(0.9));
        assert_eq!(docs[0].license, "MIT");
        assert_eq!(docs[0].upload_timestamp, 0);
    }
}
