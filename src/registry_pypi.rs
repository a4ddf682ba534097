//! PyPI scanner.
//!
//! Full mode lists every project through the Simple JSON API, keeps those
//! whose name passes the filter and whose classifiers start with one of the
//! profile's classifier prefixes, then fetches every release from
//! `/pypi/{name}/{version}/json`.
//!
//! Incremental mode reads the two RSS feeds (`rss/updates.xml` for new
//! releases, `rss/packages.xml` for new projects), keeps the newest entry
//! per package and drops entries older than `since`.

use std::collections::HashSet;
use std::sync::OnceLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use pkgindex_core::models::{keyword_list, list_field, map_field, str_field, Document, PackageDocument, Registry};
use quick_xml::events::Event;
use regex::Regex;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::RateLimitConfig;
use crate::fetcher::{json_body, RateLimitedFetcher};
use crate::registry::{parse_timestamp, RegistryScanner, ScanMode, ScanOptions, ScanSummary};

const SIMPLE_JSON: &str = "application/vnd.pypi.simple.v1+json";
const ADDED_SUFFIX: &str = " added to PyPI";

/// One RSS item reduced to what the scan needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub package: String,
    pub version: Option<String>,
    pub timestamp: Option<i64>,
}

pub struct PypiScanner {
    base_url: String,
    classifiers: Vec<String>,
    json: RateLimitedFetcher<Value>,
    feeds: RateLimitedFetcher<String>,
}

impl PypiScanner {
    pub fn new(http: reqwest::Client, config: &RateLimitConfig, classifiers: Vec<String>) -> Self {
        let json = RateLimitedFetcher::new("pypi", http.clone(), config).without_memo();
        let feeds = RateLimitedFetcher::new("pypi-rss", http, config)
            .with_gate(json.gate().clone())
            .without_memo();
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            classifiers,
            json,
            feeds,
        }
    }

    /// Outbound calls made so far.
    pub fn calls(&self) -> u64 {
        self.json.calls() + self.feeds.calls()
    }

    async fn get_json(&self, path: &str) -> Option<Value> {
        let url = format!("{}{}", self.base_url, path);
        self.json
            .fetch(path, |http| http.get(&url), json_body::<Value>)
            .await
    }

    async fn project_json(&self, name: &str) -> Option<Value> {
        self.get_json(&format!("/pypi/{}/json", name)).await
    }

    async fn release_json(&self, name: &str, version: &str) -> Option<Value> {
        self.get_json(&format!("/pypi/{}/{}/json", name, version))
            .await
    }

    /// Project names from the Simple JSON index. Failing to read the index
    /// is fatal: there is nothing to build from.
    pub async fn project_names(&self) -> Result<Vec<String>> {
        let url = format!("{}/simple/", self.base_url);
        let Some(index) = self
            .json
            .fetch(
                "simple",
                |http| http.get(&url).header(ACCEPT, SIMPLE_JSON),
                json_body::<Value>,
            )
            .await
        else {
            bail!("could not read the PyPI simple index at {}", url);
        };
        let names: Vec<String> = index
            .get("projects")
            .and_then(Value::as_array)
            .map(|projects| {
                projects
                    .iter()
                    .filter_map(|p| p.get("name").and_then(Value::as_str))
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if names.is_empty() {
            bail!("empty project list from {}", url);
        }
        info!(projects = names.len(), "read PyPI simple index");
        Ok(names)
    }

    /// Entries from both feeds, newest first, one per package.
    pub async fn feed_entries(&self, since: i64) -> Vec<FeedEntry> {
        let mut entries = Vec::new();
        for feed in ["rss/updates.xml", "rss/packages.xml"] {
            let url = format!("{}/{}", self.base_url, feed);
            let Some(xml) = self
                .feeds
                .fetch(feed, |http| http.get(&url), |body| Ok(body.to_string()))
                .await
            else {
                warn!(feed, "RSS feed unavailable");
                continue;
            };
            let parsed = parse_feed(&xml);
            info!(feed, entries = parsed.len(), "parsed RSS feed");
            entries.extend(parsed);
        }
        select_updates(entries, since)
    }

    fn matches_classifiers(&self, info: &Document) -> bool {
        has_classifier(&list_field(info, "classifiers"), &self.classifiers)
    }

    async fn send_release(
        &self,
        name: &str,
        version: &str,
        upload_timestamp: Option<i64>,
        tx: &mpsc::Sender<PackageDocument>,
        summary: &mut ScanSummary,
    ) -> bool {
        let Some(payload) = self.release_json(name, version).await else {
            summary.skipped += 1;
            return true;
        };
        let Some(mut doc) = release_document(&payload) else {
            debug!(package = name, version, "release without info");
            summary.skipped += 1;
            return true;
        };
        if let Some(ts) = upload_timestamp {
            doc.upload_timestamp = ts;
        }
        if tx.send(doc).await.is_err() {
            return false;
        }
        summary.releases += 1;
        true
    }

    async fn scan_full(
        &self,
        options: &ScanOptions,
        tx: &mpsc::Sender<PackageDocument>,
    ) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();
        for name in self.project_names().await? {
            if options.limit_reached(summary.packages as usize) {
                info!(limit = ?options.limit, "package limit reached");
                break;
            }
            if !options.accepts_name(&name) {
                continue;
            }
            let Some(project) = self.project_json(&name).await else {
                summary.skipped += 1;
                continue;
            };
            let info = project
                .get("info")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            if !self.matches_classifiers(&info) {
                debug!(package = %name, "no matching classifier");
                summary.skipped += 1;
                continue;
            }
            info!(package = %name, "found matching package");
            summary.packages += 1;

            for (version, uploaded) in releases(&project) {
                if !self
                    .send_release(&name, &version, uploaded, tx, &mut summary)
                    .await
                {
                    return Ok(summary);
                }
            }
        }
        Ok(summary)
    }

    async fn scan_incremental(
        &self,
        since: i64,
        options: &ScanOptions,
        tx: &mpsc::Sender<PackageDocument>,
    ) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();
        for entry in self.feed_entries(since).await {
            if options.limit_reached(summary.packages as usize) {
                break;
            }
            if !options.accepts_name(&entry.package) {
                continue;
            }
            let version = match entry.version {
                Some(v) => v,
                None => match self.project_json(&entry.package).await {
                    Some(project) => project
                        .get("info")
                        .and_then(|i| i.get("version"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    None => String::new(),
                },
            };
            if version.is_empty() {
                summary.skipped += 1;
                continue;
            }
            let Some(payload) = self.release_json(&entry.package, &version).await else {
                summary.skipped += 1;
                continue;
            };
            let Some(mut doc) = release_document(&payload) else {
                summary.skipped += 1;
                continue;
            };
            if !has_classifier(&doc.classifiers, &self.classifiers) {
                debug!(package = %entry.package, "update without matching classifier");
                summary.skipped += 1;
                continue;
            }
            if doc.upload_timestamp == 0 {
                doc.upload_timestamp = entry.timestamp.unwrap_or(0);
            }
            summary.packages += 1;
            if tx.send(doc).await.is_err() {
                break;
            }
            summary.releases += 1;
        }
        Ok(summary)
    }
}

#[async_trait]
impl RegistryScanner for PypiScanner {
    fn registry(&self) -> Registry {
        Registry::Pypi
    }

    async fn scan(
        &self,
        options: &ScanOptions,
        tx: mpsc::Sender<PackageDocument>,
    ) -> Result<ScanSummary> {
        match options.mode {
            ScanMode::Full => self.scan_full(options, &tx).await,
            ScanMode::Incremental { since } => self.scan_incremental(since, options, &tx).await,
        }
    }
}

/// Any classifier starting with any of the prefixes. No prefixes: accept all.
pub fn has_classifier(classifiers: &[String], prefixes: &[String]) -> bool {
    prefixes.is_empty()
        || prefixes
            .iter()
            .any(|prefix| classifiers.iter().any(|c| c.starts_with(prefix.as_str())))
}

/// `(version, upload timestamp)` for each release of a project payload,
/// sorted by version string. The timestamp comes from the first file.
pub fn releases(project: &Value) -> Vec<(String, Option<i64>)> {
    let Some(releases) = project.get("releases").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut out: Vec<(String, Option<i64>)> = releases
        .iter()
        .map(|(version, files)| (version.clone(), first_upload(files)))
        .collect();
    out.sort();
    out
}

fn first_upload(files: &Value) -> Option<i64> {
    let file = files.as_array()?.first()?;
    ["upload_time_iso_8601", "upload_time"]
        .iter()
        .find_map(|key| file.get(*key).and_then(Value::as_str).and_then(parse_timestamp))
}

/// Build a record from a `/pypi/{name}/{version}/json` payload.
pub fn release_document(payload: &Value) -> Option<PackageDocument> {
    let info = payload.get("info")?.as_object()?;
    let name = str_field(info, "name");
    let version = str_field(info, "version");
    if name.is_empty() || version.is_empty() {
        return None;
    }

    let mut doc = PackageDocument::new(Registry::Pypi, name, version);
    doc.summary = str_field(info, "summary").to_string();
    doc.description = str_field(info, "description").to_string();
    doc.description_content_type = str_field(info, "description_content_type").to_string();
    doc.author = str_field(info, "author").to_string();
    doc.author_email = str_field(info, "author_email").to_string();
    doc.maintainer = str_field(info, "maintainer").to_string();
    doc.maintainer_email = str_field(info, "maintainer_email").to_string();
    doc.license = str_field(info, "license").to_string();
    doc.keywords = keyword_list(info.get("keywords"));
    doc.classifiers = list_field(info, "classifiers");
    doc.platform = str_field(info, "platform").to_string();
    doc.home_page = str_field(info, "home_page").to_string();
    doc.docs_url = str_field(info, "docs_url").to_string();
    doc.project_url = str_field(info, "project_url").to_string();
    doc.package_url = str_field(info, "package_url").to_string();
    doc.release_url = str_field(info, "release_url").to_string();
    doc.project_urls = map_field(info, "project_urls");
    doc.requires_dist = list_field(info, "requires_dist");
    doc.requires_python = str_field(info, "requires_python").to_string();
    doc.yanked = info.get("yanked").and_then(Value::as_bool).unwrap_or(false);
    doc.yanked_reason = str_field(info, "yanked_reason").to_string();
    doc.repository_url = repository_from_urls(&doc);
    doc.upload_timestamp = payload
        .get("urls")
        .and_then(first_upload)
        .unwrap_or(0);
    Some(doc)
}

fn repository_from_urls(doc: &PackageDocument) -> String {
    doc.project_urls
        .iter()
        .find(|(label, _)| {
            let label = label.to_ascii_lowercase();
            ["source", "repository", "code"]
                .iter()
                .any(|key| label.contains(key))
        })
        .map(|(_, url)| url.clone())
        .unwrap_or_default()
}

fn link_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"/project/([^/]+)/?(?:([^/]+)/?)?$").expect("feed link pattern is valid")
    })
}

/// Package and version from an item link, falling back to the title
/// (`"name version"` or `"name added to PyPI"`).
pub fn parse_entry(title: &str, link: &str, published: &str) -> Option<FeedEntry> {
    let (mut package, mut version) = (None, None);
    if let Some(caps) = link_pattern().captures(link.trim()) {
        package = caps.get(1).map(|m| m.as_str().to_string());
        version = caps.get(2).map(|m| m.as_str().to_string());
    }
    let title = title.trim();
    if package.is_none() && !title.is_empty() {
        if let Some(name) = title.strip_suffix(ADDED_SUFFIX) {
            package = Some(name.trim().to_string());
        } else if let Some((name, ver)) = title.rsplit_once(' ') {
            package = Some(name.trim().to_string());
            version = Some(ver.trim().to_string());
        } else {
            package = Some(title.to_string());
        }
    }
    let package = package.filter(|p| !p.is_empty())?;
    let timestamp = chrono::DateTime::parse_from_rfc2822(published.trim())
        .ok()
        .map(|dt| dt.timestamp());
    Some(FeedEntry {
        package,
        version: version.filter(|v| !v.is_empty()),
        timestamp,
    })
}

/// Parse RSS 2.0 `<item>`s. Malformed XML ends the parse with whatever
/// was read so far.
pub fn parse_feed(xml: &str) -> Vec<FeedEntry> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut in_item = false;
    let mut field: Option<String> = None;
    let (mut title, mut link, mut published) = (String::new(), String::new(), String::new());

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "item" {
                    in_item = true;
                    title.clear();
                    link.clear();
                    published.clear();
                } else if in_item {
                    field = Some(tag);
                }
            }
            Ok(Event::Text(t)) if in_item => {
                let text = t.unescape().map(|c| c.into_owned()).unwrap_or_default();
                match field.as_deref() {
                    Some("title") => title.push_str(&text),
                    Some("link") => link.push_str(&text),
                    Some("pubDate") => published.push_str(&text),
                    _ => {}
                }
            }
            Ok(Event::CData(c)) if in_item => {
                let text = String::from_utf8_lossy(&c.into_inner()).to_string();
                if field.as_deref() == Some("title") {
                    title.push_str(&text);
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"item" {
                    in_item = false;
                    match parse_entry(&title, &link, &published) {
                        Some(entry) => entries.push(entry),
                        None => debug!(title = %title, "unparseable feed entry"),
                    }
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(error = %e, "malformed RSS feed");
                break;
            }
            _ => {}
        }
    }
    entries
}

/// Newest first, one entry per package, nothing older than `since`.
/// Entries without a timestamp are kept.
pub fn select_updates(mut entries: Vec<FeedEntry>, since: i64) -> Vec<FeedEntry> {
    entries.sort_by(|a, b| b.timestamp.unwrap_or(0).cmp(&a.timestamp.unwrap_or(0)));
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|e| !matches!(e.timestamp, Some(ts) if ts < since))
        .filter(|e| seen.insert(e.package.clone()))
        .collect()
}
