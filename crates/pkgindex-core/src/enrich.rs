//! Enrichment runner.
//!
//! An [`EnrichmentSource`] knows how to derive an external identifier from
//! an indexed document, how to fetch data for it and which fields to merge
//! back. [`EnrichmentRunner`] drives any source over a collection:
//!
//! ```text
//!   Start ─▶ next group? ──no──▶ Done
//!               │yes
//!               ▼
//!       identifier(doc)? ──no──▶ skip (not counted)
//!               │yes
//!               ▼
//!       limit reached? ──yes──▶ LimitReached
//!               │no
//!               ▼
//!        fetch(identifier) ──None──▶ next
//!               │Some
//!               ▼
//!        update_document(id) ──Err──▶ log, count failure, next
//!               │Ok
//!               ▼
//!            counters ─▶ next
//! ```
//!
//! Only a missing target collection (or a failing [`EnrichmentSource::prepare`])
//! aborts a run, and both happen before the first document is read.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cursor::{CursorQuery, PageCursor, DEFAULT_PAGE_SIZE};
use crate::error::PipelineError;
use crate::index::SearchIndex;
use crate::models::{str_field, Document};

/// One enrichment provider.
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    /// Payload returned by [`fetch`](EnrichmentSource::fetch).
    type Data: Send + Sync;

    /// Short name used in logs and stats (`github`, `downloads`, ...).
    fn name(&self) -> &str;

    /// Field the cursor groups on. One representative document is
    /// enriched per group.
    fn group_by(&self) -> &str {
        "name_sortable"
    }

    /// External identifier for `doc`, or `None` to skip it.
    fn identifier(&self, doc: &Document) -> Option<String>;

    /// One-off setup before the walk (download a lookup table, ...).
    async fn prepare(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// External data for `identifier`. `None` means nothing to merge.
    async fn fetch(&self, identifier: &str, doc: &Document) -> Option<Self::Data>;

    /// Partial update merged into the document.
    fn update_fields(&self, data: &Self::Data, doc: &Document) -> Document;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Done,
    LimitReached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichStats {
    pub source: String,
    pub target: String,
    pub outcome: RunOutcome,
    /// Groups reported by the first page.
    pub found: u64,
    pub visited: u64,
    pub skipped: u64,
    pub no_data: u64,
    pub updated: u64,
    pub write_failures: u64,
}

impl EnrichStats {
    fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            outcome: RunOutcome::Done,
            found: 0,
            visited: 0,
            skipped: 0,
            no_data: 0,
            updated: 0,
            write_failures: 0,
        }
    }

    /// Documents that reached the write-back step; counted against the limit.
    pub fn processed(&self) -> u64 {
        self.updated + self.write_failures
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Restrict the walk to one package name.
    pub only: Option<String>,
    /// Stop after this many write-backs.
    pub limit: Option<u64>,
    pub page_size: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            only: None,
            limit: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

pub struct EnrichmentRunner<'a, S: EnrichmentSource, I: SearchIndex + ?Sized> {
    index: &'a I,
    source: &'a S,
    options: RunOptions,
}

impl<'a, S: EnrichmentSource, I: SearchIndex + ?Sized> EnrichmentRunner<'a, S, I> {
    pub fn new(index: &'a I, source: &'a S, options: RunOptions) -> Self {
        Self {
            index,
            source,
            options,
        }
    }

    fn limit_reached(&self, stats: &EnrichStats) -> bool {
        self.options
            .limit
            .is_some_and(|limit| stats.processed() >= limit)
    }

    /// Walk `target` and enrich every group representative.
    pub async fn run(&self, target: &str) -> Result<EnrichStats, PipelineError> {
        let name = self.source.name();
        if !self.index.collection_exists(target).await? {
            return Err(PipelineError::Configuration(format!(
                "target collection '{}' does not exist",
                target
            )));
        }
        self.source.prepare().await.map_err(|e| {
            PipelineError::Configuration(format!("{} source setup failed: {:#}", name, e))
        })?;

        let filter = self
            .options
            .only
            .as_ref()
            .map(|only| format!("name:=`{}`", only));
        let query = CursorQuery::grouped(self.source.group_by())
            .with_filter(filter)
            .with_page_size(self.options.page_size);
        let mut cursor = PageCursor::new(self.index, target, query);
        let mut stats = EnrichStats::new(name, target);

        info!(source = name, target, "start enriching");
        'pages: loop {
            if self.limit_reached(&stats) {
                stats.outcome = RunOutcome::LimitReached;
                break;
            }
            let page = match cursor.next_page().await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) if stats.visited == 0 => return Err(e.into()),
                Err(e) => {
                    warn!(source = name, target, page = cursor.page() + 1, error = %e, "page fetch failed, stopping walk");
                    break;
                }
            };
            stats.found = cursor.found().unwrap_or(0);

            for doc in page {
                stats.visited += 1;
                let Some(identifier) = self.source.identifier(&doc) else {
                    stats.skipped += 1;
                    debug!(source = name, package = str_field(&doc, "name"), "no identifier, skipping");
                    continue;
                };
                if self.limit_reached(&stats) {
                    info!(source = name, limit = ?self.options.limit, "reached limit");
                    stats.outcome = RunOutcome::LimitReached;
                    break 'pages;
                }

                let Some(data) = self.source.fetch(&identifier, &doc).await else {
                    stats.no_data += 1;
                    continue;
                };

                let id = str_field(&doc, "id");
                let fields = self.source.update_fields(&data, &doc);
                match self.index.update_document(target, id, &fields).await {
                    Ok(()) => {
                        stats.updated += 1;
                        info!(
                            source = name,
                            page = cursor.page(),
                            count = stats.updated,
                            id,
                            "updated document"
                        );
                    }
                    Err(e) => {
                        stats.write_failures += 1;
                        warn!(source = name, id, error = %e, "write-back failed, skipping");
                    }
                }
            }
        }

        info!(
            source = name,
            target,
            updated = stats.updated,
            skipped = stats.skipped,
            no_data = stats.no_data,
            failures = stats.write_failures,
            "done"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::memory::InMemoryIndex;
    use crate::index::ImportAction;
    use crate::schema::CollectionSchema;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Derives the identifier from `repo`; data is the identifier length.
    struct LenSource {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl EnrichmentSource for LenSource {
        type Data = usize;

        fn name(&self) -> &str {
            "len"
        }

        fn identifier(&self, doc: &Document) -> Option<String> {
            let repo = str_field(doc, "repo");
            (!repo.is_empty()).then(|| repo.to_string())
        }

        async fn fetch(&self, identifier: &str, _doc: &Document) -> Option<usize> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            (identifier != "absent").then_some(identifier.len())
        }

        fn update_fields(&self, data: &usize, _doc: &Document) -> Document {
            json!({"repo_len": data}).as_object().cloned().unwrap()
        }
    }

    async fn index(repos: &[&str]) -> InMemoryIndex {
        let index = InMemoryIndex::new();
        index
            .create_collection(&CollectionSchema::new("t", vec![]))
            .await
            .unwrap();
        let docs: Vec<Document> = repos
            .iter()
            .enumerate()
            .map(|(i, repo)| {
                json!({"id": format!("d{i}"), "name": format!("p{i}"), "name_sortable": format!("p{i}"), "repo": repo})
                    .as_object()
                    .cloned()
                    .unwrap()
            })
            .collect();
        index.import_documents("t", &docs, ImportAction::Upsert).await.unwrap();
        index
    }

    fn source() -> LenSource {
        LenSource {
            fetches: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn missing_target_is_fatal() {
        let index = InMemoryIndex::new();
        let src = source();
        let err = EnrichmentRunner::new(&index, &src, RunOptions::default())
            .run("missing")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[tokio::test]
    async fn skips_without_identifier_and_without_data() {
        let index = index(&["a/b", "", "absent", "c/dd"]).await;
        let src = source();
        let stats = EnrichmentRunner::new(&index, &src, RunOptions::default())
            .run("t")
            .await
            .unwrap();
        assert_eq!(stats.outcome, RunOutcome::Done);
        assert_eq!(stats.visited, 4);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.no_data, 1);
        assert_eq!(stats.updated, 2);
        assert_eq!(index.get_document("t", "d3").unwrap()["repo_len"], 4);
        assert!(index.get_document("t", "d1").unwrap().get("repo_len").is_none());
    }

    #[tokio::test]
    async fn limit_ignores_skipped_documents() {
        let index = index(&["", "", "a/b", "c/d", "e/f"]).await;
        let src = source();
        let options = RunOptions {
            limit: Some(2),
            page_size: 2,
            ..Default::default()
        };
        let stats = EnrichmentRunner::new(&index, &src, options).run("t").await.unwrap();
        assert_eq!(stats.outcome, RunOutcome::LimitReached);
        assert_eq!(stats.updated, 2);
        assert_eq!(src.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn only_filters_by_name() {
        let index = index(&["a/b", "c/d"]).await;
        let src = source();
        let options = RunOptions {
            only: Some("p1".into()),
            ..Default::default()
        };
        let stats = EnrichmentRunner::new(&index, &src, options).run("t").await.unwrap();
        assert_eq!(stats.updated, 1);
        assert!(index.get_document("t", "d1").unwrap().contains_key("repo_len"));
    }
}
