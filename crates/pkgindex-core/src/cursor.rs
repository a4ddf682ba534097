//! Grouped, paginated walk over an indexed collection.
//!
//! [`PageCursor`] issues a grouped search (one representative document per
//! distinct group key) page by page. The total `found` is captured from the
//! first page and iteration stops once that many groups have been covered
//! or a page comes back empty. Documents added during the walk may be
//! missed; removed documents can shift later pages. Enrichment is
//! idempotent, so a re-run covers either case.
//!
//! The cursor restarts from page 1 every time it is created; no resume
//! token is kept.

use tracing::debug;

use crate::index::{IndexResult, SearchIndex, SearchParams};
use crate::models::Document;

pub const DEFAULT_PAGE_SIZE: u32 = 250;

/// What to walk and how to group it.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorQuery {
    pub q: String,
    pub query_by: String,
    pub filter_by: Option<String>,
    pub group_by: String,
    pub group_limit: u32,
    pub page_size: u32,
    pub include_fields: Option<String>,
}

impl CursorQuery {
    /// All documents, one per distinct `group_by` value.
    pub fn grouped(group_by: &str) -> Self {
        Self {
            q: "*".to_string(),
            query_by: "name".to_string(),
            filter_by: None,
            group_by: group_by.to_string(),
            group_limit: 1,
            page_size: DEFAULT_PAGE_SIZE,
            include_fields: None,
        }
    }

    pub fn with_filter(mut self, filter_by: Option<String>) -> Self {
        self.filter_by = filter_by;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn params(&self, page: u32) -> SearchParams {
        SearchParams {
            q: self.q.clone(),
            query_by: self.query_by.clone(),
            filter_by: self.filter_by.clone(),
            sort_by: None,
            group_by: Some(self.group_by.clone()),
            group_limit: Some(self.group_limit),
            include_fields: self.include_fields.clone(),
            page,
            per_page: self.page_size,
        }
    }
}

pub struct PageCursor<'a, I: SearchIndex + ?Sized> {
    index: &'a I,
    collection: String,
    query: CursorQuery,
    page: u32,
    found: Option<u64>,
    done: bool,
}

impl<'a, I: SearchIndex + ?Sized> PageCursor<'a, I> {
    pub fn new(index: &'a I, collection: &str, query: CursorQuery) -> Self {
        Self {
            index,
            collection: collection.to_string(),
            query,
            page: 0,
            found: None,
            done: false,
        }
    }

    /// Total groups reported by the first page; `None` before it is read.
    pub fn found(&self) -> Option<u64> {
        self.found
    }

    /// Number of the last page fetched (1-based), 0 before the first fetch.
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Next page of representative documents, or `None` when exhausted.
    pub async fn next_page(&mut self) -> IndexResult<Option<Vec<Document>>> {
        if self.done {
            return Ok(None);
        }
        if let Some(found) = self.found {
            if u64::from(self.page) * u64::from(self.query.page_size) >= found {
                self.done = true;
                return Ok(None);
            }
        }

        let page = self.page + 1;
        let response = self
            .index
            .search(&self.collection, &self.query.params(page))
            .await?;
        self.page = page;
        let found = *self.found.get_or_insert(response.found);

        let docs = response.documents();
        debug!(
            collection = %self.collection,
            page,
            found,
            groups = docs.len(),
            "fetched page"
        );
        if docs.is_empty() {
            self.done = true;
            return Ok(None);
        }
        Ok(Some(docs))
    }

    /// Drain every remaining page.
    pub async fn collect_all(mut self) -> IndexResult<Vec<Document>> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await? {
            all.extend(page);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::memory::InMemoryIndex;
    use crate::index::ImportAction;
    use crate::schema::{CollectionSchema, FieldSpec, FieldType};
    use serde_json::json;

    async fn index_with(groups: usize, per_group: usize) -> InMemoryIndex {
        let index = InMemoryIndex::new();
        index
            .create_collection(&CollectionSchema::new(
                "c",
                vec![FieldSpec::new("name_sortable", FieldType::String)],
            ))
            .await
            .unwrap();
        let mut docs = Vec::new();
        for g in 0..groups {
            for v in 0..per_group {
                docs.push(
                    json!({"id": format!("{g}-{v}"), "name": format!("pkg{g}"), "name_sortable": format!("pkg{g}")})
                        .as_object()
                        .cloned()
                        .unwrap(),
                );
            }
        }
        index.import_documents("c", &docs, ImportAction::Upsert).await.unwrap();
        index
    }

    #[tokio::test]
    async fn visits_each_group_once() {
        let index = index_with(7, 3).await;
        let query = CursorQuery::grouped("name_sortable").with_page_size(3);
        let mut cursor = PageCursor::new(&index, "c", query);
        let mut names = Vec::new();
        let mut pages = 0;
        while let Some(page) = cursor.next_page().await.unwrap() {
            pages += 1;
            names.extend(page.into_iter().map(|d| d["name"].as_str().unwrap().to_string()));
        }
        assert_eq!(cursor.found(), Some(7));
        assert_eq!(pages, 3);
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 7);
    }

    #[tokio::test]
    async fn exact_multiple_of_page_size_stops_without_extra_call() {
        let index = index_with(4, 1).await;
        let mut cursor = PageCursor::new(&index, "c", CursorQuery::grouped("name_sortable").with_page_size(2));
        assert!(cursor.next_page().await.unwrap().is_some());
        assert!(cursor.next_page().await.unwrap().is_some());
        assert!(cursor.next_page().await.unwrap().is_none());
        assert_eq!(cursor.page(), 2);
    }

    #[tokio::test]
    async fn empty_collection_yields_nothing() {
        let index = index_with(0, 0).await;
        let cursor = PageCursor::new(&index, "c", CursorQuery::grouped("name_sortable"));
        assert!(cursor.collect_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_collection_is_an_error() {
        let index = InMemoryIndex::new();
        let mut cursor = PageCursor::new(&index, "nope", CursorQuery::grouped("name_sortable"));
        assert!(cursor.next_page().await.is_err());
    }
}
