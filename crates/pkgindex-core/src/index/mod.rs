//! Search index abstraction.
//!
//! The [`SearchIndex`] trait is the only view the pipeline has of the search
//! engine: grouped paginated search, per-document partial update, bulk import,
//! collection lifecycle and aliases. The HTTP client in the `pkgindex` crate
//! implements it against Typesense; [`memory::InMemoryIndex`] implements it
//! for tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::models::Document;
use crate::schema::CollectionSchema;

pub type IndexResult<T> = Result<T, IndexError>;

/// Search request. Mirrors the engine's query parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub query_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_fields: Option<String>,
    pub page: u32,
    pub per_page: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            q: "*".to_string(),
            query_by: "name".to_string(),
            filter_by: None,
            sort_by: None,
            group_by: None,
            group_limit: None,
            include_fields: None,
            page: 1,
            per_page: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document: Document,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedHit {
    #[serde(default)]
    pub group_key: Vec<serde_json::Value>,
    pub hits: Vec<SearchHit>,
}

/// Search result. For grouped searches `found` counts groups.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub found: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub hits: Vec<SearchHit>,
    #[serde(default)]
    pub grouped_hits: Vec<GroupedHit>,
}

impl SearchResponse {
    /// Documents of this page: the first hit of each group for grouped
    /// searches, otherwise the plain hits.
    pub fn documents(&self) -> Vec<Document> {
        if self.grouped_hits.is_empty() {
            self.hits.iter().map(|h| h.document.clone()).collect()
        } else {
            self.grouped_hits
                .iter()
                .filter_map(|g| g.hits.first().map(|h| h.document.clone()))
                .collect()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportAction {
    Create,
    Upsert,
    Update,
}

impl ImportAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ImportAction::Create => "create",
            ImportAction::Upsert => "upsert",
            ImportAction::Update => "update",
        }
    }
}

/// Per-document outcome of a bulk import, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ImportResult {
    pub fn ok(id: Option<String>) -> Self {
        Self {
            success: true,
            error: None,
            id,
        }
    }

    pub fn failed(id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    #[serde(default)]
    pub num_documents: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasInfo {
    pub name: String,
    pub collection_name: String,
}

/// Abstract search engine.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`search`](SearchIndex::search) | Paginated, optionally grouped search |
/// | [`update_document`](SearchIndex::update_document) | Merge fields into one document |
/// | [`import_documents`](SearchIndex::import_documents) | Bulk create/upsert/update |
/// | [`export_documents`](SearchIndex::export_documents) | Dump every document |
/// | [`create_collection`](SearchIndex::create_collection) | Create from schema |
/// | [`retrieve_collection`](SearchIndex::retrieve_collection) | Metadata, `None` if absent |
/// | [`delete_collection`](SearchIndex::delete_collection) | Drop a collection |
/// | [`upsert_alias`](SearchIndex::upsert_alias) | Point an alias at a collection |
/// | [`retrieve_alias`](SearchIndex::retrieve_alias) | Alias target, `None` if absent |
///
/// Data operations (`search`, `update_document`, `import_documents`,
/// `export_documents`, `retrieve_collection`) resolve aliases.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn search(&self, collection: &str, params: &SearchParams) -> IndexResult<SearchResponse>;

    /// Merge `fields` into document `id`. [`IndexError::NotFound`] if the
    /// document does not exist.
    async fn update_document(&self, collection: &str, id: &str, fields: &Document) -> IndexResult<()>;

    /// Bulk write. A rejected document shows up as a failed
    /// [`ImportResult`], not as an `Err`.
    async fn import_documents(
        &self,
        collection: &str,
        documents: &[Document],
        action: ImportAction,
    ) -> IndexResult<Vec<ImportResult>>;

    async fn export_documents(&self, collection: &str) -> IndexResult<Vec<Document>>;

    async fn create_collection(&self, schema: &CollectionSchema) -> IndexResult<CollectionInfo>;

    async fn retrieve_collection(&self, name: &str) -> IndexResult<Option<CollectionInfo>>;

    async fn delete_collection(&self, name: &str) -> IndexResult<()>;

    async fn list_collections(&self) -> IndexResult<Vec<CollectionInfo>>;

    async fn upsert_alias(&self, name: &str, collection: &str) -> IndexResult<()>;

    async fn retrieve_alias(&self, name: &str) -> IndexResult<Option<String>>;

    async fn list_aliases(&self) -> IndexResult<Vec<AliasInfo>>;

    async fn delete_alias(&self, name: &str) -> IndexResult<()>;

    /// Whether `name` resolves to a collection, directly or through an alias.
    async fn collection_exists(&self, name: &str) -> IndexResult<bool> {
        Ok(self.retrieve_collection(name).await?.is_some())
    }
}
