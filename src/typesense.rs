//! Typesense REST client.
//!
//! Implements [`SearchIndex`] over the Typesense HTTP API. Status codes map
//! onto [`IndexError`]: 404 is `NotFound`, other 4xx are `Rejected`, 5xx and
//! connection failures are `Transport`. Bulk import and export use JSON
//! lines.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use pkgindex_core::error::IndexError;
use pkgindex_core::index::{
    AliasInfo, CollectionInfo, ImportAction, ImportResult, IndexResult, SearchIndex, SearchParams,
    SearchResponse,
};
use pkgindex_core::models::{str_field, Document};
use pkgindex_core::schema::CollectionSchema;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::IndexConfig;

const API_KEY_HEADER: &str = "X-TYPESENSE-API-KEY";

pub struct TypesenseClient {
    http: reqwest::Client,
    base: Url,
    api_key: String,
}

/// A Typesense API key (search-only keys are scoped to collections).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub value_prefix: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub collections: Vec<String>,
}

impl TypesenseClient {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let base = Url::parse(&config.url)
            .with_context(|| format!("invalid index url: {}", config.url))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("index url cannot be used as a base: {}", config.url);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base,
            api_key: config.api_key.clone().unwrap_or_default(),
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        self.http
            .request(method, self.url(segments))
            .header(API_KEY_HEADER, &self.api_key)
    }

    async fn send(&self, request: RequestBuilder) -> IndexResult<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| IndexError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        Err(match status {
            StatusCode::NOT_FOUND => IndexError::NotFound(message),
            s if s.is_client_error() => IndexError::Rejected(format!("{}: {}", s, message)),
            s => IndexError::Transport(format!("{}: {}", s, message)),
        })
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> IndexResult<T> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| IndexError::Transport(format!("unexpected response: {}", e)))
    }

    async fn text(&self, request: RequestBuilder) -> IndexResult<String> {
        self.send(request)
            .await?
            .text()
            .await
            .map_err(|e| IndexError::Transport(e.to_string()))
    }

    async fn optional<T: DeserializeOwned>(&self, request: RequestBuilder) -> IndexResult<Option<T>> {
        match self.json(request).await {
            Ok(v) => Ok(Some(v)),
            Err(IndexError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ============ API keys ============

    pub async fn list_keys(&self) -> IndexResult<Vec<ApiKey>> {
        #[derive(Deserialize)]
        struct Keys {
            keys: Vec<ApiKey>,
        }
        let keys: Keys = self.json(self.request(Method::GET, &["keys"])).await?;
        Ok(keys.keys)
    }

    /// Create a key that may only search `collection`. `value` is generated
    /// by the server when `None`.
    pub async fn create_search_key(&self, collection: &str, value: Option<&str>) -> IndexResult<ApiKey> {
        let mut body = json!({
            "description": "Search-only key.",
            "actions": ["documents:search"],
            "collections": [collection],
        });
        if let Some(value) = value {
            body["value"] = json!(value);
        }
        self.json(self.request(Method::POST, &["keys"]).json(&body)).await
    }

    pub async fn delete_key(&self, id: u64) -> IndexResult<()> {
        let id = id.to_string();
        self.send(self.request(Method::DELETE, &["keys", &id])).await?;
        Ok(())
    }
}

fn parse_jsonl(body: &str) -> IndexResult<Vec<Document>> {
    body.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            serde_json::from_str::<Document>(line)
                .map_err(|e| IndexError::Transport(format!("bad export line: {}", e)))
        })
        .collect()
}

#[async_trait]
impl SearchIndex for TypesenseClient {
    async fn search(&self, collection: &str, params: &SearchParams) -> IndexResult<SearchResponse> {
        let request = self
            .request(Method::GET, &["collections", collection, "documents", "search"])
            .query(params);
        self.json(request).await
    }

    async fn update_document(&self, collection: &str, id: &str, fields: &Document) -> IndexResult<()> {
        let request = self
            .request(Method::PATCH, &["collections", collection, "documents", id])
            .json(fields);
        self.send(request).await?;
        Ok(())
    }

    async fn import_documents(
        &self,
        collection: &str,
        documents: &[Document],
        action: ImportAction,
    ) -> IndexResult<Vec<ImportResult>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let mut body = String::new();
        for doc in documents {
            let line = serde_json::to_string(doc)
                .map_err(|e| IndexError::Rejected(format!("unserializable document: {}", e)))?;
            body.push_str(&line);
            body.push('\n');
        }
        let request = self
            .request(Method::POST, &["collections", collection, "documents", "import"])
            .query(&[("action", action.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body);
        let response = self.text(request).await?;

        let mut results = Vec::with_capacity(documents.len());
        for (i, line) in response.lines().filter(|l| !l.trim().is_empty()).enumerate() {
            let id = documents
                .get(i)
                .map(|d| str_field(d, "id").to_string())
                .filter(|id| !id.is_empty());
            let result = match serde_json::from_str::<ImportResult>(line) {
                Ok(r) => ImportResult { id: r.id.or(id), ..r },
                Err(e) => ImportResult::failed(id, format!("unparseable import result: {}", e)),
            };
            results.push(result);
        }
        Ok(results)
    }

    async fn export_documents(&self, collection: &str) -> IndexResult<Vec<Document>> {
        let body = self
            .text(self.request(Method::GET, &["collections", collection, "documents", "export"]))
            .await?;
        parse_jsonl(&body)
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> IndexResult<CollectionInfo> {
        self.json(self.request(Method::POST, &["collections"]).json(schema))
            .await
    }

    async fn retrieve_collection(&self, name: &str) -> IndexResult<Option<CollectionInfo>> {
        self.optional(self.request(Method::GET, &["collections", name]))
            .await
    }

    async fn delete_collection(&self, name: &str) -> IndexResult<()> {
        self.send(self.request(Method::DELETE, &["collections", name]))
            .await?;
        Ok(())
    }

    async fn list_collections(&self) -> IndexResult<Vec<CollectionInfo>> {
        self.json(self.request(Method::GET, &["collections"])).await
    }

    async fn upsert_alias(&self, name: &str, collection: &str) -> IndexResult<()> {
        let request = self
            .request(Method::PUT, &["aliases", name])
            .json(&json!({ "collection_name": collection }));
        self.send(request).await?;
        Ok(())
    }

    async fn retrieve_alias(&self, name: &str) -> IndexResult<Option<String>> {
        let alias: Option<AliasInfo> = self
            .optional(self.request(Method::GET, &["aliases", name]))
            .await?;
        Ok(alias.map(|a| a.collection_name))
    }

    async fn list_aliases(&self) -> IndexResult<Vec<AliasInfo>> {
        #[derive(Deserialize)]
        struct Aliases {
            aliases: Vec<AliasInfo>,
        }
        let aliases: Aliases = self.json(self.request(Method::GET, &["aliases"])).await?;
        Ok(aliases.aliases)
    }

    async fn delete_alias(&self, name: &str) -> IndexResult<()> {
        self.send(self.request(Method::DELETE, &["aliases", name]))
            .await?;
        Ok(())
    }
}
