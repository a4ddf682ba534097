//! In-memory [`SearchIndex`] implementation for tests and dry runs.
//!
//! Collections live in a `BTreeMap` keyed by document id behind
//! `std::sync::RwLock`. Search supports `q = "*"` or a case-insensitive
//! substring match on `query_by`, `field:=value` filters joined by `&&`,
//! `sort_by` on one or more fields, grouping and `include_fields`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::IndexError;
use crate::models::Document;
use crate::schema::CollectionSchema;

use super::{
    AliasInfo, CollectionInfo, GroupedHit, ImportAction, ImportResult, IndexResult, SearchHit,
    SearchIndex, SearchParams, SearchResponse,
};

struct StoredCollection {
    schema: CollectionSchema,
    docs: BTreeMap<String, Document>,
}

impl StoredCollection {
    fn info(&self) -> CollectionInfo {
        CollectionInfo {
            name: self.schema.name.clone(),
            num_documents: self.docs.len() as u64,
        }
    }
}

#[derive(Default)]
struct State {
    collections: HashMap<String, StoredCollection>,
    aliases: HashMap<String, String>,
}

impl State {
    fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    fn collection(&self, name: &str) -> IndexResult<&StoredCollection> {
        let target = self.resolve(name);
        self.collections
            .get(target)
            .ok_or_else(|| IndexError::NotFound(format!("collection '{}'", name)))
    }

    fn collection_mut(&mut self, name: &str) -> IndexResult<&mut StoredCollection> {
        let target = self.resolve(name).to_string();
        self.collections
            .get_mut(&target)
            .ok_or_else(|| IndexError::NotFound(format!("collection '{}'", name)))
    }
}

/// In-memory search index.
#[derive(Default)]
pub struct InMemoryIndex {
    state: RwLock<State>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Fetch one document by id, resolving aliases.
    pub fn get_document(&self, collection: &str, id: &str) -> Option<Document> {
        let state = self.read();
        state.collection(collection).ok()?.docs.get(id).cloned()
    }

    /// Number of documents, resolving aliases. 0 when absent.
    pub fn document_count(&self, collection: &str) -> u64 {
        let state = self.read();
        state
            .collection(collection)
            .map(|c| c.docs.len() as u64)
            .unwrap_or(0)
    }
}

// ============ Query evaluation ============

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn strip_backticks(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('`')
        .and_then(|s| s.strip_suffix('`'))
        .unwrap_or(s)
}

/// `field:=value && other:=value`. Array fields match when any element does.
fn matches_filter(doc: &Document, filter: &str) -> bool {
    filter.split("&&").all(|clause| {
        let clause = clause.trim();
        if clause.is_empty() {
            return true;
        }
        let (field, raw) = match clause.split_once(":=").or_else(|| clause.split_once(':')) {
            Some(pair) => pair,
            None => return false,
        };
        let wanted = strip_backticks(raw);
        match doc.get(field.trim()) {
            Some(Value::Array(items)) => items.iter().any(|v| value_text(v) == wanted),
            Some(v) => value_text(v) == wanted,
            None => false,
        }
    })
}

fn matches_query(doc: &Document, q: &str, query_by: &str) -> bool {
    let q = q.trim();
    if q.is_empty() || q == "*" {
        return true;
    }
    let needle = q.to_lowercase();
    query_by.split(',').any(|field| {
        doc.get(field.trim())
            .map(|v| value_text(v).to_lowercase().contains(&needle))
            .unwrap_or(false)
    })
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&y.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => value_text(x).cmp(&value_text(y)),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

fn sort_docs(docs: &mut [Document], sort_by: &str) {
    let keys: Vec<(String, bool)> = sort_by
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            let (field, dir) = s.trim().split_once(':').unwrap_or((s.trim(), "asc"));
            (field.to_string(), dir.eq_ignore_ascii_case("desc"))
        })
        .collect();
    docs.sort_by(|a, b| {
        for (field, desc) in &keys {
            let ord = compare_values(a.get(field), b.get(field));
            let ord = if *desc { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn project(doc: &Document, include_fields: Option<&str>) -> Document {
    match include_fields {
        None => doc.clone(),
        Some(fields) => {
            let wanted: Vec<&str> = fields.split(',').map(str::trim).collect();
            doc.iter()
                .filter(|(k, _)| wanted.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        }
    }
}

fn page_bounds(total: usize, page: u32, per_page: u32) -> (usize, usize) {
    let per_page = per_page.max(1) as usize;
    let start = (page.max(1) as usize - 1).saturating_mul(per_page).min(total);
    let end = start.saturating_add(per_page).min(total);
    (start, end)
}

fn merge(target: &mut Document, fields: &Document) {
    for (k, v) in fields {
        target.insert(k.clone(), v.clone());
    }
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    async fn search(&self, collection: &str, params: &SearchParams) -> IndexResult<SearchResponse> {
        let state = self.read();
        let coll = state.collection(collection)?;

        let mut docs: Vec<Document> = coll
            .docs
            .values()
            .filter(|d| matches_query(d, &params.q, &params.query_by))
            .filter(|d| params.filter_by.as_deref().map_or(true, |f| matches_filter(d, f)))
            .cloned()
            .collect();
        if let Some(sort_by) = &params.sort_by {
            sort_docs(&mut docs, sort_by);
        }

        let include = params.include_fields.as_deref();
        match &params.group_by {
            Some(group_by) => {
                let limit = params.group_limit.unwrap_or(3).max(1) as usize;
                let mut order: Vec<String> = Vec::new();
                let mut groups: HashMap<String, Vec<Document>> = HashMap::new();
                for doc in docs {
                    let key = doc.get(group_by).map(value_text).unwrap_or_default();
                    let members = groups.entry(key.clone()).or_insert_with(|| {
                        order.push(key);
                        Vec::new()
                    });
                    if members.len() < limit {
                        members.push(doc);
                    }
                }
                let (start, end) = page_bounds(order.len(), params.page, params.per_page);
                let grouped_hits = order[start..end]
                    .iter()
                    .map(|key| GroupedHit {
                        group_key: vec![Value::String(key.clone())],
                        hits: groups
                            .get(key)
                            .map(|docs| {
                                docs.iter()
                                    .map(|d| SearchHit {
                                        document: project(d, include),
                                    })
                                    .collect()
                            })
                            .unwrap_or_default(),
                    })
                    .collect();
                Ok(SearchResponse {
                    found: order.len() as u64,
                    page: params.page,
                    hits: Vec::new(),
                    grouped_hits,
                })
            }
            None => {
                let (start, end) = page_bounds(docs.len(), params.page, params.per_page);
                let hits = docs[start..end]
                    .iter()
                    .map(|d| SearchHit {
                        document: project(d, include),
                    })
                    .collect();
                Ok(SearchResponse {
                    found: docs.len() as u64,
                    page: params.page,
                    hits,
                    grouped_hits: Vec::new(),
                })
            }
        }
    }

    async fn update_document(&self, collection: &str, id: &str, fields: &Document) -> IndexResult<()> {
        let mut state = self.write();
        let coll = state.collection_mut(collection)?;
        let doc = coll
            .docs
            .get_mut(id)
            .ok_or_else(|| IndexError::NotFound(format!("document '{}'", id)))?;
        merge(doc, fields);
        Ok(())
    }

    async fn import_documents(
        &self,
        collection: &str,
        documents: &[Document],
        action: ImportAction,
    ) -> IndexResult<Vec<ImportResult>> {
        let mut state = self.write();
        let coll = state.collection_mut(collection)?;
        let mut results = Vec::with_capacity(documents.len());
        for doc in documents {
            let id = match doc.get("id").and_then(Value::as_str) {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => {
                    results.push(ImportResult::failed(None, "document has no `id`"));
                    continue;
                }
            };
            let outcome = match action {
                ImportAction::Update => match coll.docs.get_mut(&id) {
                    Some(existing) => {
                        merge(existing, doc);
                        Ok(())
                    }
                    None => Err("document not found".to_string()),
                },
                ImportAction::Create if coll.docs.contains_key(&id) => {
                    Err("a document with this id already exists".to_string())
                }
                ImportAction::Create | ImportAction::Upsert => {
                    coll.schema.validate(doc).map(|()| {
                        coll.docs.insert(id.clone(), doc.clone());
                    })
                }
            };
            results.push(match outcome {
                Ok(()) => ImportResult::ok(Some(id)),
                Err(e) => ImportResult::failed(Some(id), e),
            });
        }
        Ok(results)
    }

    async fn export_documents(&self, collection: &str) -> IndexResult<Vec<Document>> {
        let state = self.read();
        Ok(state.collection(collection)?.docs.values().cloned().collect())
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> IndexResult<CollectionInfo> {
        let mut state = self.write();
        if state.collections.contains_key(&schema.name) {
            return Err(IndexError::Rejected(format!(
                "collection '{}' already exists",
                schema.name
            )));
        }
        let stored = StoredCollection {
            schema: schema.clone(),
            docs: BTreeMap::new(),
        };
        let info = stored.info();
        state.collections.insert(schema.name.clone(), stored);
        Ok(info)
    }

    async fn retrieve_collection(&self, name: &str) -> IndexResult<Option<CollectionInfo>> {
        let state = self.read();
        Ok(state.collection(name).ok().map(StoredCollection::info))
    }

    async fn delete_collection(&self, name: &str) -> IndexResult<()> {
        let mut state = self.write();
        state
            .collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| IndexError::NotFound(format!("collection '{}'", name)))
    }

    async fn list_collections(&self) -> IndexResult<Vec<CollectionInfo>> {
        let state = self.read();
        let mut infos: Vec<CollectionInfo> = state.collections.values().map(StoredCollection::info).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    async fn upsert_alias(&self, name: &str, collection: &str) -> IndexResult<()> {
        let mut state = self.write();
        if !state.collections.contains_key(collection) {
            return Err(IndexError::NotFound(format!("collection '{}'", collection)));
        }
        state.aliases.insert(name.to_string(), collection.to_string());
        Ok(())
    }

    async fn retrieve_alias(&self, name: &str) -> IndexResult<Option<String>> {
        Ok(self.read().aliases.get(name).cloned())
    }

    async fn list_aliases(&self) -> IndexResult<Vec<AliasInfo>> {
        let state = self.read();
        let mut aliases: Vec<AliasInfo> = state
            .aliases
            .iter()
            .map(|(name, target)| AliasInfo {
                name: name.clone(),
                collection_name: target.clone(),
            })
            .collect();
        aliases.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(aliases)
    }

    async fn delete_alias(&self, name: &str) -> IndexResult<()> {
        self.write()
            .aliases
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| IndexError::NotFound(format!("alias '{}'", name)))
    }
}
