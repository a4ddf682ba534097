//! Package document model.
//!
//! Documents travel through the index as open JSON objects ([`Document`]):
//! the build path writes a fixed set of registry fields, and each enrichment
//! source later merges its own fields in by id. [`PackageDocument`] is the
//! typed view the registry fetchers produce; the enrichment payload structs
//! describe what each source merges back.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One indexed record as stored by the search engine.
pub type Document = Map<String, Value>;

/// Source registry of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Registry {
    #[default]
    Pypi,
    Npm,
}

impl Registry {
    pub fn as_str(self) -> &'static str {
        match self {
            Registry::Pypi => "pypi",
            Registry::Npm => "npm",
        }
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Registry {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pypi" => Ok(Registry::Pypi),
            "npm" => Ok(Registry::Npm),
            other => anyhow::bail!("unknown registry '{}': expected pypi or npm", other),
        }
    }
}

/// Composite document id: `{registry}:{name}:{version}`.
pub fn document_id(registry: Registry, name: &str, version: &str) -> String {
    format!("{}:{}:{}", registry, name, version)
}

/// Typed registry record, before enrichment.
///
/// Unknown keys survive a round trip through `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PackageDocument {
    pub id: String,
    pub identifier: String,
    pub registry: Registry,
    pub name: String,
    pub name_sortable: String,
    pub version: String,
    pub version_raw: String,
    pub version_sortable: String,
    pub version_major: u32,
    pub version_minor: u32,
    pub version_bugfix: u32,
    pub version_postfix: String,
    pub summary: String,
    pub description: String,
    pub description_content_type: String,
    pub author: String,
    pub author_email: String,
    pub maintainer: String,
    pub maintainer_email: String,
    pub license: String,
    pub keywords: Vec<String>,
    pub classifiers: Vec<String>,
    pub platform: String,
    pub home_page: String,
    pub docs_url: String,
    pub project_url: String,
    pub package_url: String,
    pub release_url: String,
    pub repository_url: String,
    pub project_urls: BTreeMap<String, String>,
    pub requires_dist: Vec<String>,
    pub requires_python: String,
    /// Epoch seconds; 0 when unknown.
    pub upload_timestamp: i64,
    pub yanked: bool,
    pub yanked_reason: String,
    pub framework_versions: Vec<String>,
    pub python_versions: Vec<String>,
    pub npm_scope: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PackageDocument {
    pub fn new(registry: Registry, name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        let version = version.into();
        Self {
            id: document_id(registry, &name, &version),
            identifier: document_id(registry, &name, &version),
            registry,
            version_raw: version.clone(),
            name_sortable: name.clone(),
            name,
            version,
            ..Default::default()
        }
    }

    pub fn into_document(self) -> Document {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn from_document(doc: &Document) -> serde_json::Result<Self> {
        serde_json::from_value(Value::Object(doc.clone()))
    }
}

/// Repository activity merged back by the GitHub source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryStats {
    /// `owner/repo`.
    pub slug: String,
    pub stars: i64,
    pub watchers: i64,
    pub open_issues: i64,
    pub is_archived: bool,
    /// Epoch seconds of the last repository update.
    pub updated: i64,
}

impl RepositoryStats {
    pub fn url(&self) -> String {
        format!("https://github.com/{}", self.slug)
    }

    pub fn to_fields(&self) -> Document {
        let mut m = Map::new();
        m.insert("github_stars".into(), self.stars.into());
        m.insert("github_watchers".into(), self.watchers.into());
        m.insert("github_open_issues".into(), self.open_issues.into());
        m.insert("github_is_archived".into(), self.is_archived.into());
        m.insert("github_updated".into(), self.updated.into());
        m.insert("github_url".into(), self.url().into());
        m
    }
}

/// Download counters merged back by the downloads source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadStats {
    pub last_day: i64,
    pub last_week: i64,
    pub last_month: i64,
    /// Not every provider reports an all-time total.
    pub total: Option<i64>,
    /// Epoch seconds at which the counters were fetched.
    pub updated: i64,
}

impl DownloadStats {
    pub fn to_fields(&self) -> Document {
        let mut m = Map::new();
        m.insert("download_last_day".into(), self.last_day.into());
        m.insert("download_last_week".into(), self.last_week.into());
        m.insert("download_last_month".into(), self.last_month.into());
        if let Some(total) = self.total {
            m.insert("download_total".into(), total.into());
        }
        m.insert("download_updated".into(), self.updated.into());
        m
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintainer {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

pub fn maintainer_fields(maintainers: &[Maintainer]) -> Document {
    let mut m = Map::new();
    m.insert(
        "maintainers".into(),
        serde_json::to_value(maintainers).unwrap_or(Value::Array(Vec::new())),
    );
    m
}

// ============ Field accessors ============

/// String field, empty when missing or not a string.
pub fn str_field<'a>(doc: &'a Document, key: &str) -> &'a str {
    doc.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Integer field; accepts floats and numeric strings.
pub fn int_field(doc: &Document, key: &str) -> Option<i64> {
    match doc.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// List of strings; a bare string counts as a one-element list.
pub fn list_field(doc: &Document, key: &str) -> Vec<String> {
    match doc.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Keywords from registry metadata. A single string is split on commas
/// and whitespace; a list keeps each entry whole.
pub fn keyword_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Map of string values (e.g. `project_urls`).
pub fn map_field(doc: &Document, key: &str) -> BTreeMap<String, String> {
    match doc.get(key) {
        Some(Value::Object(m)) => m
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
        _ => BTreeMap::new(),
    }
}

pub fn registry_of(doc: &Document) -> Registry {
    str_field(doc, "registry").parse().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keyword_strings_split_but_list_entries_stay_whole() {
        assert_eq!(keyword_list(Some(&json!("plone, api  cms"))), vec!["plone", "api", "cms"]);
        assert_eq!(
            keyword_list(Some(&json!(["content management", " plone ", ""]))),
            vec!["content management", "plone"]
        );
        assert!(keyword_list(None).is_empty());
    }

    #[test]
    fn id_is_composite() {
        assert_eq!(document_id(Registry::Npm, "@scope/pkg", "1.0.0"), "npm:@scope/pkg:1.0.0");
        let doc = PackageDocument::new(Registry::Pypi, "requests", "2.31.0");
        assert_eq!(doc.id, "pypi:requests:2.31.0");
        assert_eq!(doc.name_sortable, "requests");
    }

    #[test]
    fn document_keeps_extra_fields() {
        let mut doc = PackageDocument::new(Registry::Pypi, "x", "1");
        doc.extra.insert("github_stars".into(), json!(12));
        let map = doc.into_document();
        assert_eq!(map["github_stars"], json!(12));
        assert_eq!(map["registry"], json!("pypi"));

        let back = PackageDocument::from_document(&map).unwrap();
        assert_eq!(back.extra["github_stars"], json!(12));
    }

    #[test]
    fn accessors_are_lenient() {
        let doc = json!({
            "a": "x",
            "n": 3.0,
            "s": "42",
            "l": ["p", 1, "q"],
            "one": "solo",
            "urls": {"Docs": "https://d", "bad": 1}
        });
        let doc = doc.as_object().unwrap();
        assert_eq!(str_field(doc, "a"), "x");
        assert_eq!(str_field(doc, "missing"), "");
        assert_eq!(int_field(doc, "n"), Some(3));
        assert_eq!(int_field(doc, "s"), Some(42));
        assert_eq!(list_field(doc, "l"), vec!["p", "q"]);
        assert_eq!(list_field(doc, "one"), vec!["solo"]);
        assert_eq!(map_field(doc, "urls").len(), 1);
    }

    #[test]
    fn download_total_only_when_known() {
        let stats = DownloadStats {
            last_day: 1,
            last_week: 7,
            last_month: 30,
            total: None,
            updated: 100,
        };
        assert!(!stats.to_fields().contains_key("download_total"));
    }

    #[test]
    fn registry_parse() {
        assert_eq!("NPM".parse::<Registry>().unwrap(), Registry::Npm);
        assert!("cargo".parse::<Registry>().is_err());
    }
}
