//! Collection schema definition.
//!
//! Kept apart from any index client: callers build a [`CollectionSchema`]
//! and hand it to [`SearchIndex::create_collection`](crate::index::SearchIndex::create_collection).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "string")]
    String,
    #[serde(rename = "string[]")]
    StringArray,
    #[serde(rename = "int32")]
    Int32,
    #[serde(rename = "int64")]
    Int64,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "object")]
    Object,
    #[serde(rename = "object[]")]
    ObjectArray,
    #[serde(rename = "auto")]
    Auto,
}

impl FieldType {
    /// Whether `value` is acceptable for a field of this type.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::StringArray => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            FieldType::Int32 | FieldType::Int64 => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::ObjectArray => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_object)),
            FieldType::Auto => true,
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_true(b: &bool) -> bool {
    *b
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "is_false")]
    pub facet: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub sort: bool,
    #[serde(default = "yes", skip_serializing_if = "is_true")]
    pub index: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
}

impl FieldSpec {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            facet: false,
            sort: false,
            index: true,
            optional: false,
        }
    }

    pub fn facet(mut self) -> Self {
        self.facet = true;
        self
    }

    pub fn sort(mut self) -> Self {
        self.sort = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Stored but not searchable.
    pub fn unindexed(mut self) -> Self {
        self.index = false;
        self.optional = true;
        self
    }

    pub fn is_required(&self) -> bool {
        !self.optional && self.field_type != FieldType::Auto
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub enable_nested_fields: bool,
    #[serde(default)]
    pub token_separators: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_sorting_field: Option<String>,
}

impl CollectionSchema {
    pub fn new(name: &str, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.to_string(),
            fields,
            enable_nested_fields: false,
            token_separators: Vec::new(),
            default_sorting_field: None,
        }
    }

    /// Same definition under another collection name.
    pub fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check a full document against the schema. Returns the first problem.
    pub fn validate(&self, doc: &Document) -> Result<(), String> {
        for field in &self.fields {
            match doc.get(&field.name) {
                None | Some(Value::Null) if field.is_required() => {
                    return Err(format!("field `{}` is required", field.name));
                }
                None | Some(Value::Null) => {}
                Some(value) if !field.field_type.accepts(value) => {
                    return Err(format!(
                        "field `{}` must be of type {:?}",
                        field.name, field.field_type
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// The package collection used for both registries.
pub fn packages_schema(name: &str) -> CollectionSchema {
    use FieldType::*;
    let f = FieldSpec::new;
    let fields = vec![
        f("identifier", String).facet(),
        f("registry", String).facet().optional(),
        f("name", String).facet(),
        f("name_sortable", String).sort().facet(),
        f("version", String),
        f("version_raw", String).sort().facet(),
        f("version_sortable", String).sort().facet(),
        f("version_major", Int64).sort(),
        f("version_minor", Int64).sort(),
        f("version_bugfix", Int64).sort(),
        f("version_postfix", String).sort(),
        f("summary", String),
        f("description", String),
        f("description_content_type", String),
        f("first_chapter", String).optional(),
        f("main_content", String).optional(),
        f("author", String),
        f("author_email", String),
        f("maintainer", String),
        f("maintainer_email", String),
        f("license", String),
        f("keywords", StringArray).facet(),
        f("classifiers", StringArray).facet(),
        f("framework_versions", StringArray).facet(),
        f("python_versions", StringArray).facet(),
        f("platform", String),
        f("requires_dist", StringArray),
        f("requires_python", String).optional(),
        f("docs_url", String).unindexed(),
        f("home_page", String).unindexed(),
        f("package_url", String).unindexed(),
        f("project_url", String).unindexed(),
        f("release_url", String),
        f("repository_url", String).unindexed(),
        f("project_urls", Auto).unindexed(),
        f("upload_timestamp", Int64).sort().optional(),
        f("yanked", Bool),
        f("yanked_reason", String).unindexed(),
        f("npm_scope", String).unindexed(),
        f("npm_quality_score", Float).optional(),
        f("npm_popularity_score", Float).optional(),
        f("npm_maintenance_score", Float).optional(),
        f("github_stars", Auto).facet().optional(),
        f("github_watchers", Auto).facet().optional(),
        f("github_updated", Auto).facet().optional(),
        f("github_open_issues", Auto).facet().optional(),
        f("github_is_archived", Bool).facet().optional(),
        f("github_url", String).unindexed(),
        f("download_last_day", Auto).facet().optional(),
        f("download_last_week", Auto).facet().optional(),
        f("download_last_month", Auto).facet().optional(),
        f("download_total", Auto).facet().optional(),
        f("download_updated", Float).sort().optional(),
        f("maintainers", ObjectArray).unindexed(),
        f("health_score", Int32).sort().facet().optional(),
        f("health_score_breakdown", Object).unindexed(),
        f("health_score_last_calculated", Int64).optional(),
        f("health_problems_documentation", StringArray).facet().optional(),
        f("health_problems_metadata", StringArray).facet().optional(),
        f("health_problems_recency", StringArray).facet().optional(),
    ];
    CollectionSchema {
        name: name.to_string(),
        fields,
        enable_nested_fields: true,
        token_separators: [".", "-", "_", "@", "/"].map(str::to_string).to_vec(),
        default_sorting_field: Some("name_sortable".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PackageDocument, Registry};
    use serde_json::json;

    #[test]
    fn package_document_satisfies_schema() {
        let schema = packages_schema("packages-1");
        let doc = PackageDocument::new(Registry::Pypi, "requests", "2.31.0").into_document();
        assert_eq!(schema.validate(&doc), Ok(()));
    }

    #[test]
    fn missing_required_field_is_reported() {
        let schema = packages_schema("p");
        let mut doc = PackageDocument::new(Registry::Npm, "left-pad", "1.3.0").into_document();
        doc.remove("version_sortable");
        assert!(schema.validate(&doc).unwrap_err().contains("version_sortable"));
    }

    #[test]
    fn type_mismatch_is_reported() {
        let schema = packages_schema("p");
        let mut doc = PackageDocument::new(Registry::Pypi, "x", "1").into_document();
        doc.insert("yanked".into(), json!("no"));
        assert!(schema.validate(&doc).is_err());
    }

    #[test]
    fn serializes_typesense_shape() {
        let schema = packages_schema("packages-2");
        let v = serde_json::to_value(&schema).unwrap();
        assert_eq!(v["default_sorting_field"], "name_sortable");
        let docs_url = v["fields"]
            .as_array()
            .unwrap()
            .iter()
            .find(|f| f["name"] == "docs_url")
            .unwrap();
        assert_eq!(docs_url["index"], json!(false));
        assert_eq!(docs_url["optional"], json!(true));
        assert_eq!(schema.renamed("packages-3").name, "packages-3");
    }
}
