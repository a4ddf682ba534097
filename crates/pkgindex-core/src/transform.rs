//! Per-record transforms applied on the build path, between a registry
//! fetcher and the [`BatchIndexer`](crate::batch::BatchIndexer).

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::health;
use crate::models::{document_id, Document, PackageDocument};
use crate::version;

pub trait RecordTransform: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, doc: &mut PackageDocument);
}

/// Identity fields, sort key and list cleanup.
pub struct NormalizeFields;

impl RecordTransform for NormalizeFields {
    fn name(&self) -> &'static str {
        "normalize"
    }

    fn apply(&self, doc: &mut PackageDocument) {
        doc.name = doc.name.trim().to_string();
        doc.version = doc.version.trim().to_string();
        doc.id = document_id(doc.registry, &doc.name, &doc.version);
        doc.identifier = doc.id.clone();
        doc.name_sortable = doc.name.clone();
        if doc.upload_timestamp < 0 {
            doc.upload_timestamp = 0;
        }

        let mut seen = HashSet::new();
        doc.keywords = doc
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty() && seen.insert(k.to_string()))
            .map(str::to_string)
            .collect();
        doc.classifiers.retain(|c| !c.trim().is_empty());
    }
}

/// `version_raw`, `version_sortable` and the split version fields.
pub struct VersionFields;

impl RecordTransform for VersionFields {
    fn name(&self) -> &'static str {
        "version"
    }

    fn apply(&self, doc: &mut PackageDocument) {
        let encoded = version::encode(&doc.version);
        doc.version_raw = doc.version.clone();
        doc.version_major = encoded.key.major;
        doc.version_minor = encoded.key.minor;
        doc.version_bugfix = encoded.key.bugfix;
        doc.version_postfix = encoded.postfix;
        doc.version_sortable = encoded.sortable;
    }
}

fn framework_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^Framework :: (?P<framework>\w+.*) :: (?P<version>\d+.*)$")
            .expect("framework pattern is valid")
    })
}

fn language_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^Programming Language\s*::\s*(?P<lang>\w+.*)\s*::\s*(?P<version>\d+.*)$")
            .expect("language pattern is valid")
    })
}

fn classifier_versions(classifiers: &[String], re: &Regex, group: &str) -> Vec<String> {
    classifiers
        .iter()
        .filter_map(|c| re.captures(c))
        .filter_map(|caps| {
            Some(format!(
                "{} {}",
                caps.name(group)?.as_str().trim(),
                caps.name("version")?.as_str().trim()
            ))
        })
        .collect()
}

/// `framework_versions` and `python_versions` from trove classifiers.
pub struct ClassifierVersions;

impl RecordTransform for ClassifierVersions {
    fn name(&self) -> &'static str {
        "classifier_versions"
    }

    fn apply(&self, doc: &mut PackageDocument) {
        doc.framework_versions = classifier_versions(&doc.classifiers, framework_regex(), "framework");
        doc.python_versions = classifier_versions(&doc.classifiers, language_regex(), "lang");
    }
}

/// Base health score, before any enrichment bonuses exist.
pub struct BaseHealth {
    pub now: i64,
}

impl RecordTransform for BaseHealth {
    fn name(&self) -> &'static str {
        "base_health"
    }

    fn apply(&self, doc: &mut PackageDocument) {
        let snapshot = doc.clone().into_document();
        let report = health::enhanced_score(&snapshot, self.now);
        for (key, value) in report.to_fields() {
            if key.starts_with("health_score") {
                doc.extra.insert(key, value);
            }
        }
    }
}

/// Ordered list of transforms.
pub struct TransformChain {
    transforms: Vec<Box<dyn RecordTransform>>,
}

impl TransformChain {
    pub fn new(transforms: Vec<Box<dyn RecordTransform>>) -> Self {
        Self { transforms }
    }

    /// normalize → version → classifier versions → base health.
    pub fn standard(now: i64) -> Self {
        Self::new(vec![
            Box::new(NormalizeFields),
            Box::new(VersionFields),
            Box::new(ClassifierVersions),
            Box::new(BaseHealth { now }),
        ])
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    pub fn apply(&self, mut doc: PackageDocument) -> Document {
        for t in &self.transforms {
            t.apply(&mut doc);
        }
        doc.into_document()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Registry;

    #[test]
    fn standard_chain_fills_build_fields() {
        let mut pkg = PackageDocument::new(Registry::Pypi, " plone.api ", "2.0.0rc1");
        pkg.classifiers = vec![
            "Framework :: Plone :: 6.0".into(),
            "Programming Language :: Python :: 3.12".into(),
            "Programming Language :: Python".into(),
            "License :: OSI Approved".into(),
        ];
        pkg.upload_timestamp = 1_700_000_000;
        let doc = TransformChain::standard(1_700_000_000).apply(pkg);

        assert_eq!(doc["id"], "pypi:plone.api:2.0.0rc1");
        assert_eq!(doc["name_sortable"], "plone.api");
        assert_eq!(doc["version_postfix"], "rc1");
        assert_eq!(doc["version_sortable"], "0.0000000002.0000000000.0000000000.0000000003.0000000001");
        assert_eq!(doc["framework_versions"][0], "Plone 6.0");
        assert_eq!(doc["python_versions"][0], "Python 3.12");
        assert_eq!(doc["python_versions"].as_array().unwrap().len(), 1);
        assert!(doc["health_score"].as_i64().unwrap() >= 40);
        assert!(doc.get("health_problems_recency").is_none());
    }

    #[test]
    fn keywords_trimmed_and_deduplicated() {
        let mut pkg = PackageDocument::new(Registry::Npm, "x", "1.0.0");
        pkg.keywords = vec![
            "react".into(),
            " content management ".into(),
            " ".into(),
            "hooks".into(),
            "react".into(),
        ];
        NormalizeFields.apply(&mut pkg);
        assert_eq!(pkg.keywords, vec!["react", "content management", "hooks"]);
    }

    #[test]
    fn chain_order_is_stable() {
        assert_eq!(
            TransformChain::standard(0).names(),
            vec!["normalize", "version", "classifier_versions", "base_health"]
        );
    }
}
