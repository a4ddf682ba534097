//! Package health scoring.
//!
//! The score has two layers:
//!
//! | Layer | Category | Max |
//! |-------|----------|-----|
//! | base | release recency | 40 |
//! | base | documentation | 18 (+4 docs URL, +3 docs project URL) |
//! | base | metadata quality | 30 |
//! | bonus | repository stars | 10 |
//! | bonus | repository activity | 10 |
//! | bonus | issue management | 10 |
//!
//! Every component is a step function over fixed thresholds. The final score
//! is `min(100, base + bonuses)`. All functions take `now` (epoch seconds)
//! explicitly so scoring is a pure function of the stored fields.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{int_field, list_field, map_field, registry_of, str_field, Document, Registry};

pub const MAX_SCORE: i64 = 100;
pub const MAX_RECENCY_POINTS: i64 = 40;
pub const MAX_DOCS_POINTS: i64 = 18;
pub const MAX_METADATA_POINTS: i64 = 30;

const DAY: i64 = 86_400;
const README_MIN_WORDS: usize = 500;
const DESCRIPTION_MIN_CHARS: usize = 150;
const DOC_URL_KEYS: [&str; 4] = ["documentation", "docs", "homepage", "home"];

/// Extra credit recorded inside a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bonus {
    pub reason: String,
    pub points: i64,
}

impl Bonus {
    fn new(reason: &str, points: i64) -> Self {
        Self {
            reason: reason.to_string(),
            points,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CategoryScore {
    pub points: i64,
    pub max_points: i64,
    pub problems: Vec<String>,
    pub bonuses: Vec<Bonus>,
}

impl CategoryScore {
    fn empty(max_points: i64) -> Self {
        Self {
            max_points,
            ..Default::default()
        }
    }

    fn problem(&mut self, text: &str) {
        if !self.problems.iter().any(|p| p == text) {
            self.problems.push(text.to_string());
        }
    }
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HealthBreakdown {
    pub recency: CategoryScore,
    pub documentation: CategoryScore,
    pub metadata: CategoryScore,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub github_stars_bonus: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub github_activity_bonus: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub github_issue_bonus: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub github_bonus_total: i64,
}

impl HealthBreakdown {
    pub fn base_points(&self) -> i64 {
        self.recency.points + self.documentation.points + self.metadata.points
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub score: i64,
    pub breakdown: HealthBreakdown,
    pub last_calculated: i64,
}

impl HealthReport {
    /// Partial update written back to the index. Also clears the flat
    /// per-category problem lists older documents carry.
    pub fn to_fields(&self) -> Document {
        let mut m = Document::new();
        m.insert("health_score".into(), self.score.into());
        m.insert(
            "health_score_breakdown".into(),
            serde_json::to_value(&self.breakdown).unwrap_or(Value::Null),
        );
        m.insert("health_score_last_calculated".into(), self.last_calculated.into());
        for legacy in [
            "health_problems_documentation",
            "health_problems_metadata",
            "health_problems_recency",
        ] {
            m.insert(legacy.into(), json!([]));
        }
        m
    }
}

// ============ Base score ============

/// Recency of the release, 0-40.
pub fn recency_score(upload_timestamp: Option<i64>, now: i64) -> CategoryScore {
    let mut cat = CategoryScore::empty(MAX_RECENCY_POINTS);
    let ts = match upload_timestamp {
        Some(ts) if ts > 0 => ts,
        _ => {
            cat.problem("no release timestamp");
            return cat;
        }
    };
    let age_days = (now - ts).div_euclid(DAY);
    let (points, problem) = match age_days {
        d if d < 180 => (40, None),
        d if d < 365 => (30, Some("last release over 6 months ago")),
        d if d < 730 => (20, Some("last release over 1 year ago")),
        d if d < 1095 => (10, Some("last release over 2 years ago")),
        d if d < 1825 => (5, Some("last release over 3 years ago")),
        _ => (0, Some("last release over 5 years ago")),
    };
    cat.points = points;
    if let Some(p) = problem {
        cat.problem(p);
    }
    cat
}

fn repo_root_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https?://(www\.)?(github|gitlab)\.(com|io)/[^/]+/[^/]+(/?|#.*)$")
            .expect("repo root pattern is valid")
    })
}

/// True when `url` points at real documentation rather than a registry page
/// or a bare repository root.
pub fn is_meaningful_docs_url(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }
    let lower = url.to_lowercase();
    if lower.contains("pypi.org/project/") {
        return false;
    }
    !repo_root_regex().is_match(&lower)
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn readme_words(doc: &Document) -> usize {
    let split = word_count(str_field(doc, "first_chapter")) + word_count(str_field(doc, "main_content"));
    if split > 0 {
        split
    } else {
        word_count(str_field(doc, "description"))
    }
}

/// Documentation presence, 0-18 plus up to 7 bonus points.
pub fn docs_score(doc: &Document) -> CategoryScore {
    let mut cat = CategoryScore::empty(MAX_DOCS_POINTS);

    let has_docs_url = is_meaningful_docs_url(str_field(doc, "docs_url"));
    if has_docs_url {
        cat.points += 4;
        cat.bonuses.push(Bonus::new("has dedicated docs URL", 4));
    }

    if str_field(doc, "description").chars().count() > DESCRIPTION_MIN_CHARS {
        cat.points += 18;
    } else {
        cat.problem("description too short (<150 chars)");
    }

    let has_doc_project_url = map_field(doc, "project_urls").iter().any(|(key, url)| {
        let key = key.to_lowercase();
        DOC_URL_KEYS.iter().any(|kw| key.contains(kw)) && is_meaningful_docs_url(url)
    });
    if has_doc_project_url {
        cat.points += 3;
        cat.bonuses.push(Bonus::new("has documentation project URL", 3));
    }

    if readme_words(doc) < README_MIN_WORDS && !has_docs_url && !has_doc_project_url {
        cat.problem("not enough documentation (extend README to 500+ words or add documentation link)");
    }
    cat
}

/// Metadata quality, 0-30.
pub fn metadata_score(doc: &Document) -> CategoryScore {
    let mut cat = CategoryScore::empty(MAX_METADATA_POINTS);

    if !str_field(doc, "maintainer").is_empty() || !str_field(doc, "author").is_empty() {
        cat.points += 10;
    } else {
        cat.problem("no maintainer info");
        cat.problem("no author info");
    }

    if !str_field(doc, "license").is_empty() {
        cat.points += 10;
    } else {
        cat.problem("no license");
    }

    let (list, problem) = match registry_of(doc) {
        Registry::Npm => ("keywords", "fewer than 3 keywords"),
        Registry::Pypi => ("classifiers", "fewer than 3 classifiers"),
    };
    if list_field(doc, list).len() >= 3 {
        cat.points += 10;
    } else {
        cat.problem(problem);
    }
    cat
}

/// Base score and its per-category breakdown.
pub fn base_score(doc: &Document, now: i64) -> (i64, HealthBreakdown) {
    let breakdown = HealthBreakdown {
        recency: recency_score(int_field(doc, "upload_timestamp"), now),
        documentation: docs_score(doc),
        metadata: metadata_score(doc),
        ..Default::default()
    };
    (breakdown.base_points(), breakdown)
}

// ============ Bonuses ============

pub fn stars_bonus(stars: i64) -> i64 {
    match stars {
        s if s >= 1000 => 10,
        s if s >= 500 => 7,
        s if s >= 100 => 5,
        s if s >= 50 => 3,
        s if s >= 10 => 1,
        _ => 0,
    }
}

/// Bonus for recent repository activity; `updated` is epoch seconds.
pub fn activity_bonus(updated: i64, now: i64) -> i64 {
    if updated <= 0 {
        return 0;
    }
    let age_days = (now - updated) as f64 / DAY as f64;
    match age_days {
        d if d < 30.0 => 10,
        d if d < 90.0 => 7,
        d if d < 180.0 => 5,
        d if d < 365.0 => 3,
        _ => 0,
    }
}

/// Bonus for a low open-issues to stars ratio.
pub fn issue_bonus(open_issues: i64, stars: i64) -> i64 {
    if stars <= 0 {
        return 0;
    }
    let ratio = open_issues as f64 / stars as f64;
    match ratio {
        r if r < 0.1 => 10,
        r if r < 0.3 => 7,
        r if r < 0.5 => 5,
        r if r < 1.0 => 3,
        _ => 0,
    }
}

/// Full score: base categories plus repository bonuses, capped at
/// [`MAX_SCORE`].
pub fn enhanced_score(doc: &Document, now: i64) -> HealthReport {
    let (base, mut breakdown) = base_score(doc, now);

    let stars = int_field(doc, "github_stars").unwrap_or(0);
    breakdown.github_stars_bonus = stars_bonus(stars);

    if let Some(updated) = int_field(doc, "github_updated").filter(|u| *u > 0) {
        let bonus = activity_bonus(updated, now);
        breakdown.github_activity_bonus = bonus;
        if bonus == 0 {
            breakdown.recency.problem("no GitHub activity in 1+ year");
        } else if bonus <= 3 {
            breakdown.recency.problem("limited GitHub activity (6+ months)");
        }
    }

    if let Some(open) = int_field(doc, "github_open_issues") {
        if stars > 0 {
            let bonus = issue_bonus(open, stars);
            breakdown.github_issue_bonus = bonus;
            if bonus >= 5 {
                breakdown.metadata.bonuses.push(Bonus::new("good issue management", bonus));
            }
        }
    }

    breakdown.github_bonus_total = breakdown.github_stars_bonus
        + breakdown.github_activity_bonus
        + breakdown.github_issue_bonus;

    HealthReport {
        score: (base + breakdown.github_bonus_total).min(MAX_SCORE),
        breakdown,
        last_calculated: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_760_000_000;

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn recency_steps() {
        let at = |days: i64| recency_score(Some(NOW - days * DAY), NOW).points;
        assert_eq!(at(10), 40);
        assert_eq!(at(200), 30);
        assert_eq!(at(400), 20);
        assert_eq!(at(800), 10);
        assert_eq!(at(1200), 5);
        assert_eq!(at(2000), 0);

        let missing = recency_score(Some(0), NOW);
        assert_eq!(missing.points, 0);
        assert_eq!(missing.problems, vec!["no release timestamp"]);
    }

    #[test]
    fn docs_url_filters_repo_roots() {
        assert!(!is_meaningful_docs_url("https://pypi.org/project/foo/"));
        assert!(!is_meaningful_docs_url("https://github.com/org/repo"));
        assert!(!is_meaningful_docs_url("https://github.com/org/repo/#readme"));
        assert!(is_meaningful_docs_url("https://github.com/org/repo/wiki"));
        assert!(is_meaningful_docs_url("https://foo.readthedocs.io/en/latest/"));
        assert!(!is_meaningful_docs_url(""));
    }

    #[test]
    fn docs_bonuses_and_problems() {
        let d = doc(json!({
            "docs_url": "https://foo.readthedocs.io",
            "description": "x".repeat(151),
            "project_urls": {"Documentation": "https://foo.dev/docs"}
        }));
        let cat = docs_score(&d);
        assert_eq!(cat.points, 25);
        assert_eq!(cat.bonuses.len(), 2);
        assert!(cat.problems.is_empty());

        let bare = docs_score(&doc(json!({"description": "short"})));
        assert_eq!(bare.points, 0);
        assert_eq!(bare.problems.len(), 2);
    }

    #[test]
    fn metadata_uses_keywords_for_npm() {
        let npm = doc(json!({
            "registry": "npm",
            "author": "a",
            "license": "MIT",
            "keywords": ["a", "b", "c"],
            "classifiers": []
        }));
        assert_eq!(metadata_score(&npm).points, 30);

        let pypi = doc(json!({"registry": "pypi", "keywords": ["a", "b", "c"]}));
        let cat = metadata_score(&pypi);
        assert_eq!(cat.points, 0);
        assert!(cat.problems.contains(&"fewer than 3 classifiers".to_string()));
    }

    #[test]
    fn bonus_thresholds() {
        assert_eq!(stars_bonus(1500), 10);
        assert_eq!(stars_bonus(500), 7);
        assert_eq!(stars_bonus(100), 5);
        assert_eq!(stars_bonus(50), 3);
        assert_eq!(stars_bonus(10), 1);
        assert_eq!(stars_bonus(9), 0);

        assert_eq!(activity_bonus(NOW - 10 * DAY, NOW), 10);
        assert_eq!(activity_bonus(NOW - 60 * DAY, NOW), 7);
        assert_eq!(activity_bonus(NOW - 120 * DAY, NOW), 5);
        assert_eq!(activity_bonus(NOW - 300 * DAY, NOW), 3);
        assert_eq!(activity_bonus(NOW - 400 * DAY, NOW), 0);

        assert_eq!(issue_bonus(5, 1500), 10);
        assert_eq!(issue_bonus(20, 100), 7);
        assert_eq!(issue_bonus(40, 100), 5);
        assert_eq!(issue_bonus(90, 100), 3);
        assert_eq!(issue_bonus(150, 100), 0);
        assert_eq!(issue_bonus(5, 0), 0);
    }

    #[test]
    fn base_sixty_with_full_bonuses_scores_ninety() {
        let d = doc(json!({
            "registry": "pypi",
            "upload_timestamp": NOW - 10 * DAY,
            "author": "someone",
            "license": "MIT",
            "description": "short",
            "github_stars": 1500,
            "github_updated": NOW - 10 * DAY,
            "github_open_issues": 5
        }));
        let (base, _) = base_score(&d, NOW);
        assert_eq!(base, 60);

        let report = enhanced_score(&d, NOW);
        assert_eq!(report.breakdown.github_bonus_total, 30);
        assert_eq!(report.score, 90);
        assert_eq!(report.last_calculated, NOW);
    }

    #[test]
    fn score_is_capped() {
        let d = doc(json!({
            "upload_timestamp": NOW,
            "author": "a",
            "license": "MIT",
            "classifiers": ["a", "b", "c"],
            "docs_url": "https://docs.example.org",
            "description": "y".repeat(400),
            "github_stars": 5000,
            "github_updated": NOW,
            "github_open_issues": 0
        }));
        assert_eq!(enhanced_score(&d, NOW).score, MAX_SCORE);
    }

    #[test]
    fn stale_repository_adds_recency_problem() {
        let d = doc(json!({"github_updated": NOW - 500 * DAY}));
        let report = enhanced_score(&d, NOW);
        assert!(report
            .breakdown
            .recency
            .problems
            .contains(&"no GitHub activity in 1+ year".to_string()));
    }

    #[test]
    fn fields_clear_legacy_problem_lists() {
        let report = enhanced_score(&Document::new(), NOW);
        let fields = report.to_fields();
        assert_eq!(fields["health_problems_recency"], json!([]));
        assert!(fields["health_score_breakdown"].get("github_bonus_total").is_none());
    }
}
