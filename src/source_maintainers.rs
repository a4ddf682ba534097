//! Maintainer identity for PyPI packages.
//!
//! Usernames come from the `roles` table of the pypi-data SQLite database,
//! published as `roles.db.zip`. The database is downloaded into
//! `maintainers.cache_dir`, reused while younger than `cache_ttl_secs`, and
//! re-downloaded when stale or when it fails validation (no `roles` table).
//!
//! Avatar URLs are scraped from `https://pypi.org/user/{username}/` through
//! the rate-limited fetcher, memoized by username.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use pkgindex_core::enrich::EnrichmentSource;
use pkgindex_core::models::{maintainer_fields, registry_of, str_field, Document, Maintainer, Registry};
use regex::Regex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{MaintainersConfig, RateLimitConfig};
use crate::fetcher::{FetchCache, FetchError, RateLimitedFetcher};

const DB_FILE: &str = "roles.db";
const ZIP_FILE: &str = "roles.db.zip";

fn avatar_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<img[^>]+src=["']([^"']*(?:pypi-camo|gravatar)[^"']*)["']"#)
            .expect("avatar pattern is valid")
    })
}

/// First camo/gravatar image on a profile page.
pub fn scrape_avatar(html: &str) -> Option<String> {
    avatar_pattern()
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub async fn open_roles_db(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .read_only(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open roles database {}", path.display()))?;
    Ok(pool)
}

/// True when `path` is a SQLite database with a `roles` table.
pub async fn is_valid_roles_db(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    let Ok(pool) = open_roles_db(path).await else {
        return false;
    };
    let found: Result<Option<String>, sqlx::Error> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'roles'",
    )
    .fetch_optional(&pool)
    .await;
    pool.close().await;
    matches!(found, Ok(Some(_)))
}

/// Distinct usernames holding a role on `package`.
pub async fn package_maintainers(pool: &SqlitePool, package: &str) -> Result<Vec<String>> {
    let names: Vec<String> =
        sqlx::query_scalar("SELECT DISTINCT user_name FROM roles WHERE package_name = ? ORDER BY user_name")
            .bind(package)
            .fetch_all(pool)
            .await?;
    Ok(names)
}

fn is_fresh(path: &Path, ttl: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age < ttl)
}

/// Extract the first `*.db` member of `zip_path` to `db_path`.
fn extract_db(zip_path: &Path, db_path: &Path) -> Result<()> {
    let file = std::fs::File::open(zip_path)
        .with_context(|| format!("Failed to open {}", zip_path.display()))?;
    let mut archive = zip::ZipArchive::new(file).context("roles archive is not a zip file")?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if !entry.name().ends_with(".db") {
            continue;
        }
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        let mut out = std::fs::File::create(db_path)
            .with_context(|| format!("Failed to create {}", db_path.display()))?;
        out.write_all(&bytes)?;
        return Ok(());
    }
    bail!("no .db file found in roles archive")
}

/// Cached or freshly downloaded roles database.
pub async fn ensure_roles_db(http: &reqwest::Client, config: &MaintainersConfig) -> Result<PathBuf> {
    tokio::fs::create_dir_all(&config.cache_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.cache_dir.display()))?;
    let db_path = config.cache_dir.join(DB_FILE);
    let ttl = Duration::from_secs(config.cache_ttl_secs);

    if is_fresh(&db_path, ttl) {
        if is_valid_roles_db(&db_path).await {
            debug!(path = %db_path.display(), "using cached roles database");
            return Ok(db_path);
        }
        warn!(path = %db_path.display(), "cached roles database is invalid, downloading again");
        let _ = tokio::fs::remove_file(&db_path).await;
    }

    info!(url = %config.roles_url, "downloading roles database");
    let response = http
        .get(&config.roles_url)
        .timeout(Duration::from_secs(120))
        .send()
        .await
        .context("Failed to download roles database")?;
    if !response.status().is_success() {
        bail!("roles database download failed: HTTP {}", response.status());
    }
    let bytes = response.bytes().await.context("Failed to read roles archive")?;
    let zip_path = config.cache_dir.join(ZIP_FILE);
    tokio::fs::write(&zip_path, &bytes).await?;

    let (zip, db) = (zip_path.clone(), db_path.clone());
    tokio::task::spawn_blocking(move || extract_db(&zip, &db)).await??;
    let _ = tokio::fs::remove_file(&zip_path).await;

    if !is_valid_roles_db(&db_path).await {
        bail!("downloaded roles database has no roles table");
    }
    info!(path = %db_path.display(), "roles database ready");
    Ok(db_path)
}

pub struct MaintainersSource {
    http: reqwest::Client,
    config: MaintainersConfig,
    profile_url: String,
    pool: OnceCell<SqlitePool>,
    avatars: RateLimitedFetcher<Option<String>>,
}

impl MaintainersSource {
    pub fn new(
        http: reqwest::Client,
        config: &MaintainersConfig,
        profiles: &RateLimitConfig,
        cache: Arc<FetchCache<Option<String>>>,
    ) -> Self {
        Self {
            avatars: RateLimitedFetcher::new("pypi-profiles", http.clone(), profiles).with_cache(cache),
            http,
            config: config.clone(),
            profile_url: profiles.base_url.trim_end_matches('/').to_string(),
            pool: OnceCell::new(),
        }
    }

    /// Use an already open roles database instead of downloading one.
    pub fn with_pool(self, pool: SqlitePool) -> Self {
        let _ = self.pool.set(pool);
        self
    }

    pub fn calls(&self) -> u64 {
        self.avatars.calls()
    }

    async fn avatar(&self, username: &str) -> Option<String> {
        let url = format!("{}/user/{}/", self.profile_url, username);
        self.avatars
            .fetch(
                username,
                |http| http.get(&url),
                |html| Ok::<_, FetchError>(scrape_avatar(html)),
            )
            .await
            .flatten()
    }
}

#[async_trait]
impl EnrichmentSource for MaintainersSource {
    type Data = Vec<Maintainer>;

    fn name(&self) -> &str {
        "maintainers"
    }

    fn identifier(&self, doc: &Document) -> Option<String> {
        if registry_of(doc) != Registry::Pypi {
            return None;
        }
        Some(str_field(doc, "name").to_string()).filter(|n| !n.is_empty())
    }

    async fn prepare(&self) -> Result<()> {
        if self.pool.initialized() {
            return Ok(());
        }
        let path = ensure_roles_db(&self.http, &self.config).await?;
        let pool = open_roles_db(&path).await?;
        let _ = self.pool.set(pool);
        Ok(())
    }

    async fn fetch(&self, identifier: &str, _doc: &Document) -> Option<Vec<Maintainer>> {
        let pool = self.pool.get()?;
        let usernames = match package_maintainers(pool, identifier).await {
            Ok(names) => names,
            Err(e) => {
                warn!(package = identifier, error = %e, "roles lookup failed");
                return None;
            }
        };
        if usernames.is_empty() {
            debug!(package = identifier, "no maintainers");
            return None;
        }
        let mut maintainers = Vec::with_capacity(usernames.len());
        for username in usernames {
            let avatar_url = self.avatar(&username).await;
            maintainers.push(Maintainer {
                username,
                avatar_url,
            });
        }
        Some(maintainers)
    }

    fn update_fields(&self, data: &Vec<Maintainer>, _doc: &Document) -> Document {
        maintainer_fields(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avatar_from_profile_html() {
        let html = r#"<div><img src="/static/logo.svg"><img class="author-profile__gravatar"
            src="https://pypi-camo.freetls.fastly.net/abc/def" alt="avatar"></div>"#;
        assert_eq!(
            scrape_avatar(html).as_deref(),
            Some("https://pypi-camo.freetls.fastly.net/abc/def")
        );
        assert_eq!(scrape_avatar("<img src='/x.png'>"), None);
    }

    #[tokio::test]
    async fn missing_file_is_not_a_roles_db() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_valid_roles_db(&dir.path().join("roles.db")).await);
    }

    #[tokio::test]
    async fn usernames_come_from_the_roles_table() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE roles (role_name TEXT, user_name TEXT, package_name TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        for (role, user) in [("Owner", "bob"), ("Maintainer", "alice"), ("Owner", "alice")] {
            sqlx::query("INSERT INTO roles VALUES (?, ?, 'plone.api')")
                .bind(role)
                .bind(user)
                .execute(&pool)
                .await
                .unwrap();
        }
        assert_eq!(package_maintainers(&pool, "plone.api").await.unwrap(), vec!["alice", "bob"]);

        let profiles = RateLimitConfig {
            base_url: "http://127.0.0.1:9".into(),
            delay_ms: 0,
            max_retries: 0,
            backoff_ms: 1,
            timeout_secs: 1,
        };
        let source = MaintainersSource::new(
            reqwest::Client::new(),
            &MaintainersConfig::default(),
            &profiles,
            FetchCache::shared(),
        )
        .with_pool(pool);
        source.prepare().await.unwrap();

        let maintainers = source.fetch("plone.api", &Document::new()).await.unwrap();
        assert_eq!(maintainers.len(), 2);
        assert_eq!(maintainers[0].username, "alice");
        assert_eq!(maintainers[0].avatar_url, None);
        assert!(source.fetch("unknown", &Document::new()).await.is_none());
    }

    #[test]
    fn fresh_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roles.db");
        assert!(!is_fresh(&path, Duration::from_secs(60)));
        std::fs::write(&path, b"x").unwrap();
        assert!(is_fresh(&path, Duration::from_secs(60)));
        assert!(!is_fresh(&path, Duration::ZERO));
    }
}
