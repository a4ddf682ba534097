//! Configuration loading.
//!
//! One TOML file describes the index connection, the build defaults, one
//! rate-limit block per outbound source, the maintainer database cache and
//! the named profiles. Secrets may be left out of the file and supplied via
//! `TYPESENSE_API_KEY`, `GITHUB_TOKEN` and `NPM_AUTH_TOKEN`.
//!
//! ```toml
//! default_profile = "plone"
//!
//! [index]
//! url = "http://localhost:8108"
//!
//! [sources.github]
//! delay_ms = 0
//! max_retries = 5
//!
//! [profiles.plone]
//! name = "Plone"
//! classifiers = ["Framework :: Plone"]
//! npm_keywords = ["plone"]
//! npm_scopes = ["@plone"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub maintainers: MaintainersConfig,
    #[serde(default)]
    pub default_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_index_timeout")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: default_index_url(),
            api_key: None,
            timeout_secs: default_index_timeout(),
        }
    }
}

fn default_index_url() -> String {
    "http://localhost:8108".to_string()
}
fn default_index_timeout() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Last successful incremental run, as epoch seconds.
    #[serde(default = "default_sincefile")]
    pub sincefile: PathBuf,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            sincefile: default_sincefile(),
            page_size: default_page_size(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}
fn default_sincefile() -> PathBuf {
    PathBuf::from(".pkgindex-since")
}
fn default_page_size() -> u32 {
    250
}

/// Pacing and retry for one outbound source.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Empty means the source's public endpoint.
    #[serde(default)]
    pub base_url: String,
    /// Minimum gap between two outbound calls.
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff step; doubled per attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl RateLimitConfig {
    fn with(base_url: &str, delay_ms: u64, max_retries: u32, backoff_ms: u64) -> Self {
        Self {
            base_url: base_url.to_string(),
            delay_ms,
            max_retries,
            backoff_ms,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct NpmSourceConfig {
    #[serde(flatten)]
    pub rate: RateLimitConfig,
    /// Registry for full package documents; search goes to `rate.base_url`.
    #[serde(default = "default_npm_registry")]
    pub registry_url: String,
    #[serde(default = "default_npm_workers")]
    pub max_workers: usize,
    #[serde(default = "default_npm_search_size")]
    pub search_size: u32,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for NpmSourceConfig {
    fn default() -> Self {
        Self {
            rate: RateLimitConfig::with("https://registry.npmjs.org", 720, 3, 2000),
            registry_url: default_npm_registry(),
            max_workers: default_npm_workers(),
            search_size: default_npm_search_size(),
            auth_token: None,
        }
    }
}

fn default_npm_registry() -> String {
    "https://registry.npmjs.org".to_string()
}
fn default_npm_workers() -> usize {
    10
}
fn default_npm_search_size() -> u32 {
    250
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct GithubSourceConfig {
    #[serde(flatten)]
    pub rate: RateLimitConfig,
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for GithubSourceConfig {
    fn default() -> Self {
        Self {
            rate: RateLimitConfig::with("https://api.github.com", 0, 5, 2000),
            token: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    #[serde(default = "default_pypi")]
    pub pypi: RateLimitConfig,
    #[serde(default)]
    pub npm: NpmSourceConfig,
    #[serde(default)]
    pub github: GithubSourceConfig,
    #[serde(default = "default_pypistats")]
    pub pypistats: RateLimitConfig,
    #[serde(default = "default_pypi_profiles")]
    pub pypi_profiles: RateLimitConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            pypi: default_pypi(),
            npm: NpmSourceConfig::default(),
            github: GithubSourceConfig::default(),
            pypistats: default_pypistats(),
            pypi_profiles: default_pypi_profiles(),
        }
    }
}

fn default_pypi() -> RateLimitConfig {
    RateLimitConfig::with("https://pypi.org", 100, 3, 1000)
}
fn default_pypistats() -> RateLimitConfig {
    RateLimitConfig::with("https://pypistats.org", 2000, 3, 2000)
}
fn default_pypi_profiles() -> RateLimitConfig {
    RateLimitConfig::with("https://pypi.org", 500, 3, 2000)
}

#[derive(Debug, Deserialize, Clone)]
pub struct MaintainersConfig {
    #[serde(default = "default_roles_url")]
    pub roles_url: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for MaintainersConfig {
    fn default() -> Self {
        Self {
            roles_url: default_roles_url(),
            cache_dir: default_cache_dir(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_roles_url() -> String {
    "https://github.com/pypi-data/data/releases/latest/download/roles.db.zip".to_string()
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cache/pkgindex")
}
fn default_cache_ttl() -> u64 {
    24 * 60 * 60
}

/// A named ecosystem: which packages to index and where.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct ProfileConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub classifiers: Vec<String>,
    #[serde(default)]
    pub npm_keywords: Vec<String>,
    #[serde(default)]
    pub npm_scopes: Vec<String>,
    /// Target collection; defaults to the profile id.
    #[serde(default)]
    pub collection: Option<String>,
}

fn env_secret(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn check_rate(name: &str, rate: &mut RateLimitConfig, public_url: &str) -> Result<()> {
    if rate.base_url.trim().is_empty() {
        rate.base_url = public_url.to_string();
    }
    rate.base_url = rate.base_url.trim_end_matches('/').to_string();
    if rate.timeout_secs == 0 {
        bail!("sources.{}.timeout_secs must be > 0", name);
    }
    Ok(())
}

/// Fill secrets from the environment and validate.
pub fn finish_config(mut config: Config) -> Result<Config> {
    if config.index.api_key.is_none() {
        config.index.api_key = env_secret("TYPESENSE_API_KEY");
    }
    if config.sources.github.token.is_none() {
        config.sources.github.token = env_secret("GITHUB_TOKEN");
    }
    if config.sources.npm.auth_token.is_none() {
        config.sources.npm.auth_token = env_secret("NPM_AUTH_TOKEN");
    }

    if config.build.batch_size == 0 {
        bail!("build.batch_size must be > 0");
    }
    if config.build.page_size == 0 {
        bail!("build.page_size must be > 0");
    }
    if config.sources.npm.max_workers == 0 {
        bail!("sources.npm.max_workers must be > 0");
    }
    if config.index.timeout_secs == 0 {
        bail!("index.timeout_secs must be > 0");
    }
    let sources = &mut config.sources;
    check_rate("pypi", &mut sources.pypi, "https://pypi.org")?;
    check_rate("npm", &mut sources.npm.rate, "https://registry.npmjs.org")?;
    check_rate("github", &mut sources.github.rate, "https://api.github.com")?;
    check_rate("pypistats", &mut sources.pypistats, "https://pypistats.org")?;
    check_rate("pypi_profiles", &mut sources.pypi_profiles, "https://pypi.org")?;
    sources.npm.registry_url = sources.npm.registry_url.trim_end_matches('/').to_string();

    if let Some(default) = &config.default_profile {
        if !config.profiles.contains_key(default) {
            bail!("default_profile '{}' is not defined under [profiles]", default);
        }
    }
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config file")?;
    finish_config(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.build.batch_size, 100);
        assert_eq!(config.sources.pypistats.delay_ms, 2000);
        assert_eq!(config.sources.npm.max_workers, 10);
        assert_eq!(config.sources.npm.rate.delay_ms, 720);
        assert_eq!(config.maintainers.cache_ttl_secs, 86_400);
    }

    #[test]
    fn partial_source_block_keeps_field_defaults() {
        let config = parse_config(
            r#"
[sources.github]
base_url = "http://127.0.0.1:9999"
max_retries = 1
"#,
        )
        .unwrap();
        assert_eq!(config.sources.github.rate.base_url, "http://127.0.0.1:9999");
        assert_eq!(config.sources.github.rate.max_retries, 1);
        assert_eq!(config.sources.github.rate.timeout_secs, 30);
    }

    #[test]
    fn profiles_parse() {
        let config = parse_config(
            r#"
default_profile = "plone"

[profiles.plone]
name = "Plone"
classifiers = ["Framework :: Plone"]
npm_scopes = ["@plone"]
"#,
        )
        .unwrap();
        let p = &config.profiles["plone"];
        assert_eq!(p.name.as_deref(), Some("Plone"));
        assert_eq!(p.npm_scopes, vec!["@plone"]);
    }

    #[test]
    fn missing_base_url_falls_back_to_public_endpoint() {
        let config = parse_config("[sources.pypistats]\ndelay_ms = 10\n").unwrap();
        assert_eq!(config.sources.pypistats.base_url, "https://pypistats.org");
        assert_eq!(config.sources.pypistats.delay_ms, 10);
    }

    #[test]
    fn rejects_zero_batch_size() {
        assert!(parse_config("[build]\nbatch_size = 0\n").is_err());
    }

    #[test]
    fn rejects_unknown_default_profile() {
        let err = parse_config("default_profile = \"nope\"\n").unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
