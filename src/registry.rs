//! Registry scanners: the build path's record producers.
//!
//! A [`RegistryScanner`] discovers packages on an external registry and
//! sends one [`PackageDocument`] per release down an `mpsc` channel. The
//! build command runs the scanner and the indexing consumer concurrently;
//! a closed channel means the consumer gave up and the scan stops early.
//!
//! | Scanner | Discovery | Release data |
//! |---------|-----------|--------------|
//! | [`PypiScanner`](crate::registry_pypi::PypiScanner) | Simple JSON index or RSS feeds | `/pypi/{name}/{version}/json` |
//! | [`NpmScanner`](crate::registry_npm::NpmScanner) | `/-/v1/search` by keyword/scope | full packument, every version |

use anyhow::Result;
use async_trait::async_trait;
use pkgindex_core::models::{PackageDocument, Registry};
use serde::Serialize;
use tokio::sync::mpsc;

/// Which releases to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Every release of every matching package.
    Full,
    /// Only what changed after `since` (epoch seconds).
    Incremental { since: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    pub mode: ScanMode,
    /// Substring a package name must contain.
    pub name_filter: Option<String>,
    /// Maximum number of packages (not releases).
    pub limit: Option<usize>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            mode: ScanMode::Full,
            name_filter: None,
            limit: None,
        }
    }
}

impl ScanOptions {
    pub fn accepts_name(&self, name: &str) -> bool {
        match self.name_filter.as_deref() {
            Some(filter) if !filter.is_empty() => name.contains(filter),
            _ => true,
        }
    }

    pub fn limit_reached(&self, packages: usize) -> bool {
        matches!(self.limit, Some(limit) if limit > 0 && packages >= limit)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Packages that passed the filters.
    pub packages: u64,
    /// Release records sent to the consumer.
    pub releases: u64,
    /// Packages or releases dropped (filtered, missing, unreadable).
    pub skipped: u64,
}

/// Epoch seconds from the timestamp formats registries use: RFC 3339
/// (`2024-01-02T03:04:05.678Z`) or naive UTC (`2024-01-02T03:04:05`).
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

#[async_trait]
pub trait RegistryScanner: Send + Sync {
    fn registry(&self) -> Registry;

    /// Scan and send records until done, the limit is hit or `tx` closes.
    async fn scan(
        &self,
        options: &ScanOptions,
        tx: mpsc::Sender<PackageDocument>,
    ) -> Result<ScanSummary>;
}
