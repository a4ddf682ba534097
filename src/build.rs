//! `pkgindex build`: registry → transform chain → batch indexer.
//!
//! The scanner and the indexing consumer run concurrently on one task,
//! joined with `tokio::join!` and connected by a bounded channel, so a slow
//! index applies back-pressure to the registry scan.
//!
//! The target is addressed through its alias. A missing target gets its
//! first generation; `--recreate` rolls the alias to a new generation
//! (copying the current documents) before the new records are upserted.

use std::path::Path;

use anyhow::{bail, Context, Result};
use pkgindex_core::batch::{BatchIndexer, IndexStats};
use pkgindex_core::index::SearchIndex;
use pkgindex_core::models::{PackageDocument, Registry};
use pkgindex_core::schema::packages_schema;
use pkgindex_core::transform::TransformChain;
use pkgindex_core::versioner::{CollectionVersioner, Generation};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::fetcher::http_client;
use crate::profiles::{validate_npm, ResolvedProfile};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::registry::{RegistryScanner, ScanMode, ScanOptions, ScanSummary};
use crate::registry_npm::NpmScanner;
use crate::registry_pypi::PypiScanner;
use crate::typesense::TypesenseClient;

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub registry: Registry,
    pub collection: String,
    pub profile: Option<ResolvedProfile>,
    pub incremental: bool,
    pub name_filter: Option<String>,
    pub limit: Option<usize>,
    pub recreate: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub registry: Registry,
    pub collection: String,
    pub generation: Option<Generation>,
    pub scan: ScanSummary,
    pub index: IndexStats,
}

/// Epoch seconds stored by the previous successful PyPI build.
pub fn read_sincefile(path: &Path) -> Result<i64> {
    if !path.exists() {
        bail!(
            "since file {} does not exist; run a full build first",
            path.display()
        );
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    raw.trim()
        .parse()
        .with_context(|| format!("{} does not hold a timestamp", path.display()))
}

pub fn write_sincefile(path: &Path, timestamp: i64) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, timestamp.to_string())
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Scan with `scanner` and upsert everything into `collection`.
///
/// `now` feeds the build-time health score. Scan failures are returned
/// after the consumer has drained and flushed what it already received.
#[allow(clippy::too_many_arguments)]
pub async fn index_registry<I: SearchIndex + ?Sized>(
    index: &I,
    scanner: &dyn RegistryScanner,
    collection: &str,
    options: &ScanOptions,
    batch_size: usize,
    recreate: bool,
    now: i64,
    progress: &dyn ProgressReporter,
) -> Result<BuildSummary> {
    let registry = scanner.registry();
    let mut generation = None;
    if recreate || !index.collection_exists(collection).await? {
        let versioner = CollectionVersioner::new(index, packages_schema(collection))
            .batch_size(batch_size);
        let created = versioner
            .ensure(collection)
            .await
            .with_context(|| format!("Failed to prepare collection '{}'", collection))?;
        info!(collection, generation = %created.current, "target generation ready");
        generation = Some(created);
    }

    progress.report(ProgressEvent::Scanning {
        registry: registry.to_string(),
    });

    let (tx, mut rx) = mpsc::channel::<PackageDocument>(batch_size.max(1) * 2);
    let chain = TransformChain::standard(now);
    let consume = async {
        let mut indexer = BatchIndexer::new(index, collection, batch_size);
        let mut last_batches = 0;
        while let Some(record) = rx.recv().await {
            indexer.push(chain.apply(record)).await;
            let stats = indexer.stats();
            if stats.batches != last_batches {
                last_batches = stats.batches;
                progress.report(ProgressEvent::Indexing {
                    registry: registry.to_string(),
                    records: stats.imported + stats.rejected,
                    batches: stats.batches,
                });
            }
        }
        indexer.finish().await
    };

    let (scanned, indexed) = tokio::join!(scanner.scan(options, tx), consume);
    let scan = scanned.with_context(|| format!("{} scan failed", registry))?;

    progress.report(ProgressEvent::Indexing {
        registry: registry.to_string(),
        records: indexed.imported + indexed.rejected,
        batches: indexed.batches,
    });
    if indexed.rejected > 0 {
        warn!(collection, rejected = indexed.rejected, "some records were rejected");
    }
    info!(
        collection,
        packages = scan.packages,
        releases = scan.releases,
        imported = indexed.imported,
        "build finished"
    );
    Ok(BuildSummary {
        registry,
        collection: collection.to_string(),
        generation,
        scan,
        index: indexed,
    })
}

fn scanner_for(
    config: &Config,
    request: &BuildRequest,
    http: reqwest::Client,
) -> Result<Box<dyn RegistryScanner>> {
    let profile = request.profile.as_ref();
    Ok(match request.registry {
        Registry::Pypi => Box::new(PypiScanner::new(
            http,
            &config.sources.pypi,
            profile.map(|p| p.classifiers.clone()).unwrap_or_default(),
        )),
        Registry::Npm => {
            let Some(profile) = profile else {
                bail!("npm builds need a profile with npm_keywords or npm_scopes");
            };
            validate_npm(profile)?;
            Box::new(NpmScanner::new(
                http,
                &config.sources.npm,
                profile.npm_keywords.clone(),
                profile.npm_scopes.clone(),
            ))
        }
    })
}

/// The `build` command.
pub async fn run_build(
    config: &Config,
    request: &BuildRequest,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let started = chrono::Utc::now().timestamp();
    let sincefile = config.build.sincefile.as_path();

    let mode = if request.incremental && request.registry == Registry::Pypi {
        ScanMode::Incremental {
            since: read_sincefile(sincefile)?,
        }
    } else {
        if request.incremental {
            info!("npm has no update feed, scanning in full");
        }
        ScanMode::Full
    };
    let options = ScanOptions {
        mode,
        name_filter: request.name_filter.clone(),
        limit: request.limit,
    };

    let index = TypesenseClient::new(&config.index)?;
    let timeout = match request.registry {
        Registry::Pypi => config.sources.pypi.timeout(),
        Registry::Npm => config.sources.npm.rate.timeout(),
    };
    let scanner = scanner_for(config, request, http_client(timeout)?)?;

    let summary = index_registry(
        &index,
        scanner.as_ref(),
        &request.collection,
        &options,
        config.build.batch_size,
        request.recreate,
        started,
        progress,
    )
    .await?;

    if request.registry == Registry::Pypi {
        write_sincefile(sincefile, started)?;
    }

    if let Some(generation) = &summary.generation {
        println!(
            "Collection '{}' now points at '{}'.",
            generation.logical, generation.current
        );
    }
    println!(
        "{} build into '{}': {} packages, {} releases, {} imported, {} rejected, {} skipped.",
        summary.registry,
        summary.collection,
        summary.scan.packages,
        summary.scan.releases,
        summary.index.imported,
        summary.index.rejected,
        summary.scan.skipped
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sincefile_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join(".since");
        assert!(read_sincefile(&path).is_err());
        write_sincefile(&path, 1_700_000_000).unwrap();
        assert_eq!(read_sincefile(&path).unwrap(), 1_700_000_000);
    }

    #[test]
    fn garbage_sincefile_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".since");
        std::fs::write(&path, "yesterday").unwrap();
        assert!(read_sincefile(&path).is_err());
    }
}
