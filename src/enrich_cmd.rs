//! `pkgindex enrich`: run one or all enrichment sources over one or more
//! target collections.
//!
//! Sources are built once per invocation, so their fetch caches are shared
//! by every target: a repository looked up for the first collection is not
//! fetched again for the second. `all` runs the sources in dependency
//! order, the health score last because it reads what the others wrote.

use anyhow::Result;
use clap::ValueEnum;
use pkgindex_core::enrich::{EnrichStats, EnrichmentRunner, EnrichmentSource, RunOptions};
use pkgindex_core::index::SearchIndex;
use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::fetcher::{http_client, FetchCache};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::source_downloads::DownloadsSource;
use crate::source_github::GithubSource;
use crate::source_health::HealthSource;
use crate::source_maintainers::MaintainersSource;
use crate::typesense::TypesenseClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Github,
    Downloads,
    Maintainers,
    Health,
    All,
}

impl SourceKind {
    /// Concrete sources to run, in order.
    pub fn expand(self) -> Vec<SourceKind> {
        match self {
            SourceKind::All => vec![
                SourceKind::Github,
                SourceKind::Downloads,
                SourceKind::Maintainers,
                SourceKind::Health,
            ],
            kind => vec![kind],
        }
    }
}

/// Every source, built once and reused across targets.
pub struct SourceSet {
    pub github: GithubSource,
    pub downloads: DownloadsSource,
    pub maintainers: MaintainersSource,
    pub health: HealthSource,
}

impl SourceSet {
    pub fn from_config(config: &Config, now: i64) -> Result<Self> {
        let sources = &config.sources;
        Ok(Self {
            github: GithubSource::new(
                http_client(sources.github.rate.timeout())?,
                &sources.github,
                FetchCache::shared(),
            ),
            downloads: DownloadsSource::new(
                http_client(sources.pypistats.timeout())?,
                &sources.pypistats,
                FetchCache::shared(),
            ),
            maintainers: MaintainersSource::new(
                http_client(sources.pypi_profiles.timeout())?,
                &config.maintainers,
                &sources.pypi_profiles,
                FetchCache::shared(),
            ),
            health: HealthSource::new(now),
        })
    }

    /// Outbound calls made by the network sources.
    pub fn calls(&self) -> u64 {
        self.github.calls() + self.downloads.calls() + self.maintainers.calls()
    }
}

async fn run_source<S, I>(
    index: &I,
    source: &S,
    target: &str,
    options: &RunOptions,
) -> Result<EnrichStats>
where
    S: EnrichmentSource,
    I: SearchIndex + ?Sized,
{
    let runner = EnrichmentRunner::new(index, source, options.clone());
    Ok(runner.run(target).await?)
}

/// Run `kind` over every target. A configuration failure (missing target,
/// unavailable lookup table) stops the whole invocation.
pub async fn enrich_targets<I: SearchIndex + ?Sized>(
    index: &I,
    sources: &SourceSet,
    kind: SourceKind,
    targets: &[String],
    options: &RunOptions,
    progress: &dyn ProgressReporter,
) -> Result<Vec<EnrichStats>> {
    let mut all = Vec::new();
    for target in targets {
        for kind in kind.expand() {
            let stats = match kind {
                SourceKind::Github => run_source(index, &sources.github, target, options).await?,
                SourceKind::Downloads => {
                    run_source(index, &sources.downloads, target, options).await?
                }
                SourceKind::Maintainers => {
                    run_source(index, &sources.maintainers, target, options).await?
                }
                SourceKind::Health => run_source(index, &sources.health, target, options).await?,
                SourceKind::All => continue,
            };
            progress.report(ProgressEvent::Enriching {
                source: stats.source.clone(),
                target: stats.target.clone(),
                visited: stats.visited,
                found: stats.found,
            });
            all.push(stats);
        }
    }
    info!(runs = all.len(), calls = sources.calls(), "enrichment finished");
    Ok(all)
}

/// The `enrich` command.
pub async fn run_enrich(
    config: &Config,
    kind: SourceKind,
    targets: &[String],
    options: RunOptions,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let index = TypesenseClient::new(&config.index)?;
    let sources = SourceSet::from_config(config, chrono::Utc::now().timestamp())?;
    let stats = enrich_targets(&index, &sources, kind, targets, &options, progress).await?;
    for s in &stats {
        println!(
            "{} -> {}: {} updated, {} skipped, {} without data, {} failed ({:?})",
            s.source, s.target, s.updated, s.skipped, s.no_data, s.write_failures, s.outcome
        );
    }
    Ok(())
}
