//! # pkgindex CLI
//!
//! The `pkgindex` binary builds and maintains package search collections.
//!
//! ## Usage
//!
//! ```bash
//! pkgindex --config ./config/pkgindex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pkgindex build <pypi\|npm>` | Scan a registry and upsert releases into the target |
//! | `pkgindex enrich <source>` | Merge github/downloads/maintainers/health data into indexed releases |
//! | `pkgindex collections ...` | List, recreate, migrate, alias and delete collections; manage API keys |
//! | `pkgindex show <package>` | Print the indexed releases of one package |
//! | `pkgindex profiles` | List configured profiles and whether they are valid |
//! | `pkgindex completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # First full PyPI build for a profile, into a fresh generation
//! pkgindex build pypi --profile plone --recreate
//!
//! # Only what changed since the last build
//! pkgindex build pypi --profile plone --incremental
//!
//! # npm packages selected by the profile's keywords and scopes
//! pkgindex build npm --profile plone
//!
//! # Every enrichment source, health last
//! pkgindex enrich all --profile plone
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use pkgindex::build::{run_build, BuildRequest};
use pkgindex::collections;
use pkgindex::config::{load_config, Config};
use pkgindex::enrich_cmd::{run_enrich, SourceKind};
use pkgindex::logging::{init_logging, LogFormat};
use pkgindex::profiles::resolve_target;
use pkgindex::profiles_cmd::list_profiles;
use pkgindex::progress::ProgressMode;
use pkgindex_core::enrich::RunOptions;
use pkgindex_core::models::Registry;

/// pkgindex: index PyPI and npm package metadata into Typesense.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/pkgindex.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "pkgindex",
    about = "Index PyPI and npm package metadata into versioned Typesense collections",
    version,
    long_about = "pkgindex scans PyPI and npm for the packages selected by a profile, \
    indexes every release with a version-sortable key into a versioned collection behind \
    an alias, and enriches the releases with repository statistics, download counts, \
    maintainers and a health score."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pkgindex.toml")]
    config: PathBuf,

    /// Debug-level logging for pkgindex (RUST_LOG still wins).
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Log as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a registry and index its releases.
    ///
    /// PyPI selects packages by the profile's classifiers; npm by its
    /// keywords and scopes. `--incremental` reads the PyPI update feeds
    /// since the last successful build.
    Build {
        /// Registry to scan: `pypi` or `npm`.
        #[arg(value_parser = parse_registry)]
        registry: Registry,

        /// Profile to use (falls back to DEFAULT_PROFILE, then `default_profile`).
        #[arg(long, short)]
        profile: Option<String>,

        /// Target collection or alias (defaults to the profile's collection).
        #[arg(long, short)]
        target: Option<String>,

        /// Only releases published since the last build (PyPI).
        #[arg(long, short)]
        incremental: bool,

        /// Only packages whose name contains this text.
        #[arg(long)]
        filter_name: Option<String>,

        /// Stop after this many packages.
        #[arg(long)]
        limit: Option<usize>,

        /// Roll the target to a new generation before indexing.
        #[arg(long)]
        recreate: bool,

        /// Progress output on stderr (default: human on a TTY, otherwise off).
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Enrich indexed releases from an external source.
    ///
    /// One representative release per package is looked up; every
    /// release of the package receives the result.
    Enrich {
        /// `github`, `downloads`, `maintainers`, `health` or `all`.
        #[arg(value_enum)]
        source: SourceKind,

        /// Profile used to find the target when `--target` is absent.
        #[arg(long, short)]
        profile: Option<String>,

        /// Target collection; repeat to enrich several.
        #[arg(long = "target", short)]
        targets: Vec<String>,

        /// Only this package.
        #[arg(long)]
        name: Option<String>,

        /// Stop after this many updates.
        #[arg(long)]
        limit: Option<u64>,

        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Administer collections, aliases and API keys.
    Collections {
        #[command(subcommand)]
        action: CollectionsAction,
    },

    /// Print the indexed data of one package.
    Show {
        /// Package name.
        package: String,

        #[arg(long, short)]
        profile: Option<String>,

        #[arg(long, short)]
        target: Option<String>,

        /// Every indexed release instead of only the newest.
        #[arg(long)]
        all_versions: bool,
    },

    /// List configured profiles.
    Profiles,

    /// Print shell completions.
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CollectionsAction {
    /// Every collection, with document counts and the aliases pointing at it.
    List,
    /// Every alias and its collection.
    Aliases,
    /// Move an alias to a new generation with the current schema, copying
    /// the documents over.
    Recreate {
        name: String,
        /// Keep the previous generation.
        #[arg(long)]
        keep_old: bool,
        /// Delete the previous generation without asking.
        #[arg(long)]
        force: bool,
    },
    /// Copy every document from one collection to another.
    Migrate {
        #[arg(long)]
        source: String,
        #[arg(long)]
        target: String,
    },
    /// Point an alias at a collection.
    Alias {
        #[arg(long)]
        name: String,
        #[arg(long)]
        target: String,
    },
    /// Delete a concrete collection (not an alias).
    Delete {
        name: String,
        /// Do not ask for confirmation.
        #[arg(long)]
        force: bool,
    },
    /// Search-only API keys.
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },
}

#[derive(Subcommand)]
enum KeysAction {
    List,
    /// Create a search-only key scoped to one collection.
    Create {
        #[arg(long)]
        target: String,
        /// Use this key value instead of a generated one.
        #[arg(long)]
        value: Option<String>,
    },
    Delete {
        id: u64,
    },
}

fn parse_registry(s: &str) -> Result<Registry, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

fn progress_mode(flag: Option<ProgressMode>) -> ProgressMode {
    flag.unwrap_or_else(ProgressMode::default_for_tty)
}

fn enrich_targets(
    cfg: &Config,
    profile: Option<&str>,
    targets: Vec<String>,
) -> Result<Vec<String>> {
    if !targets.is_empty() {
        return Ok(targets);
    }
    Ok(vec![resolve_target(cfg, profile, None)?.collection])
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Human
    };
    init_logging(cli.verbose, format);

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "pkgindex", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Build {
            registry,
            profile,
            target,
            incremental,
            filter_name,
            limit,
            recreate,
            progress,
        } => {
            let resolved = resolve_target(&cfg, profile.as_deref(), target.as_deref())?;
            let request = BuildRequest {
                registry,
                collection: resolved.collection,
                profile: resolved.profile,
                incremental,
                name_filter: filter_name,
                limit,
                recreate,
            };
            let reporter = progress_mode(progress).reporter();
            run_build(&cfg, &request, reporter.as_ref()).await?;
        }
        Commands::Enrich {
            source,
            profile,
            targets,
            name,
            limit,
            progress,
        } => {
            let targets = enrich_targets(&cfg, profile.as_deref(), targets)?;
            let options = RunOptions {
                only: name,
                limit,
                page_size: cfg.build.page_size,
            };
            let reporter = progress_mode(progress).reporter();
            run_enrich(&cfg, source, &targets, options, reporter.as_ref()).await?;
        }
        Commands::Collections { action } => match action {
            CollectionsAction::List => collections::run_list(&cfg).await?,
            CollectionsAction::Aliases => collections::run_aliases(&cfg).await?,
            CollectionsAction::Recreate {
                name,
                keep_old,
                force,
            } => collections::run_recreate(&cfg, &name, keep_old, force).await?,
            CollectionsAction::Migrate { source, target } => {
                collections::run_migrate(&cfg, &source, &target).await?
            }
            CollectionsAction::Alias { name, target } => {
                collections::run_alias(&cfg, &name, &target).await?
            }
            CollectionsAction::Delete { name, force } => {
                collections::run_delete(&cfg, &name, force).await?
            }
            CollectionsAction::Keys { action } => match action {
                KeysAction::List => collections::run_keys_list(&cfg).await?,
                KeysAction::Create { target, value } => {
                    collections::run_keys_create(&cfg, &target, value.as_deref()).await?
                }
                KeysAction::Delete { id } => collections::run_keys_delete(&cfg, id).await?,
            },
        },
        Commands::Show {
            package,
            profile,
            target,
            all_versions,
        } => {
            let resolved = resolve_target(&cfg, profile.as_deref(), target.as_deref())?;
            collections::run_show(&cfg, &resolved.collection, &package, all_versions).await?;
        }
        Commands::Profiles => list_profiles(&cfg)?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
