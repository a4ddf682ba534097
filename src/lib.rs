//! # pkgindex
//!
//! Indexes PyPI and npm package metadata into a versioned Typesense
//! collection and enriches the indexed releases with repository, download,
//! maintainer and health data.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Registries  │──▶│  Transforms  │──▶│ BatchIndexer │──▶ alias ──▶ generation
//! │  PyPI / npm  │   │ version/clean│   │  (upserts)   │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              │
//!        ┌─────────────────────────────────────┘
//!        ▼
//! ┌──────────────┐   ┌──────────────────────────────────┐
//! │  PageCursor  │──▶│ github / downloads / maintainers │──▶ update_document(id)
//! │  (grouped)   │   │ health  (RateLimitedFetcher)     │
//! └──────────────┘   └──────────────────────────────────┘
//! ```
//!
//! The network-free pieces (document model, version encoder, cursor,
//! runner, batch indexer, versioner) live in `pkgindex-core`; this crate
//! adds configuration, the Typesense client, the outbound fetchers and the
//! CLI commands.
//!
//! ## Quick Start
//!
//! ```bash
//! pkgindex build pypi --profile plone --recreate
//! pkgindex build npm --profile plone
//! pkgindex enrich all --profile plone
//! pkgindex show plone.api --profile plone --all-versions
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`profiles`] | Profile and target resolution |
//! | [`logging`] | Tracing subscriber setup |
//! | [`typesense`] | `SearchIndex` over the Typesense REST API |
//! | [`fetcher`] | Rate-limited, retrying, memoized HTTP fetches |
//! | [`registry`] | Registry scanner trait and scan options |
//! | [`registry_pypi`] | PyPI full and incremental scans |
//! | [`registry_npm`] | npm search and packument scans |
//! | [`source_github`] | Repository statistics |
//! | [`source_downloads`] | Recent download counts |
//! | [`source_maintainers`] | Maintainer usernames and avatars |
//! | [`source_health`] | Health score recomputation |
//! | [`build`] | The `build` command |
//! | [`enrich_cmd`] | The `enrich` command |
//! | [`collections`] | Collection administration and `show` |
//! | [`profiles_cmd`] | The `profiles` command |
//! | [`progress`] | Progress reporting on stderr |

pub mod build;
pub mod collections;
pub mod config;
pub mod enrich_cmd;
pub mod fetcher;
pub mod logging;
pub mod profiles;
pub mod profiles_cmd;
pub mod progress;
pub mod registry;
pub mod registry_npm;
pub mod registry_pypi;
pub mod source_downloads;
pub mod source_github;
pub mod source_health;
pub mod source_maintainers;
pub mod typesense;
