//! # pkgindex core
//!
//! Network-free logic shared by the `pkgindex` binary: the package document
//! model, the version-sortable encoder, health scoring, the collection schema,
//! the [`index::SearchIndex`] collaborator trait with an in-memory backend, and
//! the pipeline pieces that sit on top of it.
//!
//! ```text
//!   build:   registry ──▶ transform chain ──▶ BatchIndexer ──▶ alias ──▶ generation
//!   enrich:  PageCursor ──▶ EnrichmentSource::fetch ──▶ update_document(id)
//!   rebuild: CollectionVersioner: create next ─▶ copy ─▶ repoint alias ─▶ drop old
//! ```
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`version`] | Raw version string to fixed-width sortable key |
//! | [`models`] | Document identity, typed views, enrichment payloads |
//! | [`health`] | Base health score and enhanced bonuses |
//! | [`schema`] | Collection schema definition |
//! | [`index`] | `SearchIndex` trait and `InMemoryIndex` |
//! | [`cursor`] | Grouped, paginated collection walk |
//! | [`enrich`] | `EnrichmentSource` trait and `EnrichmentRunner` |
//! | [`batch`] | Fixed-size bulk upsert |
//! | [`versioner`] | Zero-downtime generation swap |
//! | [`transform`] | Per-record build transforms |

pub mod batch;
pub mod cursor;
pub mod enrich;
pub mod error;
pub mod health;
pub mod index;
pub mod models;
pub mod schema;
pub mod transform;
pub mod version;
pub mod versioner;
