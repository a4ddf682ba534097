//! Zero-downtime collection rebuilds.
//!
//! A logical collection name is an alias that points at exactly one
//! generation `base-N`. [`CollectionVersioner::ensure`] moves it to the next
//! generation:
//!
//! ```text
//!   alias ─▶ base-N              alias ─▶ base-N          alias ─▶ base-N+1
//!            (serving)     ─▶    base-N+1 (copying)  ─▶    base-N   (deleted)
//! ```
//!
//! The alias is only repointed after the new generation holds at least as
//! many documents as the old one. A failed copy deletes the partial new
//! generation and leaves the alias alone. A failed delete of the old
//! generation is logged and reported in [`Generation::previous_deleted`];
//! the alias already points at the new generation by then.

use serde::Serialize;
use tracing::{info, warn};

use crate::batch::DEFAULT_BATCH_SIZE;
use crate::error::{IndexError, PipelineError};
use crate::index::{ImportAction, SearchIndex};
use crate::schema::CollectionSchema;

/// Split `name-N` into `("name", Some(N))`; other names have no version.
pub fn parse_versioned_name(name: &str) -> (&str, Option<u32>) {
    if let Some((base, suffix)) = name.rsplit_once('-') {
        if !base.is_empty() && !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = suffix.parse() {
                return (base, Some(n));
            }
        }
    }
    (name, None)
}

/// Name of the generation after `current` (`None` means none yet).
pub fn next_generation_name(base: &str, current: Option<u32>) -> String {
    format!("{}-{}", base, current.unwrap_or(0) + 1)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Generation {
    pub logical: String,
    pub previous: Option<String>,
    pub current: String,
    pub copied: u64,
    pub previous_deleted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CopyStats {
    pub exported: u64,
    pub imported: u64,
    pub rejected: u64,
}

/// Copy every document of `source` into `target` with batched upserts.
/// Rejections are logged (the first five in full) and counted.
pub async fn copy_documents<I: SearchIndex + ?Sized>(
    index: &I,
    source: &str,
    target: &str,
    batch_size: usize,
) -> Result<CopyStats, IndexError> {
    info!(source, target, "exporting documents");
    let docs = index.export_documents(source).await?;
    let mut stats = CopyStats {
        exported: docs.len() as u64,
        ..Default::default()
    };
    let mut logged = 0;
    for chunk in docs.chunks(batch_size.max(1)) {
        let results = index
            .import_documents(target, chunk, ImportAction::Upsert)
            .await?;
        for result in results {
            if result.success {
                stats.imported += 1;
            } else {
                stats.rejected += 1;
                if logged < 5 {
                    logged += 1;
                    warn!(target, id = ?result.id, error = ?result.error, "document rejected during copy");
                }
            }
        }
    }
    if stats.rejected > 0 {
        warn!(target, rejected = stats.rejected, "copy had failed documents");
    }
    info!(source, target, imported = stats.imported, "copy done");
    Ok(stats)
}

pub struct CollectionVersioner<'a, I: SearchIndex + ?Sized> {
    index: &'a I,
    schema: CollectionSchema,
    keep_old: bool,
    batch_size: usize,
}

impl<'a, I: SearchIndex + ?Sized> CollectionVersioner<'a, I> {
    /// `schema` is a template; its name is replaced per generation.
    pub fn new(index: &'a I, schema: CollectionSchema) -> Self {
        Self {
            index,
            schema,
            keep_old: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Keep the previous generation instead of deleting it.
    pub fn keep_old(mut self, keep: bool) -> Self {
        self.keep_old = keep;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Move `logical` to a fresh generation and return it.
    pub async fn ensure(&self, logical: &str) -> Result<Generation, PipelineError> {
        if let Some(current) = self.index.retrieve_alias(logical).await? {
            let (base, version) = parse_versioned_name(&current);
            let next = next_generation_name(base, version);
            info!(alias = logical, from = %current, to = %next, "rolling to next generation");
            return self.roll(logical, &current, &next).await;
        }

        if self.index.retrieve_collection(logical).await?.is_some() {
            let next = next_generation_name(logical, None);
            info!(collection = logical, to = %next, "converting to versioned scheme");
            return self.roll(logical, logical, &next).await;
        }

        let first = next_generation_name(logical, None);
        self.drop_stale(&first).await?;
        self.index.create_collection(&self.schema.renamed(&first)).await?;
        self.index.upsert_alias(logical, &first).await?;
        info!(alias = logical, collection = %first, "created first generation");
        Ok(Generation {
            logical: logical.to_string(),
            previous: None,
            current: first,
            copied: 0,
            previous_deleted: false,
        })
    }

    /// A leftover `next` from an interrupted run is never aliased; drop it.
    async fn drop_stale(&self, next: &str) -> Result<(), PipelineError> {
        let aliased = self
            .index
            .list_aliases()
            .await?
            .into_iter()
            .any(|a| a.collection_name == next);
        if aliased {
            return Err(PipelineError::Configuration(format!(
                "collection '{}' is already referenced by an alias",
                next
            )));
        }
        // Direct lookup only: an alias with this name must not count.
        let exists = self
            .index
            .list_collections()
            .await?
            .into_iter()
            .any(|c| c.name == next);
        if exists {
            warn!(collection = next, "deleting stale generation from an earlier run");
            self.index.delete_collection(next).await?;
        }
        Ok(())
    }

    async fn discard(&self, next: &str) {
        if let Err(e) = self.index.delete_collection(next).await {
            warn!(collection = next, error = %e, "could not delete partial generation");
        }
    }

    async fn roll(&self, logical: &str, old: &str, next: &str) -> Result<Generation, PipelineError> {
        let expected = self
            .index
            .list_collections()
            .await?
            .into_iter()
            .find(|c| c.name == old)
            .map(|c| c.num_documents)
            .unwrap_or(0);

        self.drop_stale(next).await?;
        self.index.create_collection(&self.schema.renamed(next)).await?;

        let stats = match copy_documents(self.index, old, next, self.batch_size).await {
            Ok(stats) => stats,
            Err(e) => {
                self.discard(next).await;
                return Err(e.into());
            }
        };

        let copied = match self.index.retrieve_collection(next).await {
            Ok(Some(info)) => info.num_documents,
            Ok(None) => 0,
            Err(e) => {
                self.discard(next).await;
                return Err(e.into());
            }
        };
        if copied < expected {
            self.discard(next).await;
            return Err(PipelineError::CopyIncomplete {
                target: next.to_string(),
                copied,
                expected,
            });
        }

        if let Err(e) = self.index.upsert_alias(logical, next).await {
            self.discard(next).await;
            return Err(e.into());
        }
        info!(alias = logical, collection = next, copied = stats.imported, "alias switched");

        let previous_deleted = if self.keep_old {
            info!(collection = old, "previous generation kept");
            false
        } else {
            match self.index.delete_collection(old).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(collection = old, error = %e, "previous generation not deleted; remove it manually");
                    false
                }
            }
        };

        Ok(Generation {
            logical: logical.to_string(),
            previous: Some(old.to_string()),
            current: next.to_string(),
            copied,
            previous_deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versioned_names() {
        assert_eq!(parse_versioned_name("packages-3"), ("packages", Some(3)));
        assert_eq!(parse_versioned_name("plone-addons-12"), ("plone-addons", Some(12)));
        assert_eq!(parse_versioned_name("plone-addons"), ("plone-addons", None));
        assert_eq!(parse_versioned_name("packages"), ("packages", None));
        assert_eq!(parse_versioned_name("-3"), ("-3", None));
        assert_eq!(parse_versioned_name("v-"), ("v-", None));
    }

    #[test]
    fn next_names() {
        assert_eq!(next_generation_name("packages", Some(3)), "packages-4");
        assert_eq!(next_generation_name("packages", None), "packages-1");
    }
}
