//! Fixed-size bulk upsert.
//!
//! [`BatchIndexer`] buffers documents and issues one `upsert` import per
//! full batch, plus one for the remainder on [`finish`](BatchIndexer::finish).
//! Rejected documents are logged one by one and counted; a batch that fails
//! as a whole is logged and counted too. Neither stops later batches.

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::index::{ImportAction, SearchIndex};
use crate::models::{str_field, Document};

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub batches: u64,
    pub imported: u64,
    pub rejected: u64,
    pub failed_batches: u64,
}

pub struct BatchIndexer<'a, I: SearchIndex + ?Sized> {
    index: &'a I,
    collection: String,
    batch_size: usize,
    buffer: Vec<Document>,
    stats: IndexStats,
}

impl<'a, I: SearchIndex + ?Sized> BatchIndexer<'a, I> {
    pub fn new(index: &'a I, collection: &str, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            index,
            collection: collection.to_string(),
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            stats: IndexStats::default(),
        }
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    pub async fn push(&mut self, doc: Document) {
        self.buffer.push(doc);
        if self.buffer.len() >= self.batch_size {
            self.flush().await;
        }
    }

    pub async fn extend<T: IntoIterator<Item = Document>>(&mut self, docs: T) {
        for doc in docs {
            self.push(doc).await;
        }
    }

    /// Import whatever is buffered.
    pub async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.buffer);
        self.stats.batches += 1;
        match self
            .index
            .import_documents(&self.collection, &batch, ImportAction::Upsert)
            .await
        {
            Ok(results) => {
                for (doc, result) in batch.iter().zip(&results) {
                    if result.success {
                        self.stats.imported += 1;
                    } else {
                        self.stats.rejected += 1;
                        warn!(
                            collection = %self.collection,
                            id = str_field(doc, "id"),
                            error = result.error.as_deref().unwrap_or("unknown"),
                            "document rejected"
                        );
                    }
                }
                debug!(
                    collection = %self.collection,
                    batch = self.stats.batches,
                    size = batch.len(),
                    "imported batch"
                );
            }
            Err(e) => {
                self.stats.failed_batches += 1;
                self.stats.rejected += batch.len() as u64;
                error!(collection = %self.collection, size = batch.len(), error = %e, "batch import failed");
            }
        }
    }

    /// Flush the remainder and return the totals.
    pub async fn finish(mut self) -> IndexStats {
        self.flush().await;
        self.stats
    }
}
