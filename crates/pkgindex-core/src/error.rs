//! Error taxonomy for index and pipeline operations.
//!
//! Network and data-quality problems are absorbed where they happen; only
//! [`PipelineError::Configuration`] is meant to stop a run before it starts.

use thiserror::Error;

/// Failure reported by a [`SearchIndex`](crate::index::SearchIndex) call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// Collection, alias or document does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The engine refused the request (schema violation, conflict, bad query).
    #[error("rejected: {0}")]
    Rejected(String),
    /// Could not talk to the engine at all.
    #[error("transport: {0}")]
    Transport(String),
}

impl IndexError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, IndexError::NotFound(_))
    }
}

/// Failure of a pipeline stage (runner, versioner).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Pre-flight failure: missing target collection, invalid profile.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Index(#[from] IndexError),
    /// New generation ended up with fewer documents than the old one.
    #[error("copy into '{target}' incomplete: {copied} of {expected} documents")]
    CopyIncomplete {
        target: String,
        copied: u64,
        expected: u64,
    },
}
