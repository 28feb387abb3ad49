//! Error taxonomy for the learning loop
//!
//! Typed errors that callers branch on; everything else propagates through
//! `anyhow` with context attached at the I/O boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Errors with meaning beyond "something failed".
#[derive(Debug, Error)]
pub enum SeldonError {
    /// Persisted ledger data could not be parsed. Fatal: ledger integrity
    /// is the system's core guarantee, so this is never silently recovered.
    #[error("corrupt ledger at {path} line {line}: {source}")]
    CorruptLedger {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// A commit raced another commit: the current-version pointer moved
    /// between draft creation and commit. Caller must re-derive the draft.
    #[error("stale parent: draft built on version {expected}, current is {found}")]
    StaleParent { expected: u64, found: u64 },

    /// `analyze --apply` was invoked with an empty pattern selection and
    /// no explicit no-op evolution requested.
    #[error("no patterns selected for application")]
    NoPatternsSelected,

    /// Lookup by id found nothing. An explicit absence, not a crash.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },
}

impl SeldonError {
    pub fn not_found(entity: &'static str, id: u64) -> Self {
        Self::NotFound { entity, id }
    }
}
