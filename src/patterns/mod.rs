//! Pattern mining over the execution ledger
//!
//! Derives recurring failure signatures and success strategies from ledger
//! slices, persists them as reviewable candidates, and tracks their status
//! through the evolution workflow. Patterns are derived artifacts: the
//! ledger stays the source of truth and an extraction can always be rerun.

pub mod extractor;
pub mod store;

pub use extractor::{ExtractedPattern, PatternExtractor};
pub use store::{Pattern, PatternKind, PatternStatus, PatternStore};
