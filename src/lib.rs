//! Seldon - self-improving learning loop for a coding-assistant CLI
//!
//! Every task attempt lands in an append-only execution ledger. Reflection
//! mines the ledger for recurring failure signatures and success strategies,
//! surfacing them as reviewable candidate patterns. Applying approved
//! patterns commits a new immutable prompt version with full lineage back to
//! the root, and statistics over the ledger close the feedback loop.
//!
//! # Example
//!
//! ```ignore
//! use seldon::ledger::{ExecutionLedger, Outcome};
//!
//! let mut ledger = ExecutionLedger::new()?;
//! let record = ledger.append("fix the build", 1, Outcome::Success, "")?;
//! println!("recorded #{}", record.id);
//! ```

// Core modules (order matters for cross-module dependencies)
pub mod error;
pub mod config;
pub mod ledger;
pub mod terms;
pub mod patterns;
pub mod prompt;
pub mod stats;
pub mod assistant;
pub mod cli;

// Re-export commonly used types for convenience
pub use config::Config;
pub use error::SeldonError;
pub use ledger::{ExecutionLedger, ExecutionRecord, Outcome};
pub use patterns::{Pattern, PatternExtractor, PatternKind, PatternStatus, PatternStore};
pub use prompt::{PromptEvolution, PromptVersion};
pub use stats::{StatsAggregator, StatsReport, StatsWindow};
pub use terms::{TermEntry, TerminologyDictionary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
