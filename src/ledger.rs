//! Execution Ledger - append-only store of task execution records
//!
//! One JSON line per record under the data directory. Records are immutable
//! once written; the only mutation the file ever sees is an appended line.
//! An append is durable (flushed and synced) before its id is returned.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::SeldonError;

/// Result of one task attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure { error_signature: String },
    Partial,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure { .. })
    }

    /// Error signature for failures, None otherwise
    pub fn signature(&self) -> Option<&str> {
        match self {
            Outcome::Failure { error_signature } => Some(error_signature),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure { error_signature } => write!(f, "failure ({})", error_signature),
            Outcome::Partial => write!(f, "partial"),
        }
    }
}

/// A single logged task attempt, immutable once appended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Monotonic unique id assigned by the ledger
    pub id: u64,
    /// When the attempt was recorded
    pub timestamp: DateTime<Utc>,
    /// What the operator asked for
    pub task: String,
    /// Prompt version the attempt ran under (reference, not a copy)
    pub prompt_version: u64,
    /// How the attempt ended
    pub outcome: Outcome,
    /// Truncated raw assistant output for later inspection
    pub raw_output_excerpt: String,
}

/// Append-only execution ledger backed by a JSONL file
pub struct ExecutionLedger {
    path: PathBuf,
    next_id: u64,
}

impl ExecutionLedger {
    /// Open the ledger at the default location
    pub fn new() -> Result<Self> {
        let base_dir = crate::config::data_dir()?;
        Self::with_dir(base_dir)
    }

    /// Open the ledger under a custom base directory
    pub fn with_dir(base_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_dir)
            .context("Failed to create ledger directory")?;
        let path = base_dir.join("ledger.jsonl");

        // Resume id allocation from whatever is already on disk. A partial
        // scan would risk reusing ids, so a bad line is fatal here too.
        let next_id = match read_all(&path)?.last() {
            Some(record) => record.id + 1,
            None => 1,
        };

        Ok(Self { path, next_id })
    }

    /// Append a record; returns it once the write is durable.
    ///
    /// The record only becomes observable after `sync_all` succeeds, so a
    /// crash mid-append leaves at worst a trailing partial line that the
    /// next read reports as `CorruptLedger` rather than silently dropping.
    pub fn append(
        &mut self,
        task: &str,
        prompt_version: u64,
        outcome: Outcome,
        raw_output_excerpt: &str,
    ) -> Result<ExecutionRecord> {
        let record = ExecutionRecord {
            id: self.next_id,
            timestamp: Utc::now(),
            task: task.to_string(),
            prompt_version,
            outcome,
            raw_output_excerpt: raw_output_excerpt.to_string(),
        };

        let mut line = serde_json::to_string(&record)
            .context("Failed to serialize execution record")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .context("Failed to append execution record")?;
        file.sync_all()
            .context("Failed to sync ledger after append")?;

        self.next_id += 1;
        info!("Appended execution record {} ({})", record.id, record.outcome);
        Ok(record)
    }

    /// All records, ordered by id ascending
    pub fn read(&self) -> Result<Vec<ExecutionRecord>> {
        read_all(&self.path)
    }

    /// Records with id strictly greater than `after_id`
    pub fn read_since(&self, after_id: u64) -> Result<Vec<ExecutionRecord>> {
        let records = self.read()?;
        Ok(records.into_iter().filter(|r| r.id > after_id).collect())
    }

    /// A restartable page of records for history views
    pub fn read_page(&self, offset: usize, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let records = self.read()?;
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    /// Look up one record by id; explicit absence, never an error
    pub fn get(&self, id: u64) -> Result<Option<ExecutionRecord>> {
        let records = self.read()?;
        Ok(records.into_iter().find(|r| r.id == id))
    }

    /// Number of records on disk
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Ledger file path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

fn read_all(path: &PathBuf) -> Result<Vec<ExecutionRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut records = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: ExecutionRecord =
            serde_json::from_str(line).map_err(|source| SeldonError::CorruptLedger {
                path: path.clone(),
                line: idx + 1,
                source,
            })?;
        records.push(record);
    }

    // Appends happen in id order, but sort anyway so read order is a
    // guarantee rather than a side effect.
    records.sort_by_key(|r| r.id);
    debug!("Read {} execution records from {}", records.len(), path.display());
    Ok(records)
}
