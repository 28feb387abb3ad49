//! Pattern persistence and lifecycle
//!
//! Stores extracted patterns alongside the reflect checkpoint (the highest
//! ledger id already mined). Patterns move through status transitions only;
//! nothing here is ever physically deleted, a rejected pattern stays on
//! disk with its reason for audit.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info};

use super::extractor::ExtractedPattern;
use crate::error::SeldonError;

/// What a pattern describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Recurring error signature
    Failure,
    /// Recurring successful task strategy
    Success,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternKind::Failure => write!(f, "failure"),
            PatternKind::Success => write!(f, "success"),
        }
    }
}

/// Review status of a pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PatternStatus {
    Candidate,
    Applied,
    Rejected { reason: String },
}

impl std::fmt::Display for PatternStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternStatus::Candidate => write!(f, "candidate"),
            PatternStatus::Applied => write!(f, "applied"),
            PatternStatus::Rejected { .. } => write!(f, "rejected"),
        }
    }
}

/// A mined pattern with its supporting evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: u64,
    pub kind: PatternKind,
    /// Normalized fingerprint of the error or strategy
    pub signature: String,
    pub occurrence_count: usize,
    /// Non-owning references into the ledger; never edited after extraction
    pub supporting_record_ids: BTreeSet<u64>,
    /// occurrence_count over the records the pattern has been mined from:
    /// the extraction slice for a fresh pattern, everything reflected so
    /// far once evidence from several slices has folded together
    pub confidence: f64,
    pub status: PatternStatus,
    pub extracted_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PatternFile {
    /// Highest ledger id covered by a reflect so far
    last_reflected_id: u64,
    patterns: Vec<Pattern>,
}

/// Persistent pattern store
pub struct PatternStore {
    path: PathBuf,
}

impl PatternStore {
    /// Open the store at the default location
    pub fn new() -> Result<Self> {
        let base_dir = crate::config::data_dir()?;
        Self::with_dir(base_dir)
    }

    /// Open the store under a custom base directory
    pub fn with_dir(base_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_dir)
            .context("Failed to create pattern directory")?;
        Ok(Self {
            path: base_dir.join("patterns.json"),
        })
    }

    /// Highest ledger id already mined by `reflect`
    pub fn checkpoint(&self) -> Result<u64> {
        Ok(self.load()?.last_reflected_id)
    }

    /// Persist extraction results and advance the checkpoint.
    ///
    /// A fresh extraction that re-derives a signature still sitting as a
    /// candidate folds into the existing row (union of supporting ids)
    /// instead of duplicating it. Applied and rejected rows are left alone;
    /// a rejected signature may legitimately resurface as a new candidate.
    pub fn absorb(
        &self,
        extracted: Vec<ExtractedPattern>,
        reflected_through: u64,
    ) -> Result<Vec<Pattern>> {
        let mut file = self.load()?;
        let mut next_id = file.patterns.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        let mut touched = Vec::new();
        // Ledger ids are dense from 1, so the new checkpoint doubles as the
        // count of records covered once slices fold together.
        let total_reflected = reflected_through.max(file.last_reflected_id).max(1);

        for candidate in extracted {
            let existing = file.patterns.iter_mut().find(|p| {
                p.kind == candidate.kind
                    && p.signature == candidate.signature
                    && p.status == PatternStatus::Candidate
            });

            match existing {
                Some(pattern) => {
                    pattern
                        .supporting_record_ids
                        .extend(candidate.supporting_record_ids.iter().copied());
                    pattern.occurrence_count = pattern.supporting_record_ids.len();
                    // The union now spans more than one slice; the incoming
                    // slice-local ratio would overstate it.
                    pattern.confidence =
                        pattern.occurrence_count as f64 / total_reflected as f64;
                    debug!(
                        "Folded re-derived signature '{}' into pattern {}",
                        pattern.signature, pattern.id
                    );
                    touched.push(pattern.clone());
                }
                None => {
                    let pattern = Pattern {
                        id: next_id,
                        kind: candidate.kind,
                        signature: candidate.signature,
                        occurrence_count: candidate.occurrence_count,
                        supporting_record_ids: candidate.supporting_record_ids,
                        confidence: candidate.confidence,
                        status: PatternStatus::Candidate,
                        extracted_at: Utc::now(),
                    };
                    next_id += 1;
                    touched.push(pattern.clone());
                    file.patterns.push(pattern);
                }
            }
        }

        if reflected_through > file.last_reflected_id {
            file.last_reflected_id = reflected_through;
        }
        self.write(&file)?;

        info!(
            "Absorbed {} patterns, checkpoint now {}",
            touched.len(),
            file.last_reflected_id
        );
        Ok(touched)
    }

    /// Candidates ordered by confidence descending (signature breaks ties)
    pub fn candidates(&self) -> Result<Vec<Pattern>> {
        let mut candidates: Vec<Pattern> = self
            .load()?
            .patterns
            .into_iter()
            .filter(|p| p.status == PatternStatus::Candidate)
            .collect();
        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.signature.cmp(&b.signature))
        });
        Ok(candidates)
    }

    /// All patterns regardless of status
    pub fn all(&self) -> Result<Vec<Pattern>> {
        Ok(self.load()?.patterns)
    }

    /// Look up one pattern by id
    pub fn get(&self, id: u64) -> Result<Option<Pattern>> {
        Ok(self.load()?.patterns.into_iter().find(|p| p.id == id))
    }

    /// Mark patterns as applied to a committed prompt version
    pub fn mark_applied(&self, ids: &BTreeSet<u64>) -> Result<()> {
        self.transition(ids, |_| PatternStatus::Applied)
    }

    /// Mark patterns as rejected, keeping the reason for audit
    pub fn mark_rejected(&self, ids: &BTreeSet<u64>, reason: &str) -> Result<()> {
        self.transition(ids, |_| PatternStatus::Rejected {
            reason: reason.to_string(),
        })
    }

    fn transition(
        &self,
        ids: &BTreeSet<u64>,
        next: impl Fn(&Pattern) -> PatternStatus,
    ) -> Result<()> {
        let mut file = self.load()?;
        for &id in ids {
            let pattern = file
                .patterns
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or(SeldonError::not_found("pattern", id))?;
            let status = next(pattern);
            debug!("Pattern {} -> {}", id, status);
            pattern.status = status;
        }
        self.write(&file)
    }

    fn load(&self) -> Result<PatternFile> {
        if !self.path.exists() {
            return Ok(PatternFile::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    fn write(&self, file: &PatternFile) -> Result<()> {
        let json = serde_json::to_string_pretty(file)
            .context("Failed to serialize pattern store")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
