//! Terminology Dictionary - per-user vocabulary with preserved history
//!
//! Maps user jargon to canonical meanings. Recording a term again never
//! overwrites the old meaning; lookup returns the most recent entry and the
//! older ones stay on disk as provenance.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// One recorded meaning for a term
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermEntry {
    pub term: String,
    pub canonical_meaning: String,
    /// Ledger record that first surfaced this meaning, if any
    pub first_seen_record_id: Option<u64>,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only dictionary of user-specific terminology
pub struct TerminologyDictionary {
    path: PathBuf,
}

impl TerminologyDictionary {
    /// Open the dictionary at the default location
    pub fn new() -> Result<Self> {
        let base_dir = crate::config::data_dir()?;
        Self::with_dir(base_dir)
    }

    /// Open the dictionary under a custom base directory
    pub fn with_dir(base_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_dir)
            .context("Failed to create dictionary directory")?;
        Ok(Self {
            path: base_dir.join("terms.json"),
        })
    }

    /// Append a new meaning for a term. Prior meanings are kept.
    pub fn record(
        &self,
        term: &str,
        meaning: &str,
        source_record_id: Option<u64>,
    ) -> Result<TermEntry> {
        let entry = TermEntry {
            term: term.to_lowercase(),
            canonical_meaning: meaning.to_string(),
            first_seen_record_id: source_record_id,
            recorded_at: Utc::now(),
        };

        let mut entries = self.load()?;
        entries.push(entry.clone());
        self.write(&entries)?;

        info!("Recorded term '{}' -> '{}'", entry.term, meaning);
        Ok(entry)
    }

    /// Most recent canonical meaning for a term, if any
    pub fn lookup(&self, term: &str) -> Result<Option<String>> {
        let needle = term.to_lowercase();
        let entries = self.load()?;
        Ok(entries
            .into_iter()
            .rev()
            .find(|e| e.term == needle)
            .map(|e| e.canonical_meaning))
    }

    /// Every recorded meaning for a term, oldest first
    pub fn history(&self, term: &str) -> Result<Vec<TermEntry>> {
        let needle = term.to_lowercase();
        let entries = self.load()?;
        Ok(entries.into_iter().filter(|e| e.term == needle).collect())
    }

    /// All entries, oldest first
    pub fn entries(&self) -> Result<Vec<TermEntry>> {
        self.load()
    }

    /// Current meaning per term (latest entry wins), sorted by term
    pub fn current_entries(&self) -> Result<Vec<TermEntry>> {
        let mut latest: std::collections::BTreeMap<String, TermEntry> =
            std::collections::BTreeMap::new();
        for entry in self.load()? {
            latest.insert(entry.term.clone(), entry);
        }
        Ok(latest.into_values().collect())
    }

    fn load(&self) -> Result<Vec<TermEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    fn write(&self, entries: &[TermEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)
            .context("Failed to serialize term entries")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lookup_returns_latest_meaning() {
        let dir = TempDir::new().unwrap();
        let dict = TerminologyDictionary::with_dir(dir.path().to_path_buf()).unwrap();

        dict.record("the pipeline", "ci workflow", None).unwrap();
        dict.record("the pipeline", "deploy workflow", Some(7)).unwrap();

        assert_eq!(
            dict.lookup("the pipeline").unwrap().as_deref(),
            Some("deploy workflow")
        );
        assert_eq!(dict.history("the pipeline").unwrap().len(), 2);
    }

    #[test]
    fn test_entries_returns_full_log_in_order() {
        let dir = TempDir::new().unwrap();
        let dict = TerminologyDictionary::with_dir(dir.path().to_path_buf()).unwrap();

        dict.record("the pipeline", "ci workflow", None).unwrap();
        dict.record("api", "the billing api", None).unwrap();
        dict.record("the pipeline", "deploy workflow", Some(7)).unwrap();

        let entries = dict.entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].canonical_meaning, "ci workflow");
        assert_eq!(entries[2].canonical_meaning, "deploy workflow");
        // latest-wins view collapses to one row per term
        assert_eq!(dict.current_entries().unwrap().len(), 2);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let dict = TerminologyDictionary::with_dir(dir.path().to_path_buf()).unwrap();
        dict.record("API", "the billing api", None).unwrap();
        assert!(dict.lookup("api").unwrap().is_some());
    }

    #[test]
    fn test_missing_term_is_none() {
        let dir = TempDir::new().unwrap();
        let dict = TerminologyDictionary::with_dir(dir.path().to_path_buf()).unwrap();
        assert!(dict.lookup("nonexistent").unwrap().is_none());
    }
}
