//! Prompt Evolution - version-controlled instruction text
//!
//! The prompt chain is append-only: committed versions are immutable and
//! kept forever, and "current" is a pointer file next to the chain rather
//! than a flag on any version. A draft is assembled from approved patterns
//! against the current version; commit re-checks the pointer right before
//! swapping it, so a racing commit is caught as `StaleParent` instead of
//! silently forking history.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::SeldonError;
use crate::patterns::{Pattern, PatternKind};

/// Seed text for version 1
pub const ROOT_PROMPT: &str = "\
You are a careful coding assistant. Complete the task exactly as asked, \
run whatever verification is available, and report honestly when something \
does not work.";

/// One immutable snapshot of the instruction text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptVersion {
    /// Monotonic version id; the root is 1
    pub version_id: u64,
    pub text: String,
    /// None only for the root
    pub parent_version_id: Option<u64>,
    /// Patterns whose application produced this version
    pub applied_patterns: BTreeSet<u64>,
    pub created_at: DateTime<Utc>,
}

/// A candidate version not yet committed
#[derive(Debug, Clone)]
pub struct Draft {
    pub parent_version_id: u64,
    pub text: String,
    pub applied_patterns: BTreeSet<u64>,
}

/// Versioned prompt store with a compare-and-swap current pointer
pub struct PromptEvolution {
    versions_path: PathBuf,
    current_path: PathBuf,
}

impl PromptEvolution {
    /// Open the prompt chain at the default location
    pub fn new() -> Result<Self> {
        let base_dir = crate::config::data_dir()?;
        Self::with_dir(base_dir)
    }

    /// Open the prompt chain under a custom base directory
    pub fn with_dir(base_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_dir)
            .context("Failed to create prompt directory")?;
        Ok(Self {
            versions_path: base_dir.join("prompt_versions.json"),
            current_path: base_dir.join("prompt_current"),
        })
    }

    /// Seed the chain with the root version if it does not exist yet
    pub fn init(&self) -> Result<PromptVersion> {
        if let Some(current) = self.try_current()? {
            return Ok(current);
        }

        let root = PromptVersion {
            version_id: 1,
            text: ROOT_PROMPT.to_string(),
            parent_version_id: None,
            applied_patterns: BTreeSet::new(),
            created_at: Utc::now(),
        };
        self.write_versions(&[root.clone()])?;
        self.write_pointer(root.version_id)?;
        info!("Initialized prompt chain at version 1");
        Ok(root)
    }

    /// Current version id
    pub fn current_id(&self) -> Result<u64> {
        let raw = std::fs::read_to_string(&self.current_path)
            .with_context(|| format!("Failed to read {}", self.current_path.display()))?;
        raw.trim()
            .parse()
            .with_context(|| format!("Invalid current-version pointer: {raw:?}"))
    }

    /// The version the pointer resolves to
    pub fn current(&self) -> Result<PromptVersion> {
        let id = self.current_id()?;
        self.get(id)?
            .ok_or_else(|| SeldonError::not_found("prompt version", id).into())
    }

    fn try_current(&self) -> Result<Option<PromptVersion>> {
        if !self.current_path.exists() {
            return Ok(None);
        }
        self.current().map(Some)
    }

    /// Look up one committed version by id
    pub fn get(&self, version_id: u64) -> Result<Option<PromptVersion>> {
        Ok(self
            .load_versions()?
            .into_iter()
            .find(|v| v.version_id == version_id))
    }

    /// All committed versions, oldest first
    pub fn versions(&self) -> Result<Vec<PromptVersion>> {
        let mut versions = self.load_versions()?;
        versions.sort_by_key(|v| v.version_id);
        Ok(versions)
    }

    /// Assemble a draft from approved patterns against the current version.
    ///
    /// An empty selection is refused unless the caller explicitly asks for a
    /// no-op evolution (a version with the parent's text and no new rules).
    pub fn propose(&self, approved: &[Pattern], allow_empty: bool) -> Result<Draft> {
        if approved.is_empty() && !allow_empty {
            return Err(SeldonError::NoPatternsSelected.into());
        }

        let parent = self.current()?;
        let mut text = parent.text.clone();
        for pattern in approved {
            text.push('\n');
            text.push_str(&rule_line(pattern));
        }

        debug!(
            "Drafted evolution of version {} with {} patterns",
            parent.version_id,
            approved.len()
        );
        Ok(Draft {
            parent_version_id: parent.version_id,
            text,
            applied_patterns: approved.iter().map(|p| p.id).collect(),
        })
    }

    /// Commit a draft: append the new version and advance the pointer.
    ///
    /// The pointer is re-read immediately before the swap; if it no longer
    /// matches the draft's parent, nothing is written and the caller must
    /// re-derive the draft against the new current version. The re-read and
    /// the two renames below are not one atomic step: a second writer
    /// landing in that window would win the pointer. The tool assumes a
    /// single operator per data directory, so nothing else moves the
    /// pointer between the check and the swap.
    pub fn commit(&self, draft: Draft) -> Result<PromptVersion> {
        let found = self.current_id()?;
        if found != draft.parent_version_id {
            return Err(SeldonError::StaleParent {
                expected: draft.parent_version_id,
                found,
            }
            .into());
        }

        let mut versions = self.load_versions()?;
        let version_id = versions.iter().map(|v| v.version_id).max().unwrap_or(0) + 1;
        let version = PromptVersion {
            version_id,
            text: draft.text,
            parent_version_id: Some(draft.parent_version_id),
            applied_patterns: draft.applied_patterns,
            created_at: Utc::now(),
        };
        versions.push(version.clone());

        // Chain first, pointer second: a crash in between leaves an extra
        // committed-but-never-current version, never a dangling pointer.
        self.write_versions(&versions)?;
        self.write_pointer(version_id)?;

        info!(
            "Committed prompt version {} (parent {}, {} patterns applied)",
            version_id,
            draft.parent_version_id,
            version.applied_patterns.len()
        );
        Ok(version)
    }

    /// Ordered chain from the root to `version_id`
    pub fn lineage(&self, version_id: u64) -> Result<Vec<PromptVersion>> {
        let versions = self.load_versions()?;
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut cursor = Some(version_id);

        while let Some(id) = cursor {
            if !seen.insert(id) {
                anyhow::bail!("Cycle detected in prompt lineage at version {id}");
            }
            let version = versions
                .iter()
                .find(|v| v.version_id == id)
                .cloned()
                .ok_or(SeldonError::not_found("prompt version", id))?;
            cursor = version.parent_version_id;
            chain.push(version);
        }

        chain.reverse();
        Ok(chain)
    }

    fn load_versions(&self) -> Result<Vec<PromptVersion>> {
        if !self.versions_path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.versions_path)
            .with_context(|| format!("Failed to read {}", self.versions_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.versions_path.display()))
    }

    fn write_versions(&self, versions: &[PromptVersion]) -> Result<()> {
        let json = serde_json::to_string_pretty(versions)
            .context("Failed to serialize prompt versions")?;
        let tmp = self.versions_path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.versions_path)
            .with_context(|| format!("Failed to replace {}", self.versions_path.display()))?;
        Ok(())
    }

    fn write_pointer(&self, version_id: u64) -> Result<()> {
        let tmp = self.current_path.with_extension("tmp");
        std::fs::write(&tmp, version_id.to_string())
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.current_path)
            .with_context(|| format!("Failed to replace {}", self.current_path.display()))?;
        Ok(())
    }
}

/// Render one applied pattern as a prompt rule
fn rule_line(pattern: &Pattern) -> String {
    match pattern.kind {
        PatternKind::Failure => format!(
            "- Guard against a recurring failure: {} (observed {} times).",
            pattern.signature, pattern.occurrence_count
        ),
        PatternKind::Success => format!(
            "- Keep using the approach that worked for: {} (observed {} times).",
            pattern.signature, pattern.occurrence_count
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::PatternStatus;
    use tempfile::TempDir;

    fn pattern(id: u64, signature: &str) -> Pattern {
        Pattern {
            id,
            kind: PatternKind::Failure,
            signature: signature.to_string(),
            occurrence_count: 2,
            supporting_record_ids: [1, 2].into_iter().collect(),
            confidence: 0.5,
            status: PatternStatus::Candidate,
            extracted_at: Utc::now(),
        }
    }

    fn open(dir: &TempDir) -> PromptEvolution {
        let evolution = PromptEvolution::with_dir(dir.path().to_path_buf()).unwrap();
        evolution.init().unwrap();
        evolution
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let evolution = open(&dir);
        let again = evolution.init().unwrap();
        assert_eq!(again.version_id, 1);
        assert_eq!(evolution.versions().unwrap().len(), 1);
    }

    #[test]
    fn test_commit_advances_pointer_and_links_parent() {
        let dir = TempDir::new().unwrap();
        let evolution = open(&dir);

        let draft = evolution.propose(&[pattern(1, "timeout")], false).unwrap();
        let committed = evolution.commit(draft).unwrap();

        assert_eq!(committed.version_id, 2);
        assert_eq!(committed.parent_version_id, Some(1));
        assert!(committed.applied_patterns.contains(&1));
        assert!(committed.text.contains("timeout"));
        assert_eq!(evolution.current_id().unwrap(), 2);
    }

    #[test]
    fn test_empty_selection_is_refused() {
        let dir = TempDir::new().unwrap();
        let evolution = open(&dir);
        let err = evolution.propose(&[], false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SeldonError>(),
            Some(SeldonError::NoPatternsSelected)
        ));
    }

    #[test]
    fn test_noop_evolution_when_requested() {
        let dir = TempDir::new().unwrap();
        let evolution = open(&dir);
        let draft = evolution.propose(&[], true).unwrap();
        let committed = evolution.commit(draft).unwrap();
        assert_eq!(committed.text, ROOT_PROMPT);
        assert!(committed.applied_patterns.is_empty());
    }

    #[test]
    fn test_stale_parent_loses_the_race() {
        let dir = TempDir::new().unwrap();
        let evolution = open(&dir);

        let first = evolution.propose(&[pattern(1, "timeout")], false).unwrap();
        let second = evolution.propose(&[pattern(2, "null deref")], false).unwrap();

        evolution.commit(first).unwrap();
        let err = evolution.commit(second).unwrap_err();
        match err.downcast_ref::<SeldonError>() {
            Some(SeldonError::StaleParent { expected, found }) => {
                assert_eq!(*expected, 1);
                assert_eq!(*found, 2);
            }
            other => panic!("expected StaleParent, got {:?}", other),
        }

        // Exactly one commit landed
        assert_eq!(evolution.versions().unwrap().len(), 2);
        assert_eq!(evolution.current_id().unwrap(), 2);
    }

    #[test]
    fn test_lineage_reaches_root_in_order() {
        let dir = TempDir::new().unwrap();
        let evolution = open(&dir);

        for i in 0..3 {
            let draft = evolution
                .propose(&[pattern(i + 1, &format!("failure {i}"))], false)
                .unwrap();
            evolution.commit(draft).unwrap();
        }

        let chain = evolution.lineage(evolution.current_id().unwrap()).unwrap();
        assert_eq!(
            chain.iter().map(|v| v.version_id).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert_eq!(chain[0].parent_version_id, None);
    }

    #[test]
    fn test_lineage_of_unknown_version_is_not_found() {
        let dir = TempDir::new().unwrap();
        let evolution = open(&dir);
        let err = evolution.lineage(99).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SeldonError>(),
            Some(SeldonError::NotFound { .. })
        ));
    }
}
