//! Pattern Extractor - deterministic mining of ledger slices
//!
//! Normalizes noisy error text (jargon canonicalized through the
//! terminology dictionary, volatile tokens masked), groups records by the
//! resulting signature, merges near-duplicate signatures by edit distance,
//! and emits candidates above the minimum-support threshold. Pure: the same
//! slice and dictionary snapshot always yield the same pattern set, and
//! neither the ledger nor the dictionary is touched.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use super::store::PatternKind;
use crate::config::ExtractionConfig;
use crate::ledger::ExecutionRecord;

static HEX_ADDR: Lazy<Regex> = Lazy::new(|| Regex::new(r"0x[0-9a-fA-F]+").unwrap());
static PATH_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:/[\w.\-]+){2,}").unwrap());
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+\b").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Longest signature kept after normalization
const MAX_SIGNATURE_LEN: usize = 120;

/// A candidate pattern before it is persisted
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPattern {
    pub kind: PatternKind,
    pub signature: String,
    pub occurrence_count: usize,
    pub supporting_record_ids: BTreeSet<u64>,
    pub confidence: f64,
}

/// Deterministic extractor over a slice of execution records
pub struct PatternExtractor {
    config: ExtractionConfig,
    /// Snapshot of term -> canonical meaning, taken once at construction
    terms: BTreeMap<String, String>,
}

impl PatternExtractor {
    pub fn new(config: ExtractionConfig, terms: BTreeMap<String, String>) -> Self {
        Self { config, terms }
    }

    /// Mine a slice of records for recurring failure signatures and
    /// success strategies.
    pub fn extract(&self, records: &[ExecutionRecord]) -> Vec<ExtractedPattern> {
        let total = records.len();
        if total == 0 {
            return Vec::new();
        }

        let mut failures: BTreeMap<String, BTreeSet<u64>> = BTreeMap::new();
        let mut successes: BTreeMap<String, BTreeSet<u64>> = BTreeMap::new();

        for record in records {
            match &record.outcome {
                crate::ledger::Outcome::Failure { error_signature } => {
                    let normalized = self.normalize(error_signature);
                    if normalized.is_empty() {
                        // One unusable record never blocks the run
                        warn!("Skipping record {}: empty failure signature", record.id);
                        continue;
                    }
                    failures.entry(normalized).or_default().insert(record.id);
                }
                crate::ledger::Outcome::Success => {
                    let normalized = self.normalize(&record.task);
                    if normalized.is_empty() {
                        warn!("Skipping record {}: empty task text", record.id);
                        continue;
                    }
                    successes.entry(normalized).or_default().insert(record.id);
                }
                crate::ledger::Outcome::Partial => {}
            }
        }

        let mut patterns = Vec::new();
        patterns.extend(self.finish_groups(PatternKind::Failure, failures, total));
        patterns.extend(self.finish_groups(PatternKind::Success, successes, total));

        // Stable presentation order: confidence desc, then signature
        patterns.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.signature.cmp(&b.signature))
        });
        patterns
    }

    /// Canonicalize user jargon, mask volatile tokens, collapse whitespace.
    pub fn normalize(&self, text: &str) -> String {
        let mut out = text.to_lowercase();

        // Longest terms first so "build pipeline" wins over "pipeline"
        let mut terms: Vec<(&String, &String)> = self.terms.iter().collect();
        terms.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
        for (term, meaning) in terms {
            if out.contains(term.as_str()) {
                out = out.replace(term.as_str(), meaning);
            }
        }

        out = HEX_ADDR.replace_all(&out, "<addr>").into_owned();
        out = PATH_LIKE.replace_all(&out, "<path>").into_owned();
        out = NUMBER.replace_all(&out, "<n>").into_owned();
        out = WHITESPACE.replace_all(&out, " ").trim().to_string();

        if out.len() > MAX_SIGNATURE_LEN {
            let mut end = MAX_SIGNATURE_LEN;
            while !out.is_char_boundary(end) {
                end -= 1;
            }
            out.truncate(end);
            out = out.trim_end().to_string();
        }
        out
    }

    /// Merge near-duplicates, apply minimum support, compute confidence.
    fn finish_groups(
        &self,
        kind: PatternKind,
        groups: BTreeMap<String, BTreeSet<u64>>,
        total: usize,
    ) -> Vec<ExtractedPattern> {
        // Larger groups absorb smaller ones; ties break on signature so the
        // merge never depends on map iteration order.
        let mut ordered: Vec<(String, BTreeSet<u64>)> = groups.into_iter().collect();
        ordered.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));

        let mut kept: Vec<(String, BTreeSet<u64>)> = Vec::new();
        for (signature, ids) in ordered {
            match kept
                .iter_mut()
                .find(|(s, _)| levenshtein(s, &signature) < self.config.merge_distance)
            {
                Some((_, merged)) => merged.extend(ids),
                None => kept.push((signature, ids)),
            }
        }

        kept.into_iter()
            .filter(|(_, ids)| ids.len() >= self.config.min_support)
            .map(|(signature, ids)| ExtractedPattern {
                kind,
                occurrence_count: ids.len(),
                confidence: ids.len() as f64 / total as f64,
                signature,
                supporting_record_ids: ids,
            })
            .collect()
    }
}

/// Classic edit distance over characters
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Outcome;
    use chrono::Utc;

    fn record(id: u64, task: &str, outcome: Outcome) -> ExecutionRecord {
        ExecutionRecord {
            id,
            timestamp: Utc::now(),
            task: task.to_string(),
            prompt_version: 1,
            outcome,
            raw_output_excerpt: String::new(),
        }
    }

    fn failure(id: u64, sig: &str) -> ExecutionRecord {
        record(
            id,
            "some task",
            Outcome::Failure {
                error_signature: sig.to_string(),
            },
        )
    }

    fn extractor() -> PatternExtractor {
        PatternExtractor::new(ExtractionConfig::default(), BTreeMap::new())
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_spec_scenario_two_timeouts_one_success() {
        let records = vec![
            failure(1, "timeout"),
            failure(2, "timeout"),
            record(3, "unique task", Outcome::Success),
        ];

        let patterns = extractor().extract(&records);
        let timeouts: Vec<_> = patterns
            .iter()
            .filter(|p| p.kind == PatternKind::Failure)
            .collect();
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].signature, "timeout");
        assert_eq!(timeouts[0].occurrence_count, 2);
        assert!((timeouts[0].confidence - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(
            timeouts[0].supporting_record_ids.iter().copied().collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let records = vec![
            failure(1, "connection refused on port 8080"),
            failure(2, "connection refused on port 9090"),
            failure(3, "null pointer in handler"),
            failure(4, "null pointer in handler"),
            record(5, "add logging", Outcome::Success),
        ];

        let ex = extractor();
        let first = ex.extract(&records);
        let second = ex.extract(&records);
        assert_eq!(first, second);
    }

    #[test]
    fn test_number_masking_groups_variants() {
        let records = vec![
            failure(1, "timeout after 30 seconds"),
            failure(2, "timeout after 60 seconds"),
        ];
        let patterns = extractor().extract(&records);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].signature, "timeout after <n> seconds");
        assert_eq!(patterns[0].occurrence_count, 2);
    }

    #[test]
    fn test_near_duplicates_merge_into_larger_group() {
        let records = vec![
            failure(1, "missing await"),
            failure(2, "missing await"),
            failure(3, "missing awaits"),
        ];
        let patterns = extractor().extract(&records);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].signature, "missing await");
        assert_eq!(patterns[0].occurrence_count, 3);
    }

    #[test]
    fn test_min_support_filters_singletons() {
        let records = vec![
            failure(1, "completely unique problem"),
            failure(2, "an unrelated situation"),
        ];
        assert!(extractor().extract(&records).is_empty());
    }

    #[test]
    fn test_dictionary_canonicalization_defragments() {
        let mut terms = BTreeMap::new();
        terms.insert("the widget".to_string(), "billing service".to_string());
        let ex = PatternExtractor::new(ExtractionConfig::default(), terms);

        let records = vec![
            failure(1, "the widget returned an error"),
            failure(2, "billing service returned an error"),
        ];
        let patterns = ex.extract(&records);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].signature, "billing service returned an error");
    }

    #[test]
    fn test_empty_slice_yields_nothing() {
        assert!(extractor().extract(&[]).is_empty());
    }

    #[test]
    fn test_success_strategies_grouped_by_task() {
        let records = vec![
            record(1, "Refactor module imports", Outcome::Success),
            record(2, "refactor module imports", Outcome::Success),
            record(3, "anything else", Outcome::Partial),
        ];
        let patterns = extractor().extract(&records);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].kind, PatternKind::Success);
        assert_eq!(patterns[0].signature, "refactor module imports");
    }
}
