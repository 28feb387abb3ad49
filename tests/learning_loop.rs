//! End-to-end learning loop over an isolated data directory:
//! execute three tasks, reflect, apply the extracted pattern, check stats.

use std::collections::BTreeMap;

use seldon::assistant::{Assistant, ScriptedAssistant};
use seldon::config::ExtractionConfig;
use seldon::ledger::{ExecutionLedger, Outcome};
use seldon::patterns::{PatternExtractor, PatternKind, PatternStatus, PatternStore};
use seldon::prompt::PromptEvolution;
use seldon::stats::{StatsAggregator, StatsWindow};
use seldon::terms::TerminologyDictionary;
use tempfile::TempDir;

fn failure(sig: &str) -> Outcome {
    Outcome::Failure {
        error_signature: sig.to_string(),
    }
}

#[tokio::test]
async fn full_loop_from_execution_to_evolved_prompt() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().to_path_buf();

    let mut ledger = ExecutionLedger::with_dir(base.clone()).unwrap();
    let patterns = PatternStore::with_dir(base.clone()).unwrap();
    let evolution = PromptEvolution::with_dir(base.clone()).unwrap();
    let root = evolution.init().unwrap();

    // Three executions: two identical failures, one success
    let assistant = ScriptedAssistant::from_outcomes(vec![
        failure("timeout"),
        failure("timeout"),
        Outcome::Success,
    ]);
    for task in ["add retry", "add retry again", "add logging"] {
        let result = assistant.run(&root.text, task).await.unwrap();
        ledger
            .append(task, root.version_id, result.outcome, &result.raw_output)
            .unwrap();
    }

    // Reflect with minimum support 2
    let config = ExtractionConfig {
        min_support: 2,
        ..Default::default()
    };
    let extractor = PatternExtractor::new(config, BTreeMap::new());
    let slice = ledger.read_since(patterns.checkpoint().unwrap()).unwrap();
    let extracted = extractor.extract(&slice);
    let stored = patterns.absorb(extracted, 3).unwrap();

    assert_eq!(stored.len(), 1);
    let candidate = &stored[0];
    assert_eq!(candidate.kind, PatternKind::Failure);
    assert_eq!(candidate.signature, "timeout");
    assert_eq!(candidate.occurrence_count, 2);
    assert!((candidate.confidence - 2.0 / 3.0).abs() < 1e-9);

    // Apply the pattern: new version, parent links, pattern marked applied
    let draft = evolution
        .propose(std::slice::from_ref(candidate), false)
        .unwrap();
    let version = evolution.commit(draft).unwrap();
    patterns.mark_applied(&version.applied_patterns).unwrap();

    assert_eq!(version.parent_version_id, Some(root.version_id));
    assert!(version.applied_patterns.contains(&candidate.id));
    assert_eq!(evolution.current_id().unwrap(), version.version_id);
    assert_eq!(
        patterns.get(candidate.id).unwrap().unwrap().status,
        PatternStatus::Applied
    );

    // Subsequent executions bind to the new version
    let next = ledger
        .append("next task", evolution.current_id().unwrap(), Outcome::Success, "")
        .unwrap();
    assert_eq!(next.prompt_version, version.version_id);

    // Stats over the original three records
    let records = ledger.read().unwrap();
    let report = StatsAggregator::report(&records[..3], &StatsWindow::all());
    assert_eq!(report.total, 3);
    assert!((report.success_rate - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(report.failures_by_signature, vec![("timeout".to_string(), 2)]);

    // The applied pattern's effectiveness covers only the post-apply run
    let applied = patterns.get(candidate.id).unwrap().unwrap();
    let effectiveness = StatsAggregator::pattern_effectiveness(
        &records,
        &applied,
        &evolution.versions().unwrap(),
    );
    assert_eq!(effectiveness.total, 1);
    assert_eq!(effectiveness.success_rate, 1.0);
}

#[test]
fn reflect_checkpoint_keeps_runs_disjoint() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().to_path_buf();

    let mut ledger = ExecutionLedger::with_dir(base.clone()).unwrap();
    let patterns = PatternStore::with_dir(base).unwrap();
    let extractor = PatternExtractor::new(ExtractionConfig::default(), BTreeMap::new());

    for _ in 0..2 {
        ledger.append("t", 1, failure("missing await"), "").unwrap();
    }
    let first_slice = ledger.read_since(patterns.checkpoint().unwrap()).unwrap();
    patterns
        .absorb(extractor.extract(&first_slice), 2)
        .unwrap();

    // No new records: the next reflect sees an empty slice
    let second_slice = ledger.read_since(patterns.checkpoint().unwrap()).unwrap();
    assert!(second_slice.is_empty());

    // More evidence accumulates into the same candidate
    for _ in 0..2 {
        ledger.append("t", 1, failure("missing await"), "").unwrap();
    }
    let third_slice = ledger.read_since(patterns.checkpoint().unwrap()).unwrap();
    let stored = patterns.absorb(extractor.extract(&third_slice), 4).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].occurrence_count, 4);
}

#[test]
fn dictionary_normalization_flows_into_extraction() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().to_path_buf();

    let mut ledger = ExecutionLedger::with_dir(base.clone()).unwrap();
    let dictionary = TerminologyDictionary::with_dir(base).unwrap();
    dictionary
        .record("the flaky thing", "integration test suite", None)
        .unwrap();

    ledger
        .append("run tests", 1, failure("the flaky thing timed out"), "")
        .unwrap();
    ledger
        .append("run tests", 1, failure("integration test suite timed out"), "")
        .unwrap();

    let terms = dictionary
        .current_entries()
        .unwrap()
        .into_iter()
        .map(|e| (e.term, e.canonical_meaning))
        .collect();
    let extractor = PatternExtractor::new(ExtractionConfig::default(), terms);
    let extracted = extractor.extract(&ledger.read().unwrap());

    assert_eq!(extracted.len(), 1);
    assert_eq!(extracted[0].signature, "integration test suite timed out");
    assert_eq!(extracted[0].occurrence_count, 2);
}
