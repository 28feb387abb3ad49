//! Stats Aggregator - read-only reliability reporting over the ledger
//!
//! Everything here is a pure function of a ledger slice, recomputed on
//! every query. The ledger stays the source of truth; this module keeps no
//! state of its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::ledger::ExecutionRecord;
use crate::patterns::Pattern;
use crate::prompt::PromptVersion;

/// Which slice of the ledger a report covers. Empty filters mean all-time.
#[derive(Debug, Clone, Default)]
pub struct StatsWindow {
    /// Only executions under these prompt versions
    pub prompt_versions: Option<BTreeSet<u64>>,
    /// Only these record ids
    pub record_ids: Option<BTreeSet<u64>>,
    /// Only records at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Only records at or before this instant
    pub until: Option<DateTime<Utc>>,
}

impl StatsWindow {
    /// The unfiltered, all-time window
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to executions under one prompt version
    pub fn prompt_version(version: u64) -> Self {
        Self {
            prompt_versions: Some([version].into_iter().collect()),
            ..Self::default()
        }
    }

    fn contains(&self, record: &ExecutionRecord) -> bool {
        self.prompt_versions
            .as_ref()
            .map_or(true, |versions| versions.contains(&record.prompt_version))
            && self
                .record_ids
                .as_ref()
                .map_or(true, |ids| ids.contains(&record.id))
            && self.since.map_or(true, |t| record.timestamp >= t)
            && self.until.map_or(true, |t| record.timestamp <= t)
    }
}

/// Direction of the success-rate trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Flat,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendDirection::Improving => write!(f, "improving"),
            TrendDirection::Declining => write!(f, "declining"),
            TrendDirection::Flat => write!(f, "flat"),
        }
    }
}

/// Success rate of the most recent half of the window vs the previous half
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trend {
    pub recent_rate: f64,
    pub previous_rate: f64,
    pub direction: TrendDirection,
}

/// Aggregate reliability report over a requested window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsReport {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub partials: usize,
    /// successes / total; 0 when the window is empty
    pub success_rate: f64,
    /// Failure counts grouped by signature, most frequent first
    pub failures_by_signature: Vec<(String, usize)>,
    /// Present once the window holds at least two records
    pub trend: Option<Trend>,
}

/// Pure aggregation over ledger slices
pub struct StatsAggregator;

impl StatsAggregator {
    /// Report over a slice, restricted to the requested window
    pub fn report(records: &[ExecutionRecord], window: &StatsWindow) -> StatsReport {
        let window: Vec<&ExecutionRecord> =
            records.iter().filter(|r| window.contains(r)).collect();

        let total = window.len();
        let successes = window.iter().filter(|r| r.outcome.is_success()).count();
        let failures = window.iter().filter(|r| r.outcome.is_failure()).count();
        let partials = total - successes - failures;

        let mut by_signature: BTreeMap<String, usize> = BTreeMap::new();
        for record in &window {
            if let Some(signature) = record.outcome.signature() {
                *by_signature.entry(signature.to_string()).or_default() += 1;
            }
        }
        let mut failures_by_signature: Vec<(String, usize)> = by_signature.into_iter().collect();
        failures_by_signature.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        StatsReport {
            total,
            successes,
            failures,
            partials,
            success_rate: rate(successes, total),
            failures_by_signature,
            trend: Self::trend(&window),
        }
    }

    /// Effectiveness of one pattern.
    ///
    /// Once the pattern has been applied somewhere, the report covers the
    /// executions that ran under the prompt versions applying it, answering
    /// "did things improve after this rule landed". A pattern not yet
    /// applied to any version reports over its supporting evidence instead.
    pub fn pattern_effectiveness(
        records: &[ExecutionRecord],
        pattern: &Pattern,
        versions: &[PromptVersion],
    ) -> StatsReport {
        let applied_in: BTreeSet<u64> = versions
            .iter()
            .filter(|v| v.applied_patterns.contains(&pattern.id))
            .map(|v| v.version_id)
            .collect();

        let window = if applied_in.is_empty() {
            StatsWindow {
                record_ids: Some(pattern.supporting_record_ids.clone()),
                ..StatsWindow::default()
            }
        } else {
            StatsWindow {
                prompt_versions: Some(applied_in),
                ..StatsWindow::default()
            }
        };
        Self::report(records, &window)
    }

    /// Recent half vs previous half, by record count. The older half takes
    /// the extra record when the window is odd.
    fn trend(window: &[&ExecutionRecord]) -> Option<Trend> {
        if window.len() < 2 {
            return None;
        }
        let split = window.len() - window.len() / 2;
        let (previous, recent) = window.split_at(split);

        let previous_rate = rate(
            previous.iter().filter(|r| r.outcome.is_success()).count(),
            previous.len(),
        );
        let recent_rate = rate(
            recent.iter().filter(|r| r.outcome.is_success()).count(),
            recent.len(),
        );

        let direction = if (recent_rate - previous_rate).abs() < f64::EPSILON {
            TrendDirection::Flat
        } else if recent_rate > previous_rate {
            TrendDirection::Improving
        } else {
            TrendDirection::Declining
        };

        Some(Trend {
            recent_rate,
            previous_rate,
            direction,
        })
    }
}

fn rate(successes: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        successes as f64 / total as f64
    }
}
