// ABOUTME: Result types returned by full validation runs and audit trims
// ABOUTME: Includes the per-state histogram and the atomic tally shared by scan workers

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::sync::ItemState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Finished,
    Failed,
}

/// Histogram over heal/check outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResults {
    #[serde(rename = "ITEMS_WERE_IN_EXPECTED_STATE")]
    pub items_were_in_expected_state: u64,
    #[serde(rename = "ITEMS_DID_NOT_MATCH")]
    pub items_did_not_match: u64,
    #[serde(rename = "ITEM_WAS_MISSING_IN_MIRROR")]
    pub item_was_missing_in_mirror: u64,
    #[serde(rename = "ITEM_WAS_NOT_DELETED_IN_MIRROR")]
    pub item_was_not_deleted_in_mirror: u64,
    #[serde(rename = "HEAL_INDETERMINATE")]
    pub heal_indeterminate: u64,
}

impl ValidationResults {
    pub fn get(&self, state: ItemState) -> u64 {
        match state {
            ItemState::ItemsWereInExpectedState => self.items_were_in_expected_state,
            ItemState::ItemsDidNotMatch => self.items_did_not_match,
            ItemState::ItemWasMissingInMirror => self.item_was_missing_in_mirror,
            ItemState::ItemWasNotDeletedInMirror => self.item_was_not_deleted_in_mirror,
            ItemState::HealIndeterminate => self.heal_indeterminate,
        }
    }

    /// Sum over every state except the expected one.
    pub fn anomalies(&self) -> u64 {
        self.items_did_not_match
            + self.item_was_missing_in_mirror
            + self.item_was_not_deleted_in_mirror
            + self.heal_indeterminate
    }
}

/// Aggregate counts of one full validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTotals {
    /// Source documents or nodes fed to the scan workers
    pub items_processed: u64,
    /// Mirror rows examined (one per item per target, plus orphans)
    pub rows_processed: u64,
    /// Mirror rows present when the run started, across targets and paths
    pub baseline_rows: u64,
    pub processing_errors: u64,
    pub validation_errors: u64,
    pub validation_results: ValidationResults,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: i64,
    pub status: RunStatus,
    /// Why the run failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub totals: RunTotals,
}

impl RunResult {
    pub fn is_finished(&self) -> bool {
        self.status == RunStatus::Finished
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimResult {
    pub status: TrimStatus,
    pub rows_deleted: u64,
    /// One message per failed target or rejected path
    pub errors: Vec<String>,
}

impl TrimResult {
    pub fn is_success(&self) -> bool {
        self.status == TrimStatus::Success
    }
}

/// Lock-free counters updated concurrently by scan workers.
#[derive(Debug, Default)]
pub(crate) struct RunTally {
    items_processed: AtomicU64,
    rows_processed: AtomicU64,
    baseline_rows: AtomicU64,
    processing_errors: AtomicU64,
    validation_errors: AtomicU64,
    states: [AtomicU64; 5],
}

impl RunTally {
    pub(crate) fn add_baseline(&self, rows: u64) {
        self.baseline_rows.fetch_add(rows, Ordering::SeqCst);
    }

    pub(crate) fn item_processed(&self) {
        self.items_processed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn row_processed(&self) {
        self.rows_processed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn processing_error(&self) {
        self.processing_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn validation_error(&self) {
        self.validation_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record(&self, state: ItemState) {
        let slot = ItemState::ALL
            .iter()
            .position(|s| *s == state)
            .unwrap_or(ItemState::ALL.len() - 1);
        self.states[slot].fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn rows_processed(&self) -> u64 {
        self.rows_processed.load(Ordering::SeqCst)
    }

    pub(crate) fn baseline_rows(&self) -> u64 {
        self.baseline_rows.load(Ordering::SeqCst)
    }

    pub(crate) fn snapshot(&self) -> RunTotals {
        let state = |s: ItemState| {
            let slot = ItemState::ALL.iter().position(|x| *x == s).unwrap_or(0);
            self.states[slot].load(Ordering::SeqCst)
        };
        RunTotals {
            items_processed: self.items_processed.load(Ordering::SeqCst),
            rows_processed: self.rows_processed(),
            baseline_rows: self.baseline_rows(),
            processing_errors: self.processing_errors.load(Ordering::SeqCst),
            validation_errors: self.validation_errors.load(Ordering::SeqCst),
            validation_results: ValidationResults {
                items_were_in_expected_state: state(ItemState::ItemsWereInExpectedState),
                items_did_not_match: state(ItemState::ItemsDidNotMatch),
                item_was_missing_in_mirror: state(ItemState::ItemWasMissingInMirror),
                item_was_not_deleted_in_mirror: state(ItemState::ItemWasNotDeletedInMirror),
                heal_indeterminate: state(ItemState::HealIndeterminate),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_histogram() {
        let tally = RunTally::default();
        tally.record(ItemState::ItemsDidNotMatch);
        tally.record(ItemState::ItemsDidNotMatch);
        tally.record(ItemState::HealIndeterminate);
        tally.record(ItemState::ItemsWereInExpectedState);

        let totals = tally.snapshot();
        assert_eq!(totals.validation_results.get(ItemState::ItemsDidNotMatch), 2);
        assert_eq!(totals.validation_results.get(ItemState::HealIndeterminate), 1);
        assert_eq!(totals.validation_results.anomalies(), 3);
    }

    #[test]
    fn test_run_result_json_shape() {
        let result = RunResult {
            run_id: 7,
            status: RunStatus::Finished,
            error: None,
            duration_ms: 12,
            totals: RunTotals::default(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "finished");
        assert!(json.get("error").is_none());
        assert_eq!(
            json["totals"]["validationResults"]["ITEMS_DID_NOT_MATCH"],
            0
        );
    }
}
