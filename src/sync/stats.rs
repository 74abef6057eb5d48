// ABOUTME: Atomic counters for both task pools and the error sink
// ABOUTME: EngineStats is the serializable snapshot returned by SyncEngine::stats

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters owned by one task pool.
#[derive(Debug, Default)]
pub struct PoolCounters {
    /// Submitted but waiting for a worker slot
    pub(crate) queued: AtomicUsize,
    /// Holding a worker slot
    pub(crate) active: AtomicUsize,
    pub(crate) processed: AtomicU64,
    pub(crate) skipped: AtomicU64,
    pub(crate) pending_retry: AtomicU64,
}

impl PoolCounters {
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Queued plus active.
    pub fn outstanding(&self) -> usize {
        self.queued() + self.active()
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }

    pub fn pending_retry(&self) -> u64 {
        self.pending_retry.load(Ordering::SeqCst)
    }

    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_skipped(&self, n: u64) {
        self.skipped.fetch_add(n, Ordering::SeqCst);
    }

    pub(crate) fn retry_started(&self) {
        self.pending_retry.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn retry_finished(&self) {
        self.pending_retry.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Point-in-time view of the engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub total_errors: u64,
    pub total_sync_tasks_processed: u64,
    pub total_sync_tasks_skipped: u64,
    pub total_sync_tasks_pending_retry: u64,
    pub sync_tasks_waiting_in_queue: usize,
    pub sync_tasks_currently_running: usize,
    /// Keys currently claimed in the mutation gate
    pub sync_task_running_keys: usize,
    pub total_validator_tasks_processed: u64,
    pub total_validator_tasks_skipped: u64,
    pub total_validator_tasks_pending_retry: u64,
    pub validator_tasks_waiting_in_queue: usize,
    pub validator_tasks_currently_running: usize,
    pub validator_task_running_keys: usize,
}
