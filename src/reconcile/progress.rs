// ABOUTME: Periodic progress reporting for full validation runs
// ABOUTME: Runs on its own interval task, stopped when the reporter is dropped

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use super::result::RunTally;

/// Snapshot handed to the progress callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub run_id: i64,
    pub processed_rows: u64,
    pub baseline_rows: u64,
    pub elapsed_minutes: f64,
}

impl ScanProgress {
    /// Percentage of the baseline processed so far; 100 when the baseline is empty.
    pub fn percent(&self) -> f64 {
        if self.baseline_rows == 0 {
            return 100.0;
        }
        self.processed_rows as f64 * 100.0 / self.baseline_rows as f64
    }

    pub fn message(&self) -> String {
        format!(
            "Processed {} of {} rows ({:.1}%) in {:.2} minutes",
            self.processed_rows,
            self.baseline_rows,
            self.percent(),
            self.elapsed_minutes
        )
    }
}

pub type ScanProgressCallback = Arc<dyn Fn(&ScanProgress) + Send + Sync>;

/// Background ticker; aborted on drop so every exit path stops it.
pub(crate) struct ProgressReporter {
    handle: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    pub(crate) fn start(
        run_id: i64,
        interval: Duration,
        tally: Arc<RunTally>,
        callback: Option<ScanProgressCallback>,
    ) -> Self {
        let started = Instant::now();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let progress = ScanProgress {
                    run_id,
                    processed_rows: tally.rows_processed(),
                    baseline_rows: tally.baseline_rows(),
                    elapsed_minutes: started.elapsed().as_secs_f64() / 60.0,
                };
                tracing::info!("Full validation {}: {}", run_id, progress.message());
                if let Some(callback) = &callback {
                    callback(&progress);
                }
            }
        });
        Self {
            handle: Some(handle),
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
