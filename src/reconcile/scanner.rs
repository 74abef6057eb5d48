// ABOUTME: Full-corpus mark-and-sweep reconciliation between the source store and every mirror
// ABOUTME: Stamps rows, scans the source in id order, then heals rows that were never seen

use chrono::Utc;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::progress::{ProgressReporter, ScanProgressCallback};
use super::result::{RunResult, RunStatus, RunTally};
use crate::config::SourceKind;
use crate::error::SyncError;
use crate::store::{MirrorStore, SourceItem};
use crate::sync::canonical::items_match;
use crate::sync::{error_chain, heal_item, ItemState, MirrorHookAction, SyncContext};

/// One anomaly found by a full validation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub collection_or_record_path: String,
    pub item_id: String,
    pub target: String,
    /// What the healer did about it
    pub state: ItemState,
}

pub type ValidationErrorCallback = Arc<dyn Fn(&ValidationIssue) + Send + Sync>;
pub type ProcessingErrorCallback = Arc<dyn Fn(&SyncError) + Send + Sync>;

/// Parameters of [`crate::sync::SyncEngine::run_full_validation`].
#[derive(Clone)]
pub struct FullValidationOptions {
    pub paths: Vec<String>,
    /// Width of the per-page worker pool; pages hold `batch_size * 10` items
    pub batch_size: usize,
    pub progress_interval: Duration,
    pub on_progress: Option<ScanProgressCallback>,
    pub on_validation_error: Option<ValidationErrorCallback>,
    pub on_processing_error: Option<ProcessingErrorCallback>,
}

impl FullValidationOptions {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            batch_size: 10,
            progress_interval: Duration::from_secs(5),
            on_progress: None,
            on_validation_error: None,
            on_processing_error: None,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Runs given a zero interval fail before touching any row.
    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn on_progress(mut self, callback: ScanProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn on_validation_error(mut self, callback: ValidationErrorCallback) -> Self {
        self.on_validation_error = Some(callback);
        self
    }

    pub fn on_processing_error(mut self, callback: ProcessingErrorCallback) -> Self {
        self.on_processing_error = Some(callback);
        self
    }
}

/// Paths currently being swept. Sweep markers are shared per path, so two
/// runs must never touch the same path at once.
#[derive(Debug, Default)]
pub(crate) struct ActiveRuns {
    paths: Mutex<HashSet<String>>,
}

impl ActiveRuns {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.paths
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim every path or none. Returns the conflicting paths on failure.
    fn claim<'a>(&'a self, paths: &[String]) -> Result<RunClaim<'a>, Vec<String>> {
        let mut active = self.lock();
        let busy: Vec<String> = paths
            .iter()
            .filter(|p| active.contains(p.as_str()))
            .cloned()
            .collect();
        if !busy.is_empty() {
            return Err(busy);
        }
        active.extend(paths.iter().cloned());
        Ok(RunClaim {
            runs: self,
            paths: paths.to_vec(),
        })
    }
}

struct RunClaim<'a> {
    runs: &'a ActiveRuns,
    paths: Vec<String>,
}

impl Drop for RunClaim<'_> {
    fn drop(&mut self) {
        let mut active = self.runs.lock();
        for path in &self.paths {
            active.remove(path);
        }
    }
}

struct Scan<'a> {
    ctx: &'a SyncContext,
    run_id: i64,
    options: &'a FullValidationOptions,
    tally: &'a RunTally,
}

pub(crate) async fn run_full_validation(
    ctx: &SyncContext,
    runs: &ActiveRuns,
    options: FullValidationOptions,
) -> RunResult {
    let started = Instant::now();
    let run_id = Utc::now().timestamp_millis();
    let tally = Arc::new(RunTally::default());

    let failed = |error: String| {
        tracing::error!("Full validation {} failed: {}", run_id, error);
        RunResult {
            run_id,
            status: RunStatus::Failed,
            error: Some(error),
            duration_ms: started.elapsed().as_millis() as u64,
            totals: tally.snapshot(),
        }
    };

    if options.batch_size == 0 {
        return failed("batch size must be at least 1".to_string());
    }
    if options.progress_interval.is_zero() {
        return failed("progress interval must be greater than zero".to_string());
    }

    let mut paths: Vec<String> = Vec::new();
    for path in &options.paths {
        if !ctx.registry.contains(path) {
            let err = SyncError::UnregisteredPath { path: path.clone() };
            ctx.report(&err);
            return failed(err.to_string());
        }
        if !paths.contains(path) {
            paths.push(path.clone());
        }
    }

    let _claim = match runs.claim(&paths) {
        Ok(claim) => claim,
        Err(busy) => {
            return failed(format!(
                "a full validation is already running for {}",
                busy.join(", ")
            ))
        }
    };

    info!(
        "Starting full validation {} over {} path(s) with batch size {}",
        run_id,
        paths.len(),
        options.batch_size
    );
    let _reporter = ProgressReporter::start(
        run_id,
        options.progress_interval,
        tally.clone(),
        options.on_progress.clone(),
    );

    let scan = Scan {
        ctx,
        run_id,
        options: &options,
        tally: &tally,
    };
    if let Err(e) = scan.run(&paths).await {
        ctx.report(&e);
        return failed(error_chain(&e));
    }

    let result = RunResult {
        run_id,
        status: RunStatus::Finished,
        error: None,
        duration_ms: started.elapsed().as_millis() as u64,
        totals: tally.snapshot(),
    };
    info!(
        "Full validation {} finished in {}ms: {} item(s), {} row(s), {} validation error(s), {} processing error(s)",
        run_id,
        result.duration_ms,
        result.totals.items_processed,
        result.totals.rows_processed,
        result.totals.validation_errors,
        result.totals.processing_errors
    );
    result
}

impl Scan<'_> {
    async fn run(&self, paths: &[String]) -> Result<(), SyncError> {
        self.mark(paths).await?;
        for path in paths {
            let kind = self.source_kind(path)?;
            self.scan_path(path, kind).await?;
        }
        for path in paths {
            self.sweep_path(path).await?;
        }
        Ok(())
    }

    fn source_kind(&self, path: &str) -> Result<SourceKind, SyncError> {
        self.ctx
            .registry
            .source_kind(path)
            .ok_or_else(|| SyncError::UnregisteredPath {
                path: path.to_string(),
            })
    }

    /// Phase 0: record the baseline and stamp every row with the run id.
    async fn mark(&self, paths: &[String]) -> Result<(), SyncError> {
        for mirror in &self.ctx.mirrors {
            for path in paths {
                let scan_failure = |source: anyhow::Error| SyncError::ScanFailure {
                    path: path.clone(),
                    source: source.context(format!("marking rows on '{}'", mirror.title())),
                };
                let count = mirror.count_all(path).await.map_err(scan_failure)?;
                self.tally.add_baseline(count);
                let marked = mirror
                    .set_all_sweep_markers(path, self.run_id)
                    .await
                    .map_err(scan_failure)?;
                info!(
                    "Marked {} row(s) of '{}' on '{}' with sweep marker {}",
                    marked,
                    path,
                    mirror.title(),
                    self.run_id
                );
            }
        }
        Ok(())
    }

    /// Phase 1: walk the source in id order and check every item on every target.
    async fn scan_path(&self, path: &str, kind: SourceKind) -> Result<(), SyncError> {
        let page_size = self.options.batch_size * 10;
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .ctx
                .source
                .scan_ordered(kind, path, cursor.as_deref(), page_size)
                .await
                .map_err(|source| SyncError::ScanFailure {
                    path: path.to_string(),
                    source,
                })?;
            let fetched = page.items.len();

            stream::iter(page.items)
                .for_each_concurrent(self.options.batch_size, |item| self.process_item(path, item))
                .await;

            if page.is_last_page || fetched < page_size {
                break;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(())
    }

    async fn process_item(&self, path: &str, source_item: SourceItem) {
        let SourceItem { id, item } = source_item;
        if let Some(Value::String(declared)) = item.get("id") {
            if declared != &id {
                warn!(
                    "Skipping {}/{}: its id property is '{}' and does not match the key",
                    path, id, declared
                );
                return;
            }
        }
        self.tally.item_processed();

        let expected = self.ctx.hooks.transform(item, path);
        let checks = self
            .ctx
            .mirrors
            .iter()
            .enumerate()
            .map(|(index, mirror)| self.check_row(path, &id, &expected, index, mirror));
        let outcomes = join_all(checks).await;

        let mut anomaly = false;
        for outcome in outcomes {
            match outcome {
                Ok(state) => anomaly |= state.is_anomaly(),
                Err(e) => self.processing_error(&e),
            }
        }
        if anomaly {
            self.ctx
                .hooks
                .post_mirror(MirrorHookAction::CreateOrUpdate, expected, path)
                .await;
        }
    }

    async fn check_row(
        &self,
        path: &str,
        id: &str,
        expected: &Value,
        index: usize,
        mirror: &Arc<dyn MirrorStore>,
    ) -> Result<ItemState, SyncError> {
        let row = mirror
            .get_by_id(path, id)
            .await
            .map_err(|source| SyncError::TargetReadFailure {
                target: mirror.title().to_string(),
                path: path.to_string(),
                item_id: id.to_string(),
                source,
            })?;
        self.tally.row_processed();

        let in_sync = row
            .as_ref()
            .map_or(false, |row| items_match(&row.item, expected));
        let state = if in_sync {
            ItemState::ItemsWereInExpectedState
        } else {
            let state = heal_item(self.ctx, path, id, self.run_id, index).await;
            self.validation_error(path, id, mirror.title(), state);
            state
        };
        self.tally.record(state);

        mirror
            .clear_sweep_marker(path, id)
            .await
            .map_err(|source| SyncError::TargetWriteFailure {
                target: mirror.title().to_string(),
                path: path.to_string(),
                item_id: id.to_string(),
                source,
            })?;
        Ok(state)
    }

    /// Phase 2: rows still stamped with the run id were never seen in the source.
    async fn sweep_path(&self, path: &str) -> Result<(), SyncError> {
        for (index, mirror) in self.ctx.mirrors.iter().enumerate() {
            let orphans = mirror
                .scan_by_sweep_marker(path, self.run_id)
                .await
                .map_err(|source| SyncError::ScanFailure {
                    path: path.to_string(),
                    source: source.context(format!("sweeping '{}'", mirror.title())),
                })?;
            if !orphans.is_empty() {
                info!(
                    "Found {} unseen row(s) of '{}' on '{}'",
                    orphans.len(),
                    path,
                    mirror.title()
                );
            }

            stream::iter(orphans)
                .for_each_concurrent(self.options.batch_size, move |row| async move {
                    self.tally.row_processed();
                    let state = heal_item(self.ctx, path, &row.id, self.run_id, index).await;
                    self.tally.record(state);
                    if !state.is_anomaly() {
                        return;
                    }
                    self.validation_error(path, &row.id, mirror.title(), state);
                    if state != ItemState::ItemWasNotDeletedInMirror {
                        // Row survived the heal; drop the stamp so it is not reported twice
                        if let Err(source) = mirror.clear_sweep_marker(path, &row.id).await {
                            self.processing_error(&SyncError::TargetWriteFailure {
                                target: mirror.title().to_string(),
                                path: path.to_string(),
                                item_id: row.id.clone(),
                                source,
                            });
                        }
                    }
                    self.ctx
                        .hooks
                        .post_mirror(MirrorHookAction::Delete, json!({}), path)
                        .await;
                })
                .await;
        }
        Ok(())
    }

    fn validation_error(&self, path: &str, id: &str, target: &str, state: ItemState) {
        self.tally.validation_error();
        warn!(
            "Full validation {} found {}/{} out of sync on '{}': {}",
            self.run_id, path, id, target, state
        );
        if let Some(callback) = &self.options.on_validation_error {
            callback(&ValidationIssue {
                collection_or_record_path: path.to_string(),
                item_id: id.to_string(),
                target: target.to_string(),
                state,
            });
        }
    }

    fn processing_error(&self, error: &SyncError) {
        self.tally.processing_error();
        self.ctx.report(error);
        if let Some(callback) = &self.options.on_processing_error {
            callback(error);
        }
    }
}
