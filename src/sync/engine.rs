// ABOUTME: SyncEngine - public surface of the sync and reconciliation engine
// ABOUTME: Owns both task pools, both key gates, and the shared target context

use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use super::context::SyncContext;
use super::gate::{Admission, KeyGate};
use super::healer::{heal_item, ItemState};
use super::hooks::{DebugHook, ErrorHandler, Hooks, PostMirrorHook, PreMirrorTransform};
use super::pool::TaskPool;
use super::stats::EngineStats;
use super::task::{SyncTask, SyncTaskValidator};
use super::validator::check_task;
use super::writer::apply_task;
use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::reconcile::scanner::{run_full_validation, ActiveRuns};
use crate::reconcile::trim::trim_audits;
use crate::reconcile::{FullValidationOptions, RunResult, TrimProgressCallback, TrimResult};
use crate::store::{AuditStore, MirrorStore, SourceStore};

/// Keeps N mirror targets and M audit targets consistent with one source store.
///
/// Cloning is cheap; clones share pools, gates and counters.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use mirror_sync::config::{CollectionOrRecordPathMeta, EngineConfig, SourceKind};
/// # use mirror_sync::store::memory::{InMemoryMirrorStore, InMemorySourceStore};
/// # use mirror_sync::sync::SyncEngine;
/// # async fn demo() -> Result<(), mirror_sync::error::SyncError> {
/// let engine = SyncEngine::builder(Arc::new(InMemorySourceStore::new()))
///     .mirror(Arc::new(InMemoryMirrorStore::new("main_db")))
///     .config(EngineConfig {
///         paths: vec![CollectionOrRecordPathMeta::new("person", SourceKind::DocumentCollection)],
///         ..EngineConfig::default()
///     })
///     .build()?;
/// engine.drain_sync_queue().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    ctx: SyncContext,
    config: EngineConfig,
    sync_pool: TaskPool,
    sync_gate: KeyGate,
    validator_pool: TaskPool,
    validator_gate: KeyGate,
    debug_hook: RwLock<Option<DebugHook>>,
    active_runs: ActiveRuns,
}

impl SyncEngine {
    pub fn builder(source: Arc<dyn SourceStore>) -> SyncEngineBuilder {
        SyncEngineBuilder {
            source,
            mirrors: Vec::new(),
            audits: Vec::new(),
            config: EngineConfig::default(),
            hooks: Hooks::default(),
        }
    }

    /// Queue mutation tasks. Tasks for unregistered paths are reported and dropped.
    pub fn submit_sync_tasks(&self, tasks: impl IntoIterator<Item = SyncTask>) {
        for task in tasks {
            if !self.inner.ctx.registry.contains(&task.collection_or_record_path) {
                self.inner.ctx.report(&SyncError::UnregisteredPath {
                    path: task.collection_or_record_path,
                });
                continue;
            }
            EngineInner::enqueue_sync(&self.inner, task);
        }
    }

    /// Queue validator tasks. Tasks for unregistered paths are reported and dropped.
    pub fn submit_validator_tasks(&self, tasks: impl IntoIterator<Item = SyncTaskValidator>) {
        for task in tasks {
            if !self.inner.ctx.registry.contains(&task.collection_or_record_path) {
                self.inner.ctx.report(&SyncError::UnregisteredPath {
                    path: task.collection_or_record_path,
                });
                continue;
            }
            EngineInner::enqueue_validator(&self.inner, task);
        }
    }

    pub fn stats(&self) -> EngineStats {
        let inner = &self.inner;
        let sync = inner.sync_pool.counters();
        let validator = inner.validator_pool.counters();
        EngineStats {
            total_errors: inner.ctx.total_errors(),
            total_sync_tasks_processed: sync.processed(),
            total_sync_tasks_skipped: sync.skipped(),
            total_sync_tasks_pending_retry: sync.pending_retry(),
            sync_tasks_waiting_in_queue: sync.queued(),
            sync_tasks_currently_running: sync.active(),
            sync_task_running_keys: inner.sync_gate.len(),
            total_validator_tasks_processed: validator.processed(),
            total_validator_tasks_skipped: validator.skipped(),
            total_validator_tasks_pending_retry: validator.pending_retry(),
            validator_tasks_waiting_in_queue: validator.queued(),
            validator_tasks_currently_running: validator.active(),
            validator_task_running_keys: inner.validator_gate.len(),
        }
    }

    /// Resolve once no mutation task is queued, running or holding a key.
    pub async fn drain_sync_queue(&self) {
        self.inner.sync_pool.drain(&self.inner.sync_gate).await;
    }

    /// Resolve once no validator task is queued, running or holding a key.
    pub async fn drain_validator_queue(&self) {
        self.inner
            .validator_pool
            .drain(&self.inner.validator_gate)
            .await;
    }

    /// Repair one item on the mirror target at index `target`.
    pub async fn heal(&self, path: &str, id: &str, date_ms: i64, target: usize) -> ItemState {
        heal_item(&self.inner.ctx, path, id, date_ms, target).await
    }

    /// Full-corpus mark-and-sweep over `options.paths`.
    pub async fn run_full_validation(&self, options: FullValidationOptions) -> RunResult {
        run_full_validation(&self.inner.ctx, &self.inner.active_runs, options).await
    }

    /// Delete audit rows older than `days_to_retain` days on every audit target.
    pub async fn trim_audits(
        &self,
        paths: &[String],
        days_to_retain: u32,
        progress: Option<TrimProgressCallback>,
    ) -> TrimResult {
        trim_audits(&self.inner.ctx, paths, days_to_retain, progress).await
    }

    /// Create mirror and audit tables for every registered path.
    pub async fn ensure_tables(&self) -> Result<()> {
        let ctx = &self.inner.ctx;
        for path in ctx.registry.paths() {
            for mirror in &ctx.mirrors {
                mirror.ensure_collection(path).await.with_context(|| {
                    format!("Failed to ensure mirror table for '{}' on '{}'", path, mirror.title())
                })?;
            }
            for audit in &ctx.audits {
                audit.ensure_collection(path).await.with_context(|| {
                    format!("Failed to ensure audit table for '{}' on '{}'", path, audit.title())
                })?;
            }
        }
        info!(
            "Ensured tables for {} path(s) on {} mirror and {} audit target(s)",
            ctx.registry.len(),
            ctx.mirrors.len(),
            ctx.audits.len()
        );
        Ok(())
    }

    /// Install a hook awaited right after a sync task claims its key.
    pub fn register_sync_task_debug_hook(&self, hook: DebugHook) {
        *self
            .inner
            .debug_hook
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(hook);
    }

    pub fn clear_sync_task_debug_hook(&self) {
        *self
            .inner
            .debug_hook
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Titles of the mirror targets, in index order.
    pub fn mirror_titles(&self) -> Vec<String> {
        self.inner
            .ctx
            .mirrors
            .iter()
            .map(|m| m.title().to_string())
            .collect()
    }
}

impl EngineInner {
    fn enqueue_sync(inner: &Arc<EngineInner>, task: SyncTask) {
        let engine = inner.clone();
        inner
            .sync_pool
            .spawn(async move { engine.run_sync_task(task).await });
    }

    fn enqueue_validator(inner: &Arc<EngineInner>, task: SyncTaskValidator) {
        let engine = inner.clone();
        inner
            .validator_pool
            .spawn(async move { engine.run_validator_task(task).await });
    }

    async fn run_sync_task(self: Arc<Self>, task: SyncTask) {
        let counters = self.sync_pool.counters();
        let key = task.gate_key();

        let claim = match self.sync_gate.try_claim(&key, task.date_ms) {
            Admission::Claimed(claim) => claim,
            Admission::Stale { running } => {
                debug!(
                    "Dropping sync task {} ({}) superseded by running clock {}",
                    key, task.date_ms, running
                );
                counters.record_skipped(1);
                return;
            }
            Admission::Busy { running } => {
                debug!(
                    "Sync task {} ({}) waiting on running clock {}",
                    key, task.date_ms, running
                );
                counters.retry_started();
                tokio::time::sleep(self.config.retry_backoff).await;
                EngineInner::enqueue_sync(&self, task);
                counters.retry_finished();
                return;
            }
        };

        let hook = self
            .debug_hook
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(hook) = hook {
            hook(task.clone()).await;
        }

        let summary = apply_task(&self.ctx, &task).await;
        counters.record_skipped(summary.skipped);
        drop(claim);
        counters.record_processed();
    }

    async fn run_validator_task(self: Arc<Self>, task: SyncTaskValidator) {
        let counters = self.validator_pool.counters();
        let key = task.gate_key();

        let claim = match self.validator_gate.try_claim(&key, task.date_ms) {
            Admission::Claimed(claim) => claim,
            Admission::Stale { running } => {
                debug!(
                    "Dropping validator task {} ({}) superseded by running clock {}",
                    key, task.date_ms, running
                );
                counters.record_skipped(1);
                return;
            }
            Admission::Busy { .. } => {
                counters.retry_started();
                tokio::time::sleep(self.config.retry_backoff).await;
                EngineInner::enqueue_validator(&self, task);
                counters.retry_finished();
                return;
            }
        };

        let summary = check_task(&self.ctx, &task).await;
        counters.record_skipped(summary.skipped);
        drop(claim);
        counters.record_processed();
    }
}

/// Collects targets, hooks and configuration for a [`SyncEngine`].
pub struct SyncEngineBuilder {
    source: Arc<dyn SourceStore>,
    mirrors: Vec<Arc<dyn MirrorStore>>,
    audits: Vec<Arc<dyn AuditStore>>,
    config: EngineConfig,
    hooks: Hooks,
}

impl SyncEngineBuilder {
    pub fn mirror(mut self, mirror: Arc<dyn MirrorStore>) -> Self {
        self.mirrors.push(mirror);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditStore>) -> Self {
        self.audits.push(audit);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pre_mirror_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value, &str) -> Value + Send + Sync + 'static,
    {
        let transform: PreMirrorTransform = Arc::new(transform);
        self.hooks.transform = Some(transform);
        self
    }

    pub fn post_mirror_hook(mut self, hook: PostMirrorHook) -> Self {
        self.hooks.post_mirror = Some(hook);
        self
    }

    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&SyncError) + Send + Sync + 'static,
    {
        let handler: ErrorHandler = Arc::new(handler);
        self.hooks.error_handler = Some(handler);
        self
    }

    /// Validate the configuration and create the engine.
    pub fn build(self) -> Result<SyncEngine, SyncError> {
        let registry = self.config.validate()?;
        info!(
            "Starting sync engine: {} path(s), {} mirror target(s), {} audit target(s), widths {}/{}",
            registry.len(),
            self.mirrors.len(),
            self.audits.len(),
            self.config.sync_concurrency,
            self.config.validator_concurrency
        );

        let ctx = SyncContext::new(registry, self.source, self.mirrors, self.audits, self.hooks);
        let inner = EngineInner {
            sync_pool: TaskPool::new("sync", self.config.sync_concurrency),
            sync_gate: KeyGate::new(),
            validator_pool: TaskPool::new("validator", self.config.validator_concurrency),
            validator_gate: KeyGate::new(),
            debug_hook: RwLock::new(None),
            active_runs: ActiveRuns::default(),
            config: self.config,
            ctx,
        };
        Ok(SyncEngine {
            inner: Arc::new(inner),
        })
    }
}
