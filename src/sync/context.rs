// ABOUTME: Shared state handed to the writer, validator, healer and scanner
// ABOUTME: Owns the targets, hooks and the error sink that counts totalErrors

use std::error::Error as StdError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::hooks::Hooks;
use crate::config::PathRegistry;
use crate::error::SyncError;
use crate::store::{AuditStore, MirrorStore, SourceStore};

pub(crate) struct SyncContext {
    pub(crate) registry: PathRegistry,
    pub(crate) source: Arc<dyn SourceStore>,
    pub(crate) mirrors: Vec<Arc<dyn MirrorStore>>,
    pub(crate) audits: Vec<Arc<dyn AuditStore>>,
    pub(crate) hooks: Hooks,
    total_errors: AtomicU64,
}

impl SyncContext {
    pub(crate) fn new(
        registry: PathRegistry,
        source: Arc<dyn SourceStore>,
        mirrors: Vec<Arc<dyn MirrorStore>>,
        audits: Vec<Arc<dyn AuditStore>>,
        hooks: Hooks,
    ) -> Self {
        Self {
            registry,
            source,
            mirrors,
            audits,
            hooks,
            total_errors: AtomicU64::new(0),
        }
    }

    /// Count, log and forward an error to the injected handler.
    pub(crate) fn report(&self, error: &SyncError) {
        self.total_errors.fetch_add(1, Ordering::SeqCst);
        tracing::error!(kind = error.kind(), "{}", error_chain(error));
        self.hooks.handle_error(error);
    }

    pub(crate) fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::SeqCst)
    }
}

/// Render an error and its sources as `outer: inner: root`.
pub(crate) fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
