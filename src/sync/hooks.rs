// ABOUTME: Injection points supplied at construction - transform, post-mirror, debug, error handler
// ABOUTME: Every hook defaults to a no-op

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use super::task::SyncTask;
use crate::error::SyncError;

/// Pure function applied to every payload right before it is mirrored or audited.
pub type PreMirrorTransform = Arc<dyn Fn(Value, &str) -> Value + Send + Sync>;

/// Async callback invoked after a task or heal actually changed a mirror.
pub type PostMirrorHook = Arc<dyn Fn(PostMirrorEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Async callback awaited after a sync task has claimed its key.
pub type DebugHook = Arc<dyn Fn(SyncTask) -> BoxFuture<'static, ()> + Send + Sync>;

/// Fire-and-forget sink for reported errors.
pub type ErrorHandler = Arc<dyn Fn(&SyncError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MirrorHookAction {
    #[serde(rename = "create/update")]
    CreateOrUpdate,
    #[serde(rename = "delete")]
    Delete,
}

impl MirrorHookAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorHookAction::CreateOrUpdate => "create/update",
            MirrorHookAction::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostMirrorEvent {
    pub action: MirrorHookAction,
    pub item: Value,
    pub collection_or_record_path: String,
}

/// Box an async closure into a [`PostMirrorHook`].
pub fn post_mirror_hook<F, Fut>(hook: F) -> PostMirrorHook
where
    F: Fn(PostMirrorEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event| Box::pin(hook(event)))
}

/// Box an async closure into a [`DebugHook`].
pub fn debug_hook<F, Fut>(hook: F) -> DebugHook
where
    F: Fn(SyncTask) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |task| Box::pin(hook(task)))
}

#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub(crate) transform: Option<PreMirrorTransform>,
    pub(crate) post_mirror: Option<PostMirrorHook>,
    pub(crate) error_handler: Option<ErrorHandler>,
}

impl Hooks {
    pub(crate) fn transform(&self, item: Value, path: &str) -> Value {
        match &self.transform {
            Some(transform) => transform(item, path),
            None => item,
        }
    }

    pub(crate) fn transform_opt(&self, item: Option<&Value>, path: &str) -> Option<Value> {
        item.map(|i| self.transform(i.clone(), path))
    }

    pub(crate) async fn post_mirror(&self, action: MirrorHookAction, item: Value, path: &str) {
        if let Some(hook) = &self.post_mirror {
            hook(PostMirrorEvent {
                action,
                item,
                collection_or_record_path: path.to_string(),
            })
            .await;
        }
    }

    pub(crate) fn handle_error(&self, error: &SyncError) {
        if let Some(handler) = &self.error_handler {
            handler(error);
        }
    }
}
