// ABOUTME: Sync engine - task scheduling, mirror writes, validation and healing
// ABOUTME: SyncEngine is the entry point; the rest are building blocks

pub mod canonical;
mod context;
mod engine;
pub mod gate;
mod healer;
pub mod hooks;
pub mod pool;
pub mod stats;
pub mod task;
mod validator;
mod writer;

pub use engine::{SyncEngine, SyncEngineBuilder};
pub use healer::ItemState;
pub use hooks::{
    debug_hook, post_mirror_hook, DebugHook, ErrorHandler, MirrorHookAction, PostMirrorEvent,
    PostMirrorHook, PreMirrorTransform,
};
pub use stats::EngineStats;
pub use task::{SyncAction, SyncTask, SyncTaskValidator};

pub(crate) use context::{error_chain, SyncContext};
pub(crate) use healer::heal_item;
