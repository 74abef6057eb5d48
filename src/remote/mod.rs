// ABOUTME: REST adapters for the authoritative source store
// ABOUTME: Used by the CLI; the engine itself only sees the SourceStore trait

pub mod client;
pub mod models;

pub use client::{RestSourceConfig, RestSourceStore};
