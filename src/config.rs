// ABOUTME: Static configuration - registered collection/record paths and engine widths
// ABOUTME: Also loads the TOML file used by the CLI to wire targets and sources

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::SyncError;
use crate::utils::validate_postgres_identifier;

/// Kind of source store behind a registered path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// A document collection (documents addressed by id).
    DocumentCollection,
    /// A keyed JSON tree (children addressed by key).
    KeyedTree,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::DocumentCollection => "document-collection",
            SourceKind::KeyedTree => "keyed-tree",
        }
    }
}

/// Static registration of one collection or record path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionOrRecordPathMeta {
    #[serde(alias = "collection_or_record_path", alias = "path")]
    pub collection_or_record_path: String,
    pub source: SourceKind,
}

impl CollectionOrRecordPathMeta {
    pub fn new(path: &str, source: SourceKind) -> Self {
        Self {
            collection_or_record_path: path.to_string(),
            source,
        }
    }
}

/// Validated lookup table of registered paths.
#[derive(Debug, Clone, Default)]
pub struct PathRegistry {
    paths: BTreeMap<String, SourceKind>,
}

impl PathRegistry {
    /// Build a registry, rejecting invalid or duplicated path names.
    pub fn new(metas: &[CollectionOrRecordPathMeta]) -> Result<Self, SyncError> {
        let mut paths = BTreeMap::new();
        for meta in metas {
            validate_postgres_identifier(&meta.collection_or_record_path).map_err(|e| {
                SyncError::InvalidConfig(format!(
                    "collection or record path '{}' is not usable as a table name: {}",
                    meta.collection_or_record_path, e
                ))
            })?;
            if paths
                .insert(meta.collection_or_record_path.clone(), meta.source)
                .is_some()
            {
                return Err(SyncError::InvalidConfig(format!(
                    "collection or record path '{}' is registered twice",
                    meta.collection_or_record_path
                )));
            }
        }
        Ok(Self { paths })
    }

    pub fn source_kind(&self, path: &str) -> Option<SourceKind> {
        self.paths.get(path).copied()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains_key(path)
    }

    /// Registered path names in ascending order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Engine tuning knobs and path registrations.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Width of the mutation task pool
    pub sync_concurrency: usize,
    /// Width of the validator task pool
    pub validator_concurrency: usize,
    /// Delay before a task that found its key busy is re-queued
    pub retry_backoff: Duration,
    /// Registered collections/record paths
    pub paths: Vec<CollectionOrRecordPathMeta>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_concurrency: 10,
            validator_concurrency: 10,
            retry_backoff: Duration::from_secs(1),
            paths: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<PathRegistry, SyncError> {
        if self.sync_concurrency == 0 {
            return Err(SyncError::InvalidConfig(
                "sync_concurrency must be at least 1".to_string(),
            ));
        }
        if self.validator_concurrency == 0 {
            return Err(SyncError::InvalidConfig(
                "validator_concurrency must be at least 1".to_string(),
            ));
        }
        PathRegistry::new(&self.paths)
    }
}

/// `[engine]` section of the CLI config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub sync_concurrency: usize,
    pub validator_concurrency: usize,
    pub retry_backoff_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        let defaults = EngineConfig::default();
        Self {
            sync_concurrency: defaults.sync_concurrency,
            validator_concurrency: defaults.validator_concurrency,
            retry_backoff_ms: defaults.retry_backoff.as_millis() as u64,
        }
    }
}

/// `[source]` section of the CLI config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceSection {
    /// Project id for document collections
    pub firestore_project: Option<String>,
    /// Override for the document store REST endpoint (e.g. a local emulator)
    pub firestore_base_url: Option<String>,
    /// Base URL of the keyed-tree database
    pub rtdb_url: Option<String>,
    /// Name of the environment variable holding an access token
    pub access_token_env: Option<String>,
}

/// One mirror or audit target.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetSection {
    pub title: String,
    pub url: String,
}

/// Config file consumed by the `mirror-sync` binary.
///
/// ```toml
/// [engine]
/// sync_concurrency = 10
///
/// [source]
/// firestore_project = "my-project"
/// rtdb_url = "https://my-project.firebaseio.com"
/// access_token_env = "MIRROR_SYNC_TOKEN"
///
/// [[mirrors]]
/// title = "main_db"
/// url = "postgresql://postgres@localhost:5432/example1"
///
/// [[audits]]
/// title = "backup_db"
/// url = "postgresql://postgres@localhost:5433/example2"
///
/// [[paths]]
/// path = "person"
/// source = "document-collection"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub mirrors: Vec<TargetSection>,
    #[serde(default)]
    pub audits: Vec<TargetSection>,
    pub paths: Vec<CollectionOrRecordPathMeta>,
}

impl FileConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        Self::parse(&contents).with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: FileConfig = toml::from_str(contents).context("Failed to parse TOML")?;
        config.engine_config().validate()?;
        if config.mirrors.is_empty() && config.audits.is_empty() {
            anyhow::bail!("At least one [[mirrors]] or [[audits]] target is required");
        }
        Ok(config)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            sync_concurrency: self.engine.sync_concurrency,
            validator_concurrency: self.engine.validator_concurrency,
            retry_backoff: Duration::from_millis(self.engine.retry_backoff_ms),
            paths: self.paths.clone(),
        }
    }
}
