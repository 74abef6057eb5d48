// ABOUTME: CLI entry point for mirror-sync
// ABOUTME: Wires PostgreSQL targets and the REST source into a SyncEngine and runs one operation

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use mirror_sync::config::FileConfig;
use mirror_sync::postgres::{PgAuditStore, PgMirrorStore};
use mirror_sync::reconcile::{FullValidationOptions, ScanProgress, ValidationIssue};
use mirror_sync::remote::{RestSourceConfig, RestSourceStore};
use mirror_sync::sync::SyncEngine;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mirror-sync")]
#[command(about = "Keep PostgreSQL mirrors consistent with a document store", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the mirror-sync TOML config
    #[arg(long, env = "MIRROR_SYNC_CONFIG", global = true, default_value = "mirror-sync.toml")]
    config: PathBuf,
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(
        long = "allow-self-signed-certs",
        global = true,
        default_value_t = false
    )]
    allow_self_signed_certs: bool,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create mirror_<path> and audit_<path> tables on every target
    EnsureTables,
    /// Run a full mark-and-sweep validation of the mirrors against the source
    Validate {
        /// Paths to validate (comma-separated, defaults to every registered path)
        #[arg(long, value_delimiter = ',')]
        paths: Option<Vec<String>>,
        /// Items checked concurrently; pages hold ten times as many
        #[arg(long, default_value_t = 10)]
        batch_size: usize,
        /// Seconds between progress reports
        #[arg(long, default_value_t = 5)]
        progress_interval: u64,
    },
    /// Delete audit rows older than the retention window
    TrimAudits {
        /// Paths to trim (comma-separated, defaults to every registered path)
        #[arg(long, value_delimiter = ',')]
        paths: Option<Vec<String>>,
        /// Days of audit history to keep
        #[arg(long, default_value_t = 90)]
        days: u32,
    },
    /// Re-derive one item from the source and repair it on one mirror target
    Heal {
        #[arg(long)]
        path: String,
        #[arg(long)]
        id: String,
        /// Mirror target title (defaults to every mirror target)
        #[arg(long)]
        target: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    // 3. Default to "info" if neither are provided
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    mirror_sync::postgres::init_tls_policy(cli.allow_self_signed_certs);

    let config = FileConfig::load(&cli.config)?;
    let engine = build_engine(&config).await?;
    let registered: Vec<String> = config
        .paths
        .iter()
        .map(|p| p.collection_or_record_path.clone())
        .collect();

    match cli.command {
        Commands::EnsureTables => engine.ensure_tables().await,
        Commands::Validate {
            paths,
            batch_size,
            progress_interval,
        } => {
            validate(
                &engine,
                paths.unwrap_or(registered),
                batch_size,
                progress_interval,
            )
            .await
        }
        Commands::TrimAudits { paths, days } => {
            let paths = paths.unwrap_or(registered);
            let result = engine
                .trim_audits(
                    &paths,
                    days,
                    Some(Arc::new(|message: &str| tracing::info!("{}", message))),
                )
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_success() {
                bail!("Audit trim finished with {} error(s)", result.errors.len());
            }
            Ok(())
        }
        Commands::Heal { path, id, target } => heal(&engine, &path, &id, target.as_deref()).await,
    }
}

async fn build_engine(config: &FileConfig) -> anyhow::Result<SyncEngine> {
    let access_token = match &config.source.access_token_env {
        Some(var) => Some(
            std::env::var(var)
                .with_context(|| format!("Environment variable {} is not set", var))?,
        ),
        None => None,
    };
    let source = RestSourceStore::new(RestSourceConfig {
        firestore_project: config.source.firestore_project.clone(),
        firestore_base_url: config.source.firestore_base_url.clone(),
        rtdb_url: config.source.rtdb_url.clone(),
        access_token,
    })?;

    let mut builder = SyncEngine::builder(Arc::new(source)).config(config.engine_config());
    for target in &config.mirrors {
        builder = builder.mirror(Arc::new(PgMirrorStore::connect(&target.title, &target.url).await?));
    }
    for target in &config.audits {
        builder = builder.audit(Arc::new(PgAuditStore::connect(&target.title, &target.url).await?));
    }
    Ok(builder.build()?)
}

async fn validate(
    engine: &SyncEngine,
    paths: Vec<String>,
    batch_size: usize,
    progress_interval: u64,
) -> anyhow::Result<()> {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template("{spinner} [{bar:40}] {percent}% {msg}")
        .context("Invalid progress template")?;
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(200));

    let progress_bar = bar.clone();
    let options = FullValidationOptions::new(paths)
        .batch_size(batch_size)
        .progress_interval(Duration::from_secs(progress_interval.max(1)))
        .on_progress(Arc::new(move |progress: &ScanProgress| {
            progress_bar.set_position(progress.percent().min(100.0) as u64);
            progress_bar.set_message(progress.message());
        }))
        .on_validation_error(Arc::new(|issue: &ValidationIssue| {
            tracing::warn!(
                "{}/{} on '{}': {}",
                issue.collection_or_record_path,
                issue.item_id,
                issue.target,
                issue.state
            );
        }));

    let result = engine.run_full_validation(options).await;
    bar.finish_and_clear();

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.is_finished() {
        bail!(
            "Full validation failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn heal(engine: &SyncEngine, path: &str, id: &str, target: Option<&str>) -> anyhow::Result<()> {
    let titles = engine.mirror_titles();
    let indexes: Vec<usize> = match target {
        Some(title) => {
            let index = titles
                .iter()
                .position(|t| t == title)
                .with_context(|| format!("No mirror target titled '{}'", title))?;
            vec![index]
        }
        None => (0..titles.len()).collect(),
    };

    let clock = chrono::Utc::now().timestamp_millis();
    for index in indexes {
        let state = engine.heal(path, id, clock, index).await;
        println!("{}\t{}", titles[index], state);
    }
    if engine.stats().total_errors > 0 {
        bail!("Heal reported errors; see the log for details");
    }
    Ok(())
}
