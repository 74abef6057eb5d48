// ABOUTME: PostgreSQL connection helpers and the mirror/audit adapters built on them
// ABOUTME: TLS policy is process-wide and set once at startup

pub mod audit;
pub mod mirror;

pub use audit::PgAuditStore;
pub use mirror::PgMirrorStore;

use anyhow::{Context, Result};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::sync::OnceLock;
use std::time::Duration;
use tokio_postgres::Client;

use crate::utils::{quote_ident, retry_with_backoff, sanitize_url, validate_postgres_identifier};

static ALLOW_SELF_SIGNED_CERTS: OnceLock<bool> = OnceLock::new();

/// Set whether TLS connections accept self-signed certificates.
///
/// Only the first call has an effect.
pub fn init_tls_policy(allow_self_signed: bool) {
    if ALLOW_SELF_SIGNED_CERTS.set(allow_self_signed).is_err() {
        tracing::debug!("TLS policy already initialized, ignoring");
    }
}

fn allow_self_signed_certs() -> bool {
    ALLOW_SELF_SIGNED_CERTS.get().copied().unwrap_or(false)
}

/// Open a connection and drive it on a background task.
pub async fn connect(url: &str) -> Result<Client> {
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(allow_self_signed_certs())
        .build()
        .context("Failed to build TLS connector")?;
    let tls = MakeTlsConnector::new(connector);

    let (client, connection) = tokio_postgres::connect(url, tls)
        .await
        .with_context(|| format!("Failed to connect to {}", sanitize_url(url)))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error: {}", e);
        }
    });

    Ok(client)
}

/// [`connect`] with three retries and exponential backoff starting at one second.
pub async fn connect_with_retry(url: &str) -> Result<Client> {
    retry_with_backoff(|| connect(url), 3, Duration::from_secs(1)).await
}

/// Validated, quoted `<prefix>_<collection>` table name.
pub(crate) fn table_name(prefix: &str, collection: &str) -> Result<String> {
    validate_postgres_identifier(collection)
        .with_context(|| format!("Invalid collection name for {} table", prefix))?;
    Ok(quote_ident(&format!("{}_{}", prefix, collection)))
}
