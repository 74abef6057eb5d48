// ABOUTME: PostgreSQL audit target - append-only audit_<collection> tables
// ABOUTME: Rows are only removed by retention trimming

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio_postgres::Client;

use super::table_name;
use crate::store::{AuditEntry, AuditRow, AuditStore};
use crate::sync::SyncAction;

/// Audit target backed by one PostgreSQL database.
pub struct PgAuditStore {
    title: String,
    client: Client,
}

impl PgAuditStore {
    pub fn new(title: &str, client: Client) -> Self {
        Self {
            title: title.to_string(),
            client,
        }
    }

    pub async fn connect(title: &str, url: &str) -> Result<Self> {
        let client = super::connect_with_retry(url)
            .await
            .with_context(|| format!("Failed to connect to audit target '{}'", title))?;
        Ok(Self::new(title, client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Audit rows of one item, oldest first.
    pub async fn rows_for_item(&self, collection: &str, item_id: &str) -> Result<Vec<AuditRow>> {
        let table = table_name("audit", collection)?;
        let query = format!(
            "SELECT id, item_id, before_item, after_item, action, recorded_at FROM {} WHERE item_id = $1 ORDER BY id",
            table
        );
        let rows = self
            .client
            .query(&query, &[&item_id])
            .await
            .with_context(|| format!("Failed to read audit rows of '{}' from {}", item_id, table))?;

        rows.iter()
            .map(|row| -> Result<AuditRow> {
                let action: String = row.try_get("action")?;
                Ok(AuditRow {
                    id: row.try_get("id")?,
                    item_id: row.try_get("item_id")?,
                    before_item: row.try_get("before_item")?,
                    after_item: row.try_get("after_item")?,
                    action: SyncAction::parse(&action)
                        .ok_or_else(|| anyhow!("Unknown audit action '{}'", action))?,
                    recorded_at: row.try_get("recorded_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    fn title(&self) -> &str {
        &self.title
    }

    async fn append(&self, collection: &str, entry: &AuditEntry) -> Result<()> {
        let table = table_name("audit", collection)?;
        let query = format!(
            "INSERT INTO {} (item_id, before_item, after_item, action) VALUES ($1, $2, $3, $4)",
            table
        );
        self.client
            .execute(
                &query,
                &[
                    &entry.item_id,
                    &entry.before_item,
                    &entry.after_item,
                    &entry.action.as_str(),
                ],
            )
            .await
            .with_context(|| format!("Failed to append audit row for '{}' to {}", entry.item_id, table))?;
        Ok(())
    }

    async fn delete_older_than(&self, collection: &str, days: u32) -> Result<u64> {
        let table = table_name("audit", collection)?;
        let days = i32::try_from(days).context("Retention window is too large")?;
        let query = format!(
            "DELETE FROM {} WHERE recorded_at < NOW() - ($1::int * INTERVAL '1 day')",
            table
        );
        self.client
            .execute(&query, &[&days])
            .await
            .with_context(|| format!("Failed to trim {}", table))
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        let table = table_name("audit", collection)?;
        tracing::info!("Ensuring audit table {} on '{}'", table, self.title);

        let create_table_sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                item_id TEXT NOT NULL,
                before_item JSONB NOT NULL,
                after_item JSONB NOT NULL,
                action TEXT NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            table
        );
        self.client
            .execute(&create_table_sql, &[])
            .await
            .with_context(|| format!("Failed to create audit table {}", table))?;

        for column in ["item_id", "recorded_at"] {
            let index = crate::utils::quote_ident(&format!("idx_audit_{}_{}", collection, column));
            let create_index_sql = format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                index, table, column
            );
            self.client
                .execute(&create_index_sql, &[])
                .await
                .with_context(|| format!("Failed to create {} index on {}", column, table))?;
        }
        Ok(())
    }
}
