// ABOUTME: PostgreSQL mirror target - one mirror_<collection> table per registered path
// ABOUTME: Rows hold the JSONB payload, the last applied logical clock, and the sweep marker

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio_postgres::{Client, Row};

use super::table_name;
use crate::store::{MirrorRow, MirrorStore};

const ROW_COLUMNS: &str = "id, item, updated_at, last_sync_task_date_ms, sweep_marker";

/// Mirror target backed by one PostgreSQL database.
pub struct PgMirrorStore {
    title: String,
    client: Client,
}

impl PgMirrorStore {
    pub fn new(title: &str, client: Client) -> Self {
        Self {
            title: title.to_string(),
            client,
        }
    }

    /// Connect to `url` (with retries) and wrap the client.
    pub async fn connect(title: &str, url: &str) -> Result<Self> {
        let client = super::connect_with_retry(url)
            .await
            .with_context(|| format!("Failed to connect to mirror target '{}'", title))?;
        Ok(Self::new(title, client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn row_to_mirror_row(row: &Row) -> Result<MirrorRow> {
    Ok(MirrorRow {
        id: row.try_get("id")?,
        item: row.try_get("item")?,
        updated_at: row.try_get("updated_at")?,
        last_sync_task_date_ms: row.try_get("last_sync_task_date_ms")?,
        sweep_marker: row.try_get("sweep_marker")?,
    })
}

#[async_trait]
impl MirrorStore for PgMirrorStore {
    fn title(&self) -> &str {
        &self.title
    }

    async fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<MirrorRow>> {
        let table = table_name("mirror", collection)?;
        let query = format!("SELECT {} FROM {} WHERE id = $1", ROW_COLUMNS, table);
        let row = self
            .client
            .query_opt(&query, &[&id])
            .await
            .with_context(|| format!("Failed to read '{}' from {}", id, table))?;
        row.as_ref().map(row_to_mirror_row).transpose()
    }

    async fn insert(&self, collection: &str, id: &str, item: &Value, clock: i64) -> Result<()> {
        let table = table_name("mirror", collection)?;
        let query = format!(
            "INSERT INTO {} (id, item, updated_at, last_sync_task_date_ms) VALUES ($1, $2, NOW(), $3)",
            table
        );
        self.client
            .execute(&query, &[&id, item, &clock])
            .await
            .with_context(|| format!("Failed to insert '{}' into {}", id, table))?;
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, item: &Value, clock: i64) -> Result<()> {
        let table = table_name("mirror", collection)?;
        let query = format!(
            "UPDATE {} SET item = $2, updated_at = NOW(), last_sync_task_date_ms = $3 WHERE id = $1",
            table
        );
        self.client
            .execute(&query, &[&id, item, &clock])
            .await
            .with_context(|| format!("Failed to update '{}' in {}", id, table))?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<u64> {
        let table = table_name("mirror", collection)?;
        let query = format!("DELETE FROM {} WHERE id = $1", table);
        self.client
            .execute(&query, &[&id])
            .await
            .with_context(|| format!("Failed to delete '{}' from {}", id, table))
    }

    async fn count_all(&self, collection: &str) -> Result<u64> {
        let table = table_name("mirror", collection)?;
        let query = format!("SELECT COUNT(*) FROM {}", table);
        let row = self
            .client
            .query_one(&query, &[])
            .await
            .with_context(|| format!("Failed to count rows of {}", table))?;
        let count: i64 = row.try_get(0)?;
        Ok(count as u64)
    }

    async fn set_all_sweep_markers(&self, collection: &str, value: i64) -> Result<u64> {
        let table = table_name("mirror", collection)?;
        let query = format!("UPDATE {} SET sweep_marker = $1", table);
        self.client
            .execute(&query, &[&value])
            .await
            .with_context(|| format!("Failed to set sweep markers on {}", table))
    }

    async fn clear_sweep_marker(&self, collection: &str, id: &str) -> Result<()> {
        let table = table_name("mirror", collection)?;
        let query = format!("UPDATE {} SET sweep_marker = 0 WHERE id = $1", table);
        self.client
            .execute(&query, &[&id])
            .await
            .with_context(|| format!("Failed to clear sweep marker of '{}' on {}", id, table))?;
        Ok(())
    }

    async fn scan_by_sweep_marker(&self, collection: &str, value: i64) -> Result<Vec<MirrorRow>> {
        let table = table_name("mirror", collection)?;
        let query = format!(
            "SELECT {} FROM {} WHERE sweep_marker = $1 ORDER BY id",
            ROW_COLUMNS, table
        );
        let rows = self
            .client
            .query(&query, &[&value])
            .await
            .with_context(|| format!("Failed to scan {} by sweep marker", table))?;
        rows.iter().map(row_to_mirror_row).collect()
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        let table = table_name("mirror", collection)?;
        tracing::info!("Ensuring mirror table {} on '{}'", table, self.title);

        let create_table_sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                item JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                last_sync_task_date_ms BIGINT NOT NULL DEFAULT 0,
                sweep_marker BIGINT
            )
            "#,
            table
        );
        self.client
            .execute(&create_table_sql, &[])
            .await
            .with_context(|| format!("Failed to create mirror table {}", table))?;

        let index = crate::utils::quote_ident(&format!("idx_mirror_{}_sweep_marker", collection));
        let create_index_sql = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (sweep_marker)",
            index, table
        );
        self.client
            .execute(&create_index_sql, &[])
            .await
            .with_context(|| format!("Failed to create sweep marker index on {}", table))?;
        Ok(())
    }
}
