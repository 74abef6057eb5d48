// ABOUTME: REST client reading the authoritative source store
// ABOUTME: Document collections go through the Firestore REST API, keyed trees through the Realtime Database REST API

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;

use super::models::{compare_rtdb_keys, run_query_body, FirestoreDocument, RunQueryResponse};
use crate::config::SourceKind;
use crate::store::{SourceItem, SourcePage, SourceStore};

const DEFAULT_FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com";

/// Where to find each kind of source.
#[derive(Debug, Clone, Default)]
pub struct RestSourceConfig {
    pub firestore_project: Option<String>,
    /// Overrides the public endpoint, e.g. `http://localhost:8080` for an emulator
    pub firestore_base_url: Option<String>,
    pub rtdb_url: Option<String>,
    pub access_token: Option<String>,
}

pub struct RestSourceStore {
    client: Client,
    config: RestSourceConfig,
}

impl RestSourceStore {
    pub fn new(config: RestSourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    fn documents_root(&self) -> Result<(String, String)> {
        let project = self.config.firestore_project.as_deref().context(
            "No firestore_project configured; document collections cannot be read",
        )?;
        let base = self
            .config
            .firestore_base_url
            .as_deref()
            .unwrap_or(DEFAULT_FIRESTORE_BASE_URL)
            .trim_end_matches('/');
        let name = format!("projects/{}/databases/(default)/documents", project);
        Ok((format!("{}/v1/{}", base, name), name))
    }

    fn rtdb_root(&self) -> Result<&str> {
        let url = self
            .config
            .rtdb_url
            .as_deref()
            .context("No rtdb_url configured; keyed trees cannot be read")?;
        Ok(url.trim_end_matches('/'))
    }

    fn with_bearer(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn with_access_token(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.access_token {
            Some(token) => request.query(&[("access_token", token.as_str())]),
            None => request,
        }
    }

    async fn get_document(&self, path: &str, id: &str) -> Result<Option<Value>> {
        let (root, _) = self.documents_root()?;
        let url = format!("{}/{}/{}", root, path, id);
        let response = self
            .with_bearer(self.client.get(&url))
            .send()
            .await
            .with_context(|| format!("Failed to fetch document {}/{}", path, id))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Fetching document {}/{} failed with status {}: {}", path, id, status, body);
        }

        let document: FirestoreDocument = response
            .json()
            .await
            .context("Failed to parse document response")?;
        document.to_json().map(Some)
    }

    async fn scan_documents(
        &self,
        path: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<SourcePage> {
        let (root, name) = self.documents_root()?;
        let cursor_name = cursor.map(|id| format!("{}/{}/{}", name, path, id));
        let body = run_query_body(path, cursor_name.as_deref(), page_size);

        let response = self
            .with_bearer(self.client.post(format!("{}:runQuery", root)).json(&body))
            .send()
            .await
            .with_context(|| format!("Failed to query collection '{}'", path))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Querying collection '{}' failed with status {}: {}", path, status, body);
        }

        let results: Vec<RunQueryResponse> = response
            .json()
            .await
            .context("Failed to parse runQuery response")?;

        let mut items = Vec::with_capacity(results.len());
        for document in results.into_iter().filter_map(|r| r.document) {
            items.push(SourceItem {
                id: document.id().to_string(),
                item: document.to_json()?,
            });
        }
        Ok(page_from(items, page_size))
    }

    async fn get_node(&self, path: &str, id: &str) -> Result<Option<Value>> {
        let url = format!("{}/{}/{}.json", self.rtdb_root()?, path, id);
        let response = self
            .with_access_token(self.client.get(&url))
            .send()
            .await
            .with_context(|| format!("Failed to fetch node {}/{}", path, id))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Fetching node {}/{} failed with status {}: {}", path, id, status, body);
        }

        let value: Value = response
            .json()
            .await
            .context("Failed to parse node response")?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn scan_nodes(
        &self,
        path: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<SourcePage> {
        let url = format!("{}/{}.json", self.rtdb_root()?, path);
        // startAt is inclusive, so fetch one extra child and drop the cursor itself
        let limit = if cursor.is_some() { page_size + 1 } else { page_size };

        let mut query: Vec<(&str, String)> = vec![
            ("orderBy", "\"$key\"".to_string()),
            ("limitToFirst", limit.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("startAt", Value::String(cursor.to_string()).to_string()));
        }

        let response = self
            .with_access_token(self.client.get(&url).query(&query))
            .send()
            .await
            .with_context(|| format!("Failed to query record path '{}'", path))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Querying record path '{}' failed with status {}: {}", path, status, body);
        }

        let value: Value = response
            .json()
            .await
            .context("Failed to parse record path response")?;
        let mut items: Vec<SourceItem> = match value {
            Value::Object(children) => children
                .into_iter()
                .filter(|(key, _)| Some(key.as_str()) != cursor)
                .map(|(id, item)| SourceItem { id, item })
                .collect(),
            Value::Null => Vec::new(),
            other => bail!("Record path '{}' is not a keyed tree: {}", path, other),
        };
        items.sort_by(|a, b| compare_rtdb_keys(&a.id, &b.id));
        items.truncate(page_size);
        Ok(page_from(items, page_size))
    }
}

fn page_from(items: Vec<SourceItem>, page_size: usize) -> SourcePage {
    SourcePage {
        next_cursor: items.last().map(|i| i.id.clone()),
        is_last_page: items.len() < page_size,
        items,
    }
}

#[async_trait]
impl SourceStore for RestSourceStore {
    async fn get_by_id(&self, kind: SourceKind, path: &str, id: &str) -> Result<Option<Value>> {
        match kind {
            SourceKind::DocumentCollection => self.get_document(path, id).await,
            SourceKind::KeyedTree => self.get_node(path, id).await,
        }
    }

    async fn scan_ordered(
        &self,
        kind: SourceKind,
        path: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<SourcePage> {
        match kind {
            SourceKind::DocumentCollection => self.scan_documents(path, cursor, page_size).await,
            SourceKind::KeyedTree => self.scan_nodes(path, cursor, page_size).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documents_root_uses_override() {
        let store = RestSourceStore::new(RestSourceConfig {
            firestore_project: Some("demo".to_string()),
            firestore_base_url: Some("http://localhost:8080/".to_string()),
            ..RestSourceConfig::default()
        })
        .unwrap();
        let (root, name) = store.documents_root().unwrap();
        assert_eq!(
            root,
            "http://localhost:8080/v1/projects/demo/databases/(default)/documents"
        );
        assert_eq!(name, "projects/demo/databases/(default)/documents");
    }

    #[test]
    fn test_missing_endpoints_are_reported() {
        let store = RestSourceStore::new(RestSourceConfig::default()).unwrap();
        assert!(store.documents_root().is_err());
        assert!(store.rtdb_root().is_err());
    }

    #[test]
    fn test_short_page_is_last() {
        let items = vec![SourceItem {
            id: "a".to_string(),
            item: Value::Null,
        }];
        let page = page_from(items, 2);
        assert!(page.is_last_page);
        assert_eq!(page.next_cursor.as_deref(), Some("a"));
    }
}
