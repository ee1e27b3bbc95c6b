use std::time::Duration;

use async_trait::async_trait;
use jobsync_core::{RowFields, RowId, StoredRow};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, info_span, Instrument};

use crate::retry::{with_retry, RetryPolicy};
use crate::{row_title, ConfigError, Filters, RowStore, StoreError};

pub const DEFAULT_BASE_URL: &str = "https://api.baserow.io/api/database/rows/table";
pub const DEFAULT_PAGE_SIZE: usize = 100;

const USER_FIELD_NAMES: [(&str, &str); 1] = [("user_field_names", "true")];
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub api_key: String,
    pub table_id: String,
    pub base_url: String,
    pub retry: RetryPolicy,
    pub page_size: usize,
    /// Pause between listing pages.
    pub page_delay: Duration,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl StoreConfig {
    pub fn new(api_key: impl Into<String>, table_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            table_id: table_id.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            retry: RetryPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
            page_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("BASEROW_API_KEY").ok_or(ConfigError::Missing("BASEROW_API_KEY"))?;
        let table_id = get("BASEROW_TABLE_ID").ok_or(ConfigError::Missing("BASEROW_TABLE_ID"))?;
        let mut config = Self::new(api_key, table_id);

        if let Some(base_url) = get("BASEROW_BASE_URL") {
            config.base_url = base_url;
        }
        config.retry = RetryPolicy::from_lookup(&lookup)?;
        if let Some(raw) = get("JOBSYNC_HTTP_TIMEOUT_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
                key: "JOBSYNC_HTTP_TIMEOUT_SECS",
                value: raw.clone(),
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        config.user_agent = get("JOBSYNC_USER_AGENT");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("BASEROW_API_KEY"));
        }
        if self.table_id.trim().is_empty() {
            return Err(ConfigError::Missing("BASEROW_TABLE_ID"));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "page_size",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RowPage {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<StoredRow>,
}

/// Row-store client for one Baserow table, addressed with user field names.
#[derive(Debug, Clone)]
pub struct BaserowClient {
    http: reqwest::Client,
    config: StoreConfig,
}

impl BaserowClient {
    /// Validates the configuration before building the HTTP client; no
    /// request is made here.
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;

        let mut token = HeaderValue::from_str(&format!("Token {}", config.api_key.trim()))
            .map_err(|_| ConfigError::Invalid {
                key: "BASEROW_API_KEY",
                value: "<redacted>".to_string(),
            })?;
        token.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, token);

        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .default_headers(headers);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let http = builder.build().map_err(|source| StoreError::Request {
            url: config.base_url.clone(),
            source,
        })?;

        info!(
            table_id = %config.table_id,
            base_url = %config.base_url,
            "row store client initialized"
        );
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn table_url(&self) -> String {
        format!(
            "{}/{}/",
            self.config.base_url.trim_end_matches('/'),
            self.config.table_id
        )
    }

    fn row_url(&self, row_id: RowId) -> String {
        format!("{}{}/", self.table_url(), row_id)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &Filters,
        body: Option<&RowFields>,
    ) -> Result<String, StoreError> {
        let label = format!("{method} {url}");
        let http = &self.http;
        let method = &method;
        with_retry(&self.config.retry, &label, move || async move {
            let mut request = http
                .request(method.clone(), url)
                .query(&USER_FIELD_NAMES)
                .query(query);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await.map_err(|source| StoreError::Request {
                url: url.to_string(),
                source,
            })?;
            let status = response.status();
            let text = response.text().await.map_err(|source| StoreError::Request {
                url: url.to_string(),
                source,
            })?;
            if !status.is_success() {
                return Err(StoreError::HttpStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                    body: truncate(&text, ERROR_BODY_LIMIT),
                });
            }
            Ok(text)
        })
        .await
    }
}

fn decode<T: DeserializeOwned>(url: &str, text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(|source| StoreError::Decode {
        url: url.to_string(),
        source,
    })
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

#[async_trait]
impl RowStore for BaserowClient {
    async fn list_all(&self, filters: &Filters) -> Result<Vec<StoredRow>, StoreError> {
        let url = self.table_url();
        let span = info_span!("list_rows", table_id = %self.config.table_id);
        async {
            let mut rows = Vec::new();
            let mut page = 1usize;
            loop {
                let mut query = filters.to_vec();
                query.push(("page".to_string(), page.to_string()));
                query.push(("size".to_string(), self.config.page_size.to_string()));

                let text = self.send(Method::GET, &url, &query, None).await?;
                let body: RowPage = decode(&url, &text)?;
                if body.results.is_empty() {
                    break;
                }
                debug!(page, count = body.results.len(), "fetched page");
                rows.extend(body.results);
                if body.next.is_none() {
                    break;
                }
                page += 1;
                tokio::time::sleep(self.config.page_delay).await;
            }
            info!(rows = rows.len(), "retrieved rows in total");
            Ok::<_, StoreError>(rows)
        }
        .instrument(span)
        .await
    }

    async fn get(&self, row_id: RowId) -> Result<Option<StoredRow>, StoreError> {
        let url = self.row_url(row_id);
        match self.send(Method::GET, &url, &[], None).await {
            Ok(text) => decode(&url, &text).map(Some),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn create(&self, fields: &RowFields) -> Result<StoredRow, StoreError> {
        let url = self.table_url();
        let text = self.send(Method::POST, &url, &[], Some(fields)).await?;
        let row: StoredRow = decode(&url, &text)?;
        info!(row_id = row.id, title = row_title(fields), "row added");
        Ok(row)
    }

    async fn update(&self, row_id: RowId, fields: &RowFields) -> Result<StoredRow, StoreError> {
        let url = self.row_url(row_id);
        let text = match self.send(Method::PATCH, &url, &[], Some(fields)).await {
            Ok(text) => text,
            Err(err) if err.is_not_found() => return Err(StoreError::NotFound { row_id }),
            Err(err) => return Err(err),
        };
        let row: StoredRow = decode(&url, &text)?;
        info!(row_id, fields = ?fields.keys().collect::<Vec<_>>(), "row updated");
        Ok(row)
    }

    async fn delete(&self, row_id: RowId) -> Result<bool, StoreError> {
        let url = self.row_url(row_id);
        match self.send(Method::DELETE, &url, &[], None).await {
            Ok(_) => {
                info!(row_id, "row deleted");
                Ok(true)
            }
            Err(err) if err.is_not_found() => {
                info!(row_id, "row already absent");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}
