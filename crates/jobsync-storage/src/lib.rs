//! Remote row-store access (Baserow REST + in-memory), retry policy and the
//! on-disk scrape archive.

use async_trait::async_trait;
use jobsync_core::{RowFields, RowId, StoredRow};
use thiserror::Error;

mod archive;
mod baserow;
mod memory;
mod retry;

pub use archive::{ArchivedFile, ScrapeArchive};
pub use baserow::{BaserowClient, StoreConfig, DEFAULT_BASE_URL, DEFAULT_PAGE_SIZE};
pub use memory::MemoryRowStore;
pub use retry::{
    classify_reqwest_error, classify_status, with_retry, Retryable, RetryDisposition, RetryPolicy,
};

pub const CRATE_NAME: &str = "jobsync-storage";

/// Query-string filters passed through to the store listing endpoint.
pub type Filters = [(String, String)];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set; it is required to reach the row store")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}: {body}")]
    HttpStatus { status: u16, url: String, body: String },
    #[error("row {row_id} not found")]
    NotFound { row_id: RowId },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("encoding row payload: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("row store rejected {operation}: {reason}")]
    Rejected { operation: &'static str, reason: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::HttpStatus { status: 404, .. }
        )
    }
}

impl Retryable for StoreError {
    fn disposition(&self) -> RetryDisposition {
        match self {
            Self::Request { source, .. } => classify_reqwest_error(source),
            Self::HttpStatus { status, .. } => reqwest::StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(RetryDisposition::NonRetryable),
            _ => RetryDisposition::NonRetryable,
        }
    }
}

/// Paginated CRUD access to one collection of job rows.
///
/// Implementations never swallow a failed operation; batch callers decide
/// whether a single failure is skippable.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Every row matching `filters`, across all pages.
    async fn list_all(&self, filters: &Filters) -> Result<Vec<StoredRow>, StoreError>;

    async fn get(&self, row_id: RowId) -> Result<Option<StoredRow>, StoreError>;

    async fn create(&self, fields: &RowFields) -> Result<StoredRow, StoreError>;

    async fn update(&self, row_id: RowId, fields: &RowFields) -> Result<StoredRow, StoreError>;

    /// `Ok(false)` when the row was already gone.
    async fn delete(&self, row_id: RowId) -> Result<bool, StoreError>;
}

pub(crate) fn row_title(fields: &RowFields) -> &str {
    fields
        .get("job_title")
        .and_then(|v| v.as_str())
        .unwrap_or("No title")
}
