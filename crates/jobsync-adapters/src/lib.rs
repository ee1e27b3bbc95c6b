//! Marketplace search scraping: cookie session, search URLs, page sources
//! and job-tile extraction.

use std::path::PathBuf;

use jobsync_storage::{classify_reqwest_error, classify_status, RetryDisposition, Retryable};
use thiserror::Error;

mod search;
mod session;
mod source;
mod tiles;

pub use search::{SearchRequest, DEFAULT_CLIENT_HIRES, SEARCH_URL};
pub use session::{
    AuthenticatedSession, Cookie, CookieFileSession, SessionError, DEFAULT_COOKIES_FILE,
    DEFAULT_COOKIE_MAX_AGE_DAYS, ESSENTIAL_COOKIES,
};
pub use source::{
    query_slug, FetchedPage, FixtureJobSource, HttpJobSource, HttpSourceConfig, JobSource,
    DEFAULT_USER_AGENT,
};
pub use tiles::{parse_job_tiles, SITE_ROOT};

pub const CRATE_NAME: &str = "jobsync-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("invalid selector {selector:?}: {reason}")]
    Selector { selector: &'static str, reason: String },
    #[error("invalid url {url:?}: {reason}")]
    Url { url: String, reason: String },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl Retryable for AdapterError {
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
