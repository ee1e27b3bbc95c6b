use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobsync_storage::{with_retry, RetryPolicy};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::search::SearchRequest;
use crate::session::{AuthenticatedSession, CookieFileSession};
use crate::AdapterError;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// One fetched results page, kept verbatim for parsing and archiving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub page: u32,
    pub html: String,
    pub fetched_at: DateTime<Utc>,
}

/// Where search result pages come from.
#[async_trait]
pub trait JobSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// Pages `1..=max_pages` for `search`. A page that cannot be fetched is
    /// logged and skipped; only setup failures are errors.
    async fn fetch_pages(
        &self,
        search: &SearchRequest,
        max_pages: u32,
    ) -> Result<Vec<FetchedPage>, AdapterError>;
}

#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub page_delay: Duration,
    pub user_agent: String,
    /// Overrides the marketplace search endpoint.
    pub search_url: Option<String>,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(40),
            page_delay: Duration::from_secs(2),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            search_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpJobSource {
    http: reqwest::Client,
    config: HttpSourceConfig,
}

impl HttpJobSource {
    pub fn new(
        session: &AuthenticatedSession,
        config: HttpSourceConfig,
    ) -> Result<Self, AdapterError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"));
        let mut cookie = HeaderValue::from_str(&session.cookie_header()).map_err(|e| {
            AdapterError::Message(format!("cookie header is not valid ascii: {e}"))
        })?;
        cookie.set_sensitive(true);
        headers.insert(COOKIE, cookie);

        let http = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|source| AdapterError::Request {
                url: "<client setup>".to_string(),
                source,
            })?;
        Ok(Self { http, config })
    }

    /// Validates the cookie export first; a stale or incomplete file is an
    /// [`AdapterError::Session`].
    pub fn from_cookie_file(
        cookies: &CookieFileSession,
        config: HttpSourceConfig,
    ) -> Result<Self, AdapterError> {
        let session = cookies.load_if_valid()?;
        info!(cookies = session.cookies.len(), "using cookies for requests");
        Self::new(&session, config)
    }

    async fn fetch_one(&self, url: &str) -> Result<String, AdapterError> {
        let http = &self.http;
        with_retry(&self.config.retry, url, move || async move {
            let response = http.get(url).send().await.map_err(|source| AdapterError::Request {
                url: url.to_string(),
                source,
            })?;
            let status = response.status();
            if !status.is_success() {
                return Err(AdapterError::HttpStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }
            response.text().await.map_err(|source| AdapterError::Request {
                url: url.to_string(),
                source,
            })
        })
        .await
    }
}

#[async_trait]
impl JobSource for HttpJobSource {
    fn source_id(&self) -> &'static str {
        "http"
    }

    async fn fetch_pages(
        &self,
        search: &SearchRequest,
        max_pages: u32,
    ) -> Result<Vec<FetchedPage>, AdapterError> {
        let span = info_span!("fetch_pages", query = %search.query, max_pages);
        async {
            let mut pages = Vec::new();
            for page in 1..=max_pages {
                let url = match &self.config.search_url {
                    Some(base) => search.page_url_from(base, page)?,
                    None => search.page_url(page)?,
                };
                info!(page, url = %url, "scraping page");
                match self.fetch_one(url.as_str()).await {
                    Ok(html) => pages.push(FetchedPage {
                        url: url.to_string(),
                        page,
                        html,
                        fetched_at: Utc::now(),
                    }),
                    Err(err) => warn!(page, error = %err, "page fetch failed; skipping"),
                }
                if page < max_pages {
                    tokio::time::sleep(self.config.page_delay).await;
                }
            }
            Ok::<_, AdapterError>(pages)
        }
        .instrument(span)
        .await
    }
}

/// Saved result pages on disk: `<dir>/<query_slug>/page_<n>.html`, falling
/// back to `<dir>/page_<n>.html`.
#[derive(Debug, Clone)]
pub struct FixtureJobSource {
    dir: PathBuf,
}

impl FixtureJobSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn candidates(&self, search: &SearchRequest, page: u32) -> [PathBuf; 2] {
        let file = format!("page_{page}.html");
        [self.dir.join(query_slug(&search.query)).join(&file), self.dir.join(file)]
    }
}

pub fn query_slug(query: &str) -> String {
    query
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

#[async_trait]
impl JobSource for FixtureJobSource {
    fn source_id(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_pages(
        &self,
        search: &SearchRequest,
        max_pages: u32,
    ) -> Result<Vec<FetchedPage>, AdapterError> {
        let mut pages = Vec::new();
        for page in 1..=max_pages {
            let mut found = None;
            for path in self.candidates(search, page) {
                match tokio::fs::read_to_string(&path).await {
                    Ok(html) => {
                        found = Some((path, html));
                        break;
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(source) => return Err(AdapterError::Io { path, source }),
                }
            }
            let Some((path, html)) = found else {
                debug!(page, query = %search.query, "no fixture page; stopping");
                break;
            };
            pages.push(FetchedPage {
                url: path.display().to_string(),
                page,
                html,
                fetched_at: Utc::now(),
            });
        }
        info!(query = %search.query, pages = pages.len(), "loaded fixture pages");
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn query_slugs_are_filesystem_safe() {
        assert_eq!(query_slug("Web Scraping"), "web_scraping");
        assert_eq!(query_slug("  c++ / rust "), "c_rust");
    }

    #[tokio::test]
    async fn fixture_pages_prefer_query_directory_and_stop_at_gap() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("rust")).unwrap();
        std::fs::write(dir.path().join("rust/page_1.html"), "<p>rust 1</p>").unwrap();
        std::fs::write(dir.path().join("page_1.html"), "<p>shared 1</p>").unwrap();
        std::fs::write(dir.path().join("page_2.html"), "<p>shared 2</p>").unwrap();

        let source = FixtureJobSource::new(dir.path());
        let pages = source.fetch_pages(&SearchRequest::new("rust"), 5).await.unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].html, "<p>rust 1</p>");
        assert_eq!(pages[1].html, "<p>shared 2</p>");
        assert_eq!(pages[1].page, 2);
    }

    #[test]
    fn http_source_rejects_unencodable_cookies() {
        let session = AuthenticatedSession {
            cookies: vec![crate::Cookie {
                name: "visitor_id".into(),
                value: "bad\nvalue".into(),
                domain: None,
                path: None,
                expiry: None,
            }],
            freshly_logged_in: false,
        };
        assert!(HttpJobSource::new(&session, HttpSourceConfig::default()).is_err());
    }

    #[test]
    fn http_source_needs_a_usable_cookie_file() {
        let dir = tempdir().unwrap();
        let missing = CookieFileSession::new(dir.path().join("cookies.json"), 7);
        let err =
            HttpJobSource::from_cookie_file(&missing, HttpSourceConfig::default()).unwrap_err();
        assert!(matches!(err, AdapterError::Session(crate::SessionError::NotFound { .. })));

        let path = dir.path().join("fresh.json");
        std::fs::write(&path, r#"[{"name": "visitor_id", "value": "v", "path": "/"}]"#).unwrap();
        let fresh = CookieFileSession::new(path, 7);
        assert!(HttpJobSource::from_cookie_file(&fresh, HttpSourceConfig::default()).is_ok());
    }
}
