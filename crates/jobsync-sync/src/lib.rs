//! Sync orchestration: scrape, archive, normalize, deduplicated upload and
//! retention, plus the maintenance passes run on their own.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jobsync_adapters::{
    parse_job_tiles, query_slug, CookieFileSession, HttpJobSource, HttpSourceConfig, JobSource,
    SearchRequest, DEFAULT_COOKIES_FILE, DEFAULT_COOKIE_MAX_AGE_DAYS, DEFAULT_USER_AGENT,
};
use jobsync_core::RawJobRecord;
use jobsync_storage::{ConfigError, RetryPolicy, RowStore, ScrapeArchive};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod dedup;
pub mod ingest;
pub mod retention;
pub mod similarity;

pub use dedup::{keys_match, DedupConfig, DeduplicationEngine, KeyParse, DEFAULT_DEDUP_FIELD};
pub use ingest::{classify_status, parse_rating, IngestionPipeline};
pub use retention::{RetentionSweeper, DEFAULT_DATE_FIELD};
pub use similarity::{similarity_key, SimilarityGrouper, KEY_SEPARATOR};

pub const CRATE_NAME: &str = "jobsync-sync";

pub const DEFAULT_QUERY: &str = "web scraping";
pub const DEFAULT_MAX_PAGES: u32 = 1;
pub const DEFAULT_DAYS_TO_KEEP: u32 = 30;
pub const SEARCHES_FILE: &str = "searches.yaml";

/// Saved searches, read from `searches.yaml` under the workspace root.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRegistry {
    #[serde(default)]
    pub searches: Vec<SearchRequest>,
}

impl SearchRegistry {
    /// `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let registry: Self =
            serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(registry))
    }
}

/// Explicit `--query` values win, then `searches.yaml`, then the default query.
pub fn resolve_searches(queries: &[String], workspace_root: &Path) -> Result<Vec<SearchRequest>> {
    let explicit = queries
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .map(SearchRequest::new)
        .collect::<Vec<_>>();
    if !explicit.is_empty() {
        return Ok(explicit);
    }
    let registry_path = workspace_root.join(SEARCHES_FILE);
    if let Some(registry) = SearchRegistry::load(&registry_path)? {
        if !registry.searches.is_empty() {
            info!(
                path = %registry_path.display(),
                count = registry.searches.len(),
                "using saved searches"
            );
            return Ok(registry.searches);
        }
    }
    Ok(vec![SearchRequest::new(DEFAULT_QUERY)])
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub workspace_root: PathBuf,
    pub output_dir: PathBuf,
    pub cookies_file: PathBuf,
    pub cookie_max_age_days: u64,
    pub http: HttpSourceConfig,
    /// Pause between row-store writes.
    pub pacing: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            output_dir: PathBuf::from("jobs"),
            cookies_file: PathBuf::from(DEFAULT_COOKIES_FILE),
            cookie_max_age_days: DEFAULT_COOKIE_MAX_AGE_DAYS,
            http: HttpSourceConfig::default(),
            pacing: Duration::from_millis(500),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(root) = get("JOBSYNC_WORKSPACE_ROOT") {
            config.workspace_root = PathBuf::from(root);
        }
        config.output_dir = get("JOBSYNC_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| config.workspace_root.join("jobs"));
        config.cookies_file = get("JOBSYNC_COOKIES_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| config.workspace_root.join(DEFAULT_COOKIES_FILE));
        if let Some(raw) = get("JOBSYNC_COOKIE_MAX_AGE_DAYS") {
            config.cookie_max_age_days = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "JOBSYNC_COOKIE_MAX_AGE_DAYS",
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = get("JOBSYNC_HTTP_TIMEOUT_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
                key: "JOBSYNC_HTTP_TIMEOUT_SECS",
                value: raw.clone(),
            })?;
            config.http.timeout = Duration::from_secs(secs);
        }
        config.http.retry = RetryPolicy::from_lookup(&lookup)?;
        config.http.user_agent =
            get("JOBSYNC_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        Ok(config)
    }

    pub fn cookie_session(&self) -> CookieFileSession {
        CookieFileSession::new(self.cookies_file.clone(), self.cookie_max_age_days)
    }

    /// Validates the cookie export and builds the authenticated HTTP source.
    pub fn http_source(&self) -> Result<HttpJobSource> {
        HttpJobSource::from_cookie_file(&self.cookie_session(), self.http.clone())
            .context("no usable marketplace session; export fresh cookies and retry")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub searches: Vec<SearchRequest>,
    pub max_pages: u32,
    /// Retention sweep after an upload; `None` skips it. A run that scraped
    /// nothing never sweeps.
    pub days_to_keep: Option<u32>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            searches: vec![SearchRequest::new(DEFAULT_QUERY)],
            max_pages: DEFAULT_MAX_PAGES,
            days_to_keep: Some(DEFAULT_DAYS_TO_KEEP),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub searches: usize,
    pub pages: usize,
    pub scraped: usize,
    pub normalized: usize,
    pub uploaded: usize,
    pub deleted: usize,
    pub archived_files: Vec<String>,
}

pub struct SyncPipeline {
    source: Box<dyn JobSource>,
    archive: Option<ScrapeArchive>,
    ingest: IngestionPipeline,
    dedup: DeduplicationEngine,
    retention: RetentionSweeper,
}

impl SyncPipeline {
    pub fn new(source: Box<dyn JobSource>, store: Arc<dyn RowStore>, config: &SyncConfig) -> Self {
        Self {
            source,
            archive: None,
            ingest: IngestionPipeline::new(),
            dedup: DeduplicationEngine::new(
                store.clone(),
                DedupConfig {
                    pacing: config.pacing,
                    ..DedupConfig::default()
                },
            ),
            retention: RetentionSweeper::new(store, config.pacing),
        }
    }

    pub fn with_archive(mut self, archive: ScrapeArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    async fn scrape(
        &self,
        search: &SearchRequest,
        max_pages: u32,
        summary: &mut SyncRunSummary,
    ) -> Result<Vec<RawJobRecord>> {
        let pages = self
            .source
            .fetch_pages(search, max_pages)
            .await
            .with_context(|| format!("fetching pages for {:?}", search.query))?;
        summary.pages += pages.len();

        let mut jobs = Vec::new();
        for page in &pages {
            if let Some(archive) = &self.archive {
                if let Err(err) = archive
                    .save_page(page.fetched_at, &search.query, page.page, &page.html)
                    .await
                {
                    warn!(page = page.page, error = %format!("{err:#}"), "could not archive page");
                }
            }
            match parse_job_tiles(&page.html) {
                Ok(found) => {
                    info!(page = page.page, jobs = found.len(), "extracted job entries");
                    jobs.extend(found);
                }
                Err(err) => warn!(page = page.page, error = %err, "failed to parse job data"),
            }
        }

        if let Some(archive) = &self.archive {
            match archive.save_jobs(Utc::now(), &query_slug(&search.query), &jobs).await {
                Ok(Some(file)) => summary.archived_files.push(file.path.display().to_string()),
                Ok(None) => {}
                Err(err) => warn!(error = %format!("{err:#}"), "could not archive extracted jobs"),
            }
        }
        Ok(jobs)
    }

    pub async fn run_once(&self, options: &SyncOptions) -> Result<SyncRunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, source = self.source.source_id());
        async {
            let mut summary = SyncRunSummary {
                run_id,
                started_at: Utc::now(),
                finished_at: Utc::now(),
                searches: options.searches.len(),
                pages: 0,
                scraped: 0,
                normalized: 0,
                uploaded: 0,
                deleted: 0,
                archived_files: Vec::new(),
            };

            let mut raw = Vec::new();
            for search in &options.searches {
                info!(query = %search.query, max_pages = options.max_pages, "scraping search");
                raw.extend(self.scrape(search, options.max_pages, &mut summary).await?);
            }
            summary.scraped = raw.len();

            if raw.is_empty() {
                warn!("no jobs found during scraping; skipping upload and cleanup");
            } else {
                info!(jobs = raw.len(), "scraped jobs");
                let normalized = self.ingest.normalize(&raw);
                summary.normalized = normalized.len();
                let created = self
                    .dedup
                    .upload(&normalized)
                    .await
                    .context("uploading jobs to the row store")?;
                summary.uploaded = created.len();

                if let Some(days) = options.days_to_keep {
                    summary.deleted = self
                        .retention
                        .clean_up_old_rows(days, DEFAULT_DATE_FIELD)
                        .await
                        .context("cleaning up old rows")?;
                }
            }

            summary.finished_at = Utc::now();
            info!(
                scraped = summary.scraped,
                uploaded = summary.uploaded,
                deleted = summary.deleted,
                "sync run complete"
            );
            Ok::<_, anyhow::Error>(summary)
        }
        .instrument(span)
        .await
    }
}
