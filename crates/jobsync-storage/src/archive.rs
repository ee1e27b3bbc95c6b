use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedFile {
    pub path: PathBuf,
    pub content_hash: String,
    pub byte_size: usize,
    /// The same content was already on disk; nothing was written.
    pub deduplicated: bool,
}

/// Local copy of what each scrape produced: the extracted jobs as JSON and,
/// optionally, the raw result pages keyed by content hash.
#[derive(Debug, Clone)]
pub struct ScrapeArchive {
    root: PathBuf,
}

impl ScrapeArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    pub fn jobs_file_name(fetched_at: DateTime<Utc>, suffix: &str) -> String {
        let stamp = fetched_at.format(STAMP_FORMAT);
        let suffix = slug(suffix);
        if suffix.is_empty() {
            format!("extracted_jobs_{stamp}.json")
        } else {
            format!("extracted_jobs_{suffix}_{stamp}.json")
        }
    }

    /// Write `jobs` as pretty JSON. An empty batch writes nothing.
    pub async fn save_jobs<T: Serialize>(
        &self,
        fetched_at: DateTime<Utc>,
        suffix: &str,
        jobs: &[T],
    ) -> anyhow::Result<Option<ArchivedFile>> {
        if jobs.is_empty() {
            warn!(suffix, "no jobs to save");
            return Ok(None);
        }
        let bytes = serde_json::to_vec_pretty(jobs).context("serializing extracted jobs")?;
        let path = self.root.join(Self::jobs_file_name(fetched_at, suffix));
        let archived = write_atomic(&path, &bytes, false).await?;
        info!(count = jobs.len(), path = %archived.path.display(), "saved extracted jobs");
        Ok(Some(archived))
    }

    /// Keep a raw results page under `pages/<stamp>/<query>/p<page>_<hash>.html`.
    pub async fn save_page(
        &self,
        fetched_at: DateTime<Utc>,
        query: &str,
        page: u32,
        html: &str,
    ) -> anyhow::Result<ArchivedFile> {
        let hash = Self::sha256_hex(html.as_bytes());
        let query = match slug(query) {
            q if q.is_empty() => "all".to_string(),
            q => q,
        };
        let path = self
            .root
            .join("pages")
            .join(fetched_at.format(STAMP_FORMAT).to_string())
            .join(query)
            .join(format!("p{page}_{}.html", &hash[..16]));
        write_atomic(&path, html.as_bytes(), true).await
    }
}

fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

// Temp file + rename so readers never see a partial file.
async fn write_atomic(
    path: &Path,
    bytes: &[u8],
    skip_existing: bool,
) -> anyhow::Result<ArchivedFile> {
    let content_hash = ScrapeArchive::sha256_hex(bytes);
    let archived = |deduplicated| ArchivedFile {
        path: path.to_path_buf(),
        content_hash: content_hash.clone(),
        byte_size: bytes.len(),
        deduplicated,
    };

    let parent = path
        .parent()
        .with_context(|| format!("archive path {} has no parent", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating archive directory {}", parent.display()))?;

    if skip_existing
        && fs::try_exists(path)
            .await
            .with_context(|| format!("checking archive path {}", path.display()))?
    {
        return Ok(archived(true));
    }

    let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!("renaming {} -> {}", temp_path.display(), path.display())
        });
    }
    Ok(archived(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn fetched_at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-15T08:30:05Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn hashing_is_stable() {
        assert_eq!(
            ScrapeArchive::sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn jobs_file_names_carry_suffix_and_stamp() {
        assert_eq!(
            ScrapeArchive::jobs_file_name(fetched_at(), "Web Scraping"),
            "extracted_jobs_web_scraping_20260315_083005.json"
        );
        assert_eq!(
            ScrapeArchive::jobs_file_name(fetched_at(), ""),
            "extracted_jobs_20260315_083005.json"
        );
    }

    #[tokio::test]
    async fn saves_jobs_as_json_and_skips_empty_batches() {
        let dir = tempdir().unwrap();
        let archive = ScrapeArchive::new(dir.path());

        let none = archive
            .save_jobs::<serde_json::Value>(fetched_at(), "empty", &[])
            .await
            .unwrap();
        assert!(none.is_none());

        let jobs = vec![json!({"job_uid": "1", "job_title": "A"})];
        let saved = archive.save_jobs(fetched_at(), "python", &jobs).await.unwrap().unwrap();
        let body = std::fs::read_to_string(&saved.path).unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed, jobs);
        assert!(!saved.deduplicated);
    }

    #[tokio::test]
    async fn identical_pages_are_written_once() {
        let dir = tempdir().unwrap();
        let archive = ScrapeArchive::new(dir.path());

        let first = archive
            .save_page(fetched_at(), "rust", 1, "<html>same</html>")
            .await
            .unwrap();
        let second = archive
            .save_page(fetched_at(), "rust", 1, "<html>same</html>")
            .await
            .unwrap();
        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.path, second.path);
        assert!(first.path.exists());
    }
}
