use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use jobsync_adapters::{FixtureJobSource, SearchRequest};
use jobsync_core::JobStatus;
use jobsync_storage::{MemoryRowStore, RowStore, ScrapeArchive};
use jobsync_sync::{SyncConfig, SyncOptions, SyncPipeline};
use serde_json::json;
use tempfile::tempdir;

fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/search")
}

fn config() -> SyncConfig {
    SyncConfig {
        pacing: Duration::ZERO,
        ..SyncConfig::default()
    }
}

#[tokio::test]
async fn repeated_runs_upload_each_job_once() {
    let out = tempdir().unwrap();
    let store = Arc::new(MemoryRowStore::new());
    let pipeline = SyncPipeline::new(
        Box::new(FixtureJobSource::new(fixture_dir())),
        store.clone(),
        &config(),
    )
    .with_archive(ScrapeArchive::new(out.path()));
    let options = SyncOptions {
        searches: vec![SearchRequest::new("web scraping")],
        max_pages: 3,
        days_to_keep: Some(30),
    };

    let first = pipeline.run_once(&options).await.expect("first run");
    assert_eq!(first.pages, 2);
    assert_eq!(first.scraped, 3);
    assert_eq!(first.normalized, 3);
    assert_eq!(first.uploaded, 3);
    assert_eq!(first.deleted, 0);
    assert_eq!(first.archived_files.len(), 1);
    assert!(first.finished_at >= first.started_at);

    let rows = store.list_all(&[]).await.unwrap();
    assert_eq!(rows.len(), 3);
    let low = rows
        .iter()
        .find(|r| r.text("job_uid").as_deref() == Some("1903000000000000002"))
        .expect("second job stored");
    assert_eq!(low.status, Some(JobStatus::LowRating));

    let second = pipeline.run_once(&options).await.expect("second run");
    assert_eq!(second.scraped, 3);
    assert_eq!(second.uploaded, 0);
    assert_eq!(store.len().await, 3);
    assert_ne!(first.run_id, second.run_id);
    assert!(out.path().join("pages").is_dir());
}

#[tokio::test]
async fn empty_scrape_leaves_old_rows_alone() {
    let empty = tempdir().unwrap();
    let store = Arc::new(MemoryRowStore::seeded([
        json!({"id": 1, "job_title": "Old", "created_on": "2001-01-01T00:00:00Z"}),
    ]));
    let pipeline = SyncPipeline::new(
        Box::new(FixtureJobSource::new(empty.path())),
        store.clone(),
        &config(),
    );
    let summary = pipeline
        .run_once(&SyncOptions::default())
        .await
        .expect("run");
    assert_eq!(summary.scraped, 0);
    assert_eq!(summary.uploaded, 0);
    assert_eq!(summary.deleted, 0);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn successful_scrape_sweeps_old_rows() {
    let store = Arc::new(MemoryRowStore::seeded([
        json!({"id": 90, "job_title": "Old", "created_on": "2001-01-01T00:00:00Z"}),
    ]));
    let pipeline = SyncPipeline::new(
        Box::new(FixtureJobSource::new(fixture_dir())),
        store.clone(),
        &config(),
    );
    let summary = pipeline
        .run_once(&SyncOptions {
            searches: vec![SearchRequest::new("web scraping")],
            max_pages: 1,
            days_to_keep: Some(30),
        })
        .await
        .expect("run");
    assert_eq!(summary.uploaded, 2);
    assert_eq!(summary.deleted, 1);
    assert!(store.get(90).await.unwrap().is_none());
    assert_eq!(store.len().await, 2);
}
