use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use jobsync_adapters::{FixtureJobSource, JobSource};
use jobsync_core::StoredRow;
use jobsync_storage::{BaserowClient, MemoryRowStore, RowStore, ScrapeArchive, StoreConfig};
use jobsync_sync::{
    resolve_searches, DedupConfig, DeduplicationEngine, RetentionSweeper, SimilarityGrouper,
    SyncConfig, SyncOptions, SyncPipeline, DEFAULT_DATE_FIELD, DEFAULT_DAYS_TO_KEEP,
    DEFAULT_MAX_PAGES,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "jobsync")]
#[command(about = "Scrape job listings and keep a remote table free of duplicates")]
struct Cli {
    /// Overrides RUST_LOG, e.g. `debug` or `jobsync_sync=trace`.
    #[arg(long, global = true, env = "JOBSYNC_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scrape, upload new jobs and sweep old rows.
    Sync(SyncArgs),
    /// Report, delete or tag duplicate rows.
    Duplicates(DuplicateArgs),
    /// Delete rows older than the retention window.
    Cleanup(CleanupArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScraperKind {
    Http,
    Fixture,
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// Search query; repeat for several. Falls back to searches.yaml.
    #[arg(long = "query")]
    queries: Vec<String>,

    #[arg(long, value_enum, default_value_t = ScraperKind::Http)]
    scraper: ScraperKind,

    /// Saved result pages for `--scraper fixture`.
    #[arg(long, default_value = "fixtures/search")]
    fixture_dir: PathBuf,

    #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
    max_pages: u32,

    /// 0 skips the retention sweep.
    #[arg(long, default_value_t = DEFAULT_DAYS_TO_KEEP)]
    days_to_keep: u32,

    /// Upload into an in-memory table instead of the remote one.
    #[arg(long)]
    dry_run: bool,
}

impl Default for SyncArgs {
    fn default() -> Self {
        Self {
            queries: Vec::new(),
            scraper: ScraperKind::Http,
            fixture_dir: PathBuf::from("fixtures/search"),
            max_pages: DEFAULT_MAX_PAGES,
            days_to_keep: DEFAULT_DAYS_TO_KEEP,
            dry_run: false,
        }
    }
}

#[derive(Debug, Args)]
struct DuplicateArgs {
    /// List rows sharing a job uid.
    #[arg(long)]
    find_duplicates: bool,

    /// Delete all but one row per job uid.
    #[arg(long)]
    delete: bool,

    /// With --delete, keep the oldest row instead of the newest.
    #[arg(long)]
    keep_oldest: bool,

    /// Tag rows with the same title, location and skills as duplicates.
    /// Without it those groups are only listed.
    #[arg(long)]
    update_similar_jobs: bool,
}

#[derive(Debug, Args)]
struct CleanupArgs {
    #[arg(long, default_value_t = DEFAULT_DAYS_TO_KEEP)]
    days_to_keep: u32,

    #[arg(long, default_value = DEFAULT_DATE_FIELD)]
    date_field: String,
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn remote_store() -> Result<Arc<dyn RowStore>> {
    let config = StoreConfig::from_env().context("row store configuration")?;
    Ok(Arc::new(BaserowClient::new(config)?))
}

async fn run_sync(args: SyncArgs) -> Result<()> {
    let config = SyncConfig::from_env().context("sync configuration")?;
    let searches = resolve_searches(&args.queries, &config.workspace_root)?;

    let source: Box<dyn JobSource> = match args.scraper {
        ScraperKind::Http => Box::new(config.http_source()?),
        ScraperKind::Fixture => Box::new(FixtureJobSource::new(args.fixture_dir.clone())),
    };
    let store: Arc<dyn RowStore> = if args.dry_run {
        info!("dry run; uploading into an in-memory table");
        Arc::new(MemoryRowStore::new())
    } else {
        remote_store()?
    };

    let pipeline = SyncPipeline::new(source, store, &config)
        .with_archive(ScrapeArchive::new(config.output_dir.clone()));
    let options = SyncOptions {
        searches,
        max_pages: args.max_pages,
        days_to_keep: (args.days_to_keep > 0).then_some(args.days_to_keep),
    };
    let summary = pipeline.run_once(&options).await?;
    println!(
        "sync complete: run_id={} searches={} pages={} scraped={} uploaded={} deleted={}",
        summary.run_id,
        summary.searches,
        summary.pages,
        summary.scraped,
        summary.uploaded,
        summary.deleted
    );
    Ok(())
}

#[derive(Debug, Default)]
struct DuplicateReport {
    duplicate_groups: Option<BTreeMap<String, Vec<StoredRow>>>,
    deleted: Option<usize>,
    similar_groups: BTreeMap<String, Vec<StoredRow>>,
}

/// Duplicate report and deletion by job uid, then the similarity pass, which
/// always reports and only tags with `--update-similar-jobs`.
async fn manage_duplicates(
    store: Arc<dyn RowStore>,
    args: &DuplicateArgs,
    pacing: Duration,
) -> Result<DuplicateReport> {
    let engine = DeduplicationEngine::new(
        store.clone(),
        DedupConfig {
            pacing,
            ..DedupConfig::default()
        },
    );
    let mut report = DuplicateReport::default();

    if args.find_duplicates || !args.delete {
        report.duplicate_groups = Some(engine.find_duplicates().await?);
    }
    if args.delete {
        report.deleted = Some(engine.delete_duplicates(!args.keep_oldest).await?);
    }
    report.similar_groups = SimilarityGrouper::new(store)
        .find_similar_jobs(args.update_similar_jobs)
        .await?;
    Ok(report)
}

async fn run_duplicates(args: DuplicateArgs) -> Result<()> {
    let config = SyncConfig::from_env().context("sync configuration")?;
    let report = manage_duplicates(remote_store()?, &args, config.pacing).await?;

    if let Some(groups) = &report.duplicate_groups {
        for (uid, rows) in groups {
            let ids = rows.iter().map(|r| r.id.to_string()).collect::<Vec<_>>();
            println!("job_uid={uid} rows={} ids={}", rows.len(), ids.join(","));
        }
        println!("duplicate groups: {}", groups.len());
    }
    if let Some(deleted) = report.deleted {
        println!("deleted duplicate rows: {deleted}");
    }
    for rows in report.similar_groups.values() {
        let ids = rows.iter().map(|r| r.id.to_string()).collect::<Vec<_>>();
        println!(
            "similar: title={:?} rows={} ids={}",
            rows[0].title_or_placeholder(),
            rows.len(),
            ids.join(",")
        );
    }
    let members = report.similar_groups.values().map(Vec::len).sum::<usize>();
    if args.update_similar_jobs {
        println!(
            "similar groups: {} rows tagged duplicate: {members}",
            report.similar_groups.len()
        );
    } else {
        println!("similar groups: {} rows: {members}", report.similar_groups.len());
    }
    Ok(())
}

async fn run_cleanup(args: CleanupArgs) -> Result<()> {
    let config = SyncConfig::from_env().context("sync configuration")?;
    let sweeper = RetentionSweeper::new(remote_store()?, config.pacing);
    let deleted = sweeper
        .clean_up_old_rows(args.days_to_keep, &args.date_field)
        .await?;
    println!("cleanup complete: deleted={deleted} days_to_keep={}", args.days_to_keep);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command.unwrap_or_else(|| Commands::Sync(SyncArgs::default())) {
        Commands::Sync(args) => run_sync(args).await?,
        Commands::Duplicates(args) => run_duplicates(args).await?,
        Commands::Cleanup(args) => run_cleanup(args).await?,
    }

    Ok(())
}
