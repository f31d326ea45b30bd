//! End-to-end runs: feed -> local store -> remote database -> README.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cfp_adapters::{fetch_open_events, load_fixture_snapshot, DevelopersEventsAdapter, FeedAdapter, FeedConfig};
use cfp_core::{normalize_url, EventRecord, FEED_SOURCE};
use cfp_storage::{LocalStore, DEFAULT_STORE_PATH};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, Instrument};

use crate::merge::{merge_at, MergeSummary};
use crate::remote::{
    NotionClient, NotionConfig, ReconcileSummary, RemoteDatabase, RemoteSyncEngine, UpsertSummary,
};
use crate::report::{build_rows, markdown_table, open_records, upsert_readme_section, write_csv};

pub const DEFAULT_README_PATH: &str = "README.md";
pub const DEFAULT_CSV_PATH: &str = "data/open_cfps.csv";
pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 2.5;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub requests_per_second: f64,
    pub reconcile_missing: bool,
    pub archive_missing: bool,
    pub skip_upsert: bool,
    pub ensure_schema: bool,
    pub source_tag: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            limit: None,
            dry_run: false,
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            reconcile_missing: false,
            archive_missing: false,
            skip_upsert: false,
            ensure_schema: false,
            source_tag: FEED_SOURCE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncRunSummary {
    pub schema_extended: bool,
    pub upsert: Option<UpsertSummary>,
    pub reconcile: Option<ReconcileSummary>,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub store_path: PathBuf,
    pub readme_path: PathBuf,
    /// Also export the open CFPs as CSV here.
    pub csv_path: Option<PathBuf>,
    pub fixtures_dir: Option<PathBuf>,
    pub report_limit: Option<usize>,
    pub sync: SyncOptions,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            readme_path: PathBuf::from(DEFAULT_README_PATH),
            csv_path: None,
            fixtures_dir: None,
            report_limit: None,
            sync: SyncOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub merge: MergeSummary,
    pub sync: Option<SyncRunSummary>,
    pub reported: usize,
}

/// Read the open CFPs (from the live feed, or a saved snapshot directory) and merge them
/// into the store.
pub async fn fetch_and_merge(
    feed: &FeedConfig,
    store_path: &Path,
    fixtures_dir: Option<&Path>,
    now: DateTime<Utc>,
) -> Result<MergeSummary> {
    let adapter = DevelopersEventsAdapter::new(feed);
    let open = match fixtures_dir {
        Some(dir) => {
            let snapshot = load_fixture_snapshot(dir)?;
            adapter.parse_open_events(&snapshot, now)
        }
        None => fetch_open_events(&adapter, feed, now).await?,
    };
    info!(open = open.len(), source = adapter.source_id(), "open CFPs collected");
    merge_at(open, store_path, now).await
}

/// Normalized hyperlinks of the first `limit` store records.
pub fn current_url_keys(records: &[EventRecord], limit: Option<usize>) -> HashSet<String> {
    records
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|record| normalize_url(record.hyperlink.as_deref().unwrap_or_default()))
        .filter(|key| !key.is_empty())
        .collect()
}

/// Push the store into `remote`, optionally extending the schema first and reconciling
/// pages the store no longer lists.
pub async fn sync_store<R>(remote: &R, store_path: &Path, options: &SyncOptions) -> Result<SyncRunSummary>
where
    R: RemoteDatabase + ?Sized,
{
    let records = LocalStore::new(store_path).load().await;
    let mut engine = RemoteSyncEngine::connect(remote, &options.source_tag).await;
    let mut summary = SyncRunSummary::default();

    if options.ensure_schema {
        summary.schema_extended = engine
            .ensure_schema(options.dry_run)
            .await
            .context("extending database schema")?;
    }

    if !options.skip_upsert {
        let upsert = engine
            .upsert(&records, options.limit, options.dry_run, options.requests_per_second)
            .await
            .context("upserting records")?;
        summary.upsert = Some(upsert);
    }

    if options.reconcile_missing {
        let keys = current_url_keys(&records, options.limit);
        let reconcile = engine
            .reconcile_missing(&keys, options.dry_run, options.requests_per_second, options.archive_missing)
            .await
            .context("reconciling missing records")?;
        summary.reconcile = Some(reconcile);
    }

    Ok(summary)
}

/// Render the store into the README section. Returns the number of open records.
pub async fn write_report(store_path: &Path, readme_path: &Path, limit: Option<usize>) -> Result<usize> {
    let records = LocalStore::new(store_path).load().await;
    let table = markdown_table(&records, limit);
    upsert_readme_section(readme_path, &table).await?;
    let open = open_records(&records).len();
    info!(open, readme = %readme_path.display(), "README updated");
    Ok(open)
}

/// Export the open records as CSV. Returns the number of rows written.
pub async fn export_csv(store_path: &Path, csv_path: &Path, limit: Option<usize>) -> Result<usize> {
    let records = LocalStore::new(store_path).load().await;
    let rows = build_rows(&records, limit);
    write_csv(csv_path, &rows).await?;
    info!(rows = rows.len(), csv = %csv_path.display(), "CSV written");
    Ok(rows.len())
}

/// Fetch and merge, sync when Notion credentials are available, then refresh the README.
pub async fn run_once(feed: &FeedConfig, notion: Option<NotionConfig>, options: &RunOptions) -> Result<RunSummary> {
    let span = info_span!("cfp_run", dry_run = options.sync.dry_run);
    run_steps(feed, notion, options).instrument(span).await
}

async fn run_steps(feed: &FeedConfig, notion: Option<NotionConfig>, options: &RunOptions) -> Result<RunSummary> {
    let started_at = Utc::now();
    let merge = fetch_and_merge(
        feed,
        &options.store_path,
        options.fixtures_dir.as_deref(),
        started_at,
    )
    .await?;

    let sync = match notion {
        Some(config) => {
            let client = NotionClient::new(config)?;
            Some(sync_store(&client, &options.store_path, &options.sync).await?)
        }
        None => {
            info!("notion credentials not configured; skipping remote sync");
            None
        }
    };

    let reported = write_report(&options.store_path, &options.readme_path, options.report_limit).await?;
    if let Some(csv_path) = &options.csv_path {
        export_csv(&options.store_path, csv_path, options.report_limit).await?;
    }

    Ok(RunSummary {
        started_at,
        finished_at: Utc::now(),
        merge,
        sync,
        reported,
    })
}
