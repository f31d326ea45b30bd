use std::path::PathBuf;

use anyhow::{Context, Result};
use cfp_adapters::FeedConfig;
use cfp_storage::DEFAULT_STORE_PATH;
use cfp_sync::{
    export_csv, fetch_and_merge, run_once, sync_store, write_report, NotionClient, NotionConfig, RunOptions,
    SyncOptions, DEFAULT_CSV_PATH, DEFAULT_README_PATH, DEFAULT_REQUESTS_PER_SECOND,
};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cfp-cli")]
#[command(about = "Track open CFPs: fetch, merge, sync to Notion, report")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch the open CFP feed and merge it into the local store.
    FetchMerge {
        #[arg(long, default_value = DEFAULT_STORE_PATH)]
        db: PathBuf,
        /// Read all-events.json and all-cfps.json from this directory instead of the network.
        #[arg(long)]
        fixtures: Option<PathBuf>,
    },
    /// Push the local store into the Notion database.
    Sync(SyncArgs),
    /// Rewrite the open-CFP table in the README.
    Report {
        #[arg(long, default_value = DEFAULT_STORE_PATH)]
        db: PathBuf,
        #[arg(long, default_value = DEFAULT_README_PATH)]
        readme: PathBuf,
        #[arg(long)]
        limit: Option<usize>,
        /// Also export the same rows as CSV to this path.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Export the open CFPs as CSV (for spreadsheet or Notion import).
    ExportCsv {
        #[arg(long, default_value = DEFAULT_STORE_PATH)]
        db: PathBuf,
        #[arg(long, default_value = DEFAULT_CSV_PATH)]
        out: PathBuf,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// fetch-merge, sync (when Notion is configured), report.
    Run(RunArgs),
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[arg(long, default_value = DEFAULT_STORE_PATH)]
    db: PathBuf,
    /// Process at most N records.
    #[arg(long)]
    limit: Option<usize>,
    /// Log every write instead of performing it.
    #[arg(long)]
    dry_run: bool,
    /// Requests per second (minimum 0.1).
    #[arg(long, default_value_t = DEFAULT_REQUESTS_PER_SECOND)]
    rps: f64,
    /// Close pages whose URL is no longer in the store.
    #[arg(long)]
    reconcile_missing: bool,
    /// With --reconcile-missing, archive instead of closing.
    #[arg(long)]
    archive_missing: bool,
    #[arg(long)]
    skip_upsert: bool,
    /// Add the Source property when the database lacks it.
    #[arg(long)]
    ensure_schema: bool,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, default_value = DEFAULT_STORE_PATH)]
    db: PathBuf,
    #[arg(long, default_value = DEFAULT_README_PATH)]
    readme: PathBuf,
    #[arg(long)]
    fixtures: Option<PathBuf>,
    #[arg(long)]
    csv: Option<PathBuf>,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long)]
    dry_run: bool,
    #[arg(long, default_value_t = DEFAULT_REQUESTS_PER_SECOND)]
    rps: f64,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            db: PathBuf::from(DEFAULT_STORE_PATH),
            readme: PathBuf::from(DEFAULT_README_PATH),
            fixtures: None,
            csv: None,
            limit: None,
            dry_run: false,
            rps: DEFAULT_REQUESTS_PER_SECOND,
        }
    }
}

impl SyncArgs {
    fn options(&self) -> SyncOptions {
        SyncOptions {
            limit: self.limit,
            dry_run: self.dry_run,
            requests_per_second: self.rps,
            reconcile_missing: self.reconcile_missing,
            archive_missing: self.archive_missing,
            skip_upsert: self.skip_upsert,
            ensure_schema: self.ensure_schema,
            ..SyncOptions::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let feed = FeedConfig::from_env();

    match cli.command.unwrap_or_else(|| Commands::Run(RunArgs::default())) {
        Commands::FetchMerge { db, fixtures } => {
            let summary = fetch_and_merge(&feed, &db, fixtures.as_deref(), Utc::now()).await?;
            println!(
                "merge complete: added={} updated={} closed={} total={}",
                summary.added.len(),
                summary.updated.len(),
                summary.closed.len(),
                summary.total_count
            );
            for name in &summary.added {
                println!("  + {name}");
            }
            for name in &summary.closed {
                println!("  - {name}");
            }
        }
        Commands::Sync(args) => {
            let config = NotionConfig::from_env()?;
            let client = NotionClient::new(config)?;
            let summary = sync_store(&client, &args.db, &args.options()).await?;
            if let Some(upsert) = &summary.upsert {
                println!(
                    "sync complete: created={} updated={} processed={} skipped={} closed_duplicates={}",
                    upsert.created, upsert.updated, upsert.processed, upsert.skipped, upsert.closed_duplicates
                );
            }
            if let Some(reconcile) = &summary.reconcile {
                println!(
                    "reconcile complete: scanned={} affected={}",
                    reconcile.scanned, reconcile.affected
                );
            }
        }
        Commands::Report {
            db,
            readme,
            limit,
            csv,
        } => {
            let open = write_report(&db, &readme, limit).await?;
            println!("README updated with {open} active events.");
            if let Some(csv) = csv {
                let rows = export_csv(&db, &csv, limit).await?;
                println!("CSV written: {rows} rows -> {}", csv.display());
            }
        }
        Commands::ExportCsv { db, out, limit } => {
            let rows = export_csv(&db, &out, limit).await?;
            println!("Wrote CSV with {rows} rows -> {}", out.display());
        }
        Commands::Run(args) => {
            let notion = match NotionConfig::from_env() {
                Ok(config) => Some(config),
                Err(err) => {
                    warn!(error = %err, "remote sync disabled");
                    None
                }
            };
            let options = RunOptions {
                store_path: args.db,
                readme_path: args.readme,
                csv_path: args.csv,
                fixtures_dir: args.fixtures,
                report_limit: None,
                sync: SyncOptions {
                    limit: args.limit,
                    dry_run: args.dry_run,
                    requests_per_second: args.rps,
                    ..SyncOptions::default()
                },
            };
            let summary = run_once(&feed, notion, &options)
                .await
                .context("running the CFP pipeline")?;
            let (created, updated) = summary
                .sync
                .as_ref()
                .and_then(|sync| sync.upsert.as_ref())
                .map(|upsert| (upsert.created, upsert.updated))
                .unwrap_or_default();
            println!(
                "run complete: added={} updated={} closed={} total={} notion_created={} notion_updated={} reported={}",
                summary.merge.added.len(),
                summary.merge.updated.len(),
                summary.merge.closed.len(),
                summary.merge.total_count,
                created,
                updated,
                summary.reported
            );
        }
    }

    Ok(())
}
