//! Merge engine, remote sync, README report and the run pipeline for the CFP tracker.

pub mod merge;
pub mod pipeline;
pub mod remote;
pub mod report;

pub use merge::{merge, merge_at, merge_records, MergeSummary};
pub use pipeline::{
    current_url_keys, export_csv, fetch_and_merge, run_once, sync_store, write_report, RunOptions,
    RunSummary, SyncOptions, SyncRunSummary, DEFAULT_CSV_PATH, DEFAULT_README_PATH,
    DEFAULT_REQUESTS_PER_SECOND,
};
pub use remote::{
    ConfigError, MemoryDatabase, NotionClient, NotionConfig, ReconcileSummary, RemoteDatabase,
    RemoteError, RemoteSyncEngine, UpsertSummary,
};
pub use report::{build_rows, csv_document, markdown_table, upsert_readme_section, ReportRow};

pub const CRATE_NAME: &str = "cfp-sync";
