//! Folds one feed run into the local store.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::Result;
use cfp_core::{CandidateEvent, EventRecord, EventStatus, MergeKey};
use cfp_storage::LocalStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub closed: Vec<String>,
    pub total_count: usize,
}

pub async fn merge(current_open: Vec<CandidateEvent>, store_path: &Path) -> Result<MergeSummary> {
    merge_at(current_open, store_path, Utc::now()).await
}

/// Load, merge and persist the store at `store_path`.
pub async fn merge_at(
    current_open: Vec<CandidateEvent>,
    store_path: &Path,
    now: DateTime<Utc>,
) -> Result<MergeSummary> {
    let store = LocalStore::new(store_path);
    let mut records = store.load().await;
    let summary = merge_records(&mut records, current_open, now);
    store.save(&records).await?;

    info!(
        added = summary.added.len(),
        updated = summary.updated.len(),
        closed = summary.closed.len(),
        total = summary.total_count,
        path = %store_path.display(),
        "merge finished"
    );
    Ok(summary)
}

/// The in-memory merge. Only feed-refreshed fields and the closed/reopened lifecycle are
/// written on existing records; team fields are left to humans.
pub fn merge_records(
    records: &mut Vec<EventRecord>,
    current_open: Vec<CandidateEvent>,
    now: DateTime<Utc>,
) -> MergeSummary {
    let incoming_keys: HashSet<MergeKey> = current_open.iter().map(CandidateEvent::merge_key).collect();
    let mut summary = MergeSummary::default();

    for record in records.iter_mut() {
        if record.status != EventStatus::Closed && !incoming_keys.contains(&record.merge_key()) {
            record.status = EventStatus::Closed;
            summary.closed.push(record.display_name());
        }
    }

    // later duplicates win, matching a plain key -> record map
    let mut index: HashMap<MergeKey, usize> = records
        .iter()
        .enumerate()
        .map(|(position, record)| (record.merge_key(), position))
        .collect();

    for candidate in current_open {
        let key = candidate.merge_key();
        let name = candidate.display_name();
        match index.get(&key) {
            Some(&position) => {
                let record = &mut records[position];
                let changed = record.refresh_from(&candidate);
                record.refresh_date_mirrors();
                if record.status == EventStatus::Closed {
                    record.status = EventStatus::PendingApproval;
                    debug!(event = %name, "reopened");
                }
                record.ensure_external_id();
                record.updated_at = Some(now);
                debug!(event = %name, ?changed, "refreshed");
                summary.updated.push(name);
            }
            None => {
                records.push(EventRecord::first_sighting(candidate, now));
                index.insert(key, records.len() - 1);
                summary.added.push(name);
            }
        }
    }

    for record in records.iter_mut() {
        record.ensure_external_id();
        record.ensure_timestamps(now);
        record.refresh_date_mirrors();
    }

    summary.total_count = records.len();
    summary
}
