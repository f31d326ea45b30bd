//! README table of the CFPs that are still open.

use std::path::Path;

use anyhow::{Context, Result};
use cfp_core::{to_iso_date, DateValue, EventRecord, EventStatus};
use serde::Serialize;
use tokio::fs;

pub const SECTION_HEADER: &str = "## Current Open CFPs";
pub const START_MARK: &str = "<!-- events:start -->";
pub const END_MARK: &str = "<!-- events:end -->";

pub fn open_records(records: &[EventRecord]) -> Vec<&EventRecord> {
    records
        .iter()
        .filter(|record| record.status != EventStatus::Closed)
        .collect()
}

/// Column headers shared by the README table and the CSV export.
pub const HEADERS: [&str; 8] = [
    "Name",
    "CFP closes",
    "Event dates",
    "Location",
    "Status",
    "Source tags",
    "Team tags",
    "Link",
];

/// One open CFP flattened to display strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "CFP closes")]
    pub cfp_closes: String,
    #[serde(rename = "Event dates")]
    pub event_dates: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Source tags")]
    pub source_tags: String,
    #[serde(rename = "Team tags")]
    pub team_tags: String,
    #[serde(rename = "Link")]
    pub link: String,
}

/// Non-closed records, soonest CFP close first (undated last, then by name).
pub fn build_rows(records: &[EventRecord], limit: Option<usize>) -> Vec<ReportRow> {
    let mut open = open_records(records);
    open.sort_by_cached_key(|record| {
        (
            close_epoch(record.cfp_close.as_ref()),
            record.name.clone().unwrap_or_default().to_lowercase(),
        )
    });

    open.into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|record| ReportRow {
            name: record.name.clone().unwrap_or_default(),
            cfp_closes: date_cell(record.cfp_close.as_ref()),
            event_dates: date_range(record.event_start.as_ref(), record.event_end.as_ref()),
            location: first_non_empty([&record.location, &record.city, &record.country]),
            status: record.status.to_string(),
            source_tags: record.source_tags.join(", "),
            team_tags: record.tags.join(", "),
            link: first_non_empty([&record.cfp_url, &record.hyperlink]),
        })
        .collect()
}

/// Non-closed records as a GitHub-flavored table.
pub fn markdown_table(records: &[EventRecord], limit: Option<usize>) -> String {
    let mut lines = vec![
        format!("| {} |", HEADERS.join(" | ")),
        format!("| {} |", ["---"; 8].join(" | ")),
    ];
    for row in build_rows(records, limit) {
        let link = if row.link.is_empty() {
            String::new()
        } else {
            format!("[link]({})", row.link)
        };
        lines.push(format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} |",
            escape(&row.name),
            escape(&row.cfp_closes),
            escape(&row.event_dates),
            escape(&row.location),
            escape(&row.status),
            escape(&row.source_tags),
            escape(&row.team_tags),
            link,
        ));
    }
    lines.join("\n")
}

/// The same rows as CSV, header line included even when there are no rows.
pub fn csv_document(rows: &[ReportRow]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(HEADERS).context("writing CSV header")?;
    for row in rows {
        writer.serialize(row).context("writing CSV row")?;
    }
    writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("flushing CSV: {}", err.error()))
}

/// Write the CSV export, creating its directory when needed.
pub async fn write_csv(path: &Path, rows: &[ReportRow]) -> Result<()> {
    let bytes = csv_document(rows)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

/// Replace the marked section of the README, or append one (creating the file if needed).
pub async fn upsert_readme_section(path: &Path, content: &str) -> Result<()> {
    let existing = match fs::read_to_string(path).await {
        Ok(text) => Some(text),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            return Err(err).with_context(|| format!("reading {}", path.display()));
        }
    };
    let updated = splice_section(existing.as_deref(), content);
    fs::write(path, updated)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

pub fn splice_section(readme: Option<&str>, content: &str) -> String {
    let section = format!("{SECTION_HEADER}\n\n{START_MARK}\n{content}\n{END_MARK}\n");
    let Some(readme) = readme else {
        return section;
    };

    if let Some((before, rest)) = readme.split_once(START_MARK) {
        if let Some((_, after)) = rest.split_once(END_MARK) {
            return format!("{before}{START_MARK}\n{content}\n{END_MARK}{after}");
        }
    }

    let mut out = readme.to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push('\n');
    out.push_str(&section);
    out
}

fn close_epoch(value: Option<&DateValue>) -> i64 {
    match value {
        Some(DateValue::Millis(ms)) => *ms,
        Some(DateValue::Fractional(ms)) if ms.is_finite() => *ms as i64,
        _ => i64::MAX,
    }
}

fn date_cell(value: Option<&DateValue>) -> String {
    value.and_then(to_iso_date).unwrap_or_default()
}

fn date_range(start: Option<&DateValue>, end: Option<&DateValue>) -> String {
    let start = date_cell(start);
    let end = date_cell(end);
    if !start.is_empty() && !end.is_empty() && start != end {
        format!("{start} → {end}")
    } else if start.is_empty() {
        end
    } else {
        start
    }
}

fn first_non_empty<const N: usize>(values: [&Option<String>; N]) -> String {
    values
        .into_iter()
        .flatten()
        .find(|value| !value.is_empty())
        .cloned()
        .unwrap_or_default()
}

fn escape(cell: &str) -> String {
    cell.replace('|', "\\|")
}
