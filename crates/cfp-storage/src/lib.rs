//! Local record store, HTTP client plumbing and request pacing for the CFP tracker.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use cfp_core::EventRecord;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "cfp-storage";

pub const DEFAULT_STORE_PATH: &str = "data/events.json";

/// The authoritative collection of event records, persisted as one pretty-printed JSON array.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every record. A missing or unreadable document is an empty store; inside a
    /// valid array, each record is decoded on its own so one odd field never drops the rest.
    pub async fn load(&self) -> Vec<EventRecord> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "store unreadable; starting empty");
                return Vec::new();
            }
        };

        let entries = match serde_json::from_slice::<Vec<JsonValue>>(&bytes) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "store is not a record array; starting empty");
                return Vec::new();
            }
        };

        let mut records = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            match EventRecord::from_json(entry) {
                Some(record) => {
                    if !record.unreadable.is_empty() {
                        let fields: Vec<&str> = record.unreadable.keys().map(String::as_str).collect();
                        warn!(index, ?fields, "record fields with unexpected shapes kept verbatim");
                    }
                    records.push(record);
                }
                None => warn!(index, "skipping store entry that is not an object"),
            }
        }
        records
    }

    /// Persist the full collection via a temp file renamed over the target.
    pub async fn save(&self, records: &[EventRecord]) -> anyhow::Result<()> {
        let document = records
            .iter()
            .map(EventRecord::to_json)
            .collect::<Result<Vec<_>, _>>()
            .context("serializing event records")?;
        let mut bytes = serde_json::to_vec_pretty(&document).context("serializing event records")?;
        bytes.push(b'\n');

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating store directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp store file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp store file {}", temp_path.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("flushing temp store file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "renaming temp store {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }
        Ok(())
    }
}

/// Lowest pacing rate accepted; anything slower is clamped to it.
pub const MIN_REQUESTS_PER_SECOND: f64 = 0.1;

/// Blocking pacer: a fixed pause of `1 / requests_per_second` after each remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn from_requests_per_second(requests_per_second: f64) -> Self {
        let rate = if requests_per_second.is_nan() {
            MIN_REQUESTS_PER_SECOND
        } else {
            requests_per_second.max(MIN_REQUESTS_PER_SECOND)
        };
        Self {
            delay: Duration::from_secs_f64(1.0 / rate),
        }
    }

    pub fn none() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn wait(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Whether a failed feed GET is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// The feed host throttles with 429 and has occasional 5xx blips; everything else
/// (404 on a renamed feed, 403) is final.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Retry budget for the two feed documents. Notion writes never go through it.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: Some(format!("cfp-tracker/{}", env!("CARGO_PKG_VERSION"))),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl HttpClientConfig {
    pub fn build_client(&self) -> anyhow::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(self.timeout);
        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        builder.build().context("building reqwest client")
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// GET fetcher for public feeds, retrying transient failures with capped exponential backoff.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: config.build_client()?,
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.fetch_with_retries(url)
            .instrument(info_span!("http_fetch", url))
            .await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 0;
        loop {
            let can_retry = attempt < self.backoff.max_retries;
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.bytes().await?.to_vec());
                    }
                    if !(can_retry && classify_status(status) == RetryDisposition::Retryable) {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: resp.url().to_string(),
                        });
                    }
                    warn!(%status, attempt, "retrying feed request");
                }
                Err(err) => {
                    if !(can_retry && classify_reqwest_error(&err) == RetryDisposition::Retryable) {
                        return Err(FetchError::Request(err));
                    }
                    warn!(error = %err, attempt, "retrying feed request");
                }
            }
            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfp_core::{DateValue, EventStatus};
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn record(name: &str) -> EventRecord {
        EventRecord {
            name: Some(name.to_string()),
            hyperlink: Some(format!("https://{name}.example")),
            location: Some("Zürich, Schweiz".into()),
            cfp_close: Some(DateValue::Millis(1_999_999_999_000)),
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single(),
            updated_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let store = LocalStore::new(dir.path().join("nope.json"));
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("events.json");
        std::fs::write(&path, b"{ not json").expect("write");
        assert!(LocalStore::new(&path).load().await.is_empty());

        std::fs::write(&path, br#"{"name": "not an array"}"#).expect("write");
        assert!(LocalStore::new(&path).load().await.is_empty());
    }

    #[tokio::test]
    async fn save_creates_parent_and_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = LocalStore::new(dir.path().join("data").join("events.json"));
        let mut closed = record("beta");
        closed.status = EventStatus::Closed;
        let records = vec![record("alpha"), closed];

        store.save(&records).await.expect("save");
        let loaded = store.load().await;

        assert_eq!(loaded, records);
        let leftovers: Vec<_> = std::fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn saved_document_is_pretty_ordered_and_keeps_non_ascii() {
        let dir = tempdir().expect("tempdir");
        let store = LocalStore::new(dir.path().join("events.json"));
        store.save(&[record("alpha")]).await.expect("save");

        let text = std::fs::read_to_string(store.path()).expect("read");
        assert!(text.starts_with("[\n  {\n    \"name\": \"alpha\",\n    \"hyperlink\""));
        assert!(text.contains("Zürich, Schweiz"));
        assert!(text.ends_with("]\n"));
    }

    #[tokio::test]
    async fn one_odd_record_does_not_empty_the_store() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("events.json");
        std::fs::write(
            &path,
            r#"[
              {"name": "Curated", "status": "approved", "comments": "keynote slot",
               "source_tags": ["databases", {"name": "mysql"}]},
              {"name": "Second", "status": "approved", "cfp_close": {"ms": 1}},
              "stray"
            ]"#,
        )
        .expect("write");
        let store = LocalStore::new(&path);

        let records = store.load().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source_tags, vec!["databases", "mysql"]);
        assert_eq!(records[0].comments, "keynote slot");
        assert_eq!(records[1].status, EventStatus::Approved);
        assert_eq!(records[1].cfp_close, None);

        store.save(&records).await.expect("save");
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value[1]["cfp_close"], serde_json::json!({"ms": 1}));
        assert_eq!(value[0]["source_tags"], serde_json::json!(["databases", "mysql"]));
    }

    #[tokio::test]
    async fn unknown_fields_survive_a_save() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("events.json");
        std::fs::write(
            &path,
            r#"[{"name": "alpha", "hyperlink": "https://a.example", "owner": "sam", "priority": 2}]"#,
        )
        .expect("write");
        let store = LocalStore::new(&path);

        let records = store.load().await;
        store.save(&records).await.expect("save");

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value[0]["owner"], "sam");
        assert_eq!(value[0]["priority"], 2);
    }

    #[test]
    fn fixed_delay_is_floored_at_minimum_rate() {
        assert_eq!(
            FixedDelay::from_requests_per_second(2.5).delay(),
            Duration::from_millis(400)
        );
        assert_eq!(
            FixedDelay::from_requests_per_second(0.0).delay(),
            Duration::from_secs(10)
        );
        assert_eq!(
            FixedDelay::from_requests_per_second(-3.0).delay(),
            Duration::from_secs(10)
        );
        assert_eq!(
            FixedDelay::from_requests_per_second(f64::NAN).delay(),
            Duration::from_secs(10)
        );
        assert!(FixedDelay::none().delay().is_zero());
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
    }
}
