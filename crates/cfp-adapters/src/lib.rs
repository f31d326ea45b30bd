//! Feed adapters: fetch the public CFP feeds and shape them into candidate events.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use cfp_core::{compute_external_id, CandidateEvent, DateValue, FEED_SOURCE};
pub use cfp_core::tag_names;
use cfp_storage::{FetchError, HttpClientConfig, HttpFetcher};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::info;

pub const CRATE_NAME: &str = "cfp-adapters";

pub const DEFAULT_EVENTS_URL: &str = "https://developers.events/all-events.json";
pub const DEFAULT_CFPS_URL: &str = "https://developers.events/all-cfps.json";

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub events_url: String,
    pub cfps_url: String,
    pub user_agent: Option<String>,
    pub http_timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            events_url: DEFAULT_EVENTS_URL.to_string(),
            cfps_url: DEFAULT_CFPS_URL.to_string(),
            user_agent: None,
            http_timeout_secs: 30,
        }
    }
}

impl FeedConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            events_url: non_empty_env("ALL_EVENTS_URL").unwrap_or(defaults.events_url),
            cfps_url: non_empty_env("ALL_CFPS_URL").unwrap_or(defaults.cfps_url),
            user_agent: non_empty_env("CFP_USER_AGENT"),
            http_timeout_secs: std::env::var("CFP_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        let defaults = HttpClientConfig::default();
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: self.user_agent.clone().or(defaults.user_agent),
            ..defaults
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One entry of `all-events.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEvent {
    pub name: Option<String>,
    pub hyperlink: Option<String>,
    #[serde(deserialize_with = "date_list")]
    pub date: Vec<Option<DateValue>>,
    pub location: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    #[serde(deserialize_with = "tag_list")]
    pub tags: Vec<JsonValue>,
}

/// One entry of `all-cfps.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawCfp {
    pub link: Option<String>,
    #[serde(rename = "untilDate", deserialize_with = "lenient_date")]
    pub until_date: Option<DateValue>,
    #[serde(deserialize_with = "null_as_default")]
    pub conf: RawConference,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConference {
    pub name: Option<String>,
    pub hyperlink: Option<String>,
    #[serde(deserialize_with = "date_list")]
    pub date: Vec<Option<DateValue>>,
    pub location: Option<String>,
}

/// Both feed documents as fetched at one instant.
#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    pub events: Vec<RawEvent>,
    pub cfps: Vec<RawCfp>,
}

#[async_trait]
pub trait FeedAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn fetch_snapshot(&self, http: &HttpFetcher) -> Result<FeedSnapshot, AdapterError>;

    fn parse_open_events(&self, snapshot: &FeedSnapshot, now: DateTime<Utc>) -> Vec<CandidateEvent>;
}

/// The developers.events feeds: a CFP list joined against the full event list.
#[derive(Debug, Clone)]
pub struct DevelopersEventsAdapter {
    events_url: String,
    cfps_url: String,
}

impl DevelopersEventsAdapter {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            events_url: config.events_url.clone(),
            cfps_url: config.cfps_url.clone(),
        }
    }
}

#[async_trait]
impl FeedAdapter for DevelopersEventsAdapter {
    fn source_id(&self) -> &'static str {
        FEED_SOURCE
    }

    async fn fetch_snapshot(&self, http: &HttpFetcher) -> Result<FeedSnapshot, AdapterError> {
        let events: Vec<RawEvent> = fetch_json(http, &self.events_url).await?;
        let cfps: Vec<RawCfp> = fetch_json(http, &self.cfps_url).await?;
        info!(events = events.len(), cfps = cfps.len(), "fetched developers.events feeds");
        Ok(FeedSnapshot { events, cfps })
    }

    fn parse_open_events(&self, snapshot: &FeedSnapshot, now: DateTime<Utc>) -> Vec<CandidateEvent> {
        clean_open_cfps(&snapshot.events, &snapshot.cfps, now)
    }
}

async fn fetch_json<T: DeserializeOwned>(http: &HttpFetcher, url: &str) -> Result<T, AdapterError> {
    let bytes = http.fetch_bytes(url).await?;
    serde_json::from_slice(&bytes).map_err(|source| AdapterError::Decode {
        url: url.to_string(),
        source,
    })
}

/// Fetch both feeds and return the CFPs still open at `now`.
pub async fn fetch_open_events(
    adapter: &dyn FeedAdapter,
    config: &FeedConfig,
    now: DateTime<Utc>,
) -> Result<Vec<CandidateEvent>> {
    let http = HttpFetcher::new(config.http_client_config())?;
    let snapshot = adapter
        .fetch_snapshot(&http)
        .await
        .with_context(|| format!("fetching feed {}", adapter.source_id()))?;
    Ok(adapter.parse_open_events(&snapshot, now))
}

/// Read a snapshot saved as `all-events.json` + `all-cfps.json` in one directory.
pub fn load_fixture_snapshot(dir: impl AsRef<Path>) -> Result<FeedSnapshot> {
    let dir = dir.as_ref();
    Ok(FeedSnapshot {
        events: read_json_file(dir.join("all-events.json"))?,
        cfps: read_json_file(dir.join("all-cfps.json"))?,
    })
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Keep CFPs whose deadline is after `now` and enrich each from the matching event entry
/// (matched on hyperlink, or name when the hyperlink is missing).
pub fn clean_open_cfps(events: &[RawEvent], cfps: &[RawCfp], now: DateTime<Utc>) -> Vec<CandidateEvent> {
    let now_ms = now.timestamp_millis();

    let mut by_link_or_name: HashMap<String, &RawEvent> = HashMap::new();
    for event in events {
        if let Some(key) = lookup_key(event.hyperlink.as_deref(), event.name.as_deref()) {
            by_link_or_name.insert(key, event);
        }
    }

    cfps.iter()
        .filter(|cfp| {
            cfp.until_date
                .as_ref()
                .and_then(epoch_millis)
                .is_some_and(|until| until > now_ms)
        })
        .map(|cfp| {
            let conf = &cfp.conf;
            let event = lookup_key(conf.hyperlink.as_deref(), conf.name.as_deref())
                .and_then(|key| by_link_or_name.get(&key).copied());
            let (conf_start, conf_end) = date_range(&conf.date);
            let (event_start, event_end) = event.map(|e| date_range(&e.date)).unwrap_or_default();

            let name = first_present(conf.name.as_ref(), event.and_then(|e| e.name.as_ref()));
            let hyperlink =
                first_present(conf.hyperlink.as_ref(), event.and_then(|e| e.hyperlink.as_ref()));
            let event_start = conf_start.or(event_start);
            let external_id = compute_external_id(
                FEED_SOURCE,
                hyperlink.as_deref().unwrap_or_default(),
                &event_start.as_ref().map(ToString::to_string).unwrap_or_default(),
            );

            CandidateEvent {
                name,
                hyperlink,
                cfp_url: cfp.link.clone(),
                cfp_close: cfp.until_date.clone(),
                event_start,
                event_end: conf_end.or(event_end),
                location: first_present(
                    conf.location.as_ref(),
                    event.and_then(|e| e.location.as_ref()),
                ),
                city: Some(
                    event
                        .and_then(|e| e.city.clone())
                        .filter(|c| !c.trim().is_empty())
                        .unwrap_or_default(),
                ),
                country: event.and_then(|e| e.country.clone()),
                source: Some(FEED_SOURCE.to_string()),
                source_tags: Some(event.map(|e| tag_names(&e.tags)).unwrap_or_default()),
                external_id: Some(external_id),
            }
        })
        .collect()
}

fn lookup_key(hyperlink: Option<&str>, name: Option<&str>) -> Option<String> {
    let key = hyperlink
        .filter(|h| !h.is_empty())
        .or(name)
        .unwrap_or_default()
        .trim();
    (!key.is_empty()).then(|| key.to_string())
}

fn first_present(primary: Option<&String>, fallback: Option<&String>) -> Option<String> {
    primary
        .filter(|v| !v.is_empty())
        .or(fallback.filter(|v| !v.is_empty()))
        .cloned()
}

fn date_range(dates: &[Option<DateValue>]) -> (Option<DateValue>, Option<DateValue>) {
    (dates.first().cloned().flatten(), dates.get(1).cloned().flatten())
}

// The feeds are hand-maintained: `null` and odd shapes show up where lists are expected.

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<DateValue>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(serde_json::from_value(JsonValue::deserialize(deserializer)?).ok())
}

/// `[start, end]`, positions kept; anything but an array is no dates at all.
fn date_list<'de, D>(deserializer: D) -> Result<Vec<Option<DateValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::Array(values) => values
            .into_iter()
            .map(|value| serde_json::from_value(value).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn tag_list<'de, D>(deserializer: D) -> Result<Vec<JsonValue>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JsonValue::deserialize(deserializer)? {
        JsonValue::Null => Vec::new(),
        JsonValue::Array(values) => values,
        single => vec![single],
    })
}

fn epoch_millis(value: &DateValue) -> Option<i64> {
    match value {
        DateValue::Millis(ms) => Some(*ms),
        DateValue::Fractional(ms) if ms.is_finite() => Some(ms.trunc() as i64),
        DateValue::Fractional(_) => None,
        DateValue::Text(text) => text.trim().parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().unwrap()
    }

    fn snapshot() -> FeedSnapshot {
        let events: Vec<RawEvent> = serde_json::from_value(json!([
            {
                "name": "DevConf",
                "hyperlink": "https://devconf.info/cfp",
                "date": [1759276800000_i64, 1759449600000_i64],
                "location": "Brno (Czechia)",
                "city": "Brno",
                "country": "Czechia",
                "tags": ["linux", {"name": "cloud"}, " linux ", null]
            },
            {
                "name": "NoLink Summit",
                "date": [1760000000000_i64],
                "city": "",
                "country": "France"
            }
        ]))
        .unwrap();
        let cfps: Vec<RawCfp> = serde_json::from_value(json!([
            {
                "link": "https://devconf.info/cfp/submit",
                "untilDate": 1999999999000_i64,
                "conf": {"name": "DevConf", "hyperlink": "https://devconf.info/cfp", "date": [1759276800000_i64]}
            },
            {
                "link": "https://nolink.example/cfp",
                "untilDate": 1999999999000_i64,
                "conf": {"name": "NoLink Summit", "location": "Paris"}
            },
            {
                "link": "https://past.example/cfp",
                "untilDate": 1600000000000_i64,
                "conf": {"name": "Past", "hyperlink": "https://past.example"}
            },
            {
                "link": "https://nodeadline.example/cfp",
                "conf": {"name": "No Deadline"}
            }
        ]))
        .unwrap();
        FeedSnapshot { events, cfps }
    }

    #[test]
    fn closed_and_undated_cfps_are_dropped() {
        let open = clean_open_cfps(&snapshot().events, &snapshot().cfps, now());
        let names: Vec<_> = open.iter().map(|e| e.display_name()).collect();
        assert_eq!(names, vec!["DevConf", "NoLink Summit"]);
    }

    #[test]
    fn cfps_are_enriched_from_the_event_list() {
        let open = clean_open_cfps(&snapshot().events, &snapshot().cfps, now());
        let devconf = &open[0];

        assert_eq!(devconf.cfp_url.as_deref(), Some("https://devconf.info/cfp/submit"));
        assert_eq!(devconf.cfp_close, Some(DateValue::Millis(1_999_999_999_000)));
        assert_eq!(devconf.event_start, Some(DateValue::Millis(1_759_276_800_000)));
        assert_eq!(devconf.event_end, Some(DateValue::Millis(1_759_449_600_000)));
        assert_eq!(devconf.location.as_deref(), Some("Brno (Czechia)"));
        assert_eq!(devconf.city.as_deref(), Some("Brno"));
        assert_eq!(devconf.country.as_deref(), Some("Czechia"));
        assert_eq!(devconf.source.as_deref(), Some(FEED_SOURCE));
        assert_eq!(
            devconf.source_tags,
            Some(vec!["linux".to_string(), "cloud".to_string()])
        );
        assert_eq!(
            devconf.external_id.as_deref(),
            Some("developers-events::https-devconf-info-cfp::1759276800000")
        );
    }

    #[test]
    fn name_only_events_join_on_name() {
        let open = clean_open_cfps(&snapshot().events, &snapshot().cfps, now());
        let summit = &open[1];

        assert_eq!(summit.hyperlink, None);
        assert_eq!(summit.location.as_deref(), Some("Paris"));
        assert_eq!(summit.city.as_deref(), Some(""));
        assert_eq!(summit.country.as_deref(), Some("France"));
        assert_eq!(summit.event_start, Some(DateValue::Millis(1_760_000_000_000)));
        assert_eq!(summit.source_tags, Some(vec![]));
    }

    #[test]
    fn tag_objects_flatten_to_names() {
        let tags = tag_names(&[
            json!({"label": "Kotlin"}),
            json!({"other": 1}),
            json!(42),
            json!(""),
        ]);
        assert_eq!(tags, vec!["Kotlin", "{\"other\":1}", "42"]);
    }

    #[test]
    fn null_lists_in_the_feed_do_not_fail_the_document() {
        let events: Vec<RawEvent> = serde_json::from_str(
            r#"[{"name": "Null Conf", "hyperlink": "https://null.example", "date": null, "tags": null},
                {"name": "Gap Conf", "hyperlink": "https://gap.example", "date": [null, 1760000000000], "tags": "java"}]"#,
        )
        .unwrap();
        let cfps: Vec<RawCfp> = serde_json::from_str(
            r#"[{"link": "https://null.example/cfp", "untilDate": 1999999999000,
                 "conf": {"name": "Null Conf", "hyperlink": "https://null.example", "date": null}},
                {"link": "https://gap.example/cfp", "untilDate": 1999999999000,
                 "conf": {"name": "Gap Conf", "hyperlink": "https://gap.example"}},
                {"link": "https://orphan.example/cfp", "untilDate": {"bad": true}, "conf": null}]"#,
        )
        .unwrap();

        assert!(events[0].date.is_empty() && events[0].tags.is_empty());
        assert_eq!(cfps[2].conf, RawConference::default());
        assert_eq!(cfps[2].until_date, None);

        let open = clean_open_cfps(&events, &cfps, now());
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].event_start, None);
        assert_eq!(open[0].source_tags, Some(vec![]));
        assert_eq!(open[1].event_start, None);
        assert_eq!(open[1].event_end, Some(DateValue::Millis(1_760_000_000_000)));
        assert_eq!(open[1].source_tags, Some(vec!["java".to_string()]));
    }

    #[test]
    fn adapter_reports_feed_source() {
        let adapter = DevelopersEventsAdapter::new(&FeedConfig::default());
        assert_eq!(adapter.source_id(), "developers.events");
        assert_eq!(adapter.parse_open_events(&snapshot(), now()).len(), 2);
    }
}
