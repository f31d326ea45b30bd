//! Core domain model for the CFP tracker: event records, field ownership and identity keys.

pub mod dates;
pub mod identity;

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};

pub use dates::{parse_timestamp, to_iso_date, DateValue};
pub use identity::{compute_external_id, normalize_component, normalize_url};

pub const CRATE_NAME: &str = "cfp-core";

/// Canonical name of the upstream feed; the default `source` of every record.
pub const FEED_SOURCE: &str = "developers.events";

/// Team workflow status of a local record.
///
/// Values written by hand that this tool does not know are kept as `Other` so a save
/// never rewrites them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventStatus {
    #[default]
    PendingApproval,
    Approved,
    Ignored,
    Closed,
    Other(String),
}

impl EventStatus {
    pub fn as_str(&self) -> &str {
        match self {
            EventStatus::PendingApproval => "pending_approval",
            EventStatus::Approved => "approved",
            EventStatus::Ignored => "ignored",
            EventStatus::Closed => "closed",
            EventStatus::Other(value) => value,
        }
    }
}

impl From<String> for EventStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pending_approval" => EventStatus::PendingApproval,
            "approved" => EventStatus::Approved,
            "ignored" => EventStatus::Ignored,
            "closed" => EventStatus::Closed,
            _ => EventStatus::Other(value),
        }
    }
}

impl From<EventStatus> for String {
    fn from(status: EventStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is allowed to write a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Part of the merge key or derived identity; set at creation.
    Identity,
    /// Refreshed from the feed on every sighting.
    Source,
    /// Seeded once, then edited by humans only.
    Team,
    /// Maintained by the merge engine itself.
    Bookkeeping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordField {
    Name,
    Hyperlink,
    Source,
    ExternalId,
    CfpUrl,
    CfpClose,
    EventStart,
    EventEnd,
    Location,
    City,
    Country,
    SourceTags,
    Status,
    Tags,
    Category,
    Comments,
    Notified,
    CreatedAt,
    UpdatedAt,
    CfpCloseDate,
    EventStartDate,
    EventEndDate,
}

impl RecordField {
    pub const ALL: [RecordField; 22] = [
        RecordField::Name,
        RecordField::Hyperlink,
        RecordField::Source,
        RecordField::ExternalId,
        RecordField::CfpUrl,
        RecordField::CfpClose,
        RecordField::EventStart,
        RecordField::EventEnd,
        RecordField::Location,
        RecordField::City,
        RecordField::Country,
        RecordField::SourceTags,
        RecordField::Status,
        RecordField::Tags,
        RecordField::Category,
        RecordField::Comments,
        RecordField::Notified,
        RecordField::CreatedAt,
        RecordField::UpdatedAt,
        RecordField::CfpCloseDate,
        RecordField::EventStartDate,
        RecordField::EventEndDate,
    ];

    pub fn ownership(self) -> Ownership {
        use RecordField::*;
        match self {
            Name | Hyperlink | Source | ExternalId => Ownership::Identity,
            CfpUrl | CfpClose | EventStart | EventEnd | Location | City | Country | SourceTags => {
                Ownership::Source
            }
            Status | Tags | Category | Comments | Notified => Ownership::Team,
            CreatedAt | UpdatedAt | CfpCloseDate | EventStartDate | EventEndDate => {
                Ownership::Bookkeeping
            }
        }
    }

    /// Fields a feed sighting may overwrite on an existing record. `source` and
    /// `external_id` are identity fields but still follow the feed; the merge key
    /// (`name`, `hyperlink`) never does.
    pub fn refreshed_by_feed(self) -> bool {
        self.ownership() == Ownership::Source
            || matches!(self, RecordField::Source | RecordField::ExternalId)
    }

    pub fn feed_refreshed() -> impl Iterator<Item = RecordField> {
        Self::ALL.into_iter().filter(|field| field.refreshed_by_feed())
    }
}

/// Merge identity of a record: trimmed `(name, hyperlink)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MergeKey {
    pub name: String,
    pub hyperlink: String,
}

impl MergeKey {
    pub fn new(name: Option<&str>, hyperlink: Option<&str>) -> Self {
        Self {
            name: name.unwrap_or_default().trim().to_string(),
            hyperlink: hyperlink.unwrap_or_default().trim().to_string(),
        }
    }
}

/// One open CFP as produced by the feed adapter, before it meets the local store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateEvent {
    pub name: Option<String>,
    pub hyperlink: Option<String>,
    pub cfp_url: Option<String>,
    pub cfp_close: Option<DateValue>,
    pub event_start: Option<DateValue>,
    pub event_end: Option<DateValue>,
    pub location: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub source: Option<String>,
    pub source_tags: Option<Vec<String>>,
    pub external_id: Option<String>,
}

impl CandidateEvent {
    pub fn merge_key(&self) -> MergeKey {
        MergeKey::new(self.name.as_deref(), self.hyperlink.as_deref())
    }

    pub fn display_name(&self) -> String {
        display_name(self.name.as_deref(), self.hyperlink.as_deref())
    }
}

/// A record of the local store.
///
/// Fields unknown to this type are carried in `extra` and written back untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventRecord {
    pub name: Option<String>,
    pub hyperlink: Option<String>,
    pub cfp_url: Option<String>,
    pub cfp_close: Option<DateValue>,
    pub event_start: Option<DateValue>,
    pub event_end: Option<DateValue>,
    pub location: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub source: Option<String>,
    #[serde(deserialize_with = "lenient_tags")]
    pub source_tags: Vec<String>,
    pub external_id: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub status: EventStatus,
    #[serde(deserialize_with = "null_as_default")]
    pub notified: bool,
    #[serde(deserialize_with = "lenient_tags")]
    pub tags: Vec<String>,
    pub category: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub comments: String,
    #[serde(with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    pub cfp_close_date: Option<String>,
    pub event_start_date: Option<String>,
    pub event_end_date: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
    /// Stored values of known fields whose shape could not be decoded. They are written
    /// back as found while the typed field keeps its default.
    #[serde(skip)]
    pub unreadable: Map<String, JsonValue>,
}

impl EventRecord {
    /// Build the record for an event seen for the first time. Team-owned fields get
    /// their defaults here and nowhere else.
    pub fn first_sighting(candidate: CandidateEvent, now: DateTime<Utc>) -> Self {
        let mut record = Self {
            name: candidate.name,
            hyperlink: candidate.hyperlink,
            cfp_url: candidate.cfp_url,
            cfp_close: candidate.cfp_close,
            event_start: candidate.event_start,
            event_end: candidate.event_end,
            location: candidate.location,
            city: candidate.city,
            country: candidate.country,
            source: candidate
                .source
                .filter(|s| !s.trim().is_empty())
                .or_else(|| Some(FEED_SOURCE.to_string())),
            source_tags: candidate.source_tags.unwrap_or_default(),
            external_id: candidate.external_id.filter(|id| !id.trim().is_empty()),
            status: EventStatus::PendingApproval,
            notified: false,
            tags: Vec::new(),
            category: None,
            comments: String::new(),
            created_at: Some(now),
            updated_at: Some(now),
            ..Self::default()
        };
        record.ensure_external_id();
        record.refresh_date_mirrors();
        record
    }

    /// Decode one stored record. A known field with an unexpected shape is set aside in
    /// `unreadable` instead of failing the record; `None` only for non-objects.
    pub fn from_json(value: JsonValue) -> Option<Self> {
        let JsonValue::Object(fields) = value else {
            return None;
        };
        if let Ok(record) = serde_json::from_value::<Self>(JsonValue::Object(fields.clone())) {
            return Some(record);
        }

        let (readable, unreadable): (Map<String, JsonValue>, Map<String, JsonValue>) = fields
            .into_iter()
            .partition(|(key, raw)| field_decodes(key, raw));
        let mut record: Self = serde_json::from_value(JsonValue::Object(readable)).ok()?;
        record.unreadable = unreadable;
        Some(record)
    }

    /// Stored form of the record. Set-aside values are restored while their typed field
    /// still holds its default.
    pub fn to_json(&self) -> Result<JsonValue, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if self.unreadable.is_empty() {
            return Ok(value);
        }
        let blank = serde_json::to_value(Self::default())?;
        if let JsonValue::Object(fields) = &mut value {
            for (key, raw) in &self.unreadable {
                match fields.get_mut(key) {
                    Some(slot) if blank.get(key) == Some(&*slot) => *slot = raw.clone(),
                    Some(_) => {}
                    None => {
                        fields.insert(key.clone(), raw.clone());
                    }
                }
            }
        }
        Ok(value)
    }

    pub fn merge_key(&self) -> MergeKey {
        MergeKey::new(self.name.as_deref(), self.hyperlink.as_deref())
    }

    pub fn display_name(&self) -> String {
        display_name(self.name.as_deref(), self.hyperlink.as_deref())
    }

    /// Overwrite one feed-refreshed field when the incoming value is present.
    /// Returns whether the stored value changed.
    pub fn refresh_field(&mut self, field: RecordField, incoming: &CandidateEvent) -> bool {
        match field {
            RecordField::CfpUrl => refresh(&mut self.cfp_url, &incoming.cfp_url),
            RecordField::CfpClose => refresh(&mut self.cfp_close, &incoming.cfp_close),
            RecordField::EventStart => refresh(&mut self.event_start, &incoming.event_start),
            RecordField::EventEnd => refresh(&mut self.event_end, &incoming.event_end),
            RecordField::Location => refresh(&mut self.location, &incoming.location),
            RecordField::City => refresh(&mut self.city, &incoming.city),
            RecordField::Country => refresh(&mut self.country, &incoming.country),
            RecordField::Source => refresh(&mut self.source, &incoming.source),
            RecordField::ExternalId => refresh(&mut self.external_id, &incoming.external_id),
            RecordField::SourceTags => match &incoming.source_tags {
                Some(tags) if !tags.is_empty() && *tags != self.source_tags => {
                    self.source_tags = tags.clone();
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Apply every feed-refreshed field from `incoming`; returns the fields that changed.
    pub fn refresh_from(&mut self, incoming: &CandidateEvent) -> Vec<RecordField> {
        RecordField::feed_refreshed()
            .filter(|field| self.refresh_field(*field, incoming))
            .collect()
    }

    pub fn ensure_external_id(&mut self) -> bool {
        if self.external_id.as_deref().is_some_and(|id| !id.trim().is_empty()) {
            return false;
        }
        let event_start = self
            .event_start
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        let source = self
            .source
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(FEED_SOURCE);
        self.external_id = Some(compute_external_id(
            source,
            self.hyperlink.as_deref().unwrap_or_default(),
            &event_start,
        ));
        true
    }

    /// Recompute the `*_date` mirrors from whichever date fields are present.
    pub fn refresh_date_mirrors(&mut self) {
        if let Some(value) = &self.cfp_close {
            self.cfp_close_date = to_iso_date(value);
        }
        if let Some(value) = &self.event_start {
            self.event_start_date = to_iso_date(value);
        }
        if let Some(value) = &self.event_end {
            self.event_end_date = to_iso_date(value);
        }
    }

    /// Fill missing bookkeeping timestamps and keep `created_at <= updated_at`.
    pub fn ensure_timestamps(&mut self, now: DateTime<Utc>) {
        let created_at = *self.created_at.get_or_insert(now);
        match self.updated_at {
            Some(updated_at) if updated_at >= created_at => {}
            _ => self.updated_at = Some(created_at),
        }
    }
}

/// Presence test used for feed refreshes: blank strings and empty values count as absent,
/// so a feed omission never erases known data.
trait Present {
    fn is_present(&self) -> bool;
}

impl Present for String {
    fn is_present(&self) -> bool {
        !self.trim().is_empty()
    }
}

impl Present for DateValue {
    fn is_present(&self) -> bool {
        !self.is_blank()
    }
}

fn refresh<T: Present + Clone + PartialEq>(slot: &mut Option<T>, incoming: &Option<T>) -> bool {
    match incoming {
        Some(value) if value.is_present() && slot.as_ref() != Some(value) => {
            *slot = Some(value.clone());
            true
        }
        _ => false,
    }
}

/// Trim tag names, drop blanks and exact duplicates, keep first-seen order.
pub fn clean_tag_names<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !out.iter().any(|seen| seen == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

/// Name of one tag value: strings as is, objects through their first name-like key
/// (`name`, `label`, `title`, `tag`, `value`), other scalars as JSON text.
pub fn tag_name(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(text) => Some(text.clone()),
        JsonValue::Object(map) => ["name", "label", "title", "tag", "value"]
            .iter()
            .find_map(|key| map.get(*key).and_then(JsonValue::as_str))
            .filter(|text| !text.is_empty())
            .map(str::to_string)
            .or_else(|| Some(value.to_string())),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}

/// Flatten heterogeneous tag values into clean names.
pub fn tag_names(values: &[JsonValue]) -> Vec<String> {
    clean_tag_names(values.iter().filter_map(tag_name))
}

fn field_decodes(key: &str, raw: &JsonValue) -> bool {
    let mut single = Map::new();
    single.insert(key.to_string(), raw.clone());
    serde_json::from_value::<EventRecord>(JsonValue::Object(single)).is_ok()
}

fn display_name(name: Option<&str>, hyperlink: Option<&str>) -> String {
    name.filter(|n| !n.trim().is_empty())
        .or(hyperlink)
        .unwrap_or_default()
        .to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Tag lists as stored by older writers: `null`, one bare string, or an array mixing
/// strings and `{"name": ..}` objects.
fn lenient_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::Null => Ok(Vec::new()),
        JsonValue::String(text) if text.trim().is_empty() => Ok(Vec::new()),
        JsonValue::String(text) => Ok(vec![text]),
        JsonValue::Array(values) => Ok(values.iter().filter_map(tag_name).collect()),
        other => Err(D::Error::custom(format!("expected a tag list, found {other}"))),
    }
}

/// RFC 3339 on write; RFC 3339 or epoch milliseconds on read, anything else is absent.
mod lenient_timestamp {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Ok(parse_timestamp(&value))
    }
}
