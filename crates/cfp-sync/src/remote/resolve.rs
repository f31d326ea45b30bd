//! Identity resolution strategies and property construction. Everything here is pure over
//! pages that were already fetched; the engine decides what to query and what to write.

use std::collections::HashSet;

use cfp_core::{clean_tag_names, to_iso_date, EventRecord};

use super::{
    PropertyMap, PropertyValue, QueryFilter, RemotePage, RemoteSchema,
    PROP_CFP_DATES, PROP_CFP_URL, PROP_DATE, PROP_LOCATION, PROP_NAME, PROP_SOURCE,
    PROP_STATUS, PROP_TECHNOLOGY, PROP_URL, STATUS_CLOSED, STATUS_OPEN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    UrlKey,
    NameAndDate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Matched {
        page: RemotePage,
        strategy: MatchStrategy,
    },
    Unmatched {
        stale: Vec<RemotePage>,
    },
}

/// Fallback lookup for pages whose URL changed upstream. Needs both a name and a start date.
pub fn name_and_date_filter(record: &EventRecord) -> Option<QueryFilter> {
    let name = record.name.as_deref().filter(|name| !name.is_empty())?;
    let date = record.event_start.as_ref().and_then(to_iso_date)?;
    Some(QueryFilter::NameAndDate {
        name: name.to_string(),
        date,
    })
}

pub fn same_url<'p>(candidates: &'p [RemotePage], url_key: &str) -> Option<&'p RemotePage> {
    candidates.iter().find(|page| page.url_key() == url_key)
}

/// Candidates sharing name and start date but pointing somewhere else.
pub fn stale_duplicates<'p>(candidates: &'p [RemotePage], url_key: &str) -> Vec<&'p RemotePage> {
    candidates
        .iter()
        .filter(|page| page.url_key() != url_key)
        .collect()
}

/// Second stage of the chain: a name+date candidate with the same URL wins, otherwise every
/// candidate is a stale duplicate of the record about to be created.
pub fn resolve_candidates(candidates: Vec<RemotePage>, url_key: &str) -> Resolution {
    if let Some(page) = same_url(&candidates, url_key) {
        return Resolution::Matched {
            page: page.clone(),
            strategy: MatchStrategy::NameAndDate,
        };
    }
    Resolution::Unmatched {
        stale: stale_duplicates(&candidates, url_key)
            .into_iter()
            .cloned()
            .collect(),
    }
}

/// Case-insensitive union; existing spellings and order win, new names are appended.
pub fn merge_tag_names(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for name in existing.iter().chain(incoming) {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        if seen.insert(name.to_lowercase()) {
            merged.push(name.to_string());
        }
    }
    merged
}

/// The source-owned properties of a new page.
pub fn source_properties(record: &EventRecord, url_key: &str) -> PropertyMap {
    let mut properties = PropertyMap::new();
    properties.insert(
        PROP_NAME.to_string(),
        PropertyValue::Title(record.name.clone().unwrap_or_default()),
    );
    properties.insert(
        PROP_URL.to_string(),
        PropertyValue::Url(Some(url_key.to_string()).filter(|url| !url.is_empty())),
    );
    properties.insert(
        PROP_CFP_URL.to_string(),
        PropertyValue::Url(record.cfp_url.clone().filter(|url| !url.is_empty())),
    );
    properties.insert(
        PROP_CFP_DATES.to_string(),
        PropertyValue::Date {
            start: record.cfp_close.as_ref().and_then(to_iso_date),
            end: None,
        },
    );
    properties.insert(
        PROP_DATE.to_string(),
        PropertyValue::Date {
            start: record.event_start.as_ref().and_then(to_iso_date),
            end: record.event_end.as_ref().and_then(to_iso_date),
        },
    );
    properties.insert(
        PROP_LOCATION.to_string(),
        PropertyValue::RichText(record.location.clone().unwrap_or_default()),
    );
    properties.insert(
        PROP_TECHNOLOGY.to_string(),
        PropertyValue::MultiSelect(clean_tag_names(&record.source_tags)),
    );
    properties
}

/// Source properties plus the seeded workflow status and source tag, each written only
/// when the schema says how.
pub fn create_properties(
    record: &EventRecord,
    url_key: &str,
    schema: &RemoteSchema,
    source_tag: &str,
) -> PropertyMap {
    let mut properties = source_properties(record, url_key);
    schema.retain_writable(&mut properties);

    match schema.kind(PROP_STATUS).and_then(|kind| PropertyValue::option(kind, STATUS_OPEN)) {
        Some(value) => {
            properties.insert(PROP_STATUS.to_string(), value);
        }
        None => tracing::warn!(property = PROP_STATUS, "status kind unknown; new page left without a status"),
    }
    if let Some(value) = schema
        .kind(PROP_SOURCE)
        .and_then(|kind| PropertyValue::label(kind, source_tag))
    {
        properties.insert(PROP_SOURCE.to_string(), value);
    }
    properties
}

/// CFP close date, CFP URL and the merged Technology tags. Absent local values leave the
/// remote property untouched.
pub fn update_properties(record: &EventRecord, existing: &RemotePage, schema: &RemoteSchema) -> PropertyMap {
    let mut properties = PropertyMap::new();
    if let Some(start) = record.cfp_close.as_ref().and_then(to_iso_date) {
        properties.insert(
            PROP_CFP_DATES.to_string(),
            PropertyValue::Date {
                start: Some(start),
                end: None,
            },
        );
    }
    if let Some(cfp_url) = record.cfp_url.as_ref().filter(|url| !url.is_empty()) {
        properties.insert(PROP_CFP_URL.to_string(), PropertyValue::Url(Some(cfp_url.clone())));
    }
    let incoming = clean_tag_names(&record.source_tags);
    properties.insert(
        PROP_TECHNOLOGY.to_string(),
        PropertyValue::MultiSelect(merge_tag_names(&existing.option_names(PROP_TECHNOLOGY), &incoming)),
    );
    schema.retain_writable(&mut properties);
    properties
}

/// `[CFP] Status = Closed`, or `None` when the status kind is not known.
pub fn closed_status(schema: &RemoteSchema) -> Option<PropertyMap> {
    let value = schema
        .kind(PROP_STATUS)
        .and_then(|kind| PropertyValue::option(kind, STATUS_CLOSED))?;
    Some(PropertyMap::from([(PROP_STATUS.to_string(), value)]))
}
