//! Remote database model: schema kinds, typed property values, query filters and the
//! `RemoteDatabase` seam implemented by the Notion client and the in-memory backend.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use cfp_core::normalize_url;
use serde_json::{json, Map, Value as JsonValue};
use thiserror::Error;

pub mod engine;
pub mod memory;
pub mod notion;
pub mod resolve;

pub use engine::{ActionKind, ReconcileSummary, RemoteSyncEngine, SyncAction, UpsertSummary};
pub use memory::{MemoryDatabase, Mutation};
pub use notion::{ConfigError, NotionClient, NotionConfig};

pub const PROP_NAME: &str = "Name";
pub const PROP_URL: &str = "URL";
pub const PROP_CFP_URL: &str = "CFP URL";
pub const PROP_CFP_DATES: &str = "CFP Dates";
pub const PROP_DATE: &str = "Date";
pub const PROP_LOCATION: &str = "Event Location";
pub const PROP_TECHNOLOGY: &str = "Technology";
pub const PROP_STATUS: &str = "[CFP] Status";
pub const PROP_SOURCE: &str = "Source";

pub const STATUS_OPEN: &str = "Open";
pub const STATUS_CLOSED: &str = "Closed";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("remote service returned {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("unexpected remote response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Title,
    RichText,
    Url,
    Date,
    Select,
    MultiSelect,
    Status,
    Other,
}

impl PropertyKind {
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "title" => Self::Title,
            "rich_text" => Self::RichText,
            "url" => Self::Url,
            "date" => Self::Date,
            "select" => Self::Select,
            "multi_select" => Self::MultiSelect,
            "status" => Self::Status,
            _ => Self::Other,
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::RichText => "rich_text",
            Self::Url => "url",
            Self::Date => "date",
            Self::Select => "select",
            Self::MultiSelect => "multi_select",
            Self::Status => "status",
            Self::Other => "other",
        }
    }
}

/// Property name to kind, as declared by the remote database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteSchema {
    properties: HashMap<String, PropertyKind>,
}

impl RemoteSchema {
    pub fn from_properties<I, S>(properties: I) -> Self
    where
        I: IntoIterator<Item = (S, PropertyKind)>,
        S: Into<String>,
    {
        Self {
            properties: properties
                .into_iter()
                .map(|(name, kind)| (name.into(), kind))
                .collect(),
        }
    }

    /// Reads the `properties` object of a database document (`{name: {"type": ...}}`).
    pub fn from_database_json(document: &JsonValue) -> Self {
        let properties = document
            .get("properties")
            .and_then(JsonValue::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, def)| {
                        let kind = def
                            .get("type")
                            .and_then(JsonValue::as_str)
                            .map(PropertyKind::from_type_name)
                            .unwrap_or(PropertyKind::Other);
                        (name.clone(), kind)
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { properties }
    }

    pub fn kind(&self, property: &str) -> Option<PropertyKind> {
        self.properties.get(property).copied()
    }

    pub fn insert(&mut self, property: impl Into<String>, kind: PropertyKind) {
        self.properties.insert(property.into(), kind);
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Drops values the schema declares with a different kind or not at all. An empty
    /// schema (introspection unavailable) keeps everything.
    pub fn retain_writable(&self, properties: &mut PropertyMap) {
        if self.is_empty() {
            return;
        }
        properties.retain(|name, value| match self.kind(name) {
            Some(kind) if kind == value.kind() => true,
            declared => {
                tracing::debug!(property = %name, ?declared, "skipping property the database cannot take");
                false
            }
        });
    }
}

/// A property write in the remote's typed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Title(String),
    RichText(String),
    Url(Option<String>),
    Date { start: Option<String>, end: Option<String> },
    Select(String),
    MultiSelect(Vec<String>),
    Status(String),
}

pub type PropertyMap = BTreeMap<String, PropertyValue>;

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            Self::Title(_) => PropertyKind::Title,
            Self::RichText(_) => PropertyKind::RichText,
            Self::Url(_) => PropertyKind::Url,
            Self::Date { .. } => PropertyKind::Date,
            Self::Select(_) => PropertyKind::Select,
            Self::MultiSelect(_) => PropertyKind::MultiSelect,
            Self::Status(_) => PropertyKind::Status,
        }
    }

    /// A single named option, written through a status or select property.
    pub fn option(kind: PropertyKind, name: &str) -> Option<Self> {
        match kind {
            PropertyKind::Status => Some(Self::Status(name.to_string())),
            PropertyKind::Select => Some(Self::Select(name.to_string())),
            _ => None,
        }
    }

    /// Like [`PropertyValue::option`], but free text is accepted as well.
    pub fn label(kind: PropertyKind, text: &str) -> Option<Self> {
        match kind {
            PropertyKind::RichText => Some(Self::RichText(text.to_string())),
            other => Self::option(other, text),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Title(text) => json!({ "title": rich_text_json(text) }),
            Self::RichText(text) => json!({ "rich_text": rich_text_json(text) }),
            Self::Url(url) => json!({ "url": url }),
            Self::Date { start: None, .. } => json!({ "date": null }),
            Self::Date { start, end } => json!({ "date": { "start": start, "end": end } }),
            Self::Select(name) => json!({ "select": { "name": name } }),
            Self::MultiSelect(names) => json!({
                "multi_select": names.iter().map(|name| json!({ "name": name })).collect::<Vec<_>>()
            }),
            Self::Status(name) => json!({ "status": { "name": name } }),
        }
    }
}

fn rich_text_json(text: &str) -> JsonValue {
    if text.is_empty() {
        json!([])
    } else {
        json!([{ "type": "text", "text": { "content": text } }])
    }
}

pub fn properties_json(properties: &PropertyMap) -> JsonValue {
    JsonValue::Object(
        properties
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect(),
    )
}

/// A property added by `ensure_schema`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDefinition {
    pub name: String,
    pub kind: PropertyKind,
    pub options: Vec<String>,
}

impl PropertyDefinition {
    pub fn select(name: impl Into<String>, options: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Select,
            options: options.into_iter().collect(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        let body = match self.kind {
            PropertyKind::Select | PropertyKind::MultiSelect | PropertyKind::Status => json!({
                "options": self.options.iter().map(|name| json!({ "name": name })).collect::<Vec<_>>()
            }),
            _ => json!({}),
        };
        let mut definition = Map::new();
        definition.insert(self.kind.type_name().to_string(), body);
        JsonValue::Object(definition)
    }
}

/// One page of the remote database.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePage {
    pub id: String,
    pub archived: bool,
    pub properties: Map<String, JsonValue>,
}

impl RemotePage {
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        let id = value.get("id")?.as_str()?.to_string();
        let properties = value
            .get("properties")
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default();
        Some(Self {
            id,
            archived: value
                .get("archived")
                .and_then(JsonValue::as_bool)
                .unwrap_or(false),
            properties,
        })
    }

    pub fn from_properties(id: impl Into<String>, properties: &PropertyMap) -> Self {
        let mut page = Self {
            id: id.into(),
            archived: false,
            properties: Map::new(),
        };
        page.apply(properties);
        page
    }

    pub fn apply(&mut self, properties: &PropertyMap) {
        for (name, value) in properties {
            self.properties.insert(name.clone(), value.to_json());
        }
    }

    /// Text of a title, rich-text, url, select or status property.
    pub fn text(&self, property: &str) -> Option<String> {
        let value = self.properties.get(property)?;
        for key in ["title", "rich_text"] {
            if let Some(parts) = value.get(key).and_then(JsonValue::as_array) {
                let text: String = parts.iter().filter_map(rich_text_part).collect();
                return Some(text);
            }
        }
        if let Some(url) = value.get("url") {
            return url.as_str().map(str::to_string);
        }
        for key in ["select", "status"] {
            if let Some(option) = value.get(key) {
                return option
                    .get("name")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string);
            }
        }
        None
    }

    pub fn date_start(&self, property: &str) -> Option<String> {
        self.properties
            .get(property)?
            .get("date")?
            .get("start")?
            .as_str()
            .map(str::to_string)
    }

    pub fn option_names(&self, property: &str) -> Vec<String> {
        self.properties
            .get(property)
            .and_then(|value| value.get("multi_select"))
            .and_then(JsonValue::as_array)
            .map(|options| {
                options
                    .iter()
                    .filter_map(|option| option.get("name").and_then(JsonValue::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn url(&self) -> String {
        self.text(PROP_URL).unwrap_or_default()
    }

    pub fn url_key(&self) -> String {
        normalize_url(&self.url())
    }
}

fn rich_text_part(part: &JsonValue) -> Option<&str> {
    part.get("plain_text")
        .and_then(JsonValue::as_str)
        .or_else(|| part.get("text")?.get("content")?.as_str())
}

/// Restricts queries to pages carrying this tracker's `Source` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceScope {
    pub kind: PropertyKind,
    pub tag: String,
}

impl SourceScope {
    pub fn from_schema(schema: &RemoteSchema, tag: &str) -> Option<Self> {
        match schema.kind(PROP_SOURCE)? {
            kind @ (PropertyKind::Select | PropertyKind::Status | PropertyKind::RichText) => {
                Some(Self {
                    kind,
                    tag: tag.to_string(),
                })
            }
            _ => None,
        }
    }

    pub fn admits(&self, page: &RemotePage) -> bool {
        page.text(PROP_SOURCE).as_deref() == Some(self.tag.as_str())
    }

    fn clause(&self) -> JsonValue {
        let mut clause = Map::new();
        clause.insert("property".to_string(), json!(PROP_SOURCE));
        clause.insert(
            self.kind.type_name().to_string(),
            json!({ "equals": self.tag }),
        );
        JsonValue::Object(clause)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryFilter {
    UrlEquals(String),
    NameAndDate { name: String, date: String },
    All,
}

impl QueryFilter {
    fn clauses(&self) -> Vec<JsonValue> {
        match self {
            Self::UrlEquals(url) => vec![json!({ "property": PROP_URL, "url": { "equals": url } })],
            Self::NameAndDate { name, date } => vec![
                json!({ "property": PROP_NAME, "title": { "equals": name } }),
                json!({ "property": PROP_DATE, "date": { "equals": date } }),
            ],
            Self::All => Vec::new(),
        }
    }

    fn matches(&self, page: &RemotePage) -> bool {
        match self {
            Self::UrlEquals(url) => page.url() == *url,
            Self::NameAndDate { name, date } => {
                page.text(PROP_NAME).as_deref() == Some(name.as_str())
                    && page.date_start(PROP_DATE).as_deref() == Some(date.as_str())
            }
            Self::All => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub filter: QueryFilter,
    pub scope: Option<SourceScope>,
    pub page_size: u32,
    pub start_cursor: Option<String>,
}

impl Query {
    pub fn new(filter: QueryFilter, scope: Option<SourceScope>) -> Self {
        let page_size = match filter {
            QueryFilter::UrlEquals(_) => 10,
            QueryFilter::NameAndDate { .. } => 25,
            QueryFilter::All => 100,
        };
        Self {
            filter,
            scope,
            page_size,
            start_cursor: None,
        }
    }

    pub fn after(mut self, cursor: Option<String>) -> Self {
        self.start_cursor = cursor;
        self
    }

    /// Re-check of a server result: live and inside the source scope.
    pub fn admits(&self, page: &RemotePage) -> bool {
        !page.archived && self.scope.as_ref().map_or(true, |scope| scope.admits(page))
    }

    /// Full client-side evaluation, as the in-memory backend answers queries.
    pub fn matches(&self, page: &RemotePage) -> bool {
        self.admits(page) && self.filter.matches(page)
    }

    pub fn body(&self) -> JsonValue {
        let mut clauses = self.filter.clauses();
        if let Some(scope) = &self.scope {
            clauses.push(scope.clause());
        }

        let mut body = Map::new();
        match clauses.len() {
            0 => {}
            1 => {
                body.insert("filter".to_string(), clauses.remove(0));
            }
            _ => {
                body.insert("filter".to_string(), json!({ "and": clauses }));
            }
        }
        body.insert("page_size".to_string(), json!(self.page_size));
        if let Some(cursor) = &self.start_cursor {
            body.insert("start_cursor".to_string(), json!(cursor));
        }
        JsonValue::Object(body)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    pub pages: Vec<RemotePage>,
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait RemoteDatabase: Send + Sync {
    async fn retrieve_schema(&self) -> Result<RemoteSchema, RemoteError>;
    async fn query(&self, query: &Query) -> Result<QueryPage, RemoteError>;
    /// Returns the id of the new page.
    async fn create_page(&self, properties: &PropertyMap) -> Result<String, RemoteError>;
    async fn update_page(&self, page_id: &str, properties: &PropertyMap) -> Result<(), RemoteError>;
    async fn archive_page(&self, page_id: &str) -> Result<(), RemoteError>;
    async fn add_properties(&self, definitions: &[PropertyDefinition]) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scoped() -> Option<SourceScope> {
        Some(SourceScope {
            kind: PropertyKind::Select,
            tag: "developers.events".to_string(),
        })
    }

    #[test]
    fn url_query_body_combines_scope() {
        let query = Query::new(QueryFilter::UrlEquals("https://devconf.info/cfp".into()), scoped());
        assert_eq!(
            query.body(),
            json!({
                "filter": { "and": [
                    { "property": "URL", "url": { "equals": "https://devconf.info/cfp" } },
                    { "property": "Source", "select": { "equals": "developers.events" } }
                ]},
                "page_size": 10
            })
        );
    }

    #[test]
    fn unscoped_listing_has_no_filter_and_carries_cursor() {
        let query = Query::new(QueryFilter::All, None).after(Some("abc".into()));
        assert_eq!(query.body(), json!({ "page_size": 100, "start_cursor": "abc" }));
    }

    #[test]
    fn schema_reads_declared_kinds() {
        let schema = RemoteSchema::from_database_json(&json!({
            "properties": {
                "Name": { "id": "title", "type": "title", "title": {} },
                "[CFP] Status": { "id": "x", "type": "status", "status": {} },
                "Formula": { "id": "y", "type": "formula" }
            }
        }));
        assert_eq!(schema.kind(PROP_NAME), Some(PropertyKind::Title));
        assert_eq!(schema.kind(PROP_STATUS), Some(PropertyKind::Status));
        assert_eq!(schema.kind("Formula"), Some(PropertyKind::Other));
        assert_eq!(schema.kind(PROP_SOURCE), None);
    }

    #[test]
    fn page_accessors_read_response_shapes() {
        let page = RemotePage::from_json(&json!({
            "id": "p1",
            "archived": false,
            "properties": {
                "Name": { "type": "title", "title": [{ "plain_text": "Jfokus" }] },
                "URL": { "type": "url", "url": "https://WWW.jfokus.se/" },
                "Date": { "type": "date", "date": { "start": "2026-02-02", "end": null } },
                "Technology": { "type": "multi_select", "multi_select": [{ "name": "java" }, { "name": "cloud" }] },
                "Source": { "type": "select", "select": { "name": "developers.events" } },
                "[CFP] Status": { "type": "status", "status": null }
            }
        }))
        .unwrap();

        assert_eq!(page.text(PROP_NAME).as_deref(), Some("Jfokus"));
        assert_eq!(page.url_key(), "https://www.jfokus.se");
        assert_eq!(page.date_start(PROP_DATE).as_deref(), Some("2026-02-02"));
        assert_eq!(page.option_names(PROP_TECHNOLOGY), vec!["java", "cloud"]);
        assert_eq!(page.text(PROP_STATUS), None);
        assert!(scoped().unwrap().admits(&page));
    }

    #[test]
    fn scope_requires_a_taggable_source_property() {
        let select = RemoteSchema::from_properties([(PROP_SOURCE, PropertyKind::Select)]);
        let multi = RemoteSchema::from_properties([(PROP_SOURCE, PropertyKind::MultiSelect)]);
        assert!(SourceScope::from_schema(&select, "x").is_some());
        assert!(SourceScope::from_schema(&multi, "x").is_none());
        assert!(SourceScope::from_schema(&RemoteSchema::default(), "x").is_none());
    }

    #[test]
    fn retain_writable_drops_mismatched_kinds() {
        let schema = RemoteSchema::from_properties([
            (PROP_NAME, PropertyKind::Title),
            (PROP_LOCATION, PropertyKind::Select),
        ]);
        let mut props = PropertyMap::new();
        props.insert(PROP_NAME.into(), PropertyValue::Title("A".into()));
        props.insert(PROP_LOCATION.into(), PropertyValue::RichText("Brno".into()));
        props.insert(PROP_CFP_URL.into(), PropertyValue::Url(None));
        schema.retain_writable(&mut props);
        assert_eq!(props.keys().collect::<Vec<_>>(), vec![PROP_NAME]);

        let mut untouched = props.clone();
        RemoteSchema::default().retain_writable(&mut untouched);
        assert_eq!(untouched, props);
    }

    #[test]
    fn date_without_start_clears_the_property() {
        let cleared = PropertyValue::Date { start: None, end: None };
        assert_eq!(cleared.to_json(), json!({ "date": null }));
        assert_eq!(
            PropertyValue::label(PropertyKind::RichText, "developers.events"),
            Some(PropertyValue::RichText("developers.events".into()))
        );
        assert_eq!(PropertyValue::option(PropertyKind::RichText, "Closed"), None);
    }
}
