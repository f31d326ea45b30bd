//! Notion REST client for one database.

use std::fmt;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use cfp_storage::HttpClientConfig;
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::debug;

use super::{
    properties_json, PropertyDefinition, PropertyMap, Query, QueryPage, RemoteDatabase,
    RemoteError, RemotePage, RemoteSchema,
};

pub const DEFAULT_NOTION_BASE_URL: &str = "https://api.notion.com/v1";
pub const DEFAULT_NOTION_VERSION: &str = "2022-06-28";

const ENV_TOKEN: &str = "NOTION_API_TOKEN";
const ENV_DATABASE: &str = "NOTION_DATABASE_ID";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<&'static str>),
}

#[derive(Clone)]
pub struct NotionConfig {
    pub api_token: String,
    pub database_id: String,
    pub base_url: String,
    pub notion_version: String,
    pub http_timeout_secs: u64,
}

impl fmt::Debug for NotionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionConfig")
            .field("api_token", &"<redacted>")
            .field("database_id", &self.database_id)
            .field("base_url", &self.base_url)
            .field("notion_version", &self.notion_version)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish()
    }
}

impl NotionConfig {
    pub fn new(api_token: impl Into<String>, database_id: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            database_id: database_id.into(),
            base_url: DEFAULT_NOTION_BASE_URL.to_string(),
            notion_version: DEFAULT_NOTION_VERSION.to_string(),
            http_timeout_secs: 30,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Both credentials are required; every missing one is reported at once.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let token = read(ENV_TOKEN);
        let database = read(ENV_DATABASE);

        let (Some(token), Some(database)) = (token.clone(), database.clone()) else {
            let missing = [(ENV_TOKEN, token.is_none()), (ENV_DATABASE, database.is_none())]
                .into_iter()
                .filter_map(|(key, absent)| absent.then_some(key))
                .collect();
            return Err(ConfigError::MissingEnv(missing));
        };

        let mut config = Self::new(token, database);
        if let Some(base_url) = read("NOTION_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(version) = read("NOTION_VERSION") {
            config.notion_version = version;
        }
        if let Some(timeout) = read("CFP_HTTP_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.http_timeout_secs = timeout;
        }
        Ok(config)
    }
}

/// Every call is a single attempt; non-success statuses surface with their body.
#[derive(Debug, Clone)]
pub struct NotionClient {
    client: reqwest::Client,
    config: NotionConfig,
}

impl NotionClient {
    pub fn new(config: NotionConfig) -> anyhow::Result<Self> {
        let client = HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            ..HttpClientConfig::default()
        }
        .build_client()
        .context("building notion client")?;
        Ok(Self { client, config })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        self.client
            .request(method, url)
            .bearer_auth(&self.config.api_token)
            .header("Notion-Version", &self.config.notion_version)
    }

    async fn send(&self, request: RequestBuilder) -> Result<JsonValue, RemoteError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<JsonValue>().await?)
    }

    fn database_path(&self) -> String {
        format!("databases/{}", self.config.database_id)
    }
}

#[async_trait]
impl RemoteDatabase for NotionClient {
    async fn retrieve_schema(&self) -> Result<RemoteSchema, RemoteError> {
        let document = self
            .send(self.request(Method::GET, &self.database_path()))
            .await?;
        Ok(RemoteSchema::from_database_json(&document))
    }

    async fn query(&self, query: &Query) -> Result<QueryPage, RemoteError> {
        debug!(filter = ?query.filter, cursor = ?query.start_cursor, "querying database");
        let path = format!("{}/query", self.database_path());
        let body = self
            .send(self.request(Method::POST, &path).json(&query.body()))
            .await?;

        let results = body
            .get("results")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| RemoteError::Decode("query response without results".to_string()))?;
        let pages = results.iter().filter_map(RemotePage::from_json).collect();
        let has_more = body
            .get("has_more")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        let next_cursor = body
            .get("next_cursor")
            .and_then(JsonValue::as_str)
            .filter(|_| has_more)
            .map(str::to_string);
        Ok(QueryPage { pages, next_cursor })
    }

    async fn create_page(&self, properties: &PropertyMap) -> Result<String, RemoteError> {
        let body = json!({
            "parent": { "database_id": self.config.database_id },
            "properties": properties_json(properties),
        });
        let created = self
            .send(self.request(Method::POST, "pages").json(&body))
            .await?;
        created
            .get("id")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| RemoteError::Decode("created page without id".to_string()))
    }

    async fn update_page(&self, page_id: &str, properties: &PropertyMap) -> Result<(), RemoteError> {
        let body = json!({ "properties": properties_json(properties) });
        self.send(self.request(Method::PATCH, &format!("pages/{page_id}")).json(&body))
            .await?;
        Ok(())
    }

    async fn archive_page(&self, page_id: &str) -> Result<(), RemoteError> {
        self.send(
            self.request(Method::PATCH, &format!("pages/{page_id}"))
                .json(&json!({ "archived": true })),
        )
        .await?;
        Ok(())
    }

    async fn add_properties(&self, definitions: &[PropertyDefinition]) -> Result<(), RemoteError> {
        let properties: serde_json::Map<String, JsonValue> = definitions
            .iter()
            .map(|definition| (definition.name.clone(), definition.to_json()))
            .collect();
        self.send(
            self.request(Method::PATCH, &self.database_path())
                .json(&json!({ "properties": properties })),
        )
        .await?;
        Ok(())
    }
}
