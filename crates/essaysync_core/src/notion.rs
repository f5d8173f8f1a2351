use std::collections::BTreeMap;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::blocks::Block;
use crate::error::SyncError;

/// Where new pages are created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum ParentScope {
    Page(String),
    Database(String),
}

impl ParentScope {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Page(id) => json!({ "page_id": id }),
            Self::Database(id) => json!({ "database_id": id }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChildBlock {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChildrenPage {
    pub results: Vec<ChildBlock>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

/// Property name -> property type, as reported by a database schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseSchema {
    pub properties: BTreeMap<String, String>,
}

impl DatabaseSchema {
    pub fn title_property(&self) -> Option<&str> {
        self.properties
            .iter()
            .find(|(_, kind)| kind.as_str() == "title")
            .map(|(name, _)| name.as_str())
    }
}

pub trait NotionApi {
    fn retrieve_database(&mut self, database_id: &str) -> Result<DatabaseSchema>;
    fn create_page(
        &mut self,
        parent: &ParentScope,
        title_property: &str,
        title: &str,
        children: &[Block],
    ) -> Result<String>;
    fn update_page_title(&mut self, page_id: &str, title_property: &str, title: &str)
    -> Result<()>;
    fn archive_page(&mut self, page_id: &str) -> Result<()>;
    fn list_block_children(
        &mut self,
        block_id: &str,
        start_cursor: Option<&str>,
        page_size: usize,
    ) -> Result<ChildrenPage>;
    fn delete_block(&mut self, block_id: &str) -> Result<()>;
    fn append_block_children(&mut self, block_id: &str, children: &[Block]) -> Result<()>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct NotionClientConfig {
    pub api_url: String,
    pub token: String,
    pub notion_version: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

pub struct NotionClient {
    client: Client,
    config: NotionClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl NotionClient {
    pub fn new(config: NotionClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build Notion HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn request_json(
        &mut self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = format!("{}/{}", self.config.api_url.trim_end_matches('/'), path);
        let max_retries = self.config.max_retries;
        let idempotent = is_idempotent(&method, path);

        for attempt in 0..=max_retries {
            self.apply_rate_limit();
            debug!(method = %method, url = %url, attempt, "notion request");
            let mut request = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(&self.config.token)
                .header("Notion-Version", self.config.notion_version.as_str())
                .header("User-Agent", self.config.user_agent.as_str());
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<Value>()
                            .context("failed to decode Notion API JSON response");
                    }
                    if should_retry(Failure::Status(status), idempotent, attempt, max_retries) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    let payload = response.text().unwrap_or_default();
                    return Err(api_error(status, &payload).into());
                }
                Err(error) => {
                    if should_retry(Failure::from(&error), idempotent, attempt, max_retries) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).with_context(|| format!("failed to call Notion API {path}"));
                }
            }
        }

        bail!("Notion API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }
}

impl NotionApi for NotionClient {
    fn retrieve_database(&mut self, database_id: &str) -> Result<DatabaseSchema> {
        let response = self.request_json(
            Method::GET,
            &format!("databases/{database_id}"),
            &[],
            None,
        )?;
        parse_database_schema(response)
    }

    fn create_page(
        &mut self,
        parent: &ParentScope,
        title_property: &str,
        title: &str,
        children: &[Block],
    ) -> Result<String> {
        let body = json!({
            "parent": parent.to_json(),
            "properties": title_properties(title_property, title),
            "children": children,
        });
        let response = self.request_json(Method::POST, "pages", &[], Some(&body))?;
        let created: ObjectResponse =
            serde_json::from_value(response).context("failed to decode create page response")?;
        Ok(created.id)
    }

    fn update_page_title(
        &mut self,
        page_id: &str,
        title_property: &str,
        title: &str,
    ) -> Result<()> {
        let body = json!({ "properties": title_properties(title_property, title) });
        self.request_json(
            Method::PATCH,
            &format!("pages/{page_id}"),
            &[],
            Some(&body),
        )?;
        Ok(())
    }

    fn archive_page(&mut self, page_id: &str) -> Result<()> {
        let body = json!({ "archived": true });
        self.request_json(
            Method::PATCH,
            &format!("pages/{page_id}"),
            &[],
            Some(&body),
        )?;
        Ok(())
    }

    fn list_block_children(
        &mut self,
        block_id: &str,
        start_cursor: Option<&str>,
        page_size: usize,
    ) -> Result<ChildrenPage> {
        let mut query = vec![("page_size", page_size.to_string())];
        if let Some(cursor) = start_cursor {
            query.push(("start_cursor", cursor.to_string()));
        }
        let response = self.request_json(
            Method::GET,
            &format!("blocks/{block_id}/children"),
            &query,
            None,
        )?;
        parse_children_page(response)
    }

    fn delete_block(&mut self, block_id: &str) -> Result<()> {
        self.request_json(Method::DELETE, &format!("blocks/{block_id}"), &[], None)?;
        Ok(())
    }

    fn append_block_children(&mut self, block_id: &str, children: &[Block]) -> Result<()> {
        let body = json!({ "children": children });
        self.request_json(
            Method::PATCH,
            &format!("blocks/{block_id}/children"),
            &[],
            Some(&body),
        )?;
        Ok(())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn title_properties(title_property: &str, title: &str) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert(
        title_property.to_string(),
        json!({ "title": [{ "text": { "content": title } }] }),
    );
    Value::Object(properties)
}

fn parse_database_schema(response: Value) -> Result<DatabaseSchema> {
    let parsed: DatabaseResponse =
        serde_json::from_value(response).context("failed to decode database response")?;
    Ok(DatabaseSchema {
        properties: parsed
            .properties
            .into_iter()
            .map(|(name, property)| (name, property.kind))
            .collect(),
    })
}

fn parse_children_page(response: Value) -> Result<ChildrenPage> {
    let parsed: ListResponse =
        serde_json::from_value(response).context("failed to decode block children response")?;
    Ok(ChildrenPage {
        results: parsed
            .results
            .into_iter()
            .map(|item| ChildBlock { id: item.id })
            .collect(),
        has_more: parsed.has_more,
        next_cursor: parsed.next_cursor,
    })
}

/// Creating a page or appending children twice duplicates content.
fn is_idempotent(method: &Method, path: &str) -> bool {
    !(*method == Method::POST || (*method == Method::PATCH && path.ends_with("/children")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Status(StatusCode),
    Connect,
    Timeout,
    Transport,
    Other,
}

impl From<&reqwest::Error> for Failure {
    fn from(error: &reqwest::Error) -> Self {
        if error.is_connect() {
            Self::Connect
        } else if error.is_timeout() {
            Self::Timeout
        } else if error.is_request() {
            Self::Transport
        } else {
            Self::Other
        }
    }
}

/// A failed connect never reached the server and a 429 was rejected unapplied,
/// so only those are safe to repeat for non-idempotent calls.
fn should_retry(failure: Failure, idempotent: bool, attempt: usize, max_retries: usize) -> bool {
    if attempt >= max_retries {
        return false;
    }
    match failure {
        Failure::Status(status) if idempotent => is_retryable_status(status),
        Failure::Status(status) => status == StatusCode::TOO_MANY_REQUESTS,
        Failure::Connect => true,
        Failure::Timeout | Failure::Transport => idempotent,
        Failure::Other => false,
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Map a non-success response to [`SyncError::Api`], keeping Notion's
/// `code`/`message` when the body carries them.
fn api_error(status: StatusCode, body: &str) -> SyncError {
    let payload: ErrorPayload = serde_json::from_str(body).unwrap_or_default();
    SyncError::Api {
        status: status.as_u16(),
        code: payload.code.unwrap_or_else(|| "unknown_error".to_string()),
        message: payload.message.unwrap_or_else(|| {
            let body = body.trim();
            if body.is_empty() {
                format!("request failed with HTTP {}", status.as_u16())
            } else {
                body.to_string()
            }
        }),
    }
}

#[derive(Debug, Deserialize, Default)]
struct ErrorPayload {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DatabaseResponse {
    #[serde(default)]
    properties: BTreeMap<String, PropertyDefinition>,
}

#[derive(Debug, Deserialize)]
struct PropertyDefinition {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    results: Vec<ListItem>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    id: String,
}
