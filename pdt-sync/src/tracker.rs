//! Issue tracker client
//!
//! The tracker speaks a JSON command API: every call is a POST of
//! `{"cmd": ..., "token": ..., ...}` to `<url>/f/api/0/jsonapi`. Only the case
//! fields listed in [`CASE_COLUMNS`] are consumed.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pdt_common::db::CaseSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("pdt-sync/", env!("CARGO_PKG_VERSION"));
const API_PATH: &str = "/f/api/0/jsonapi";

/// Case columns requested from the tracker
pub const CASE_COLUMNS: &[&str] = &[
    "ixBug",
    "sTitle",
    "sOriginalTitle",
    "sProject",
    "sArea",
    "sFixFor",
    "dtFixFor",
    "dtLastUpdated",
    "tags",
    "cixproject",
    "revision",
];

/// Issue tracker errors
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    /// The tracker answered but reported errors for the command
    #[error("Tracker rejected {cmd}: {messages}")]
    Rejected { cmd: String, messages: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Case {0} not found in tracker")]
    CaseNotFound(i64),
}

/// A case as returned by the tracker's search command
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TrackerCase {
    #[serde(rename = "ixBug")]
    pub id: i64,
    #[serde(rename = "sTitle", default)]
    pub title: String,
    #[serde(rename = "sOriginalTitle", default)]
    pub original_title: Option<String>,
    #[serde(rename = "sProject", default)]
    pub project: Option<String>,
    #[serde(rename = "sArea", default)]
    pub area: Option<String>,
    #[serde(rename = "sFixFor", default)]
    pub fix_for: Option<String>,
    #[serde(rename = "dtFixFor", default)]
    pub fix_for_date: Option<String>,
    #[serde(rename = "dtLastUpdated", default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "cixproject", default)]
    pub ci_project: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
}

fn parse_datetime(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl TrackerCase {
    /// Local representation of the tracker state
    ///
    /// A fix-for that is not a release number (e.g. "Undecided") leaves the
    /// case without a release.
    pub fn into_snapshot(self) -> CaseSnapshot {
        let release_number = self.fix_for.as_deref().and_then(|s| s.trim().parse::<i64>().ok());
        let release_datetime = release_number.and(parse_datetime(self.fix_for_date.as_deref()));

        CaseSnapshot {
            id: self.id,
            original_title: self.original_title.unwrap_or_else(|| self.title.clone()),
            title: self.title,
            project: self.project.unwrap_or_default(),
            area: self.area.unwrap_or_default(),
            release_number,
            release_datetime,
            ci_project: non_empty(self.ci_project),
            revision: self.revision.unwrap_or_default(),
            tags: self.tags,
            modified_date: parse_datetime(self.last_updated.as_deref()),
        }
    }
}

/// Fields written back to the tracker by a push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseUpdate {
    pub case_id: i64,
    pub title: String,
    pub tags: Vec<String>,
}

/// Operations the sync tasks need from the tracker
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Current state of one case
    async fn fetch_case(&self, case_id: i64) -> Result<TrackerCase, TrackerError>;

    /// Ids of the cases matching a tracker search query
    async fn search(&self, query: &str) -> Result<Vec<i64>, TrackerError>;

    /// Write title and tags of a case
    async fn update_case(&self, update: &CaseUpdate) -> Result<(), TrackerError>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    errors: Vec<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchData {
    #[serde(default)]
    cases: Vec<TrackerCase>,
}

/// HTTP client for the tracker's JSON API
pub struct FogBugzClient {
    http_client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl FogBugzClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, TrackerError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TrackerError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), API_PATH),
            token: token.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Post one command and return its `data` payload
    async fn call(&self, cmd: &str, mut params: Value) -> Result<Value, TrackerError> {
        params["cmd"] = json!(cmd);
        params["token"] = json!(self.token);

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&params)
            .send()
            .await
            .map_err(|e| TrackerError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TrackerError::ApiError(status.as_u16(), error_text));
        }

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| TrackerError::ParseError(e.to_string()))?;

        if !body.errors.is_empty() {
            let messages = body
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(TrackerError::Rejected {
                cmd: cmd.to_string(),
                messages,
            });
        }

        Ok(body.data)
    }

    async fn search_cases(&self, query: &str, columns: &[&str]) -> Result<Vec<TrackerCase>, TrackerError> {
        let data = self.call("search", json!({ "q": query, "cols": columns })).await?;
        let data: SearchData = if data.is_null() {
            SearchData::default()
        } else {
            serde_json::from_value(data).map_err(|e| TrackerError::ParseError(e.to_string()))?
        };
        Ok(data.cases)
    }
}

#[async_trait]
impl IssueTracker for FogBugzClient {
    async fn fetch_case(&self, case_id: i64) -> Result<TrackerCase, TrackerError> {
        debug!(case_id, "Fetching case from tracker");
        self.search_cases(&case_id.to_string(), CASE_COLUMNS)
            .await?
            .into_iter()
            .find(|c| c.id == case_id)
            .ok_or(TrackerError::CaseNotFound(case_id))
    }

    async fn search(&self, query: &str) -> Result<Vec<i64>, TrackerError> {
        let ids: Vec<i64> = self
            .search_cases(query, &["ixBug"])
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        info!(query, found = ids.len(), "Tracker search completed");
        Ok(ids)
    }

    async fn update_case(&self, update: &CaseUpdate) -> Result<(), TrackerError> {
        self.call(
            "edit",
            json!({
                "ixBug": update.case_id,
                "sTitle": update.title,
                "sTags": update.tags.join(","),
            }),
        )
        .await?;
        info!(case_id = update.case_id, "Case updated in tracker");
        Ok(())
    }
}
