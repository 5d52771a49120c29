use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::counts::CountSnapshot;
use crate::evidence::EvidenceRecord;
use crate::session_log::SessionLog;
use crate::submitter::LogStore;

/// Errors that can occur while talking to the cheating log API.
#[derive(Debug)]
pub enum ApiError {
    Http(reqwest::Error),
    UnexpectedStatus { status: StatusCode, body: String },
    InvalidUrl(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Http(err) => write!(f, "http error: {err}"),
            ApiError::UnexpectedStatus { status, body } => {
                write!(f, "unexpected status {status}: {body}")
            }
            ApiError::InvalidUrl(url) => write!(f, "invalid API url: {url}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(value: reqwest::Error) -> Self {
        ApiError::Http(value)
    }
}

/// Body of `POST /cheatingLogs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheatingLogPayload {
    #[serde(rename = "examId")]
    pub exam_id: String,
    #[serde(rename = "examUUID", skip_serializing_if = "Option::is_none")]
    pub exam_uuid: Option<String>,
    #[serde(rename = "attemptId")]
    pub attempt_id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(flatten)]
    pub counts: CountSnapshot,
    pub screenshots: Vec<EvidenceRecord>,
}

impl CheatingLogPayload {
    pub fn from_log(log: &SessionLog) -> Self {
        let identity = &log.identity;
        Self {
            exam_id: identity.exam.id.trim().to_string(),
            exam_uuid: identity.exam.code.clone().filter(|code| !code.trim().is_empty()),
            attempt_id: log.attempt_id,
            username: identity.username.trim().to_string(),
            email: identity.email.trim().to_string(),
            counts: log.counts,
            screenshots: log.evidence.clone(),
        }
    }
}

/// A cheating log as stored by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedLog {
    #[serde(alias = "_id", deserialize_with = "id_from_any")]
    pub id: String,
    #[serde(rename = "examId")]
    pub exam_id: String,
    #[serde(rename = "examUUID", default, skip_serializing_if = "Option::is_none")]
    pub exam_uuid: Option<String>,
    #[serde(rename = "attemptId", default, skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<Uuid>,
    pub username: String,
    pub email: String,
    #[serde(flatten)]
    pub counts: CountSnapshot,
    #[serde(default)]
    pub screenshots: Vec<EvidenceRecord>,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn id_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(serde::de::Error::custom(format!("unsupported id {other}"))),
    }
}

/// Flattens the shapes the log endpoint has returned over time into one
/// sequence: a bare array, or an object wrapping it under `logs` or `data`.
/// Anything else yields no logs.
pub fn normalize_logs(body: Value) -> Vec<PersistedLog> {
    let entries = match body {
        Value::Array(entries) => entries,
        Value::Object(mut wrapper) => match wrapper.remove("logs").or_else(|| wrapper.remove("data")) {
            Some(Value::Array(entries)) => entries,
            _ => {
                debug!("log response object has no log array");
                return Vec::new();
            }
        },
        other => {
            debug!("unrecognized log response shape: {other}");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(log) => Some(log),
            Err(err) => {
                debug!("skipping unparseable log entry: {err}");
                None
            }
        })
        .collect()
}

/// Blocking client for the cheating log endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    http: Client,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Create a new client targeting the provided base URL.
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, ApiError> {
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).map_err(|_| ApiError::InvalidUrl(base_url.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(base_url.to_string()));
        }
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            base_url,
            http,
            auth_token,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.auth_token {
            request.header(AUTHORIZATION, format!("Bearer {}", token))
        } else {
            request
        }
    }
}

impl LogStore for ApiClient {
    fn save_log(&self, payload: &CheatingLogPayload) -> Result<PersistedLog, ApiError> {
        let url = self.endpoint(&["cheatingLogs"])?;
        let response = self.authorized(self.http.post(url).json(payload)).send()?;

        if response.status().is_success() {
            response.json().map_err(ApiError::from)
        } else {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            Err(ApiError::UnexpectedStatus { status, body })
        }
    }

    fn fetch_logs(&self, exam_id: &str) -> Result<Vec<PersistedLog>, ApiError> {
        let url = self.endpoint(&["cheatingLogs", exam_id])?;
        let response = self.authorized(self.http.get(url)).send()?;

        if response.status().is_success() {
            let body: Value = response.json().unwrap_or(Value::Null);
            Ok(normalize_logs(body))
        } else {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            Err(ApiError::UnexpectedStatus { status, body })
        }
    }
}
