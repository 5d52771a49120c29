//! Wire and row types for cheating logs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use uuid::Uuid;

/// One evidence screenshot attached to a log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screenshot {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "detectedAt", default, skip_serializing_if = "Option::is_none")]
    pub detected_at: Option<DateTime<Utc>>,
}

/// Body of POST /cheatingLogs, as loose as clients send it
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheatingLogPayload {
    #[serde(default, deserialize_with = "loose_id")]
    pub exam_id: Option<String>,
    #[serde(rename = "examUUID", default, deserialize_with = "loose_id")]
    pub exam_uuid: Option<String>,
    #[serde(default)]
    pub attempt_id: Option<Uuid>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "loose_count")]
    pub no_face_count: i32,
    #[serde(default, deserialize_with = "loose_count")]
    pub multiple_face_count: i32,
    #[serde(default, deserialize_with = "loose_count")]
    pub cell_phone_count: i32,
    #[serde(default, deserialize_with = "loose_count")]
    pub prohibited_object_count: i32,
    #[serde(default)]
    pub screenshots: Option<Vec<Screenshot>>,
}

/// A payload that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct NewCheatingLog {
    pub exam_id: String,
    pub exam_uuid: Option<String>,
    pub attempt_id: Option<Uuid>,
    pub username: String,
    pub email: String,
    pub no_face_count: i32,
    pub multiple_face_count: i32,
    pub cell_phone_count: i32,
    pub prohibited_object_count: i32,
    pub screenshots: Vec<Screenshot>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl CheatingLogPayload {
    /// Returns the 400 message on failure.
    pub fn validate(self) -> Result<NewCheatingLog, &'static str> {
        let exam_id = non_blank(self.exam_id).ok_or("examId is required")?;
        let (Some(username), Some(email)) = (non_blank(self.username), non_blank(self.email)) else {
            return Err("username and email are required");
        };

        Ok(NewCheatingLog {
            exam_id,
            exam_uuid: non_blank(self.exam_uuid),
            attempt_id: self.attempt_id,
            username,
            email,
            no_face_count: self.no_face_count,
            multiple_face_count: self.multiple_face_count,
            cell_phone_count: self.cell_phone_count,
            prohibited_object_count: self.prohibited_object_count,
            screenshots: self.screenshots.unwrap_or_default(),
        })
    }
}

/// Strings pass through, numbers are stringified, anything else is absent.
fn loose_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(id) => Some(id),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    })
}

/// Null, missing, negative or non-numeric counts become 0.
fn loose_count<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let number = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(match number {
        Some(n) if n.is_finite() && n > 0.0 => n.min(f64::from(i32::MAX)) as i32,
        _ => 0,
    })
}

/// A stored cheating log
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CheatingLogRecord {
    pub id: i64,
    pub exam_id: String,
    #[serde(rename = "examUUID", skip_serializing_if = "Option::is_none")]
    pub exam_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<Uuid>,
    pub username: String,
    pub email: String,
    pub no_face_count: i32,
    pub multiple_face_count: i32,
    pub cell_phone_count: i32,
    pub prohibited_object_count: i32,
    pub screenshots: Json<Vec<Screenshot>>,
    pub created_at: DateTime<Utc>,
}
