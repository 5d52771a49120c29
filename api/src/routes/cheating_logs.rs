//! Cheating log endpoints (/cheatingLogs)

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use log::{info, warn};
use serde_json::json;
use std::sync::Arc;

use super::auth::Authorized;
use crate::AppState;
use crate::domain::{cheating_logs, exams};
use crate::models::CheatingLogPayload;
use crate::services::error::LogErr;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/cheatingLogs", post(save_cheating_log))
        .route("/cheatingLogs/{exam_id}", get(list_cheating_logs))
}

fn message(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

/// POST /cheatingLogs - Store the log of one exam attempt
///
/// A replay carrying a known attempt id returns the stored record with 200.
async fn save_cheating_log(
    _auth: Authorized,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CheatingLogPayload>,
) -> Result<Response, StatusCode> {
    let log = match payload.validate() {
        Ok(log) => log,
        Err(reason) => {
            warn!("Rejected cheating log: {}", reason);
            return Ok(message(StatusCode::BAD_REQUEST, reason));
        }
    };

    if let Some(saved) = cheating_logs::insert_log(&state.db, &log)
        .await
        .log_500("Insert cheating log error")?
    {
        info!(
            "Saved cheating log {} for exam {} ({})",
            saved.id, saved.exam_id, saved.username
        );
        return Ok((StatusCode::CREATED, Json(saved)).into_response());
    }

    // Only a conflicting attempt id makes the insert return nothing.
    let attempt_id = log.attempt_id.ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    let existing = cheating_logs::find_by_attempt(&state.db, attempt_id)
        .await
        .log_500("Find cheating log by attempt error")?
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    info!("Cheating log for attempt {} already stored as {}", attempt_id, existing.id);
    Ok((StatusCode::OK, Json(existing)).into_response())
}

/// GET /cheatingLogs/{exam_id} - All logs for an exam, newest first
///
/// The path segment may be the exam's numeric id or its code.
async fn list_cheating_logs(
    _auth: Authorized,
    State(state): State<Arc<AppState>>,
    Path(exam_id): Path<String>,
) -> Result<Response, StatusCode> {
    let mut exam = None;
    if let Ok(id) = exam_id.parse::<i64>() {
        exam = exams::find_by_id(&state.db, id)
            .await
            .log_500("Find exam by id error")?;
    }
    if exam.is_none() {
        exam = exams::find_by_code(&state.db, &exam_id)
            .await
            .log_500("Find exam by code error")?;
    }
    let Some(exam) = exam else {
        return Ok(message(StatusCode::NOT_FOUND, "Exam not found"));
    };

    let logs = cheating_logs::list_for_exam(&state.db, &exam.id.to_string(), &exam.exam_code)
        .await
        .log_500("List cheating logs error")?;
    info!("Found {} cheating logs for exam {} ({})", logs.len(), exam.exam_name, exam.id);

    Ok(Json(logs).into_response())
}
