//! Cheating log domain - DB queries for cheating_logs
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` and `&mut PgConnection` (for transactions).

use sqlx::types::Json;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::models::{CheatingLogRecord, NewCheatingLog};

const COLUMNS: &str = "id, exam_id, exam_uuid, attempt_id, username, email, \
     no_face_count, multiple_face_count, cell_phone_count, prohibited_object_count, \
     screenshots, created_at";

/// Inserts a log. Returns `None` when a log with the same attempt id exists.
pub async fn insert_log<'e, E>(
    executor: E,
    log: &NewCheatingLog,
) -> Result<Option<CheatingLogRecord>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        r#"
        INSERT INTO cheating_logs (
            exam_id, exam_uuid, attempt_id, username, email,
            no_face_count, multiple_face_count, cell_phone_count, prohibited_object_count,
            screenshots
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (attempt_id) WHERE attempt_id IS NOT NULL DO NOTHING
        RETURNING {COLUMNS}
        "#
    );
    sqlx::query_as(&sql)
        .bind(&log.exam_id)
        .bind(&log.exam_uuid)
        .bind(log.attempt_id)
        .bind(&log.username)
        .bind(&log.email)
        .bind(log.no_face_count)
        .bind(log.multiple_face_count)
        .bind(log.cell_phone_count)
        .bind(log.prohibited_object_count)
        .bind(Json(&log.screenshots))
        .fetch_optional(executor)
        .await
}

pub async fn find_by_attempt<'e, E>(
    executor: E,
    attempt_id: Uuid,
) -> Result<Option<CheatingLogRecord>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!("SELECT {COLUMNS} FROM cheating_logs WHERE attempt_id = $1");
    sqlx::query_as(&sql)
        .bind(attempt_id)
        .fetch_optional(executor)
        .await
}

/// Logs stored under the exam's durable id or its code, newest first.
/// Older clients sent the code as `examId`; newer ones send it as `examUUID`.
pub async fn list_for_exam<'e, E>(
    executor: E,
    durable_id: &str,
    exam_code: &str,
) -> Result<Vec<CheatingLogRecord>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        r#"
        SELECT {COLUMNS} FROM cheating_logs
        WHERE exam_id = $1 OR exam_id = $2 OR exam_uuid = $2
        ORDER BY created_at DESC, id DESC
        "#
    );
    sqlx::query_as(&sql)
        .bind(durable_id)
        .bind(exam_code)
        .fetch_all(executor)
        .await
}
