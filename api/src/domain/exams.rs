//! Exam lookups used to resolve the id in GET /cheatingLogs/{examId}

use sqlx::{Executor, Postgres};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExamRow {
    pub id: i64,
    pub exam_code: String,
    pub exam_name: String,
}

pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<ExamRow>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as("SELECT id, exam_code, exam_name FROM exams WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub async fn find_by_code<'e, E>(executor: E, code: &str) -> Result<Option<ExamRow>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as("SELECT id, exam_code, exam_name FROM exams WHERE exam_code = $1")
        .bind(code)
        .fetch_optional(executor)
        .await
}
