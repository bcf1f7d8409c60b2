use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{SessionModel, SessionRecord, SessionStatus};

/// Persist a finalized session. Sessions are never inserted while live --
/// the in-flight session is tracked only in the orchestration process's
/// memory and reaches the database once, at finalization.
#[allow(clippy::too_many_arguments)]
pub async fn insert_session_record(
    pool: &PgPool,
    id: Uuid,
    task_id: Uuid,
    model: SessionModel,
    status: SessionStatus,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    tokens_input: i64,
    tokens_output: i64,
    tokens_cache_read: i64,
    tokens_cache_creation: i64,
    cost_usd: f64,
    parent_session_id: Option<Uuid>,
    depth: i32,
) -> Result<SessionRecord> {
    let row = sqlx::query_as::<_, SessionRecord>(
        "INSERT INTO sessions \
         (id, task_id, model, status, started_at, completed_at, tokens_input, tokens_output, \
          tokens_cache_read, tokens_cache_creation, cost_usd, parent_session_id, depth) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
         RETURNING *",
    )
    .bind(id)
    .bind(task_id)
    .bind(model.to_string())
    .bind(status.to_string())
    .bind(started_at)
    .bind(completed_at)
    .bind(tokens_input)
    .bind(tokens_output)
    .bind(tokens_cache_read)
    .bind(tokens_cache_creation)
    .bind(cost_usd)
    .bind(parent_session_id)
    .bind(depth)
    .fetch_one(pool)
    .await
    .context("failed to insert session record")?;
    Ok(row)
}

pub async fn get_session(pool: &PgPool, session_id: Uuid) -> Result<Option<SessionRecord>> {
    let row = sqlx::query_as::<_, SessionRecord>("SELECT * FROM sessions WHERE id = $1")
        .bind(session_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch session")?;
    Ok(row)
}

pub async fn list_sessions_for_task(pool: &PgPool, task_id: Uuid) -> Result<Vec<SessionRecord>> {
    let rows = sqlx::query_as::<_, SessionRecord>(
        "SELECT * FROM sessions WHERE task_id = $1 ORDER BY started_at",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list sessions for task")?;
    Ok(rows)
}

pub async fn list_child_sessions(
    pool: &PgPool,
    parent_session_id: Uuid,
) -> Result<Vec<SessionRecord>> {
    let rows = sqlx::query_as::<_, SessionRecord>(
        "SELECT * FROM sessions WHERE parent_session_id = $1 ORDER BY started_at",
    )
    .bind(parent_session_id)
    .fetch_all(pool)
    .await
    .context("failed to list child sessions")?;
    Ok(rows)
}
