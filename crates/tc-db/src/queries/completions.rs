use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{CompletionRecord, SessionModel};

#[allow(clippy::too_many_arguments)]
pub async fn insert_completion_record(
    pool: &PgPool,
    session_id: Uuid,
    task_id: Uuid,
    model: SessionModel,
    success: bool,
    duration_ms: i64,
    tokens_used: i64,
    cost_usd: f64,
    error_reason: Option<&str>,
) -> Result<CompletionRecord> {
    let row = sqlx::query_as::<_, CompletionRecord>(
        "INSERT INTO completion_records \
         (session_id, task_id, model, success, duration_ms, tokens_used, cost_usd, error_reason) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
    )
    .bind(session_id)
    .bind(task_id)
    .bind(model.to_string())
    .bind(success)
    .bind(duration_ms)
    .bind(tokens_used)
    .bind(cost_usd)
    .bind(error_reason)
    .fetch_one(pool)
    .await
    .context("failed to insert completion record")?;
    Ok(row)
}

/// Completion records for a task, most recent first -- used by the
/// productivity monitor's consecutive-failure streak calculation.
pub async fn recent_completions_for_task(
    pool: &PgPool,
    task_id: Uuid,
    limit: i64,
) -> Result<Vec<CompletionRecord>> {
    let rows = sqlx::query_as::<_, CompletionRecord>(
        "SELECT * FROM completion_records WHERE task_id = $1 ORDER BY recorded_at DESC LIMIT $2",
    )
    .bind(task_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to fetch recent completions")?;
    Ok(rows)
}

pub async fn completions_since(pool: &PgPool, since: DateTime<Utc>) -> Result<Vec<CompletionRecord>> {
    let rows = sqlx::query_as::<_, CompletionRecord>(
        "SELECT * FROM completion_records WHERE recorded_at >= $1 ORDER BY recorded_at",
    )
    .bind(since)
    .fetch_all(pool)
    .await
    .context("failed to fetch completions since")?;
    Ok(rows)
}
