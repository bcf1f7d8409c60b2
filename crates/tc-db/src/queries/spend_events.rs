use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{SessionModel, SpendEvent};

pub async fn insert_spend_event(
    pool: &PgPool,
    task_id: Uuid,
    model: SessionModel,
    amount_usd: f64,
) -> Result<SpendEvent> {
    let row = sqlx::query_as::<_, SpendEvent>(
        "INSERT INTO spend_events (task_id, model, amount_usd) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(task_id)
    .bind(model.to_string())
    .bind(amount_usd)
    .fetch_one(pool)
    .await
    .context("failed to insert spend event")?;
    Ok(row)
}

/// Sum of spend recorded since `since`, used to seed the rolling spend
/// monitor's window when the process restarts.
pub async fn sum_spend_since(pool: &PgPool, since: DateTime<Utc>) -> Result<f64> {
    let total: Option<f64> =
        sqlx::query_scalar("SELECT SUM(amount_usd) FROM spend_events WHERE recorded_at >= $1")
            .bind(since)
            .fetch_one(pool)
            .await
            .context("failed to sum spend")?;
    Ok(total.unwrap_or(0.0))
}

pub async fn list_spend_since(pool: &PgPool, since: DateTime<Utc>) -> Result<Vec<SpendEvent>> {
    let rows = sqlx::query_as::<_, SpendEvent>(
        "SELECT * FROM spend_events WHERE recorded_at >= $1 ORDER BY recorded_at",
    )
    .bind(since)
    .fetch_all(pool)
    .await
    .context("failed to list spend events")?;
    Ok(rows)
}
