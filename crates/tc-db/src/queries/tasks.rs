use anyhow::{Context, Result};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{SessionModel, Task, TaskComplexity, TaskStatus};

/// Insert a new task in the `queued` state.
pub async fn insert_task(
    pool: &PgPool,
    project_id: Uuid,
    title: &str,
    description: &str,
    priority: i32,
    complexity: TaskComplexity,
    blocked_by: Option<Uuid>,
    tags: &[String],
) -> Result<Task> {
    let row = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (project_id, title, description, priority, complexity, blocked_by, tags) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
    )
    .bind(project_id)
    .bind(title)
    .bind(description)
    .bind(priority)
    .bind(complexity.to_string())
    .bind(blocked_by)
    .bind(tags)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;
    Ok(row)
}

pub async fn get_task(pool: &PgPool, task_id: Uuid) -> Result<Option<Task>> {
    let row = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(task_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;
    Ok(row)
}

pub async fn list_tasks_for_project(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>> {
    let rows = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE project_id = $1 ORDER BY priority DESC, created_at",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for project")?;
    Ok(rows)
}

/// Tasks eligible for scoring and dispatch: queued, belonging to an active
/// project, and either unblocked or blocked by a task that is already
/// complete.
pub async fn get_ready_tasks(pool: &PgPool) -> Result<Vec<Task>> {
    let rows = sqlx::query_as::<_, Task>(
        "SELECT t.* FROM tasks t \
         JOIN projects p ON p.id = t.project_id \
         LEFT JOIN tasks blocker ON blocker.id = t.blocked_by \
         WHERE t.status = 'queued' \
           AND p.status = 'active' \
           AND (t.blocked_by IS NULL OR blocker.status = 'complete') \
         ORDER BY t.priority DESC, t.created_at",
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch ready tasks")?;
    Ok(rows)
}

/// Optimistically transition a task from `from` to `to`, guarded by the
/// current status matching `from`. Returns the number of rows updated (0 if
/// the task did not exist or was not in the expected state).
pub async fn transition_task_status(
    pool: &PgPool,
    task_id: Uuid,
    from: TaskStatus,
    to: TaskStatus,
) -> Result<u64> {
    let result = sqlx::query("UPDATE tasks SET status = $1 WHERE id = $2 AND status = $3")
        .bind(to.to_string())
        .bind(task_id)
        .bind(from.to_string())
        .execute(pool)
        .await
        .context("failed to transition task status")?;
    Ok(result.rows_affected())
}

pub async fn set_task_priority(pool: &PgPool, task_id: Uuid, priority: i32) -> Result<u64> {
    let result = sqlx::query("UPDATE tasks SET priority = $1 WHERE id = $2")
        .bind(priority)
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to update task priority")?;
    Ok(result.rows_affected())
}

/// Cancel a task regardless of its current status, unless it is already
/// complete or cancelled.
pub async fn cancel_task(pool: &PgPool, task_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'cancelled' \
         WHERE id = $1 AND status NOT IN ('complete', 'cancelled')",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to cancel task")?;
    Ok(result.rows_affected())
}

/// Reset tasks stuck `in_progress` back to `queued`, for restart recovery
/// when the dispatch loop starts up after an unclean shutdown.
pub async fn reset_stuck_tasks(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query("UPDATE tasks SET status = 'queued' WHERE status = 'in_progress'")
        .execute(pool)
        .await
        .context("failed to reset stuck tasks")?;
    Ok(result.rows_affected())
}

/// Record one more completed session against a task's actual-session count
/// for `model`, merging into the existing JSON counter map.
pub async fn increment_actual_sessions(
    pool: &PgPool,
    task_id: Uuid,
    model: SessionModel,
) -> Result<u64> {
    let key = model.to_string();
    let result = sqlx::query(
        "UPDATE tasks SET actual_sessions = \
         jsonb_set(actual_sessions, ARRAY[$1], to_jsonb(COALESCE((actual_sessions->>$1)::int, 0) + 1)) \
         WHERE id = $2",
    )
    .bind(&key)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to increment actual sessions")?;
    Ok(result.rows_affected())
}

/// Set the per-model estimated-session counts for a task, e.g.
/// `{"sonnet": 2}`.
pub async fn set_estimated_sessions(
    pool: &PgPool,
    task_id: Uuid,
    model: SessionModel,
    count: i32,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET estimated_sessions = jsonb_set(estimated_sessions, ARRAY[$1], to_jsonb($2::int)) \
         WHERE id = $3",
    )
    .bind(model.to_string())
    .bind(count)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to set estimated sessions")?;
    Ok(result.rows_affected())
}

/// Aggregate task counts by status for a project, used by backlog summaries.
#[derive(Debug, Clone, Default, serde::Serialize, sqlx::FromRow)]
pub struct TaskProgress {
    pub queued: i64,
    pub in_progress: i64,
    pub blocked: i64,
    pub complete: i64,
    pub cancelled: i64,
}

pub async fn get_project_progress(pool: &PgPool, project_id: Uuid) -> Result<TaskProgress> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status::text, COUNT(*) FROM tasks WHERE project_id = $1 GROUP BY status",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to aggregate task progress")?;

    let mut progress = TaskProgress::default();
    for (status, count) in rows {
        match status.as_str() {
            "queued" => progress.queued = count,
            "in_progress" => progress.in_progress = count,
            "blocked" => progress.blocked = count,
            "complete" => progress.complete = count,
            "cancelled" => progress.cancelled = count,
            _ => {}
        }
    }
    Ok(progress)
}

/// For every task currently queued or blocked, count how many other
/// queued/blocked tasks name it as their blocker. Keyed by the blocker's task
/// id. Feeds the priority scorer's dependency factor.
pub async fn count_blocking_dependents(pool: &PgPool) -> Result<std::collections::HashMap<Uuid, i64>> {
    let rows: Vec<(Uuid, i64)> = sqlx::query_as(
        "SELECT blocked_by, COUNT(*) FROM tasks \
         WHERE blocked_by IS NOT NULL AND status IN ('queued', 'blocked') \
         GROUP BY blocked_by",
    )
    .fetch_all(pool)
    .await
    .context("failed to count blocking dependents")?;
    Ok(rows.into_iter().collect())
}

/// Build an empty per-model session counter map, the default shape for
/// `estimated_sessions`/`actual_sessions`.
pub fn empty_session_counts() -> serde_json::Value {
    json!({ "opus": 0, "sonnet": 0, "haiku": 0 })
}
