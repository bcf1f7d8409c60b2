use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Project, ProjectStatus};

/// Create a new project, active by default.
pub async fn insert_project(pool: &PgPool, name: &str, priority: i32, root_path: &str) -> Result<Project> {
    let row = sqlx::query_as::<_, Project>(
        "INSERT INTO projects (name, priority, root_path) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(name)
    .bind(priority)
    .bind(root_path)
    .fetch_one(pool)
    .await
    .context("failed to insert project")?;
    Ok(row)
}

pub async fn get_project(pool: &PgPool, project_id: Uuid) -> Result<Option<Project>> {
    let row = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
        .bind(project_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch project")?;
    Ok(row)
}

pub async fn list_projects(pool: &PgPool) -> Result<Vec<Project>> {
    let rows = sqlx::query_as::<_, Project>("SELECT * FROM projects ORDER BY priority DESC, name")
        .fetch_all(pool)
        .await
        .context("failed to list projects")?;
    Ok(rows)
}

pub async fn list_active_projects(pool: &PgPool) -> Result<Vec<Project>> {
    let rows = sqlx::query_as::<_, Project>(
        "SELECT * FROM projects WHERE status = 'active' ORDER BY priority DESC, name",
    )
    .fetch_all(pool)
    .await
    .context("failed to list active projects")?;
    Ok(rows)
}

pub async fn set_project_status(
    pool: &PgPool,
    project_id: Uuid,
    status: ProjectStatus,
) -> Result<u64> {
    let result = sqlx::query("UPDATE projects SET status = $1 WHERE id = $2")
        .bind(status.to_string())
        .bind(project_id)
        .execute(pool)
        .await
        .context("failed to update project status")?;
    Ok(result.rows_affected())
}

pub async fn set_project_priority(pool: &PgPool, project_id: Uuid, priority: i32) -> Result<u64> {
    let result = sqlx::query("UPDATE projects SET priority = $1 WHERE id = $2")
        .bind(priority)
        .bind(project_id)
        .execute(pool)
        .await
        .context("failed to update project priority")?;
    Ok(result.rows_affected())
}
