//! `trafficcontrol task` subcommands.

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use tc_db::models::TaskComplexity;
use tc_db::queries::tasks;

use crate::cli_output::CliOutput;

fn parse_complexity(s: &str) -> Result<TaskComplexity> {
    match s.to_ascii_lowercase().as_str() {
        "low" => Ok(TaskComplexity::Low),
        "medium" => Ok(TaskComplexity::Medium),
        "high" => Ok(TaskComplexity::High),
        other => anyhow::bail!("invalid complexity '{other}', expected low|medium|high"),
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn add(
    pool: &PgPool,
    project_id: &str,
    title: &str,
    description: &str,
    priority: i32,
    complexity: &str,
    blocked_by: Option<&str>,
    tags: Vec<String>,
) -> Result<CliOutput> {
    let project_id = Uuid::parse_str(project_id).with_context(|| format!("invalid project ID: {project_id}"))?;
    let complexity = parse_complexity(complexity)?;
    let blocked_by = blocked_by
        .map(Uuid::parse_str)
        .transpose()
        .context("invalid blocked-by task ID")?;

    let task = tasks::insert_task(pool, project_id, title, description, priority, complexity, blocked_by, &tags).await?;
    Ok(CliOutput::ok_with(format!("task {} created", task.id), json!(task)))
}

pub async fn list(pool: &PgPool, project_id: &str) -> Result<CliOutput> {
    let project_id = Uuid::parse_str(project_id).with_context(|| format!("invalid project ID: {project_id}"))?;
    let list = tasks::list_tasks_for_project(pool, project_id).await?;
    Ok(CliOutput::ok_with(format!("{} tasks", list.len()), json!(list)))
}

pub async fn cancel(pool: &PgPool, task_id: &str) -> Result<CliOutput> {
    let id = Uuid::parse_str(task_id).with_context(|| format!("invalid task ID: {task_id}"))?;
    let rows = tasks::cancel_task(pool, id).await?;
    if rows == 0 {
        return Ok(CliOutput::err(format!("task {task_id} not found or already terminal")));
    }
    Ok(CliOutput::ok(format!("task {task_id} cancelled")))
}

pub async fn update(pool: &PgPool, task_id: &str, priority: i32) -> Result<CliOutput> {
    let id = Uuid::parse_str(task_id).with_context(|| format!("invalid task ID: {task_id}"))?;
    let rows = tasks::set_task_priority(pool, id, priority).await?;
    if rows == 0 {
        return Ok(CliOutput::err(format!("task {task_id} not found")));
    }
    Ok(CliOutput::ok(format!("task {task_id} priority set to {priority}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_db::queries::projects;
    use tc_test_utils::{create_test_db, drop_test_db};

    #[tokio::test]
    async fn add_then_list_round_trips() {
        let (pool, db_name) = create_test_db().await;
        let project = projects::insert_project(&pool, "demo", 5, "/tmp/demo").await.unwrap();

        let out = add(&pool, &project.id.to_string(), "write tests", "cover the parser", 3, "medium", None, vec!["backend".to_owned()])
            .await
            .unwrap();
        assert!(out.success);

        let listed = list(&pool, &project.id.to_string()).await.unwrap();
        assert!(listed.message.starts_with('1'));

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn cancel_unknown_task_reports_failure() {
        let (pool, db_name) = create_test_db().await;
        let out = cancel(&pool, &Uuid::new_v4().to_string()).await.unwrap();
        assert!(!out.success);
        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[test]
    fn parse_complexity_rejects_garbage() {
        assert!(parse_complexity("extreme").is_err());
        assert!(matches!(parse_complexity("high").unwrap(), TaskComplexity::High));
    }
}
