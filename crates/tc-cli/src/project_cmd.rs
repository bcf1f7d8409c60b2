//! `trafficcontrol project` subcommands.

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use tc_db::models::ProjectStatus;
use tc_db::queries::{projects, tasks};

use crate::cli_output::CliOutput;

pub async fn list(pool: &PgPool) -> Result<CliOutput> {
    let all = projects::list_projects(pool).await?;
    let mut rows = Vec::with_capacity(all.len());
    for p in &all {
        let progress = tasks::get_project_progress(pool, p.id).await?;
        rows.push(json!({
            "id": p.id,
            "name": p.name,
            "status": p.status,
            "priority": p.priority,
            "root_path": p.root_path,
            "progress": progress,
        }));
    }
    Ok(CliOutput::ok_with(format!("{} projects", all.len()), json!(rows)))
}

pub async fn create(pool: &PgPool, name: &str, priority: i32, root_path: &str) -> Result<CliOutput> {
    let project = projects::insert_project(pool, name, priority, root_path).await?;
    Ok(CliOutput::ok_with(format!("project {} created", project.id), json!(project)))
}

pub async fn pause(pool: &PgPool, project_id: &str) -> Result<CliOutput> {
    set_status(pool, project_id, ProjectStatus::Paused).await
}

pub async fn resume(pool: &PgPool, project_id: &str) -> Result<CliOutput> {
    set_status(pool, project_id, ProjectStatus::Active).await
}

async fn set_status(pool: &PgPool, project_id: &str, status: ProjectStatus) -> Result<CliOutput> {
    let id = Uuid::parse_str(project_id).with_context(|| format!("invalid project ID: {project_id}"))?;
    let rows = projects::set_project_status(pool, id, status).await?;
    if rows == 0 {
        return Ok(CliOutput::err(format!("project {project_id} not found")));
    }
    Ok(CliOutput::ok(format!("project {project_id} set to {status}")))
}

pub async fn set_priority(pool: &PgPool, project_id: &str, priority: i32) -> Result<CliOutput> {
    let id = Uuid::parse_str(project_id).with_context(|| format!("invalid project ID: {project_id}"))?;
    let rows = projects::set_project_priority(pool, id, priority).await?;
    if rows == 0 {
        return Ok(CliOutput::err(format!("project {project_id} not found")));
    }
    Ok(CliOutput::ok(format!("project {project_id} priority set to {priority}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_test_utils::{create_test_db, drop_test_db};

    #[tokio::test]
    async fn create_then_pause_then_resume() {
        let (pool, db_name) = create_test_db().await;

        let created = create(&pool, "demo", 5, "/tmp/demo").await.unwrap();
        assert!(created.success);
        let id = created.data.unwrap()["id"].as_str().unwrap().to_string();

        let paused = pause(&pool, &id).await.unwrap();
        assert!(paused.success);

        let resumed = resume(&pool, &id).await.unwrap();
        assert!(resumed.success);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn pause_unknown_project_reports_failure() {
        let (pool, db_name) = create_test_db().await;
        let out = pause(&pool, &Uuid::new_v4().to_string()).await.unwrap();
        assert!(!out.success);
        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
