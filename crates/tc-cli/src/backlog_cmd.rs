//! `trafficcontrol backlog summary`: queued/blocked task counts per project.

use anyhow::Result;
use serde_json::json;
use sqlx::PgPool;

use tc_db::queries::{projects, tasks};

use crate::cli_output::CliOutput;

pub async fn summary(pool: &PgPool) -> Result<CliOutput> {
    let all_projects = projects::list_projects(pool).await?;
    let ready = tasks::get_ready_tasks(pool).await?;

    let mut rows = Vec::with_capacity(all_projects.len());
    let mut total_queued = 0i64;
    let mut total_blocked = 0i64;
    for p in &all_projects {
        let progress = tasks::get_project_progress(pool, p.id).await?;
        let ready_now = ready.iter().filter(|t| t.project_id == p.id).count();
        total_queued += progress.queued;
        total_blocked += progress.blocked;
        rows.push(json!({
            "project_id": p.id,
            "project_name": p.name,
            "queued": progress.queued,
            "ready_now": ready_now,
            "blocked": progress.blocked,
            "in_progress": progress.in_progress,
        }));
    }

    Ok(CliOutput::ok_with(
        format!("{total_queued} queued, {total_blocked} blocked across {} projects", all_projects.len()),
        json!({ "projects": rows, "total_queued": total_queued, "total_blocked": total_blocked }),
    ))
}
