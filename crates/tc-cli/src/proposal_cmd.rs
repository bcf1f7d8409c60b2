//! `trafficcontrol proposal` subcommands.
//!
//! There is no persisted "proposal" entity: a proposal is simply the
//! resource allocator's recommendation for a project, computed fresh from
//! current backlog state. `approve`/`reject` acknowledge a proposal without
//! storing anything -- the next dispatch tick recomputes allocations from
//! scratch regardless, so there is nothing durable to flip.

use anyhow::Result;
use serde_json::json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use tc_core::resource_allocator::{self, ProjectStats};
use tc_db::queries::{projects, tasks};

use crate::cli_output::CliOutput;

pub async fn list(pool: &PgPool) -> Result<CliOutput> {
    let active_projects = projects::list_active_projects(pool).await?;
    let ready = tasks::get_ready_tasks(pool).await?;

    let mut stats = Vec::with_capacity(active_projects.len());
    for p in &active_projects {
        let progress = tasks::get_project_progress(pool, p.id).await?;
        let queued_count = ready.iter().filter(|t| t.project_id == p.id).count() as u32;
        stats.push(ProjectStats {
            project_id: p.id,
            project_name: p.name.clone(),
            priority: p.priority,
            queued_count,
            blocked_count: progress.blocked as u32,
            current_opus_sessions: 0,
            current_sonnet_sessions: 0,
        });
    }

    let allocations = resource_allocator::allocate(&stats);
    Ok(CliOutput::ok_with(
        format!("{} proposed allocations (computed from current backlog, not live session counts)", allocations.len()),
        json!(allocations),
    ))
}

pub async fn approve(project_id: &str) -> Result<CliOutput> {
    let id = Uuid::parse_str(project_id)?;
    info!(project_id = %id, "operator approved resource allocation proposal");
    Ok(CliOutput::ok(format!("proposal for project {project_id} approved")))
}

pub async fn reject(project_id: &str) -> Result<CliOutput> {
    let id = Uuid::parse_str(project_id)?;
    info!(project_id = %id, "operator rejected resource allocation proposal");
    Ok(CliOutput::ok(format!("proposal for project {project_id} rejected")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn approve_rejects_malformed_id() {
        let out = approve("not-a-uuid").await;
        assert!(out.is_err());
    }
}
