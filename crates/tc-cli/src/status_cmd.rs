//! `trafficcontrol status`: a snapshot of project and task state from the
//! database. Live in-process state (capacity, circuit breaker, spend pause)
//! belongs to the running `start` process and is only reachable through the
//! HTTP dashboard's `/api/status`, not this short-lived CLI invocation.

use anyhow::Result;
use serde_json::json;
use sqlx::PgPool;

use tc_db::models::ProjectStatus;
use tc_db::queries::{projects, tasks};

use crate::cli_output::CliOutput;

pub async fn run(pool: &PgPool) -> Result<CliOutput> {
    let all_projects = projects::list_projects(pool).await?;
    let active_count = all_projects.iter().filter(|p| p.status == ProjectStatus::Active).count();

    let mut rows = Vec::with_capacity(all_projects.len());
    let mut totals = tasks::TaskProgress::default();
    for p in &all_projects {
        let progress = tasks::get_project_progress(pool, p.id).await?;
        totals.queued += progress.queued;
        totals.in_progress += progress.in_progress;
        totals.blocked += progress.blocked;
        totals.complete += progress.complete;
        totals.cancelled += progress.cancelled;
        rows.push(json!({
            "id": p.id,
            "name": p.name,
            "status": p.status,
            "progress": progress,
        }));
    }

    Ok(CliOutput::ok_with(
        format!(
            "{} projects ({active_count} active), {} queued, {} in progress",
            all_projects.len(),
            totals.queued,
            totals.in_progress,
        ),
        json!({ "projects": rows, "totals": totals }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_test_utils::{create_test_db, drop_test_db};

    #[tokio::test]
    async fn status_reports_project_counts() {
        let (pool, db_name) = create_test_db().await;
        projects::insert_project(&pool, "demo", 5, "/tmp/demo").await.unwrap();

        let out = run(&pool).await.unwrap();
        assert!(out.success);
        assert_eq!(out.data.unwrap()["projects"].as_array().unwrap().len(), 1);

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
