//! `trafficcontrol agent` subcommands. Per-model concurrency limits are
//! config, not database state; current session counts live only in the
//! running `start` process's [`tc_core::capacity::CapacityTracker`], so this
//! reports the configured limits alongside the best available proxy for
//! current load: tasks persisted as `in_progress`.

use anyhow::Result;
use serde_json::json;
use sqlx::PgPool;

use tc_db::models::SessionModel;
use tc_db::queries::tasks;

use crate::cli_output::CliOutput;
use crate::config::TrafficControlConfig;

pub async fn list(config: &TrafficControlConfig) -> Result<CliOutput> {
    let rows: Vec<_> = SessionModel::ALL
        .iter()
        .map(|m| json!({ "model": m, "limit": config.capacity_limits.get(m).copied().unwrap_or(0) }))
        .collect();
    Ok(CliOutput::ok_with("configured agent models", json!(rows)))
}

pub async fn capacity(pool: &PgPool, config: &TrafficControlConfig) -> Result<CliOutput> {
    let ready = tasks::get_ready_tasks(pool).await?;
    let in_progress_total: i64 = {
        let mut total = 0i64;
        let projects = tc_db::queries::projects::list_projects(pool).await?;
        for p in &projects {
            total += tasks::get_project_progress(pool, p.id).await?.in_progress;
        }
        total
    };

    let rows: Vec<_> = SessionModel::ALL
        .iter()
        .map(|m| {
            let limit = config.capacity_limits.get(m).copied().unwrap_or(0);
            json!({ "model": m, "limit": limit })
        })
        .collect();

    Ok(CliOutput::ok_with(
        format!("{in_progress_total} tasks in progress, {} queued and ready", ready.len()),
        json!({ "models": rows, "in_progress_total": in_progress_total, "ready_now": ready.len() }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config() -> TrafficControlConfig {
        TrafficControlConfig {
            db_config: tc_db::config::DbConfig::new(tc_db::config::DbConfig::DEFAULT_URL),
            capacity_limits: HashMap::from([(SessionModel::Opus, 2), (SessionModel::Sonnet, 8), (SessionModel::Haiku, 16)]),
            spend_config: tc_core::spend_monitor::SpendMonitorConfig {
                alert_threshold_usd: 50.0,
                hard_limit_usd: 200.0,
                window: chrono::Duration::hours(1),
            },
            circuit_breaker_config: tc_core::circuit_breaker::CircuitBreakerConfig::default(),
            tick_interval_secs: 30,
            max_subagent_depth: 3,
            cli_path: "claude".to_owned(),
        }
    }

    #[tokio::test]
    async fn list_reports_all_three_models() {
        let out = list(&test_config()).await.unwrap();
        assert!(out.success);
        assert_eq!(out.data.unwrap().as_array().unwrap().len(), 3);
    }
}
