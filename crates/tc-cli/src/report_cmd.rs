//! `trafficcontrol report`: spend and completion summary over a rolling window.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use sqlx::PgPool;

use tc_db::models::SessionModel;
use tc_db::queries::{completions, spend_events};

use crate::cli_output::CliOutput;

pub async fn run(pool: &PgPool, window_hours: i64) -> Result<CliOutput> {
    let since = Utc::now() - ChronoDuration::hours(window_hours);

    let spend_total = spend_events::sum_spend_since(pool, since).await?;
    let spend_events = spend_events::list_spend_since(pool, since).await?;
    let records = completions::completions_since(pool, since).await?;

    let mut by_model: HashMap<SessionModel, (u32, u32, i64)> = HashMap::new();
    for r in &records {
        let entry = by_model.entry(r.model).or_insert((0, 0, 0));
        entry.0 += 1;
        if r.success {
            entry.1 += 1;
        }
        entry.2 += r.duration_ms;
    }

    let model_breakdown: Vec<_> = by_model
        .iter()
        .map(|(model, (count, successes, total_duration_ms))| {
            json!({
                "model": model,
                "completions": count,
                "successes": successes,
                "success_rate": if *count > 0 { *successes as f64 / *count as f64 } else { 0.0 },
                "avg_duration_ms": if *count > 0 { total_duration_ms / *count as i64 } else { 0 },
            })
        })
        .collect();

    let total = records.len();
    let successes = records.iter().filter(|r| r.success).count();

    Ok(CliOutput::ok_with(
        format!("{total} completions, ${spend_total:.2} spent over the last {window_hours}h"),
        json!({
            "window_hours": window_hours,
            "spend_usd": spend_total,
            "spend_events": spend_events.len(),
            "completions": total,
            "successes": successes,
            "success_rate": if total > 0 { successes as f64 / total as f64 } else { 0.0 },
            "by_model": model_breakdown,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_db::queries::{projects, tasks};
    use tc_test_utils::{create_test_db, drop_test_db};
    use uuid::Uuid;

    #[tokio::test]
    async fn report_reflects_recorded_spend_and_completions() {
        let (pool, db_name) = create_test_db().await;
        let project = projects::insert_project(&pool, "demo", 5, "/tmp/demo").await.unwrap();
        let task = tasks::insert_task(&pool, project.id, "t", "d", 1, tc_db::models::TaskComplexity::Low, None, &[])
            .await
            .unwrap();

        spend_events::insert_spend_event(&pool, task.id, SessionModel::Sonnet, 1.5).await.unwrap();
        completions::insert_completion_record(&pool, Uuid::new_v4(), task.id, SessionModel::Sonnet, true, 5000, 100, 1.5, None)
            .await
            .unwrap();

        let out = run(&pool, 24).await.unwrap();
        assert!(out.success);
        let data = out.data.unwrap();
        assert_eq!(data["completions"], 1);
        assert!((data["spend_usd"].as_f64().unwrap() - 1.5).abs() < 1e-9);

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
