//! `trafficcontrol config` subcommands.

use anyhow::Result;
use serde_json::json;

use crate::cli_output::CliOutput;
use crate::config::TrafficControlConfig;

pub fn show(cli_db_url: Option<&str>) -> Result<CliOutput> {
    let resolved = TrafficControlConfig::resolve(cli_db_url)?;
    Ok(CliOutput::ok_with(
        format!("resolved config (file: {})", crate::config::config_path().display()),
        json!({
            "database_url": resolved.db_config.database_url,
            "capacity_limits": resolved.capacity_limits,
            "spend": {
                "alert_threshold_usd": resolved.spend_config.alert_threshold_usd,
                "hard_limit_usd": resolved.spend_config.hard_limit_usd,
                "window_minutes": resolved.spend_config.window.num_minutes(),
            },
            "circuit_breaker": {
                "failure_threshold": resolved.circuit_breaker_config.failure_threshold,
                "failure_window_minutes": resolved.circuit_breaker_config.failure_window.num_minutes(),
                "reset_timeout_minutes": resolved.circuit_breaker_config.reset_timeout.num_minutes(),
                "success_threshold_for_close": resolved.circuit_breaker_config.success_threshold_for_close,
            },
            "tick_interval_secs": resolved.tick_interval_secs,
            "max_subagent_depth": resolved.max_subagent_depth,
            "cli_path": resolved.cli_path,
        }),
    ))
}

/// Validate that the config resolves and the thresholds make sense --
/// catches config file / env var mistakes before `start` is invoked.
pub fn validate(cli_db_url: Option<&str>) -> Result<CliOutput> {
    let resolved = TrafficControlConfig::resolve(cli_db_url)?;
    let mut problems = Vec::new();

    if resolved.spend_config.alert_threshold_usd > resolved.spend_config.hard_limit_usd {
        problems.push("spend.alert_threshold_usd is greater than spend.hard_limit_usd".to_owned());
    }
    if resolved.max_subagent_depth == 0 {
        problems.push("dispatch.max_subagent_depth must be at least 1".to_owned());
    }
    if resolved.tick_interval_secs == 0 {
        problems.push("dispatch.tick_interval_secs must be greater than 0".to_owned());
    }
    for (model, limit) in &resolved.capacity_limits {
        if *limit == 0 {
            problems.push(format!("capacity limit for {model} is 0; no sessions will ever launch for it"));
        }
    }

    if problems.is_empty() {
        Ok(CliOutput::ok("config is valid"))
    } else {
        Ok(CliOutput::ok_with(format!("{} problem(s) found", problems.len()), json!({ "problems": problems })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    #[test]
    fn validate_passes_with_defaults() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };

        let out = validate(Some("postgresql://localhost:5432/tc")).unwrap();
        assert!(out.success);
        assert_eq!(out.message, "config is valid");

        unsafe { std::env::remove_var("XDG_CONFIG_HOME") };
    }
}
