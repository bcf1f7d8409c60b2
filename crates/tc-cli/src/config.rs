//! Configuration file management for trafficcontrol.
//!
//! Provides a TOML-based config file at `~/.config/trafficcontrol/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};

use tc_core::circuit_breaker::CircuitBreakerConfig;
use tc_core::spend_monitor::SpendMonitorConfig;
use tc_db::config::DbConfig;
use tc_db::models::SessionModel;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub capacity: CapacitySection,
    #[serde(default)]
    pub spend: SpendSection,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CapacitySection {
    pub opus: u32,
    pub sonnet: u32,
    pub haiku: u32,
}

impl Default for CapacitySection {
    fn default() -> Self {
        Self {
            opus: 2,
            sonnet: 8,
            haiku: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendSection {
    pub alert_threshold_usd: f64,
    pub hard_limit_usd: f64,
    pub window_minutes: i64,
}

impl Default for SpendSection {
    fn default() -> Self {
        Self {
            alert_threshold_usd: 50.0,
            hard_limit_usd: 200.0,
            window_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSection {
    pub failure_threshold: u32,
    pub failure_window_minutes: i64,
    pub reset_timeout_minutes: i64,
    pub success_threshold_for_close: u32,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            failure_window_minutes: defaults.failure_window.num_minutes(),
            reset_timeout_minutes: defaults.reset_timeout.num_minutes(),
            success_threshold_for_close: defaults.success_threshold_for_close,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSection {
    pub tick_interval_secs: u64,
    pub max_subagent_depth: u32,
    pub cli_path: String,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            max_subagent_depth: 3,
            cli_path: "claude".to_owned(),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the trafficcontrol config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/trafficcontrol` or
/// `~/.config/trafficcontrol`. We intentionally ignore the platform-specific
/// `dirs::config_dir()` (which returns `~/Library/Application Support` on
/// macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("trafficcontrol");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("trafficcontrol")
}

/// Return the path to the trafficcontrol config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    // Set permissions to 0600 (owner read/write only) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug, Clone)]
pub struct TrafficControlConfig {
    pub db_config: DbConfig,
    pub capacity_limits: HashMap<SessionModel, u32>,
    pub spend_config: SpendMonitorConfig,
    pub circuit_breaker_config: CircuitBreakerConfig,
    pub tick_interval_secs: u64,
    pub max_subagent_depth: u32,
    pub cli_path: String,
}

impl TrafficControlConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default. Only the database URL has a CLI flag and an env var;
    /// the remaining sections come from the config file when present, or
    /// their built-in defaults otherwise.
    ///
    /// - DB URL: `cli_db_url` > `TC_DATABASE_URL` env > `config_file.database.url` > `DbConfig::DEFAULT_URL`
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("TC_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };
        let db_config = DbConfig::new(db_url);

        let capacity = file_config.as_ref().map(|c| &c.capacity);
        let capacity_limits = HashMap::from([
            (SessionModel::Opus, capacity.map(|c| c.opus).unwrap_or(CapacitySection::default().opus)),
            (SessionModel::Sonnet, capacity.map(|c| c.sonnet).unwrap_or(CapacitySection::default().sonnet)),
            (SessionModel::Haiku, capacity.map(|c| c.haiku).unwrap_or(CapacitySection::default().haiku)),
        ]);

        let spend = file_config.as_ref().map(|c| &c.spend).cloned_or_default();
        let spend_config = SpendMonitorConfig {
            alert_threshold_usd: spend.alert_threshold_usd,
            hard_limit_usd: spend.hard_limit_usd,
            window: ChronoDuration::minutes(spend.window_minutes),
        };

        let breaker = file_config.as_ref().map(|c| &c.circuit_breaker).cloned_or_default();
        let circuit_breaker_config = CircuitBreakerConfig {
            failure_threshold: breaker.failure_threshold,
            failure_window: ChronoDuration::minutes(breaker.failure_window_minutes),
            reset_timeout: ChronoDuration::minutes(breaker.reset_timeout_minutes),
            success_threshold_for_close: breaker.success_threshold_for_close,
        };

        let dispatch = file_config.as_ref().map(|c| &c.dispatch).cloned_or_default();

        Ok(Self {
            db_config,
            capacity_limits,
            spend_config,
            circuit_breaker_config,
            tick_interval_secs: dispatch.tick_interval_secs,
            max_subagent_depth: dispatch.max_subagent_depth,
            cli_path: dispatch.cli_path,
        })
    }
}

/// Small helper so `resolve` can read an optional borrowed section from the
/// config file and fall back to its `Default` without an explicit match at
/// every call site.
trait ClonedOrDefault<T> {
    fn cloned_or_default(self) -> T;
}

impl<T: Clone + Default> ClonedOrDefault<T> for Option<&T> {
    fn cloned_or_default(self) -> T {
        self.cloned().unwrap_or_default()
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("trafficcontrol");
        let path = dir.join("config.toml");

        let original = ConfigFile {
            database: DatabaseSection {
                url: "postgresql://testhost:5432/testdb".to_string(),
            },
            capacity: CapacitySection { opus: 1, sonnet: 4, haiku: 10 },
            spend: SpendSection::default(),
            circuit_breaker: CircuitBreakerSection::default(),
            dispatch: DispatchSection::default(),
        };

        std::fs::create_dir_all(&dir).unwrap();
        let contents = toml::to_string_pretty(&original).unwrap();
        std::fs::write(&path, &contents).unwrap();

        let loaded_contents = std::fs::read_to_string(&path).unwrap();
        let loaded: ConfigFile = toml::from_str(&loaded_contents).unwrap();

        assert_eq!(loaded.database.url, original.database.url);
        assert_eq!(loaded.capacity.opus, 1);
        assert_eq!(loaded.capacity.sonnet, 4);
        assert_eq!(loaded.capacity.haiku, 10);
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let _lock = lock_env();

        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("test.toml");
        std::fs::write(&file, "test").unwrap();

        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&file, perms).unwrap();

        let meta = std::fs::metadata(&file).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn resolve_with_cli_flag_overrides_all() {
        let _lock = lock_env();

        unsafe { std::env::set_var("TC_DATABASE_URL", "postgresql://env:5432/envdb") };

        let config = TrafficControlConfig::resolve(Some("postgresql://cli:5432/clidb")).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");

        unsafe { std::env::remove_var("TC_DATABASE_URL") };
    }

    #[test]
    fn resolve_with_env_var_overrides_config_file() {
        let _lock = lock_env();

        unsafe { std::env::set_var("TC_DATABASE_URL", "postgresql://env:5432/envdb") };

        let config = TrafficControlConfig::resolve(None).unwrap();
        assert_eq!(config.db_config.database_url, "postgresql://env:5432/envdb");

        unsafe { std::env::remove_var("TC_DATABASE_URL") };
    }

    #[test]
    fn resolve_defaults_db_url_when_nothing_set() {
        let _lock = lock_env();

        unsafe { std::env::remove_var("TC_DATABASE_URL") };
        let tmp = tempfile::TempDir::new().unwrap();
        let orig_home = std::env::var("HOME").ok();
        let orig_xdg = std::env::var("XDG_CONFIG_HOME").ok();
        unsafe { std::env::set_var("HOME", tmp.path()) };
        unsafe { std::env::remove_var("XDG_CONFIG_HOME") };

        let config = TrafficControlConfig::resolve(None).unwrap();
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);

        match orig_home {
            Some(h) => unsafe { std::env::set_var("HOME", h) },
            None => unsafe { std::env::remove_var("HOME") },
        }
        match orig_xdg {
            Some(x) => unsafe { std::env::set_var("XDG_CONFIG_HOME", x) },
            None => unsafe { std::env::remove_var("XDG_CONFIG_HOME") },
        }
    }

    #[test]
    fn resolve_falls_back_to_capacity_defaults_without_config_file() {
        let _lock = lock_env();

        let tmp = tempfile::TempDir::new().unwrap();
        let orig_xdg = std::env::var("XDG_CONFIG_HOME").ok();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };

        let config = TrafficControlConfig::resolve(Some("postgresql://localhost:5432/tc")).unwrap();
        assert_eq!(config.capacity_limits.get(&SessionModel::Opus), Some(&2));
        assert_eq!(config.capacity_limits.get(&SessionModel::Sonnet), Some(&8));
        assert_eq!(config.capacity_limits.get(&SessionModel::Haiku), Some(&16));
        assert_eq!(config.max_subagent_depth, 3);

        match orig_xdg {
            Some(x) => unsafe { std::env::set_var("XDG_CONFIG_HOME", x) },
            None => unsafe { std::env::remove_var("XDG_CONFIG_HOME") },
        }
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("trafficcontrol/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
