//! Classifies database errors and tracks consecutive-failure-driven degraded
//! mode, mirroring the health-monitor pattern used for agent fault tolerance
//! elsewhere in this codebase.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Substrings matched (case-insensitively) against an error's display text
/// to decide whether it is database-related. Kept as a fixed list for
/// compatibility; [`DbErrorClassifier`] is the extension point if typed
/// error codes replace this later.
const DB_ERROR_SUBSTRINGS: &[&str] = &[
    "supabase",
    "database",
    "connection",
    "network",
    "timeout",
    "econnrefused",
    "enotfound",
];

/// Classifies whether an error originates from the database layer.
/// Default implementation is substring-based (see [`DB_ERROR_SUBSTRINGS`]);
/// a typed classifier can be swapped in later without touching callers.
pub trait DbErrorClassifier: Send + Sync {
    fn is_db_error(&self, message: &str) -> bool;
}

/// The default, substring-based classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringDbErrorClassifier;

impl DbErrorClassifier for SubstringDbErrorClassifier {
    fn is_db_error(&self, message: &str) -> bool {
        let lower = message.to_lowercase();
        DB_ERROR_SUBSTRINGS.iter().any(|needle| lower.contains(needle))
    }
}

struct Inner {
    consecutive_failures: u32,
    last_error: Option<String>,
    degraded: bool,
    degraded_since: Option<DateTime<Utc>>,
}

/// Outcome of a failure/success observation, exposed to the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    None,
    EnteredDegraded,
    Recovered,
}

/// Tracks database error classification and consecutive-failure-driven
/// degraded mode.
pub struct DbHealthMonitor {
    classifier: Box<dyn DbErrorClassifier>,
    max_consecutive_failures: u32,
    inner: Arc<RwLock<Inner>>,
    pool: PgPool,
}

impl DbHealthMonitor {
    pub fn new(pool: PgPool, max_consecutive_failures: u32) -> Self {
        Self::with_classifier(pool, max_consecutive_failures, Box::new(SubstringDbErrorClassifier))
    }

    pub fn with_classifier(
        pool: PgPool,
        max_consecutive_failures: u32,
        classifier: Box<dyn DbErrorClassifier>,
    ) -> Self {
        Self {
            classifier,
            max_consecutive_failures,
            inner: Arc::new(RwLock::new(Inner {
                consecutive_failures: 0,
                last_error: None,
                degraded: false,
                degraded_since: None,
            })),
            pool,
        }
    }

    pub fn is_db_error(&self, message: &str) -> bool {
        self.classifier.is_db_error(message)
    }

    /// Record a database failure. Enters degraded mode exactly once when the
    /// consecutive count reaches the configured threshold.
    pub async fn on_db_failure(&self, message: impl Into<String>) -> HealthTransition {
        let message = message.into();
        let mut guard = self.inner.write().await;
        guard.consecutive_failures += 1;
        guard.last_error = Some(message.clone());

        if guard.consecutive_failures >= self.max_consecutive_failures && !guard.degraded {
            guard.degraded = true;
            guard.degraded_since = Some(Utc::now());
            error!(consecutive_failures = guard.consecutive_failures, %message, "database:degraded");
            HealthTransition::EnteredDegraded
        } else {
            HealthTransition::None
        }
    }

    /// Record a database success. Resets the failure count and, if
    /// previously degraded, exits degraded mode exactly once.
    pub async fn on_db_success(&self) -> HealthTransition {
        let mut guard = self.inner.write().await;
        guard.consecutive_failures = 0;
        if guard.degraded {
            guard.degraded = false;
            let downtime = guard
                .degraded_since
                .map(|since| Utc::now() - since)
                .unwrap_or_else(ChronoDuration::zero);
            guard.degraded_since = None;
            info!(downtime_secs = downtime.num_seconds(), "database:recovered");
            HealthTransition::Recovered
        } else {
            HealthTransition::None
        }
    }

    /// Out-of-band probe: issue `SELECT 1` against the pool. On success,
    /// routes through the same recovery path as [`Self::on_db_success`].
    pub async fn attempt_recovery(&self) -> HealthTransition {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => self.on_db_success().await,
            Err(e) => self.on_db_failure(e.to_string()).await,
        }
    }

    pub async fn is_degraded(&self) -> bool {
        self.inner.read().await.degraded
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.inner.read().await.consecutive_failures
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.read().await.last_error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_substrings_case_insensitively() {
        let c = SubstringDbErrorClassifier;
        assert!(c.is_db_error("Connection refused"));
        assert!(c.is_db_error("ECONNREFUSED"));
        assert!(c.is_db_error("request TIMEOUT"));
        assert!(!c.is_db_error("invalid task title"));
    }

    // Transition tests exercise the counter/latch logic directly without a
    // live pool, since `on_db_failure`/`on_db_success` never touch the
    // database themselves (only `attempt_recovery` does).
    fn monitor_without_pool(max_consecutive_failures: u32) -> DbHealthMonitor {
        // connect_lazy never dials out; used here purely to construct a PgPool
        // value for counter-only tests.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgresql://localhost:5432/trafficcontrol")
            .expect("lazy pool construction should not fail");
        DbHealthMonitor::new(pool, max_consecutive_failures)
    }

    #[tokio::test]
    async fn enters_degraded_exactly_once_at_threshold() {
        let monitor = monitor_without_pool(3);
        assert_eq!(monitor.on_db_failure("connection reset").await, HealthTransition::None);
        assert_eq!(monitor.on_db_failure("connection reset").await, HealthTransition::None);
        assert_eq!(
            monitor.on_db_failure("connection reset").await,
            HealthTransition::EnteredDegraded
        );
        assert_eq!(
            monitor.on_db_failure("connection reset").await,
            HealthTransition::None,
            "already degraded, should not re-fire"
        );
        assert!(monitor.is_degraded().await);
    }

    #[tokio::test]
    async fn one_success_after_degraded_recovers_exactly_once() {
        let monitor = monitor_without_pool(2);
        monitor.on_db_failure("timeout").await;
        monitor.on_db_failure("timeout").await;
        assert!(monitor.is_degraded().await);

        assert_eq!(monitor.on_db_success().await, HealthTransition::Recovered);
        assert!(!monitor.is_degraded().await);
        assert_eq!(monitor.on_db_success().await, HealthTransition::None);
    }
}
