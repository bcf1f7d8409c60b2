//! Tracks task completions and raises alerts on failure streaks, low success
//! rates, and slow completions. Modeled after the consecutive-failure /
//! health-status pattern used for agent health elsewhere in this codebase.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tc_db::models::SessionModel;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One recorded completion, pruned by the productivity window.
#[derive(Debug, Clone)]
pub struct CompletionRecord {
    pub session_id: Uuid,
    pub task_id: Uuid,
    pub model: SessionModel,
    pub success: bool,
    pub duration_ms: u64,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub error_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Configuration for [`ProductivityMonitor`].
#[derive(Debug, Clone, Copy)]
pub struct ProductivityMonitorConfig {
    pub window: ChronoDuration,
    pub failure_streak_threshold: u32,
    pub minimum_completions: u32,
    pub success_rate_threshold: f64,
    pub slow_duration_threshold_ms: u64,
}

impl Default for ProductivityMonitorConfig {
    fn default() -> Self {
        Self {
            window: ChronoDuration::hours(1),
            failure_streak_threshold: 3,
            minimum_completions: 5,
            success_rate_threshold: 0.5,
            slow_duration_threshold_ms: 120_000,
        }
    }
}

/// The kind of alert raised by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    HighFailureStreak,
    LowSuccessRate,
    SlowCompletion,
}

impl AlertKind {
    fn key(self) -> &'static str {
        match self {
            Self::HighFailureStreak => "high_failure_streak",
            Self::LowSuccessRate => "low_success_rate",
            Self::SlowCompletion => "slow_completion",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductivityAlert {
    pub kind: AlertKind,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated statistics for one model within the window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelStats {
    pub count: u32,
    pub success: u32,
    pub failure: u32,
    pub avg_duration_ms: f64,
}

/// Overall derived statistics across all models within the window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductivityStats {
    pub per_model: HashMap<SessionModel, ModelStats>,
    pub avg_tokens_per_task: f64,
    pub avg_cost_per_task: f64,
    pub hourly_rate: f64,
}

struct Inner {
    completions: Vec<CompletionRecord>,
    consecutive_failures: u32,
    dedup: HashMap<String, ()>,
}

/// Tracks completions over a rolling window and raises deduplicated alerts.
pub struct ProductivityMonitor {
    config: ProductivityMonitorConfig,
    inner: Arc<RwLock<Inner>>,
}

impl ProductivityMonitor {
    pub fn new(config: ProductivityMonitorConfig) -> Self {
        Self {
            config,
            inner: Arc::new(RwLock::new(Inner {
                completions: Vec::new(),
                consecutive_failures: 0,
                dedup: HashMap::new(),
            })),
        }
    }

    /// Record a completion and return any alerts it triggers. O(1)
    /// amortized; pruning happens here rather than on a read path.
    pub async fn record_completion(&self, record: CompletionRecord) -> Vec<ProductivityAlert> {
        let now = record.timestamp;
        let mut guard = self.inner.write().await;

        if record.success {
            guard.consecutive_failures = 0;
        } else {
            guard.consecutive_failures += 1;
        }
        guard.completions.push(record);

        let prune_before = now - self.config.window;
        guard.completions.retain(|c| c.timestamp >= prune_before);

        let mut alerts = Vec::new();

        if guard.consecutive_failures >= self.config.failure_streak_threshold {
            let streak = guard.consecutive_failures;
            if let Some(alert) = self.maybe_fire(&mut guard, AlertKind::HighFailureStreak, now, || {
                format!("{streak} consecutive failures")
            }) {
                alerts.push(alert);
            }
        }

        let windowed: Vec<&CompletionRecord> = guard
            .completions
            .iter()
            .filter(|c| c.timestamp >= prune_before)
            .collect();
        let total = windowed.len() as u32;

        if total >= self.config.minimum_completions {
            let successes = windowed.iter().filter(|c| c.success).count() as u32;
            let success_rate = successes as f64 / total as f64;
            if success_rate < self.config.success_rate_threshold {
                if let Some(alert) = self.maybe_fire(&mut guard, AlertKind::LowSuccessRate, now, || {
                    format!("success rate {:.1}% over {} completions", success_rate * 100.0, total)
                }) {
                    alerts.push(alert);
                }
            }

            let avg_duration = windowed.iter().map(|c| c.duration_ms as f64).sum::<f64>() / total as f64;
            if avg_duration > self.config.slow_duration_threshold_ms as f64 {
                if let Some(alert) = self.maybe_fire(&mut guard, AlertKind::SlowCompletion, now, || {
                    format!("average duration {avg_duration:.0}ms over {total} completions")
                }) {
                    alerts.push(alert);
                }
            }
        }

        alerts
    }

    fn maybe_fire(
        &self,
        guard: &mut Inner,
        kind: AlertKind,
        now: DateTime<Utc>,
        detail: impl FnOnce() -> String,
    ) -> Option<ProductivityAlert> {
        let hour_key = format!("{}:{}", kind.key(), now.format("%Y-%m-%d-%H"));
        if guard.dedup.contains_key(&hour_key) {
            return None;
        }
        guard.dedup.insert(hour_key, ());
        Some(ProductivityAlert {
            kind,
            detail: detail(),
            timestamp: now,
        })
    }

    /// Clear dedup keys so the next qualifying event re-fires.
    pub async fn reset(&self) {
        let mut guard = self.inner.write().await;
        guard.dedup.clear();
    }

    pub async fn stats(&self) -> ProductivityStats {
        let guard = self.inner.read().await;
        let mut per_model: HashMap<SessionModel, ModelStats> = HashMap::new();
        let mut total_tokens = 0u64;
        let mut total_cost = 0.0f64;

        for c in &guard.completions {
            let entry = per_model.entry(c.model).or_default();
            entry.count += 1;
            if c.success {
                entry.success += 1;
            } else {
                entry.failure += 1;
            }
            entry.avg_duration_ms += c.duration_ms as f64;
            total_tokens += c.tokens_used;
            total_cost += c.cost_usd;
        }
        for stats in per_model.values_mut() {
            if stats.count > 0 {
                stats.avg_duration_ms /= stats.count as f64;
            }
        }

        let total = guard.completions.len() as f64;
        let hours = (self.config.window.num_minutes() as f64 / 60.0).max(f64::EPSILON);

        ProductivityStats {
            per_model,
            avg_tokens_per_task: if total > 0.0 { total_tokens as f64 / total } else { 0.0 },
            avg_cost_per_task: if total > 0.0 { total_cost / total } else { 0.0 },
            hourly_rate: total / hours,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(success: bool, duration_ms: u64, timestamp: DateTime<Utc>) -> CompletionRecord {
        CompletionRecord {
            session_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            model: SessionModel::Sonnet,
            success,
            duration_ms,
            tokens_used: 1000,
            cost_usd: 0.1,
            error_reason: if success { None } else { Some("boom".to_owned()) },
            timestamp,
        }
    }

    #[tokio::test]
    async fn failure_streak_fires_once_per_hour() {
        let monitor = ProductivityMonitor::new(ProductivityMonitorConfig {
            failure_streak_threshold: 3,
            minimum_completions: 100,
            ..Default::default()
        });
        let t0 = Utc::now();

        let mut fired = 0;
        for i in 0..3 {
            let alerts = monitor
                .record_completion(completion(false, 1000, t0 + ChronoDuration::seconds(i)))
                .await;
            fired += alerts
                .iter()
                .filter(|a| a.kind == AlertKind::HighFailureStreak)
                .count();
        }
        assert_eq!(fired, 1, "exactly one high_failure_streak alert within the hour");

        let next_hour = t0 + ChronoDuration::hours(1);
        let alerts = monitor.record_completion(completion(false, 1000, next_hour)).await;
        assert_eq!(
            alerts.iter().filter(|a| a.kind == AlertKind::HighFailureStreak).count(),
            1,
            "a new hour re-fires the alert"
        );
    }

    #[tokio::test]
    async fn success_resets_streak() {
        let monitor = ProductivityMonitor::new(ProductivityMonitorConfig {
            failure_streak_threshold: 3,
            minimum_completions: 100,
            ..Default::default()
        });
        let t0 = Utc::now();
        monitor.record_completion(completion(false, 1000, t0)).await;
        monitor.record_completion(completion(false, 1000, t0)).await;
        monitor.record_completion(completion(true, 1000, t0)).await;
        let alerts = monitor.record_completion(completion(false, 1000, t0)).await;
        assert!(alerts.iter().all(|a| a.kind != AlertKind::HighFailureStreak));
    }

    #[tokio::test]
    async fn low_success_rate_requires_minimum_completions() {
        let monitor = ProductivityMonitor::new(ProductivityMonitorConfig {
            minimum_completions: 4,
            success_rate_threshold: 0.5,
            failure_streak_threshold: 100,
            ..Default::default()
        });
        let t0 = Utc::now();
        for _ in 0..3 {
            monitor.record_completion(completion(false, 1000, t0)).await;
        }
        // Only 3 completions so far -- below minimum, no alert yet.
        let alerts = monitor.record_completion(completion(false, 1000, t0)).await;
        assert!(alerts.iter().any(|a| a.kind == AlertKind::LowSuccessRate));
    }

    #[tokio::test]
    async fn slow_completion_uses_average_duration() {
        let monitor = ProductivityMonitor::new(ProductivityMonitorConfig {
            minimum_completions: 2,
            slow_duration_threshold_ms: 5000,
            failure_streak_threshold: 100,
            success_rate_threshold: 0.0,
            ..Default::default()
        });
        let t0 = Utc::now();
        monitor.record_completion(completion(true, 6000, t0)).await;
        let alerts = monitor.record_completion(completion(true, 6000, t0)).await;
        assert!(alerts.iter().any(|a| a.kind == AlertKind::SlowCompletion));
    }

    #[tokio::test]
    async fn reset_clears_dedup_keys() {
        let monitor = ProductivityMonitor::new(ProductivityMonitorConfig {
            failure_streak_threshold: 1,
            minimum_completions: 100,
            ..Default::default()
        });
        let t0 = Utc::now();
        let alerts = monitor.record_completion(completion(false, 1000, t0)).await;
        assert_eq!(alerts.len(), 1);
        monitor.reset().await;
        let alerts = monitor.record_completion(completion(false, 1000, t0)).await;
        assert_eq!(alerts.len(), 1, "reset should allow the alert to re-fire immediately");
    }
}
