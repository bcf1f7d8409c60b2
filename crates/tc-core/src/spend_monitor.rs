//! Rolling-window spend tracking and threshold alerting.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tc_db::models::SessionModel;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A single recorded spend event, kept in memory until pruned.
#[derive(Debug, Clone)]
pub struct SpendRecord {
    pub timestamp: DateTime<Utc>,
    pub task_id: Uuid,
    pub model: SessionModel,
    pub amount_usd: f64,
}

/// Configuration for [`SpendMonitor`].
#[derive(Debug, Clone, Copy)]
pub struct SpendMonitorConfig {
    pub alert_threshold_usd: f64,
    pub hard_limit_usd: f64,
    pub window: ChronoDuration,
}

/// Result of evaluating rolling spend against the configured thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub alert: bool,
    pub pause: bool,
    pub stop: bool,
    pub is_hard_limit: bool,
}

impl ThresholdResult {
    fn ok() -> Self {
        Self {
            alert: false,
            pause: false,
            stop: false,
            is_hard_limit: false,
        }
    }
}

/// One task's contribution to a spend alert, used for the "top tasks" field.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpend {
    pub task_id: Uuid,
    pub amount_usd: f64,
    pub percentage_of_window: f64,
}

/// Payload delivered to alert callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct SpendAlert {
    pub amount_usd: f64,
    pub threshold_usd: f64,
    pub window: ChronoDuration,
    pub top_tasks: Vec<TaskSpend>,
    pub is_hard_limit: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct DedupState {
    last_soft_alert: Option<DateTime<Utc>>,
    last_hard_alert: Option<DateTime<Utc>>,
}

struct Inner {
    records: Vec<SpendRecord>,
    dedup: DedupState,
    paused: bool,
    stopped: bool,
}

/// Tracks a sliding window of spend and raises alert/pause/stop signals
/// against configured thresholds.
pub struct SpendMonitor {
    config: SpendMonitorConfig,
    inner: Arc<RwLock<Inner>>,
}

impl SpendMonitor {
    pub fn new(config: SpendMonitorConfig) -> Self {
        Self {
            config,
            inner: Arc::new(RwLock::new(Inner {
                records: Vec::new(),
                dedup: DedupState::default(),
                paused: false,
                stopped: false,
            })),
        }
    }

    /// Record a spend event at the current time. O(1) amortized; pruning of
    /// records older than twice the window happens here, not on the read path.
    pub async fn record_spend(&self, amount_usd: f64, task_id: Uuid, model: SessionModel) {
        let now = Utc::now();
        let mut guard = self.inner.write().await;
        guard.records.push(SpendRecord {
            timestamp: now,
            task_id,
            model,
            amount_usd,
        });
        let prune_before = now - self.config.window * 2;
        guard.records.retain(|r| r.timestamp >= prune_before);
    }

    /// Sum of all recorded spend within the last `window` minutes of now.
    pub async fn spend_in_window(&self, window: ChronoDuration) -> f64 {
        let now = Utc::now();
        let start = now - window;
        let guard = self.inner.read().await;
        guard
            .records
            .iter()
            .filter(|r| r.timestamp >= start)
            .map(|r| r.amount_usd)
            .sum()
    }

    /// Evaluate current rolling spend against thresholds, deduplicating
    /// repeat alerts of the same category within one window-length cooldown.
    /// Returns the threshold result and, if a new alert fired, its payload.
    pub async fn check_thresholds(&self) -> (ThresholdResult, Option<SpendAlert>) {
        let spend = self.spend_in_window(self.config.window).await;
        let now = Utc::now();

        let result = if spend >= self.config.hard_limit_usd {
            ThresholdResult {
                alert: true,
                pause: true,
                stop: true,
                is_hard_limit: true,
            }
        } else if spend >= self.config.alert_threshold_usd {
            ThresholdResult {
                alert: true,
                pause: true,
                stop: false,
                is_hard_limit: false,
            }
        } else {
            ThresholdResult::ok()
        };

        let mut guard = self.inner.write().await;
        guard.paused = result.pause;
        if result.stop {
            guard.stopped = true;
        }

        if !result.alert {
            return (result, None);
        }

        let cooldown = self.config.window;
        let should_fire = if result.is_hard_limit {
            let fire = guard
                .dedup
                .last_hard_alert
                .map(|last| now - last >= cooldown)
                .unwrap_or(true);
            if fire {
                guard.dedup.last_hard_alert = Some(now);
            }
            fire
        } else {
            let fire = guard
                .dedup
                .last_soft_alert
                .map(|last| now - last >= cooldown)
                .unwrap_or(true);
            if fire {
                guard.dedup.last_soft_alert = Some(now);
            }
            fire
        };

        if !should_fire {
            return (result, None);
        }

        let threshold_usd = if result.is_hard_limit {
            self.config.hard_limit_usd
        } else {
            self.config.alert_threshold_usd
        };

        let top_tasks = top_tasks_by_amount(&guard.records, self.config.window, now);

        let alert = SpendAlert {
            amount_usd: spend,
            threshold_usd,
            window: self.config.window,
            top_tasks,
            is_hard_limit: result.is_hard_limit,
            timestamp: now,
        };

        (result, Some(alert))
    }

    /// Clear the hard-limit dedup latch so a subsequent crossing re-fires.
    /// Called when the operator resumes after a hard stop.
    pub async fn resume(&self) {
        let mut guard = self.inner.write().await;
        guard.dedup.last_hard_alert = None;
        guard.paused = false;
        guard.stopped = false;
    }

    pub async fn is_paused(&self) -> bool {
        self.inner.read().await.paused
    }

    pub async fn is_stopped(&self) -> bool {
        self.inner.read().await.stopped
    }

    /// Clear all records, alert timestamps, and pause/stop state.
    pub async fn reset(&self) {
        let mut guard = self.inner.write().await;
        guard.records.clear();
        guard.dedup = DedupState::default();
        guard.paused = false;
        guard.stopped = false;
    }
}

fn top_tasks_by_amount(
    records: &[SpendRecord],
    window: ChronoDuration,
    now: DateTime<Utc>,
) -> Vec<TaskSpend> {
    let start = now - window;
    let mut by_task: std::collections::HashMap<Uuid, f64> = std::collections::HashMap::new();
    let mut total = 0.0;
    for r in records.iter().filter(|r| r.timestamp >= start) {
        *by_task.entry(r.task_id).or_insert(0.0) += r.amount_usd;
        total += r.amount_usd;
    }
    let mut tasks: Vec<TaskSpend> = by_task
        .into_iter()
        .map(|(task_id, amount_usd)| TaskSpend {
            task_id,
            amount_usd,
            percentage_of_window: if total > 0.0 { amount_usd / total * 100.0 } else { 0.0 },
        })
        .collect();
    tasks.sort_by(|a, b| b.amount_usd.partial_cmp(&a.amount_usd).unwrap_or(std::cmp::Ordering::Equal));
    tasks
}

/// Render a [`SpendAlert`] as Slack-style markdown. Presentation only -- the
/// monitor itself never transports this anywhere.
pub fn format_slack_alert(alert: &SpendAlert) -> String {
    let kind = if alert.is_hard_limit { "HARD LIMIT" } else { "alert" };
    let mut out = format!(
        "*Spend {kind}*: ${:.2} over the last {} minutes (threshold ${:.2})",
        alert.amount_usd,
        alert.window.num_minutes(),
        alert.threshold_usd,
    );
    if !alert.top_tasks.is_empty() {
        out.push_str("\nTop tasks:");
        for t in alert.top_tasks.iter().take(5) {
            out.push_str(&format!(
                "\n  - {} : ${:.2} ({:.0}%)",
                t.task_id, t.amount_usd, t.percentage_of_window
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SpendMonitorConfig {
        SpendMonitorConfig {
            alert_threshold_usd: 5.0,
            hard_limit_usd: 50.0,
            window: ChronoDuration::minutes(5),
        }
    }

    #[tokio::test]
    async fn reset_with_no_records_leaves_zero_spend() {
        let monitor = SpendMonitor::new(config());
        monitor.reset().await;
        assert_eq!(monitor.spend_in_window(ChronoDuration::minutes(5)).await, 0.0);
    }

    #[tokio::test]
    async fn hard_limit_fires_exactly_once_until_resume() {
        let monitor = SpendMonitor::new(config());
        monitor.record_spend(55.0, Uuid::new_v4(), SessionModel::Opus).await;

        let (result, alert) = monitor.check_thresholds().await;
        assert!(result.is_hard_limit);
        assert!(result.stop);
        assert!(alert.is_some());

        let (_, second) = monitor.check_thresholds().await;
        assert!(second.is_none(), "hard alert should be deduplicated");

        monitor.resume().await;
        let (_, third) = monitor.check_thresholds().await;
        assert!(third.is_some(), "resume should clear the hard-limit latch");
    }

    #[tokio::test]
    async fn soft_threshold_pauses_without_stopping() {
        let monitor = SpendMonitor::new(config());
        monitor.record_spend(10.0, Uuid::new_v4(), SessionModel::Sonnet).await;
        let (result, alert) = monitor.check_thresholds().await;
        assert!(result.pause);
        assert!(!result.stop);
        assert!(alert.is_some());
    }

    #[tokio::test]
    async fn below_threshold_is_quiet() {
        let monitor = SpendMonitor::new(config());
        monitor.record_spend(1.0, Uuid::new_v4(), SessionModel::Haiku).await;
        let (result, alert) = monitor.check_thresholds().await;
        assert!(!result.alert);
        assert!(alert.is_none());
    }

    #[tokio::test]
    async fn spend_in_window_sums_only_recent_records() {
        let monitor = SpendMonitor::new(config());
        monitor.record_spend(3.0, Uuid::new_v4(), SessionModel::Opus).await;
        monitor.record_spend(4.0, Uuid::new_v4(), SessionModel::Opus).await;
        let total = monitor.spend_in_window(ChronoDuration::minutes(5)).await;
        assert_eq!(total, 7.0);
    }
}
