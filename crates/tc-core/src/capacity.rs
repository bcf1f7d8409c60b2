//! Per-model concurrency accounting.
//!
//! The tracker is the single source of truth for how many live sessions each
//! model currently has running. Reservation and release are the only two
//! mutating operations; everything else reads a snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use tc_db::models::SessionModel;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

/// Errors raised by [`CapacityTracker`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapacityError {
    #[error("model {0} is at its concurrency limit")]
    LimitExceeded(SessionModel),
}

/// Current count, limit, and derived availability for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelCapacity {
    pub model: SessionModel,
    pub current: u32,
    pub limit: u32,
}

impl ModelCapacity {
    pub fn available(&self) -> u32 {
        self.limit.saturating_sub(self.current)
    }

    pub fn utilization(&self) -> f64 {
        if self.limit == 0 {
            0.0
        } else {
            self.current as f64 / self.limit as f64
        }
    }
}

/// A snapshot of capacity across every configured model.
#[derive(Debug, Clone, Default)]
pub struct CapacitySnapshot {
    pub models: Vec<ModelCapacity>,
}

impl CapacitySnapshot {
    pub fn for_model(&self, model: SessionModel) -> Option<ModelCapacity> {
        self.models.iter().copied().find(|m| m.model == model)
    }
}

/// Tracks the number of live sessions per model against a configured cap.
#[derive(Debug, Clone)]
pub struct CapacityTracker {
    inner: Arc<RwLock<HashMap<SessionModel, (u32, u32)>>>,
}

impl CapacityTracker {
    /// Build a tracker from per-model limits, e.g. `{opus: 5, sonnet: 10, haiku: 20}`.
    pub fn new(limits: HashMap<SessionModel, u32>) -> Self {
        let inner = limits.into_iter().map(|(model, limit)| (model, (0, limit))).collect();
        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    /// Reserve one slot for `model`. Returns `true` on success, `false` if
    /// the model is already at its limit.
    pub async fn reserve(&self, model: SessionModel) -> bool {
        let mut guard = self.inner.write().await;
        let Some((current, limit)) = guard.get_mut(&model) else {
            warn!(?model, "reserve called for unconfigured model");
            return false;
        };
        if *current < *limit {
            *current += 1;
            true
        } else {
            false
        }
    }

    /// Reserve a slot for `model`, returning [`CapacityError::LimitExceeded`]
    /// when none is available. Use [`Self::reserve`] in the hot dispatch
    /// path; this is for callers that want to assert admission unconditionally.
    pub async fn reserve_or_err(&self, model: SessionModel) -> Result<(), CapacityError> {
        if self.reserve(model).await {
            Ok(())
        } else {
            Err(CapacityError::LimitExceeded(model))
        }
    }

    /// Release one slot for `model`. Releasing below zero is a no-op and is
    /// logged as a warning -- it indicates a double-release bug upstream.
    pub async fn release(&self, model: SessionModel) {
        let mut guard = self.inner.write().await;
        let Some((current, _limit)) = guard.get_mut(&model) else {
            warn!(?model, "release called for unconfigured model");
            return;
        };
        if *current == 0 {
            warn!(?model, "release called with current already at zero");
            return;
        }
        *current -= 1;
    }

    pub async fn snapshot(&self) -> CapacitySnapshot {
        let guard = self.inner.read().await;
        let mut models: Vec<ModelCapacity> = guard
            .iter()
            .map(|(model, (current, limit))| ModelCapacity {
                model: *model,
                current: *current,
                limit: *limit,
            })
            .collect();
        models.sort_by_key(|m| m.model.to_string());
        CapacitySnapshot { models }
    }

    pub async fn current(&self, model: SessionModel) -> u32 {
        self.inner
            .read()
            .await
            .get(&model)
            .map(|(current, _)| *current)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> HashMap<SessionModel, u32> {
        HashMap::from([
            (SessionModel::Opus, 1),
            (SessionModel::Sonnet, 2),
            (SessionModel::Haiku, 5),
        ])
    }

    #[tokio::test]
    async fn reserve_respects_limit() {
        let tracker = CapacityTracker::new(limits());
        assert!(tracker.reserve(SessionModel::Opus).await);
        assert!(!tracker.reserve(SessionModel::Opus).await);
    }

    #[tokio::test]
    async fn release_frees_a_slot() {
        let tracker = CapacityTracker::new(limits());
        assert!(tracker.reserve(SessionModel::Opus).await);
        tracker.release(SessionModel::Opus).await;
        assert!(tracker.reserve(SessionModel::Opus).await);
    }

    #[tokio::test]
    async fn release_below_zero_is_a_no_op() {
        let tracker = CapacityTracker::new(limits());
        tracker.release(SessionModel::Opus).await;
        assert_eq!(tracker.current(SessionModel::Opus).await, 0);
    }

    #[tokio::test]
    async fn snapshot_reports_availability_and_utilization() {
        let tracker = CapacityTracker::new(limits());
        tracker.reserve(SessionModel::Sonnet).await;
        let snap = tracker.snapshot().await;
        let sonnet = snap.for_model(SessionModel::Sonnet).unwrap();
        assert_eq!(sonnet.current, 1);
        assert_eq!(sonnet.available(), 1);
        assert_eq!(sonnet.utilization(), 0.5);
    }

    #[tokio::test]
    async fn reserve_or_err_surfaces_limit_exceeded() {
        let tracker = CapacityTracker::new(limits());
        tracker.reserve(SessionModel::Opus).await;
        let err = tracker.reserve_or_err(SessionModel::Opus).await.unwrap_err();
        assert_eq!(err, CapacityError::LimitExceeded(SessionModel::Opus));
    }
}
