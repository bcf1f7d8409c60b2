//! Bridges session finalization to durable storage and the in-memory
//! monitors: every [`SessionFinalized`] event gets a spend event, a
//! completion record, a task session-count bump, a productivity
//! observation, a circuit breaker success/failure signal, and the task's
//! exit from `in_progress` (to `complete` or back to `queued`). Modeled on
//! the session event pump's subscribe-and-spawn pattern in
//! [`crate::session_manager`].

use std::sync::Arc;

use tc_db::models::{SessionStatus, TaskStatus};
use tc_db::queries::{completions, spend_events, tasks};
use tracing::warn;

use crate::circuit_breaker::CircuitBreaker;
use crate::productivity_monitor::{CompletionRecord, ProductivityMonitor};
use crate::session_manager::{AgentSessionManager, SessionEvent, SessionFinalized};
use crate::spend_monitor::SpendMonitor;

/// Owns the background task that drains [`AgentSessionManager::subscribe`]
/// and fans each finalized session out to persistence and the monitors.
pub struct CompletionRecorder {
    pool: sqlx::PgPool,
    session_manager: AgentSessionManager,
    spend_monitor: Arc<SpendMonitor>,
    productivity: Arc<ProductivityMonitor>,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl CompletionRecorder {
    pub fn new(
        pool: sqlx::PgPool,
        session_manager: AgentSessionManager,
        spend_monitor: Arc<SpendMonitor>,
        productivity: Arc<ProductivityMonitor>,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            pool,
            session_manager,
            spend_monitor,
            productivity,
            circuit_breaker,
        }
    }

    /// Spawn the drain loop. Runs until the sender side (the session
    /// manager) is dropped, which in practice is the process lifetime.
    pub fn spawn(self: Arc<Self>) {
        let mut rx = self.session_manager.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::Finalized(finalized)) => self.handle(finalized).await,
                    Ok(SessionEvent::Question(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "completion recorder lagged behind session events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn handle(&self, finalized: SessionFinalized) {
        let success = finalized.status == SessionStatus::Completed;
        let duration_ms = (finalized.finished_at - finalized.started_at).num_milliseconds().max(0) as u64;
        let tokens_used = finalized.usage.input_tokens + finalized.usage.output_tokens;
        let error_reason = if success { None } else { Some(finalized.status.to_string()) };

        // Cancellation is operator/policy-driven (e.g. a spend hard stop) and
        // says nothing about whether the adapter itself is healthy, so only
        // genuine completion/failure feed the breaker.
        match finalized.status {
            SessionStatus::Completed => self.circuit_breaker.record_success().await,
            SessionStatus::Failed => self.circuit_breaker.record_failure().await,
            SessionStatus::Starting | SessionStatus::Active | SessionStatus::Cancelled => {}
        }

        if finalized.cost_usd > 0.0 {
            self.spend_monitor
                .record_spend(finalized.cost_usd, finalized.task_id, finalized.model)
                .await;
            if let Err(e) = spend_events::insert_spend_event(&self.pool, finalized.task_id, finalized.model, finalized.cost_usd).await {
                warn!(session_id = %finalized.session_id, error = %e, "failed to persist spend event");
            }
        }

        self.productivity
            .record_completion(CompletionRecord {
                session_id: finalized.session_id,
                task_id: finalized.task_id,
                model: finalized.model,
                success,
                duration_ms,
                tokens_used,
                cost_usd: finalized.cost_usd,
                error_reason: error_reason.clone(),
                timestamp: finalized.finished_at,
            })
            .await;

        if let Err(e) = completions::insert_completion_record(
            &self.pool,
            finalized.session_id,
            finalized.task_id,
            finalized.model,
            success,
            duration_ms as i64,
            tokens_used as i64,
            finalized.cost_usd,
            error_reason.as_deref(),
        )
        .await
        {
            warn!(session_id = %finalized.session_id, error = %e, "failed to persist completion record");
        }

        if success {
            if let Err(e) = tasks::increment_actual_sessions(&self.pool, finalized.task_id, finalized.model).await {
                warn!(task_id = %finalized.task_id, error = %e, "failed to increment actual sessions");
            }
            if let Err(e) =
                tasks::transition_task_status(&self.pool, finalized.task_id, TaskStatus::InProgress, TaskStatus::Complete).await
            {
                warn!(task_id = %finalized.task_id, error = %e, "failed to mark task complete");
            }
        } else {
            // The core never retries automatically (that's the enqueuing
            // collaborator's policy) -- requeuing just means the task is no
            // longer stranded `in_progress` with no active session, and is
            // eligible for the dispatch loop to pick up again.
            if let Err(e) =
                tasks::transition_task_status(&self.pool, finalized.task_id, TaskStatus::InProgress, TaskStatus::Queued).await
            {
                warn!(task_id = %finalized.task_id, error = %e, "failed to requeue task after session failure");
            }
        }
    }
}
