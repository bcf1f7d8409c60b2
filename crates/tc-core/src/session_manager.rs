//! Owns the sessionId -> session mapping; mediates the CLI Adapter, Capacity
//! Tracker, and Subagent Tracker through a single admission/finalization
//! path so capacity accounting and the session map never drift apart.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use sqlx::PgPool;
use tc_db::models::{SessionModel, SessionStatus};
use tc_db::queries::sessions::insert_session_record;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapter::{AgentEvent, AgentHandle, Harness, MaterializedTask, Usage};
use crate::capacity::CapacityTracker;
use crate::subagent_tracker::SubagentTracker;

/// Errors raised by [`AgentSessionManager::launch`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("model {0} is at its concurrency limit")]
    CapacityExhausted(SessionModel),
    #[error("max subagent depth exceeded for parent {0}")]
    DepthExceeded(Uuid),
    #[error("parent session {0} not found")]
    ParentNotFound(Uuid),
    #[error("agent failed to start: {0}")]
    Adapter(#[from] crate::adapter::AdapterError),
}

#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_usd_per_million: f64,
    pub output_usd_per_million: f64,
}

/// Static per-model USD-per-million-token pricing, consulted only when the
/// adapter's own `total_cost_usd` is absent from the final usage report.
#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: HashMap<SessionModel, ModelPricing>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut prices = HashMap::new();
        prices.insert(
            SessionModel::Opus,
            ModelPricing { input_usd_per_million: 15.0, output_usd_per_million: 75.0 },
        );
        prices.insert(
            SessionModel::Sonnet,
            ModelPricing { input_usd_per_million: 3.0, output_usd_per_million: 15.0 },
        );
        prices.insert(
            SessionModel::Haiku,
            ModelPricing { input_usd_per_million: 0.8, output_usd_per_million: 4.0 },
        );
        Self { prices }
    }
}

impl PricingTable {
    pub fn new(prices: HashMap<SessionModel, ModelPricing>) -> Self {
        Self { prices }
    }

    /// Final cost for a session: the adapter's own reported figure when
    /// present, else a pricing-table estimate from token counts.
    pub fn cost_for(&self, model: SessionModel, usage: &Usage) -> f64 {
        if usage.cost_usd > 0.0 {
            return usage.cost_usd;
        }
        let Some(p) = self.prices.get(&model) else {
            return 0.0;
        };
        (usage.input_tokens as f64 / 1_000_000.0) * p.input_usd_per_million
            + (usage.output_tokens as f64 / 1_000_000.0) * p.output_usd_per_million
    }
}

/// Options accompanying a [`AgentSessionManager::launch`] call.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub parent_session_id: Option<Uuid>,
}

/// Emitted once a session reaches a terminal state.
#[derive(Debug, Clone)]
pub struct SessionFinalized {
    pub session_id: Uuid,
    pub task_id: Uuid,
    pub model: SessionModel,
    pub status: SessionStatus,
    pub cost_usd: f64,
    pub usage: Usage,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Emitted when the agent asks a question mid-run.
#[derive(Debug, Clone)]
pub struct SessionQuestion {
    pub session_id: Uuid,
    pub tool_use_id: String,
    pub question: serde_json::Value,
}

/// Broadcast over [`AgentSessionManager::subscribe`].
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Question(SessionQuestion),
    Finalized(SessionFinalized),
}

struct LiveSession {
    task_id: Uuid,
    project_id: Uuid,
    pid: u32,
    model: SessionModel,
    status: SessionStatus,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    parent_session_id: Option<Uuid>,
    depth: i32,
    external_session_id: Option<String>,
    usage: Usage,
    finalized: bool,
}

/// Mediates session admission, the CLI Adapter's process lifecycle, capacity
/// accounting, and the subagent hierarchy. Cheap to clone: every field is
/// reference-counted, so a clone shares the same live session map.
#[derive(Clone)]
pub struct AgentSessionManager {
    capacity: CapacityTracker,
    subagents: Arc<SubagentTracker>,
    harness: Arc<dyn Harness>,
    pool: PgPool,
    pricing: PricingTable,
    sessions: Arc<RwLock<HashMap<Uuid, LiveSession>>>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl AgentSessionManager {
    pub fn new(capacity: CapacityTracker, subagents: SubagentTracker, harness: Arc<dyn Harness>, pool: PgPool) -> Self {
        Self::with_pricing(capacity, subagents, harness, pool, PricingTable::default())
    }

    pub fn with_pricing(
        capacity: CapacityTracker,
        subagents: SubagentTracker,
        harness: Arc<dyn Harness>,
        pool: PgPool,
        pricing: PricingTable,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            capacity,
            subagents: Arc::new(subagents),
            harness,
            pool,
            pricing,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Admit and launch a new session for `task` on `model`. See the module
    /// doc for the five-step admission sequence this implements.
    pub async fn launch(
        &self,
        task: &MaterializedTask,
        model: SessionModel,
        options: LaunchOptions,
    ) -> Result<Uuid, LaunchError> {
        let snapshot = self.capacity.snapshot().await;
        let available = snapshot.for_model(model).map(|m| m.available()).unwrap_or(0);
        if available == 0 {
            return Err(LaunchError::CapacityExhausted(model));
        }

        let depth = if let Some(parent_id) = options.parent_session_id {
            let parent_depth = self
                .subagents
                .depth(parent_id)
                .await
                .ok_or(LaunchError::ParentNotFound(parent_id))?;
            if !self.subagents.can_spawn(parent_id).await {
                return Err(LaunchError::DepthExceeded(parent_id));
            }
            parent_depth + 1
        } else {
            0
        };

        let session_id = Uuid::new_v4();
        let now = Utc::now();

        // Reserve capacity and register this session's row together, under
        // one held sessions-lock critical section, so no reader of either
        // the Capacity Tracker or the sessions map can ever observe one
        // without the other: the two counts are kept equal by construction,
        // not by hoping two independent locks happen to agree.
        {
            let mut guard = self.sessions.write().await;
            if !self.capacity.reserve(model).await {
                return Err(LaunchError::CapacityExhausted(model));
            }
            guard.insert(
                session_id,
                LiveSession {
                    task_id: task.task_id,
                    project_id: task.project_id,
                    pid: 0,
                    model,
                    status: SessionStatus::Starting,
                    started_at: now,
                    last_activity: now,
                    parent_session_id: options.parent_session_id,
                    depth: depth as i32,
                    external_session_id: None,
                    usage: Usage::default(),
                    finalized: false,
                },
            );
        }

        let handle = match self.harness.spawn(task).await {
            Ok(h) => h,
            Err(e) => {
                self.retract_reservation(session_id, model).await;
                return Err(LaunchError::Adapter(e));
            }
        };

        let registration = match options.parent_session_id {
            Some(parent_id) => self.subagents.register_sub(parent_id, session_id).await,
            None => self.subagents.register_root(session_id).await,
        };
        if let Err(e) = registration {
            self.retract_reservation(session_id, model).await;
            let _ = self.harness.kill(&handle).await;
            return Err(match e {
                crate::subagent_tracker::SubagentError::ParentNotFound(id) => LaunchError::ParentNotFound(id),
                crate::subagent_tracker::SubagentError::DepthExceeded(id) => LaunchError::DepthExceeded(id),
                crate::subagent_tracker::SubagentError::AlreadyRegistered(id) => LaunchError::ParentNotFound(id),
            });
        }

        {
            let mut guard = self.sessions.write().await;
            if let Some(live) = guard.get_mut(&session_id) {
                live.pid = handle.pid;
            }
        }

        self.spawn_event_pump(session_id, handle);

        Ok(session_id)
    }

    /// Undo a reservation for a session that never made it live: releases
    /// its capacity slot and removes its placeholder row together, under one
    /// held sessions-lock critical section, mirroring how `launch` reserves
    /// them together.
    async fn retract_reservation(&self, session_id: Uuid, model: SessionModel) {
        let mut guard = self.sessions.write().await;
        self.capacity.release(model).await;
        guard.remove(&session_id);
    }

    /// Count of currently live (non-finalized) sessions for `project_id`,
    /// broken down by model. Used by the dispatch loop to decide which
    /// projects are underutilized relative to their recommended share.
    pub async fn live_session_counts_for_project(&self, project_id: Uuid) -> HashMap<SessionModel, u32> {
        let guard = self.sessions.read().await;
        let mut counts = HashMap::new();
        for session in guard.values() {
            if session.project_id == project_id && !session.finalized {
                *counts.entry(session.model).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Request cancellation: kills the subprocess and finalizes as
    /// cancelled. The event pump's own finalize-on-stream-end call becomes a
    /// no-op once this has run. A no-op if `session_id` is unknown or has
    /// already finalized.
    pub async fn cancel(&self, session_id: Uuid) {
        let pid = { self.sessions.read().await.get(&session_id).map(|s| s.pid) };
        if let Some(pid) = pid {
            let handle = AgentHandle { pid, stdin: None, task_id: Uuid::nil() };
            let _ = self.harness.kill(&handle).await;
        }
        self.finalize(session_id, SessionStatus::Cancelled).await;
    }

    /// Ids of every session not yet finalized. Used by the dispatch loop to
    /// proactively cancel everything when spend hits its hard limit.
    pub async fn live_session_ids(&self) -> Vec<Uuid> {
        self.sessions
            .read()
            .await
            .iter()
            .filter(|(_, s)| !s.finalized)
            .map(|(id, _)| *id)
            .collect()
    }

    pub async fn status(&self, session_id: Uuid) -> Option<SessionStatus> {
        self.sessions.read().await.get(&session_id).map(|s| s.status)
    }

    fn spawn_event_pump(&self, session_id: Uuid, handle: AgentHandle) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut first_event = true;
            let mut stream = manager.harness.events(&handle);
            while let Some(event) = stream.next().await {
                if first_event {
                    manager.mark_active(session_id).await;
                    first_event = false;
                }
                match event {
                    Ok(AgentEvent::ToolCall { tool_name, is_progress, .. }) => {
                        manager.touch_activity(session_id).await;
                        info!(%session_id, tool_name, is_progress, "tool call observed");
                    }
                    Ok(AgentEvent::Question { tool_use_id, question }) => {
                        manager.touch_activity(session_id).await;
                        let _ = manager.events_tx.send(SessionEvent::Question(SessionQuestion {
                            session_id,
                            tool_use_id,
                            question,
                        }));
                    }
                    Ok(AgentEvent::Completion { success, session_id: external_id, usage, .. }) => {
                        manager.record_external_id(session_id, external_id).await;
                        manager.accumulate_usage(session_id, usage).await;
                        let status = if success { SessionStatus::Completed } else { SessionStatus::Failed };
                        manager.finalize(session_id, status).await;
                    }
                    Ok(AgentEvent::Error { usage, errors }) => {
                        manager.accumulate_usage(session_id, usage).await;
                        warn!(%session_id, ?errors, "agent reported error");
                        manager.finalize(session_id, SessionStatus::Failed).await;
                    }
                    Err(e) => {
                        warn!(%session_id, error = %e, "agent event stream error");
                        manager.finalize(session_id, SessionStatus::Failed).await;
                    }
                }
            }
            // Stream ended with no explicit terminal event observed (process
            // killed externally, or exited without a result frame) -- finalize
            // unconditionally so capacity is never leaked. Idempotent if a
            // terminal event already finalized this session above.
            manager.finalize(session_id, SessionStatus::Failed).await;
        });
    }

    async fn mark_active(&self, session_id: Uuid) {
        let mut guard = self.sessions.write().await;
        if let Some(s) = guard.get_mut(&session_id) {
            if s.status == SessionStatus::Starting {
                s.status = SessionStatus::Active;
            }
            s.last_activity = Utc::now();
        }
    }

    async fn touch_activity(&self, session_id: Uuid) {
        let mut guard = self.sessions.write().await;
        if let Some(s) = guard.get_mut(&session_id) {
            s.last_activity = Utc::now();
        }
    }

    async fn record_external_id(&self, session_id: Uuid, external_id: Option<String>) {
        let Some(id) = external_id else { return };
        let mut guard = self.sessions.write().await;
        if let Some(s) = guard.get_mut(&session_id) {
            s.external_session_id = Some(id);
        }
    }

    async fn accumulate_usage(&self, session_id: Uuid, usage: Usage) {
        let mut guard = self.sessions.write().await;
        if let Some(s) = guard.get_mut(&session_id) {
            s.usage = usage;
        }
    }

    /// Single-entry, idempotent finalization. Before releasing this
    /// session's own capacity, cascades to any still-live descendants
    /// (deepest first) so a forcibly terminated parent never strands a
    /// child's reserved capacity.
    pub async fn finalize(&self, session_id: Uuid, status: SessionStatus) {
        let descendants = self.subagents.get_descendants(session_id).await;
        if !descendants.is_empty() {
            let mut with_depth: Vec<(Uuid, i32)> = {
                let guard = self.sessions.read().await;
                descendants
                    .iter()
                    .map(|id| (*id, guard.get(id).map(|s| s.depth).unwrap_or(0)))
                    .collect()
            };
            with_depth.sort_by_key(|(_, depth)| std::cmp::Reverse(*depth));
            for (child_id, _) in with_depth {
                self.finalize_node(child_id, SessionStatus::Cancelled).await;
            }
        }
        self.finalize_node(session_id, status).await;
        self.subagents.remove(session_id).await;
    }

    async fn finalize_node(&self, session_id: Uuid, status: SessionStatus) {
        let outcome = {
            let mut guard = self.sessions.write().await;
            let Some(live) = guard.get_mut(&session_id) else {
                return;
            };
            if live.finalized {
                return;
            }
            live.finalized = true;
            live.status = status;
            let outcome = (
                live.task_id,
                live.model,
                live.usage,
                live.started_at,
                live.parent_session_id,
                live.depth,
            );
            // Released while still holding the sessions write lock, so the
            // finalized-mark and the capacity release land as one atomic
            // step from any concurrent reader's point of view.
            self.capacity.release(outcome.1).await;
            outcome
        };

        let (task_id, model, usage, started_at, parent_session_id, depth) = outcome;
        let cost_usd = self.pricing.cost_for(model, &usage);
        let finished_at = Utc::now();

        if let Err(e) = insert_session_record(
            &self.pool,
            session_id,
            task_id,
            model,
            status,
            started_at,
            Some(finished_at),
            usage.input_tokens as i64,
            usage.output_tokens as i64,
            usage.cache_read_tokens as i64,
            usage.cache_creation_tokens as i64,
            cost_usd,
            parent_session_id,
            depth,
        )
        .await
        {
            warn!(%session_id, error = %e, "failed to persist finalized session record");
        }

        let _ = self.events_tx.send(SessionEvent::Finalized(SessionFinalized {
            session_id,
            task_id,
            model,
            status,
            cost_usd,
            usage,
            started_at,
            finished_at,
        }));

        info!(%session_id, %status, cost_usd, "session finalized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterError;
    use async_trait::async_trait;
    use futures::stream;
    use std::path::PathBuf;
    use std::pin::Pin;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    struct FakeHarness {
        events: StdMutex<HashMap<u32, Vec<Result<AgentEvent, AdapterError>>>>,
        kill_notify: Arc<Notify>,
        next_pid: StdMutex<u32>,
    }

    impl FakeHarness {
        fn new() -> Self {
            Self {
                events: StdMutex::new(HashMap::new()),
                kill_notify: Arc::new(Notify::new()),
                next_pid: StdMutex::new(1),
            }
        }

        fn program(&self, events: Vec<Result<AgentEvent, AdapterError>>) -> u32 {
            let mut pid_guard = self.next_pid.lock().unwrap();
            let pid = *pid_guard;
            *pid_guard += 1;
            self.events.lock().unwrap().insert(pid, events);
            pid
        }
    }

    #[async_trait]
    impl Harness for FakeHarness {
        fn name(&self) -> &str {
            "fake"
        }

        async fn spawn(&self, _task: &MaterializedTask) -> Result<AgentHandle, AdapterError> {
            unreachable!("tests call program()+launch_with_pid instead")
        }

        fn events(&self, handle: &AgentHandle) -> Pin<Box<dyn futures::Stream<Item = Result<AgentEvent, AdapterError>> + Send>> {
            let events = self.events.lock().unwrap().remove(&handle.pid).unwrap_or_default();
            Box::pin(stream::iter(events))
        }

        async fn kill(&self, _handle: &AgentHandle) -> Result<(), AdapterError> {
            self.kill_notify.notify_one();
            Ok(())
        }

        async fn is_running(&self, _handle: &AgentHandle) -> bool {
            false
        }
    }

    fn task(task_id: Uuid) -> MaterializedTask {
        MaterializedTask {
            task_id,
            project_id: Uuid::new_v4(),
            title: "t".to_owned(),
            prompt: "do it".to_owned(),
            working_dir: PathBuf::from("/tmp"),
            env_vars: HashMap::new(),
            model_alias: None,
            resume_session_id: None,
            allowed_tools: None,
            append_system_prompt: None,
            bypass_permissions: false,
        }
    }

    fn lazy_pool() -> PgPool {
        sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgresql://localhost:5432/trafficcontrol")
            .expect("lazy pool construction should not fail")
    }

    #[tokio::test]
    async fn launch_rejects_when_capacity_exhausted() {
        let capacity = CapacityTracker::new(HashMap::from([(SessionModel::Opus, 0)]));
        let manager = AgentSessionManager::new(
            capacity,
            SubagentTracker::new(2),
            Arc::new(FakeHarness::new()),
            lazy_pool(),
        );
        let err = manager.launch(&task(Uuid::new_v4()), SessionModel::Opus, LaunchOptions::default()).await.unwrap_err();
        assert_eq!(err, LaunchError::CapacityExhausted(SessionModel::Opus));
    }

    #[tokio::test]
    async fn launch_rejects_unknown_parent() {
        let capacity = CapacityTracker::new(HashMap::from([(SessionModel::Opus, 1)]));
        let manager = AgentSessionManager::new(
            capacity,
            SubagentTracker::new(2),
            Arc::new(FakeHarness::new()),
            lazy_pool(),
        );
        let opts = LaunchOptions { parent_session_id: Some(Uuid::new_v4()) };
        let err = manager.launch(&task(Uuid::new_v4()), SessionModel::Opus, opts).await.unwrap_err();
        assert!(matches!(err, LaunchError::ParentNotFound(_)));
    }

    #[tokio::test]
    async fn completion_event_releases_capacity_and_emits_finalized() {
        let capacity = CapacityTracker::new(HashMap::from([(SessionModel::Sonnet, 1)]));
        let harness = Arc::new(FakeHarness::new());
        let pid = harness.program(vec![Ok(AgentEvent::Completion {
            success: true,
            session_id: Some("sess-abc".to_owned()),
            result: "done".to_owned(),
            usage: Usage {
                input_tokens: 100,
                output_tokens: 50,
                cache_read_tokens: 0,
                cache_creation_tokens: 0,
                total_tokens: 150,
                cost_usd: 0.02,
            },
            num_turns: Some(1),
            duration_ms: Some(500),
        })]);

        let manager = AgentSessionManager::new(capacity.clone(), SubagentTracker::new(2), harness.clone(), lazy_pool());
        let mut rx = manager.subscribe();

        // Launch would normally call harness.spawn(); substitute directly by
        // constructing the handle the way launch() would for a reserved slot.
        assert!(capacity.reserve(SessionModel::Sonnet).await);
        let session_id = Uuid::new_v4();
        manager.subagents.register_root(session_id).await.unwrap();
        {
            let mut guard = manager.sessions.write().await;
            guard.insert(
                session_id,
                LiveSession {
                    task_id: Uuid::new_v4(),
                    project_id: Uuid::new_v4(),
                    pid,
                    model: SessionModel::Sonnet,
                    status: SessionStatus::Starting,
                    started_at: Utc::now(),
                    last_activity: Utc::now(),
                    parent_session_id: None,
                    depth: 0,
                    external_session_id: None,
                    usage: Usage::default(),
                    finalized: false,
                },
            );
        }
        manager.spawn_event_pump(session_id, AgentHandle { pid, stdin: None, task_id: Uuid::new_v4() });

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        match event {
            SessionEvent::Finalized(f) => {
                assert_eq!(f.session_id, session_id);
                assert_eq!(f.status, SessionStatus::Completed);
                assert_eq!(f.cost_usd, 0.02);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(capacity.current(SessionModel::Sonnet).await, 0);
    }

    #[tokio::test]
    async fn finalize_is_idempotent_and_cascades_to_descendants() {
        let capacity = CapacityTracker::new(HashMap::from([(SessionModel::Haiku, 2)]));
        let manager = AgentSessionManager::new(
            capacity.clone(),
            SubagentTracker::new(3),
            Arc::new(FakeHarness::new()),
            lazy_pool(),
        );

        let parent_id = Uuid::new_v4();
        let child_id = Uuid::new_v4();
        assert!(capacity.reserve(SessionModel::Haiku).await);
        assert!(capacity.reserve(SessionModel::Haiku).await);
        manager.subagents.register_root(parent_id).await.unwrap();
        manager.subagents.register_sub(parent_id, child_id).await.unwrap();

        let mut guard = manager.sessions.write().await;
        for (id, depth, parent) in [(parent_id, 0, None), (child_id, 1, Some(parent_id))] {
            guard.insert(
                id,
                LiveSession {
                    task_id: Uuid::new_v4(),
                    project_id: Uuid::new_v4(),
                    pid: 0,
                    model: SessionModel::Haiku,
                    status: SessionStatus::Active,
                    started_at: Utc::now(),
                    last_activity: Utc::now(),
                    parent_session_id: parent,
                    depth,
                    external_session_id: None,
                    usage: Usage::default(),
                    finalized: false,
                },
            );
        }
        drop(guard);

        manager.finalize(parent_id, SessionStatus::Cancelled).await;
        assert_eq!(capacity.current(SessionModel::Haiku).await, 0, "both parent and child release capacity");

        // Idempotent: finalizing again does not double-release.
        manager.finalize(parent_id, SessionStatus::Cancelled).await;
        assert_eq!(capacity.current(SessionModel::Haiku).await, 0);
    }

    #[tokio::test]
    async fn cancel_kills_and_finalizes_as_cancelled() {
        let capacity = CapacityTracker::new(HashMap::from([(SessionModel::Opus, 1)]));
        let harness = Arc::new(FakeHarness::new());
        let manager = AgentSessionManager::new(capacity.clone(), SubagentTracker::new(2), harness.clone(), lazy_pool());

        assert!(capacity.reserve(SessionModel::Opus).await);
        let session_id = Uuid::new_v4();
        manager.subagents.register_root(session_id).await.unwrap();
        {
            let mut guard = manager.sessions.write().await;
            guard.insert(
                session_id,
                LiveSession {
                    task_id: Uuid::new_v4(),
                    project_id: Uuid::new_v4(),
                    pid: 7,
                    model: SessionModel::Opus,
                    status: SessionStatus::Active,
                    started_at: Utc::now(),
                    last_activity: Utc::now(),
                    parent_session_id: None,
                    depth: 0,
                    external_session_id: None,
                    usage: Usage::default(),
                    finalized: false,
                },
            );
        }

        manager.cancel(session_id).await;

        assert_eq!(manager.status(session_id).await, Some(SessionStatus::Cancelled));
        assert_eq!(capacity.current(SessionModel::Opus).await, 0);

        // Idempotent: cancelling again does not panic or double-release.
        manager.cancel(session_id).await;
    }

    #[tokio::test]
    async fn live_session_counts_for_project_only_counts_non_finalized() {
        let capacity = CapacityTracker::new(HashMap::from([(SessionModel::Sonnet, 2)]));
        let manager = AgentSessionManager::new(
            capacity.clone(),
            SubagentTracker::new(2),
            Arc::new(FakeHarness::new()),
            lazy_pool(),
        );

        let project_id = Uuid::new_v4();
        let live_id = Uuid::new_v4();
        let done_id = Uuid::new_v4();
        let mut guard = manager.sessions.write().await;
        guard.insert(
            live_id,
            LiveSession {
                task_id: Uuid::new_v4(),
                project_id,
                pid: 1,
                model: SessionModel::Sonnet,
                status: SessionStatus::Active,
                started_at: Utc::now(),
                last_activity: Utc::now(),
                parent_session_id: None,
                depth: 0,
                external_session_id: None,
                usage: Usage::default(),
                finalized: false,
            },
        );
        guard.insert(
            done_id,
            LiveSession {
                task_id: Uuid::new_v4(),
                project_id,
                pid: 2,
                model: SessionModel::Sonnet,
                status: SessionStatus::Completed,
                started_at: Utc::now(),
                last_activity: Utc::now(),
                parent_session_id: None,
                depth: 0,
                external_session_id: None,
                usage: Usage::default(),
                finalized: true,
            },
        );
        drop(guard);

        let counts = manager.live_session_counts_for_project(project_id).await;
        assert_eq!(counts.get(&SessionModel::Sonnet).copied(), Some(1));
    }
}
