//! The dispatch loop: the single worker that turns queued tasks into running
//! sessions on a fixed cadence, backing off via the health monitor, circuit
//! breaker, and spend monitor rather than spinning.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tc_db::models::{Project, SessionModel, Task, TaskComplexity, TaskStatus};
use tc_db::queries::{calibration, projects, tasks};
use tokio::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapter::MaterializedTask;
use crate::capacity::CapacityTracker;
use crate::circuit_breaker::CircuitBreaker;
use crate::db_health::DbHealthMonitor;
use crate::priority_scorer::{self, ScorableTask, ScoringContext, ScoringWeights};
use crate::resource_allocator::{self, ProjectStats, ResourceAllocation};
use crate::session_manager::{AgentSessionManager, LaunchError, LaunchOptions};
use crate::spend_monitor::SpendMonitor;

/// Tuning knobs for one [`DispatchLoop`]. Everything here is safe to default;
/// operators override via configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub tick_interval: Duration,
    pub max_tasks_per_tick: usize,
    pub low_backlog_threshold: u32,
    /// Below this recommended opus share, a high-complexity task's default
    /// opus pick is throttled down to sonnet instead.
    pub opus_throttle_floor_percent: f64,
    pub weights: ScoringWeights,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            max_tasks_per_tick: 50,
            low_backlog_threshold: 3,
            opus_throttle_floor_percent: 5.0,
            weights: ScoringWeights::default(),
        }
    }
}

/// What happened on one tick, returned for logging/testing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickSummary {
    pub considered: u32,
    pub launched: u32,
    pub skipped_launch: bool,
    pub skip_reason: Option<String>,
    pub cancelled_on_stop: u32,
}

/// Owns the tick cadence and wires the scorer, allocator, and session
/// manager together with the fault-tolerance monitors that gate admission.
#[derive(Clone)]
pub struct DispatchLoop {
    pool: PgPool,
    session_manager: AgentSessionManager,
    capacity: CapacityTracker,
    circuit_breaker: Arc<CircuitBreaker>,
    spend_monitor: Arc<SpendMonitor>,
    db_health: Arc<DbHealthMonitor>,
    config: DispatchConfig,
}

impl DispatchLoop {
    pub fn new(
        pool: PgPool,
        session_manager: AgentSessionManager,
        capacity: CapacityTracker,
        circuit_breaker: Arc<CircuitBreaker>,
        spend_monitor: Arc<SpendMonitor>,
        db_health: Arc<DbHealthMonitor>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            pool,
            session_manager,
            capacity,
            circuit_breaker,
            spend_monitor,
            db_health,
            config,
        }
    }

    /// Run forever on the configured tick interval. Never returns under
    /// normal operation; intended to be spawned as its own task.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        loop {
            interval.tick().await;
            match self.tick().await {
                Ok(summary) => {
                    if summary.launched > 0 || summary.skipped_launch {
                        info!(
                            considered = summary.considered,
                            launched = summary.launched,
                            skipped_launch = summary.skipped_launch,
                            skip_reason = summary.skip_reason.as_deref().unwrap_or(""),
                            cancelled_on_stop = summary.cancelled_on_stop,
                            "dispatch tick"
                        );
                    }
                }
                Err(e) => {
                    self.db_health.on_db_failure(e.to_string()).await;
                    warn!(error = %e, "dispatch tick failed");
                }
            }
        }
    }

    /// Run the five-step admission sequence once.
    pub async fn tick(&self) -> anyhow::Result<TickSummary> {
        let mut summary = TickSummary::default();

        let (threshold, _alert) = self.spend_monitor.check_thresholds().await;
        if threshold.stop {
            summary.cancelled_on_stop = self.cancel_all_running().await;
            summary.skipped_launch = true;
            summary.skip_reason = Some("spend monitor: hard stop".to_owned());
            return Ok(summary);
        }

        let degraded = self.db_health.is_degraded().await;
        let breaker_open = !self.circuit_breaker.allows_operation().await;
        if degraded || breaker_open || threshold.pause {
            summary.skipped_launch = true;
            summary.skip_reason = Some(
                if degraded {
                    "database degraded"
                } else if breaker_open {
                    "circuit breaker open"
                } else {
                    "spend monitor paused"
                }
                .to_owned(),
            );
            return Ok(summary);
        }

        let ready: Vec<Task> = tasks::get_ready_tasks(&self.pool)
            .await?
            .into_iter()
            .take(self.config.max_tasks_per_tick)
            .collect();
        summary.considered = ready.len() as u32;
        if ready.is_empty() {
            return Ok(summary);
        }

        let active_projects = projects::list_active_projects(&self.pool).await?;
        let blockers = tasks::count_blocking_dependents(&self.pool).await?;

        let mut backlog: HashMap<Uuid, u32> = HashMap::new();
        for t in &ready {
            *backlog.entry(t.project_id).or_insert(0) += 1;
        }

        let mut stats = Vec::with_capacity(active_projects.len());
        for p in &active_projects {
            let counts = self.session_manager.live_session_counts_for_project(p.id).await;
            let progress = tasks::get_project_progress(&self.pool, p.id).await.unwrap_or_default();
            stats.push(ProjectStats {
                project_id: p.id,
                project_name: p.name.clone(),
                priority: p.priority,
                queued_count: backlog.get(&p.id).copied().unwrap_or(0),
                blocked_count: progress.blocked as u32,
                current_opus_sessions: counts.get(&SessionModel::Opus).copied().unwrap_or(0),
                current_sonnet_sessions: counts.get(&SessionModel::Sonnet).copied().unwrap_or(0),
            });
        }

        let allocations = resource_allocator::allocate(&stats);
        let allocation_by_project: HashMap<Uuid, &ResourceAllocation> =
            allocations.iter().map(|a| (a.project_id, a)).collect();

        // A project is underutilized when it has backlog but nothing running
        // against it right now -- its recommended share isn't being drawn down.
        let underutilized: HashSet<Uuid> = stats
            .iter()
            .filter(|s| s.queued_count > 0 && s.current_opus_sessions + s.current_sonnet_sessions == 0)
            .map(|s| s.project_id)
            .collect();

        let opus_utilization = self
            .capacity
            .snapshot()
            .await
            .for_model(SessionModel::Opus)
            .map(|m| m.utilization())
            .unwrap_or(0.0);

        let mut scorable = Vec::with_capacity(ready.len());
        let mut calibration_lookup_failed = false;
        for t in &ready {
            let historical_ratios = match calibration::get_calibration_factor(&self.pool, t.project_id, t.complexity).await {
                Ok(Some(factor)) if factor.sample_size > 0 => {
                    vec![factor.sessions_multiplier; factor.sample_size as usize]
                }
                Ok(_) => Vec::new(),
                Err(e) => {
                    calibration_lookup_failed = true;
                    self.db_health.on_db_failure(e.to_string()).await;
                    Vec::new()
                }
            };
            scorable.push(ScorableTask {
                id: t.id,
                project_id: t.project_id,
                priority: t.priority,
                complexity: t.complexity,
                created_at: t.created_at,
                blocked_by_count: blockers.get(&t.id).copied().unwrap_or(0) as u32,
                historical_ratios,
            });
        }
        if !calibration_lookup_failed {
            self.db_health.on_db_success().await;
        }

        let ctx = ScoringContext {
            now: Utc::now(),
            low_backlog_threshold: self.config.low_backlog_threshold,
            project_backlog_sizes: backlog,
            underutilized_projects: underutilized,
            opus_utilization,
        };
        let scored = priority_scorer::score_tasks(&scorable, &ctx, self.config.weights);

        let tasks_by_id: HashMap<Uuid, &Task> = ready.iter().map(|t| (t.id, t)).collect();
        let projects_by_id: HashMap<Uuid, &Project> = active_projects.iter().map(|p| (p.id, p)).collect();

        for score in &scored {
            let Some(task) = tasks_by_id.get(&score.task_id) else { continue };
            let Some(project) = projects_by_id.get(&task.project_id) else { continue };
            let allocation = allocation_by_project.get(&task.project_id).copied();
            let model = choose_model(task.complexity, allocation, self.config.opus_throttle_floor_percent);

            let rows_affected = match tasks::transition_task_status(
                &self.pool,
                task.id,
                TaskStatus::Queued,
                TaskStatus::InProgress,
            )
            .await
            {
                Ok(n) => n,
                Err(e) => {
                    self.db_health.on_db_failure(e.to_string()).await;
                    continue;
                }
            };
            if rows_affected == 0 {
                // Raced with another dispatcher, or no longer queued; skip quietly.
                continue;
            }

            let materialized = MaterializedTask {
                task_id: task.id,
                project_id: task.project_id,
                title: task.title.clone(),
                prompt: task.description.clone(),
                working_dir: PathBuf::from(&project.root_path),
                env_vars: HashMap::new(),
                model_alias: model_alias(model),
                resume_session_id: None,
                allowed_tools: None,
                append_system_prompt: None,
                bypass_permissions: false,
            };

            match self.session_manager.launch(&materialized, model, LaunchOptions::default()).await {
                Ok(session_id) => {
                    summary.launched += 1;
                    info!(task_id = %task.id, %session_id, %model, "launched session");
                }
                Err(LaunchError::CapacityExhausted(_)) => {
                    // Backpressure, not a fault -- the breaker only cares about
                    // the adapter/agent actually failing to do its job.
                    let _ = tasks::transition_task_status(&self.pool, task.id, TaskStatus::InProgress, TaskStatus::Queued).await;
                }
                Err(e @ LaunchError::Adapter(_)) => {
                    warn!(task_id = %task.id, error = %e, "failed to launch session");
                    self.circuit_breaker.record_failure().await;
                    let _ = tasks::transition_task_status(&self.pool, task.id, TaskStatus::InProgress, TaskStatus::Queued).await;
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "failed to launch session");
                    let _ = tasks::transition_task_status(&self.pool, task.id, TaskStatus::InProgress, TaskStatus::Queued).await;
                }
            }
        }

        Ok(summary)
    }

    /// Cancel every session not yet finalized. Used once spend crosses the
    /// hard limit; the loop stays in this state until the operator resumes.
    async fn cancel_all_running(&self) -> u32 {
        let ids = self.session_manager.live_session_ids().await;
        for id in &ids {
            self.session_manager.cancel(*id).await;
        }
        ids.len() as u32
    }
}

/// Default model for a complexity, throttled off opus to sonnet when the
/// project's recommended opus share is near zero.
fn choose_model(complexity: TaskComplexity, allocation: Option<&ResourceAllocation>, opus_floor_percent: f64) -> SessionModel {
    let default_model = match complexity {
        TaskComplexity::High => SessionModel::Opus,
        TaskComplexity::Medium => SessionModel::Sonnet,
        TaskComplexity::Low => SessionModel::Haiku,
    };
    if default_model == SessionModel::Opus {
        if let Some(allocation) = allocation {
            if allocation.recommended_opus_percent < opus_floor_percent {
                return SessionModel::Sonnet;
            }
        }
    }
    default_model
}

/// `--model` flag value for the CLI adapter. `None` for sonnet, the
/// adapter's own default, matches the flag-omission rule in §4.6.
fn model_alias(model: SessionModel) -> Option<String> {
    match model {
        SessionModel::Opus => Some("opus".to_owned()),
        SessionModel::Sonnet => None,
        SessionModel::Haiku => Some("haiku".to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocation(project_id: Uuid, opus_percent: f64) -> ResourceAllocation {
        ResourceAllocation {
            project_id,
            recommended_opus_percent: opus_percent,
            recommended_sonnet_percent: 100.0 - opus_percent,
            reasoning: "test".to_owned(),
        }
    }

    #[test]
    fn high_complexity_defaults_to_opus() {
        let project_id = Uuid::new_v4();
        let alloc = allocation(project_id, 50.0);
        assert_eq!(choose_model(TaskComplexity::High, Some(&alloc), 5.0), SessionModel::Opus);
    }

    #[test]
    fn high_complexity_throttled_to_sonnet_when_opus_share_near_zero() {
        let project_id = Uuid::new_v4();
        let alloc = allocation(project_id, 1.0);
        assert_eq!(choose_model(TaskComplexity::High, Some(&alloc), 5.0), SessionModel::Sonnet);
    }

    #[test]
    fn high_complexity_with_no_allocation_keeps_opus_default() {
        assert_eq!(choose_model(TaskComplexity::High, None, 5.0), SessionModel::Opus);
    }

    #[test]
    fn medium_and_low_complexity_never_pick_opus() {
        let project_id = Uuid::new_v4();
        let alloc = allocation(project_id, 80.0);
        assert_eq!(choose_model(TaskComplexity::Medium, Some(&alloc), 5.0), SessionModel::Sonnet);
        assert_eq!(choose_model(TaskComplexity::Low, Some(&alloc), 5.0), SessionModel::Haiku);
    }

    #[test]
    fn model_alias_omits_sonnet_and_names_others() {
        assert_eq!(model_alias(SessionModel::Sonnet), None);
        assert_eq!(model_alias(SessionModel::Opus), Some("opus".to_owned()));
        assert_eq!(model_alias(SessionModel::Haiku), Some("haiku".to_owned()));
    }
}
