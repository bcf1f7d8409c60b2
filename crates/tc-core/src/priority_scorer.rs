//! Scores queued tasks from four weighted, independently explainable
//! sub-scores, then applies a small set of situational adjustments.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tc_db::models::{CalibrationConfidence, TaskComplexity};
use uuid::Uuid;

/// Weights applied to the four sub-scores before summing. Must not
/// necessarily sum to 1.0, but the defaults do.
#[derive(Debug, Clone, Copy)]
pub struct ScoringWeights {
    pub impact: f64,
    pub urgency: f64,
    pub efficiency: f64,
    pub dependency: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            impact: 0.40,
            urgency: 0.25,
            efficiency: 0.20,
            dependency: 0.15,
        }
    }
}

/// Per-project and fleet-wide context the scorer needs but that isn't part
/// of a single task's own row.
#[derive(Debug, Clone)]
pub struct ScoringContext {
    pub now: DateTime<Utc>,
    pub low_backlog_threshold: u32,
    pub project_backlog_sizes: HashMap<Uuid, u32>,
    pub underutilized_projects: HashSet<Uuid>,
    pub opus_utilization: f64,
}

/// A task as seen by the scorer: the subset of [`tc_db::models::Task`]
/// fields the formula needs, plus derived inputs the caller assembles
/// (blocker count, historical accuracy ratios).
#[derive(Debug, Clone)]
pub struct ScorableTask {
    pub id: Uuid,
    pub project_id: Uuid,
    pub priority: i32,
    pub complexity: TaskComplexity,
    pub created_at: DateTime<Utc>,
    /// Count of other queued/blocked tasks naming this task as their blocker.
    pub blocked_by_count: u32,
    /// Historical actual/estimated session ratios for this task's (project,
    /// complexity) pair, most often sourced from a calibration lookup.
    pub historical_ratios: Vec<f64>,
}

/// One factor's contribution to a [`PriorityScore`], kept for audit/explain.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorBreakdown {
    pub name: &'static str,
    pub weight: f64,
    pub raw: f64,
    pub normalized: f64,
    pub explanation: String,
}

/// The scored result for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityScore {
    pub task_id: Uuid,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub total_score: f64,
    pub factors: Vec<FactorBreakdown>,
    pub calculated_at: DateTime<Utc>,
}

fn impact_score(complexity: TaskComplexity) -> (f64, String) {
    let score = match complexity {
        TaskComplexity::High => 100.0,
        TaskComplexity::Medium => 60.0,
        TaskComplexity::Low => 30.0,
    };
    (score, format!("{complexity} complexity"))
}

fn urgency_score(age_days: f64, priority: i32) -> (f64, String) {
    let raw = age_days * 3.0 + priority as f64 * 7.0;
    let score = raw.min(100.0);
    (score, format!("{age_days:.1} days old, priority {priority}"))
}

/// Reduce a set of actual/estimated ratios to the median (outlier-resistant)
/// and a confidence level from the sample size.
pub fn calibrate(ratios: &[f64]) -> (f64, CalibrationConfidence) {
    if ratios.is_empty() {
        return (1.0, CalibrationConfidence::Low);
    }
    let mut sorted = ratios.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };
    (median, CalibrationConfidence::from_sample_size(sorted.len() as i32))
}

fn efficiency_score(ratios: &[f64]) -> (f64, String) {
    if ratios.is_empty() {
        return (50.0, "no historical data, default midpoint".to_owned());
    }
    let (median, confidence) = calibrate(ratios);
    let deviation = (median - 1.0).abs();
    let score = (100.0 - deviation * 100.0).clamp(0.0, 100.0);
    (score, format!("median estimate accuracy {median:.2} ({confidence} confidence, n={})", ratios.len()))
}

fn dependency_score(blocked_by_count: u32) -> (f64, String) {
    let score = (blocked_by_count as f64 * 25.0).min(100.0);
    (score, format!("{blocked_by_count} tasks blocked on this one"))
}

/// Score one task against the given context and weights.
pub fn score_task(task: &ScorableTask, ctx: &ScoringContext, weights: ScoringWeights) -> PriorityScore {
    let age_days = (ctx.now - task.created_at).num_seconds() as f64 / 86_400.0;

    let (impact_raw, impact_explain) = impact_score(task.complexity);
    let (urgency_raw, urgency_explain) = urgency_score(age_days.max(0.0), task.priority);
    let (efficiency_raw, efficiency_explain) = efficiency_score(&task.historical_ratios);
    let (dependency_raw, dependency_explain) = dependency_score(task.blocked_by_count);

    let factors = vec![
        FactorBreakdown {
            name: "impact",
            weight: weights.impact,
            raw: impact_raw,
            normalized: impact_raw * weights.impact,
            explanation: impact_explain,
        },
        FactorBreakdown {
            name: "urgency",
            weight: weights.urgency,
            raw: urgency_raw,
            normalized: urgency_raw * weights.urgency,
            explanation: urgency_explain,
        },
        FactorBreakdown {
            name: "efficiency",
            weight: weights.efficiency,
            raw: efficiency_raw,
            normalized: efficiency_raw * weights.efficiency,
            explanation: efficiency_explain,
        },
        FactorBreakdown {
            name: "dependency",
            weight: weights.dependency,
            raw: dependency_raw,
            normalized: dependency_raw * weights.dependency,
            explanation: dependency_explain,
        },
    ];

    let mut total = factors.iter().map(|f| f.normalized).sum::<f64>();

    let backlog = ctx.project_backlog_sizes.get(&task.project_id).copied().unwrap_or(0);
    if backlog < ctx.low_backlog_threshold {
        total += 20.0;
    }
    if ctx.underutilized_projects.contains(&task.project_id) {
        total += 10.0;
    }
    if task.complexity == TaskComplexity::High && ctx.opus_utilization >= 1.0 {
        total -= 10.0;
    }

    PriorityScore {
        task_id: task.id,
        priority: task.priority,
        created_at: task.created_at,
        total_score: total.clamp(0.0, 100.0),
        factors,
        calculated_at: ctx.now,
    }
}

/// Score every task and sort descending by total score, breaking ties by
/// higher integer priority, then older creation timestamp, then task id.
pub fn score_tasks(tasks: &[ScorableTask], ctx: &ScoringContext, weights: ScoringWeights) -> Vec<PriorityScore> {
    let mut scores: Vec<PriorityScore> = tasks.iter().map(|t| score_task(t, ctx, weights)).collect();
    scores.sort_by(|a, b| {
        b.total_score
            .partial_cmp(&a.total_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.task_id.cmp(&b.task_id))
    });
    scores
}

/// The top `n` scored tasks. `n` may exceed `tasks.len()`, in which case the
/// full scored list is returned.
pub fn top_priority_tasks(tasks: &[ScorableTask], ctx: &ScoringContext, weights: ScoringWeights, n: usize) -> Vec<PriorityScore> {
    let mut scored = score_tasks(tasks, ctx, weights);
    scored.truncate(n);
    scored
}
