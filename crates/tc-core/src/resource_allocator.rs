//! Pure computation: given per-project statistics, recommends how the opus
//! and sonnet share of capacity should be split across projects. Never
//! launches anything -- the dispatch loop and the recommendation
//! collaborator are the only consumers.

use uuid::Uuid;

/// Per-project statistics the allocator reasons over.
#[derive(Debug, Clone)]
pub struct ProjectStats {
    pub project_id: Uuid,
    pub project_name: String,
    pub priority: i32,
    pub queued_count: u32,
    pub blocked_count: u32,
    pub current_opus_sessions: u32,
    pub current_sonnet_sessions: u32,
}

impl ProjectStats {
    fn weight(&self) -> f64 {
        // Priority and backlog both push share upward; blocked tasks don't
        // consume capacity right now, so they count for less than queued.
        let backlog_weight = self.queued_count as f64 + self.blocked_count as f64 * 0.25;
        (self.priority as f64) * (1.0 + backlog_weight)
    }
}

/// One project's recommended share of opus/sonnet capacity.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ResourceAllocation {
    pub project_id: Uuid,
    pub recommended_opus_percent: f64,
    pub recommended_sonnet_percent: f64,
    pub reasoning: String,
}

/// Compute a recommended opus/sonnet percentage split across all given
/// projects, proportional to each project's weight (priority scaled by
/// backlog pressure). Percentages sum to 100 across the returned list
/// (barring floating point rounding), for each model independently.
pub fn allocate(projects: &[ProjectStats]) -> Vec<ResourceAllocation> {
    if projects.is_empty() {
        return Vec::new();
    }

    let total_weight: f64 = projects.iter().map(|p| p.weight()).sum();
    if total_weight <= 0.0 {
        let even_share = 100.0 / projects.len() as f64;
        return projects
            .iter()
            .map(|p| ResourceAllocation {
                project_id: p.project_id,
                recommended_opus_percent: even_share,
                recommended_sonnet_percent: even_share,
                reasoning: format!("no queued or blocked work recorded for {}; even split applied", p.project_name),
            })
            .collect();
    }

    projects
        .iter()
        .map(|p| {
            let share = p.weight() / total_weight * 100.0;
            ResourceAllocation {
                project_id: p.project_id,
                recommended_opus_percent: share,
                recommended_sonnet_percent: share,
                reasoning: format!(
                    "{}: priority {}, {} queued, {} blocked, {} opus / {} sonnet sessions active -> {:.1}% share",
                    p.project_name, p.priority, p.queued_count, p.blocked_count, p.current_opus_sessions, p.current_sonnet_sessions, share
                ),
            }
        })
        .collect()
}
