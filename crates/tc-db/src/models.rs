use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Paused,
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Paused => "paused",
        };
        f.write_str(s)
    }
}

impl FromStr for ProjectStatus {
    type Err = ProjectStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            other => Err(ProjectStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ProjectStatus`] string.
#[derive(Debug, Clone)]
pub struct ProjectStatusParseError(pub String);

impl fmt::Display for ProjectStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid project status: {:?}", self.0)
    }
}

impl std::error::Error for ProjectStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Blocked,
    Complete,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Complete => "complete",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "in_progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "complete" => Ok(Self::Complete),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Estimated complexity of a task, used by the priority scorer's impact
/// factor and by calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskComplexity {
    Low,
    Medium,
    High,
}

impl fmt::Display for TaskComplexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskComplexity {
    type Err = TaskComplexityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(TaskComplexityParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskComplexity`] string.
#[derive(Debug, Clone)]
pub struct TaskComplexityParseError(pub String);

impl fmt::Display for TaskComplexityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task complexity: {:?}", self.0)
    }
}

impl std::error::Error for TaskComplexityParseError {}

// ---------------------------------------------------------------------------

/// Agent model used for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionModel {
    Opus,
    Sonnet,
    Haiku,
}

impl SessionModel {
    /// All known models, in the fixed order used for capacity snapshots.
    pub const ALL: [SessionModel; 3] = [Self::Opus, Self::Sonnet, Self::Haiku];
}

impl fmt::Display for SessionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Opus => "opus",
            Self::Sonnet => "sonnet",
            Self::Haiku => "haiku",
        };
        f.write_str(s)
    }
}

impl FromStr for SessionModel {
    type Err = SessionModelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opus" => Ok(Self::Opus),
            "sonnet" => Ok(Self::Sonnet),
            "haiku" => Ok(Self::Haiku),
            other => Err(SessionModelParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`SessionModel`] string.
#[derive(Debug, Clone)]
pub struct SessionModelParseError(pub String);

impl fmt::Display for SessionModelParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid session model: {:?}", self.0)
    }
}

impl std::error::Error for SessionModelParseError {}

// ---------------------------------------------------------------------------

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for SessionStatus {
    type Err = SessionStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(SessionStatusParseError(other.to_owned())),
        }
    }
}

impl SessionStatus {
    /// Whether this status represents a session that is still counted
    /// against model capacity.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Active)
    }

    /// Whether this status represents a session that has finished, one way
    /// or another.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Error returned when parsing an invalid [`SessionStatus`] string.
#[derive(Debug, Clone)]
pub struct SessionStatusParseError(pub String);

impl fmt::Display for SessionStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid session status: {:?}", self.0)
    }
}

impl std::error::Error for SessionStatusParseError {}

// ---------------------------------------------------------------------------

/// Confidence of a calibration factor, derived from its sample size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CalibrationConfidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for CalibrationConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

impl FromStr for CalibrationConfidence {
    type Err = CalibrationConfidenceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(CalibrationConfidenceParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`CalibrationConfidence`] string.
#[derive(Debug, Clone)]
pub struct CalibrationConfidenceParseError(pub String);

impl fmt::Display for CalibrationConfidenceParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid calibration confidence: {:?}", self.0)
    }
}

impl std::error::Error for CalibrationConfidenceParseError {}

impl CalibrationConfidence {
    /// Derive a confidence level from a sample size, per the thresholds in
    /// the calibration design (low &lt; 5, medium 5..20, high &gt;= 20).
    pub fn from_sample_size(sample_size: i32) -> Self {
        if sample_size < 5 {
            Self::Low
        } else if sample_size < 20 {
            Self::Medium
        } else {
            Self::High
        }
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A project -- the top-level grouping of tasks that share a backlog and a
/// pause/resume switch.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub status: ProjectStatus,
    pub priority: i32,
    pub root_path: String,
    pub created_at: DateTime<Utc>,
}

/// A task -- a unit of work belonging to a project.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: i32,
    pub complexity: TaskComplexity,
    pub estimated_sessions: serde_json::Value,
    pub actual_sessions: serde_json::Value,
    pub blocked_by: Option<Uuid>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A durable record of a finalized session, written once at finalization --
/// the live, in-progress session object is owned in memory by the session
/// manager and has no row here until it terminates.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionRecord {
    pub id: Uuid,
    pub task_id: Uuid,
    pub model: SessionModel,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub tokens_cache_read: i64,
    pub tokens_cache_creation: i64,
    pub cost_usd: f64,
    pub parent_session_id: Option<Uuid>,
    pub depth: i32,
}

/// A single recorded spend event, consumed by the rolling spend monitor.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SpendEvent {
    pub id: i64,
    pub task_id: Uuid,
    pub model: SessionModel,
    pub amount_usd: f64,
    pub recorded_at: DateTime<Utc>,
}

/// A completion record, consumed by the productivity monitor and by
/// calibration.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CompletionRecord {
    pub id: i64,
    pub session_id: Uuid,
    pub task_id: Uuid,
    pub model: SessionModel,
    pub success: bool,
    pub duration_ms: i64,
    pub tokens_used: i64,
    pub cost_usd: f64,
    pub error_reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// A calibration factor -- a multiplier applied to an estimate to correct
/// historical bias for a given (project, complexity) pair. `project_id` is
/// `None` for the global fallback factor.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CalibrationFactor {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub complexity: TaskComplexity,
    pub sessions_multiplier: f64,
    pub sample_size: i32,
    pub confidence: CalibrationConfidence,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
