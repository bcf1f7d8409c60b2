//! Wire-level and handle types shared between the adapter trait and its
//! implementations.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;
use tokio::process::ChildStdin;
use uuid::Uuid;

/// A task materialized with everything the adapter needs to launch it:
/// resolved prompt text, working directory, and environment.
#[derive(Debug, Clone)]
pub struct MaterializedTask {
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub prompt: String,
    pub working_dir: PathBuf,
    pub env_vars: HashMap<String, String>,
    pub model_alias: Option<String>,
    pub resume_session_id: Option<String>,
    pub allowed_tools: Option<Vec<String>>,
    pub append_system_prompt: Option<String>,
    pub bypass_permissions: bool,
}

/// A handle to a spawned agent process.
pub struct AgentHandle {
    pub pid: u32,
    pub stdin: Option<ChildStdin>,
    pub task_id: Uuid,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("pid", &self.pid)
            .field("task_id", &self.task_id)
            .field("stdin", &self.stdin.is_some())
            .finish()
    }
}

/// Normalized token/cost usage, coalesced from whatever subset of fields the
/// agent actually reported.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
}

/// A single event surfaced from the agent's stdout stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    ToolCall {
        tool_use_id: String,
        tool_name: String,
        input: Value,
        is_progress: bool,
    },
    Question {
        tool_use_id: String,
        question: Value,
    },
    Completion {
        success: bool,
        session_id: Option<String>,
        result: String,
        usage: Usage,
        num_turns: Option<u64>,
        duration_ms: Option<u64>,
    },
    Error {
        errors: Vec<String>,
        usage: Usage,
    },
}
