//! The CLI Adapter: spawns the external agent binary, frames its
//! newline-delimited JSON stdout, and classifies failures.
//!
//! ```text
//! Agent Session Manager -> &dyn Harness -> spawn/events/kill/is_running
//!                                        -> owns the child's stdout; nobody
//!                                           else reads it.
//! ```

pub mod claude_code;
pub mod types;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

pub use claude_code::ClaudeCodeAdapter;
pub use types::{AgentEvent, AgentHandle, MaterializedTask, Usage};

/// Errors raised by a [`Harness`] implementation, classified per the fixed
/// ordering: CLI_NOT_FOUND, AUTH_NEEDED, RESUME_FAILED, TIMEOUT, UNKNOWN.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("agent binary not found: {0}")]
    CliNotFound(String),
    #[error("agent requires authentication: {0}")]
    AuthNeeded(String),
    #[error("resume failed: {0}")]
    ResumeFailed(String),
    #[error("agent timed out")]
    Timeout,
    #[error("agent exited with an unclassified error: {0}")]
    Unknown(String),
    #[error("interactive message injection is not supported")]
    NotSupported,
}

/// Classify a non-zero exit (or spawn failure) by stderr content, in the
/// exact order mandated: CLI_NOT_FOUND, AUTH_NEEDED, RESUME_FAILED, UNKNOWN.
/// `TIMEOUT` is produced separately by the caller that owns the timeout
/// clock, not by this function.
pub fn classify_error(stderr: &str, spawn_error: Option<&std::io::Error>) -> AdapterError {
    let lower = stderr.to_lowercase();

    if let Some(e) = spawn_error {
        if e.kind() == std::io::ErrorKind::NotFound {
            return AdapterError::CliNotFound(e.to_string());
        }
    }
    if lower.contains("not found") {
        return AdapterError::CliNotFound(stderr.to_owned());
    }

    let auth_re_hit = lower.contains("authentication") || lower.contains("login");
    if auth_re_hit {
        return AdapterError::AuthNeeded(stderr.to_owned());
    }

    if lower.contains("session") && lower.contains("invalid") {
        return AdapterError::ResumeFailed(stderr.to_owned());
    }

    AdapterError::Unknown(stderr.to_owned())
}

/// A harness owns the subprocess that IS the agent: it spawns it, frames its
/// stdout into [`AgentEvent`]s, and tears it down.
#[async_trait]
pub trait Harness: Send + Sync {
    fn name(&self) -> &str;

    async fn spawn(&self, task: &MaterializedTask) -> Result<AgentHandle, AdapterError>;

    /// Stream of events for a previously spawned handle. May only be called
    /// once per handle -- stdout is consumed, not duplicated.
    fn events(&self, handle: &AgentHandle) -> Pin<Box<dyn Stream<Item = Result<AgentEvent, AdapterError>> + Send>>;

    /// Interactive message injection. The adapter exposes no way to inject
    /// further messages mid-run; always fails with [`AdapterError::NotSupported`].
    async fn send(&self, handle: &AgentHandle, message: &str) -> Result<(), AdapterError> {
        let _ = (handle, message);
        Err(AdapterError::NotSupported)
    }

    async fn kill(&self, handle: &AgentHandle) -> Result<(), AdapterError>;

    async fn is_running(&self, handle: &AgentHandle) -> bool;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Harness) {}
};
