pub mod adapter;
pub mod capacity;
pub mod circuit_breaker;
pub mod completion_recorder;
pub mod db_health;
pub mod dispatch;
pub mod priority_scorer;
pub mod productivity_monitor;
pub mod resource_allocator;
pub mod session_manager;
pub mod spend_monitor;
pub mod subagent_tracker;

pub use completion_recorder::CompletionRecorder;
pub use dispatch::{DispatchConfig, DispatchLoop, TickSummary};
pub use session_manager::AgentSessionManager;
