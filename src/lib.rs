//! Steward: an autonomous operations agent runtime.
//!
//! The runtime drives a reason/approve/act loop over a set of external
//! tool servers:
//! - Tool discovery and invocation over stdio or HTTP transports
//! - Syntactic security screening before any dispatch
//! - Human approval for high-risk operations
//! - Retry with backoff and bounded error budgets
//! - Durable per-thread checkpoints for crash recovery
//!
//! Wiring happens at the edges: callers supply a [`model::ModelEngine`]
//! for reasoning and an [`approval::ApprovalChannel`] for confirmations,
//! then drive turns through [`orchestrator::Orchestrator`].

pub mod approval;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod security;
pub mod state;
pub mod telemetry;
pub mod tools;

pub use approval::{ApprovalChannel, ApprovalGate};
pub use config::RuntimeConfig;
pub use error::AgentError;
pub use model::{ModelEngine, ModelOutput};
pub use orchestrator::checkpoint::{CheckpointStore, FileCheckpointStore};
pub use orchestrator::Orchestrator;
pub use security::SecurityValidator;
pub use state::{AgentState, ToolCall, ToolResult, Turn};
pub use tools::ToolClient;
