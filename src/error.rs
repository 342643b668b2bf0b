//! Top-level error type for the runtime's public surface.

use crate::approval::ApprovalError;
use crate::config::ConfigError;
use crate::model::ModelError;
use crate::orchestrator::checkpoint::CheckpointError;
use crate::state::StateError;
use crate::tools::DiscoveryError;

/// Any failure the runtime surfaces to its caller.
///
/// Tool-level failures (validation, transport, security) are normally
/// absorbed by recovery and folded into the conversation; what escapes
/// here is the unrecoverable remainder.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Invalid configured deny pattern: {0}")]
    DenyPattern(#[from] regex::Error),
}
