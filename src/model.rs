//! Model engine seam.
//!
//! The orchestrator never talks to a model provider directly; it goes
//! through [`ModelEngine`], which maps the conversation so far plus the
//! available tool schemas to either a textual answer, a batch of tool
//! calls, or both. Tests script this trait; production wires a real
//! provider behind it.

use async_trait::async_trait;

use crate::state::{ToolCall, Turn};
use crate::tools::ToolSchema;

/// Errors from a model engine.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model provider request failed: {0}")]
    Provider(String),

    #[error("Model produced an unparseable response: {0}")]
    Malformed(String),
}

/// One inference result: free text, proposed tool calls, or both.
#[derive(Debug, Clone, Default)]
pub struct ModelOutput {
    /// Assistant text, if any.
    pub content: Option<String>,
    /// Tool calls the model wants executed, in proposal order.
    pub tool_calls: Vec<ToolCall>,
}

impl ModelOutput {
    /// A plain textual answer.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// A batch of tool calls with no accompanying text.
    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }

    /// Whether this output proposes any tool calls.
    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Reasoning backend the orchestrator drives.
#[async_trait]
pub trait ModelEngine: Send + Sync {
    /// Run one inference over the conversation with the given tools
    /// available.
    async fn infer(
        &self,
        turns: &[Turn],
        tools: &[ToolSchema],
    ) -> Result<ModelOutput, ModelError>;
}
