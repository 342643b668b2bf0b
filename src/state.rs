//! Session state for the orchestrator.
//!
//! `AgentState` is an append-only log of turns plus the bookkeeping the
//! orchestrator needs to resume a thread: the current task, a pending
//! approval (if any), and the error budget consumed so far. Every state
//! transition produces a new value; the orchestrator never mutates a
//! state it was given, so a checkpoint taken after any transition is a
//! complete snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Who produced a turn in the conversation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Input from the user (or a synthetic recovery prompt).
    User,
    /// Model output: content, tool calls, or both.
    Assistant,
    /// A tool result paired with an earlier tool call.
    Tool,
}

/// A single entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Who produced this turn.
    pub role: Role,
    /// Text content. May be empty for assistant turns that only carry
    /// tool calls.
    pub content: String,
    /// Tool calls proposed in this turn (assistant turns only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tool result carried by this turn (tool turns only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
}

impl Turn {
    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_result: None,
        }
    }

    /// Create an assistant turn with optional tool calls.
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_result: None,
        }
    }

    /// Create a tool turn wrapping a result.
    pub fn tool(result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: String::new(),
            tool_calls: Vec::new(),
            tool_result: Some(result),
        }
    }
}

/// A proposed tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique id within the owning state, used to pair results.
    pub id: String,
    /// Name of the tool in the merged registry.
    pub tool_name: String,
    /// Arguments, validated against the tool's schema before dispatch.
    pub arguments: Value,
}

impl ToolCall {
    /// Create a tool call with a fresh id.
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// The outcome of a tool invocation, paired to its call by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the `ToolCall` this result answers.
    pub tool_call_id: String,
    /// Result content (tool output, error text, or a denial notice).
    pub content: String,
    /// Whether the tool reported failure.
    #[serde(default)]
    pub is_error: bool,
    /// Machine-readable error code, when the tool supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ToolResult {
    /// Create a successful result.
    pub fn ok(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
            error_code: None,
        }
    }

    /// Create an error result.
    pub fn error(
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        code: Option<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: true,
            error_code: code,
        }
    }

    /// Create a synthetic denial result for a rejected approval.
    pub fn denied(tool_call_id: impl Into<String>, operation: &str) -> Self {
        Self::error(
            tool_call_id,
            format!("Operation '{operation}' was denied by the operator."),
            Some("APPROVAL_DENIED".to_string()),
        )
    }
}

/// Risk classification attached to an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// How an approval request was (or will be) resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Waiting for the operator.
    Pending,
    Approved,
    Denied,
}

/// A request for human confirmation of a high-risk operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique request id.
    pub id: Uuid,
    /// Id of the tool call awaiting approval.
    pub tool_call_id: String,
    /// Operation name (the tool being gated).
    pub operation: String,
    /// Structured details shown to the operator.
    pub details: Value,
    /// Assessed risk level.
    pub risk_level: RiskLevel,
    /// Human-readable reason the operation is gated.
    pub reason: String,
    /// Current resolution.
    pub resolution: Resolution,
}

/// Record of the most recent failure, kept for the final response and
/// for checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Failure class name (validation, transport, security, ...).
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

/// Errors raised by state transitions that would break log invariants.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Tool call id '{id}' already exists in this state")]
    DuplicateToolCallId { id: String },

    #[error("Tool result references unknown tool call id '{id}'")]
    UnknownToolCallId { id: String },
}

/// Complete state of one agent thread.
///
/// The turn log is append-only: every transition method returns a new
/// state with the delta appended, leaving the input untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Thread identifier, also the checkpoint key.
    pub thread_id: String,
    /// Description of the task currently being worked.
    pub current_task: String,
    /// Append-only conversation log.
    pub turns: Vec<Turn>,
    /// Approval currently awaiting resolution, if any.
    pub pending_approval: Option<ApprovalRequest>,
    /// Errors consumed from the retry budget this turn.
    pub error_count: u32,
    /// The most recent failure, if any.
    pub last_error: Option<ErrorRecord>,
}

impl AgentState {
    /// Create an empty state for a thread.
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            current_task: String::new(),
            turns: Vec::new(),
            pending_approval: None,
            error_count: 0,
            last_error: None,
        }
    }

    /// Append the user's input and make it the current task.
    pub fn with_user_input(&self, input: impl Into<String>) -> Self {
        let input = input.into();
        let mut next = self.clone();
        next.current_task = input.clone();
        next.turns.push(Turn::user(input));
        next
    }

    /// Append an assistant turn. Rejects tool-call ids already present
    /// in the log (ids must be unique per state instance).
    pub fn with_assistant(
        &self,
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Result<Self, StateError> {
        for call in &tool_calls {
            if self.find_tool_call(&call.id).is_some() {
                return Err(StateError::DuplicateToolCallId {
                    id: call.id.clone(),
                });
            }
        }
        let mut next = self.clone();
        next.turns.push(Turn::assistant(content, tool_calls));
        Ok(next)
    }

    /// Append a tool result. The result must reference a tool call
    /// already present in this state.
    pub fn with_tool_result(&self, result: ToolResult) -> Result<Self, StateError> {
        if self.find_tool_call(&result.tool_call_id).is_none() {
            return Err(StateError::UnknownToolCallId {
                id: result.tool_call_id.clone(),
            });
        }
        let mut next = self.clone();
        next.turns.push(Turn::tool(result));
        Ok(next)
    }

    /// Set a pending approval request.
    pub fn with_pending_approval(&self, request: ApprovalRequest) -> Self {
        let mut next = self.clone();
        next.pending_approval = Some(request);
        next
    }

    /// Clear the pending approval.
    pub fn without_pending_approval(&self) -> Self {
        let mut next = self.clone();
        next.pending_approval = None;
        next
    }

    /// Record a failure and consume one unit of the retry budget.
    pub fn with_error(&self, kind: impl Into<String>, message: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.error_count += 1;
        next.last_error = Some(ErrorRecord {
            kind: kind.into(),
            message: message.into(),
        });
        next
    }

    /// Look up a proposed tool call anywhere in the log.
    pub fn find_tool_call(&self, id: &str) -> Option<&ToolCall> {
        self.turns
            .iter()
            .flat_map(|t| t.tool_calls.iter())
            .find(|c| c.id == id)
    }

    /// Tool calls from the latest assistant turn that do not yet have a
    /// paired result.
    pub fn unresolved_tool_calls(&self) -> Vec<&ToolCall> {
        let Some(last_assistant) = self
            .turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
        else {
            return Vec::new();
        };

        last_assistant
            .tool_calls
            .iter()
            .filter(|call| {
                !self.turns.iter().any(|t| {
                    t.tool_result
                        .as_ref()
                        .is_some_and(|r| r.tool_call_id == call.id)
                })
            })
            .collect()
    }

    /// The trailing assistant content, used as the turn's final output.
    pub fn final_response(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant && !t.content.is_empty())
            .map(|t| t.content.as_str())
    }

    /// Count of request/response pairs in the log (results paired to a
    /// known call).
    pub fn completed_pairs(&self) -> usize {
        self.turns
            .iter()
            .filter_map(|t| t.tool_result.as_ref())
            .filter(|r| self.find_tool_call(&r.tool_call_id).is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            tool_name: name.to_string(),
            arguments: serde_json::json!({}),
        }
    }

    #[test]
    fn test_transitions_do_not_mutate_input() {
        let state = AgentState::new("t1").with_user_input("list files");
        let before = state.clone();

        let _ = state
            .with_assistant("", vec![call("c1", "list_directory")])
            .unwrap();

        assert_eq!(state, before);
    }

    #[test]
    fn test_duplicate_tool_call_id_rejected() {
        let state = AgentState::new("t1")
            .with_assistant("", vec![call("c1", "read_file")])
            .unwrap();

        let err = state
            .with_assistant("", vec![call("c1", "read_file")])
            .unwrap_err();
        assert!(matches!(err, StateError::DuplicateToolCallId { .. }));
    }

    #[test]
    fn test_result_must_reference_known_call() {
        let state = AgentState::new("t1");
        let err = state
            .with_tool_result(ToolResult::ok("nope", "output"))
            .unwrap_err();
        assert!(matches!(err, StateError::UnknownToolCallId { .. }));
    }

    #[test]
    fn test_unresolved_calls_tracks_pairing() {
        let state = AgentState::new("t1")
            .with_assistant("", vec![call("c1", "a"), call("c2", "b")])
            .unwrap();
        assert_eq!(state.unresolved_tool_calls().len(), 2);

        let state = state.with_tool_result(ToolResult::ok("c1", "done")).unwrap();
        let unresolved = state.unresolved_tool_calls();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].id, "c2");
    }

    #[test]
    fn test_serde_round_trip_preserves_observable_fields() {
        let state = AgentState::new("t1")
            .with_user_input("check disk usage")
            .with_assistant("checking", vec![call("c1", "disk_usage")])
            .unwrap()
            .with_tool_result(ToolResult::ok("c1", "42% used"))
            .unwrap()
            .with_error("transport", "timed out");

        let json = serde_json::to_string(&state).unwrap();
        let restored: AgentState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, restored);
    }

    #[test]
    fn test_final_response_is_trailing_assistant_content() {
        let state = AgentState::new("t1")
            .with_assistant("", vec![call("c1", "a")])
            .unwrap()
            .with_tool_result(ToolResult::ok("c1", "out"))
            .unwrap()
            .with_assistant("all done", vec![])
            .unwrap();

        assert_eq!(state.final_response(), Some("all done"));
    }
}
