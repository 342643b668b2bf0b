//! The agent control loop.
//!
//! A turn moves through four nodes. REASON runs the model over the
//! conversation. If the model proposes tool calls, APPROVE resolves
//! human confirmation for any gated call, then ACT dispatches the
//! remainder and pairs every call with a result. RESPOND ends the turn
//! with the trailing assistant content. Every transition is
//! checkpointed, so a crashed thread resumes exactly where it stopped,
//! including mid-approval.
//!
//! Two invariants hold throughout: state is never mutated in place
//! (each transition yields a new snapshot), and every proposed tool
//! call receives exactly one result, whether success, error, or denial.

pub mod checkpoint;
pub mod recovery;

use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::approval::{ApprovalChannel, ApprovalError, ApprovalGate};
use crate::config::{LimitsConfig, RuntimeConfig};
use crate::error::AgentError;
use crate::model::ModelEngine;
use crate::security::SecurityValidator;
use crate::state::{AgentState, Resolution, ToolCall, ToolResult};
use crate::tools::{InvokeError, ToolClient};

use self::checkpoint::CheckpointStore;
use self::recovery::{ErrorRecovery, FailureClass, RecoveryAction};

/// The four nodes of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Reason,
    Act,
    Approve,
    Respond,
}

impl Node {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Reason => "reason",
            Self::Act => "act",
            Self::Approve => "approve",
            Self::Respond => "respond",
        }
    }
}

/// Drives one thread through reason/approve/act cycles until a final
/// response.
pub struct Orchestrator {
    model: Arc<dyn ModelEngine>,
    tools: Arc<ToolClient>,
    security: SecurityValidator,
    approvals: ApprovalGate,
    recovery: ErrorRecovery,
    checkpoints: Arc<dyn CheckpointStore>,
    limits: LimitsConfig,
}

impl Orchestrator {
    /// Wire up an orchestrator from its collaborators and configuration.
    pub fn new(
        model: Arc<dyn ModelEngine>,
        tools: Arc<ToolClient>,
        approval_channel: Arc<dyn ApprovalChannel>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: &RuntimeConfig,
    ) -> Result<Self, AgentError> {
        let security = SecurityValidator::with_extra_patterns(&config.security.extra_deny_patterns)?;
        Ok(Self {
            model,
            tools,
            security,
            approvals: ApprovalGate::new(approval_channel, config.approval.clone()),
            recovery: ErrorRecovery::new(&config.recovery),
            checkpoints,
            limits: config.limits.clone(),
        })
    }

    /// Run one full turn: append the user's input and drive the loop to
    /// a final response. Returns the resulting state snapshot.
    pub async fn run_turn(
        &self,
        state: AgentState,
        input: &str,
    ) -> Result<AgentState, AgentError> {
        self.approvals.begin_turn().await;
        let state = state.with_user_input(input);
        self.save(&state).await?;
        self.drive(state).await
    }

    /// Resume a thread from its latest checkpoint and drive it to a
    /// final response. A missing or corrupt checkpoint is an explicit
    /// error, never a silent fresh start.
    pub async fn resume(&self, thread_id: &str) -> Result<AgentState, AgentError> {
        let checkpoint = self.checkpoints.load(thread_id).await?;
        tracing::info!(
            thread_id,
            sequence = checkpoint.sequence,
            turns = checkpoint.state.turns.len(),
            "Resuming thread from checkpoint"
        );
        self.approvals.begin_turn().await;
        self.drive(checkpoint.state).await
    }

    async fn drive(&self, mut state: AgentState) -> Result<AgentState, AgentError> {
        // A resumed state may carry unfinished tool calls or a pending
        // approval; those are settled before the model runs again.
        let mut node = if state.pending_approval.is_some()
            || !state.unresolved_tool_calls().is_empty()
        {
            Node::Approve
        } else {
            Node::Reason
        };
        let mut iterations = 0u32;

        loop {
            tracing::debug!(
                thread_id = %state.thread_id,
                node = node.as_str(),
                "Entering node"
            );
            match node {
                Node::Reason => {
                    iterations += 1;
                    if iterations > self.limits.max_iterations {
                        tracing::warn!(
                            thread_id = %state.thread_id,
                            limit = self.limits.max_iterations,
                            "Iteration limit reached, forcing a response"
                        );
                        state = state.with_assistant(
                            "Stopping here: this task exceeded the iteration limit \
                             before reaching a conclusion.",
                            Vec::new(),
                        )?;
                        self.save(&state).await?;
                        node = Node::Respond;
                        continue;
                    }

                    let schemas = self.tools.registry().await.schemas();
                    match self.model.infer(&state.turns, &schemas).await {
                        Ok(output) => {
                            let wants_tools = output.wants_tools();
                            state = state.with_assistant(
                                output.content.unwrap_or_default(),
                                output.tool_calls,
                            )?;
                            self.save(&state).await?;
                            node = if wants_tools { Node::Approve } else { Node::Respond };
                        }
                        Err(e) => {
                            state = state.with_error(
                                FailureClass::Unclassified.as_str(),
                                e.to_string(),
                            );
                            self.save(&state).await?;
                            match self
                                .recovery
                                .decide(FailureClass::Unclassified, state.error_count)
                            {
                                RecoveryAction::RetryAfter(delay) => {
                                    tracing::warn!(error = %e, "Model inference failed, retrying");
                                    tokio::time::sleep(delay).await;
                                }
                                _ => {
                                    state = state
                                        .with_assistant(failure_text(&state), Vec::new())?;
                                    self.save(&state).await?;
                                    node = Node::Respond;
                                }
                            }
                        }
                    }
                }
                Node::Approve => {
                    state = self.approve_calls(state).await?;
                    node = if state.unresolved_tool_calls().is_empty() {
                        // Everything was denied; the model sees the
                        // denials and decides what to do next.
                        Node::Reason
                    } else {
                        Node::Act
                    };
                }
                Node::Act => {
                    let (next, surface) = self.execute_calls(state).await?;
                    state = next;
                    node = if surface {
                        state = state.with_assistant(failure_text(&state), Vec::new())?;
                        self.save(&state).await?;
                        Node::Respond
                    } else {
                        Node::Reason
                    };
                }
                Node::Respond => {
                    tracing::info!(
                        thread_id = %state.thread_id,
                        turns = state.turns.len(),
                        error_count = state.error_count,
                        "Turn complete"
                    );
                    return Ok(state);
                }
            }
        }
    }

    /// Resolve human confirmation for every gated call in the current
    /// batch. Denied calls are paired with a denial result immediately;
    /// approved calls stay unresolved for ACT to dispatch.
    async fn approve_calls(&self, mut state: AgentState) -> Result<AgentState, AgentError> {
        let calls: Vec<ToolCall> = state
            .unresolved_tool_calls()
            .into_iter()
            .cloned()
            .collect();

        for call in calls {
            if !self
                .approvals
                .requires_approval(&call.tool_name, &call.arguments)
            {
                continue;
            }

            // On resume, re-present the request that was pending at the
            // crash instead of minting a new one.
            let request = match &state.pending_approval {
                Some(pending) if pending.tool_call_id == call.id => pending.clone(),
                _ => self
                    .approvals
                    .build_request(&call.id, &call.tool_name, call.arguments.clone()),
            };
            state = state.with_pending_approval(request.clone());
            self.save(&state).await?;

            match self.approvals.request(&request).await {
                Ok(Resolution::Approved) => {
                    state = state.without_pending_approval();
                    self.save(&state).await?;
                }
                Ok(_) => {
                    tracing::info!(
                        operation = %request.operation,
                        call_id = %call.id,
                        "Operation denied by operator"
                    );
                    state = state
                        .without_pending_approval()
                        .with_tool_result(ToolResult::denied(&call.id, &call.tool_name))?;
                    self.save(&state).await?;
                }
                // A repeat of an operation denied earlier this turn is
                // denied again without bothering the operator.
                Err(ApprovalError::AlreadyDenied { .. }) => {
                    state = state
                        .without_pending_approval()
                        .with_tool_result(ToolResult::denied(&call.id, &call.tool_name))?;
                    self.save(&state).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(state)
    }

    /// Dispatch the current batch of unresolved calls and pair each
    /// with a result. Returns the new state and whether an
    /// unrecoverable failure must end the turn.
    async fn execute_calls(
        &self,
        mut state: AgentState,
    ) -> Result<(AgentState, bool), AgentError> {
        let calls: Vec<ToolCall> = state
            .unresolved_tool_calls()
            .into_iter()
            .cloned()
            .collect();

        // Security screening happens before anything touches a wire.
        let mut surface = false;
        let mut executable = Vec::with_capacity(calls.len());
        for call in calls {
            match self.security.check_arguments(&call.arguments) {
                Ok(()) => executable.push(call),
                Err(violation) => {
                    state = state
                        .with_error(FailureClass::Security.as_str(), violation.to_string())
                        .with_tool_result(ToolResult::error(
                            &call.id,
                            format!(
                                "Blocked by security rule '{}'; this operation will not \
                                 be attempted.",
                                violation.rule
                            ),
                            Some("SECURITY_VIOLATION".to_string()),
                        ))?;
                    self.save(&state).await?;
                    surface = true;
                }
            }
        }

        // First attempts run concurrently, bounded, in proposal order.
        let outcomes: Vec<(ToolCall, Result<ToolResult, InvokeError>)> =
            stream::iter(executable)
                .map(|call| async move {
                    let outcome = self.tools.invoke(&call).await;
                    (call, outcome)
                })
                .buffered(self.limits.max_parallel_tools.max(1))
                .collect()
                .await;

        for (call, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    state = state.with_tool_result(result)?;
                    self.save(&state).await?;
                }
                Err(InvokeError::Validation(e)) => {
                    // Pair an error result and let the model regenerate
                    // with corrected arguments.
                    state = state
                        .with_error(FailureClass::Validation.as_str(), e.to_string())
                        .with_tool_result(ToolResult::error(
                            &call.id,
                            e.to_string(),
                            Some("INVALID_ARGUMENTS".to_string()),
                        ))?;
                    self.save(&state).await?;
                    if self
                        .recovery
                        .decide(FailureClass::Validation, state.error_count)
                        == RecoveryAction::Surface
                    {
                        surface = true;
                    }
                }
                Err(InvokeError::Transport(e)) => {
                    let (next, unrecovered) = self.retry_transport(state, &call, e).await?;
                    state = next;
                    surface = surface || unrecovered;
                }
            }
        }

        Ok((state, surface))
    }

    /// Retry a transport-failed call with backoff until it succeeds or
    /// the retry budget is spent.
    async fn retry_transport(
        &self,
        mut state: AgentState,
        call: &ToolCall,
        first: crate::tools::TransportError,
    ) -> Result<(AgentState, bool), AgentError> {
        let mut last = first;
        loop {
            state = state.with_error(FailureClass::Transport.as_str(), last.to_string());
            self.save(&state).await?;

            match self
                .recovery
                .decide(FailureClass::Transport, state.error_count)
            {
                RecoveryAction::RetryAfter(delay) => {
                    tracing::warn!(
                        tool = %call.tool_name,
                        error = %last,
                        delay_ms = delay.as_millis() as u64,
                        "Tool dispatch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    match self.tools.invoke(call).await {
                        Ok(result) => {
                            state = state.with_tool_result(result)?;
                            self.save(&state).await?;
                            return Ok((state, false));
                        }
                        Err(InvokeError::Transport(e)) => last = e,
                        Err(InvokeError::Validation(e)) => {
                            state = state.with_tool_result(ToolResult::error(
                                &call.id,
                                e.to_string(),
                                Some("INVALID_ARGUMENTS".to_string()),
                            ))?;
                            self.save(&state).await?;
                            return Ok((state, false));
                        }
                    }
                }
                _ => {
                    state = state.with_tool_result(ToolResult::error(
                        &call.id,
                        last.to_string(),
                        Some(last.code.clone()),
                    ))?;
                    self.save(&state).await?;
                    return Ok((state, true));
                }
            }
        }
    }

    async fn save(&self, state: &AgentState) -> Result<(), AgentError> {
        self.checkpoints.save(state).await?;
        Ok(())
    }
}

fn failure_text(state: &AgentState) -> String {
    match &state.last_error {
        Some(record) => format!(
            "I could not complete the task. Last failure ({}): {}",
            record.kind, record.message
        ),
        None => "I could not complete the task.".to_string(),
    }
}
