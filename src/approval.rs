//! Human-confirmation gate for high-risk operations.
//!
//! The gate decides which operations need confirmation, assesses their
//! risk, and forwards requests to an external [`ApprovalChannel`]
//! (console, web UI, ticketing; the medium is out of scope). A denial
//! is a normal outcome, not an error. Within one turn the gate refuses
//! to stack confirmations: a second request while one is pending, or a
//! repeat of an operation already denied, is rejected outright.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::ApprovalConfig;
use crate::state::{ApprovalRequest, Resolution, RiskLevel};

/// Errors from the approval gate.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("An approval is already pending for this thread (operation '{operation}')")]
    AlreadyPending { operation: String },

    #[error("Operation '{operation}' was already denied this turn")]
    AlreadyDenied { operation: String },

    #[error("Approval channel failed: {0}")]
    Channel(String),
}

/// External collaborator that presents a request to a human and
/// returns their decision.
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    /// Present `(operation, details)` and return true if approved.
    async fn request(&self, request: &ApprovalRequest) -> Result<bool, ApprovalError>;
}

/// The approval gate for one thread.
pub struct ApprovalGate {
    channel: std::sync::Arc<dyn ApprovalChannel>,
    config: ApprovalConfig,
    /// Operation of the request currently awaiting the channel.
    pending: Mutex<Option<String>>,
    /// Operations resolved this turn, to reject duplicate proposals.
    resolved: Mutex<HashMap<String, Resolution>>,
}

impl ApprovalGate {
    /// Create a gate over an approval channel.
    pub fn new(channel: std::sync::Arc<dyn ApprovalChannel>, config: ApprovalConfig) -> Self {
        Self {
            channel,
            config,
            pending: Mutex::new(None),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Forget per-turn resolutions. Called at the start of each turn.
    pub async fn begin_turn(&self) {
        self.resolved.lock().await.clear();
        *self.pending.lock().await = None;
    }

    /// Whether an operation is in the configured high-risk set or
    /// escalated by its details.
    pub fn requires_approval(&self, operation: &str, details: &Value) -> bool {
        if self.config.high_risk_operations.contains(operation) {
            return true;
        }
        if let Some(service) = details.get("service_name").and_then(Value::as_str)
            && self.config.critical_services.contains(service)
        {
            return true;
        }
        if let Some(path) = details.get("path").and_then(Value::as_str)
            && (path.starts_with("/etc") || path.starts_with("/var"))
        {
            return true;
        }
        false
    }

    /// Build an approval request with assessed risk and reason.
    pub fn build_request(
        &self,
        tool_call_id: impl Into<String>,
        operation: &str,
        details: Value,
    ) -> ApprovalRequest {
        let (risk_level, reason) = self.assess(operation, &details);
        ApprovalRequest {
            id: Uuid::new_v4(),
            tool_call_id: tool_call_id.into(),
            operation: operation.to_string(),
            details,
            risk_level,
            reason,
            resolution: Resolution::Pending,
        }
    }

    fn assess(&self, operation: &str, details: &Value) -> (RiskLevel, String) {
        let service = details
            .get("service_name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if self.config.critical_services.contains(service) {
            return (
                RiskLevel::Critical,
                format!("'{service}' is a critical system service"),
            );
        }

        match operation {
            "delete_file" => (
                RiskLevel::High,
                "Deleting files is a destructive operation".to_string(),
            ),
            "stop_service" | "restart_service" => (
                RiskLevel::High,
                "Stopping or restarting services may affect availability".to_string(),
            ),
            "write_file" | "start_service" => (
                RiskLevel::Medium,
                format!("'{operation}' modifies system state"),
            ),
            _ => {
                let path = details.get("path").and_then(Value::as_str).unwrap_or_default();
                if path.starts_with("/etc") {
                    (
                        RiskLevel::High,
                        "Modifies system configuration files".to_string(),
                    )
                } else {
                    (
                        RiskLevel::Low,
                        format!("'{operation}' is in the configured high-risk set"),
                    )
                }
            }
        }
    }

    /// Ask the human channel to resolve a request.
    ///
    /// Rejects a second request while one is pending and a repeat of an
    /// operation already denied this turn. With a configured timeout,
    /// expiry auto-denies; without one, the wait is unbounded.
    pub async fn request(&self, request: &ApprovalRequest) -> Result<Resolution, ApprovalError> {
        {
            let pending = self.pending.lock().await;
            if let Some(op) = pending.as_ref() {
                return Err(ApprovalError::AlreadyPending {
                    operation: op.clone(),
                });
            }
        }
        if let Some(Resolution::Denied) = self.resolved.lock().await.get(&request.operation) {
            return Err(ApprovalError::AlreadyDenied {
                operation: request.operation.clone(),
            });
        }

        *self.pending.lock().await = Some(request.operation.clone());

        tracing::info!(
            operation = %request.operation,
            risk = ?request.risk_level,
            request_id = %request.id,
            "Requesting human approval"
        );

        let decision = match self.config.timeout() {
            None => self.channel.request(request).await,
            Some(limit) => {
                match tokio::time::timeout(limit, self.channel.request(request)).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(
                            operation = %request.operation,
                            timeout_secs = limit.as_secs(),
                            "Approval wait timed out, denying"
                        );
                        Ok(false)
                    }
                }
            }
        };

        *self.pending.lock().await = None;

        let approved = decision?;
        let resolution = if approved {
            Resolution::Approved
        } else {
            Resolution::Denied
        };
        self.resolved
            .lock()
            .await
            .insert(request.operation.clone(), resolution);
        Ok(resolution)
    }

    /// The configured approval timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.config.timeout()
    }
}
