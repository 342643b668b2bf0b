//! Failure classification and retry policy.
//!
//! Failures within a turn share one retry budget. Transport failures
//! retry with exponential backoff; validation failures loop back to
//! reasoning so the model can regenerate; security violations are never
//! retried. When the budget is spent, the turn ends with an error
//! response instead of looping further.

use std::time::Duration;

use crate::config::RecoveryConfig;

/// What kind of failure occurred, as far as recovery is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Arguments rejected before dispatch; the model can regenerate.
    Validation,
    /// The tool server could not be reached or answered garbage.
    Transport,
    /// A deny rule matched; retrying would re-match.
    Security,
    /// Anything else.
    Unclassified,
}

impl FailureClass {
    /// Stable name used in error records and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Transport => "transport",
            Self::Security => "security",
            Self::Unclassified => "unclassified",
        }
    }
}

/// What the orchestrator should do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Return to reasoning so the model can try a different approach.
    Regenerate,
    /// Retry the same operation after the given backoff.
    RetryAfter(Duration),
    /// Stop retrying and report the failure in the final response.
    Surface,
}

/// Per-turn retry policy.
#[derive(Debug, Clone)]
pub struct ErrorRecovery {
    max_retries: u32,
    base_backoff: Duration,
}

impl ErrorRecovery {
    pub fn new(config: &RecoveryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff: config.base_backoff(),
        }
    }

    /// The configured retry budget.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether the budget is spent. `error_count` counts failures
    /// already recorded this turn, including the one being decided.
    pub fn exhausted(&self, error_count: u32) -> bool {
        error_count >= self.max_retries
    }

    /// Decide how to handle a failure given the budget consumed so far.
    pub fn decide(&self, class: FailureClass, error_count: u32) -> RecoveryAction {
        if class == FailureClass::Security {
            return RecoveryAction::Surface;
        }
        if self.exhausted(error_count) {
            tracing::warn!(
                class = class.as_str(),
                error_count,
                max_retries = self.max_retries,
                "Retry budget exhausted, surfacing failure"
            );
            return RecoveryAction::Surface;
        }

        match class {
            FailureClass::Validation => RecoveryAction::Regenerate,
            FailureClass::Transport => RecoveryAction::RetryAfter(self.backoff(error_count)),
            // One blind retry, then give up.
            FailureClass::Unclassified if error_count <= 1 => {
                RecoveryAction::RetryAfter(self.base_backoff)
            }
            FailureClass::Unclassified => RecoveryAction::Surface,
            FailureClass::Security => RecoveryAction::Surface,
        }
    }

    /// Exponential backoff: base, 2x, 4x, ... keyed by failures so far.
    fn backoff(&self, error_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(error_count.saturating_sub(1).min(8));
        self.base_backoff.saturating_mul(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recovery() -> ErrorRecovery {
        ErrorRecovery::new(&RecoveryConfig {
            max_retries: 3,
            backoff_ms: 500,
        })
    }

    #[test]
    fn test_security_always_surfaces() {
        let r = recovery();
        assert_eq!(
            r.decide(FailureClass::Security, 0),
            RecoveryAction::Surface
        );
        assert_eq!(
            r.decide(FailureClass::Security, 1),
            RecoveryAction::Surface
        );
    }

    #[test]
    fn test_validation_regenerates_until_budget_spent() {
        let r = recovery();
        assert_eq!(
            r.decide(FailureClass::Validation, 1),
            RecoveryAction::Regenerate
        );
        assert_eq!(
            r.decide(FailureClass::Validation, 2),
            RecoveryAction::Regenerate
        );
        assert_eq!(
            r.decide(FailureClass::Validation, 3),
            RecoveryAction::Surface
        );
    }

    #[test]
    fn test_transport_backoff_doubles() {
        let r = recovery();
        assert_eq!(
            r.decide(FailureClass::Transport, 1),
            RecoveryAction::RetryAfter(Duration::from_millis(500))
        );
        assert_eq!(
            r.decide(FailureClass::Transport, 2),
            RecoveryAction::RetryAfter(Duration::from_millis(1000))
        );
        assert_eq!(
            r.decide(FailureClass::Transport, 3),
            RecoveryAction::Surface
        );
    }

    #[test]
    fn test_unclassified_retries_once() {
        let r = recovery();
        assert_eq!(
            r.decide(FailureClass::Unclassified, 1),
            RecoveryAction::RetryAfter(Duration::from_millis(500))
        );
        assert_eq!(
            r.decide(FailureClass::Unclassified, 2),
            RecoveryAction::Surface
        );
    }
}
