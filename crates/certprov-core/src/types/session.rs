use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ProvisionError};

/// Why a provisioning session ended in [`SessionState::Failed`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    /// Failure classification
    pub kind: ErrorKind,
    /// Human-readable cause
    pub message: String,
}

impl FailureReason {
    /// Create a failure reason
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns true if a later attempt could succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<&ProvisionError> for FailureReason {
    fn from(err: &ProvisionError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// State of a provisioning session.
///
/// ```text
/// Idle -> Connecting -> Authenticating -> Registering -> Assigned
///            |               |                 |
///            +---------------+-----------------+--> Failed | Cancelled
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// Not started
    Idle,
    /// Opening the transport
    Connecting,
    /// Answering the proof-of-possession challenge
    Authenticating,
    /// Waiting for the assignment
    Registering,
    /// Device assigned (terminal)
    Assigned,
    /// Terminal failure
    Failed(FailureReason),
    /// Cancelled by the caller (terminal)
    Cancelled,
}

impl SessionState {
    /// Returns true for `Assigned`, `Failed` and `Cancelled`
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Assigned | Self::Failed(_) | Self::Cancelled)
    }

    /// Short state name for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Registering => "registering",
            Self::Assigned => "assigned",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// The failure reason, if this is `Failed`
    #[must_use]
    pub const fn failure(&self) -> Option<&FailureReason> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed ({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!SessionState::Idle.is_terminal());
        assert!(!SessionState::Authenticating.is_terminal());
        assert!(SessionState::Assigned.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
        assert!(SessionState::Failed(FailureReason::new(ErrorKind::ProtocolViolation, "x")).is_terminal());
    }

    #[test]
    fn test_failure_from_error() {
        let err = ProvisionError::AuthenticationRejected("certificate revoked".into());
        let reason = FailureReason::from(&err);
        assert_eq!(reason.kind, ErrorKind::AuthenticationRejected);
        assert!(!reason.is_retryable());
        assert_eq!(reason.message, "authentication rejected: certificate revoked");
    }

    #[test]
    fn test_state_serialization() {
        let state = SessionState::Failed(FailureReason::new(ErrorKind::TransientNetwork, "timeout"));
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["kind"], "transient_network");
    }
}
