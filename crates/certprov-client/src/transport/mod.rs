//! Transport seam between the provisioning session and the network.
//!
//! The session only drives the handshake; how each step reaches the service is
//! up to a [`ProvisioningTransport`]. [`HttpTransport`] is the reference
//! implementation.

mod http;

pub use http::{HttpTransport, HttpTransportBuilder};

use async_trait::async_trait;
use certprov_core::{ErrorKind, ProvisionError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::identity::SignatureAlgorithm;

/// Challenge issued when a session is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Service-assigned session identifier
    pub session_id: String,
    /// Bytes the device must sign
    pub nonce: Vec<u8>,
}

/// Proof of possession sent in answer to a [`Challenge`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    pub scope_id: String,
    pub session_id: String,
    pub registration_id: String,
    /// Leaf certificate first, then the rest of the chain (DER)
    pub certificate_chain: Vec<Vec<u8>>,
    pub algorithm: SignatureAlgorithm,
    pub signature: Vec<u8>,
}

/// Registration request, or a poll for a pending one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentQuery {
    pub scope_id: String,
    pub session_id: String,
    pub registration_id: String,
    /// Set when polling an operation the service reported as in progress
    pub operation_id: Option<String>,
}

/// Registration status as reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Unassigned,
    Assigning,
    Assigned,
    Failed,
    Disabled,
}

impl RegistrationStatus {
    /// Returns true while the service is still working on the registration
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Unassigned | Self::Assigning)
    }
}

/// Answer to an [`AssignmentQuery`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentResponse {
    pub status: RegistrationStatus,
    pub assigned_hub: Option<String>,
    pub device_id: Option<String>,
    pub operation_id: Option<String>,
    /// How long the service asks the device to wait before polling again
    pub retry_after: Option<Duration>,
    pub substatus: Option<String>,
    pub error_message: Option<String>,
}

impl AssignmentResponse {
    /// A response with only the status set
    #[must_use]
    pub const fn with_status(status: RegistrationStatus) -> Self {
        Self {
            status,
            assigned_hub: None,
            device_id: None,
            operation_id: None,
            retry_after: None,
            substatus: None,
            error_message: None,
        }
    }
}

/// Failure of a single transport call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection failure, timeout, throttling or server-side error
    #[error("transient transport failure: {0}")]
    Transient(String),

    /// The service refused the presented credentials
    #[error("rejected by the service: {0}")]
    Rejected(String),

    /// The service answered with something outside the protocol
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Error kind this failure maps to
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_) => ErrorKind::TransientNetwork,
            Self::Rejected(_) => ErrorKind::AuthenticationRejected,
            Self::Protocol(_) => ErrorKind::ProtocolViolation,
        }
    }

    /// Returns true if the same call may succeed later
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Convert into a session error; `attempts` is how many calls were made.
    #[must_use]
    pub fn into_provision_error(self, attempts: u32) -> ProvisionError {
        match self {
            Self::Transient(message) => ProvisionError::TransientNetwork { attempts, message },
            Self::Rejected(message) => ProvisionError::AuthenticationRejected(message),
            Self::Protocol(message) => ProvisionError::ProtocolViolation(message),
        }
    }
}

/// Result type alias for transport calls
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Network operations a provisioning session needs
#[async_trait]
pub trait ProvisioningTransport: Send + Sync {
    /// Open a session for `registration_id` under `scope_id` and obtain a challenge
    async fn connect(&self, scope_id: &str, registration_id: &str) -> TransportResult<Challenge>;

    /// Present the certificate chain and signed challenge; `Ok` means accepted
    async fn send_challenge_response(&self, response: &ChallengeResponse) -> TransportResult<()>;

    /// Request registration, or poll a pending one
    async fn receive_assignment(&self, query: &AssignmentQuery) -> TransportResult<AssignmentResponse>;
}

#[async_trait]
impl<T: ProvisioningTransport + ?Sized> ProvisioningTransport for Arc<T> {
    async fn connect(&self, scope_id: &str, registration_id: &str) -> TransportResult<Challenge> {
        (**self).connect(scope_id, registration_id).await
    }

    async fn send_challenge_response(&self, response: &ChallengeResponse) -> TransportResult<()> {
        (**self).send_challenge_response(response).await
    }

    async fn receive_assignment(&self, query: &AssignmentQuery) -> TransportResult<AssignmentResponse> {
        (**self).receive_assignment(query).await
    }
}
