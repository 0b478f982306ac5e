//! The provisioning session state machine.
//!
//! A session drives one attempt through
//! `Idle -> Connecting -> Authenticating -> Registering -> Assigned`, ending in
//! `Failed` or `Cancelled` on the way if something goes wrong. Only the
//! connect phase is retried; everything after it fails fast.

use certprov_core::{
    ErrorKind, FailureReason, ProvisionError, ProvisioningResult, ProvisioningStatus, Result,
    SessionState,
};
use chrono::Utc;
use std::future::Future;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::RetryConfig;
use crate::identity::IdentityHandle;
use crate::transport::{
    AssignmentQuery, Challenge, ChallengeResponse, ProvisioningTransport, RegistrationStatus,
};

/// One provisioning attempt for one identity.
///
/// The session takes the identity for the duration of [`run`](Self::run) and
/// releases its key on every exit path, including cancellation and the run
/// future being dropped. A dropped run leaves the session `Cancelled`.
pub struct ProvisioningSession<T> {
    transport: T,
    identity: Option<IdentityHandle>,
    scope_id: String,
    retry: RetryConfig,
    cancel: CancellationToken,
    state: SessionState,
    history: Vec<SessionState>,
    connect_attempts: u32,
}

impl<T: ProvisioningTransport> ProvisioningSession<T> {
    /// Create an idle session.
    pub fn new(
        transport: T,
        identity: IdentityHandle,
        scope_id: impl Into<String>,
        retry: RetryConfig,
    ) -> Result<Self> {
        let scope_id = scope_id.into();
        if scope_id.trim().is_empty() {
            return Err(ProvisionError::Configuration("scope identifier is empty".into()));
        }

        Ok(Self {
            transport,
            identity: Some(identity),
            scope_id,
            retry,
            cancel: CancellationToken::new(),
            state: SessionState::Idle,
            history: vec![SessionState::Idle],
            connect_attempts: 0,
        })
    }

    /// Observe `token` at every suspension point
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Every state the session has been in, oldest first
    #[must_use]
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// Number of connect attempts made so far
    #[must_use]
    pub const fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    /// Scope identifier the session registers under
    #[must_use]
    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    /// Run the handshake to a terminal state.
    ///
    /// Returns the service's answer for `Assigned`, `Disabled` and `Failed`
    /// registrations; only `Assigned` leaves the session in
    /// [`SessionState::Assigned`]. A session runs at most once.
    ///
    /// Dropping the returned future before it completes releases the key and
    /// moves the session to [`SessionState::Cancelled`].
    pub async fn run(&mut self) -> Result<ProvisioningResult> {
        let Some(identity) = self.identity.take() else {
            return Err(ProvisionError::Configuration(format!(
                "provisioning session already ran (state: {})",
                self.state
            )));
        };

        let outcome = {
            let mut guard = RunGuard {
                session: &mut *self,
                identity,
                finished: false,
            };
            let outcome = guard.session.drive(&guard.identity).await;
            guard.finished = true;
            outcome
        };

        match &outcome {
            Ok(result) if result.is_assigned() => {
                info!(
                    registration_id = %result.registration_id,
                    hub = result.assigned_hub.as_deref().unwrap_or_default(),
                    device_id = result.device_id.as_deref().unwrap_or_default(),
                    "device assigned"
                );
                self.transition(SessionState::Assigned);
            }
            Ok(result) => {
                let detail = result.error_message.as_deref().unwrap_or("no detail given");
                warn!(registration_id = %result.registration_id, status = %result.status, detail, "registration refused");
                self.transition(SessionState::Failed(FailureReason::new(
                    ErrorKind::RegistrationRefused,
                    format!("registration {}: {detail}", result.status),
                )));
            }
            Err(ProvisionError::Cancelled) => {
                info!("provisioning cancelled");
                self.transition(SessionState::Cancelled);
            }
            Err(err) => {
                warn!(kind = %err.kind(), error = %err, "provisioning failed");
                self.transition(SessionState::Failed(err.into()));
            }
        }

        outcome
    }

    async fn drive(&mut self, identity: &IdentityHandle) -> Result<ProvisioningResult> {
        let registration_id = identity.registration_id().to_string();

        self.transition(SessionState::Connecting);
        let challenge = self.connect(&registration_id).await?;

        self.transition(SessionState::Authenticating);
        let response = ChallengeResponse {
            scope_id: self.scope_id.clone(),
            session_id: challenge.session_id.clone(),
            registration_id: registration_id.clone(),
            certificate_chain: identity
                .certificate_chain()
                .into_iter()
                .map(<[u8]>::to_vec)
                .collect(),
            algorithm: identity.algorithm(),
            signature: identity.sign(&challenge.nonce)?,
        };
        // The key is not needed past this point.
        identity.release();

        cancellable(&self.cancel, self.transport.send_challenge_response(&response))
            .await?
            .map_err(|e| e.into_provision_error(1))?;
        debug!(session_id = %challenge.session_id, "attestation accepted");

        self.transition(SessionState::Registering);
        self.register(challenge.session_id, registration_id).await
    }

    /// Open the session, retrying transient failures with exponential backoff.
    async fn connect(&mut self, registration_id: &str) -> Result<Challenge> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.connect_attempts = attempt;
            debug!(attempt, scope_id = %self.scope_id, "connecting");

            let outcome = cancellable(
                &self.cancel,
                self.transport.connect(&self.scope_id, registration_id),
            )
            .await?;

            match outcome {
                Ok(challenge) => return Ok(challenge),
                Err(err) if err.is_retryable() && attempt <= self.retry.max_retries => {
                    let delay = self.retry.backoff_for(attempt - 1);
                    warn!(attempt, error = %err, ?delay, "connect failed, retrying");
                    cancellable(&self.cancel, tokio::time::sleep(delay)).await?;
                }
                Err(err) => return Err(err.into_provision_error(attempt)),
            }
        }
    }

    /// Request registration and poll until the service gives a definitive status.
    async fn register(
        &mut self,
        session_id: String,
        registration_id: String,
    ) -> Result<ProvisioningResult> {
        let mut query = AssignmentQuery {
            scope_id: self.scope_id.clone(),
            session_id,
            registration_id,
            operation_id: None,
        };
        let mut polls = 0u32;

        loop {
            let response = cancellable(&self.cancel, self.transport.receive_assignment(&query))
                .await?
                .map_err(|e| e.into_provision_error(1))?;

            let status = match response.status {
                RegistrationStatus::Assigned => ProvisioningStatus::Assigned,
                RegistrationStatus::Disabled => ProvisioningStatus::Disabled,
                RegistrationStatus::Failed => ProvisioningStatus::Failed,
                pending @ (RegistrationStatus::Assigning | RegistrationStatus::Unassigned) => {
                    if polls >= self.retry.max_polls {
                        return Err(ProvisionError::ProtocolViolation(format!(
                            "registration still {pending:?} after {polls} polls"
                        )));
                    }
                    polls += 1;
                    if response.operation_id.is_some() {
                        query.operation_id = response.operation_id;
                    }
                    let delay = self.retry.poll_delay(response.retry_after);
                    debug!(poll = polls, status = ?pending, ?delay, "registration pending");
                    cancellable(&self.cancel, tokio::time::sleep(delay)).await?;
                    continue;
                }
            };

            if status.is_assigned() && response.assigned_hub.is_none() {
                return Err(ProvisionError::ProtocolViolation(
                    "assigned status without an assigned hub".into(),
                ));
            }

            return Ok(ProvisioningResult {
                registration_id: query.registration_id,
                status,
                assigned_hub: response.assigned_hub,
                device_id: response.device_id,
                substatus: response.substatus,
                error_message: response.error_message,
                completed_at: Utc::now(),
            });
        }
    }

}

impl<T> ProvisioningSession<T> {
    fn transition(&mut self, next: SessionState) {
        debug!(from = self.state.name(), to = next.name(), "session transition");
        self.history.push(next.clone());
        self.state = next;
    }
}

/// Owns the identity while a run is in flight.
///
/// On drop the key is released; if the run never finished (its future was
/// dropped) the session is marked `Cancelled`.
struct RunGuard<'a, T> {
    session: &'a mut ProvisioningSession<T>,
    identity: IdentityHandle,
    finished: bool,
}

impl<T> Drop for RunGuard<'_, T> {
    fn drop(&mut self) {
        self.identity.release();
        if !self.finished {
            info!(state = self.session.state.name(), "provisioning run abandoned");
            self.session.transition(SessionState::Cancelled);
        }
    }
}

impl<T> std::fmt::Debug for ProvisioningSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningSession")
            .field("scope_id", &self.scope_id)
            .field("state", &self.state)
            .field("connect_attempts", &self.connect_attempts)
            .finish_non_exhaustive()
    }
}

/// Await `fut` unless `cancel` fires first.
async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ProvisionError::Cancelled),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::test_support::handle;
    use crate::transport::{AssignmentResponse, TransportError, TransportResult};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const SCOPE: &str = "0ne00000A0A";

    /// Scripted transport
    #[derive(Default)]
    struct FakeTransport {
        transient_connect_failures: AtomicU32,
        reject_attestation: bool,
        hang_on_attestation: bool,
        assignments: Mutex<VecDeque<AssignmentResponse>>,
        connects: AtomicU32,
        attestations: Mutex<Vec<ChallengeResponse>>,
        queries: Mutex<Vec<AssignmentQuery>>,
    }

    impl FakeTransport {
        fn assigning(self, responses: impl IntoIterator<Item = AssignmentResponse>) -> Self {
            self.assignments.lock().unwrap().extend(responses);
            self
        }

        fn failing_connects(self, n: u32) -> Self {
            self.transient_connect_failures.store(n, Ordering::SeqCst);
            self
        }
    }

    fn assigned() -> AssignmentResponse {
        AssignmentResponse {
            assigned_hub: Some("contoso.azure-devices.net".into()),
            device_id: Some("device-1".into()),
            ..AssignmentResponse::with_status(RegistrationStatus::Assigned)
        }
    }

    #[async_trait]
    impl ProvisioningTransport for FakeTransport {
        async fn connect(&self, scope_id: &str, _registration_id: &str) -> TransportResult<Challenge> {
            assert_eq!(scope_id, SCOPE);
            self.connects.fetch_add(1, Ordering::SeqCst);
            let remaining = self.transient_connect_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient_connect_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(TransportError::Transient("connection refused".into()));
            }
            Ok(Challenge {
                session_id: "s-1".into(),
                nonce: b"nonce".to_vec(),
            })
        }

        async fn send_challenge_response(&self, response: &ChallengeResponse) -> TransportResult<()> {
            self.attestations.lock().unwrap().push(response.clone());
            if self.hang_on_attestation {
                std::future::pending::<()>().await;
            }
            if self.reject_attestation {
                return Err(TransportError::Rejected("certificate not enrolled".into()));
            }
            Ok(())
        }

        async fn receive_assignment(&self, query: &AssignmentQuery) -> TransportResult<AssignmentResponse> {
            self.queries.lock().unwrap().push(query.clone());
            let next = self.assignments.lock().unwrap().pop_front();
            next.ok_or_else(|| TransportError::Protocol("no scripted answer".into()))
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::new()
            .max_retries(3)
            .initial_backoff(Duration::from_millis(1))
            .max_backoff(Duration::from_millis(5))
            .poll_interval(Duration::from_millis(1))
            .max_polls(5)
    }

    fn session(transport: &Arc<FakeTransport>, identity: &IdentityHandle) -> ProvisioningSession<Arc<FakeTransport>> {
        ProvisioningSession::new(Arc::clone(transport), identity.clone(), SCOPE, fast_retry()).unwrap()
    }

    fn names(session: &ProvisioningSession<Arc<FakeTransport>>) -> Vec<&'static str> {
        session.history().iter().map(SessionState::name).collect()
    }

    #[test]
    fn test_empty_scope_is_configuration_error() {
        let err = ProvisioningSession::new(FakeTransport::default(), handle("device-1"), "  ", fast_retry())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_happy_path_reaches_assigned() {
        let transport = Arc::new(FakeTransport::default().assigning([assigned()]));
        let identity = handle("device-1");
        let mut session = session(&transport, &identity);

        let result = session.run().await.unwrap();
        assert!(result.is_assigned());
        assert_eq!(result.registration_id, "device-1");
        assert_eq!(result.assigned_hub.as_deref(), Some("contoso.azure-devices.net"));
        assert_eq!(session.state(), &SessionState::Assigned);
        assert_eq!(
            names(&session),
            ["idle", "connecting", "authenticating", "registering", "assigned"]
        );

        let attestations = transport.attestations.lock().unwrap();
        assert_eq!(attestations[0].registration_id, "device-1");
        assert_eq!(attestations[0].certificate_chain[0], identity.public_material());
        assert!(!attestations[0].signature.is_empty());

        assert!(identity.is_released());
        assert_eq!(identity.holders(), 1);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let transport = Arc::new(FakeTransport {
            reject_attestation: true,
            ..FakeTransport::default()
        });
        let identity = handle("device-1");
        let mut session = session(&transport, &identity);

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, ProvisionError::AuthenticationRejected(_)));
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
        assert_eq!(transport.attestations.lock().unwrap().len(), 1);

        let reason = session.state().failure().unwrap();
        assert_eq!(reason.kind, ErrorKind::AuthenticationRejected);
        assert!(!reason.is_retryable());
        assert!(identity.is_released());
    }

    #[tokio::test]
    async fn test_transient_failures_below_ceiling_recover() {
        let transport = Arc::new(FakeTransport::default().failing_connects(3).assigning([assigned()]));
        let identity = handle("device-1");
        let mut session = session(&transport, &identity);

        let result = session.run().await.unwrap();
        assert!(result.is_assigned());
        assert_eq!(session.connect_attempts(), 4);
        assert_eq!(transport.connects.load(Ordering::SeqCst), 4);
        assert_eq!(session.state(), &SessionState::Assigned);
    }

    #[tokio::test]
    async fn test_transient_failures_past_ceiling_fail() {
        let transport = Arc::new(FakeTransport::default().failing_connects(10));
        let identity = handle("device-1");
        let mut session = session(&transport, &identity);

        let err = session.run().await.unwrap_err();
        match err {
            ProvisionError::TransientNetwork { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.connects.load(Ordering::SeqCst), 4);

        let reason = session.state().failure().unwrap();
        assert_eq!(reason.kind, ErrorKind::TransientNetwork);
        assert!(reason.is_retryable());
        assert!(identity.is_released());
        assert!(transport.attestations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_authenticating() {
        let transport = Arc::new(FakeTransport {
            hang_on_attestation: true,
            ..FakeTransport::default()
        });
        let identity = handle("device-1");
        let token = CancellationToken::new();
        let mut session = session(&transport, &identity).with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = session.run().await.unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, ProvisionError::Cancelled));
        assert_eq!(session.state(), &SessionState::Cancelled);
        assert_eq!(
            names(&session),
            ["idle", "connecting", "authenticating", "cancelled"]
        );
        assert!(identity.is_released());
        assert_eq!(identity.holders(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let transport = Arc::new(FakeTransport::default().assigning([assigned()]));
        let identity = handle("device-1");
        let token = CancellationToken::new();
        token.cancel();
        let mut session = session(&transport, &identity).with_cancellation(token);

        assert!(matches!(session.run().await, Err(ProvisionError::Cancelled)));
        assert_eq!(transport.connects.load(Ordering::SeqCst), 0);
        assert!(identity.is_released());
    }

    #[tokio::test]
    async fn test_dropped_run_future_releases_identity_and_cancels() {
        let transport = Arc::new(FakeTransport {
            hang_on_attestation: true,
            ..FakeTransport::default()
        });
        let identity = handle("device-1");
        let mut session = session(&transport, &identity);

        let timed_out = tokio::time::timeout(Duration::from_millis(20), session.run()).await;
        assert!(timed_out.is_err());
        assert!(identity.is_released());
        assert_eq!(session.state(), &SessionState::Cancelled);
        assert_eq!(names(&session), ["idle", "connecting", "authenticating", "cancelled"]);
        assert_eq!(identity.holders(), 1);
    }

    #[tokio::test]
    async fn test_polls_until_assigned() {
        let pending = AssignmentResponse {
            operation_id: Some("op-1".into()),
            retry_after: Some(Duration::from_millis(1)),
            ..AssignmentResponse::with_status(RegistrationStatus::Assigning)
        };
        let transport = Arc::new(FakeTransport::default().assigning([pending.clone(), pending, assigned()]));
        let identity = handle("device-1");
        let mut session = session(&transport, &identity);

        assert!(session.run().await.unwrap().is_assigned());

        let queries = transport.queries.lock().unwrap();
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0].operation_id, None);
        assert_eq!(queries[2].operation_id.as_deref(), Some("op-1"));
        assert_eq!(queries[2].session_id, "s-1");
    }

    #[tokio::test]
    async fn test_poll_ceiling_is_protocol_violation() {
        let pending = AssignmentResponse::with_status(RegistrationStatus::Assigning);
        let transport = Arc::new(FakeTransport::default().assigning(std::iter::repeat(pending).take(10)));
        let identity = handle("device-1");
        let mut session = session(&transport, &identity);

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, ProvisionError::ProtocolViolation(_)), "{err}");
        // The first request plus `max_polls` polls
        assert_eq!(transport.queries.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_disabled_enrollment_is_reported_not_assigned() {
        let disabled = AssignmentResponse {
            error_message: Some("enrollment disabled".into()),
            ..AssignmentResponse::with_status(RegistrationStatus::Disabled)
        };
        let transport = Arc::new(FakeTransport::default().assigning([disabled]));
        let identity = handle("device-1");
        let mut session = session(&transport, &identity);

        let result = session.run().await.unwrap();
        assert_eq!(result.status, ProvisioningStatus::Disabled);
        assert!(!result.is_assigned());

        let reason = session.state().failure().unwrap();
        assert_eq!(reason.kind, ErrorKind::RegistrationRefused);
        assert!(reason.message.contains("enrollment disabled"));
    }

    #[tokio::test]
    async fn test_assigned_without_hub_is_protocol_violation() {
        let transport = Arc::new(
            FakeTransport::default().assigning([AssignmentResponse::with_status(RegistrationStatus::Assigned)]),
        );
        let identity = handle("device-1");
        let mut session = session(&transport, &identity);

        let err = session.run().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }

    #[tokio::test]
    async fn test_session_runs_once() {
        let transport = Arc::new(FakeTransport::default().assigning([assigned()]));
        let identity = handle("device-1");
        let mut session = session(&transport, &identity);

        session.run().await.unwrap();
        let err = session.run().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(session.state(), &SessionState::Assigned);
    }
}
