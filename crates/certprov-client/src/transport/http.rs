//! Reference HTTPS/JSON transport.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use certprov_core::{ProvisionError, Result};
use reqwest::{Client as HttpClient, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{
    AssignmentQuery, AssignmentResponse, Challenge, ChallengeResponse, ProvisioningTransport,
    RegistrationStatus, TransportError, TransportResult,
};
use crate::identity::SignatureAlgorithm;

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Provisioning transport speaking JSON over HTTPS
#[derive(Clone)]
pub struct HttpTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    http: HttpClient,
    base_url: Url,
}

impl HttpTransport {
    /// Create a builder targeting `base_url`
    #[must_use]
    pub fn builder(base_url: impl Into<String>) -> HttpTransportBuilder {
        HttpTransportBuilder::new(base_url)
    }

    /// Transport for a global endpoint host, using default settings
    pub fn for_endpoint(global_endpoint: &str) -> Result<Self> {
        HttpTransportBuilder::new(format!("https://{global_endpoint}")).build()
    }

    /// Base URL every request is built from
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> TransportResult<Url> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| TransportError::Protocol(format!("{} cannot be a base URL", self.inner.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// POST a JSON body and decode a JSON answer
    async fn post<T: DeserializeOwned, B: Serialize + Sync>(&self, url: Url, body: &B) -> TransportResult<T> {
        let response = self.send(url, body).await?;
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        serde_json::from_str(&body)
            .map_err(|e| TransportError::Protocol(format!("malformed response body: {e}")))
    }

    /// POST a JSON body and expect a success status, ignoring any answer
    async fn post_empty<B: Serialize + Sync>(&self, url: Url, body: &B) -> TransportResult<()> {
        self.send(url, body).await.map(drop)
    }

    async fn send<B: Serialize + Sync>(&self, url: Url, body: &B) -> TransportResult<reqwest::Response> {
        debug!(url = %url, "POST request");

        let response = self
            .inner
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(Self::handle_error(status, response).await)
        }
    }

    /// Convert an error response to a [`TransportError`]
    async fn handle_error(status: StatusCode, response: reqwest::Response) -> TransportError {
        let body = response.text().await.unwrap_or_default();

        let detail = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("message")
                    .or_else(|| v.get("error"))
                    .and_then(|m| m.as_str())
                    .map(String::from)
            })
            .unwrap_or(body);
        let message = if detail.is_empty() {
            status.to_string()
        } else {
            format!("{status}: {detail}")
        };

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportError::Rejected(message),
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                warn!(%status, "throttled by provisioning service");
                TransportError::Transient(message)
            }
            s if s.is_server_error() => TransportError::Transient(message),
            _ => TransportError::Protocol(message),
        }
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.inner.base_url.as_str())
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest<'a> {
    registration_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionReply {
    session_id: String,
    nonce: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AttestationRequest<'a> {
    registration_id: &'a str,
    certificate_chain: Vec<String>,
    algorithm: SignatureAlgorithm,
    signature: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationRequest<'a> {
    registration_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    operation_id: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationReply {
    status: RegistrationStatus,
    assigned_hub: Option<String>,
    device_id: Option<String>,
    operation_id: Option<String>,
    retry_after_secs: Option<u64>,
    substatus: Option<String>,
    error_message: Option<String>,
}

impl From<RegistrationReply> for AssignmentResponse {
    fn from(reply: RegistrationReply) -> Self {
        Self {
            status: reply.status,
            assigned_hub: reply.assigned_hub,
            device_id: reply.device_id,
            operation_id: reply.operation_id,
            retry_after: reply.retry_after_secs.map(Duration::from_secs),
            substatus: reply.substatus,
            error_message: reply.error_message,
        }
    }
}

#[async_trait]
impl ProvisioningTransport for HttpTransport {
    async fn connect(&self, scope_id: &str, registration_id: &str) -> TransportResult<Challenge> {
        let url = self.endpoint(&[scope_id, "sessions"])?;
        let reply: SessionReply = self.post(url, &SessionRequest { registration_id }).await?;

        let nonce = STANDARD
            .decode(reply.nonce.as_bytes())
            .map_err(|e| TransportError::Protocol(format!("nonce is not base64: {e}")))?;
        if nonce.is_empty() {
            return Err(TransportError::Protocol("empty challenge nonce".into()));
        }

        Ok(Challenge {
            session_id: reply.session_id,
            nonce,
        })
    }

    async fn send_challenge_response(&self, response: &ChallengeResponse) -> TransportResult<()> {
        let url = self.endpoint(&[
            response.scope_id.as_str(),
            "sessions",
            response.session_id.as_str(),
            "attestation",
        ])?;
        let body = AttestationRequest {
            registration_id: &response.registration_id,
            certificate_chain: response
                .certificate_chain
                .iter()
                .map(|der| STANDARD.encode(der))
                .collect(),
            algorithm: response.algorithm,
            signature: STANDARD.encode(&response.signature),
        };
        self.post_empty(url, &body).await
    }

    async fn receive_assignment(&self, query: &AssignmentQuery) -> TransportResult<AssignmentResponse> {
        let url = self.endpoint(&[
            query.scope_id.as_str(),
            "sessions",
            query.session_id.as_str(),
            "registration",
        ])?;
        let body = RegistrationRequest {
            registration_id: &query.registration_id,
            operation_id: query.operation_id.as_deref(),
        };
        let reply: RegistrationReply = self.post(url, &body).await?;
        Ok(reply.into())
    }
}

/// Builder for configuring an [`HttpTransport`]
pub struct HttpTransportBuilder {
    base_url: String,
    timeout: Duration,
    user_agent: String,
}

impl HttpTransportBuilder {
    /// Create a new builder for `base_url`
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: format!("certprov/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Set the base URL (useful for testing)
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the per-request timeout
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the User-Agent header
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Build the transport
    pub fn build(self) -> Result<HttpTransport> {
        let base_url = Url::parse(&self.base_url).map_err(|e| {
            ProvisionError::Configuration(format!("invalid endpoint URL {:?}: {e}", self.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ProvisionError::Configuration(format!(
                "endpoint URL {base_url} cannot carry a path"
            )));
        }

        let http = HttpClient::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .gzip(true)
            .build()
            .map_err(|e| ProvisionError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(HttpTransport {
            inner: Arc::new(TransportInner { http, base_url }),
        })
    }
}
