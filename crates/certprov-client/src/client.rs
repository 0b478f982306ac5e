//! High-level provisioning client.

use certprov_core::{ProvisionError, ProvisioningResult, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::config::RetryConfig;
use crate::identity::IdentityHandle;
use crate::selector::select_identity;
use crate::session::ProvisioningSession;
use crate::store::load_store;
use crate::transport::{HttpTransport, HttpTransportBuilder, ProvisioningTransport};

/// Global device provisioning endpoint
pub const DEFAULT_GLOBAL_ENDPOINT: &str = "global.azure-devices-provisioning.net";

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared transport handle used by sessions created from a client
pub type SharedTransport = Arc<dyn ProvisioningTransport>;

/// Provisioning client bound to one scope and one transport.
///
/// Cheap to clone; every [`ProvisioningSession`] it creates shares the same
/// transport.
#[derive(Clone)]
pub struct ProvisioningClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: SharedTransport,
    scope_id: String,
    retry: RetryConfig,
}

impl ProvisioningClient {
    /// Create a builder for `scope_id`
    #[must_use]
    pub fn builder(scope_id: impl Into<String>) -> ProvisioningClientBuilder {
        ProvisioningClientBuilder::new(scope_id)
    }

    /// Create a client over a custom transport
    pub fn with_transport(
        scope_id: impl Into<String>,
        transport: impl ProvisioningTransport + 'static,
        retry: RetryConfig,
    ) -> Result<Self> {
        let scope_id = validate_scope(scope_id.into())?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                transport: Arc::new(transport),
                scope_id,
                retry,
            }),
        })
    }

    /// Scope identifier sessions register under
    #[must_use]
    pub fn scope_id(&self) -> &str {
        &self.inner.scope_id
    }

    /// Retry configuration handed to each session
    #[must_use]
    pub fn retry(&self) -> &RetryConfig {
        &self.inner.retry
    }

    /// Create an idle session for `identity`
    pub fn session(&self, identity: IdentityHandle) -> Result<ProvisioningSession<SharedTransport>> {
        ProvisioningSession::new(
            Arc::clone(&self.inner.transport),
            identity,
            self.inner.scope_id.clone(),
            self.inner.retry.clone(),
        )
    }

    /// Run one provisioning attempt for `identity`
    pub async fn provision(
        &self,
        identity: IdentityHandle,
        cancel: &CancellationToken,
    ) -> Result<ProvisioningResult> {
        self.session(identity)?
            .with_cancellation(cancel.clone())
            .run()
            .await
    }

    /// Load a certificate store, select its first keyed certificate and provision with it
    pub async fn provision_from_store(
        &self,
        path: impl AsRef<Path>,
        passphrase: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ProvisioningResult> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading certificate store");
        let set = load_store(path, passphrase).await?;
        let identity = select_identity(set)?;
        self.provision(identity, cancel).await
    }
}

impl std::fmt::Debug for ProvisioningClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningClient")
            .field("scope_id", &self.inner.scope_id)
            .field("retry", &self.inner.retry)
            .finish_non_exhaustive()
    }
}

fn validate_scope(scope_id: String) -> Result<String> {
    let scope_id = scope_id.trim().to_string();
    if scope_id.is_empty() {
        return Err(ProvisionError::Configuration("scope identifier is empty".into()));
    }
    Ok(scope_id)
}

/// Builder for a [`ProvisioningClient`] over the HTTP transport
pub struct ProvisioningClientBuilder {
    scope_id: String,
    global_endpoint: String,
    base_url: Option<String>,
    timeout: Duration,
    user_agent: Option<String>,
    retry: RetryConfig,
}

impl ProvisioningClientBuilder {
    /// Create a new builder for `scope_id`
    #[must_use]
    pub fn new(scope_id: impl Into<String>) -> Self {
        Self {
            scope_id: scope_id.into(),
            global_endpoint: DEFAULT_GLOBAL_ENDPOINT.to_string(),
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            user_agent: None,
            retry: RetryConfig::default(),
        }
    }

    /// Set the global endpoint host
    #[must_use]
    pub fn global_endpoint(mut self, host: impl Into<String>) -> Self {
        self.global_endpoint = host.into();
        self
    }

    /// Override the full base URL (useful for testing)
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
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
        self.user_agent = Some(agent.into());
        self
    }

    /// Set retry configuration
    #[must_use]
    pub const fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Build the client
    pub fn build(self) -> Result<ProvisioningClient> {
        let endpoint = self.global_endpoint.trim();
        if self.base_url.is_none() && endpoint.is_empty() {
            return Err(ProvisionError::Configuration("global endpoint is empty".into()));
        }

        let base_url = self
            .base_url
            .unwrap_or_else(|| format!("https://{endpoint}"));
        let mut transport = HttpTransportBuilder::new(base_url).timeout(self.timeout);
        if let Some(agent) = self.user_agent {
            transport = transport.user_agent(agent);
        }
        let transport: HttpTransport = transport.build()?;
        debug!(base_url = %transport.base_url(), "provisioning client ready");

        ProvisioningClient::with_transport(self.scope_id, transport, self.retry)
    }
}
