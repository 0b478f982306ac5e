//! X.509 certificate attestation and device provisioning.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use certprov::{load_store, select_identity, CancellationToken, ProvisioningClient};
//!
//! #[tokio::main]
//! async fn main() -> certprov::Result<()> {
//!     // Load the device certificate and pick the first one with a private key
//!     let set = load_store("device.pfx", Some("1234")).await?;
//!     let identity = select_identity(set)?;
//!
//!     // Register with the provisioning service
//!     let client = ProvisioningClient::builder("0ne00000A0A").build()?;
//!     let mut session = client.session(identity)?;
//!     let result = session.run().await?;
//!
//!     println!("Status: {}", result.status);
//!     println!("Hub: {:?}", result.assigned_hub);
//!     println!("Final state: {}", session.state());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `default` - Uses rustls for TLS
//! - `rustls` - Use rustls for TLS (recommended)
//! - `native-tls` - Use system native TLS

#![doc(html_root_url = "https://docs.rs/certprov/0.3.0")]

// Re-export core types
pub use certprov_core::*;

// Re-export client
pub use certprov_client::{
    load_store, parse_store, select_first_with_key, select_identity, transport,
    CancellationToken, CertificateSet, HttpTransport, HttpTransportBuilder, IdentityHandle,
    PrivateKey, ProvisioningClient, ProvisioningClientBuilder, ProvisioningSession,
    ProvisioningTransport, RetryConfig, SharedTransport, SignatureAlgorithm, StoreFormat,
    DEFAULT_GLOBAL_ENDPOINT,
};

// Re-export runtime for convenience
pub use serde;
pub use serde_json;
pub use tokio;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facade_exposes_client_and_core() {
        let client = ProvisioningClient::builder("0ne00000A0A").build().unwrap();
        assert_eq!(client.scope_id(), "0ne00000A0A");
        assert_eq!(client.retry().max_retries, RetryConfig::default().max_retries);
        assert!(ErrorKind::TransientNetwork.is_retryable());
    }

    #[test]
    fn test_cancellation_token_from_facade() {
        let token = CancellationToken::new();
        let mut waiter = tokio_test::task::spawn(token.cancelled());
        tokio_test::assert_pending!(waiter.poll());
        token.cancel();
        tokio_test::assert_ready!(waiter.poll());
    }
}
