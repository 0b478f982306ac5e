//! Certificate-based device provisioning.
//!
//! This crate turns a certificate container on disk into a provisioned
//! device:
//!
//! 1. [`load_store`] parses a PKCS#12 or PEM container into a [`CertificateSet`]
//! 2. [`select_identity`] picks the first certificate with a private key and
//!    wraps it in an [`IdentityHandle`]
//! 3. [`ProvisioningSession`] drives the attestation handshake over a
//!    [`ProvisioningTransport`] and yields a [`ProvisioningResult`]
//!
//! [`ProvisioningClient`] bundles the three steps for the common case.
//!
//! ```rust,ignore
//! use certprov_client::{CancellationToken, ProvisioningClient};
//!
//! let client = ProvisioningClient::builder("0ne00000A0A").build()?;
//! let result = client
//!     .provision_from_store("device.pfx", Some("1234"), &CancellationToken::new())
//!     .await?;
//! println!("assigned to {:?}", result.assigned_hub);
//! ```

#![doc(html_root_url = "https://docs.rs/certprov-client/0.3.0")]

mod cancel;
mod client;
mod config;
mod identity;
mod selector;
mod session;
mod store;
pub mod transport;

pub use cancel::CancellationToken;
pub use client::{ProvisioningClient, ProvisioningClientBuilder, SharedTransport, DEFAULT_GLOBAL_ENDPOINT};
pub use config::*;
pub use identity::{IdentityHandle, PrivateKey, SignatureAlgorithm};
pub use selector::{select_first_with_key, select_identity};
pub use session::ProvisioningSession;
pub use store::{load_store, parse_store, CertificateSet, StoreFormat};
pub use transport::{HttpTransport, HttpTransportBuilder, ProvisioningTransport};

pub use certprov_core::{ProvisionError, ProvisioningResult, Result, StoreError};
