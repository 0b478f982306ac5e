//! Core types and errors for X.509 device provisioning.
//!
//! This crate provides the foundational types shared across the certprov
//! workspace:
//!
//! - **Types**: certificate records, provisioning results and session states
//! - **Errors**: the provisioning error taxonomy with [`ProvisionError`] and
//!   [`StoreError`], classified by [`ErrorKind`]
//!
//! # Example
//!
//! ```rust,ignore
//! use certprov_core::{ProvisioningResult, ProvisioningStatus, Result};
//!
//! fn report(result: &ProvisioningResult) -> Result<()> {
//!     if result.status == ProvisioningStatus::Assigned {
//!         println!("{} -> {:?}", result.registration_id, result.assigned_hub);
//!     }
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/certprov-core/0.3.0")]

mod error;
pub mod types;

pub use error::{ErrorKind, ProvisionError, Result, StoreError};
pub use types::*;
