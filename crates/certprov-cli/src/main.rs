//! certprov - X.509 device provisioning CLI
//!
//! Registers a device with the provisioning service using the first
//! certificate in its store that carries a private key.

use anyhow::Result;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    certprov_cli::run().await
}
