//! Command implementations.

pub mod config;
pub mod inspect;
pub mod provision;

use anyhow::Result;
use certprov::{load_store, CertificateSet, StoreError};
use console::Term;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cli::args::StoreArgs;
use crate::config::Config;
use crate::output::OutputFormat;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Loaded config file (defaults if absent)
    pub config: Config,

    /// Explicit config file location, if given
    pub config_path: Option<PathBuf>,

    /// Output format
    pub output_format: OutputFormat,

    /// Whether to show educational explanations
    pub explain: bool,

    /// Verbose output
    pub verbose: bool,

    /// Disable colors
    pub no_color: bool,
}

impl Context {
    /// Resolve the certificate store path.
    pub fn certificate_path(&self, args: &StoreArgs) -> Result<PathBuf> {
        self.config.certificate_path(args.certificate.clone())
    }

    /// Load the certificate store, prompting once for the passphrase when allowed.
    pub async fn load_store(&self, path: &Path, args: &StoreArgs) -> Result<CertificateSet> {
        let passphrase = self.config.certificate_password(args.password.clone());

        match load_store(path, passphrase.as_deref()).await {
            Err(err) if err.needs_passphrase() && self.can_prompt(args) => {
                debug!(error = %err, "asking for certificate passphrase");
                let entered = dialoguer::Password::new()
                    .with_prompt(format!("Passphrase for {}", path.display()))
                    .allow_empty_password(true)
                    .interact()?;
                Ok(load_store(path, Some(&entered)).await.map_err(store_hint)?)
            }
            other => Ok(other.map_err(store_hint)?),
        }
    }

    fn can_prompt(&self, args: &StoreArgs) -> bool {
        args.prompt_password && Term::stderr().is_term()
    }

    /// Whether a spinner and colors make sense on this terminal.
    pub fn interactive(&self) -> bool {
        !self.output_format.is_machine_readable() && Term::stderr().is_term()
    }
}

/// Attach a fix-it hint to store errors.
fn store_hint(err: StoreError) -> anyhow::Error {
    let hint = match &err {
        StoreError::NotFound { .. } => {
            "Set the store with --certificate, DPS_X509_CERTIFICATE_PATH or \
             `certprov config set certificate_path <PATH>`"
        }
        StoreError::DecryptionFailed { .. } => {
            "Pass the passphrase with --password or DPS_X509_CERTIFICATE_PASSWORD, \
             or add --prompt-password"
        }
        StoreError::Unreadable { .. } => "Expected a PKCS#12 (.pfx/.p12) file or a PEM bundle",
    };
    anyhow::anyhow!("{err}\n\nHint: {hint}")
}
