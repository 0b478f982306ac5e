//! Command-line argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::output::OutputFormat;

/// Provision a device with X.509 certificate attestation
///
/// Loads a PKCS#12 or PEM certificate store, picks the first certificate
/// that has a private key and registers the device with the provisioning
/// service. Use --explain on any command to learn what it does.
#[derive(Parser, Debug)]
#[command(name = "certprov")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, value_enum)]
    pub output: Option<OutputFormat>,

    /// Explain what this command does (educational mode)
    #[arg(long, global = true)]
    pub explain: bool,

    /// Increase verbosity (debug logs on stderr)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true, env = "CERTPROV_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register this device with the provisioning service
    Provision(ProvisionArgs),

    /// List the certificates in a store without touching the network
    Inspect(InspectArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),
}

// ============================================================================
// Certificate store arguments
// ============================================================================

#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// Certificate store (PKCS#12 or PEM) [default: device.pfx]
    #[arg(short = 'c', long, env = "DPS_X509_CERTIFICATE_PATH", value_name = "PATH")]
    pub certificate: Option<String>,

    /// Certificate store passphrase
    #[arg(short, long, env = "DPS_X509_CERTIFICATE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Ask for the passphrase if the store cannot be decrypted
    #[arg(long)]
    pub prompt_password: bool,
}

// ============================================================================
// Provision command
// ============================================================================

#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Scope identifier (same as --scope)
    #[arg(value_name = "SCOPE")]
    pub scope_positional: Option<String>,

    /// Scope identifier of the provisioning service
    #[arg(short, long, env = "DPS_IDSCOPE", value_name = "SCOPE")]
    pub scope: Option<String>,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Global endpoint host [default: global.azure-devices-provisioning.net]
    #[arg(short, long, env = "DPS_GLOBAL_ENDPOINT", value_name = "HOST")]
    pub endpoint: Option<String>,

    /// Full base URL of the service, overriding --endpoint
    #[arg(long, env = "CERTPROV_BASE_URL", value_name = "URL")]
    pub base_url: Option<String>,

    /// Connect retries after the first attempt [default: 3]
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Per-request timeout in seconds [default: 30]
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl ProvisionArgs {
    /// Scope given on the command line or in the environment
    pub fn scope_arg(&self) -> Option<String> {
        self.scope_positional.clone().or_else(|| self.scope.clone())
    }
}

// ============================================================================
// Inspect command
// ============================================================================

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(flatten)]
    pub store: StoreArgs,
}

// ============================================================================
// Config command
// ============================================================================

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Key to set (e.g., scope_id, certificate_path)
        key: String,

        /// Value to set
        value: String,
    },

    /// Remove a configuration value
    Unset {
        /// Key to remove
        key: String,
    },

    /// Show config file path
    Path,
}
