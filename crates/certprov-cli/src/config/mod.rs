//! Configuration management.
//!
//! Settings are resolved in this order: command-line argument, environment
//! variable (both handled by clap), config file, built-in default.

use anyhow::{Context as _, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::OutputFormat;

/// Certificate container used when nothing else is configured.
pub const DEFAULT_CERTIFICATE_PATH: &str = "device.pfx";

/// Keys accepted by `certprov config set` / `unset`, with a description.
pub const KEYS: &[(&str, &str)] = &[
    ("scope_id", "Scope identifier of the provisioning service"),
    ("certificate_path", "Path to the PKCS#12 or PEM certificate store"),
    ("certificate_password", "Passphrase for the certificate store"),
    ("global_endpoint", "Global provisioning endpoint host"),
    ("max_retries", "Connect retries after the first attempt"),
    ("timeout_secs", "Per-request timeout in seconds"),
    ("output_format", "Default output format (pretty/json/csv/yaml)"),
    ("explain_by_default", "Always explain commands (true/false)"),
];

/// CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Scope identifier.
    pub scope_id: Option<String>,

    /// Certificate store path.
    pub certificate_path: Option<String>,

    /// Certificate store passphrase.
    pub certificate_password: Option<String>,

    /// Global endpoint host.
    pub global_endpoint: Option<String>,

    /// Connect retry ceiling.
    pub max_retries: Option<u32>,

    /// Per-request timeout in seconds.
    pub timeout_secs: Option<u64>,

    /// Default output format.
    pub output_format: Option<OutputFormat>,

    /// Always show explanations (as if --explain was passed).
    #[serde(default)]
    pub explain_by_default: bool,
}

impl Config {
    /// Get the config file path, honoring an explicit override.
    pub fn path(custom: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = custom {
            return Ok(path.to_path_buf());
        }

        let dirs = ProjectDirs::from("net", "certprov", "certprov")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from file. A missing file yields the defaults.
    pub fn load(custom: Option<&Path>) -> Result<Self> {
        let path = Self::path(custom)?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to file.
    pub fn save(&self, custom: Option<&Path>) -> Result<PathBuf> {
        let path = Self::path(custom)?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(path)
    }

    /// Set `key` from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "scope_id" | "scope" => self.scope_id = Some(value.to_string()),
            "certificate_path" | "certificate" => self.certificate_path = Some(value.to_string()),
            "certificate_password" | "password" => {
                self.certificate_password = Some(value.to_string());
            }
            "global_endpoint" | "endpoint" => self.global_endpoint = Some(value.to_string()),
            "max_retries" => {
                self.max_retries = Some(
                    value
                        .parse()
                        .with_context(|| format!("max_retries must be a number, got {value:?}"))?,
                );
            }
            "timeout_secs" | "timeout" => {
                self.timeout_secs = Some(
                    value
                        .parse()
                        .with_context(|| format!("timeout_secs must be a number, got {value:?}"))?,
                );
            }
            "output_format" | "output" => self.output_format = Some(value.parse()?),
            "explain_by_default" | "explain" => {
                self.explain_by_default = value
                    .parse()
                    .with_context(|| format!("explain_by_default must be true or false, got {value:?}"))?;
            }
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }

    /// Reset `key` to its default.
    pub fn unset(&mut self, key: &str) -> Result<()> {
        match key {
            "scope_id" | "scope" => self.scope_id = None,
            "certificate_path" | "certificate" => self.certificate_path = None,
            "certificate_password" | "password" => self.certificate_password = None,
            "global_endpoint" | "endpoint" => self.global_endpoint = None,
            "max_retries" => self.max_retries = None,
            "timeout_secs" | "timeout" => self.timeout_secs = None,
            "output_format" | "output" => self.output_format = None,
            "explain_by_default" | "explain" => self.explain_by_default = false,
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }

    /// Scope identifier: argument/environment first, then the config file.
    pub fn scope_id(&self, arg: Option<String>) -> Option<String> {
        arg.or_else(|| self.scope_id.clone())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Certificate store path, with `~` and environment variables expanded.
    pub fn certificate_path(&self, arg: Option<String>) -> Result<PathBuf> {
        let raw = arg
            .or_else(|| self.certificate_path.clone())
            .unwrap_or_else(|| DEFAULT_CERTIFICATE_PATH.to_string());
        let expanded = shellexpand::full(&raw)
            .with_context(|| format!("could not expand certificate path {raw:?}"))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }

    /// Certificate store passphrase, if any is configured.
    pub fn certificate_password(&self, arg: Option<String>) -> Option<String> {
        arg.or_else(|| self.certificate_password.clone())
    }

    /// Global endpoint host, falling back to the public default.
    pub fn global_endpoint(&self, arg: Option<String>) -> String {
        arg.or_else(|| self.global_endpoint.clone())
            .unwrap_or_else(|| certprov::DEFAULT_GLOBAL_ENDPOINT.to_string())
    }
}

fn unknown_key(key: &str) -> anyhow::Error {
    let keys = KEYS
        .iter()
        .map(|(name, desc)| format!("  {name:<22}- {desc}"))
        .collect::<Vec<_>>()
        .join("\n");
    anyhow::anyhow!("Unknown config key: {key}\n\nAvailable keys:\n{keys}")
}
