//! Educational features: `--explain` walkthroughs of what a command does.

use colored::Colorize;
use std::path::Path;

/// Command explanation builder.
pub struct Explain {
    title: String,
    description: String,
    network: Vec<String>,
    key_handling: Option<String>,
    what_happens: Vec<String>,
    learn_more: Option<String>,
}

impl Explain {
    fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            description: String::new(),
            network: Vec::new(),
            key_handling: None,
            what_happens: Vec::new(),
            learn_more: None,
        }
    }

    fn description(mut self, desc: &str) -> Self {
        self.description = desc.to_string();
        self
    }

    fn request(mut self, call: &str) -> Self {
        self.network.push(call.to_string());
        self
    }

    fn keys(mut self, note: &str) -> Self {
        self.key_handling = Some(note.to_string());
        self
    }

    fn step(mut self, step: &str) -> Self {
        self.what_happens.push(step.to_string());
        self
    }

    fn docs(mut self, url: &str) -> Self {
        self.learn_more = Some(url.to_string());
        self
    }

    /// Print the explanation to stderr, keeping stdout for results.
    pub fn print(&self) {
        eprintln!();
        eprintln!("{}", format!("=== {} ===", self.title).bold().cyan());
        eprintln!("{}", self.description);
        eprintln!();

        if !self.what_happens.is_empty() {
            eprintln!("{}", "How it works:".bold());
            for (i, step) in self.what_happens.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, step);
            }
            eprintln!();
        }

        if self.network.is_empty() {
            eprintln!("{} {}", "Network:".bold(), "none - works offline".green());
        } else {
            eprintln!("{}", "Network:".bold());
            for call in &self.network {
                eprintln!("  {}", call.dimmed());
            }
        }

        if let Some(note) = &self.key_handling {
            eprintln!("{} {}", "Private key:".bold(), note);
        }

        if let Some(url) = &self.learn_more {
            eprintln!();
            eprintln!("{} {}", "Learn more:".bold(), url.cyan().underline());
        }

        eprintln!();
        eprintln!("{}", "=== Results ===".bold().cyan());
        eprintln!();
    }

    // ========================================================================
    // Factory methods for each command
    // ========================================================================

    pub fn provision(scope_id: &str, base_url: &str, certificate: &Path) -> Self {
        let base = base_url.trim_end_matches('/');
        Self::new("Provision")
            .description(&format!(
                "Registers this device under scope {scope_id} using the certificate in {}.",
                certificate.display()
            ))
            .step("Loads the certificate store and lists every certificate found")
            .step("Picks the first certificate that has a private key")
            .step("Opens a session and receives a random challenge (nonce)")
            .step("Signs the challenge and sends it with the certificate chain")
            .step("Waits for the service to assign the device to a hub")
            .request(&format!("POST {base}/{scope_id}/sessions"))
            .request(&format!("POST {base}/{scope_id}/sessions/{{id}}/attestation"))
            .request(&format!("POST {base}/{scope_id}/sessions/{{id}}/registration"))
            .keys("used for one signature, then zeroed in memory; it never leaves the device")
            .docs("https://learn.microsoft.com/azure/iot-dps/concepts-x509-attestation")
    }

    pub fn inspect(certificate: &Path) -> Self {
        Self::new("Inspect")
            .description(&format!(
                "Lists the certificates in {} and shows which one provisioning would use.",
                certificate.display()
            ))
            .step("Detects PKCS#12 or PEM from the file contents")
            .step("Matches private keys to certificates by public key")
            .step("Marks the first certificate with a private key as selected")
            .keys("decoded to check it matches, then zeroed; nothing is signed")
            .docs("https://learn.microsoft.com/azure/iot-dps/concepts-x509-attestation")
    }

    pub fn config() -> Self {
        Self::new("Configuration")
            .description("Reads or updates the certprov config file.")
            .step("Arguments override environment variables")
            .step("Environment variables override the config file")
            .step("The config file overrides built-in defaults")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provision_lists_endpoints_for_scope() {
        let explain = Explain::provision(
            "0ne00000A0A",
            "https://global.azure-devices-provisioning.net/",
            Path::new("device.pfx"),
        );
        assert_eq!(explain.network.len(), 3);
        assert_eq!(
            explain.network[0],
            "POST https://global.azure-devices-provisioning.net/0ne00000A0A/sessions"
        );
        assert!(explain.description.contains("device.pfx"));
    }

    #[test]
    fn test_inspect_is_offline() {
        assert!(Explain::inspect(Path::new("bundle.pem")).network.is_empty());
    }
}
