//! `certprov provision` - Register this device with the provisioning service.

use anyhow::Result;
use certprov::{
    select_identity, CancellationToken, ErrorKind, FailureReason, ProvisioningClient,
    ProvisioningResult, RetryConfig, SessionState,
};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info};

use super::inspect::CertificateRow;
use super::Context;
use crate::cli::args::ProvisionArgs;
use crate::education::Explain;
use crate::output::{print_csv, print_json, print_yaml, OutputFormat};

/// Everything a caller needs to know about one provisioning attempt.
#[derive(Debug, Serialize)]
struct ProvisionReport {
    scope_id: String,
    registration_id: String,
    thumbprint: String,
    state: SessionState,
    connect_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<ProvisioningResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<FailureReason>,
}

/// Flat view of a [`ProvisionReport`] for CSV.
#[derive(Serialize)]
struct ProvisionRow<'a> {
    scope_id: &'a str,
    registration_id: &'a str,
    thumbprint: &'a str,
    state: &'static str,
    status: String,
    assigned_hub: &'a str,
    device_id: &'a str,
    connect_attempts: u32,
    error_kind: String,
    error: &'a str,
}

impl<'a> From<&'a ProvisionReport> for ProvisionRow<'a> {
    fn from(report: &'a ProvisionReport) -> Self {
        let result = report.result.as_ref();
        let failure = report.error.as_ref().or_else(|| report.state.failure());
        Self {
            scope_id: &report.scope_id,
            registration_id: &report.registration_id,
            thumbprint: &report.thumbprint,
            state: report.state.name(),
            status: result.map(|r| r.status.to_string()).unwrap_or_default(),
            assigned_hub: result.and_then(|r| r.assigned_hub.as_deref()).unwrap_or_default(),
            device_id: result.and_then(|r| r.device_id.as_deref()).unwrap_or_default(),
            connect_attempts: report.connect_attempts,
            error_kind: failure.map(|f| f.kind.to_string()).unwrap_or_default(),
            error: failure.map(|f| f.message.as_str()).unwrap_or_default(),
        }
    }
}

pub async fn execute(ctx: Context, args: ProvisionArgs) -> Result<ExitCode> {
    let scope_id = require_scope(&ctx, &args)?;
    let path = ctx.certificate_path(&args.store)?;
    let endpoint = ctx.config.global_endpoint(args.endpoint.clone());
    let base_url = args
        .base_url
        .clone()
        .unwrap_or_else(|| format!("https://{}", endpoint.trim()));

    if ctx.explain {
        Explain::provision(&scope_id, &base_url, &path).print();
    }

    // Load and report every certificate before choosing one
    let set = ctx.load_store(&path, &args.store).await?;
    if ctx.output_format == OutputFormat::Pretty {
        for (index, record) in set.iter().enumerate() {
            let row = CertificateRow::new(index, record, false);
            println!(
                "{} {} {} {}",
                "Found certificate:".bold(),
                row.thumbprint.dimmed(),
                row.subject,
                if row.has_private_key { "(private key)".green() } else { "(no private key)".dimmed() }
            );
        }
    }

    let identity = select_identity(set)?;
    let registration_id = identity.registration_id().to_string();
    let thumbprint = identity.record().thumbprint.to_hex();
    if ctx.output_format == OutputFormat::Pretty {
        println!(
            "{} {} {}",
            "Using certificate:".bold(),
            thumbprint.dimmed(),
            identity.record().subject.cyan()
        );
    }

    let mut retry = RetryConfig::default();
    if let Some(max) = args.max_retries.or(ctx.config.max_retries) {
        retry = retry.max_retries(max);
    }
    let timeout = args.timeout.or(ctx.config.timeout_secs).unwrap_or(30);

    let client = ProvisioningClient::builder(scope_id.clone())
        .base_url(base_url)
        .timeout(Duration::from_secs(timeout))
        .retry(retry)
        .build()?;

    let cancel = CancellationToken::new();
    let ctrl_c = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, cancelling");
                cancel.cancel();
            }
        }
    });

    let spinner = ctx.interactive().then(|| {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Provisioning {registration_id} with scope {scope_id}..."));
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    });

    let mut session = client.session(identity)?.with_cancellation(cancel);
    let outcome = session.run().await;
    ctrl_c.abort();
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    debug!(state = %session.state(), attempts = session.connect_attempts(), "session finished");

    let report = ProvisionReport {
        scope_id,
        registration_id,
        thumbprint,
        state: session.state().clone(),
        connect_attempts: session.connect_attempts(),
        error: outcome.as_ref().err().map(FailureReason::from),
        result: outcome.ok(),
    };

    match ctx.output_format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Yaml => print_yaml(&report)?,
        OutputFormat::Csv => print_csv(&[ProvisionRow::from(&report)])?,
        OutputFormat::Pretty => print_pretty(&report),
    }

    Ok(ExitCode::from(exit_status(&report.state)))
}

/// Exit successfully only when the device was assigned.
const fn exit_status(state: &SessionState) -> u8 {
    match state {
        SessionState::Assigned => 0,
        SessionState::Cancelled => 130,
        _ => 1,
    }
}

fn require_scope(ctx: &Context, args: &ProvisionArgs) -> Result<String> {
    ctx.config.scope_id(args.scope_arg()).ok_or_else(|| {
        anyhow::anyhow!(
            "Scope identifier required.\n\n\
             Set it with one of:\n  \
             1. certprov provision <SCOPE>\n  \
             2. --scope <SCOPE> or the DPS_IDSCOPE environment variable\n  \
             3. certprov config set scope_id <SCOPE>"
        )
    })
}

fn print_pretty(report: &ProvisionReport) {
    println!();

    if let Some(result) = &report.result {
        let status = result.status.to_string();
        if result.is_assigned() {
            println!("{} {}", "Status:".bold(), status.green().bold());
        } else {
            println!("{} {}", "Status:".bold(), status.red().bold());
        }
        println!("  {} {}", "Registration ID:".bold(), result.registration_id);
        if let Some(hub) = &result.assigned_hub {
            println!("  {} {}", "Assigned hub:".bold(), hub.cyan());
        }
        if let Some(device) = &result.device_id {
            println!("  {} {}", "Device ID:".bold(), device);
        }
        if let Some(substatus) = &result.substatus {
            println!("  {} {}", "Substatus:".bold(), substatus);
        }
        if let Some(message) = &result.error_message {
            println!("  {} {}", "Message:".bold(), message.red());
        }
    }

    if let Some(error) = &report.error {
        let label = if matches!(report.state, SessionState::Cancelled) {
            "Cancelled:".yellow().bold()
        } else {
            "Failed:".red().bold()
        };
        println!("{label} {}", error.message);
        if error.is_retryable() {
            println!("{}", "This failure is transient; trying again later may succeed.".dimmed());
        } else if error.kind == ErrorKind::AuthenticationRejected {
            println!(
                "{}",
                "Check that an enrollment exists for this certificate and that it is enabled.".dimmed()
            );
        }
    }

    println!();
    println!(
        "{}",
        format!(
            "Final state: {} after {} connect attempt(s)",
            report.state.name(),
            report.connect_attempts
        )
        .dimmed()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use certprov::ProvisioningStatus;

    fn report(state: SessionState) -> ProvisionReport {
        ProvisionReport {
            scope_id: "0ne00000A0A".into(),
            registration_id: "device-1".into(),
            thumbprint: "AB".repeat(32),
            state,
            connect_attempts: 1,
            result: None,
            error: None,
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_status(&SessionState::Assigned), 0);
        assert_eq!(
            exit_status(&SessionState::Failed(FailureReason::new(
                ErrorKind::RegistrationRefused,
                "registration disabled"
            ))),
            1
        );
        assert_eq!(exit_status(&SessionState::Cancelled), 130);
    }

    #[test]
    fn test_csv_row_uses_state_failure_for_refused_registrations() {
        let mut report = report(SessionState::Failed(FailureReason::new(
            ErrorKind::RegistrationRefused,
            "registration disabled: enrollment disabled",
        )));
        report.result = Some(ProvisioningResult {
            registration_id: "device-1".into(),
            status: ProvisioningStatus::Disabled,
            assigned_hub: None,
            device_id: None,
            substatus: None,
            error_message: Some("enrollment disabled".into()),
            completed_at: chrono::Utc::now(),
        });

        let row = ProvisionRow::from(&report);
        assert_eq!(row.state, "failed");
        assert_eq!(row.status, "disabled");
        assert_eq!(row.error_kind, "registration_refused");
        assert_eq!(row.assigned_hub, "");
    }

    #[test]
    fn test_report_json_shape() {
        let mut report = report(SessionState::Failed(FailureReason::new(
            ErrorKind::AuthenticationRejected,
            "authentication rejected: 401 Unauthorized",
        )));
        report.error = report.state.failure().cloned();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["state"]["state"], "failed");
        assert_eq!(json["error"]["kind"], "authentication_rejected");
        assert!(json.get("result").is_none());
    }
}
