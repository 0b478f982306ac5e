//! `certprov config` - CLI configuration management.

use anyhow::Result;
use colored::Colorize;
use std::process::ExitCode;

use super::Context;
use crate::cli::args::{ConfigArgs, ConfigCommands};
use crate::config::Config;
use crate::education::Explain;
use crate::output::{print_json, print_yaml, OutputFormat};

pub fn execute(ctx: Context, args: ConfigArgs) -> Result<ExitCode> {
    if ctx.explain {
        Explain::config().print();
    }

    match args.command {
        ConfigCommands::Show => show_config(&ctx)?,
        ConfigCommands::Set { key, value } => set_config(&ctx, &key, &value)?,
        ConfigCommands::Unset { key } => unset_config(&ctx, &key)?,
        ConfigCommands::Path => show_path(&ctx)?,
    }

    Ok(ExitCode::SUCCESS)
}

/// Copy of the config safe to print.
fn masked(config: &Config) -> Config {
    Config {
        certificate_password: config.certificate_password.as_ref().map(|_| "********".to_string()),
        ..config.clone()
    }
}

fn show_config(ctx: &Context) -> Result<()> {
    let config = masked(&ctx.config);

    match ctx.output_format {
        OutputFormat::Json => print_json(&config)?,
        OutputFormat::Yaml => print_yaml(&config)?,
        _ => {
            let unset = || "(not set)".dimmed().to_string();

            println!("{}", "Current Configuration:".bold());
            println!();
            println!("  {} {}", "scope_id:".bold(), config.scope_id.clone().unwrap_or_else(unset));
            println!(
                "  {} {}",
                "certificate_path:".bold(),
                config.certificate_path.clone().unwrap_or_else(unset)
            );
            println!(
                "  {} {}",
                "certificate_password:".bold(),
                config.certificate_password.clone().unwrap_or_else(unset)
            );
            println!(
                "  {} {}",
                "global_endpoint:".bold(),
                config.global_endpoint.clone().unwrap_or_else(unset)
            );
            println!(
                "  {} {}",
                "max_retries:".bold(),
                config.max_retries.map_or_else(unset, |n| n.to_string())
            );
            println!(
                "  {} {}",
                "timeout_secs:".bold(),
                config.timeout_secs.map_or_else(unset, |n| n.to_string())
            );
            println!(
                "  {} {}",
                "output_format:".bold(),
                config.output_format.unwrap_or_default()
            );
            println!("  {} {}", "explain_by_default:".bold(), config.explain_by_default);
        }
    }

    Ok(())
}

fn set_config(ctx: &Context, key: &str, value: &str) -> Result<()> {
    let mut config = ctx.config.clone();
    config.set(key, value)?;
    let path = config.save(ctx.config_path.as_deref())?;

    let shown = if key.contains("password") { "********" } else { value };
    println!("{} {} set to {}.", "Success:".green().bold(), key, shown.cyan());
    if ctx.verbose {
        println!("{}", format!("Saved to {}", path.display()).dimmed());
    }

    Ok(())
}

fn unset_config(ctx: &Context, key: &str) -> Result<()> {
    let mut config = ctx.config.clone();
    config.unset(key)?;
    config.save(ctx.config_path.as_deref())?;

    println!("{} {} removed.", "Success:".green().bold(), key);

    Ok(())
}

fn show_path(ctx: &Context) -> Result<()> {
    let path = Config::path(ctx.config_path.as_deref())?;
    println!("{}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_is_masked() {
        let config = Config {
            scope_id: Some("0ne00000A0A".into()),
            certificate_password: Some("1234".into()),
            ..Config::default()
        };
        let shown = masked(&config);
        assert_eq!(shown.certificate_password.as_deref(), Some("********"));
        assert_eq!(shown.scope_id, config.scope_id);
        assert_eq!(masked(&Config::default()).certificate_password, None);
    }
}
