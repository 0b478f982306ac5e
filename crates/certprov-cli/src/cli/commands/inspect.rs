//! `certprov inspect` - List the certificates in a store.

use anyhow::Result;
use certprov::{select_first_with_key, CertificateRecord, CertificateSet};
use colored::Colorize;
use serde::Serialize;
use std::process::ExitCode;
use tabled::{settings::Style, Table, Tabled};

use super::Context;
use crate::cli::args::InspectArgs;
use crate::education::Explain;
use crate::output::{print_csv, print_json, print_yaml, OutputFormat};

#[derive(Tabled, Serialize)]
pub(crate) struct CertificateRow {
    #[tabled(rename = "#")]
    pub index: usize,
    #[tabled(rename = "Use", display_with = "selected_mark")]
    pub selected: bool,
    #[tabled(rename = "Subject")]
    pub subject: String,
    #[tabled(rename = "Thumbprint (SHA-256)")]
    pub thumbprint: String,
    #[tabled(rename = "Key", display_with = "yes_no")]
    pub has_private_key: bool,
    #[tabled(rename = "Expires")]
    pub not_after: String,
}

impl CertificateRow {
    pub(crate) fn new(index: usize, record: &CertificateRecord, selected: bool) -> Self {
        Self {
            index,
            selected,
            subject: record.subject.clone(),
            thumbprint: record.thumbprint.to_hex(),
            has_private_key: record.has_private_key,
            not_after: record.not_after.format("%Y-%m-%d").to_string(),
        }
    }
}

fn selected_mark(selected: &bool) -> String {
    if *selected { "*".to_string() } else { String::new() }
}

fn yes_no(value: &bool) -> String {
    if *value { "yes".to_string() } else { "no".to_string() }
}

#[derive(Serialize)]
struct InspectReport<'a> {
    store: String,
    certificates: Vec<&'a CertificateRecord>,
    selected: Option<usize>,
    registration_id: Option<&'a str>,
}

pub async fn execute(ctx: Context, args: InspectArgs) -> Result<ExitCode> {
    let path = ctx.certificate_path(&args.store)?;

    if ctx.explain {
        Explain::inspect(&path).print();
    }

    let set = ctx.load_store(&path, &args.store).await?;
    let selection = select_first_with_key(&set);
    let selected = selection.as_ref().ok().map(|(index, _)| *index);

    match ctx.output_format {
        OutputFormat::Json | OutputFormat::Yaml => {
            let report = InspectReport {
                store: path.display().to_string(),
                certificates: set.iter().collect(),
                selected,
                registration_id: selection.as_ref().ok().map(|(_, r)| r.registration_id()),
            };
            if ctx.output_format == OutputFormat::Json {
                print_json(&report)?;
            } else {
                print_yaml(&report)?;
            }
        }
        OutputFormat::Csv => {
            print_csv(&rows(&set, selected))?;
        }
        OutputFormat::Pretty => {
            print_pretty(&set, selected);
        }
    }

    match selection {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            if ctx.output_format == OutputFormat::Pretty {
                println!();
            }
            eprintln!("{} {err}", "Error:".red().bold());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn rows(set: &CertificateSet, selected: Option<usize>) -> Vec<CertificateRow> {
    set.iter()
        .enumerate()
        .map(|(index, record)| CertificateRow::new(index, record, selected == Some(index)))
        .collect()
}

fn print_pretty(set: &CertificateSet, selected: Option<usize>) {
    println!(
        "{} {} ({} certificate{})",
        "Certificate store:".bold(),
        set.origin().display().to_string().cyan(),
        set.len(),
        if set.len() == 1 { "" } else { "s" }
    );
    println!();

    let table = Table::new(rows(set, selected)).with(Style::rounded()).to_string();
    println!("{table}");

    if let Some(record) = selected.and_then(|i| set.get(i)) {
        println!();
        println!("  {} {}", "Selected:".bold(), record.subject);
        println!("  {} {}", "Registration ID:".bold(), record.registration_id().cyan());
        println!("  {} {}", "Issuer:".bold(), record.issuer);
        println!("  {} {}", "Serial:".bold(), record.serial);
        if record.is_expired() {
            println!(
                "  {} certificate is outside its validity window ({} - {})",
                "Warning:".yellow().bold(),
                record.not_before.format("%Y-%m-%d"),
                record.not_after.format("%Y-%m-%d")
            );
        }
    }
}
