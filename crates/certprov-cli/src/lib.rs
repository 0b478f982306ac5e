//! # certprov-cli
//!
//! Command-line interface for X.509 device provisioning.
//!
//! ## Features
//!
//! - **Provisioning**: connect, prove possession of the device key, wait for assignment
//! - **Store inspection**: list certificates and see which one would be used
//! - **Educational mode**: `--explain` flag explains what commands do
//! - **Multiple output formats**: Pretty tables, JSON, CSV, YAML

pub mod cli;
pub mod config;
pub mod education;
pub mod logging;
pub mod output;

pub use cli::run;
