//! # CLI Interface
//!
//! Defines the command-line argument structure for `coffer-node` using
//! `clap` derive. Two subcommands: `run` and `version`.

use clap::{Parser, Subcommand};

/// COFFER fund operator node.
///
/// Runs one pooled-investment fund as a service: serves the deposit and
/// withdrawal queues over a REST API, settles bounded batches against the
/// fund's valuation strategy, and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "coffer-node",
    about = "COFFER fund operator node",
    version,
    propagate_version = true
)]
pub struct CofferNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the COFFER node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the fund node.
    Run(RunArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Name of the fund this node operates. Also seeds the share ticker
    /// (`<name>-S`).
    #[arg(long, env = "COFFER_FUND", default_value = "devnet-fund")]
    pub fund_name: String,

    /// Port for the REST API.
    #[arg(long, env = "COFFER_API_PORT", default_value_t = 8642)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "COFFER_METRICS_PORT", default_value_t = 8643)]
    pub metrics_port: u16,

    /// License fee charged on settled deposits, in basis points of the
    /// gross deposit amount.
    #[arg(
        long,
        env = "COFFER_LICENSE_FEE_BPS",
        default_value_t = coffer_ledger::config::DEFAULT_LICENSE_FEE_BPS
    )]
    pub license_fee_bps: u32,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "COFFER_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}
