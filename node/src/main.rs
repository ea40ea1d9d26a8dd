// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # COFFER Fund Node
//!
//! Entry point for the `coffer-node` binary. Parses CLI arguments,
//! initializes logging and metrics, assembles a devnet fund, and serves the
//! operator REST API.
//!
//! The binary supports two subcommands:
//!
//! - `run`     — start the fund node
//! - `version` — print build version information
//!
//! The devnet fund is entirely in-process: an in-memory asset book seeded
//! with demo balances, a static 1:1 price feed, and an open access gate.
//! Production deployments swap those collaborators for real adapters and
//! keep the same API surface.

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use coffer_ledger::factory::{FundFactory, FundSpec, ValuationChoice};
use coffer_ledger::gating::OpenGate;
use coffer_ledger::pricing::StaticFeed;
use coffer_ledger::token::{self, AssetBook};
use coffer_ledger::valuation::WatchedAsset;

use cli::{CofferNodeCli, Commands};
use logging::LogFormat;
use metrics::FundMetrics;

/// How often the devnet heartbeat re-publishes the static feed and refreshes
/// the queue gauges. Frequent enough that the 24h staleness window never
/// trips on an idle devnet.
const HEARTBEAT_SECS: u64 = 30;

/// Demo balance issued to each seeded devnet account, in smallest units of
/// the 6-decimal devnet asset (one million whole units each).
const DEVNET_SEED_BALANCE: u128 = 1_000_000_000_000;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CofferNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the fund node: assembles the devnet fund, then serves the REST API
/// and the metrics endpoint until shutdown.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "coffer_node=info,coffer_ledger=info,tower_http=debug",
        LogFormat::from_str_lossy(&args.log_format),
    );

    tracing::info!(
        fund = %args.fund_name,
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        license_fee_bps = args.license_fee_bps,
        "starting coffer-node"
    );

    // --- Devnet collaborators ---
    let asset = token::shared(AssetBook::new("cUSD", 6));
    for account in ["alice", "bob", "carol"] {
        asset
            .write()
            .issue(account, DEVNET_SEED_BALANCE)
            .expect("seeding a fresh book cannot overflow");
        tracing::info!(account, balance = DEVNET_SEED_BALANCE, "devnet balance seeded");
    }
    let feed = StaticFeed::new("cUSD/base", 1_000_000, 6);

    // --- Fund assembly ---
    let mut factory = FundFactory::new("coffer-treasury", args.license_fee_bps);
    let fund = factory
        .create_fund(FundSpec {
            name: args.fund_name.clone(),
            share_symbol: format!("{}-S", args.fund_name),
            custody_account: format!("{}:custody", args.fund_name),
            operator: format!("{}:operator", args.fund_name),
            executor: format!("{}:executor", args.fund_name),
            asset: asset.clone(),
            gating: Arc::new(OpenGate),
            valuation: ValuationChoice::FeedBased {
                watchlist: vec![WatchedAsset {
                    asset: "cUSD".into(),
                    book: asset.clone(),
                    feed: feed.clone(),
                }],
                include_executor: true,
            },
            license_fee_bps: None,
        })
        .context("failed to assemble the devnet fund")?;
    tracing::info!(fund = %fund.name, id = %fund.id, "fund assembled");

    // --- Metrics ---
    let fund_metrics = Arc::new(FundMetrics::new());

    // --- Application state ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        fund_name: fund.name.clone(),
        operator: fund.repository.read().operator().to_string(),
        repository: fund.repository.clone(),
        shares: fund.shares.clone(),
        keeper: fund.keeper.clone(),
        metrics: Arc::clone(&fund_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state.clone());
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&fund_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Devnet heartbeat ---
    // Re-publishes the static feed so its quote never goes stale on an idle
    // devnet, and keeps the queue gauges fresh for scrapes between API calls.
    let heartbeat_repo = fund.repository.clone();
    let heartbeat_metrics = Arc::clone(&fund_metrics);
    let heartbeat = tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(HEARTBEAT_SECS));
        loop {
            interval.tick().await;
            feed.set_price(1_000_000);

            let repo = heartbeat_repo.read();
            heartbeat_metrics
                .deposit_queue_depth
                .set(repo.deposit_queue().pending_len() as i64);
            heartbeat_metrics
                .withdrawal_queue_depth
                .set(repo.withdrawal_queue().pending_len() as i64);
            heartbeat_metrics
                .claimable_reserve
                .set(metrics::gauge_value(repo.total_queued_claimables()));
            heartbeat_metrics
                .nav
                .set(metrics::wad_to_f64(repo.last_known_nav().value));
            drop(repo);

            tracing::debug!("devnet heartbeat published");
        }
    });

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    heartbeat.abort();
    tracing::info!("coffer-node stopped");
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("coffer-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc       {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
