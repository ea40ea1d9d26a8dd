//! # Prometheus Metrics
//!
//! Exposes operational metrics for the fund node. Scraped by Prometheus at
//! the `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
///
/// Clone-friendly (wraps `Arc` internally via prometheus handles) so it can
/// be shared across request handlers and background tasks.
#[derive(Clone)]
pub struct FundMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Total number of deposit requests enqueued through this node.
    pub deposits_enqueued_total: IntCounter,
    /// Total number of withdrawal requests enqueued through this node.
    pub withdrawals_enqueued_total: IntCounter,
    /// Total number of deposit entries settled (minted or refunded).
    pub deposits_settled_total: IntCounter,
    /// Total number of withdrawal entries settled (paid out or returned).
    pub withdrawals_settled_total: IntCounter,
    /// Total number of claimable balances redeemed.
    pub claimables_redeemed_total: IntCounter,
    /// Pending entries in the deposit queue.
    pub deposit_queue_depth: IntGauge,
    /// Pending entries in the withdrawal queue.
    pub withdrawal_queue_depth: IntGauge,
    /// Asset units currently owed across all claimable accounts.
    pub claimable_reserve: IntGauge,
    /// Last successfully computed NAV, in base-currency units per share.
    pub nav: Gauge,
    /// Histogram of settlement batch latency in seconds.
    pub settlement_batch_seconds: Histogram,
}

impl FundMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("coffer".into()), None)
            .expect("failed to create prometheus registry");

        let deposits_enqueued_total = IntCounter::new(
            "deposits_enqueued_total",
            "Total deposit requests enqueued",
        )
        .expect("metric creation");
        registry
            .register(Box::new(deposits_enqueued_total.clone()))
            .expect("metric registration");

        let withdrawals_enqueued_total = IntCounter::new(
            "withdrawals_enqueued_total",
            "Total withdrawal requests enqueued",
        )
        .expect("metric creation");
        registry
            .register(Box::new(withdrawals_enqueued_total.clone()))
            .expect("metric registration");

        let deposits_settled_total = IntCounter::new(
            "deposits_settled_total",
            "Total deposit entries settled (minted or refunded)",
        )
        .expect("metric creation");
        registry
            .register(Box::new(deposits_settled_total.clone()))
            .expect("metric registration");

        let withdrawals_settled_total = IntCounter::new(
            "withdrawals_settled_total",
            "Total withdrawal entries settled (paid out or returned)",
        )
        .expect("metric creation");
        registry
            .register(Box::new(withdrawals_settled_total.clone()))
            .expect("metric registration");

        let claimables_redeemed_total = IntCounter::new(
            "claimables_redeemed_total",
            "Total claimable balances redeemed",
        )
        .expect("metric creation");
        registry
            .register(Box::new(claimables_redeemed_total.clone()))
            .expect("metric registration");

        let deposit_queue_depth = IntGauge::new(
            "deposit_queue_depth",
            "Pending entries in the deposit queue",
        )
        .expect("metric creation");
        registry
            .register(Box::new(deposit_queue_depth.clone()))
            .expect("metric registration");

        let withdrawal_queue_depth = IntGauge::new(
            "withdrawal_queue_depth",
            "Pending entries in the withdrawal queue",
        )
        .expect("metric creation");
        registry
            .register(Box::new(withdrawal_queue_depth.clone()))
            .expect("metric registration");

        let claimable_reserve = IntGauge::new(
            "claimable_reserve",
            "Asset units owed across all claimable accounts",
        )
        .expect("metric creation");
        registry
            .register(Box::new(claimable_reserve.clone()))
            .expect("metric registration");

        let nav = Gauge::new(
            "nav",
            "Last successfully computed NAV in base-currency units per share",
        )
        .expect("metric creation");
        registry
            .register(Box::new(nav.clone()))
            .expect("metric registration");

        let settlement_batch_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "settlement_batch_seconds",
                "Settlement batch processing latency in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(settlement_batch_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            deposits_enqueued_total,
            withdrawals_enqueued_total,
            deposits_settled_total,
            withdrawals_settled_total,
            claimables_redeemed_total,
            deposit_queue_depth,
            withdrawal_queue_depth,
            claimable_reserve,
            nav,
            settlement_batch_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

impl Default for FundMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers via extension.
pub type SharedMetrics = Arc<FundMetrics>;

/// Clamps a ledger amount into the `i64` range an IntGauge can carry.
pub fn gauge_value(amount: u128) -> i64 {
    amount.min(i64::MAX as u128) as i64
}

/// Converts a WAD-scaled figure into the float a Gauge exposes. Observability
/// only — monetary arithmetic never leaves `u128`.
pub fn wad_to_f64(value: u128) -> f64 {
    value as f64 / 1e18
}

/// Axum handler that renders `/metrics` in Prometheus text format.
///
/// Returns HTTP 500 if encoding fails (should never happen in practice).
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
