//! # REST API
//!
//! Builds the axum router that exposes one fund's operator surface over
//! HTTP. All endpoints share application state through axum's `State`
//! extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                   | Description                            |
//! |--------|------------------------|----------------------------------------|
//! | GET    | `/health`              | Liveness probe                         |
//! | GET    | `/status`              | Fund status summary                    |
//! | GET    | `/nav`                 | Current NAV (may fail with 409)        |
//! | GET    | `/aum`                 | Current AUM (may fail with 409)        |
//! | GET    | `/queue/deposits`      | Deposit queue, history included        |
//! | GET    | `/queue/withdrawals`   | Withdrawal queue, history included     |
//! | GET    | `/claimable/:account`  | One account's claimable balance        |
//! | POST   | `/deposits`            | Enqueue a deposit                      |
//! | POST   | `/withdrawals`         | Enqueue a withdrawal                   |
//! | DELETE | `/deposits/:id`        | Cancel a pending deposit               |
//! | DELETE | `/withdrawals/:id`     | Cancel a pending withdrawal            |
//! | POST   | `/settle/deposits`     | Settle a bounded deposit batch         |
//! | POST   | `/settle/withdrawals`  | Settle a bounded withdrawal batch      |
//! | POST   | `/claimable/redeem`    | Delegated claimable payout             |
//! | POST   | `/executor/move`       | Move pool funds to the executor        |
//! | POST   | `/executor/recall`     | Recall funds from the executor         |
//! | POST   | `/marks`               | Record a valuation mark (attested)     |
//!
//! ## Error Mapping
//!
//! The ledger's error taxonomy maps onto HTTP statuses: input validation →
//! 400, access control → 403, valuation failures → 409, invariant guards →
//! 422. Unknown queue ids are 404.

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use coffer_ledger::factory::KeeperHandle;
use coffer_ledger::repository::{QueueEntry, QueueError, Repository, RepositoryError};
use coffer_ledger::shares::SharedShareToken;
use coffer_ledger::valuation::{Mark, Valuation};

use crate::metrics::{gauge_value, wad_to_f64, SharedMetrics};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone — everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// Name of the fund this node operates.
    pub fund_name: String,
    /// The operator account the node settles and cancels as.
    pub operator: String,
    /// The fund's settlement engine.
    pub repository: Arc<RwLock<Repository>>,
    /// The fund's share token, for supply reads.
    pub shares: SharedShareToken,
    /// Strategy-typed keeper handle, for mark pushes.
    pub keeper: KeeperHandle,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
}

impl AppState {
    /// Pushes the fund's current queue depths and reserves into the gauges.
    fn refresh_gauges(&self) {
        let repo = self.repository.read();
        self.metrics
            .deposit_queue_depth
            .set(repo.deposit_queue().pending_len() as i64);
        self.metrics
            .withdrawal_queue_depth
            .set(repo.withdrawal_queue().pending_len() as i64);
        self.metrics
            .claimable_reserve
            .set(gauge_value(repo.total_queued_claimables()));
        self.metrics.nav.set(wad_to_f64(repo.last_known_nav().value));
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
///
/// The returned router is ready to be served on the configured API port.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/nav", get(nav_handler))
        .route("/aum", get(aum_handler))
        .route("/queue/deposits", get(deposit_queue_handler))
        .route("/queue/withdrawals", get(withdrawal_queue_handler))
        .route("/claimable/:account", get(claimable_handler))
        .route("/deposits", post(enqueue_deposit_handler))
        .route("/withdrawals", post(enqueue_withdrawal_handler))
        .route("/deposits/:id", delete(cancel_deposit_handler))
        .route("/withdrawals/:id", delete(cancel_withdrawal_handler))
        .route("/settle/deposits", post(settle_deposits_handler))
        .route("/settle/withdrawals", post(settle_withdrawals_handler))
        .route("/claimable/redeem", post(redeem_handler))
        .route("/executor/move", post(executor_move_handler))
        .route("/executor/recall", post(executor_recall_handler))
        .route("/marks", post(record_mark_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Node software version.
    pub version: String,
    /// The operated fund's name.
    pub fund: String,
    /// Outstanding share supply, in WAD units.
    pub share_supply: u128,
    /// Custody balance of the deposit asset, in smallest units.
    pub asset_balance: u128,
    /// Asset units parked by pending deposits.
    pub queued_deposits: u128,
    /// Share units escrowed by pending withdrawals.
    pub queued_withdrawals: u128,
    /// Asset units owed across all claimable accounts.
    pub queued_claimables: u128,
    /// Pending entries in the deposit queue.
    pub deposit_queue_depth: usize,
    /// Pending entries in the withdrawal queue.
    pub withdrawal_queue_depth: usize,
    /// Last successfully computed NAV.
    pub last_known_nav: Valuation,
    /// Last successfully computed AUM.
    pub last_known_aum: Valuation,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// Snapshot of one request queue.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueueResponse {
    /// Next free slot.
    pub head: u64,
    /// Next index settlement will look at.
    pub cursor: u64,
    /// Number of pending entries.
    pub pending: usize,
    /// Every entry, settled and cancelled history included.
    pub entries: Vec<QueueEntry>,
}

/// Request body for `POST /deposits`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DepositRequest {
    /// The depositing account.
    pub account: String,
    /// Deposit amount in smallest asset units.
    pub amount: u128,
    /// Slippage guard: minimum acceptable shares, WAD units.
    #[serde(default)]
    pub min_shares_out: u128,
}

/// Request body for `POST /withdrawals`.
#[derive(Debug, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    /// The withdrawing holder.
    pub account: String,
    /// Shares to redeem, WAD units.
    pub shares: u128,
    /// Slippage guard: minimum acceptable payout, smallest asset units.
    #[serde(default)]
    pub min_asset_out: u128,
}

/// Response for a successful enqueue.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    /// The new entry's queue id.
    pub id: u64,
}

/// Request body for the settlement endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct SettleRequest {
    /// Maximum number of entries to settle in this batch.
    pub limit: usize,
}

/// Request body for `POST /claimable/redeem`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RedeemRequest {
    /// Accounts to pay out, each with a non-zero claimable balance.
    pub accounts: Vec<String>,
}

/// Response for `POST /claimable/redeem`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RedeemResponse {
    /// Total asset units paid out.
    pub total: u128,
}

/// Request body for the executor endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExecutorMoveRequest {
    /// Amount to move, in smallest asset units.
    pub amount: u128,
}

/// Request body for `POST /marks`.
#[derive(Debug, Serialize, Deserialize)]
pub struct MarkRequest {
    /// Attested total pool value, WAD-scaled.
    pub aum: u128,
    /// Attested per-share value, WAD-scaled.
    pub nav: u128,
    /// When the attestor observed the fund. Defaults to now.
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
    /// How long past `as_of` the mark may be served, in seconds.
    pub validity_window_secs: u64,
}

/// One account's claimable balance.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimableResponse {
    /// The queried account.
    pub account: String,
    /// Asset units owed.
    pub amount: u128,
}

/// Generic error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Error Mapping
// ---------------------------------------------------------------------------

/// Maps the ledger's error taxonomy onto HTTP statuses and wraps the message
/// in the JSON error envelope.
fn error_response(err: RepositoryError) -> Response {
    let status = match &err {
        RepositoryError::ZeroAmount
        | RepositoryError::BatchLimitExceeded { .. }
        | RepositoryError::InvalidAmount(_)
        | RepositoryError::LicenseFeeTooHigh { .. } => StatusCode::BAD_REQUEST,
        RepositoryError::NotPermittedToDeposit(_)
        | RepositoryError::NotOperator(_)
        | RepositoryError::NotOperatorOrExecutor(_) => StatusCode::FORBIDDEN,
        RepositoryError::Valuation(_) => StatusCode::CONFLICT,
        RepositoryError::Queue(QueueError::UnknownEntry(_)) => StatusCode::NOT_FOUND,
        RepositoryError::Queue(_) => StatusCode::CONFLICT,
        RepositoryError::InsufficientLocalBalanceToTransfer { .. }
        | RepositoryError::InsufficientLocalFundsToProcessRedemption { .. }
        | RepositoryError::Token(_)
        | RepositoryError::Share(_)
        | RepositoryError::Math(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the node is alive.
///
/// This is the liveness probe for orchestrators. It intentionally does not
/// check valuation health — that belongs to `/nav` and `/status`.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` — fund status summary.
///
/// Always answers, even when the valuation strategy is failing: the NAV and
/// AUM figures here are the non-failing `last_known` reads.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let repo = state.repository.read();
    let resp = StatusResponse {
        version: state.version.clone(),
        fund: state.fund_name.clone(),
        share_supply: state.shares.read().total_supply(),
        asset_balance: repo.asset_balance(),
        queued_deposits: repo.total_queued_deposits(),
        queued_withdrawals: repo.total_queued_withdrawals(),
        queued_claimables: repo.total_queued_claimables(),
        deposit_queue_depth: repo.deposit_queue().pending_len(),
        withdrawal_queue_depth: repo.withdrawal_queue().pending_len(),
        last_known_nav: repo.last_known_nav(),
        last_known_aum: repo.last_known_aum(),
        timestamp: Utc::now().to_rfc3339(),
    };
    Json(resp)
}

/// `GET /nav` — the current NAV, freshly computed.
///
/// Fails 409 when the valuation strategy cannot be trusted (stale feed,
/// expired mark, missing registry entry).
async fn nav_handler(State(state): State<AppState>) -> Response {
    match state.repository.read().nav() {
        Ok(valuation) => {
            state.metrics.nav.set(wad_to_f64(valuation.value));
            (StatusCode::OK, Json(valuation)).into_response()
        }
        Err(err) => error_response(err),
    }
}

/// `GET /aum` — the current AUM, freshly computed. Fails 409 like `/nav`.
async fn aum_handler(State(state): State<AppState>) -> Response {
    match state.repository.read().aum() {
        Ok(valuation) => (StatusCode::OK, Json(valuation)).into_response(),
        Err(err) => error_response(err),
    }
}

/// `GET /queue/deposits` — the deposit queue, history included.
async fn deposit_queue_handler(State(state): State<AppState>) -> impl IntoResponse {
    let repo = state.repository.read();
    let queue = repo.deposit_queue();
    Json(QueueResponse {
        head: queue.head(),
        cursor: queue.cursor(),
        pending: queue.pending_len(),
        entries: queue.entries().to_vec(),
    })
}

/// `GET /queue/withdrawals` — the withdrawal queue, history included.
async fn withdrawal_queue_handler(State(state): State<AppState>) -> impl IntoResponse {
    let repo = state.repository.read();
    let queue = repo.withdrawal_queue();
    Json(QueueResponse {
        head: queue.head(),
        cursor: queue.cursor(),
        pending: queue.pending_len(),
        entries: queue.entries().to_vec(),
    })
}

/// `GET /claimable/:account` — one account's claimable balance.
async fn claimable_handler(
    Path(account): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let amount = state.repository.read().claimable_of(&account);
    Json(ClaimableResponse { account, amount })
}

/// `POST /deposits` — enqueue a deposit for the given account.
async fn enqueue_deposit_handler(
    State(state): State<AppState>,
    Json(req): Json<DepositRequest>,
) -> Response {
    let result =
        state
            .repository
            .write()
            .enqueue_deposit(&req.account, req.amount, req.min_shares_out);
    match result {
        Ok(id) => {
            state.metrics.deposits_enqueued_total.inc();
            state.refresh_gauges();
            (StatusCode::OK, Json(EnqueueResponse { id })).into_response()
        }
        Err(err) => error_response(err),
    }
}

/// `POST /withdrawals` — enqueue a withdrawal for the given holder.
async fn enqueue_withdrawal_handler(
    State(state): State<AppState>,
    Json(req): Json<WithdrawalRequest>,
) -> Response {
    let result =
        state
            .repository
            .write()
            .enqueue_withdrawal(&req.account, req.shares, req.min_asset_out);
    match result {
        Ok(id) => {
            state.metrics.withdrawals_enqueued_total.inc();
            state.refresh_gauges();
            (StatusCode::OK, Json(EnqueueResponse { id })).into_response()
        }
        Err(err) => error_response(err),
    }
}

/// `DELETE /deposits/:id` — cancel a pending deposit as the operator.
async fn cancel_deposit_handler(Path(id): Path<u64>, State(state): State<AppState>) -> Response {
    let result = state
        .repository
        .write()
        .remove_deposit_from_queue(&state.operator, id);
    match result {
        Ok(()) => {
            state.refresh_gauges();
            StatusCode::OK.into_response()
        }
        Err(err) => error_response(err),
    }
}

/// `DELETE /withdrawals/:id` — cancel a pending withdrawal as the operator.
async fn cancel_withdrawal_handler(Path(id): Path<u64>, State(state): State<AppState>) -> Response {
    let result = state
        .repository
        .write()
        .remove_withdrawal_from_queue(&state.operator, id);
    match result {
        Ok(()) => {
            state.refresh_gauges();
            StatusCode::OK.into_response()
        }
        Err(err) => error_response(err),
    }
}

/// `POST /settle/deposits` — settle a bounded deposit batch as the operator.
async fn settle_deposits_handler(
    State(state): State<AppState>,
    Json(req): Json<SettleRequest>,
) -> Response {
    let timer = state.metrics.settlement_batch_seconds.start_timer();
    let result = state
        .repository
        .write()
        .settle_deposits(&state.operator, req.limit);
    timer.observe_duration();

    match result {
        Ok(report) => {
            state.metrics.deposits_settled_total.inc_by(report.settled as u64);
            state.refresh_gauges();
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(err) => error_response(err),
    }
}

/// `POST /settle/withdrawals` — settle a bounded withdrawal batch as the
/// operator.
async fn settle_withdrawals_handler(
    State(state): State<AppState>,
    Json(req): Json<SettleRequest>,
) -> Response {
    let timer = state.metrics.settlement_batch_seconds.start_timer();
    let result = state
        .repository
        .write()
        .settle_withdrawals(&state.operator, req.limit);
    timer.observe_duration();

    match result {
        Ok(report) => {
            state
                .metrics
                .withdrawals_settled_total
                .inc_by(report.settled as u64);
            state.refresh_gauges();
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(err) => error_response(err),
    }
}

/// `POST /claimable/redeem` — delegated claimable payout.
///
/// The whole batch is pre-validated by the ledger: a zero balance or a
/// duplicate anywhere rejects everything, so callers must pre-filter.
async fn redeem_handler(
    State(state): State<AppState>,
    Json(req): Json<RedeemRequest>,
) -> Response {
    let result = state
        .repository
        .write()
        .redeem_claimable_delegated(&state.operator, &req.accounts);
    match result {
        Ok(total) => {
            state
                .metrics
                .claimables_redeemed_total
                .inc_by(req.accounts.len() as u64);
            state.refresh_gauges();
            (StatusCode::OK, Json(RedeemResponse { total })).into_response()
        }
        Err(err) => error_response(err),
    }
}

/// `POST /executor/move` — deploy pool funds to the executor account.
async fn executor_move_handler(
    State(state): State<AppState>,
    Json(req): Json<ExecutorMoveRequest>,
) -> Response {
    let result = state
        .repository
        .write()
        .move_funds_to_executor(&state.operator, req.amount);
    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => error_response(err),
    }
}

/// `POST /executor/recall` — return funds from the executor account.
async fn executor_recall_handler(
    State(state): State<AppState>,
    Json(req): Json<ExecutorMoveRequest>,
) -> Response {
    let result = state
        .repository
        .write()
        .recall_funds_from_executor(&state.operator, req.amount);
    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => error_response(err),
    }
}

/// `POST /marks` — record an operator-pushed valuation mark.
///
/// Only meaningful for a fund assembled with the attested strategy; any
/// other strategy answers 409.
async fn record_mark_handler(
    State(state): State<AppState>,
    Json(req): Json<MarkRequest>,
) -> Response {
    let keeper = match &state.keeper {
        KeeperHandle::Attested(keeper) => keeper,
        _ => {
            return (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: "fund does not use operator-pushed marks".into(),
                }),
            )
                .into_response();
        }
    };

    let mark = Mark {
        aum: req.aum,
        nav: req.nav,
        as_of: req.as_of.unwrap_or_else(Utc::now),
        validity_window: Duration::from_secs(req.validity_window_secs),
    };
    match keeper.write().record_mark(mark) {
        Ok(()) => {
            state.metrics.nav.set(wad_to_f64(req.nav));
            StatusCode::OK.into_response()
        }
        Err(err) => error_response(RepositoryError::Valuation(err)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
