//! # The Settlement Engine
//!
//! Single-owner, serialized, atomic-per-call: every entry method either runs
//! to completion or leaves no trace. Failure modes that depend on external
//! state (a bad price, an over-drawn pool) are checked in a planning pass
//! before the first mutation, so a failed settlement batch leaves the queue
//! exactly as it found it and a retry after remediation just works.
//!
//! ## Conservation
//!
//! Three running aggregates mirror sums the queues could recompute:
//!
//! - `total_queued_deposits` — asset units parked by pending deposits
//! - `total_queued_withdrawals` — share units escrowed by pending withdrawals
//! - `total_queued_claimables` — asset units owed to claimable accounts
//!
//! The custody balance must always cover `deposits + claimables`; the only
//! asset allowed to leave custody beyond that margin is an explicit executor
//! move, which is guarded by the same inequality. The asset-denominated pair
//! lives in a shared [`Reservations`] handle so the mark-to-market book
//! keeper can net parked user funds out of pool value. [`Repository::audit`]
//! recomputes every aggregate the slow way and is the hook the invariant
//! tests lean on.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;

use crate::config::{MAX_BATCH_SIZE, MAX_LICENSE_FEE_BPS};
use crate::gating::SharedGating;
use crate::math::{self, MathError};
use crate::repository::queue::{EntryStatus, QueueError, RequestQueue};
use crate::shares::{ShareError, SharedShareToken};
use crate::token::{SharedAssetBook, TokenError};
use crate::valuation::{SharedBookKeeper, Valuation, ValuationError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from repository operations. Input validation and access control
/// reject before any state change; valuation failures abort a whole
/// settlement batch untouched; invariant guards abort the call with no
/// partial transfer.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Zero-amount requests are no-ops and indicate a caller bug.
    #[error("zero-amount requests are not permitted")]
    ZeroAmount,

    /// The requested batch limit exceeds the protocol ceiling.
    #[error("batch size {requested} exceeds the maximum of {max}")]
    BatchLimitExceeded {
        /// What the caller asked for.
        requested: usize,
        /// The protocol ceiling.
        max: usize,
    },

    /// The gating collaborator refused the depositor.
    #[error("account is not permitted to deposit: {0}")]
    NotPermittedToDeposit(String),

    /// The caller is not the operator.
    #[error("operator-only operation attempted by {0}")]
    NotOperator(String),

    /// The caller is neither the operator nor the executor.
    #[error("operator- or executor-only operation attempted by {0}")]
    NotOperatorOrExecutor(String),

    /// A claimable redemption or forced withdrawal named an account with
    /// nothing to pay out (including a duplicate already drained earlier in
    /// the same batch).
    #[error("invalid amount: account {0} has no balance to process")]
    InvalidAmount(String),

    /// Moving funds out would leave custody unable to cover queued deposits
    /// and claimables.
    #[error(
        "insufficient local balance to transfer: balance {balance}, reserved {reserved}, requested {requested}"
    )]
    InsufficientLocalBalanceToTransfer {
        /// Current custody balance.
        balance: u128,
        /// Queued deposits plus claimables that must stay covered.
        reserved: u128,
        /// The outbound amount that was refused.
        requested: u128,
    },

    /// A withdrawal settlement would dip into funds reserved for queued
    /// deposits and existing claimables.
    #[error(
        "insufficient local funds to process redemption: balance {balance}, required {required}"
    )]
    InsufficientLocalFundsToProcessRedemption {
        /// Current custody balance.
        balance: u128,
        /// Reserved funds plus the payouts planned so far in this batch.
        required: u128,
    },

    /// Queue bookkeeping failed (unknown id, entry not pending).
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// An asset-book operation failed.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// A share-token operation failed.
    #[error(transparent)]
    Share(#[from] ShareError),

    /// The valuation read backing a settlement batch failed.
    #[error(transparent)]
    Valuation(#[from] ValuationError),

    /// Fixed-point arithmetic failed.
    #[error(transparent)]
    Math(#[from] MathError),

    /// The configured license fee exceeds the protocol cap.
    #[error("license fee {bps} bps exceeds the cap of {MAX_LICENSE_FEE_BPS} bps")]
    LicenseFeeTooHigh {
        /// The offending configuration value.
        bps: u32,
    },
}

// ---------------------------------------------------------------------------
// Configuration & Reports
// ---------------------------------------------------------------------------

/// Account wiring and fee policy for one repository.
#[derive(Clone, Debug, Serialize)]
pub struct RepositoryConfig {
    /// The custody account holding the pool's deposit asset and escrowed
    /// shares. Also the share token's mint/burn authority.
    pub account: String,
    /// The account allowed to settle, cancel, and move funds.
    pub operator: String,
    /// The external holding/trading account funds may move to and from.
    pub executor: String,
    /// Recipient of the license fee taken on settled deposits.
    pub fee_recipient: String,
    /// License fee in basis points of the gross deposit amount.
    pub license_fee_bps: u32,
}

/// Outcome of one `settle_deposits` call.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DepositSettlement {
    /// Entries settled in this batch.
    pub settled: usize,
    /// Entries whose shares were minted.
    pub minted: usize,
    /// Entries refunded into claimables by the `min_shares_out` guard.
    pub refunded: usize,
    /// Total shares minted.
    pub shares_minted: u128,
    /// Total license fees paid, in asset units.
    pub fees_paid: u128,
    /// The WAD NAV every entry in the batch was priced at.
    pub nav: u128,
}

/// Outcome of one `settle_withdrawals` call.
#[derive(Clone, Debug, Default, Serialize)]
pub struct WithdrawalSettlement {
    /// Entries settled in this batch.
    pub settled: usize,
    /// Entries credited to claimables.
    pub paid_out: usize,
    /// Entries whose shares were returned by the `min_asset_out` guard.
    pub returned: usize,
    /// Total asset units credited to claimables.
    pub asset_owed: u128,
    /// Total shares burned.
    pub shares_burned: u128,
    /// The WAD NAV every entry in the batch was priced at.
    pub nav: u128,
}

/// Slow-path recomputation of every aggregate, for invariant checking.
#[derive(Clone, Debug, Serialize)]
pub struct AuditReport {
    /// Custody balance of the deposit asset.
    pub balance: u128,
    /// Sum over pending deposit entries.
    pub recomputed_queued_deposits: u128,
    /// Sum over pending withdrawal entries (share units).
    pub recomputed_queued_withdrawals: u128,
    /// Sum over the claimables map.
    pub recomputed_claimables: u128,
    /// `true` if every running aggregate matches its recomputed sum.
    pub aggregates_consistent: bool,
    /// `true` if `balance ≥ deposits + claimables`.
    pub balance_covers_reservations: bool,
}

// ---------------------------------------------------------------------------
// Reservations
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ReservationTotals {
    deposits: u128,
    claimables: u128,
}

/// Custody-held asset units that are owed to users rather than owned by the
/// pool: queued deposits awaiting settlement and claimable balances awaiting
/// pull payment.
///
/// The repository is the only writer. A shared handle is given to the
/// mark-to-market book keeper so it can net these units out of the custody
/// balance — money parked in the queue must not inflate the NAV that prices
/// the very settlement releasing it.
#[derive(Debug, Default)]
pub struct Reservations {
    totals: RwLock<ReservationTotals>,
}

impl Reservations {
    /// Asset units parked by pending deposits.
    pub fn queued_deposits(&self) -> u128 {
        self.totals.read().deposits
    }

    /// Asset units owed across all claimable accounts.
    pub fn queued_claimables(&self) -> u128 {
        self.totals.read().claimables
    }

    /// Everything custody holds on behalf of users.
    pub fn total(&self) -> u128 {
        let totals = self.totals.read();
        totals.deposits.saturating_add(totals.claimables)
    }

    pub(crate) fn add_deposits(&self, amount: u128) {
        self.totals.write().deposits += amount;
    }

    pub(crate) fn sub_deposits(&self, amount: u128) {
        self.totals.write().deposits -= amount;
    }

    pub(crate) fn add_claimables(&self, amount: u128) {
        self.totals.write().claimables += amount;
    }

    pub(crate) fn sub_claimables(&self, amount: u128) {
        self.totals.write().claimables -= amount;
    }
}

/// Shared handle to a repository's reservation totals.
pub type SharedReservations = Arc<Reservations>;

// ---------------------------------------------------------------------------
// Settlement plans (internal)
// ---------------------------------------------------------------------------

struct DepositPlan {
    id: u64,
    requester: String,
    gross: u128,
    fee: u128,
    shares: u128,
    minted: bool,
}

struct WithdrawalPlan {
    id: u64,
    requester: String,
    shares: u128,
    asset_out: u128,
    paid: bool,
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// The queued deposit/withdrawal settlement engine for one fund.
pub struct Repository {
    config: RepositoryConfig,

    asset: SharedAssetBook,
    shares: SharedShareToken,
    book_keeper: SharedBookKeeper,
    gating: SharedGating,

    deposits: RequestQueue,
    withdrawals: RequestQueue,

    claimables: HashMap<String, u128>,
    reservations: SharedReservations,
    total_queued_withdrawals: u128,
}

impl Repository {
    /// Assembles a repository from its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::LicenseFeeTooHigh`] if the configured fee
    /// exceeds the protocol cap.
    pub fn new(
        config: RepositoryConfig,
        asset: SharedAssetBook,
        shares: SharedShareToken,
        book_keeper: SharedBookKeeper,
        gating: SharedGating,
    ) -> Result<Self, RepositoryError> {
        if config.license_fee_bps > MAX_LICENSE_FEE_BPS {
            return Err(RepositoryError::LicenseFeeTooHigh {
                bps: config.license_fee_bps,
            });
        }
        Ok(Self {
            config,
            asset,
            shares,
            book_keeper,
            gating,
            deposits: RequestQueue::new(),
            withdrawals: RequestQueue::new(),
            claimables: HashMap::new(),
            reservations: Arc::new(Reservations::default()),
            total_queued_withdrawals: 0,
        })
    }

    // -- read surface -------------------------------------------------------

    /// The custody account.
    pub fn account(&self) -> &str {
        &self.config.account
    }

    /// The operator account.
    pub fn operator(&self) -> &str {
        &self.config.operator
    }

    /// The executor account.
    pub fn executor(&self) -> &str {
        &self.config.executor
    }

    /// Current custody balance of the deposit asset.
    pub fn asset_balance(&self) -> u128 {
        self.asset.read().balance_of(&self.config.account)
    }

    /// Asset units parked by pending deposits.
    pub fn total_queued_deposits(&self) -> u128 {
        self.reservations.queued_deposits()
    }

    /// Share units escrowed by pending withdrawals.
    pub fn total_queued_withdrawals(&self) -> u128 {
        self.total_queued_withdrawals
    }

    /// Asset units owed across all claimable accounts.
    pub fn total_queued_claimables(&self) -> u128 {
        self.reservations.queued_claimables()
    }

    /// Shared handle to the reservation totals. Wire this into a
    /// mark-to-market book keeper so queued user funds do not count as pool
    /// value (see [`crate::valuation::FeedBookKeeper::net_reservations`]).
    pub fn reservations(&self) -> SharedReservations {
        self.reservations.clone()
    }

    /// The claimable balance of one account.
    pub fn claimable_of(&self, account: &str) -> u128 {
        self.claimables.get(account).copied().unwrap_or(0)
    }

    /// The deposit queue, history included.
    pub fn deposit_queue(&self) -> &RequestQueue {
        &self.deposits
    }

    /// The withdrawal queue, history included.
    pub fn withdrawal_queue(&self) -> &RequestQueue {
        &self.withdrawals
    }

    /// Current NAV from the book keeper. May fail; see
    /// [`Repository::last_known_nav`] for the non-failing fallback.
    pub fn nav(&self) -> Result<Valuation, RepositoryError> {
        Ok(self.book_keeper.write().nav()?)
    }

    /// Current AUM from the book keeper. May fail.
    pub fn aum(&self) -> Result<Valuation, RepositoryError> {
        Ok(self.book_keeper.write().aum()?)
    }

    /// Last successfully computed NAV. Never fails.
    pub fn last_known_nav(&self) -> Valuation {
        self.book_keeper.read().last_known_nav()
    }

    /// Last successfully computed AUM. Never fails.
    pub fn last_known_aum(&self) -> Valuation {
        self.book_keeper.read().last_known_aum()
    }

    // -- deposits -----------------------------------------------------------

    /// Queues a deposit: pulls `amount` into custody and appends an entry.
    ///
    /// No valuation happens here — pricing at settlement time is what makes
    /// stale-price front-running pointless.
    pub fn enqueue_deposit(
        &mut self,
        caller: &str,
        amount: u128,
        min_shares_out: u128,
    ) -> Result<u64, RepositoryError> {
        if amount == 0 {
            return Err(RepositoryError::ZeroAmount);
        }
        if !self.gating.can_deposit(caller) {
            return Err(RepositoryError::NotPermittedToDeposit(caller.to_string()));
        }

        self.asset
            .write()
            .transfer(caller, &self.config.account, amount)?;

        let id = self.deposits.push(caller, amount, min_shares_out);
        self.reservations.add_deposits(amount);

        tracing::info!(id, depositor = caller, amount, "deposit queued");
        Ok(id)
    }

    /// Settles up to `limit` pending deposits against one fresh NAV read.
    ///
    /// Per entry: the license fee comes off the gross amount, the net is
    /// priced into shares, and the shares are minted to the requester —
    /// unless they fall short of the entry's `min_shares_out`, in which
    /// case the full gross amount is refunded into the requester's
    /// claimable balance and no fee is charged.
    ///
    /// A failed valuation read aborts before any queue mutation.
    pub fn settle_deposits(
        &mut self,
        caller: &str,
        limit: usize,
    ) -> Result<DepositSettlement, RepositoryError> {
        self.require_operator(caller)?;
        self.require_batch_limit(limit)?;

        // One price for the whole batch keeps every entry consistent.
        let nav = self.book_keeper.write().nav()?;
        let decimals = self.asset.read().decimals();
        let batch = self.deposits.collect_pending(limit);

        // Plan: all arithmetic and all failure modes up front.
        let mut plans = Vec::with_capacity(batch.len());
        let mut simulated_supply = self.shares.read().total_supply();
        for id in batch {
            let entry = self.deposits.get(id)?;
            let gross = entry.amount;
            let fee = math::bps_of(gross, self.config.license_fee_bps)?;
            let net = gross - fee;
            let net_wad = math::scale_to_wad(net, decimals)?;
            let shares = math::wad_div(net_wad, nav.value)?;

            let minted = shares >= entry.min_out;
            if minted {
                simulated_supply = simulated_supply
                    .checked_add(shares)
                    .ok_or(MathError::Overflow)?;
            }
            plans.push(DepositPlan {
                id,
                requester: entry.requester.clone(),
                gross,
                fee,
                shares,
                minted,
            });
        }

        // Apply: nothing below can fail for external reasons.
        let mut report = DepositSettlement {
            nav: nav.value,
            ..Default::default()
        };
        for plan in plans {
            self.deposits.mark_settled(plan.id)?;
            self.reservations.sub_deposits(plan.gross);

            if plan.minted {
                if plan.fee > 0 {
                    self.pay_or_reserve(&self.config.fee_recipient.clone(), plan.fee)?;
                    report.fees_paid += plan.fee;
                }
                self.shares
                    .write()
                    .mint(&self.config.account, &plan.requester, plan.shares)?;
                report.minted += 1;
                report.shares_minted += plan.shares;
                tracing::info!(
                    id = plan.id,
                    depositor = %plan.requester,
                    shares = plan.shares,
                    "deposit settled"
                );
            } else {
                self.credit_claimable(&plan.requester, plan.gross);
                report.refunded += 1;
                tracing::info!(
                    id = plan.id,
                    depositor = %plan.requester,
                    shares = plan.shares,
                    refunded = plan.gross,
                    "deposit below min-shares guard, refunded to claimable"
                );
            }
            report.settled += 1;
        }
        self.deposits.advance_cursor();
        Ok(report)
    }

    /// Cancels a pending deposit and returns the reserved asset.
    ///
    /// The refund goes straight back to the requester, or into their
    /// claimable balance if the gate currently refuses them — a cancel
    /// never fails because of a third party's transfer restriction.
    pub fn remove_deposit_from_queue(
        &mut self,
        caller: &str,
        id: u64,
    ) -> Result<(), RepositoryError> {
        self.require_operator(caller)?;
        let entry = self.deposits.cancel(id)?;
        self.reservations.sub_deposits(entry.amount);
        let requester = entry.requester.clone();
        self.pay_or_reserve(&requester, entry.amount)?;
        tracing::info!(id, depositor = %entry.requester, amount = entry.amount, "deposit cancelled");
        Ok(())
    }

    // -- withdrawals --------------------------------------------------------

    /// Queues a withdrawal: escrows `share_amount` in custody (not burned,
    /// so a cancel can hand back the exact share count) and appends an
    /// entry.
    pub fn enqueue_withdrawal(
        &mut self,
        caller: &str,
        share_amount: u128,
        min_asset_out: u128,
    ) -> Result<u64, RepositoryError> {
        if share_amount == 0 {
            return Err(RepositoryError::ZeroAmount);
        }

        self.shares
            .write()
            .transfer(caller, &self.config.account, share_amount)?;

        let id = self.withdrawals.push(caller, share_amount, min_asset_out);
        self.total_queued_withdrawals += share_amount;

        tracing::info!(id, holder = caller, shares = share_amount, "withdrawal queued");
        Ok(id)
    }

    /// Settles up to `limit` pending withdrawals against one fresh NAV read.
    ///
    /// Per entry the payout is `shares × NAV`. Any entry that would dip
    /// into funds reserved for queued deposits and existing claimables
    /// fails the *entire* batch with no state change — the withdrawal stays
    /// pending and is retryable once the pool is topped up. Successful
    /// entries burn their escrowed shares and credit the payout to the
    /// requester's claimable balance; entries under their `min_asset_out`
    /// get their shares back instead.
    pub fn settle_withdrawals(
        &mut self,
        caller: &str,
        limit: usize,
    ) -> Result<WithdrawalSettlement, RepositoryError> {
        self.require_operator(caller)?;
        self.require_batch_limit(limit)?;

        let nav = self.book_keeper.write().nav()?;
        let decimals = self.asset.read().decimals();
        let batch = self.withdrawals.collect_pending(limit);

        let balance = self.asset_balance();
        let reserved = self.reservations.total();

        // Plan: simulate the claimable growth entry by entry; the first
        // payout the pool cannot cover aborts the whole call untouched.
        let mut plans = Vec::with_capacity(batch.len());
        let mut planned_claimables: u128 = 0;
        for id in batch {
            let entry = self.withdrawals.get(id)?;
            let value_wad = math::wad_mul(entry.amount, nav.value)?;
            let asset_out = math::scale_from_wad(value_wad, decimals)?;

            let paid = asset_out >= entry.min_out;
            if paid {
                let required = reserved + planned_claimables + asset_out;
                if balance < required {
                    return Err(RepositoryError::InsufficientLocalFundsToProcessRedemption {
                        balance,
                        required,
                    });
                }
                planned_claimables += asset_out;
            }
            plans.push(WithdrawalPlan {
                id,
                requester: entry.requester.clone(),
                shares: entry.amount,
                asset_out,
                paid,
            });
        }

        // Apply.
        let mut report = WithdrawalSettlement {
            nav: nav.value,
            ..Default::default()
        };
        for plan in plans {
            self.withdrawals.mark_settled(plan.id)?;
            self.total_queued_withdrawals -= plan.shares;

            if plan.paid {
                self.shares
                    .write()
                    .burn(&self.config.account, &self.config.account, plan.shares)?;
                self.credit_claimable(&plan.requester, plan.asset_out);
                report.paid_out += 1;
                report.shares_burned += plan.shares;
                report.asset_owed += plan.asset_out;
                tracing::info!(
                    id = plan.id,
                    holder = %plan.requester,
                    asset_out = plan.asset_out,
                    "withdrawal settled"
                );
            } else {
                self.shares
                    .write()
                    .release(&self.config.account, &plan.requester, plan.shares)?;
                report.returned += 1;
                tracing::info!(
                    id = plan.id,
                    holder = %plan.requester,
                    asset_out = plan.asset_out,
                    "withdrawal below min-asset guard, shares returned"
                );
            }
            report.settled += 1;
        }
        self.withdrawals.advance_cursor();
        Ok(report)
    }

    /// Cancels a pending withdrawal and returns the escrowed shares.
    ///
    /// The return bypasses recipient gating — the shares were the
    /// requester's own, and a cancel must never fail on a restriction.
    pub fn remove_withdrawal_from_queue(
        &mut self,
        caller: &str,
        id: u64,
    ) -> Result<(), RepositoryError> {
        self.require_operator(caller)?;
        let entry = self.withdrawals.cancel(id)?;
        self.total_queued_withdrawals -= entry.amount;
        self.shares
            .write()
            .release(&self.config.account, &entry.requester, entry.amount)?;
        tracing::info!(id, holder = %entry.requester, shares = entry.amount, "withdrawal cancelled");
        Ok(())
    }

    /// Operator-forced full-balance withdrawal for each listed account.
    ///
    /// Bounded by the batch ceiling and pre-validated: any account with a
    /// zero share balance aborts the whole call before anything enqueues.
    pub fn initiate_withdraw_all_for(
        &mut self,
        caller: &str,
        accounts: &[String],
    ) -> Result<Vec<u64>, RepositoryError> {
        self.require_operator(caller)?;
        self.require_batch_limit(accounts.len())?;

        // Pre-validate the whole batch so the enqueue loop cannot fail.
        {
            let shares = self.shares.read();
            for account in accounts {
                if shares.balance_of(account) == 0 {
                    return Err(RepositoryError::InvalidAmount(account.clone()));
                }
            }
        }
        if !self.gating.can_receive(&self.config.account) {
            return Err(RepositoryError::Share(ShareError::RecipientNotPermitted(
                self.config.account.clone(),
            )));
        }

        let mut ids = Vec::with_capacity(accounts.len());
        for account in accounts {
            let balance = self.shares.read().balance_of(account);
            self.shares
                .write()
                .transfer(account, &self.config.account, balance)?;
            let id = self.withdrawals.push(account, balance, 0);
            self.total_queued_withdrawals += balance;
            tracing::info!(id, holder = %account, shares = balance, "forced withdrawal queued");
            ids.push(id);
        }
        Ok(ids)
    }

    // -- claimables ---------------------------------------------------------

    /// Pays out the caller's full claimable balance.
    ///
    /// # Errors
    ///
    /// Fails [`RepositoryError::InvalidAmount`] on a zero balance. A gated
    /// recipient fails the transfer and leaves the claimable intact — this
    /// is a pull payment, so the caller retries once re-admitted.
    pub fn redeem_claimable(&mut self, caller: &str) -> Result<u128, RepositoryError> {
        let amount = self.claimable_of(caller);
        if amount == 0 {
            return Err(RepositoryError::InvalidAmount(caller.to_string()));
        }

        self.asset
            .write()
            .transfer(&self.config.account, caller, amount)?;
        self.claimables.remove(caller);
        self.reservations.sub_claimables(amount);

        tracing::info!(account = caller, amount, "claimable redeemed");
        Ok(amount)
    }

    /// Operator-driven claimable payout for a batch of accounts.
    ///
    /// The batch is pre-validated in full — a zero balance, a duplicate, or
    /// a gated recipient anywhere aborts the whole call, forcing callers to
    /// pre-filter. Per-account failures are never swallowed.
    pub fn redeem_claimable_delegated(
        &mut self,
        caller: &str,
        accounts: &[String],
    ) -> Result<u128, RepositoryError> {
        self.require_operator(caller)?;
        self.require_batch_limit(accounts.len())?;

        let mut seen = HashSet::new();
        for account in accounts {
            // A duplicate would find its balance already drained; surface it
            // as the same invalid-amount failure a zero balance produces.
            if !seen.insert(account.as_str()) || self.claimable_of(account) == 0 {
                return Err(RepositoryError::InvalidAmount(account.clone()));
            }
            if !self.gating.can_receive(account) {
                return Err(RepositoryError::Token(TokenError::RecipientNotPermitted(
                    account.clone(),
                )));
            }
        }

        let mut total = 0u128;
        for account in accounts {
            total += self.redeem_claimable(account)?;
        }
        Ok(total)
    }

    // -- executor moves -----------------------------------------------------

    /// Moves pool funds out to the executor's holding account.
    ///
    /// Refused if the remaining balance would no longer cover queued
    /// deposits and claimables. Invalidates any attestation-based valuation.
    pub fn move_funds_to_executor(
        &mut self,
        caller: &str,
        amount: u128,
    ) -> Result<(), RepositoryError> {
        self.require_operator_or_executor(caller)?;
        if amount == 0 {
            return Err(RepositoryError::ZeroAmount);
        }

        let balance = self.asset_balance();
        let reserved = self.reservations.total();
        if amount > balance || balance - amount < reserved {
            return Err(RepositoryError::InsufficientLocalBalanceToTransfer {
                balance,
                reserved,
                requested: amount,
            });
        }

        self.asset
            .write()
            .transfer(&self.config.account, &self.config.executor, amount)?;
        self.book_keeper.write().note_fund_movement();

        tracing::info!(amount, executor = %self.config.executor, "funds moved to executor");
        Ok(())
    }

    /// Returns funds from the executor's holding account to custody.
    /// Also a balance movement, so it too invalidates attestation trust.
    pub fn recall_funds_from_executor(
        &mut self,
        caller: &str,
        amount: u128,
    ) -> Result<(), RepositoryError> {
        self.require_operator_or_executor(caller)?;
        if amount == 0 {
            return Err(RepositoryError::ZeroAmount);
        }

        self.asset
            .write()
            .transfer(&self.config.executor, &self.config.account, amount)?;
        self.book_keeper.write().note_fund_movement();

        tracing::info!(amount, executor = %self.config.executor, "funds recalled from executor");
        Ok(())
    }

    // -- audit --------------------------------------------------------------

    /// Recomputes every aggregate the O(n) way and checks conservation.
    pub fn audit(&self) -> AuditReport {
        let recomputed_queued_deposits = self
            .deposits
            .entries()
            .iter()
            .filter(|e| e.status == EntryStatus::Pending)
            .map(|e| e.amount)
            .sum();
        let recomputed_queued_withdrawals = self
            .withdrawals
            .entries()
            .iter()
            .filter(|e| e.status == EntryStatus::Pending)
            .map(|e| e.amount)
            .sum();
        let recomputed_claimables = self.claimables.values().sum();
        let balance = self.asset_balance();

        AuditReport {
            balance,
            recomputed_queued_deposits,
            recomputed_queued_withdrawals,
            recomputed_claimables,
            aggregates_consistent: recomputed_queued_deposits == self.reservations.queued_deposits()
                && recomputed_queued_withdrawals == self.total_queued_withdrawals
                && recomputed_claimables == self.reservations.queued_claimables(),
            balance_covers_reservations: balance >= self.reservations.total(),
        }
    }

    // -- internals ----------------------------------------------------------

    fn require_operator(&self, caller: &str) -> Result<(), RepositoryError> {
        if caller != self.config.operator {
            return Err(RepositoryError::NotOperator(caller.to_string()));
        }
        Ok(())
    }

    fn require_operator_or_executor(&self, caller: &str) -> Result<(), RepositoryError> {
        if caller != self.config.operator && caller != self.config.executor {
            return Err(RepositoryError::NotOperatorOrExecutor(caller.to_string()));
        }
        Ok(())
    }

    fn require_batch_limit(&self, requested: usize) -> Result<(), RepositoryError> {
        if requested > MAX_BATCH_SIZE {
            return Err(RepositoryError::BatchLimitExceeded {
                requested,
                max: MAX_BATCH_SIZE,
            });
        }
        Ok(())
    }

    fn credit_claimable(&mut self, account: &str, amount: u128) {
        *self.claimables.entry(account.to_string()).or_insert(0) += amount;
        self.reservations.add_claimables(amount);
    }

    /// Direct transfer out of custody with a claimable fallback for gated
    /// recipients. Used by deposit refunds and fee payment: the asset is
    /// in custody and the amount is covered, so gating is the only way the
    /// transfer can fail.
    fn pay_or_reserve(&mut self, to: &str, amount: u128) -> Result<(), RepositoryError> {
        let result = self.asset.write().transfer(&self.config.account, to, amount);
        match result {
            Ok(()) => Ok(()),
            Err(TokenError::RecipientNotPermitted(_)) => {
                self.credit_claimable(to, amount);
                Ok(())
            }
            Err(other) => Err(other.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MAX_BATCH_SIZE, WAD};
    use crate::gating::OpenGate;
    use crate::pricing::StaticFeed;
    use crate::shares::ShareToken;
    use crate::token::{self, AssetBook};
    use crate::valuation::feed_based::{FeedBookKeeper, WatchedAsset};
    use parking_lot::RwLock;
    use std::sync::Arc;

    const CUSTODY: &str = "fund-custody";
    const OPERATOR: &str = "fund-operator";
    const EXECUTOR: &str = "fund-executor";
    const FEES: &str = "fee-recipient";

    struct Fixture {
        repo: Repository,
        asset: SharedAssetBook,
        feed: Arc<StaticFeed>,
    }

    /// A fund over a 6-decimal asset priced 1:1, with no license fee so the
    /// unit arithmetic stays legible. Fee behavior has its own tests.
    fn fixture() -> Fixture {
        fixture_with_fee(0)
    }

    fn fixture_with_fee(fee_bps: u32) -> Fixture {
        let asset = token::shared(AssetBook::new("cUSD", 6));
        let shares = Arc::new(RwLock::new(ShareToken::new(
            "TEST-S",
            CUSTODY,
            Arc::new(OpenGate),
        )));
        let feed = StaticFeed::new("cUSD/base", 1_000_000, 6);

        let mut keeper = FeedBookKeeper::new(CUSTODY, shares.clone());
        keeper.watch(WatchedAsset {
            asset: "cUSD".into(),
            book: asset.clone(),
            feed: feed.clone(),
        });
        let keeper = Arc::new(RwLock::new(keeper));

        let repo = Repository::new(
            RepositoryConfig {
                account: CUSTODY.into(),
                operator: OPERATOR.into(),
                executor: EXECUTOR.into(),
                fee_recipient: FEES.into(),
                license_fee_bps: fee_bps,
            },
            asset.clone(),
            shares,
            keeper.clone(),
            Arc::new(OpenGate),
        )
        .unwrap();
        keeper.write().net_reservations("cUSD", repo.reservations());

        Fixture { repo, asset, feed }
    }

    fn fund(fixture: &Fixture, account: &str, whole_units: u128) {
        fixture
            .asset
            .write()
            .issue(account, whole_units * 1_000_000)
            .unwrap();
    }

    #[test]
    fn zero_deposit_rejected() {
        let mut f = fixture();
        assert!(matches!(
            f.repo.enqueue_deposit("alice", 0, 0),
            Err(RepositoryError::ZeroAmount)
        ));
    }

    #[test]
    fn deposit_parks_asset_in_custody() {
        let mut f = fixture();
        fund(&f, "alice", 100);

        let id = f.repo.enqueue_deposit("alice", 100_000_000, 0).unwrap();
        assert_eq!(id, 0);
        assert_eq!(f.repo.asset_balance(), 100_000_000);
        assert_eq!(f.repo.total_queued_deposits(), 100_000_000);
        assert!(f.repo.audit().aggregates_consistent);
    }

    #[test]
    fn settle_requires_operator() {
        let mut f = fixture();
        assert!(matches!(
            f.repo.settle_deposits("mallory", 10),
            Err(RepositoryError::NotOperator(_))
        ));
    }

    #[test]
    fn batch_limit_enforced_regardless_of_queue_size() {
        let mut f = fixture();
        // Empty queue, limit at the bound: fine, settles nothing.
        let report = f.repo.settle_deposits(OPERATOR, MAX_BATCH_SIZE).unwrap();
        assert_eq!(report.settled, 0);
        // One past the bound always fails.
        assert!(matches!(
            f.repo.settle_deposits(OPERATOR, MAX_BATCH_SIZE + 1),
            Err(RepositoryError::BatchLimitExceeded { .. })
        ));
        assert!(matches!(
            f.repo.settle_withdrawals(OPERATOR, MAX_BATCH_SIZE + 1),
            Err(RepositoryError::BatchLimitExceeded { .. })
        ));
    }

    #[test]
    fn first_deposit_mints_at_nav_one() {
        let mut f = fixture();
        fund(&f, "alice", 100);
        f.repo.enqueue_deposit("alice", 100_000_000, 0).unwrap();

        let report = f.repo.settle_deposits(OPERATOR, 10).unwrap();
        assert_eq!(report.minted, 1);
        assert_eq!(report.shares_minted, 100 * WAD);
        assert_eq!(f.repo.total_queued_deposits(), 0);
        assert!(f.repo.audit().aggregates_consistent);
    }

    #[test]
    fn min_shares_guard_refunds_gross_to_claimable() {
        let mut f = fixture();
        fund(&f, "alice", 100);
        // Demand more shares than NAV 1.0 can mint.
        f.repo
            .enqueue_deposit("alice", 100_000_000, 101 * WAD)
            .unwrap();

        let report = f.repo.settle_deposits(OPERATOR, 10).unwrap();
        assert_eq!(report.minted, 0);
        assert_eq!(report.refunded, 1);
        assert_eq!(f.repo.claimable_of("alice"), 100_000_000);
        assert_eq!(f.repo.total_queued_claimables(), 100_000_000);
        // The asset never left custody.
        assert_eq!(f.repo.asset_balance(), 100_000_000);
        assert!(f.repo.audit().aggregates_consistent);
    }

    #[test]
    fn license_fee_comes_off_gross_before_pricing() {
        let mut f = fixture_with_fee(100); // 1%
        fund(&f, "alice", 100);
        f.repo.enqueue_deposit("alice", 100_000_000, 0).unwrap();

        let report = f.repo.settle_deposits(OPERATOR, 10).unwrap();
        assert_eq!(report.fees_paid, 1_000_000);
        // 99 net units at NAV 1.0 → 99 shares.
        assert_eq!(report.shares_minted, 99 * WAD);
        assert_eq!(f.asset.read().balance_of(FEES), 1_000_000);
    }

    #[test]
    fn guard_refund_is_not_charged_a_fee() {
        let mut f = fixture_with_fee(100);
        fund(&f, "alice", 100);
        f.repo
            .enqueue_deposit("alice", 100_000_000, u128::MAX)
            .unwrap();

        let report = f.repo.settle_deposits(OPERATOR, 10).unwrap();
        assert_eq!(report.refunded, 1);
        assert_eq!(report.fees_paid, 0);
        assert_eq!(f.repo.claimable_of("alice"), 100_000_000);
        assert_eq!(f.asset.read().balance_of(FEES), 0);
    }

    #[test]
    fn invalid_price_aborts_settlement_untouched() {
        let mut f = fixture();
        fund(&f, "alice", 100);
        f.repo.enqueue_deposit("alice", 100_000_000, 0).unwrap();

        f.feed.set_price(0);
        assert!(matches!(
            f.repo.settle_deposits(OPERATOR, 10),
            Err(RepositoryError::Valuation(_))
        ));
        // Queue untouched: retry succeeds after the feed recovers.
        assert_eq!(f.repo.total_queued_deposits(), 100_000_000);
        f.feed.set_price(1_000_000);
        assert_eq!(f.repo.settle_deposits(OPERATOR, 10).unwrap().minted, 1);
    }

    #[test]
    fn cancelled_deposit_refunds_and_is_never_settled() {
        let mut f = fixture();
        fund(&f, "alice", 100);
        let before = f.repo.total_queued_deposits();
        let id = f.repo.enqueue_deposit("alice", 100_000_000, 0).unwrap();

        f.repo.remove_deposit_from_queue(OPERATOR, id).unwrap();
        assert_eq!(f.asset.read().balance_of("alice"), 100_000_000);
        assert_eq!(f.repo.total_queued_deposits(), before);

        // Settlement skips it; cancelling twice is an error.
        assert_eq!(f.repo.settle_deposits(OPERATOR, 10).unwrap().settled, 0);
        assert!(matches!(
            f.repo.remove_deposit_from_queue(OPERATOR, id),
            Err(RepositoryError::Queue(QueueError::EntryNotPending { .. }))
        ));
    }

    #[test]
    fn withdrawal_escrows_then_settles_to_claimable() {
        let mut f = fixture();
        fund(&f, "alice", 100);
        f.repo.enqueue_deposit("alice", 100_000_000, 0).unwrap();
        f.repo.settle_deposits(OPERATOR, 10).unwrap();

        f.repo.enqueue_withdrawal("alice", 40 * WAD, 0).unwrap();
        assert_eq!(f.repo.total_queued_withdrawals(), 40 * WAD);

        let report = f.repo.settle_withdrawals(OPERATOR, 10).unwrap();
        assert_eq!(report.paid_out, 1);
        assert_eq!(report.shares_burned, 40 * WAD);
        assert_eq!(report.asset_owed, 40_000_000);
        assert_eq!(f.repo.claimable_of("alice"), 40_000_000);
        assert_eq!(f.repo.total_queued_withdrawals(), 0);
        assert!(f.repo.audit().aggregates_consistent);

        let paid = f.repo.redeem_claimable("alice").unwrap();
        assert_eq!(paid, 40_000_000);
        assert_eq!(f.asset.read().balance_of("alice"), 40_000_000);
        assert!(f.repo.audit().aggregates_consistent);
    }

    #[test]
    fn redeem_zero_claimable_fails_invalid_amount() {
        let mut f = fixture();
        assert!(matches!(
            f.repo.redeem_claimable("alice"),
            Err(RepositoryError::InvalidAmount(_))
        ));
    }

    #[test]
    fn delegated_redeem_aborts_whole_batch_on_duplicate() {
        let mut f = fixture();
        fund(&f, "alice", 10);
        f.repo
            .enqueue_deposit("alice", 10_000_000, u128::MAX)
            .unwrap();
        f.repo.settle_deposits(OPERATOR, 10).unwrap(); // refunds into claimable

        let accounts = vec!["alice".to_string(), "alice".to_string()];
        assert!(matches!(
            f.repo.redeem_claimable_delegated(OPERATOR, &accounts),
            Err(RepositoryError::InvalidAmount(_))
        ));
        // Atomic: the first occurrence was not paid either.
        assert_eq!(f.repo.claimable_of("alice"), 10_000_000);
    }

    #[test]
    fn executor_move_respects_reservations() {
        let mut f = fixture();
        fund(&f, "alice", 100);
        f.repo.enqueue_deposit("alice", 100_000_000, 0).unwrap();

        // Whole balance is reserved for the queued deposit.
        assert!(matches!(
            f.repo.move_funds_to_executor(OPERATOR, 1),
            Err(RepositoryError::InsufficientLocalBalanceToTransfer { .. })
        ));

        f.repo.settle_deposits(OPERATOR, 10).unwrap();
        // Settled pool funds are free to deploy.
        f.repo.move_funds_to_executor(OPERATOR, 60_000_000).unwrap();
        assert_eq!(f.asset.read().balance_of(EXECUTOR), 60_000_000);

        f.repo
            .recall_funds_from_executor(EXECUTOR, 60_000_000)
            .unwrap();
        assert_eq!(f.repo.asset_balance(), 100_000_000);
    }

    #[test]
    fn withdraw_all_for_enqueues_full_balances() {
        let mut f = fixture();
        fund(&f, "alice", 50);
        fund(&f, "bob", 30);
        f.repo.enqueue_deposit("alice", 50_000_000, 0).unwrap();
        f.repo.enqueue_deposit("bob", 30_000_000, 0).unwrap();
        f.repo.settle_deposits(OPERATOR, 10).unwrap();

        let ids = f
            .repo
            .initiate_withdraw_all_for(OPERATOR, &["alice".into(), "bob".into()])
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(f.repo.total_queued_withdrawals(), 80 * WAD);

        // An empty-handed account aborts the whole call.
        assert!(matches!(
            f.repo
                .initiate_withdraw_all_for(OPERATOR, &["carol".into()]),
            Err(RepositoryError::InvalidAmount(_))
        ));
    }

    #[test]
    fn license_fee_cap_enforced_at_construction() {
        let asset = token::shared(AssetBook::new("cUSD", 6));
        let shares = Arc::new(RwLock::new(ShareToken::new(
            "TEST-S",
            CUSTODY,
            Arc::new(OpenGate),
        )));
        let keeper = FeedBookKeeper::new(CUSTODY, shares.clone());
        let result = Repository::new(
            RepositoryConfig {
                account: CUSTODY.into(),
                operator: OPERATOR.into(),
                executor: EXECUTOR.into(),
                fee_recipient: FEES.into(),
                license_fee_bps: MAX_LICENSE_FEE_BPS + 1,
            },
            asset,
            shares,
            Arc::new(RwLock::new(keeper)),
            Arc::new(OpenGate),
        );
        assert!(matches!(
            result,
            Err(RepositoryError::LicenseFeeTooHigh { .. })
        ));
    }
}
