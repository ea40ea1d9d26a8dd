//! # Valuation — Book Keepers
//!
//! A fund's value is not always directly observable: part of it may sit in
//! an executor account trading off-ledger, or exist only as an audited
//! statement. The book keeper is the component that turns whatever *is*
//! knowable into one authoritative pair of figures — AUM (total pool value)
//! and NAV (value per share) — or refuses, loudly, when the inputs cannot
//! be trusted.
//!
//! ```text
//! mod.rs               — BookKeeper trait, Valuation, ValuationError
//! feed_based.rs        — mark-to-market over a watchlist of price feeds
//! attested.rs          — operator-pushed valuation marks
//! account_attested.rs  — marks sourced from an external registry entry
//! ```
//!
//! ## Contract
//!
//! Every keeper honors the same four-method read contract: `aum()` and
//! `nav()` may fail (stale feed, expired mark, missing registry entry);
//! `last_known_aum()` and `last_known_nav()` never fail — they return the
//! most recent successfully computed figure so operational surfaces always
//! have *something* to display. `check_expected_nav` is the consistency
//! check an operator runs before trusting an externally computed figure,
//! and `note_fund_movement` is the hook the repository calls whenever pool
//! balances move, invalidating any attestation-based trust.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::MathError;
use crate::pricing::PriceError;

pub mod account_attested;
pub mod attested;
pub mod feed_based;

pub use account_attested::AccountBookKeeper;
pub use attested::{AttestedBookKeeper, Mark};
pub use feed_based::{FeedBookKeeper, WatchedAsset};

// ---------------------------------------------------------------------------
// Valuation
// ---------------------------------------------------------------------------

/// A computed AUM or NAV figure with the timestamp of the input that
/// produced it.
///
/// The `as_of` is the *oldest* input behind the figure (minimum feed
/// timestamp across a watchlist, or the attestation's own timestamp) —
/// not the wall clock of the read — so staleness information survives
/// into `last_known_*` fallbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valuation {
    /// WAD-scaled value in the fund's base currency.
    pub value: u128,

    /// Timestamp of the oldest input behind this figure.
    pub as_of: DateTime<Utc>,
}

impl Valuation {
    /// Creates a valuation stamped now. Used for construction-time seeds.
    pub fn now(value: u128) -> Self {
        Self {
            value,
            as_of: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A valuation read failed. Any of these aborts the calling settlement
/// batch before it touches the queue.
#[derive(Debug, Error)]
pub enum ValuationError {
    /// A watchlisted feed failed the trust-boundary checks.
    #[error(transparent)]
    Price(#[from] PriceError),

    /// The attestation-based mark is missing, expired, or invalidated by a
    /// fund movement since it was recorded.
    #[error("marked value is stale: {reason}")]
    MarkedValueStale {
        /// Why the mark cannot be trusted.
        reason: String,
    },

    /// A non-positive AUM was attested while shares are outstanding.
    #[error("non-positive AUM attested with {share_supply} shares outstanding")]
    NonPositiveAum {
        /// The current share supply.
        share_supply: u128,
    },

    /// The linked registry entry was deleted or never set.
    #[error("attestation registry entry does not exist: {key}")]
    AccountDoesNotExist {
        /// The registry key the keeper is linked to.
        key: String,
    },

    /// A candidate NAV failed the margin-of-error consistency check.
    #[error(
        "candidate NAV {candidate} outside margin: actual {actual}, tolerance {margin_bps} bps"
    )]
    NavOutsideMargin {
        /// The candidate figure under test.
        candidate: u128,
        /// The freshly computed figure.
        actual: u128,
        /// The configured tolerance.
        margin_bps: u32,
    },

    /// Fixed-point arithmetic failed.
    #[error("valuation arithmetic failed: {0}")]
    Math(#[from] MathError),
}

// ---------------------------------------------------------------------------
// BookKeeper
// ---------------------------------------------------------------------------

/// The pluggable valuation strategy contract.
pub trait BookKeeper: Send + Sync {
    /// Computes the current Assets-Under-Management figure.
    fn aum(&mut self) -> Result<Valuation, ValuationError>;

    /// Computes the current Net-Asset-Value per share. Defined as exactly
    /// one WAD when no shares are outstanding.
    fn nav(&mut self) -> Result<Valuation, ValuationError>;

    /// Returns the last successfully computed AUM. Never fails.
    fn last_known_aum(&self) -> Valuation;

    /// Returns the last successfully computed NAV. Never fails.
    fn last_known_nav(&self) -> Valuation;

    /// Verifies a candidate NAV against a fresh computation, within the
    /// keeper's configured margin of error.
    fn check_expected_nav(&mut self, candidate: u128) -> Result<(), ValuationError>;

    /// Called by the repository after any pool balance movement. Keepers
    /// whose figures depend on an external attestation must stop trusting
    /// it until the operator re-arms; mark-to-market keepers ignore this.
    fn note_fund_movement(&mut self);
}

/// Shared handle to a book keeper.
pub type SharedBookKeeper = Arc<RwLock<dyn BookKeeper>>;

/// Verifies `|candidate − actual| ≤ margin_bps of actual` in integer math.
///
/// Shared by every keeper's `check_expected_nav`.
pub(crate) fn check_within_margin(
    candidate: u128,
    actual: u128,
    margin_bps: u32,
) -> Result<(), ValuationError> {
    let deviation = actual.abs_diff(candidate);
    // deviation / actual ≤ margin / 10_000, cross-multiplied to avoid division.
    let lhs = deviation.checked_mul(crate::config::BPS_SCALE as u128);
    let rhs = actual.checked_mul(margin_bps as u128);
    let ok = match (lhs, rhs) {
        (Some(l), Some(r)) => l <= r,
        // Cross-multiplication overflowed u128; divide first instead. The
        // flooring slack is ≤ 1 bps of a >10^34 figure, which is noise.
        _ => deviation <= actual / crate::config::BPS_SCALE as u128 * margin_bps as u128,
    };
    if ok {
        Ok(())
    } else {
        Err(ValuationError::NavOutsideMargin {
            candidate,
            actual,
            margin_bps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WAD;

    #[test]
    fn margin_check_accepts_exact_match() {
        assert!(check_within_margin(WAD, WAD, 0).is_ok());
    }

    #[test]
    fn margin_check_accepts_deviation_at_the_bound() {
        // 1% margin, exactly 1% off.
        let actual = 100 * WAD;
        assert!(check_within_margin(actual + WAD, actual, 100).is_ok());
        assert!(check_within_margin(actual - WAD, actual, 100).is_ok());
    }

    #[test]
    fn margin_check_rejects_deviation_past_the_bound() {
        let actual = 100 * WAD;
        let err = check_within_margin(actual + WAD + 1, actual, 100).unwrap_err();
        assert!(matches!(err, ValuationError::NavOutsideMargin { .. }));
    }

    #[test]
    fn margin_check_survives_huge_values() {
        let actual = u128::MAX / 2;
        assert!(check_within_margin(actual, actual, 1).is_ok());
    }
}
