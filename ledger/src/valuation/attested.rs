//! # Attested Book Keeper
//!
//! Valuation by statement rather than by market: the operator periodically
//! pushes a [`Mark`] — an externally audited AUM/NAV pair with a timestamp
//! and a validity window — and the keeper serves that figure until it
//! expires or a fund movement undermines it.
//!
//! ## The `settled` flag
//!
//! A mark describes the pool as it stood when the attestor looked at it.
//! The moment the repository moves funds (to or from the executor), that
//! snapshot is suspect, so the repository clears the keeper's `settled`
//! flag via [`BookKeeper::note_fund_movement`]. Reads then fail until the
//! operator either pushes a fresh mark or explicitly confirms the old one
//! still stands ([`AttestedBookKeeper::confirm_settled`]).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_MARGIN_OF_ERROR_BPS, WAD};
use crate::shares::SharedShareToken;
use crate::valuation::{check_within_margin, BookKeeper, Valuation, ValuationError};

// ---------------------------------------------------------------------------
// Mark
// ---------------------------------------------------------------------------

/// One operator-pushed valuation statement.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Mark {
    /// Attested total pool value, WAD-scaled, covering the entire fund
    /// (on-ledger and external holdings alike).
    pub aum: u128,

    /// Attested per-share value, WAD-scaled.
    pub nav: u128,

    /// When the attestor observed the fund.
    pub as_of: DateTime<Utc>,

    /// How long past `as_of` the mark may be served.
    pub validity_window: Duration,
}

// ---------------------------------------------------------------------------
// AttestedBookKeeper
// ---------------------------------------------------------------------------

/// Keeper that serves operator-pushed marks.
pub struct AttestedBookKeeper {
    shares: SharedShareToken,
    mark: Option<Mark>,
    settled: bool,
    margin_bps: u32,

    last_aum: Valuation,
    last_nav: Valuation,
}

impl AttestedBookKeeper {
    /// Creates a keeper with no mark. Reads fail until the first
    /// [`record_mark`](Self::record_mark).
    pub fn new(shares: SharedShareToken) -> Self {
        Self {
            shares,
            mark: None,
            settled: false,
            margin_bps: DEFAULT_MARGIN_OF_ERROR_BPS,
            last_aum: Valuation::now(0),
            last_nav: Valuation::now(WAD),
        }
    }

    /// Records a fresh mark and re-arms the `settled` flag.
    ///
    /// # Errors
    ///
    /// Returns [`ValuationError::NonPositiveAum`] if a zero AUM is attested
    /// while shares are outstanding — an audited statement that the pool is
    /// worthless with live claims on it is an incident, not an input.
    pub fn record_mark(&mut self, mark: Mark) -> Result<(), ValuationError> {
        let supply = self.shares.read().total_supply();
        if mark.aum == 0 && supply > 0 {
            return Err(ValuationError::NonPositiveAum {
                share_supply: supply,
            });
        }
        tracing::info!(
            aum = mark.aum,
            nav = mark.nav,
            as_of = %mark.as_of,
            "valuation mark recorded"
        );
        self.mark = Some(mark);
        self.settled = true;
        Ok(())
    }

    /// Re-arms the `settled` flag without a new mark: the operator asserts
    /// that the last attestation still describes the pool.
    pub fn confirm_settled(&mut self) {
        self.settled = true;
    }

    /// Returns whether the current mark is trusted.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Overrides the `check_expected_nav` tolerance.
    pub fn set_margin_of_error(&mut self, margin_bps: u32) {
        self.margin_bps = margin_bps;
    }

    /// Returns the current mark if it is recorded, settled, and within its
    /// validity window.
    fn trusted_mark(&self) -> Result<Mark, ValuationError> {
        let mark = self.mark.ok_or_else(|| ValuationError::MarkedValueStale {
            reason: "no mark recorded".into(),
        })?;
        if !self.settled {
            return Err(ValuationError::MarkedValueStale {
                reason: "fund movement since last attestation".into(),
            });
        }
        let age_secs = (Utc::now() - mark.as_of).num_seconds().max(0) as u64;
        if age_secs > mark.validity_window.as_secs() {
            return Err(ValuationError::MarkedValueStale {
                reason: format!(
                    "mark is {age_secs}s old, validity window is {}s",
                    mark.validity_window.as_secs()
                ),
            });
        }
        Ok(mark)
    }
}

impl BookKeeper for AttestedBookKeeper {
    fn aum(&mut self) -> Result<Valuation, ValuationError> {
        let mark = self.trusted_mark()?;
        let valuation = Valuation {
            value: mark.aum,
            as_of: mark.as_of,
        };
        self.last_aum = valuation;
        Ok(valuation)
    }

    fn nav(&mut self) -> Result<Valuation, ValuationError> {
        let mark = self.trusted_mark()?;
        let supply = self.shares.read().total_supply();
        let value = if supply == 0 { WAD } else { mark.nav };
        let valuation = Valuation {
            value,
            as_of: mark.as_of,
        };
        self.last_nav = valuation;
        Ok(valuation)
    }

    fn last_known_aum(&self) -> Valuation {
        self.last_aum
    }

    fn last_known_nav(&self) -> Valuation {
        self.last_nav
    }

    fn check_expected_nav(&mut self, candidate: u128) -> Result<(), ValuationError> {
        let actual = self.nav()?;
        check_within_margin(candidate, actual.value, self.margin_bps)
    }

    fn note_fund_movement(&mut self) {
        if self.settled {
            tracing::debug!("fund movement invalidated the current mark");
        }
        self.settled = false;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
