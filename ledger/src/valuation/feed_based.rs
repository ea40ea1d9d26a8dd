//! # Feed-Based Book Keeper
//!
//! Mark-to-market valuation: every asset the fund holds is watchlisted as an
//! (asset book, price feed) pair, and AUM is the sum of on-ledger balances —
//! optionally including the executor's holding account — times validated
//! feed prices, normalized to WAD.
//!
//! One `aum()` read validates every watchlist entry against the same
//! instant, so a batch priced from a single read is internally consistent.
//! The first bad feed aborts the whole read: a partially marked pool is not
//! a valuation, it's a guess.
//!
//! Custody also holds units the pool does not own — queued deposits and
//! claimable balances. A keeper wired to its repository's reservation
//! totals ([`FeedBookKeeper::net_reservations`]) subtracts those before
//! marking, so pending user money never counts as fund value.

use std::time::Duration;

use chrono::Utc;

use crate::config::{DEFAULT_MARGIN_OF_ERROR_BPS, DEFAULT_MAX_PRICE_AGE, WAD};
use crate::math;
use crate::pricing::{validate_quote, SharedFeed};
use crate::repository::SharedReservations;
use crate::shares::SharedShareToken;
use crate::token::SharedAssetBook;
use crate::valuation::{check_within_margin, BookKeeper, Valuation, ValuationError};

// ---------------------------------------------------------------------------
// WatchedAsset
// ---------------------------------------------------------------------------

/// One watchlist entry: an asset the fund holds and the feed that prices it.
#[derive(Clone)]
pub struct WatchedAsset {
    /// Label used in errors and logs (normally the asset's symbol).
    pub asset: String,

    /// The asset's balance book.
    pub book: SharedAssetBook,

    /// The price source for this asset.
    pub feed: SharedFeed,
}

// ---------------------------------------------------------------------------
// FeedBookKeeper
// ---------------------------------------------------------------------------

/// Watchlist mark-to-market keeper.
pub struct FeedBookKeeper {
    /// The account whose balances constitute the pool (the repository's
    /// custody account).
    holder: String,

    /// When set, this account's balances are counted into AUM as well —
    /// funds parked with the executor are still pool value.
    executor: Option<String>,

    /// When set, this many units of the named asset are *subtracted* from
    /// the holder's marked balance: queued deposits and claimables sit in
    /// custody but are owed to users, not owned by the pool.
    reserved: Option<(String, SharedReservations)>,

    watchlist: Vec<WatchedAsset>,
    shares: SharedShareToken,
    max_price_age: Duration,
    margin_bps: u32,

    last_aum: Valuation,
    last_nav: Valuation,
}

impl FeedBookKeeper {
    /// Creates a keeper with an empty watchlist and default tolerances.
    pub fn new(holder: &str, shares: SharedShareToken) -> Self {
        Self {
            holder: holder.to_string(),
            executor: None,
            reserved: None,
            watchlist: Vec::new(),
            shares,
            max_price_age: DEFAULT_MAX_PRICE_AGE,
            margin_bps: DEFAULT_MARGIN_OF_ERROR_BPS,
            last_aum: Valuation::now(0),
            last_nav: Valuation::now(WAD),
        }
    }

    /// Counts `executor`'s balances into AUM from now on.
    pub fn include_executor(&mut self, executor: &str) {
        self.executor = Some(executor.to_string());
    }

    /// Nets a repository's reservation totals out of `asset`'s marked
    /// balance. Without this, a queued deposit would inflate the NAV that
    /// prices its own settlement and dilute every entrant behind it.
    pub fn net_reservations(&mut self, asset: &str, reservations: SharedReservations) {
        self.reserved = Some((asset.to_string(), reservations));
    }

    /// Adds a watchlist entry. Operator-owned configuration.
    pub fn watch(&mut self, entry: WatchedAsset) {
        tracing::info!(asset = %entry.asset, feed = %entry.feed.description(), "asset watchlisted");
        self.watchlist.push(entry);
    }

    /// Removes the watchlist entry for `asset`, if present.
    pub fn unwatch(&mut self, asset: &str) -> bool {
        let before = self.watchlist.len();
        self.watchlist.retain(|w| w.asset != asset);
        self.watchlist.len() != before
    }

    /// Overrides the staleness tolerance for watched feeds.
    pub fn set_max_price_age(&mut self, max_age: Duration) {
        self.max_price_age = max_age;
    }

    /// Overrides the `check_expected_nav` tolerance.
    pub fn set_margin_of_error(&mut self, margin_bps: u32) {
        self.margin_bps = margin_bps;
    }
}

impl BookKeeper for FeedBookKeeper {
    fn aum(&mut self) -> Result<Valuation, ValuationError> {
        let now = Utc::now();
        let mut total: u128 = 0;
        let mut oldest_input = now;

        for watched in &self.watchlist {
            let quote = watched.feed.quote();
            let price_wad = validate_quote(&watched.asset, &quote, self.max_price_age, now)?;

            let (balance, decimals) = {
                let book = watched.book.read();
                let mut balance = book.balance_of(&self.holder);
                if let Some(executor) = &self.executor {
                    balance += book.balance_of(executor);
                }
                if let Some((asset, reservations)) = &self.reserved {
                    if asset == &watched.asset {
                        balance = balance.saturating_sub(reservations.total());
                    }
                }
                (balance, book.decimals())
            };

            let balance_wad = math::scale_to_wad(balance, decimals)?;
            let value = math::wad_mul(balance_wad, price_wad)?;
            total = total.checked_add(value).ok_or(math::MathError::Overflow)?;
            oldest_input = oldest_input.min(quote.updated_at);
        }

        let valuation = Valuation {
            value: total,
            as_of: oldest_input,
        };
        self.last_aum = valuation;
        Ok(valuation)
    }

    fn nav(&mut self) -> Result<Valuation, ValuationError> {
        let aum = self.aum()?;
        let supply = self.shares.read().total_supply();
        let value = if supply == 0 {
            WAD
        } else {
            math::wad_div(aum.value, supply)?
        };
        let valuation = Valuation {
            value,
            as_of: aum.as_of,
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
        // Mark-to-market reads live balances; nothing to invalidate.
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
