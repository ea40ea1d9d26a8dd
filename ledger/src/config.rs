//! # Protocol Configuration & Constants
//!
//! Every magic number in COFFER lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! These values define how the fund ledger behaves under settlement load and
//! how paranoid the valuation layer is about its price sources. Changing them
//! for a live fund is somewhere between "delicate" and "career-ending", so
//! choose wisely before the first deposit lands.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Fixed-Point Base
// ---------------------------------------------------------------------------

/// The fixed-point scaling base: 10^18, a.k.a. one WAD.
///
/// Every AUM and NAV figure in the ledger is a `u128` scaled by this value.
/// 18 decimals gives us sub-atomic precision on any real-world currency and
/// matches the share token's own denomination, so a NAV of exactly `WAD`
/// means "one base unit per share".
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// Decimal places of the share token. Always 18 — shares are WAD-denominated
/// so share arithmetic and valuation arithmetic share one scale.
pub const SHARE_DECIMALS: u8 = 18;

/// The NAV of an empty fund. With zero shares outstanding there is nothing
/// to divide by, so the price of the first share is pinned to exactly 1.0.
pub const INITIAL_NAV: u128 = WAD;

/// Basis-point scale: 10_000 bps = 100%. All fees and error margins are
/// expressed in basis points because floating point and money do not mix.
pub const BPS_SCALE: u32 = 10_000;

/// The widest decimal precision the normalization helpers accept.
/// 10^38 still fits in a `u128`; anything wider is a configuration bug,
/// not a token we want to price.
pub const MAX_SUPPORTED_DECIMALS: u8 = 38;

// ---------------------------------------------------------------------------
// Settlement Limits
// ---------------------------------------------------------------------------

/// Maximum number of live queue entries one settlement call may process.
///
/// Settlement walks the queue from the cursor and does real work per entry
/// (valuation math, mint/burn, fee transfer), so the batch has to be bounded
/// or a long queue turns a routine operator call into an unbounded stall.
/// Callers pass their own `limit`; anything above this ceiling is rejected
/// outright regardless of how many entries are actually pending.
pub const MAX_BATCH_SIZE: usize = 100;

// ---------------------------------------------------------------------------
// Valuation Trust Boundary
// ---------------------------------------------------------------------------

/// Default maximum age of a price-feed quote before it is considered stale.
///
/// 24 hours is deliberately generous — the watchlist may include assets whose
/// reference feeds only tick daily. Funds marking volatile assets should
/// configure a much tighter window on their book keeper.
pub const DEFAULT_MAX_PRICE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Default validity window for an operator-pushed valuation mark.
///
/// A mark older than this at read time fails the valuation rather than
/// silently pricing settlements against last week's statement.
pub const DEFAULT_MARK_VALIDITY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Default tolerance for `check_expected_nav`, in basis points.
/// 100 bps = 1%. A candidate NAV further than this from the freshly
/// computed figure is treated as an inconsistency, not a rounding artifact.
pub const DEFAULT_MARGIN_OF_ERROR_BPS: u32 = 100;

// ---------------------------------------------------------------------------
// Fees
// ---------------------------------------------------------------------------

/// Default license fee charged on settled deposits, in basis points of the
/// gross deposit amount. 50 bps = 0.50%.
pub const DEFAULT_LICENSE_FEE_BPS: u32 = 50;

/// Hard ceiling on the license fee a factory or fund may configure.
/// 10% is already an outrage; anything above it is a typo.
pub const MAX_LICENSE_FEE_BPS: u32 = 1_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wad_is_ten_to_the_eighteenth() {
        assert_eq!(WAD, 10u128.pow(18));
        assert_eq!(SHARE_DECIMALS, 18);
        assert_eq!(INITIAL_NAV, WAD);
    }

    #[test]
    fn batch_size_is_positive_and_bounded() {
        // Zero would make settlement a no-op forever; anything huge defeats
        // the point of bounding the walk.
        assert!(MAX_BATCH_SIZE > 0);
        assert!(MAX_BATCH_SIZE <= 10_000);
    }

    #[test]
    fn fee_constants_sanity() {
        assert!(DEFAULT_LICENSE_FEE_BPS < MAX_LICENSE_FEE_BPS);
        assert!(MAX_LICENSE_FEE_BPS < BPS_SCALE);
    }

    #[test]
    fn staleness_windows_are_nonzero() {
        assert!(DEFAULT_MAX_PRICE_AGE.as_secs() > 0);
        assert!(DEFAULT_MARK_VALIDITY_WINDOW.as_secs() > 0);
    }

    #[test]
    fn margin_of_error_is_a_sane_fraction() {
        assert!(DEFAULT_MARGIN_OF_ERROR_BPS > 0);
        assert!(DEFAULT_MARGIN_OF_ERROR_BPS < BPS_SCALE);
    }
}
