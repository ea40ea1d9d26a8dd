//! # Price Validation
//!
//! The oracle trust boundary. A [`FeedQuote`] that reaches the valuation
//! layer has exactly two ways to be wrong — a non-positive price, or a
//! timestamp older than the keeper's tolerance — and both must abort the
//! read loudly rather than price a settlement against garbage.
//!
//! [`validate_quote`] performs both checks and, on success, returns the
//! price normalized to WAD scale so downstream math never sees the feed's
//! native decimals.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::math::{self, MathError};
use crate::pricing::feed::FeedQuote;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A quote failed the trust-boundary checks.
#[derive(Debug, Error)]
pub enum PriceError {
    /// The source published a zero or negative price.
    #[error("invalid price for asset {asset}: {price}")]
    InvalidPriceForAsset {
        /// The watchlisted asset whose feed misbehaved.
        asset: String,
        /// The offending raw price.
        price: i128,
    },

    /// The quote is older than the configured maximum age.
    #[error("stale price data for asset {asset}: quote is {age_secs}s old (max {max_age_secs}s)")]
    StalePriceData {
        /// The watchlisted asset whose feed went quiet.
        asset: String,
        /// Seconds since the quote's timestamp.
        age_secs: u64,
        /// The configured tolerance in seconds.
        max_age_secs: u64,
    },

    /// Normalization to WAD scale failed.
    #[error("price normalization failed: {0}")]
    Normalization(#[from] MathError),
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Checks a quote for positivity and freshness, returning the WAD-scaled
/// price on success.
///
/// `now` is passed in rather than read off the wall clock so one settlement
/// batch evaluates every watchlist entry against the same instant.
pub fn validate_quote(
    asset: &str,
    quote: &FeedQuote,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Result<u128, PriceError> {
    if quote.price <= 0 {
        return Err(PriceError::InvalidPriceForAsset {
            asset: asset.to_string(),
            price: quote.price,
        });
    }

    // A quote from the future is clock skew, not staleness; age clamps to 0.
    let age_secs = (now - quote.updated_at).num_seconds().max(0) as u64;
    if age_secs > max_age.as_secs() {
        return Err(PriceError::StalePriceData {
            asset: asset.to_string(),
            age_secs,
            max_age_secs: max_age.as_secs(),
        });
    }

    Ok(math::scale_to_wad(quote.price as u128, quote.decimals)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
