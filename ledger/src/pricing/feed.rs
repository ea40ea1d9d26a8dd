//! # Price Feed Adapter
//!
//! Normalizes an external price source into the one shape the valuation
//! layer understands: a [`FeedQuote`] of `(price, decimals, updated_at)`.
//!
//! The trait is deliberately tiny. Real deployments wrap an on-chain oracle
//! or a market-data subscription behind it; tests and the devnet node use
//! [`StaticFeed`], which is just a settable quote behind a mutex.
//!
//! Prices are signed (`i128`) at this boundary because upstream sources can
//! and do publish zero or negative values during incidents. Rejecting those
//! is the validation layer's job, not the adapter's.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// FeedQuote
// ---------------------------------------------------------------------------

/// One observation from a price source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedQuote {
    /// Raw price as published, in `decimals`-scaled units of the fund's
    /// base currency. May be zero or negative when the source misbehaves.
    pub price: i128,

    /// Decimal precision of `price`.
    pub decimals: u8,

    /// When the source last updated this price.
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// PriceFeed
// ---------------------------------------------------------------------------

/// A normalized external price source.
pub trait PriceFeed: Send + Sync {
    /// Returns the source's current quote, as published. No validation —
    /// garbage in, garbage out; the trust boundary is downstream.
    fn quote(&self) -> FeedQuote;

    /// Human-readable description for logs and diagnostics.
    fn description(&self) -> String;
}

/// Shared handle to a price feed.
pub type SharedFeed = Arc<dyn PriceFeed>;

// ---------------------------------------------------------------------------
// StaticFeed
// ---------------------------------------------------------------------------

/// A settable in-memory feed for tests and devnet.
///
/// Interior-mutable so a cloned handle can keep publishing while the
/// valuation layer holds the same feed as a `SharedFeed`.
pub struct StaticFeed {
    label: String,
    quote: Mutex<FeedQuote>,
}

impl StaticFeed {
    /// Creates a feed with an initial price, stamped now.
    pub fn new(label: &str, price: i128, decimals: u8) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            quote: Mutex::new(FeedQuote {
                price,
                decimals,
                updated_at: Utc::now(),
            }),
        })
    }

    /// Publishes a new price, stamped now.
    pub fn set_price(&self, price: i128) {
        let mut quote = self.quote.lock();
        quote.price = price;
        quote.updated_at = Utc::now();
    }

    /// Publishes a price with an explicit timestamp. Lets tests manufacture
    /// stale quotes without sleeping.
    pub fn set_price_at(&self, price: i128, updated_at: DateTime<Utc>) {
        let mut quote = self.quote.lock();
        quote.price = price;
        quote.updated_at = updated_at;
    }
}

impl PriceFeed for StaticFeed {
    fn quote(&self) -> FeedQuote {
        *self.quote.lock()
    }

    fn description(&self) -> String {
        format!("static:{}", self.label)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
