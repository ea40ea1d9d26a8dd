//! # Pricing — Feed Adapters & the Oracle Trust Boundary
//!
//! External price sources are not trusted; they are *normalized* and then
//! *interrogated*. This module owns both halves:
//!
//! ```text
//! feed.rs        — PriceFeed trait: (price, decimals, updated_at) quotes
//! validation.rs  — positivity + staleness checks, WAD normalization
//! ```
//!
//! Everything downstream of [`validation::validate_quote`] may assume a
//! strictly positive, fresh, WAD-scaled price. Everything upstream of it is
//! presumed hostile or broken until proven otherwise.

pub mod feed;
pub mod validation;

pub use feed::{FeedQuote, PriceFeed, SharedFeed, StaticFeed};
pub use validation::{validate_quote, PriceError};
