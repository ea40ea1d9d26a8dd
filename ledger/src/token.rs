//! # Deposit-Asset Accounting
//!
//! An [`AssetBook`] is the ledger's view of the designated deposit asset:
//! per-account balances, total supply, and recipient-gated transfers. It is
//! the Rust stand-in for an externally issued fungible token — issuance is
//! open (the real supply authority lives outside this system), but every
//! transfer is checked for balance sufficiency and recipient admissibility.
//!
//! All amounts are `u128` in smallest-unit denomination and all arithmetic is
//! checked. A book is shared between the repository and its valuation
//! strategies as [`SharedAssetBook`]; interior locking follows the
//! `Arc<parking_lot::RwLock<..>>` idiom used everywhere shared books appear
//! in this crate.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gating::{OpenGate, SharedGating};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during token-book operations.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Attempted to move more than the available balance.
    #[error("insufficient balance: {account} holds {available}, requested {requested}")]
    InsufficientBalance {
        /// The account being debited.
        account: String,
        /// Its current balance.
        available: u128,
        /// The amount that was requested.
        requested: u128,
    },

    /// Total supply would exceed `u128::MAX`.
    #[error("supply overflow: issuing {amount} would exceed the representable supply")]
    SupplyOverflow {
        /// The amount that caused the overflow.
        amount: u128,
    },

    /// The recipient is not admitted by the gating collaborator.
    #[error("recipient not permitted to receive transfers: {0}")]
    RecipientNotPermitted(String),

    /// Zero-amount operations are no-ops and indicate a caller bug.
    #[error("zero-amount token operations are not permitted")]
    ZeroAmount,
}

// ---------------------------------------------------------------------------
// AssetBook
// ---------------------------------------------------------------------------

/// Balance book for one fungible asset.
#[derive(Clone, Serialize, Deserialize)]
pub struct AssetBook {
    /// Ticker symbol (e.g., "cUSD").
    symbol: String,

    /// Decimal places of the smallest unit. Display and normalization only —
    /// the book itself never divides.
    decimals: u8,

    /// Current total supply in smallest units.
    total_supply: u128,

    /// Per-account balances.
    balances: HashMap<String, u128>,

    /// Recipient gate consulted on every transfer.
    #[serde(skip, default = "open_gate")]
    gating: SharedGating,

    /// Timestamp of the last balance-modifying operation.
    last_updated: DateTime<Utc>,
}

fn open_gate() -> SharedGating {
    Arc::new(OpenGate)
}

impl std::fmt::Debug for AssetBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetBook")
            .field("symbol", &self.symbol)
            .field("decimals", &self.decimals)
            .field("total_supply", &self.total_supply)
            .field("accounts", &self.balances.len())
            .finish()
    }
}

impl AssetBook {
    /// Creates an empty book with an allow-everyone gate.
    pub fn new(symbol: &str, decimals: u8) -> Self {
        Self::with_gating(symbol, decimals, Arc::new(OpenGate))
    }

    /// Creates an empty book with an explicit gating collaborator.
    pub fn with_gating(symbol: &str, decimals: u8, gating: SharedGating) -> Self {
        Self {
            symbol: symbol.to_string(),
            decimals,
            total_supply: 0,
            balances: HashMap::new(),
            gating,
            last_updated: Utc::now(),
        }
    }

    /// Returns the ticker symbol.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Returns the decimal precision of the smallest unit.
    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Returns the current total supply.
    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    /// Returns the balance of an account (zero if the account is unknown).
    pub fn balance_of(&self, account: &str) -> u128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Issues new units to an account.
    ///
    /// Issuance models the external supply authority (a bridge, a mint, a
    /// test fixture) and is not recipient-gated.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::ZeroAmount`] for zero issues and
    /// [`TokenError::SupplyOverflow`] if the supply would exceed `u128::MAX`.
    pub fn issue(&mut self, to: &str, amount: u128) -> Result<(), TokenError> {
        if amount == 0 {
            return Err(TokenError::ZeroAmount);
        }
        self.total_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(TokenError::SupplyOverflow { amount })?;
        let balance = self.balances.entry(to.to_string()).or_insert(0);
        // Safe: a single balance can never exceed total_supply, checked above.
        *balance += amount;
        self.last_updated = Utc::now();
        Ok(())
    }

    /// Moves units between accounts, checking the recipient against the gate.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::ZeroAmount`], [`TokenError::InsufficientBalance`],
    /// or [`TokenError::RecipientNotPermitted`]. On error no balance changes.
    pub fn transfer(&mut self, from: &str, to: &str, amount: u128) -> Result<(), TokenError> {
        if amount == 0 {
            return Err(TokenError::ZeroAmount);
        }
        if !self.gating.can_receive(to) {
            return Err(TokenError::RecipientNotPermitted(to.to_string()));
        }
        self.debit(from, amount)?;
        *self.balances.entry(to.to_string()).or_insert(0) += amount;
        self.last_updated = Utc::now();
        Ok(())
    }

    fn debit(&mut self, from: &str, amount: u128) -> Result<(), TokenError> {
        let available = self.balance_of(from);
        if available < amount {
            return Err(TokenError::InsufficientBalance {
                account: from.to_string(),
                available,
                requested: amount,
            });
        }
        *self.balances.get_mut(from).expect("balance exists") -= amount;
        Ok(())
    }
}

/// Shared handle to an asset book.
pub type SharedAssetBook = Arc<RwLock<AssetBook>>;

/// Wraps a book in the shared-handle form the repository and valuation
/// strategies consume.
pub fn shared(book: AssetBook) -> SharedAssetBook {
    Arc::new(RwLock::new(book))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gating::AccessList;

    #[test]
    fn issue_creates_balance_and_supply() {
        let mut book = AssetBook::new("cUSD", 6);
        book.issue("alice", 1_000_000).unwrap();
        assert_eq!(book.balance_of("alice"), 1_000_000);
        assert_eq!(book.total_supply(), 1_000_000);
    }

    #[test]
    fn issue_zero_rejected() {
        let mut book = AssetBook::new("cUSD", 6);
        assert!(matches!(book.issue("alice", 0), Err(TokenError::ZeroAmount)));
    }

    #[test]
    fn issue_overflow_rejected() {
        let mut book = AssetBook::new("cUSD", 6);
        book.issue("alice", u128::MAX).unwrap();
        assert!(matches!(
            book.issue("bob", 1),
            Err(TokenError::SupplyOverflow { .. })
        ));
    }

    #[test]
    fn transfer_moves_balance() {
        let mut book = AssetBook::new("cUSD", 6);
        book.issue("alice", 500).unwrap();
        book.transfer("alice", "bob", 200).unwrap();
        assert_eq!(book.balance_of("alice"), 300);
        assert_eq!(book.balance_of("bob"), 200);
        assert_eq!(book.total_supply(), 500);
    }

    #[test]
    fn transfer_insufficient_rejected() {
        let mut book = AssetBook::new("cUSD", 6);
        book.issue("alice", 100).unwrap();
        let err = book.transfer("alice", "bob", 101).unwrap_err();
        assert!(matches!(
            err,
            TokenError::InsufficientBalance {
                available: 100,
                requested: 101,
                ..
            }
        ));
        // Nothing moved.
        assert_eq!(book.balance_of("alice"), 100);
        assert_eq!(book.balance_of("bob"), 0);
    }

    #[test]
    fn transfer_to_ungated_recipient_rejected() {
        let gate = Arc::new(AccessList::with_accounts(["alice"]));
        let mut book = AssetBook::with_gating("cUSD", 6, gate);
        book.issue("alice", 100).unwrap();
        let err = book.transfer("alice", "mallory", 50).unwrap_err();
        assert!(matches!(err, TokenError::RecipientNotPermitted(_)));
        assert_eq!(book.balance_of("alice"), 100);
    }

    #[test]
    fn unknown_account_has_zero_balance() {
        let book = AssetBook::new("cUSD", 6);
        assert_eq!(book.balance_of("nobody"), 0);
    }

    #[test]
    fn serialization_roundtrip_preserves_balances() {
        let mut book = AssetBook::new("cUSD", 6);
        book.issue("alice", 42).unwrap();
        let json = serde_json::to_string(&book).expect("serialize");
        let restored: AssetBook = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored.balance_of("alice"), 42);
        assert_eq!(restored.total_supply(), 42);
        assert_eq!(restored.symbol(), "cUSD");
    }
}
