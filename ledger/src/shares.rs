//! # Share Token
//!
//! The supply-elastic claim token of a fund. One share is a proportional
//! claim on pool value; supply only grows when the owning repository mints
//! at deposit settlement and only shrinks when it burns at withdrawal
//! settlement.
//!
//! ## Authority Model
//!
//! Mint and burn are gated on a single `authority` account — the
//! repository's custody account, fixed at construction. Transfer gating is a
//! separate concern delegated to the external access-control collaborator
//! and is *never* consulted for mint/burn: a compliance hold must not be
//! able to block settlement accounting.
//!
//! Shares are WAD-denominated (18 decimals) so share arithmetic and
//! valuation arithmetic share one fixed-point scale.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SHARE_DECIMALS;
use crate::gating::{OpenGate, SharedGating};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during share-token operations.
#[derive(Debug, Error)]
pub enum ShareError {
    /// The caller is not the mint/burn authority.
    #[error("not the share authority: {caller} (authority is {authority})")]
    NotShareAuthority {
        /// The account that attempted the privileged operation.
        caller: String,
        /// The configured authority.
        authority: String,
    },

    /// Attempted to move or burn more than the available balance.
    #[error("insufficient shares: {account} holds {available}, requested {requested}")]
    InsufficientShares {
        /// The account being debited.
        account: String,
        /// Its current share balance.
        available: u128,
        /// The amount that was requested.
        requested: u128,
    },

    /// Supply would exceed `u128::MAX`.
    #[error("share supply overflow: minting {amount} would exceed the representable supply")]
    SupplyOverflow {
        /// The amount that caused the overflow.
        amount: u128,
    },

    /// The recipient is not admitted by the gating collaborator.
    #[error("recipient not permitted to receive shares: {0}")]
    RecipientNotPermitted(String),

    /// Zero-amount operations are no-ops and indicate a caller bug.
    #[error("zero-amount share operations are not permitted")]
    ZeroAmount,
}

// ---------------------------------------------------------------------------
// ShareToken
// ---------------------------------------------------------------------------

/// The fungible claim token of one fund.
#[derive(Clone, Serialize, Deserialize)]
pub struct ShareToken {
    /// Ticker symbol (e.g., "cfUSD-S").
    symbol: String,

    /// The only account allowed to mint and burn. Set once at construction
    /// to the repository's custody account.
    authority: String,

    /// Current total supply in smallest (WAD) units.
    total_supply: u128,

    /// Per-account share balances.
    balances: HashMap<String, u128>,

    /// Recipient gate consulted on holder-to-holder transfers.
    #[serde(skip, default = "open_gate")]
    gating: SharedGating,

    /// Timestamp of the last supply- or balance-modifying operation.
    last_updated: DateTime<Utc>,
}

fn open_gate() -> SharedGating {
    Arc::new(OpenGate)
}

impl std::fmt::Debug for ShareToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareToken")
            .field("symbol", &self.symbol)
            .field("authority", &self.authority)
            .field("total_supply", &self.total_supply)
            .field("holders", &self.balances.len())
            .finish()
    }
}

impl ShareToken {
    /// Creates a zero-supply share token bound to its mint/burn authority.
    pub fn new(symbol: &str, authority: &str, gating: SharedGating) -> Self {
        Self {
            symbol: symbol.to_string(),
            authority: authority.to_string(),
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

    /// Returns the decimal precision. Shares are always WAD-denominated.
    pub fn decimals(&self) -> u8 {
        SHARE_DECIMALS
    }

    /// Returns the mint/burn authority account.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Returns the current total supply.
    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    /// Returns the share balance of an account.
    pub fn balance_of(&self, account: &str) -> u128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Mints new shares to `to`. Authority-only; never gated.
    pub fn mint(&mut self, caller: &str, to: &str, amount: u128) -> Result<(), ShareError> {
        self.require_authority(caller)?;
        if amount == 0 {
            return Err(ShareError::ZeroAmount);
        }
        self.total_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(ShareError::SupplyOverflow { amount })?;
        *self.balances.entry(to.to_string()).or_insert(0) += amount;
        self.last_updated = Utc::now();
        tracing::debug!(token = %self.symbol, to, amount, "shares minted");
        Ok(())
    }

    /// Burns shares from `from`. Authority-only; never gated.
    pub fn burn(&mut self, caller: &str, from: &str, amount: u128) -> Result<(), ShareError> {
        self.require_authority(caller)?;
        if amount == 0 {
            return Err(ShareError::ZeroAmount);
        }
        self.debit(from, amount)?;
        // Supply can't underflow: the debited balance was part of it.
        self.total_supply -= amount;
        self.last_updated = Utc::now();
        tracing::debug!(token = %self.symbol, from, amount, "shares burned");
        Ok(())
    }

    /// Holder-to-holder transfer, recipient-gated.
    pub fn transfer(&mut self, from: &str, to: &str, amount: u128) -> Result<(), ShareError> {
        if amount == 0 {
            return Err(ShareError::ZeroAmount);
        }
        if !self.gating.can_receive(to) {
            return Err(ShareError::RecipientNotPermitted(to.to_string()));
        }
        self.debit(from, amount)?;
        *self.balances.entry(to.to_string()).or_insert(0) += amount;
        self.last_updated = Utc::now();
        Ok(())
    }

    /// Authority-only custody return that bypasses recipient gating.
    ///
    /// Used by cancellation paths: escrowed shares were the requester's own,
    /// so handing them back must not fail on a gating restriction.
    pub fn release(&mut self, caller: &str, to: &str, amount: u128) -> Result<(), ShareError> {
        self.require_authority(caller)?;
        if amount == 0 {
            return Err(ShareError::ZeroAmount);
        }
        let custody = caller.to_string();
        self.debit(&custody, amount)?;
        *self.balances.entry(to.to_string()).or_insert(0) += amount;
        self.last_updated = Utc::now();
        Ok(())
    }

    fn require_authority(&self, caller: &str) -> Result<(), ShareError> {
        if caller != self.authority {
            return Err(ShareError::NotShareAuthority {
                caller: caller.to_string(),
                authority: self.authority.clone(),
            });
        }
        Ok(())
    }

    fn debit(&mut self, from: &str, amount: u128) -> Result<(), ShareError> {
        let available = self.balance_of(from);
        if available < amount {
            return Err(ShareError::InsufficientShares {
                account: from.to_string(),
                available,
                requested: amount,
            });
        }
        *self.balances.get_mut(from).expect("balance exists") -= amount;
        Ok(())
    }
}

/// Shared handle to a share token.
pub type SharedShareToken = Arc<RwLock<ShareToken>>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gating::AccessList;

    const REPO: &str = "fund-custody";

    fn token() -> ShareToken {
        ShareToken::new("cfUSD-S", REPO, Arc::new(OpenGate))
    }

    #[test]
    fn mint_requires_authority() {
        let mut shares = token();
        let err = shares.mint("mallory", "alice", 100).unwrap_err();
        assert!(matches!(err, ShareError::NotShareAuthority { .. }));
        assert_eq!(shares.total_supply(), 0);
    }

    #[test]
    fn mint_and_burn_move_supply() {
        let mut shares = token();
        shares.mint(REPO, "alice", 1_000).unwrap();
        assert_eq!(shares.total_supply(), 1_000);
        assert_eq!(shares.balance_of("alice"), 1_000);

        shares.burn(REPO, "alice", 400).unwrap();
        assert_eq!(shares.total_supply(), 600);
        assert_eq!(shares.balance_of("alice"), 600);
    }

    #[test]
    fn burn_more_than_held_rejected() {
        let mut shares = token();
        shares.mint(REPO, "alice", 100).unwrap();
        let err = shares.burn(REPO, "alice", 101).unwrap_err();
        assert!(matches!(err, ShareError::InsufficientShares { .. }));
        assert_eq!(shares.total_supply(), 100);
    }

    #[test]
    fn mint_to_ungated_account_still_succeeds() {
        // Gating never blocks mint: a compliance hold cannot brick settlement.
        let gate = Arc::new(AccessList::new()); // denies everyone
        let mut shares = ShareToken::new("cfUSD-S", REPO, gate);
        shares.mint(REPO, "held-account", 10).unwrap();
        assert_eq!(shares.balance_of("held-account"), 10);
    }

    #[test]
    fn transfer_is_recipient_gated() {
        let gate = Arc::new(AccessList::with_accounts(["alice"]));
        let mut shares = ShareToken::new("cfUSD-S", REPO, gate);
        shares.mint(REPO, "alice", 100).unwrap();

        let err = shares.transfer("alice", "mallory", 10).unwrap_err();
        assert!(matches!(err, ShareError::RecipientNotPermitted(_)));

        shares.transfer("alice", "alice", 10).unwrap(); // self-transfer allowed
        assert_eq!(shares.balance_of("alice"), 100);
    }

    #[test]
    fn release_bypasses_gating() {
        let gate = Arc::new(AccessList::new()); // denies everyone
        let mut shares = ShareToken::new("cfUSD-S", REPO, gate);
        shares.mint(REPO, REPO, 50).unwrap();

        shares.release(REPO, "held-account", 50).unwrap();
        assert_eq!(shares.balance_of("held-account"), 50);
        assert_eq!(shares.balance_of(REPO), 0);
    }

    #[test]
    fn release_requires_authority() {
        let mut shares = token();
        shares.mint(REPO, REPO, 50).unwrap();
        assert!(matches!(
            shares.release("mallory", "alice", 50),
            Err(ShareError::NotShareAuthority { .. })
        ));
    }

    #[test]
    fn zero_amount_operations_rejected() {
        let mut shares = token();
        assert!(matches!(
            shares.mint(REPO, "alice", 0),
            Err(ShareError::ZeroAmount)
        ));
        assert!(matches!(
            shares.transfer("alice", "bob", 0),
            Err(ShareError::ZeroAmount)
        ));
    }
}
