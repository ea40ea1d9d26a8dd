//! # Access Gating
//!
//! The ledger does not decide who is allowed in — that judgment belongs to an
//! external compliance collaborator. This module defines the narrow interface
//! the ledger consumes ([`GatingService`]) and two in-process implementations:
//! [`OpenGate`] for development and tests, and [`AccessList`] for funds that
//! run an explicit allow-list.
//!
//! The gate answers two questions and nothing more:
//!
//! 1. May this account enqueue deposits? (checked at request time)
//! 2. May this account *receive* a transfer? (checked whenever value moves
//!    toward an account)
//!
//! Mint and burn of share tokens are deliberately outside the gate's reach —
//! a compliance hold on an account must never be able to brick the ledger's
//! own settlement accounting.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

// ---------------------------------------------------------------------------
// GatingService
// ---------------------------------------------------------------------------

/// Access-control decisions consumed by the ledger.
///
/// Implementations must be cheap and infallible: the ledger calls these
/// inside settlement loops and treats the answer as authoritative.
pub trait GatingService: Send + Sync {
    /// Returns `true` if `account` may enqueue new deposits.
    fn can_deposit(&self, account: &str) -> bool;

    /// Returns `true` if `account` may receive asset or share transfers.
    fn can_receive(&self, account: &str) -> bool;
}

/// Shared handle to a gating service.
pub type SharedGating = Arc<dyn GatingService>;

// ---------------------------------------------------------------------------
// OpenGate
// ---------------------------------------------------------------------------

/// A gate that lets everyone through. The devnet default.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenGate;

impl GatingService for OpenGate {
    fn can_deposit(&self, _account: &str) -> bool {
        true
    }

    fn can_receive(&self, _account: &str) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// AccessList
// ---------------------------------------------------------------------------

/// Deny-by-default allow-list gate.
///
/// Accounts must be explicitly admitted before they can deposit or receive.
/// Admission and revocation are interior-mutable so a single shared handle
/// can serve the ledger while a compliance process manages membership.
#[derive(Debug, Default)]
pub struct AccessList {
    allowed: RwLock<HashSet<String>>,
}

impl AccessList {
    /// Creates an empty (deny-everyone) access list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an access list pre-seeded with the given accounts.
    pub fn with_accounts<I, S>(accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: RwLock::new(accounts.into_iter().map(Into::into).collect()),
        }
    }

    /// Admits an account. Idempotent.
    pub fn admit(&self, account: &str) {
        self.allowed.write().insert(account.to_string());
    }

    /// Revokes an account. Idempotent; revoking an unknown account is a no-op.
    pub fn revoke(&self, account: &str) {
        self.allowed.write().remove(account);
    }

    /// Returns `true` if the account is currently admitted.
    pub fn is_admitted(&self, account: &str) -> bool {
        self.allowed.read().contains(account)
    }
}

impl GatingService for AccessList {
    fn can_deposit(&self, account: &str) -> bool {
        self.is_admitted(account)
    }

    fn can_receive(&self, account: &str) -> bool {
        self.is_admitted(account)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_gate_admits_anyone() {
        let gate = OpenGate;
        assert!(gate.can_deposit("anyone"));
        assert!(gate.can_receive(""));
    }

    #[test]
    fn access_list_denies_by_default() {
        let gate = AccessList::new();
        assert!(!gate.can_deposit("alice"));
        assert!(!gate.can_receive("alice"));
    }

    #[test]
    fn admit_then_revoke() {
        let gate = AccessList::new();
        gate.admit("alice");
        assert!(gate.can_deposit("alice"));
        assert!(gate.can_receive("alice"));

        gate.revoke("alice");
        assert!(!gate.can_deposit("alice"));
    }

    #[test]
    fn preseeded_accounts_are_admitted() {
        let gate = AccessList::with_accounts(["alice", "bob"]);
        assert!(gate.can_receive("alice"));
        assert!(gate.can_receive("bob"));
        assert!(!gate.can_receive("carol"));
    }
}
