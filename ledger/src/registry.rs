//! # Attestation Registry
//!
//! Interface to the external entity registry that the account-sourced
//! valuation strategy reads. The registry itself — who writes to it, how its
//! figures are audited — is another system's problem; the ledger only needs
//! one lookup: "what is the attested value filed under this key, and when
//! was it attested?"
//!
//! [`InMemoryRegistry`] is the in-process implementation used by tests and
//! the devnet node.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// AttestedValue
// ---------------------------------------------------------------------------

/// One attested figure filed in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestedValue {
    /// WAD-scaled value in the fund's base currency.
    pub value: u128,

    /// When the figure was attested.
    pub as_of: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// AttestationRegistry
// ---------------------------------------------------------------------------

/// Read interface consumed by the account-sourced book keeper.
pub trait AttestationRegistry: Send + Sync {
    /// Returns the attested value filed under `key`, or `None` if the entry
    /// was deleted or never set.
    fn attested_value(&self, key: &str) -> Option<AttestedValue>;
}

/// Shared handle to an attestation registry.
pub type SharedRegistry = Arc<dyn AttestationRegistry>;

// ---------------------------------------------------------------------------
// InMemoryRegistry
// ---------------------------------------------------------------------------

/// Map-backed registry for tests and devnet.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    entries: RwLock<HashMap<String, AttestedValue>>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Files an attested value under `key`, stamped now.
    pub fn record(&self, key: &str, value: u128) {
        self.record_at(key, value, Utc::now());
    }

    /// Files an attested value with an explicit timestamp.
    pub fn record_at(&self, key: &str, value: u128, as_of: DateTime<Utc>) {
        self.entries
            .write()
            .insert(key.to_string(), AttestedValue { value, as_of });
    }

    /// Deletes the entry under `key`, if any.
    pub fn remove(&self, key: &str) -> Option<AttestedValue> {
        self.entries.write().remove(key)
    }
}

impl AttestationRegistry for InMemoryRegistry {
    fn attested_value(&self, key: &str) -> Option<AttestedValue> {
        self.entries.read().get(key).copied()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
