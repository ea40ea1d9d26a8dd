//! # Account-Attested Book Keeper
//!
//! Same trust model as [`super::attested`], different plumbing: instead of
//! the operator pushing marks at the keeper, the attested figure lives in an
//! external account registry and is read by key at valuation time. This fits
//! deployments where one audit pipeline files statements for many funds and
//! each fund's keeper just points at its entry.
//!
//! A deleted or never-filed entry is its own failure mode
//! ([`ValuationError::AccountDoesNotExist`]) — distinct from staleness,
//! because the remediation is different: re-link or re-file, not re-attest.

use std::time::Duration;

use chrono::Utc;

use crate::config::{DEFAULT_MARGIN_OF_ERROR_BPS, DEFAULT_MARK_VALIDITY_WINDOW, WAD};
use crate::math;
use crate::registry::{AttestedValue, SharedRegistry};
use crate::shares::SharedShareToken;
use crate::valuation::{check_within_margin, BookKeeper, Valuation, ValuationError};

// ---------------------------------------------------------------------------
// AccountBookKeeper
// ---------------------------------------------------------------------------

/// Keeper that reads its attested figure from a registry entry.
pub struct AccountBookKeeper {
    registry: SharedRegistry,
    key: String,
    shares: SharedShareToken,
    validity_window: Duration,
    settled: bool,
    margin_bps: u32,

    last_aum: Valuation,
    last_nav: Valuation,
}

impl AccountBookKeeper {
    /// Creates a keeper linked to `key` in the given registry.
    ///
    /// The keeper starts armed: the linked entry (if present and fresh) is
    /// trusted until the first fund movement.
    pub fn new(registry: SharedRegistry, key: &str, shares: SharedShareToken) -> Self {
        Self {
            registry,
            key: key.to_string(),
            shares,
            validity_window: DEFAULT_MARK_VALIDITY_WINDOW,
            settled: true,
            margin_bps: DEFAULT_MARGIN_OF_ERROR_BPS,
            last_aum: Valuation::now(0),
            last_nav: Valuation::now(WAD),
        }
    }

    /// Returns the registry key this keeper is linked to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Re-arms the `settled` flag: the operator asserts the registry entry
    /// reflects the pool as it stands after the last movement.
    pub fn confirm_settled(&mut self) {
        self.settled = true;
    }

    /// Returns whether the linked entry is currently trusted.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Overrides the staleness window applied to the entry's `as_of`.
    pub fn set_validity_window(&mut self, window: Duration) {
        self.validity_window = window;
    }

    /// Overrides the `check_expected_nav` tolerance.
    pub fn set_margin_of_error(&mut self, margin_bps: u32) {
        self.margin_bps = margin_bps;
    }

    fn trusted_entry(&self) -> Result<AttestedValue, ValuationError> {
        let entry = self.registry.attested_value(&self.key).ok_or_else(|| {
            ValuationError::AccountDoesNotExist {
                key: self.key.clone(),
            }
        })?;

        if !self.settled {
            return Err(ValuationError::MarkedValueStale {
                reason: "fund movement since last attestation".into(),
            });
        }

        let age_secs = (Utc::now() - entry.as_of).num_seconds().max(0) as u64;
        if age_secs > self.validity_window.as_secs() {
            return Err(ValuationError::MarkedValueStale {
                reason: format!(
                    "registry entry is {age_secs}s old, validity window is {}s",
                    self.validity_window.as_secs()
                ),
            });
        }

        let supply = self.shares.read().total_supply();
        if entry.value == 0 && supply > 0 {
            return Err(ValuationError::NonPositiveAum {
                share_supply: supply,
            });
        }

        Ok(entry)
    }
}

impl BookKeeper for AccountBookKeeper {
    fn aum(&mut self) -> Result<Valuation, ValuationError> {
        let entry = self.trusted_entry()?;
        let valuation = Valuation {
            value: entry.value,
            as_of: entry.as_of,
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
        self.settled = false;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gating::OpenGate;
    use crate::registry::InMemoryRegistry;
    use crate::shares::ShareToken;
    use chrono::Duration as ChronoDuration;
    use parking_lot::RwLock;
    use std::sync::Arc;

    const AUTHORITY: &str = "fund-custody";
    const KEY: &str = "fund-1";

    fn shares() -> SharedShareToken {
        Arc::new(RwLock::new(ShareToken::new(
            "TEST-S",
            AUTHORITY,
            Arc::new(OpenGate),
        )))
    }

    fn setup() -> (AccountBookKeeper, Arc<InMemoryRegistry>, SharedShareToken) {
        let registry = Arc::new(InMemoryRegistry::new());
        let shares = shares();
        let keeper = AccountBookKeeper::new(registry.clone(), KEY, shares.clone());
        (keeper, registry, shares)
    }

    #[test]
    fn missing_entry_fails_account_does_not_exist() {
        let (mut keeper, _registry, _shares) = setup();
        assert!(matches!(
            keeper.aum(),
            Err(ValuationError::AccountDoesNotExist { .. })
        ));
    }

    #[test]
    fn deleted_entry_fails_account_does_not_exist() {
        let (mut keeper, registry, _shares) = setup();
        registry.record(KEY, 100 * WAD);
        assert!(keeper.aum().is_ok());

        registry.remove(KEY);
        assert!(matches!(
            keeper.aum(),
            Err(ValuationError::AccountDoesNotExist { .. })
        ));
    }

    #[test]
    fn nav_divides_registry_value_by_supply() {
        let (mut keeper, registry, shares) = setup();
        registry.record(KEY, 100 * WAD);
        shares.write().mint(AUTHORITY, "alice", 50 * WAD).unwrap();
        assert_eq!(keeper.nav().unwrap().value, 2 * WAD);
    }

    #[test]
    fn stale_entry_fails() {
        let (mut keeper, registry, _shares) = setup();
        registry.record_at(KEY, 100 * WAD, Utc::now() - ChronoDuration::hours(48));
        assert!(matches!(
            keeper.aum(),
            Err(ValuationError::MarkedValueStale { .. })
        ));
    }

    #[test]
    fn zero_value_with_outstanding_shares_fails() {
        let (mut keeper, registry, shares) = setup();
        registry.record(KEY, 0);
        shares.write().mint(AUTHORITY, "alice", WAD).unwrap();
        assert!(matches!(
            keeper.aum(),
            Err(ValuationError::NonPositiveAum { .. })
        ));
    }

    #[test]
    fn movement_invalidates_until_confirmed() {
        let (mut keeper, registry, _shares) = setup();
        registry.record(KEY, 100 * WAD);
        assert!(keeper.aum().is_ok());

        keeper.note_fund_movement();
        assert!(matches!(
            keeper.aum(),
            Err(ValuationError::MarkedValueStale { .. })
        ));

        keeper.confirm_settled();
        assert!(keeper.aum().is_ok());
    }
}
