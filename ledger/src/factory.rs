//! # Fund Factory
//!
//! Assembles the three-piece fund tuple — [`Repository`], book keeper,
//! [`ShareToken`] — from a declarative [`FundSpec`], wires the protocol fee
//! into every repository it creates, and keeps a registry of the funds it
//! has built.
//!
//! The factory is the protocol's revenue surface: whoever operates it picks
//! the fee recipient and the default license fee, and every fund created
//! through it pays there. Individual funds may override the fee rate but
//! never the recipient.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::gating::SharedGating;
use crate::repository::{Repository, RepositoryConfig, RepositoryError};
use crate::registry::SharedRegistry;
use crate::shares::{ShareToken, SharedShareToken};
use crate::token::SharedAssetBook;
use crate::valuation::{
    AccountBookKeeper, AttestedBookKeeper, FeedBookKeeper, SharedBookKeeper, WatchedAsset,
};

// ---------------------------------------------------------------------------
// FundSpec
// ---------------------------------------------------------------------------

/// Which valuation strategy a new fund should be assembled with.
pub enum ValuationChoice {
    /// Mark-to-market over a feed watchlist.
    FeedBased {
        /// Initial watchlist entries.
        watchlist: Vec<WatchedAsset>,
        /// Whether executor-held balances count into AUM.
        include_executor: bool,
    },
    /// Operator-pushed valuation marks.
    Attested,
    /// Marks read from an external attestation-registry entry.
    AccountAttested {
        /// The registry to read from.
        registry: SharedRegistry,
        /// The entry key this fund is linked to.
        key: String,
        /// Staleness window applied to the entry's timestamp.
        validity_window: Duration,
    },
}

/// Everything needed to assemble one fund.
pub struct FundSpec {
    /// Human-readable fund name, unique within this factory.
    pub name: String,
    /// Ticker for the fund's share token.
    pub share_symbol: String,
    /// Custody account: holds the pool, escrows shares, mints and burns.
    pub custody_account: String,
    /// Operator account for settlement and queue management.
    pub operator: String,
    /// Executor holding account for off-ledger deployment.
    pub executor: String,
    /// The deposit asset's balance book.
    pub asset: SharedAssetBook,
    /// Access-control collaborator shared by the fund and its share token.
    pub gating: SharedGating,
    /// Valuation strategy for this fund.
    pub valuation: ValuationChoice,
    /// License fee override in bps; `None` takes the factory default.
    pub license_fee_bps: Option<u32>,
}

// ---------------------------------------------------------------------------
// FundHandle
// ---------------------------------------------------------------------------

/// Concrete handle to a fund's book keeper, preserving strategy-specific
/// operations (mark pushes, watchlist edits) that the trait object hides.
#[derive(Clone)]
pub enum KeeperHandle {
    /// Mark-to-market keeper.
    Feed(Arc<RwLock<FeedBookKeeper>>),
    /// Operator-pushed marks.
    Attested(Arc<RwLock<AttestedBookKeeper>>),
    /// Registry-sourced marks.
    AccountAttested(Arc<RwLock<AccountBookKeeper>>),
}

impl KeeperHandle {
    /// The trait-object form the repository consumes.
    pub fn as_book_keeper(&self) -> SharedBookKeeper {
        match self {
            KeeperHandle::Feed(k) => k.clone(),
            KeeperHandle::Attested(k) => k.clone(),
            KeeperHandle::AccountAttested(k) => k.clone(),
        }
    }
}

/// One assembled fund.
pub struct FundHandle {
    /// Factory-assigned instance id.
    pub id: Uuid,
    /// The fund's name, as given in its spec.
    pub name: String,
    /// The settlement engine.
    pub repository: Arc<RwLock<Repository>>,
    /// The fund's share token.
    pub shares: SharedShareToken,
    /// Strategy-typed keeper handle.
    pub keeper: KeeperHandle,
    /// When the fund was assembled.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// FundFactory
// ---------------------------------------------------------------------------

/// Builds and tracks fund tuples.
pub struct FundFactory {
    fee_recipient: String,
    default_license_fee_bps: u32,
    funds: Vec<FundHandle>,
}

impl FundFactory {
    /// Creates a factory that routes license fees to `fee_recipient`.
    pub fn new(fee_recipient: &str, default_license_fee_bps: u32) -> Self {
        Self {
            fee_recipient: fee_recipient.to_string(),
            default_license_fee_bps,
            funds: Vec::new(),
        }
    }

    /// The account every created fund pays license fees to.
    pub fn fee_recipient(&self) -> &str {
        &self.fee_recipient
    }

    /// Assembles a fund from its spec and registers it.
    pub fn create_fund(&mut self, spec: FundSpec) -> Result<&FundHandle, RepositoryError> {
        let shares: SharedShareToken = Arc::new(RwLock::new(ShareToken::new(
            &spec.share_symbol,
            &spec.custody_account,
            spec.gating.clone(),
        )));

        let keeper = match spec.valuation {
            ValuationChoice::FeedBased {
                watchlist,
                include_executor,
            } => {
                let mut keeper = FeedBookKeeper::new(&spec.custody_account, shares.clone());
                if include_executor {
                    keeper.include_executor(&spec.executor);
                }
                for entry in watchlist {
                    keeper.watch(entry);
                }
                KeeperHandle::Feed(Arc::new(RwLock::new(keeper)))
            }
            ValuationChoice::Attested => {
                KeeperHandle::Attested(Arc::new(RwLock::new(AttestedBookKeeper::new(
                    shares.clone(),
                ))))
            }
            ValuationChoice::AccountAttested {
                registry,
                key,
                validity_window,
            } => {
                let mut keeper = AccountBookKeeper::new(registry, &key, shares.clone());
                keeper.set_validity_window(validity_window);
                KeeperHandle::AccountAttested(Arc::new(RwLock::new(keeper)))
            }
        };

        let asset_symbol = spec.asset.read().symbol().to_string();
        let repository = Repository::new(
            RepositoryConfig {
                account: spec.custody_account,
                operator: spec.operator,
                executor: spec.executor,
                fee_recipient: self.fee_recipient.clone(),
                license_fee_bps: spec
                    .license_fee_bps
                    .unwrap_or(self.default_license_fee_bps),
            },
            spec.asset,
            shares.clone(),
            keeper.as_book_keeper(),
            spec.gating,
        )?;

        // Queued deposits and claimables sit in custody but belong to users;
        // a mark-to-market keeper must not count them as pool value.
        if let KeeperHandle::Feed(feed_keeper) = &keeper {
            feed_keeper
                .write()
                .net_reservations(&asset_symbol, repository.reservations());
        }

        let handle = FundHandle {
            id: Uuid::new_v4(),
            name: spec.name,
            repository: Arc::new(RwLock::new(repository)),
            shares,
            keeper,
            created_at: Utc::now(),
        };
        tracing::info!(fund = %handle.name, id = %handle.id, "fund assembled");
        self.funds.push(handle);
        Ok(self.funds.last().expect("fund just pushed"))
    }

    /// All funds this factory has assembled.
    pub fn funds(&self) -> &[FundHandle] {
        &self.funds
    }

    /// Looks up a fund by name.
    pub fn fund(&self, name: &str) -> Option<&FundHandle> {
        self.funds.iter().find(|f| f.name == name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
