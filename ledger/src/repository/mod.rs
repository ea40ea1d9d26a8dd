//! # Repository — the Queued Settlement Engine
//!
//! The repository owns everything that moves: the deposit queue, the
//! withdrawal queue, the claimable balances, and the custody account that
//! holds the deposit asset. It is the only component allowed to mint or
//! burn the fund's share token, and it prices every settlement through the
//! book keeper it was assembled with.
//!
//! ```text
//! queue.rs   — append-only request arena with a monotonic cursor
//! ledger.rs  — the settlement engine: enqueue, settle, cancel, redeem,
//!              executor moves, conservation audit
//! ```
//!
//! ## Two-Phase Lifecycle
//!
//! Nothing settles at request time. A deposit parks asset in custody and a
//! withdrawal escrows shares; both wait in FIFO order until an operator
//! settles a bounded batch against one fresh NAV read. Requests that cannot
//! be delivered directly (slippage guard, cancelled entry, gated recipient)
//! degrade into pull-payable claimable balances instead of failing the
//! batch.

pub mod ledger;
pub mod queue;

pub use ledger::{
    AuditReport, DepositSettlement, Repository, RepositoryConfig, RepositoryError, Reservations,
    SharedReservations, WithdrawalSettlement,
};
pub use queue::{EntryStatus, QueueEntry, QueueError, RequestQueue};
