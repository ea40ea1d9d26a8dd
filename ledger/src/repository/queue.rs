//! # Request Queue
//!
//! Append-only arena of deposit or withdrawal requests. Entries are indexed
//! by a sequential `u64` id, never physically removed, and carry an explicit
//! status tag; a settled or cancelled entry stays at its index as history.
//!
//! Two monotonic positions describe the queue:
//!
//! - **head** — the next free slot; grows on every `push`.
//! - **cursor** — the next index settlement will look at; only ever
//!   advances, skipping settled and cancelled entries in O(1) each.
//!
//! Settlement reads indices strictly below head at call time and enqueue
//! only grows head, so the two sides can never disagree about which entries
//! a batch covers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from queue bookkeeping.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The id does not name an entry in this queue.
    #[error("unknown queue entry: {0}")]
    UnknownEntry(u64),

    /// The entry has already been settled or cancelled.
    #[error("queue entry {id} is not pending (status: {status})")]
    EntryNotPending {
        /// The entry in question.
        id: u64,
        /// Its current status.
        status: EntryStatus,
    },
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Lifecycle status of a queue entry. Transitions are terminal:
/// `Pending → Settled` or `Pending → Cancelled`, nothing else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Waiting for settlement.
    Pending,
    /// Processed by a settlement batch.
    Settled,
    /// Cancelled by the operator before settlement.
    Cancelled,
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryStatus::Pending => write!(f, "Pending"),
            EntryStatus::Settled => write!(f, "Settled"),
            EntryStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// One queued request.
///
/// For a deposit queue `amount` is in deposit-asset units and `min_out` is a
/// minimum share count; for a withdrawal queue `amount` is in share units
/// and `min_out` is a minimum asset payout. The queue itself is agnostic.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Sequential id; equals the entry's index in the arena.
    pub id: u64,

    /// The account that made the request.
    pub requester: String,

    /// Requested amount (asset units or share units, per queue).
    pub amount: u128,

    /// Caller-supplied slippage guard (minimum shares or minimum asset out).
    pub min_out: u128,

    /// Current lifecycle status.
    pub status: EntryStatus,

    /// When the request was enqueued.
    pub requested_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// RequestQueue
// ---------------------------------------------------------------------------

/// Append-only request arena with a monotonic settlement cursor.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RequestQueue {
    entries: Vec<QueueEntry>,
    cursor: usize,
}

impl RequestQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pending entry and returns its id.
    pub fn push(&mut self, requester: &str, amount: u128, min_out: u128) -> u64 {
        let id = self.entries.len() as u64;
        self.entries.push(QueueEntry {
            id,
            requester: requester.to_string(),
            amount,
            min_out,
            status: EntryStatus::Pending,
            requested_at: Utc::now(),
        });
        id
    }

    /// Next free slot (monotonic counter).
    pub fn head(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Next index settlement will look at.
    pub fn cursor(&self) -> u64 {
        self.cursor as u64
    }

    /// Returns an entry by id.
    pub fn get(&self, id: u64) -> Result<&QueueEntry, QueueError> {
        self.entries
            .get(id as usize)
            .ok_or(QueueError::UnknownEntry(id))
    }

    /// All entries, settled and cancelled history included.
    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    /// Ids of up to `limit` pending entries starting at the cursor, in FIFO
    /// order. Read-only: the cursor does not move.
    pub fn collect_pending(&self, limit: usize) -> Vec<u64> {
        self.entries[self.cursor..]
            .iter()
            .filter(|e| e.status == EntryStatus::Pending)
            .take(limit)
            .map(|e| e.id)
            .collect()
    }

    /// Number of pending entries at or past the cursor.
    pub fn pending_len(&self) -> usize {
        self.entries[self.cursor..]
            .iter()
            .filter(|e| e.status == EntryStatus::Pending)
            .count()
    }

    /// Cancels a pending entry, returning a copy of it.
    pub fn cancel(&mut self, id: u64) -> Result<QueueEntry, QueueError> {
        let entry = self
            .entries
            .get_mut(id as usize)
            .ok_or(QueueError::UnknownEntry(id))?;
        if entry.status != EntryStatus::Pending {
            return Err(QueueError::EntryNotPending {
                id,
                status: entry.status,
            });
        }
        entry.status = EntryStatus::Cancelled;
        Ok(entry.clone())
    }

    /// Marks a pending entry as settled.
    pub fn mark_settled(&mut self, id: u64) -> Result<(), QueueError> {
        let entry = self
            .entries
            .get_mut(id as usize)
            .ok_or(QueueError::UnknownEntry(id))?;
        if entry.status != EntryStatus::Pending {
            return Err(QueueError::EntryNotPending {
                id,
                status: entry.status,
            });
        }
        entry.status = EntryStatus::Settled;
        Ok(())
    }

    /// Advances the cursor past any leading settled/cancelled entries.
    /// Called after a settlement batch commits.
    pub fn advance_cursor(&mut self) {
        while self.cursor < self.entries.len()
            && self.entries[self.cursor].status != EntryStatus::Pending
        {
            self.cursor += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
