// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # COFFER — Pooled-Fund Ledger Library
//!
//! This is the beating heart of COFFER: a pooled-investment-fund ledger for
//! funds whose value is only partially visible from the ledger's side of the
//! fence. Depositors queue contributions of a designated asset, an operator
//! settles bounded batches against an authoritative NAV, and holders redeem
//! their claim tokens through the mirrored withdrawal queue.
//!
//! Nothing here discovers prices and nothing here custodies keys. COFFER
//! takes a pragmatic stance: pricing is someone else's job (a feed, an
//! auditor, a registry — pick a book keeper), and this library's job is to
//! never lose track of who is owed what while those externals misbehave.
//!
//! ## Architecture
//!
//! The crate is split into modules that mirror the actual concerns of a
//! fund ledger:
//!
//! - **config** — Protocol constants and tolerances.
//! - **math** — WAD fixed-point arithmetic. No floats near money.
//! - **gating** — The access-control collaborator's interface.
//! - **token** — Deposit-asset accounting.
//! - **shares** — The supply-elastic claim token.
//! - **pricing** — Feed adapters and the oracle trust boundary.
//! - **valuation** — Book keepers: feed-based, attested, account-attested.
//! - **registry** — The external attestation registry's interface.
//! - **repository** — The queued deposit/withdrawal settlement engine.
//! - **factory** — Assembles fund tuples and pins the protocol fee.
//!
//! ## Design Philosophy
//!
//! 1. Conservation over convenience — every aggregate is recomputable and
//!    audited in tests after every mutation.
//! 2. Atomic per call: an entry method completes or leaves no trace.
//! 3. A bad price aborts loudly. Settling against garbage is the one
//!    mistake this system refuses to make.
//! 4. If it touches money, it has tests. Plural.

pub mod config;
pub mod factory;
pub mod gating;
pub mod math;
pub mod pricing;
pub mod registry;
pub mod repository;
pub mod shares;
pub mod token;
pub mod valuation;
