//! # Meridian Engine
//!
//! The mutation layer: loads aggregates through meridian-db, plans every
//! change with the pure functions in meridian-core, and commits the
//! outcome — aggregate writes and journal postings — in one transaction.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Engine                                     │
//! │                                                                         │
//! │   orders ──────────► transition / cancel / reverse / fulfill            │
//! │   modifications ───► modifyOrder (dry run or settle-and-commit)         │
//! │   payments ────────► settle / cancel / refund                           │
//! │   allocation ──────► bulk payment across receivables                    │
//! │   cashier ─────────► sessions, blind drawer counts                      │
//! │   reconciliation ──► declared-vs-ledger, period-end close               │
//! │                                                                         │
//! │        │ lock ──► load ──► plan (core) ──► BEGIN … COMMIT               │
//! │        ▼                                                                │
//! │   every posting passes the closed-period guard                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! External effects (payment processors, catalog lookups) sit behind the
//! [`SettlementHandler`] and [`ReferenceData`] traits so the whole engine
//! runs against an in-memory database in tests.

pub mod engine;
pub mod error;
pub mod locks;

mod allocation;
mod cashier;
mod modifications;
mod orders;
mod payments;
mod reconciliation;

pub use engine::{
    AutoSettlementHandler, Engine, ReferenceData, SettlementHandler, SettlementOutcome,
    StaticReferenceData,
};
pub use error::{EngineError, EngineResult};
pub use locks::LockRegistry;
pub use orders::{OrderReversal, OrderTransition};
