//! # Repository Module
//!
//! Database repository implementations for Meridian.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern Explained                         │
//! │                                                                         │
//! │  The Repository pattern abstracts database access behind a clean API.  │
//! │                                                                         │
//! │  Engine service                                                         │
//! │       │                                                                 │
//! │       │  db.orders().find_by_id("...")                                 │
//! │       │  ↓                                                              │
//! │       ▼                                                                 │
//! │  OrderRepository                                                       │
//! │  ├── find_by_id(&self, id)              ← pool methods for reads      │
//! │  ├── insert_tx(&self, conn, order)      ← *_tx methods join the       │
//! │  └── update_tx(&self, conn, order)        caller's transaction        │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Transaction Discipline
//! Every mutation in the engine is one SQLite transaction. Repositories
//! therefore expose `*_tx` variants taking `&mut SqliteConnection` so a
//! business write and its ledger posting commit or roll back together.
//!
//! ## Available Repositories
//!
//! - [`order::OrderRepository`] - Orders, lines, fulfillments, modifications
//! - [`payment::PaymentRepository`] - Payments and refunds
//! - [`ledger::LedgerRepository`] - Journal entries and balance aggregation
//! - [`cashier::CashierRepository`] - Sessions and cash counts
//! - [`reconciliation::ReconciliationRepository`] - Reconciliations, periods

pub mod cashier;
pub mod ledger;
pub mod order;
pub mod payment;
pub mod reconciliation;

use crate::error::{DbError, DbResult};

/// Serializes an aggregate-internal collection into its JSON column.
pub(crate) fn to_json<T: serde::Serialize>(context: &str, value: &T) -> DbResult<String> {
    serde_json::to_string(value).map_err(|e| DbError::decode(context, e))
}

/// Deserializes a JSON column back into its domain type.
pub(crate) fn from_json<T: serde::de::DeserializeOwned>(context: &str, raw: &str) -> DbResult<T> {
    serde_json::from_str(raw).map_err(|e| DbError::decode(context, e))
}

/// Parses a stored enum-as-TEXT column via `FromStr`.
pub(crate) fn parse_enum<T>(context: &str, raw: &str) -> DbResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| DbError::decode(context, e))
}
