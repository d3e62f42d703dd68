//! # Engine Error Types
//!
//! Infrastructure failures only. Every *expected* business failure is a
//! typed value inside a mutation's result union (defined in meridian-core);
//! [`EngineError`] is the outer channel for everything that is not a
//! business outcome.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  mutation → EngineResult<Result<T, TypedError>>                         │
//! │                  │              │                                       │
//! │                  │              └── business outcome (closed union)     │
//! │                  └── EngineError: db failure, missing aggregate,        │
//! │                      ledger invariant violation, handler failure        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use meridian_core::error::LedgerError;
use meridian_db::DbError;

/// Infrastructure errors surfaced by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Database operation failed.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Transaction control (begin/commit) failed outside a repository
    /// call.
    #[error("Transaction failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A ledger invariant was violated while building or guarding a
    /// posting. The enclosing transaction rolled back.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A referenced aggregate does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// An external settlement handler failed in a non-business way
    /// (transport, timeout). Business declines are typed results.
    #[error("Settlement handler failure: {0}")]
    Handler(String),
}

impl EngineError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

/// Result type for engine operations. The inner type is usually itself a
/// `Result<T, TypedError>` carrying the business outcome.
pub type EngineResult<T> = Result<T, EngineError>;
