//! # meridian-core: Pure Business Logic for Meridian
//!
//! This crate is the **heart** of Meridian. It contains the order lifecycle,
//! payment/refund math, and ledger rules as pure functions with zero I/O
//! dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Meridian Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  meridian-engine (Services)                     │   │
//! │  │   order transitions • modifications • settlements • sessions   │   │
//! │  │   per-aggregate locking • transactional ledger postings         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ meridian-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌──────────────┐  ┌──────────┐  ┌──────────┐  │   │
//! │  │   │   order   │  │ modification │  │ payment  │  │  ledger  │  │   │
//! │  │   │   state   │  │   planner    │  │  refund  │  │ journal  │  │   │
//! │  │   │  machine  │  │ price_change │  │ planning │  │ postings │  │   │
//! │  │   └───────────┘  └──────────────┘  └──────────┘  └──────────┘  │   │
//! │  │   ┌───────────┐  ┌──────────────┐  ┌──────────┐  ┌──────────┐  │   │
//! │  │   │   money   │  │  allocation  │  │ cashier  │  │ reconcil.│  │   │
//! │  │   │ int cents │  │  FIFO greedy │  │ sessions │  │ periods  │  │   │
//! │  │   └───────────┘  └──────────────┘  └──────────┘  └──────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  meridian-db (Database Layer)                   │   │
//! │  │              SQLite queries, migrations, repositories           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Integer-cent money, lossless proration, string wire format
//! - [`error`] - Typed result-union errors and fatal ledger invariants
//! - [`config`] - Channel settings threaded explicitly into entry points
//! - [`order`] - Order aggregate and its lifecycle state machine
//! - [`modification`] - Post-placement modification planning (`price_change`)
//! - [`payment`] - Payment/refund state machines and refund planning
//! - [`allocation`] - Bulk payment allocation across outstanding orders
//! - [`ledger`] - Append-only double-entry journal and canonical postings
//! - [`cashier`] - Drawer sessions, blind counts, variance policy
//! - [`reconciliation`] - Declared-vs-expected checks and period closure
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic - same input = same output
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Integer Money**: All monetary values are in cents (i64) to avoid float errors
//! 4. **Explicit Errors**: All errors are typed, never strings or panics
//!
//! ## Example Usage
//!
//! ```rust
//! use meridian_core::money::Money;
//! use meridian_core::order::OrderState;
//!
//! // Create money from cents (never from floats!)
//! let price = Money::from_cents(1099); // $10.99
//!
//! // Tax at 8.25% (825 basis points), half-up rounding
//! let tax = price.tax_at_bps(825);
//! assert_eq!(tax.cents(), 91);
//!
//! // The state machine is a static table
//! assert!(OrderState::Delivered.is_terminal());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocation;
pub mod cashier;
pub mod config;
pub mod error;
pub mod ledger;
pub mod modification;
pub mod money;
pub mod order;
pub mod payment;
pub mod reconciliation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use meridian_core::Money` instead of
// `use meridian_core::money::Money`

pub use config::{AllocationOrder, ChannelSettings};
pub use error::{ErrorCode, LedgerError};
pub use money::Money;
pub use order::{Order, OrderLine, OrderState};
pub use payment::{Payment, PaymentState, Refund, RefundState};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default channel ID for single-channel deployments.
///
/// ## Why a constant?
/// The schema carries channel_id everywhere for multi-channel support, but
/// a single-store deployment has exactly one channel. Callers that do not
/// manage channels pass this.
pub const DEFAULT_CHANNEL_ID: &str = "00000000-0000-0000-0000-000000000001";

/// Prefix for human-facing order codes (`MRD-000123`).
pub const ORDER_CODE_PREFIX: &str = "MRD";
