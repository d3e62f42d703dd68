//! # Bulk Payment Allocation
//!
//! Deterministic allocation of one incoming payment amount across many
//! outstanding orders (customer receivables) or supplier purchases.
//!
//! ## Algorithm
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   payment_amount = 2500                                                 │
//! │                                                                         │
//! │   Order A (oldest, owes 1000)  ──► apply 1000  ──► fully paid           │
//! │   Order B (owes 2000)          ──► apply 1500  ──► 500 still owed       │
//! │   Order C (owes  300)          ──► apply    0                           │
//! │                                                                         │
//! │   orders_paid = [A:1000, B:1500]                                        │
//! │   remaining_balance = 800   (B:500 + C:300)                             │
//! │   excess_payment    = 0                                                 │
//! │                                                                         │
//! │   CONSERVATION: sum(applied) + remaining + excess... excess counts      │
//! │   against the payment: sum(applied) + excess == payment_amount          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - Integer cents only. No division anywhere in the loop, so no rounding
//!   drift is possible.
//! - Ordering: oldest-placed-first (FIFO) unless the caller supplies an
//!   explicit order list — see [`crate::config::AllocationOrder`].
//! - `excess_payment > 0` implies `remaining_balance == 0` (money is only
//!   left over once every order is paid).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::config::AllocationOrder;

// =============================================================================
// Input / Output Types
// =============================================================================

/// Input for `allocateBulkPayment` / `allocateBulkSupplierPayment`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentAllocationInput {
    /// Customer (or supplier) whose outstanding set is targeted.
    pub customer_id: String,
    /// Incoming amount in integer cents.
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub payment_amount: i64,
    /// Explicit allocation order. When omitted, the channel's
    /// `AllocationOrder` policy applies.
    pub order_ids: Option<Vec<String>>,
}

/// One outstanding order as seen by the allocator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OutstandingOrder {
    pub order_id: String,
    pub order_code: String,
    #[ts(as = "String")]
    pub placed_at: DateTime<Utc>,
    /// Unpaid balance in cents. Must be >= 0.
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub outstanding_cents: i64,
}

/// One order's share of the allocated payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AllocatedOrder {
    pub order_id: String,
    pub order_code: String,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub outstanding_before_cents: i64,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub amount_applied_cents: i64,
    pub fully_paid: bool,
}

/// The allocation outcome. Not a union: allocation always succeeds;
/// shortfall and surplus are reported, not errored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentAllocationResult {
    pub customer_id: String,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub payment_amount_cents: i64,
    pub orders_paid: Vec<AllocatedOrder>,
    /// Left over after every order is paid.
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub excess_payment_cents: i64,
    /// Still owed after the amount ran out.
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub remaining_balance_cents: i64,
}

// =============================================================================
// Allocation
// =============================================================================

/// Sorts the outstanding set by the channel policy. Ties (identical
/// `placed_at`) break on order id, keeping the result deterministic.
pub fn sort_outstanding(orders: &mut [OutstandingOrder], policy: AllocationOrder) {
    match policy {
        AllocationOrder::OldestFirst => {
            orders.sort_by(|a, b| a.placed_at.cmp(&b.placed_at).then(a.order_id.cmp(&b.order_id)))
        }
        AllocationOrder::NewestFirst => {
            orders.sort_by(|a, b| b.placed_at.cmp(&a.placed_at).then(a.order_id.cmp(&b.order_id)))
        }
    }
}

/// Greedily applies `payment_amount` to each order's outstanding balance
/// in the sequence given, until the amount is exhausted or all orders are
/// paid.
///
/// The caller supplies the sequence — either pre-sorted by policy via
/// [`sort_outstanding`], or the user's explicit `order_ids` order.
pub fn allocate(
    customer_id: impl Into<String>,
    payment_amount: i64,
    orders: &[OutstandingOrder],
) -> PaymentAllocationResult {
    let mut remaining_amount = payment_amount.max(0);
    let mut orders_paid = Vec::new();
    let mut remaining_balance: i64 = 0;

    for order in orders {
        let outstanding = order.outstanding_cents.max(0);
        let applied = remaining_amount.min(outstanding);
        remaining_amount -= applied;
        remaining_balance += outstanding - applied;

        if applied > 0 {
            orders_paid.push(AllocatedOrder {
                order_id: order.order_id.clone(),
                order_code: order.order_code.clone(),
                outstanding_before_cents: outstanding,
                amount_applied_cents: applied,
                fully_paid: applied == outstanding,
            });
        }
    }

    PaymentAllocationResult {
        customer_id: customer_id.into(),
        payment_amount_cents: payment_amount,
        orders_paid,
        excess_payment_cents: remaining_amount,
        remaining_balance_cents: remaining_balance,
    }
}

impl PaymentAllocationResult {
    /// Total applied across all orders.
    pub fn total_applied_cents(&self) -> i64 {
        self.orders_paid.iter().map(|o| o.amount_applied_cents).sum()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
