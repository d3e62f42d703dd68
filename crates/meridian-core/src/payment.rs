//! # Payments & Refunds
//!
//! Payment and refund state machines plus the refund planner.
//!
//! ## Payment Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Payment State Machine                              │
//! │                                                                         │
//! │        Created ──┬──► Authorized ──► Settled ■                          │
//! │           │      │        │                                             │
//! │           │      └────────┼──────────► Settled (single-step capture)    │
//! │           │               ▼                                             │
//! │           ├──────────► Cancelled ■                                      │
//! │           └──────────► Declined  ■                                      │
//! │                                                                         │
//! │  Refund:  Pending ──► Settled ■                                         │
//! │               └─────► Failed  ■                                         │
//! │                                                                         │
//! │  ■ = terminal                                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Refund Bound
//! For every payment, `sum(refund.total) <= payment.amount`. The planner
//! enforces this; the engine re-checks inside the commit transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{PaymentStateTransitionError, RefundOrderError};
use crate::order::{Order, OrderLineInput, OrderState};

// =============================================================================
// Payment State
// =============================================================================

/// The state of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[ts(export)]
pub enum PaymentState {
    /// Recorded but not yet authorized.
    Created,
    /// Funds reserved; not yet captured.
    Authorized,
    /// Funds captured. Terminal; money moves back only via refunds.
    Settled,
    /// Authorization rejected. Terminal.
    Declined,
    /// Authorization released without capture. Terminal.
    Cancelled,
}

impl PaymentState {
    /// Valid transitions from this state.
    pub fn next_states(&self) -> &'static [PaymentState] {
        use PaymentState::*;
        match self {
            Created => &[Authorized, Settled, Declined, Cancelled],
            Authorized => &[Settled, Cancelled],
            Settled | Declined | Cancelled => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next_states().is_empty()
    }

    pub fn as_str(&self) -> &'static str {
        use PaymentState::*;
        match self {
            Created => "Created",
            Authorized => "Authorized",
            Settled => "Settled",
            Declined => "Declined",
            Cancelled => "Cancelled",
        }
    }
}

impl std::str::FromStr for PaymentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use PaymentState::*;
        Ok(match s {
            "Created" => Created,
            "Authorized" => Authorized,
            "Settled" => Settled,
            "Declined" => Declined,
            "Cancelled" => Cancelled,
            other => return Err(format!("Unknown payment state: {other}")),
        })
    }
}

// =============================================================================
// Payment
// =============================================================================

/// A monetary authorization/settlement record attached to one order.
///
/// Owned exclusively by its order; mutated only through the engine's
/// `transition/settle/cancel` operations.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    /// Payment method code, e.g. "cash", "card".
    pub method: String,
    pub state: PaymentState,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub amount_cents: i64,
    /// External processor reference.
    pub transaction_id: Option<String>,
    /// Populated when a transition to Declined carries a reason.
    pub error_message: Option<String>,
    /// Opaque pass-through blob; the core never reads it.
    #[ts(type = "any")]
    pub metadata: serde_json::Value,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a payment in `Created`.
    pub fn new(
        id: impl Into<String>,
        order_id: impl Into<String>,
        method: impl Into<String>,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Payment {
            id: id.into(),
            order_id: order_id.into(),
            method: method.into(),
            state: PaymentState::Created,
            amount_cents,
            transaction_id: None,
            error_message: None,
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    /// Valid transitions from the current state (exposed as `nextStates`).
    pub fn next_states(&self) -> &'static [PaymentState] {
        self.state.next_states()
    }

    /// Attempts a state transition. Same-state is a no-op success,
    /// matching the order-level idempotence policy.
    pub fn transition_to(
        &mut self,
        target: PaymentState,
    ) -> Result<bool, PaymentStateTransitionError> {
        if self.state == target {
            return Ok(false);
        }
        if !self.state.next_states().contains(&target) {
            return Err(PaymentStateTransitionError {
                from_state: self.state,
                to_state: target,
                transition_error: format!(
                    "No transition from {} to {}",
                    self.state.as_str(),
                    target.as_str()
                ),
            });
        }
        self.state = target;
        Ok(true)
    }
}

// =============================================================================
// Refund
// =============================================================================

/// The state of a refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[ts(export)]
pub enum RefundState {
    Pending,
    Settled,
    Failed,
}

impl RefundState {
    pub fn next_states(&self) -> &'static [RefundState] {
        use RefundState::*;
        match self {
            Pending => &[Settled, Failed],
            Settled | Failed => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefundState::Pending => "Pending",
            RefundState::Settled => "Settled",
            RefundState::Failed => "Failed",
        }
    }
}

impl std::str::FromStr for RefundState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Pending" => RefundState::Pending,
            "Settled" => RefundState::Settled,
            "Failed" => RefundState::Failed,
            other => return Err(format!("Unknown refund state: {other}")),
        })
    }
}

/// A monetary reversal attached to one payment, optionally itemized
/// by order line.
///
/// `total = items + shipping + adjustment` — stored denormalized so the
/// bound check is a single sum.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Refund {
    pub id: String,
    pub payment_id: String,
    pub state: RefundState,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub items_cents: i64,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub shipping_cents: i64,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub adjustment_cents: i64,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub total_cents: i64,
    pub reason: Option<String>,
    pub lines: Vec<OrderLineInput>,
    pub transaction_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Refund Planning
// =============================================================================

/// Input for `refundOrder`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RefundOrderInput {
    pub payment_id: String,
    /// Explicit total override, in cents. When present it becomes the
    /// refund total; the itemized breakdown still records attribution.
    pub amount: Option<i64>,
    pub reason: Option<String>,
    /// Line-level attribution (may be empty for amount-only refunds).
    #[serde(default)]
    pub lines: Vec<OrderLineInput>,
    /// Shipping cents to refund.
    #[serde(default)]
    pub shipping: i64,
}

/// States from which an order can be refunded: it must have been placed
/// and not be sitting in the checkout phase.
fn refundable_order_state(state: OrderState) -> bool {
    !matches!(state, OrderState::AddingItems | OrderState::ArrangingPayment)
}

/// Validates a refund request against the payment, its prior refunds and
/// the owning order, and prices the refund.
///
/// ## Checks (in order)
/// 1. Order is in a refundable state.
/// 2. Payment is settled (an unsettled payment has nothing to give back).
/// 3. Every requested line quantity is positive.
/// 4. Every referenced line belongs to the payment's order.
/// 5. The selected items are not already fully refunded.
/// 6. Requested quantity per line does not exceed what prior refunds left.
/// 7. Something is actually refundable (> 0 cents).
/// 8. The total fits inside `payment.amount − sum(prior refunds)`.
pub fn plan_refund(
    payment: &Payment,
    existing_refunds: &[Refund],
    order: &Order,
    input: &RefundOrderInput,
    refund_id: impl Into<String>,
    now: DateTime<Utc>,
) -> Result<Refund, RefundOrderError> {
    if !refundable_order_state(order.state) {
        return Err(RefundOrderError::RefundOrderState {
            order_state: order.state,
        });
    }
    if payment.state != PaymentState::Settled {
        return Err(RefundOrderError::NothingToRefund);
    }

    // Failed refunds never consumed funds; everything else counts.
    let counted: Vec<&Refund> = existing_refunds
        .iter()
        .filter(|r| r.state != RefundState::Failed)
        .collect();

    // Per-line quantity already refunded.
    let refunded_qty = |line_id: &str| -> i64 {
        counted
            .iter()
            .flat_map(|r| r.lines.iter())
            .filter(|l| l.order_line_id == line_id)
            .map(|l| l.quantity)
            .sum()
    };

    let mut items_cents: i64 = 0;
    if !input.lines.is_empty() {
        let mut resolved = Vec::with_capacity(input.lines.len());
        for line_input in &input.lines {
            if line_input.quantity <= 0 {
                return Err(RefundOrderError::NegativeQuantity {
                    quantity: line_input.quantity,
                });
            }
            let line = order
                .line(&line_input.order_line_id)
                .ok_or(RefundOrderError::PaymentOrderMismatch)?;

            let already = refunded_qty(&line.id);
            let remaining = line.quantity - already;
            resolved.push((line, line_input.quantity, already, remaining));
        }
        if resolved.iter().all(|(_, _, _, remaining)| *remaining <= 0) {
            let refund_id = counted
                .iter()
                .rev()
                .find(|r| {
                    r.lines
                        .iter()
                        .any(|l| input.lines.iter().any(|i| i.order_line_id == l.order_line_id))
                })
                .map(|r| r.id.clone())
                .unwrap_or_default();
            return Err(RefundOrderError::AlreadyRefunded { refund_id });
        }

        for (line, quantity, already, remaining) in resolved {
            if quantity > remaining {
                return Err(RefundOrderError::QuantityTooGreat {
                    order_line_id: line.id.clone(),
                    requested: quantity,
                    maximum: remaining.max(0),
                });
            }

            // Refund value: the line's prorated price plus its tax,
            // apportioned to the refunded quantity. Floor division: the
            // last unit refunded picks up the residue.
            if line.quantity > 0 {
                let line_value = line.prorated_line_price_cents + line.line_tax().cents();
                let per_prior = line_value * already / line.quantity;
                let per_after = line_value * (already + quantity) / line.quantity;
                items_cents += per_after - per_prior;
            }
        }
    }

    let shipping_cents = input.shipping;
    let computed = items_cents + shipping_cents;

    // Explicit amount overrides; the delta is recorded as an adjustment.
    let (total_cents, adjustment_cents) = match input.amount {
        Some(amount) => (amount, amount - computed),
        None => (computed, 0),
    };

    if total_cents <= 0 {
        return Err(RefundOrderError::NothingToRefund);
    }

    let already_refunded: i64 = counted.iter().map(|r| r.total_cents).sum();
    let maximum_refundable = payment.amount_cents - already_refunded;
    if total_cents > maximum_refundable {
        return Err(RefundOrderError::RefundAmount { maximum_refundable });
    }

    Ok(Refund {
        id: refund_id.into(),
        payment_id: payment.id.clone(),
        state: RefundState::Pending,
        items_cents,
        shipping_cents,
        adjustment_cents,
        total_cents,
        reason: input.reason.clone(),
        lines: input.lines.clone(),
        transaction_id: None,
        created_at: now,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderLine;

    fn settled_payment(amount: i64) -> Payment {
        let mut payment = Payment::new("pay-1", "order-1", "card", amount, Utc::now());
        payment.state = PaymentState::Settled;
        payment
    }

    fn refundable_order() -> Order {
        let now = Utc::now();
        let mut order = Order::new("order-1", "channel-1", "ORD-0001", "USD", now);
        order.lines.push(OrderLine::new("line-0", "order-1", "v-0", 2, 500, 0, now));
        order.recalculate_totals();
        order.order_placed_at = Some(now);
        order.state = OrderState::PaymentSettled;
        order
    }

    fn refund(id: &str, total: i64, lines: Vec<OrderLineInput>) -> Refund {
        Refund {
            id: id.to_string(),
            payment_id: "pay-1".to_string(),
            state: RefundState::Settled,
            items_cents: total,
            shipping_cents: 0,
            adjustment_cents: 0,
            total_cents: total,
            reason: None,
            lines,
            transaction_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_payment_transitions() {
        let mut payment = Payment::new("p", "o", "card", 1000, Utc::now());
        assert!(payment.transition_to(PaymentState::Authorized).unwrap());
        assert!(payment.transition_to(PaymentState::Settled).unwrap());

        let err = payment.transition_to(PaymentState::Authorized).unwrap_err();
        assert_eq!(err.from_state, PaymentState::Settled);
        assert_eq!(err.to_state, PaymentState::Authorized);
    }

    #[test]
    fn test_payment_same_state_noop() {
        let mut payment = Payment::new("p", "o", "card", 1000, Utc::now());
        assert!(!payment.transition_to(PaymentState::Created).unwrap());
    }

    #[test]
    fn test_next_states_exposed() {
        let payment = Payment::new("p", "o", "card", 1000, Utc::now());
        assert_eq!(
            payment.next_states(),
            &[
                PaymentState::Authorized,
                PaymentState::Settled,
                PaymentState::Declined,
                PaymentState::Cancelled
            ]
        );
    }

    #[test]
    fn test_over_refund_reports_maximum_refundable() {
        // Payment 1000, refunds so far 800 → asking 300 must fail with max 200
        let payment = settled_payment(1000);
        let order = refundable_order();
        let prior = vec![refund("r-1", 800, vec![])];

        let input = RefundOrderInput {
            payment_id: "pay-1".to_string(),
            amount: Some(300),
            ..Default::default()
        };
        let err = plan_refund(&payment, &prior, &order, &input, "r-2", Utc::now()).unwrap_err();
        assert_eq!(err, RefundOrderError::RefundAmount { maximum_refundable: 200 });
    }

    #[test]
    fn test_refund_bound_invariant_holds_at_limit() {
        let payment = settled_payment(1000);
        let order = refundable_order();
        let prior = vec![refund("r-1", 800, vec![])];

        let input = RefundOrderInput {
            payment_id: "pay-1".to_string(),
            amount: Some(200),
            ..Default::default()
        };
        let planned = plan_refund(&payment, &prior, &order, &input, "r-2", Utc::now()).unwrap();
        assert_eq!(planned.total_cents, 200);

        let all: i64 = prior.iter().map(|r| r.total_cents).sum::<i64>() + planned.total_cents;
        assert!(all <= payment.amount_cents);
    }

    #[test]
    fn test_itemized_refund_prices_from_prorated_line() {
        let payment = settled_payment(1000);
        let order = refundable_order(); // one line: 2 × 500

        let input = RefundOrderInput {
            payment_id: "pay-1".to_string(),
            lines: vec![OrderLineInput { order_line_id: "line-0".to_string(), quantity: 1 }],
            ..Default::default()
        };
        let planned = plan_refund(&payment, &[], &order, &input, "r-1", Utc::now()).unwrap();
        assert_eq!(planned.items_cents, 500);
        assert_eq!(planned.total_cents, 500);
        assert_eq!(planned.state, RefundState::Pending);
    }

    #[test]
    fn test_already_refunded_items_rejected() {
        let payment = settled_payment(1000);
        let order = refundable_order();
        let prior = vec![refund(
            "r-1",
            1000,
            vec![OrderLineInput { order_line_id: "line-0".to_string(), quantity: 2 }],
        )];

        let input = RefundOrderInput {
            payment_id: "pay-1".to_string(),
            lines: vec![OrderLineInput { order_line_id: "line-0".to_string(), quantity: 1 }],
            ..Default::default()
        };
        let err = plan_refund(&payment, &prior, &order, &input, "r-2", Utc::now()).unwrap_err();
        assert_eq!(err, RefundOrderError::AlreadyRefunded { refund_id: "r-1".to_string() });
    }

    #[test]
    fn test_refund_negative_line_quantity_rejected() {
        let payment = settled_payment(1000);
        let order = refundable_order();

        let input = RefundOrderInput {
            payment_id: "pay-1".to_string(),
            lines: vec![OrderLineInput { order_line_id: "line-0".to_string(), quantity: -1 }],
            ..Default::default()
        };
        let err = plan_refund(&payment, &[], &order, &input, "r-1", Utc::now()).unwrap_err();
        assert_eq!(err, RefundOrderError::NegativeQuantity { quantity: -1 });

        // A negative line can never shrink a mixed selection's value
        let mixed = RefundOrderInput {
            payment_id: "pay-1".to_string(),
            lines: vec![
                OrderLineInput { order_line_id: "line-0".to_string(), quantity: 2 },
                OrderLineInput { order_line_id: "line-0".to_string(), quantity: -1 },
            ],
            ..Default::default()
        };
        let err = plan_refund(&payment, &[], &order, &mixed, "r-1", Utc::now()).unwrap_err();
        assert_eq!(err, RefundOrderError::NegativeQuantity { quantity: -1 });
    }

    #[test]
    fn test_refund_quantity_too_great() {
        let payment = settled_payment(1000);
        let order = refundable_order();
        let prior = vec![refund(
            "r-1",
            500,
            vec![OrderLineInput { order_line_id: "line-0".to_string(), quantity: 1 }],
        )];

        let input = RefundOrderInput {
            payment_id: "pay-1".to_string(),
            lines: vec![OrderLineInput { order_line_id: "line-0".to_string(), quantity: 2 }],
            ..Default::default()
        };
        let err = plan_refund(&payment, &prior, &order, &input, "r-2", Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            RefundOrderError::QuantityTooGreat { requested: 2, maximum: 1, .. }
        ));
    }

    #[test]
    fn test_foreign_line_is_payment_order_mismatch() {
        let payment = settled_payment(1000);
        let order = refundable_order();

        let input = RefundOrderInput {
            payment_id: "pay-1".to_string(),
            lines: vec![OrderLineInput { order_line_id: "other-line".to_string(), quantity: 1 }],
            ..Default::default()
        };
        let err = plan_refund(&payment, &[], &order, &input, "r-1", Utc::now()).unwrap_err();
        assert_eq!(err, RefundOrderError::PaymentOrderMismatch);
    }

    #[test]
    fn test_unsettled_payment_has_nothing_to_refund() {
        let mut payment = settled_payment(1000);
        payment.state = PaymentState::Authorized;
        let order = refundable_order();

        let input = RefundOrderInput {
            payment_id: "pay-1".to_string(),
            amount: Some(100),
            ..Default::default()
        };
        let err = plan_refund(&payment, &[], &order, &input, "r-1", Utc::now()).unwrap_err();
        assert_eq!(err, RefundOrderError::NothingToRefund);
    }

    #[test]
    fn test_checkout_phase_order_not_refundable() {
        let payment = settled_payment(1000);
        let mut order = refundable_order();
        order.state = OrderState::ArrangingPayment;

        let input = RefundOrderInput {
            payment_id: "pay-1".to_string(),
            amount: Some(100),
            ..Default::default()
        };
        let err = plan_refund(&payment, &[], &order, &input, "r-1", Utc::now()).unwrap_err();
        assert_eq!(
            err,
            RefundOrderError::RefundOrderState { order_state: OrderState::ArrangingPayment }
        );
    }
}
