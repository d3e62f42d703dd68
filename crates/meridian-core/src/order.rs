//! # Order Domain & State Machine
//!
//! Order aggregate types and the lifecycle state machine.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Order State Machine                                │
//! │                                                                         │
//! │  AddingItems ──► ArrangingPayment ──┬──► PaymentAuthorized ──┐          │
//! │       ▲                │            │          │             │          │
//! │       └────────────────┘            └──────────┼──► PaymentSettled      │
//! │                                                │         │              │
//! │                       Modifying ◄──────────────┴─────────┤              │
//! │                           │                              ▼              │
//! │                           └──────────►  PartiallyShipped ──► Shipped    │
//! │                                                 │              │        │
//! │                                                 ▼              ▼        │
//! │                                     PartiallyDelivered ──► Delivered ■  │
//! │                                                                         │
//! │  Cancelled ■  (reachable from every placed, undelivered state)          │
//! │                                                                         │
//! │  ■ = terminal                                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Totals Invariant
//! `total = sub_total + shipping` (and the with-tax twins) hold at all times;
//! `recalculate_totals` re-derives them from lines, surcharges and shipping
//! lines after every mutation. The prorated line price — discounted line
//! price minus the line's share of any order-level discount — is the
//! authoritative value for tax and refund math.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{AddFulfillmentError, CancelOrderError, OrderStateTransitionError};
use crate::money::{distribute, Money};

// =============================================================================
// Order State
// =============================================================================

/// The lifecycle state of an order.
///
/// Stored as its PascalCase name both in SQLite and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[ts(export)]
pub enum OrderState {
    /// Cart phase: lines are being added and adjusted.
    AddingItems,
    /// Checkout phase: awaiting payment authorization.
    ArrangingPayment,
    /// At least one payment authorized, none settled yet.
    PaymentAuthorized,
    /// All payments settled.
    PaymentSettled,
    /// Some, but not all, line quantity fulfilled.
    PartiallyShipped,
    /// All line quantity fulfilled.
    Shipped,
    /// Some fulfillments confirmed delivered.
    PartiallyDelivered,
    /// Everything delivered. Terminal.
    Delivered,
    /// Order cancelled. Terminal.
    Cancelled,
    /// Open for post-placement modification via `modifyOrder`.
    Modifying,
}

impl OrderState {
    /// The allowed-transition set for this state.
    ///
    /// Exposed to clients as `nextStates`; `transition_to` validates
    /// against exactly this table.
    pub fn next_states(&self) -> &'static [OrderState] {
        use OrderState::*;
        match self {
            AddingItems => &[ArrangingPayment],
            ArrangingPayment => &[AddingItems, PaymentAuthorized, PaymentSettled, Cancelled],
            PaymentAuthorized => &[PaymentSettled, Modifying, Cancelled],
            PaymentSettled => &[PartiallyShipped, Shipped, Modifying, Cancelled],
            PartiallyShipped => &[Shipped, PartiallyDelivered, Cancelled],
            Shipped => &[PartiallyDelivered, Delivered, Cancelled],
            PartiallyDelivered => &[Delivered, Cancelled],
            Modifying => &[PaymentAuthorized, PaymentSettled, Cancelled],
            Delivered | Cancelled => &[],
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        self.next_states().is_empty()
    }

    /// String form used for storage and logs (PascalCase, same as serde).
    pub fn as_str(&self) -> &'static str {
        use OrderState::*;
        match self {
            AddingItems => "AddingItems",
            ArrangingPayment => "ArrangingPayment",
            PaymentAuthorized => "PaymentAuthorized",
            PaymentSettled => "PaymentSettled",
            PartiallyShipped => "PartiallyShipped",
            Shipped => "Shipped",
            PartiallyDelivered => "PartiallyDelivered",
            Delivered => "Delivered",
            Cancelled => "Cancelled",
            Modifying => "Modifying",
        }
    }
}

impl std::str::FromStr for OrderState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use OrderState::*;
        Ok(match s {
            "AddingItems" => AddingItems,
            "ArrangingPayment" => ArrangingPayment,
            "PaymentAuthorized" => PaymentAuthorized,
            "PaymentSettled" => PaymentSettled,
            "PartiallyShipped" => PartiallyShipped,
            "Shipped" => Shipped,
            "PartiallyDelivered" => PartiallyDelivered,
            "Delivered" => Delivered,
            "Cancelled" => Cancelled,
            "Modifying" => Modifying,
            other => return Err(format!("Unknown order state: {other}")),
        })
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// A postal address attached to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, Default)]
#[ts(export)]
pub struct Address {
    pub full_name: String,
    pub street_line1: String,
    pub street_line2: Option<String>,
    pub city: String,
    pub province: Option<String>,
    pub postal_code: String,
    pub country_code: String,
    pub phone: Option<String>,
}

/// A shipping charge on an order (one per selected shipping method).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ShippingLine {
    pub shipping_method_id: String,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub price_cents: i64,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub price_with_tax_cents: i64,
}

/// An arbitrary order-level charge or credit (negative price).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Surcharge {
    pub description: String,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub price_cents: i64,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub price_with_tax_cents: i64,
}

// =============================================================================
// Order Line
// =============================================================================

/// One product-variant/quantity entry within an order.
///
/// ## Price Columns
/// ```text
/// unit_price ──► line_price = unit_price × quantity
///      │
///      ▼  (line-level discounts)
/// discounted_line_price
///      │
///      ▼  (order-level discount proration, largest remainder)
/// prorated_line_price   ← authoritative for tax and refund math
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderLine {
    pub id: String,
    pub order_id: String,
    pub product_variant_id: String,

    /// Quantity ordered.
    pub quantity: i64,
    /// Quantity already fulfilled (shipped).
    pub fulfilled_quantity: i64,
    /// Quantity cancelled out of this line.
    pub cancelled_quantity: i64,

    /// Unit price in cents at time of adding (frozen).
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub unit_price_cents: i64,
    /// Tax rate in basis points (825 = 8.25%).
    pub tax_rate_bps: u32,
    /// Line price after line-level discounts.
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub discounted_line_price_cents: i64,
    /// Line price after order-level discount proration. Authoritative.
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub prorated_line_price_cents: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl OrderLine {
    /// Creates a fresh, undiscounted line.
    pub fn new(
        id: impl Into<String>,
        order_id: impl Into<String>,
        product_variant_id: impl Into<String>,
        quantity: i64,
        unit_price_cents: i64,
        tax_rate_bps: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let line_price = unit_price_cents * quantity;
        OrderLine {
            id: id.into(),
            order_id: order_id.into(),
            product_variant_id: product_variant_id.into(),
            quantity,
            fulfilled_quantity: 0,
            cancelled_quantity: 0,
            unit_price_cents,
            tax_rate_bps,
            discounted_line_price_cents: line_price,
            prorated_line_price_cents: line_price,
            created_at: now,
        }
    }

    /// `line_price = unit_price × quantity`.
    #[inline]
    pub fn line_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents).multiply_quantity(self.quantity)
    }

    /// Authoritative post-proration line price.
    #[inline]
    pub fn prorated_line_price(&self) -> Money {
        Money::from_cents(self.prorated_line_price_cents)
    }

    /// Tax computed on the prorated line price.
    #[inline]
    pub fn line_tax(&self) -> Money {
        self.prorated_line_price().tax_at_bps(self.tax_rate_bps)
    }

    /// Prorated unit price (display only; cents may not divide evenly).
    pub fn prorated_unit_price(&self) -> Money {
        if self.quantity == 0 {
            return Money::zero();
        }
        Money::from_cents(self.prorated_line_price_cents / self.quantity)
    }

    /// Quantity still active on the line (not cancelled).
    #[inline]
    pub fn active_quantity(&self) -> i64 {
        self.quantity - self.cancelled_quantity
    }

    /// Quantity still awaiting fulfillment.
    #[inline]
    pub fn unfulfilled_quantity(&self) -> i64 {
        self.active_quantity() - self.fulfilled_quantity
    }

    /// Re-derives the price columns after a quantity change.
    /// Proration resets; `Order::recalculate_totals` re-applies it.
    pub fn set_quantity(&mut self, quantity: i64) {
        self.quantity = quantity;
        let line_price = self.unit_price_cents * quantity;
        self.discounted_line_price_cents = line_price;
        self.prorated_line_price_cents = line_price;
    }
}

// =============================================================================
// Fulfillment
// =============================================================================

/// Quantity of one order line included in a fulfillment or cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderLineInput {
    pub order_line_id: String,
    pub quantity: i64,
}

/// A shipment covering some or all of an order's line quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Fulfillment {
    pub id: String,
    pub order_id: String,
    pub method: String,
    pub tracking_code: Option<String>,
    pub lines: Vec<OrderLineInput>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Order
// =============================================================================

/// A customer's purchase aggregate.
///
/// Mutable while active (`AddingItems`/`ArrangingPayment`); once
/// `order_placed_at` is set it is immutable except via `modifyOrder`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Order {
    pub id: String,
    pub channel_id: String,
    /// Human-facing unique code.
    pub code: String,
    pub customer_id: Option<String>,
    pub state: OrderState,
    /// ISO 4217, e.g. "USD".
    pub currency_code: String,

    pub lines: Vec<OrderLine>,
    pub shipping_lines: Vec<ShippingLine>,
    pub surcharges: Vec<Surcharge>,
    pub coupon_codes: Vec<String>,

    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,

    /// Sum of prorated line prices plus surcharges.
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub sub_total_cents: i64,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub sub_total_with_tax_cents: i64,
    /// Sum of shipping-line prices.
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub shipping_cents: i64,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub shipping_with_tax_cents: i64,

    /// Set when the order leaves the active phase. Never cleared.
    #[ts(as = "Option<String>")]
    pub order_placed_at: Option<DateTime<Utc>>,

    /// Optimistic-concurrency stamp; bumped on every committed mutation.
    pub version: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates an empty order in `AddingItems`.
    pub fn new(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        code: impl Into<String>,
        currency_code: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Order {
            id: id.into(),
            channel_id: channel_id.into(),
            code: code.into(),
            customer_id: None,
            state: OrderState::AddingItems,
            currency_code: currency_code.into(),
            lines: Vec::new(),
            shipping_lines: Vec::new(),
            surcharges: Vec::new(),
            coupon_codes: Vec::new(),
            shipping_address: None,
            billing_address: None,
            sub_total_cents: 0,
            sub_total_with_tax_cents: 0,
            shipping_cents: 0,
            shipping_with_tax_cents: 0,
            order_placed_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// `total = sub_total + shipping`. Invariant, so it is derived, not stored.
    #[inline]
    pub fn total_cents(&self) -> i64 {
        self.sub_total_cents + self.shipping_cents
    }

    /// `total_with_tax = sub_total_with_tax + shipping_with_tax`.
    #[inline]
    pub fn total_with_tax_cents(&self) -> i64 {
        self.sub_total_with_tax_cents + self.shipping_with_tax_cents
    }

    /// Whether the order has been placed (checkout completed).
    #[inline]
    pub fn is_placed(&self) -> bool {
        self.order_placed_at.is_some()
    }

    /// Looks up a line by id.
    pub fn line(&self, order_line_id: &str) -> Option<&OrderLine> {
        self.lines.iter().find(|l| l.id == order_line_id)
    }

    // -------------------------------------------------------------------------
    // State machine
    // -------------------------------------------------------------------------

    /// Attempts a state transition.
    ///
    /// ## Idempotence Policy
    /// Transitioning to the *current* state is a **no-op success**: the
    /// order is returned unchanged and `Ok(false)` signals that nothing
    /// happened. `Ok(true)` means the transition committed.
    pub fn transition_to(
        &mut self,
        target: OrderState,
    ) -> Result<bool, OrderStateTransitionError> {
        if self.state == target {
            return Ok(false);
        }
        if !self.state.next_states().contains(&target) {
            return Err(OrderStateTransitionError {
                from_state: self.state,
                to_state: target,
                transition_error: format!(
                    "No transition from {} to {}; allowed: {:?}",
                    self.state.as_str(),
                    target.as_str(),
                    self.state.next_states()
                ),
            });
        }
        self.state = target;
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Totals
    // -------------------------------------------------------------------------

    /// Re-derives all stored totals from lines, surcharges and shipping
    /// lines. Call after every content mutation.
    pub fn recalculate_totals(&mut self) {
        let line_total: i64 = self.lines.iter().map(|l| l.prorated_line_price_cents).sum();
        let line_tax: i64 = self.lines.iter().map(|l| l.line_tax().cents()).sum();
        let surcharge_total: i64 = self.surcharges.iter().map(|s| s.price_cents).sum();
        let surcharge_with_tax: i64 = self.surcharges.iter().map(|s| s.price_with_tax_cents).sum();

        self.sub_total_cents = line_total + surcharge_total;
        self.sub_total_with_tax_cents = line_total + line_tax + surcharge_with_tax;

        self.shipping_cents = self.shipping_lines.iter().map(|s| s.price_cents).sum();
        self.shipping_with_tax_cents = self
            .shipping_lines
            .iter()
            .map(|s| s.price_with_tax_cents)
            .sum();
    }

    /// Prorates an order-level discount across lines by discounted line
    /// price (largest-remainder, lossless) and recalculates totals.
    ///
    /// Passing `0` clears any previous proration.
    pub fn apply_order_discount(&mut self, discount_cents: i64) {
        let weights: Vec<i64> = self
            .lines
            .iter()
            .map(|l| l.discounted_line_price_cents)
            .collect();
        let shares = distribute(discount_cents, &weights);
        for (line, share) in self.lines.iter_mut().zip(shares) {
            line.prorated_line_price_cents = line.discounted_line_price_cents - share;
        }
        self.recalculate_totals();
    }

    // -------------------------------------------------------------------------
    // Cancellation planning (pure)
    // -------------------------------------------------------------------------

    /// Validates a cancellation request and returns the per-line quantities
    /// to cancel.
    ///
    /// ## Edge Cases
    /// - Unplaced order → `CancelActiveOrder` (active orders are abandoned,
    ///   not cancelled).
    /// - `Some(vec![])` → `EmptyOrderLineSelection` (explicit empty array).
    /// - `None` → cancel the whole order.
    pub fn plan_cancellation(
        &self,
        lines: Option<&[OrderLineInput]>,
    ) -> Result<CancellationPlan, CancelOrderError> {
        if !self.is_placed() {
            return Err(CancelOrderError::CancelActiveOrder {
                order_state: self.state,
            });
        }
        if self.state.is_terminal() {
            return Err(OrderStateTransitionError {
                from_state: self.state,
                to_state: OrderState::Cancelled,
                transition_error: format!("Order is already {}", self.state.as_str()),
            }
            .into());
        }

        let plan_lines = match lines {
            None => self
                .lines
                .iter()
                .filter(|l| l.active_quantity() > 0)
                .map(|l| OrderLineInput {
                    order_line_id: l.id.clone(),
                    quantity: l.active_quantity(),
                })
                .collect::<Vec<_>>(),
            Some([]) => return Err(CancelOrderError::EmptyOrderLineSelection),
            Some(selection) => {
                // Repeated line ids are summed so the bound holds for the
                // selection as a whole.
                let mut totals: Vec<(String, i64)> = Vec::with_capacity(selection.len());
                for input in selection {
                    if input.quantity <= 0 {
                        return Err(CancelOrderError::NegativeQuantity {
                            quantity: input.quantity,
                        });
                    }
                    match totals.iter_mut().find(|(id, _)| id == &input.order_line_id) {
                        Some((_, quantity)) => *quantity += input.quantity,
                        None => totals.push((input.order_line_id.clone(), input.quantity)),
                    }
                }
                let mut plan = Vec::with_capacity(totals.len());
                for (order_line_id, quantity) in totals {
                    let line = self.line(&order_line_id).ok_or_else(|| {
                        CancelOrderError::QuantityTooGreat {
                            order_line_id: order_line_id.clone(),
                            requested: quantity,
                            maximum: 0,
                        }
                    })?;
                    if quantity > line.active_quantity() {
                        return Err(CancelOrderError::QuantityTooGreat {
                            order_line_id: line.id.clone(),
                            requested: quantity,
                            maximum: line.active_quantity(),
                        });
                    }
                    plan.push(OrderLineInput {
                        order_line_id,
                        quantity,
                    });
                }
                plan
            }
        };

        // Whole-order cancel iff every active unit is covered.
        let covered: i64 = plan_lines.iter().map(|l| l.quantity).sum();
        let active: i64 = self.lines.iter().map(|l| l.active_quantity()).sum();

        Ok(CancellationPlan {
            lines: plan_lines,
            cancels_whole_order: covered == active,
        })
    }

    // -------------------------------------------------------------------------
    // Fulfillment planning (pure)
    // -------------------------------------------------------------------------

    /// Validates a fulfillment request and determines the resulting state.
    pub fn plan_fulfillment(
        &self,
        lines: &[OrderLineInput],
    ) -> Result<FulfillmentPlan, AddFulfillmentError> {
        if !matches!(
            self.state,
            OrderState::PaymentSettled | OrderState::PartiallyShipped
        ) {
            return Err(OrderStateTransitionError {
                from_state: self.state,
                to_state: OrderState::Shipped,
                transition_error: "Fulfillments require a settled, unshipped order".to_string(),
            }
            .into());
        }
        if lines.is_empty() {
            return Err(AddFulfillmentError::EmptyOrderLineSelection);
        }

        // Repeated line ids are summed so the bound holds for the
        // selection as a whole.
        let mut totals: Vec<(String, i64)> = Vec::with_capacity(lines.len());
        for input in lines {
            if input.quantity <= 0 {
                return Err(AddFulfillmentError::NegativeQuantity {
                    quantity: input.quantity,
                });
            }
            match totals.iter_mut().find(|(id, _)| id == &input.order_line_id) {
                Some((_, quantity)) => *quantity += input.quantity,
                None => totals.push((input.order_line_id.clone(), input.quantity)),
            }
        }

        let mut resolved = Vec::with_capacity(totals.len());
        for (order_line_id, quantity) in totals {
            let line = self.line(&order_line_id).ok_or_else(|| {
                AddFulfillmentError::QuantityTooGreat {
                    order_line_id: order_line_id.clone(),
                    requested: quantity,
                    maximum: 0,
                }
            })?;
            resolved.push((line, quantity));
        }
        if resolved.iter().all(|(line, _)| line.unfulfilled_quantity() == 0) {
            return Err(AddFulfillmentError::ItemsAlreadyFulfilled);
        }

        let mut plan_lines = Vec::with_capacity(resolved.len());
        for (line, quantity) in resolved {
            if quantity > line.unfulfilled_quantity() {
                return Err(AddFulfillmentError::QuantityTooGreat {
                    order_line_id: line.id.clone(),
                    requested: quantity,
                    maximum: line.unfulfilled_quantity(),
                });
            }
            plan_lines.push(OrderLineInput {
                order_line_id: line.id.clone(),
                quantity,
            });
        }

        // Resulting state: Shipped when the fulfillment covers everything
        // still outstanding, PartiallyShipped otherwise.
        let outstanding: i64 = self.lines.iter().map(|l| l.unfulfilled_quantity()).sum();
        let covered: i64 = plan_lines.iter().map(|l| l.quantity).sum();

        Ok(FulfillmentPlan {
            lines: plan_lines,
            resulting_state: if covered == outstanding {
                OrderState::Shipped
            } else {
                OrderState::PartiallyShipped
            },
        })
    }
}

/// A validated cancellation: per-line quantities plus whether the whole
/// order empties out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationPlan {
    pub lines: Vec<OrderLineInput>,
    pub cancels_whole_order: bool,
}

/// A validated fulfillment and the state the order lands in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentPlan {
    pub lines: Vec<OrderLineInput>,
    pub resulting_state: OrderState,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn order_with_lines(prices: &[(i64, i64)]) -> Order {
        let now = Utc::now();
        let mut order = Order::new("order-1", "channel-1", "ORD-0001", "USD", now);
        for (idx, &(unit_price, qty)) in prices.iter().enumerate() {
            order.lines.push(OrderLine::new(
                format!("line-{idx}"),
                "order-1",
                format!("variant-{idx}"),
                qty,
                unit_price,
                0,
                now,
            ));
        }
        order.recalculate_totals();
        order
    }

    fn placed(mut order: Order, state: OrderState) -> Order {
        order.order_placed_at = Some(Utc::now());
        order.state = state;
        order
    }

    #[test]
    fn test_legal_transition() {
        let mut order = order_with_lines(&[(1000, 1)]);
        assert!(order.transition_to(OrderState::ArrangingPayment).unwrap());
        assert_eq!(order.state, OrderState::ArrangingPayment);
    }

    #[test]
    fn test_illegal_transition_reports_both_states() {
        let mut order = order_with_lines(&[(1000, 1)]);
        let err = order.transition_to(OrderState::Delivered).unwrap_err();
        assert_eq!(err.from_state, OrderState::AddingItems);
        assert_eq!(err.to_state, OrderState::Delivered);
        // Nothing changed
        assert_eq!(order.state, OrderState::AddingItems);
    }

    #[test]
    fn test_same_state_transition_is_noop_success() {
        let mut order = order_with_lines(&[(1000, 1)]);
        let before = order.clone();
        let changed = order.transition_to(OrderState::AddingItems).unwrap();
        assert!(!changed);
        assert_eq!(order.state, before.state);
        assert_eq!(order.version, before.version);
    }

    #[test]
    fn test_terminal_states_have_no_next_states() {
        assert!(OrderState::Delivered.next_states().is_empty());
        assert!(OrderState::Cancelled.next_states().is_empty());
        assert!(OrderState::Delivered.is_terminal());
        assert!(!OrderState::Shipped.is_terminal());
    }

    #[test]
    fn test_totals_invariant() {
        let mut order = order_with_lines(&[(1000, 2), (250, 4)]);
        order.shipping_lines.push(ShippingLine {
            shipping_method_id: "standard".to_string(),
            price_cents: 500,
            price_with_tax_cents: 550,
        });
        order.recalculate_totals();

        assert_eq!(order.sub_total_cents, 3000);
        assert_eq!(order.shipping_cents, 500);
        assert_eq!(order.total_cents(), order.sub_total_cents + order.shipping_cents);
        assert_eq!(
            order.total_with_tax_cents(),
            order.sub_total_with_tax_cents + order.shipping_with_tax_cents
        );
    }

    #[test]
    fn test_order_discount_proration_is_lossless() {
        let mut order = order_with_lines(&[(1000, 1), (1000, 1), (1000, 1)]);
        order.apply_order_discount(100);

        let prorated: i64 = order.lines.iter().map(|l| l.prorated_line_price_cents).sum();
        assert_eq!(prorated, 2900);
        assert_eq!(order.sub_total_cents, 2900);

        // Clearing restores the discounted prices
        order.apply_order_discount(0);
        assert_eq!(order.sub_total_cents, 3000);
    }

    #[test]
    fn test_line_price_invariant() {
        let line = OrderLine::new("l", "o", "v", 3, 299, 825, Utc::now());
        assert_eq!(line.line_price().cents(), 897);
        assert_eq!(line.discounted_line_price_cents, 897);
        assert_eq!(line.prorated_line_price_cents, 897);
    }

    #[test]
    fn test_cancel_unplaced_order_rejected() {
        let order = order_with_lines(&[(1000, 1)]);
        let err = order.plan_cancellation(None).unwrap_err();
        assert!(matches!(err, CancelOrderError::CancelActiveOrder { .. }));
    }

    #[test]
    fn test_cancel_explicit_empty_selection_rejected() {
        let order = placed(order_with_lines(&[(1000, 1)]), OrderState::PaymentSettled);
        let err = order.plan_cancellation(Some(&[])).unwrap_err();
        assert!(matches!(err, CancelOrderError::EmptyOrderLineSelection));
    }

    #[test]
    fn test_cancel_quantity_too_great() {
        let order = placed(order_with_lines(&[(1000, 2)]), OrderState::PaymentSettled);
        let err = order
            .plan_cancellation(Some(&[OrderLineInput {
                order_line_id: "line-0".to_string(),
                quantity: 3,
            }]))
            .unwrap_err();
        assert!(matches!(
            err,
            CancelOrderError::QuantityTooGreat { requested: 3, maximum: 2, .. }
        ));
    }

    #[test]
    fn test_cancel_negative_quantity_rejected() {
        let order = placed(order_with_lines(&[(1000, 2)]), OrderState::PaymentSettled);
        let err = order
            .plan_cancellation(Some(&[OrderLineInput {
                order_line_id: "line-0".to_string(),
                quantity: -1,
            }]))
            .unwrap_err();
        assert!(matches!(err, CancelOrderError::NegativeQuantity { quantity: -1 }));
    }

    #[test]
    fn test_cancel_duplicate_line_ids_bounded_in_aggregate() {
        let order = placed(order_with_lines(&[(1000, 2)]), OrderState::PaymentSettled);
        let selection = vec![
            OrderLineInput { order_line_id: "line-0".to_string(), quantity: 2 },
            OrderLineInput { order_line_id: "line-0".to_string(), quantity: 2 },
        ];
        let err = order.plan_cancellation(Some(&selection)).unwrap_err();
        assert!(matches!(
            err,
            CancelOrderError::QuantityTooGreat { requested: 4, maximum: 2, .. }
        ));

        // A split that stays inside the bound collapses to one plan line
        let split = vec![
            OrderLineInput { order_line_id: "line-0".to_string(), quantity: 1 },
            OrderLineInput { order_line_id: "line-0".to_string(), quantity: 1 },
        ];
        let plan = order.plan_cancellation(Some(&split)).unwrap();
        assert_eq!(plan.lines.len(), 1);
        assert_eq!(plan.lines[0].quantity, 2);
        assert!(plan.cancels_whole_order);
    }

    #[test]
    fn test_cancel_whole_vs_partial() {
        let order = placed(order_with_lines(&[(1000, 2), (500, 1)]), OrderState::PaymentSettled);

        let whole = order.plan_cancellation(None).unwrap();
        assert!(whole.cancels_whole_order);

        let partial = order
            .plan_cancellation(Some(&[OrderLineInput {
                order_line_id: "line-0".to_string(),
                quantity: 1,
            }]))
            .unwrap();
        assert!(!partial.cancels_whole_order);
    }

    #[test]
    fn test_fulfillment_full_and_partial() {
        let order = placed(order_with_lines(&[(1000, 2), (500, 1)]), OrderState::PaymentSettled);

        let all = vec![
            OrderLineInput { order_line_id: "line-0".to_string(), quantity: 2 },
            OrderLineInput { order_line_id: "line-1".to_string(), quantity: 1 },
        ];
        let plan = order.plan_fulfillment(&all).unwrap();
        assert_eq!(plan.resulting_state, OrderState::Shipped);

        let some = vec![OrderLineInput { order_line_id: "line-0".to_string(), quantity: 1 }];
        let plan = order.plan_fulfillment(&some).unwrap();
        assert_eq!(plan.resulting_state, OrderState::PartiallyShipped);
    }

    #[test]
    fn test_fulfillment_negative_quantity_rejected() {
        let order = placed(order_with_lines(&[(1000, 2)]), OrderState::PaymentSettled);
        let err = order
            .plan_fulfillment(&[OrderLineInput {
                order_line_id: "line-0".to_string(),
                quantity: -2,
            }])
            .unwrap_err();
        assert!(matches!(err, AddFulfillmentError::NegativeQuantity { quantity: -2 }));
    }

    #[test]
    fn test_fulfillment_duplicate_line_ids_bounded_in_aggregate() {
        let order = placed(order_with_lines(&[(1000, 2)]), OrderState::PaymentSettled);
        let selection = vec![
            OrderLineInput { order_line_id: "line-0".to_string(), quantity: 2 },
            OrderLineInput { order_line_id: "line-0".to_string(), quantity: 2 },
        ];
        let err = order.plan_fulfillment(&selection).unwrap_err();
        assert!(matches!(
            err,
            AddFulfillmentError::QuantityTooGreat { requested: 4, maximum: 2, .. }
        ));

        let split = vec![
            OrderLineInput { order_line_id: "line-0".to_string(), quantity: 1 },
            OrderLineInput { order_line_id: "line-0".to_string(), quantity: 1 },
        ];
        let plan = order.plan_fulfillment(&split).unwrap();
        assert_eq!(plan.lines.len(), 1);
        assert_eq!(plan.lines[0].quantity, 2);
        assert_eq!(plan.resulting_state, OrderState::Shipped);
    }

    #[test]
    fn test_fulfillment_already_fulfilled() {
        let mut order = placed(order_with_lines(&[(1000, 1)]), OrderState::PartiallyShipped);
        order.lines[0].fulfilled_quantity = 1;

        let err = order
            .plan_fulfillment(&[OrderLineInput {
                order_line_id: "line-0".to_string(),
                quantity: 1,
            }])
            .unwrap_err();
        assert!(matches!(err, AddFulfillmentError::ItemsAlreadyFulfilled));
    }

    #[test]
    fn test_fulfillment_wrong_state() {
        let order = order_with_lines(&[(1000, 1)]);
        let err = order
            .plan_fulfillment(&[OrderLineInput {
                order_line_id: "line-0".to_string(),
                quantity: 1,
            }])
            .unwrap_err();
        assert!(matches!(err, AddFulfillmentError::Transition(_)));
    }
}
