//! # Order Modification Planning
//!
//! Amends a placed order as one atomic batch, computing the net
//! `price_change` and the settlement instrument it requires.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Order (Modifying)                                                      │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  plan_modification(order, input, refs, settings)                        │
//! │      │  validate batch ──► apply to a copy ──► recompute totals         │
//! │      ▼                                                                  │
//! │  price_change = new total_with_tax - old total_with_tax                 │
//! │      │                                                                  │
//! │      ├── > 0 and no payment method   ──► PaymentMethodMissing           │
//! │      ├── < 0 and no refund payment   ──► RefundPaymentIdMissing         │
//! │      └── otherwise ──► ModificationPlan { updated order, record,        │
//! │                                           settlement instruction }      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The planner is pure: reference data (stock levels, coupon validity,
//! shipping quotes) arrives pre-resolved in a [`ReferenceSnapshot`], and the
//! input order is never mutated. `dry_run` is carried on the input for the
//! caller; the plan itself is identical either way — the caller decides
//! whether to persist it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::config::ChannelSettings;
use crate::error::ModifyOrderError;
use crate::order::{Address, Order, OrderLine, OrderLineInput, OrderState, ShippingLine, Surcharge};

// =============================================================================
// Input Types
// =============================================================================

/// A new line to add during modification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AddItemInput {
    pub product_variant_id: String,
    pub quantity: i64,
}

/// A surcharge to attach during modification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SurchargeInput {
    pub description: String,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub price_cents: i64,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub price_with_tax_cents: i64,
}

/// The full modification batch for one `modifyOrder` call.
///
/// `adjust_order_lines` carries *target* quantities, not deltas: adjusting
/// a 3-quantity line to 1 removes two units.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ModifyOrderInput {
    pub order_id: String,
    /// Compute and return the plan without persisting it.
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub add_items: Vec<AddItemInput>,
    #[serde(default)]
    pub adjust_order_lines: Vec<OrderLineInput>,
    #[serde(default)]
    pub surcharges: Vec<SurchargeInput>,
    /// Replaces the order's coupon set when present.
    pub coupon_codes: Option<Vec<String>>,
    pub update_shipping_address: Option<Address>,
    pub update_billing_address: Option<Address>,
    #[serde(default)]
    pub shipping_method_ids: Vec<String>,
    pub note: Option<String>,

    /// Settlement instrument when the price increases.
    pub payment_method: Option<String>,
    /// Settlement target when the price decreases.
    pub refund_payment_id: Option<String>,
}

impl ModifyOrderInput {
    /// Whether the batch contains any change at all.
    pub fn has_changes(&self) -> bool {
        !self.add_items.is_empty()
            || !self.adjust_order_lines.is_empty()
            || !self.surcharges.is_empty()
            || self.coupon_codes.is_some()
            || self.update_shipping_address.is_some()
            || self.update_billing_address.is_some()
            || !self.shipping_method_ids.is_empty()
    }
}

// =============================================================================
// Reference Snapshot
// =============================================================================

/// Pricing and stock for one product variant, as of planning time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct VariantReference {
    pub product_variant_id: String,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub unit_price_cents: i64,
    pub tax_rate_bps: u32,
    pub stock_available: i64,
}

/// Resolved validity of one coupon code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum CouponState {
    /// Usable; grants this order-level discount.
    Valid {
        #[serde(with = "crate::money::cents_string")]
        #[ts(as = "String")]
        discount_cents: i64,
    },
    Invalid,
    Expired,
    LimitReached { limit: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CouponReference {
    pub code: String,
    pub state: CouponState,
}

/// A shipping method's eligibility and price for this order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ShippingQuote {
    pub shipping_method_id: String,
    pub eligible: bool,
    pub eligibility_error: Option<String>,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub price_cents: i64,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub price_with_tax_cents: i64,
}

/// Everything external the planner needs, resolved before planning.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSnapshot {
    pub variants: Vec<VariantReference>,
    pub coupons: Vec<CouponReference>,
    pub shipping_quotes: Vec<ShippingQuote>,
}

impl ReferenceSnapshot {
    fn variant(&self, product_variant_id: &str) -> Option<&VariantReference> {
        self.variants
            .iter()
            .find(|v| v.product_variant_id == product_variant_id)
    }

    fn coupon(&self, code: &str) -> Option<&CouponReference> {
        self.coupons.iter().find(|c| c.code == code)
    }

    fn shipping_quote(&self, shipping_method_id: &str) -> Option<&ShippingQuote> {
        self.shipping_quotes
            .iter()
            .find(|q| q.shipping_method_id == shipping_method_id)
    }
}

// =============================================================================
// Modification Record
// =============================================================================

/// One line's delta within a modification (signed: removals are negative).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderModificationLine {
    pub order_line_id: String,
    pub quantity_delta: i64,
}

/// The persisted record of one `modifyOrder` call. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderModification {
    pub id: String,
    pub order_id: String,
    pub note: Option<String>,
    /// Signed net change to the order total (with tax).
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub price_change_cents: i64,
    /// Set once the linked payment or refund settles.
    pub is_settled: bool,
    pub lines: Vec<OrderModificationLine>,
    pub surcharges: Vec<Surcharge>,
    /// Payment that settled a price increase.
    pub payment_id: Option<String>,
    /// Refund that settled a price decrease.
    pub refund_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// The settlement instruction the plan's price change demands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModificationSettlement {
    /// No net price change; nothing to settle.
    None,
    /// Price increased: collect via this method.
    Payment {
        method: String,
        amount_cents: i64,
    },
    /// Price decreased: refund against this payment.
    Refund {
        payment_id: String,
        amount_cents: i64,
    },
}

/// A validated modification, ready to persist (or discard on dry run).
#[derive(Debug, Clone)]
pub struct ModificationPlan {
    /// The order with all batch changes applied and totals recomputed.
    pub updated_order: Order,
    pub modification: OrderModification,
    pub price_change_cents: i64,
    pub settlement: ModificationSettlement,
}

// =============================================================================
// Planner
// =============================================================================

/// Plans a modification batch against an order in the `Modifying` state.
///
/// ## Validation Order
/// 1. Batch non-empty, order in `Modifying`, quantities non-negative.
/// 2. Coupon codes (when replaced): expired / invalid / over limit.
/// 3. Line adjustments and additions, with stock checks on increases.
/// 4. Line-count limit, shipping eligibility.
/// 5. Settlement instrument matching the sign of the price change.
///
/// Line adjustments referencing unknown line ids must be rejected by the
/// caller before planning; existence is not re-checked here.
pub fn plan_modification(
    order: &Order,
    input: &ModifyOrderInput,
    refs: &ReferenceSnapshot,
    settings: &ChannelSettings,
    now: DateTime<Utc>,
) -> Result<ModificationPlan, ModifyOrderError> {
    if !input.has_changes() {
        return Err(ModifyOrderError::NoChangesSpecified);
    }
    if order.state != OrderState::Modifying {
        return Err(ModifyOrderError::OrderModificationState {
            order_state: order.state,
        });
    }
    for item in &input.add_items {
        if item.quantity < 0 {
            return Err(ModifyOrderError::NegativeQuantity {
                quantity: item.quantity,
            });
        }
    }
    for adjust in &input.adjust_order_lines {
        if adjust.quantity < 0 {
            return Err(ModifyOrderError::NegativeQuantity {
                quantity: adjust.quantity,
            });
        }
    }

    let mut updated = order.clone();
    let mut mod_lines: Vec<OrderModificationLine> = Vec::new();

    // Coupons: when the batch replaces the set, every code must resolve
    // valid, and the combined discount re-prorates across lines.
    let mut discount_cents: Option<i64> = None;
    if let Some(codes) = &input.coupon_codes {
        let mut total_discount = 0i64;
        for code in codes {
            let reference =
                refs.coupon(code)
                    .ok_or_else(|| ModifyOrderError::CouponCodeInvalid {
                        coupon_code: code.clone(),
                    })?;
            match &reference.state {
                CouponState::Valid { discount_cents } => total_discount += discount_cents,
                CouponState::Invalid => {
                    return Err(ModifyOrderError::CouponCodeInvalid {
                        coupon_code: code.clone(),
                    })
                }
                CouponState::Expired => {
                    return Err(ModifyOrderError::CouponCodeExpired {
                        coupon_code: code.clone(),
                    })
                }
                CouponState::LimitReached { limit } => {
                    return Err(ModifyOrderError::CouponCodeLimit {
                        coupon_code: code.clone(),
                        limit: *limit,
                    })
                }
            }
        }
        updated.coupon_codes = codes.clone();
        discount_cents = Some(total_discount);
    }

    // Quantity adjustments: target-quantity semantics. Increases are
    // stock-checked on the delta.
    for adjust in &input.adjust_order_lines {
        let line = match updated.lines.iter_mut().find(|l| l.id == adjust.order_line_id) {
            Some(line) => line,
            None => continue,
        };
        let delta = adjust.quantity - line.quantity;
        if delta > 0 {
            let variant = refs.variant(&line.product_variant_id);
            let available = variant.map(|v| v.stock_available).unwrap_or(0);
            if delta > available {
                return Err(ModifyOrderError::InsufficientStock {
                    product_variant_id: line.product_variant_id.clone(),
                    quantity_available: available,
                });
            }
        }
        if delta != 0 {
            line.set_quantity(adjust.quantity);
            mod_lines.push(OrderModificationLine {
                order_line_id: line.id.clone(),
                quantity_delta: delta,
            });
        }
    }

    // New lines, priced from the reference snapshot.
    for item in &input.add_items {
        let variant = refs.variant(&item.product_variant_id).ok_or_else(|| {
            ModifyOrderError::InsufficientStock {
                product_variant_id: item.product_variant_id.clone(),
                quantity_available: 0,
            }
        })?;
        if item.quantity > variant.stock_available {
            return Err(ModifyOrderError::InsufficientStock {
                product_variant_id: item.product_variant_id.clone(),
                quantity_available: variant.stock_available,
            });
        }
        let line = OrderLine::new(
            Uuid::new_v4().to_string(),
            updated.id.clone(),
            item.product_variant_id.clone(),
            item.quantity,
            variant.unit_price_cents,
            variant.tax_rate_bps,
            now,
        );
        mod_lines.push(OrderModificationLine {
            order_line_id: line.id.clone(),
            quantity_delta: item.quantity,
        });
        updated.lines.push(line);
    }

    if updated.lines.len() > settings.max_order_lines {
        return Err(ModifyOrderError::OrderLimit {
            max_lines: settings.max_order_lines,
        });
    }

    // Shipping replacement: every requested method must quote eligible.
    if !input.shipping_method_ids.is_empty() {
        let mut shipping_lines = Vec::with_capacity(input.shipping_method_ids.len());
        for method_id in &input.shipping_method_ids {
            let quote = refs.shipping_quote(method_id).ok_or_else(|| {
                ModifyOrderError::IneligibleShippingMethod {
                    shipping_method_id: method_id.clone(),
                    eligibility_error: "No quote available for this order".to_string(),
                }
            })?;
            if !quote.eligible {
                return Err(ModifyOrderError::IneligibleShippingMethod {
                    shipping_method_id: method_id.clone(),
                    eligibility_error: quote
                        .eligibility_error
                        .clone()
                        .unwrap_or_else(|| "Method not eligible".to_string()),
                });
            }
            shipping_lines.push(ShippingLine {
                shipping_method_id: quote.shipping_method_id.clone(),
                price_cents: quote.price_cents,
                price_with_tax_cents: quote.price_with_tax_cents,
            });
        }
        updated.shipping_lines = shipping_lines;
    }

    let plan_surcharges: Vec<Surcharge> = input
        .surcharges
        .iter()
        .map(|s| Surcharge {
            description: s.description.clone(),
            price_cents: s.price_cents,
            price_with_tax_cents: s.price_with_tax_cents,
        })
        .collect();
    updated.surcharges.extend(plan_surcharges.iter().cloned());

    if let Some(address) = &input.update_shipping_address {
        updated.shipping_address = Some(address.clone());
    }
    if let Some(address) = &input.update_billing_address {
        updated.billing_address = Some(address.clone());
    }

    match discount_cents {
        Some(cents) => updated.apply_order_discount(cents),
        None => updated.recalculate_totals(),
    }

    let price_change = updated.total_with_tax_cents() - order.total_with_tax_cents();

    // Settlement instrument must match the sign of the change.
    let settlement = if price_change > 0 {
        let method = input
            .payment_method
            .clone()
            .ok_or(ModifyOrderError::PaymentMethodMissing)?;
        ModificationSettlement::Payment {
            method,
            amount_cents: price_change,
        }
    } else if price_change < 0 {
        let payment_id = input
            .refund_payment_id
            .clone()
            .ok_or(ModifyOrderError::RefundPaymentIdMissing)?;
        ModificationSettlement::Refund {
            payment_id,
            amount_cents: -price_change,
        }
    } else {
        ModificationSettlement::None
    };

    let modification = OrderModification {
        id: Uuid::new_v4().to_string(),
        order_id: order.id.clone(),
        note: input.note.clone(),
        price_change_cents: price_change,
        is_settled: price_change == 0,
        lines: mod_lines,
        surcharges: plan_surcharges,
        payment_id: None,
        refund_id: None,
        created_at: now,
    };

    Ok(ModificationPlan {
        updated_order: updated,
        modification,
        price_change_cents: price_change,
        settlement,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
