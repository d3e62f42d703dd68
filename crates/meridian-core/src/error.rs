//! # Error Types
//!
//! Typed domain errors for meridian-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  meridian-core errors (this file)                                      │
//! │  ├── Per-mutation unions  - ModifyOrderError, RefundOrderError, ...    │
//! │  ├── Shared members       - OrderStateTransitionError, ...            │
//! │  └── Fatal invariants     - LedgerError (never a business result)      │
//! │                                                                         │
//! │  meridian-db errors (separate crate)                                   │
//! │  └── DbError              - Database operation failures                │
//! │                                                                         │
//! │  meridian-engine errors (separate crate)                               │
//! │  └── EngineError          - Infrastructure failures only               │
//! │                                                                         │
//! │  Flow: mutation → Result<Result<T, TypedError>, EngineError>           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Every expected business failure is a value in a closed union, carrying
//!    an [`ErrorCode`] and a human-readable message (`Display`). Callers
//!    pattern-match the concrete variant; none are retryable with identical
//!    input.
//! 2. Cross-aggregate invariant violations (an unbalanced journal entry, a
//!    posting into a closed period) are [`LedgerError`] — fatal to the
//!    enclosing transaction, never surfaced as a typed business result.
//! 3. Use `thiserror` for derive macros (not manual impl)
//! 4. Errors are enum variants, never String

use serde::Serialize;
use thiserror::Error;

use crate::order::OrderState;
use crate::payment::{PaymentState, RefundState};

// =============================================================================
// Error Code
// =============================================================================

/// Closed set of machine-readable error codes.
///
/// Mirrors the codes a client pattern-matches on. Every typed error below
/// maps to exactly one of these via `error_code()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    OrderStateTransitionError,
    PaymentStateTransitionError,
    RefundStateTransitionError,
    SettlePaymentError,
    CancelPaymentError,
    CancelActiveOrderError,
    EmptyOrderLineSelectionError,
    ItemsAlreadyFulfilledError,
    QuantityTooGreatError,
    NegativeQuantityError,
    NoChangesSpecifiedError,
    OrderLimitError,
    OrderModificationStateError,
    PaymentMethodMissingError,
    RefundPaymentIdMissingError,
    CouponCodeExpiredError,
    CouponCodeInvalidError,
    CouponCodeLimitError,
    IneligibleShippingMethodError,
    InsufficientStockError,
    AlreadyRefundedError,
    MultipleOrderError,
    NothingToRefundError,
    PaymentOrderMismatchError,
    RefundAmountError,
    RefundOrderStateError,
    SessionError,
    ReconciliationError,
}

// =============================================================================
// Shared Union Members
// =============================================================================

/// Illegal order-state transition.
///
/// Member of several unions: `transitionOrderToState`, `settlePayment`,
/// `refundOrder`, `cancelOrder`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("Cannot transition order from {from_state:?} to {to_state:?}: {transition_error}")]
pub struct OrderStateTransitionError {
    pub from_state: OrderState,
    pub to_state: OrderState,
    pub transition_error: String,
}

/// Illegal payment-state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("Cannot transition payment from {from_state:?} to {to_state:?}: {transition_error}")]
pub struct PaymentStateTransitionError {
    pub from_state: PaymentState,
    pub to_state: PaymentState,
    pub transition_error: String,
}

/// Illegal refund-state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("Cannot transition refund from {from_state:?} to {to_state:?}: {transition_error}")]
pub struct RefundStateTransitionError {
    pub from_state: RefundState,
    pub to_state: RefundState,
    pub transition_error: String,
}

// =============================================================================
// cancelOrder / addFulfillmentToOrder
// =============================================================================

/// Result-union errors for `cancelOrder`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum CancelOrderError {
    /// Order was never placed; there is nothing to cancel yet.
    #[error("Order is still active ({order_state:?}); active orders are abandoned, not cancelled")]
    CancelActiveOrder { order_state: OrderState },

    /// Caller passed an explicit empty `lines` array.
    #[error("At least one order line must be selected")]
    EmptyOrderLineSelection,

    /// Requested cancel quantity exceeds what the line holds.
    #[error("Cannot cancel {requested} of line {order_line_id}: only {maximum} available")]
    QuantityTooGreat {
        order_line_id: String,
        requested: i64,
        maximum: i64,
    },

    #[error("Quantity {quantity} is negative")]
    NegativeQuantity { quantity: i64 },

    #[error(transparent)]
    Transition(#[from] OrderStateTransitionError),
}

impl CancelOrderError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::CancelActiveOrder { .. } => ErrorCode::CancelActiveOrderError,
            Self::EmptyOrderLineSelection => ErrorCode::EmptyOrderLineSelectionError,
            Self::QuantityTooGreat { .. } => ErrorCode::QuantityTooGreatError,
            Self::NegativeQuantity { .. } => ErrorCode::NegativeQuantityError,
            Self::Transition(_) => ErrorCode::OrderStateTransitionError,
        }
    }
}

/// Result-union errors for `addFulfillmentToOrder`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum AddFulfillmentError {
    #[error("At least one order line must be selected")]
    EmptyOrderLineSelection,

    /// Every selected line is already fully fulfilled.
    #[error("The selected order lines are already fully fulfilled")]
    ItemsAlreadyFulfilled,

    #[error("Cannot fulfill {requested} of line {order_line_id}: only {maximum} unfulfilled")]
    QuantityTooGreat {
        order_line_id: String,
        requested: i64,
        maximum: i64,
    },

    #[error("Quantity {quantity} is negative")]
    NegativeQuantity { quantity: i64 },

    #[error(transparent)]
    Transition(#[from] OrderStateTransitionError),
}

impl AddFulfillmentError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::EmptyOrderLineSelection => ErrorCode::EmptyOrderLineSelectionError,
            Self::ItemsAlreadyFulfilled => ErrorCode::ItemsAlreadyFulfilledError,
            Self::QuantityTooGreat { .. } => ErrorCode::QuantityTooGreatError,
            Self::NegativeQuantity { .. } => ErrorCode::NegativeQuantityError,
            Self::Transition(_) => ErrorCode::OrderStateTransitionError,
        }
    }
}

// =============================================================================
// modifyOrder
// =============================================================================

/// Result-union errors for `modifyOrder`.
///
/// ## Settlement Rule
/// ```text
/// price_change > 0  and no payment instruction  → PaymentMethodMissing
/// price_change < 0  and no refund_payment_id    → RefundPaymentIdMissing
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ModifyOrderError {
    /// The input batch contained no changes at all.
    #[error("No changes were specified in the modification")]
    NoChangesSpecified,

    /// Order must first be transitioned into `Modifying`.
    #[error("Order is in {order_state:?}; modifications require the Modifying state")]
    OrderModificationState { order_state: OrderState },

    #[error("Quantity {quantity} is negative")]
    NegativeQuantity { quantity: i64 },

    /// Resulting order would exceed the channel line-count limit.
    #[error("Order cannot have more than {max_lines} lines")]
    OrderLimit { max_lines: usize },

    #[error("Insufficient stock for variant {product_variant_id}: only {quantity_available} available")]
    InsufficientStock {
        product_variant_id: String,
        quantity_available: i64,
    },

    #[error("Coupon code '{coupon_code}' has expired")]
    CouponCodeExpired { coupon_code: String },

    #[error("Coupon code '{coupon_code}' is not valid")]
    CouponCodeInvalid { coupon_code: String },

    #[error("Coupon code '{coupon_code}' has reached its usage limit of {limit}")]
    CouponCodeLimit { coupon_code: String, limit: i64 },

    #[error("Shipping method {shipping_method_id} is not eligible for this order: {eligibility_error}")]
    IneligibleShippingMethod {
        shipping_method_id: String,
        eligibility_error: String,
    },

    /// Net price increased but no payment instruction was supplied.
    #[error("The modification increases the order total; a payment method is required")]
    PaymentMethodMissing,

    /// Net price decreased but no refund target was supplied.
    #[error("The modification decreases the order total; a refund payment id is required")]
    RefundPaymentIdMissing,
}

impl ModifyOrderError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NoChangesSpecified => ErrorCode::NoChangesSpecifiedError,
            Self::OrderModificationState { .. } => ErrorCode::OrderModificationStateError,
            Self::NegativeQuantity { .. } => ErrorCode::NegativeQuantityError,
            Self::OrderLimit { .. } => ErrorCode::OrderLimitError,
            Self::InsufficientStock { .. } => ErrorCode::InsufficientStockError,
            Self::CouponCodeExpired { .. } => ErrorCode::CouponCodeExpiredError,
            Self::CouponCodeInvalid { .. } => ErrorCode::CouponCodeInvalidError,
            Self::CouponCodeLimit { .. } => ErrorCode::CouponCodeLimitError,
            Self::IneligibleShippingMethod { .. } => ErrorCode::IneligibleShippingMethodError,
            Self::PaymentMethodMissing => ErrorCode::PaymentMethodMissingError,
            Self::RefundPaymentIdMissing => ErrorCode::RefundPaymentIdMissingError,
        }
    }
}

// =============================================================================
// settlePayment / cancelPayment
// =============================================================================

/// Result-union errors for `settlePayment`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum SettlePaymentError {
    /// Downstream settlement handler rejected the settlement.
    #[error("Settlement failed: {payment_error_message}")]
    SettlementFailed { payment_error_message: String },

    #[error(transparent)]
    PaymentTransition(#[from] PaymentStateTransitionError),

    /// The owning order could not make its corresponding transition.
    #[error(transparent)]
    OrderTransition(#[from] OrderStateTransitionError),
}

impl SettlePaymentError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::SettlementFailed { .. } => ErrorCode::SettlePaymentError,
            Self::PaymentTransition(_) => ErrorCode::PaymentStateTransitionError,
            Self::OrderTransition(_) => ErrorCode::OrderStateTransitionError,
        }
    }
}

/// Result-union errors for `cancelPayment`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum CancelPaymentError {
    #[error("Cancellation failed: {payment_error_message}")]
    CancellationFailed { payment_error_message: String },

    #[error(transparent)]
    PaymentTransition(#[from] PaymentStateTransitionError),
}

impl CancelPaymentError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::CancellationFailed { .. } => ErrorCode::CancelPaymentError,
            Self::PaymentTransition(_) => ErrorCode::PaymentStateTransitionError,
        }
    }
}

// =============================================================================
// refundOrder
// =============================================================================

/// Result-union errors for `refundOrder`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum RefundOrderError {
    /// Requested amount exceeds what is still refundable on the payment.
    #[error("Refund amount exceeds the maximum refundable of {maximum_refundable}")]
    RefundAmount { maximum_refundable: i64 },

    /// Neither an item refund nor a shipping refund is computable.
    #[error("Nothing to refund")]
    NothingToRefund,

    /// The targeted items were already fully refunded.
    #[error("The selected items were already refunded by refund {refund_id}")]
    AlreadyRefunded { refund_id: String },

    /// Referenced order lines do not belong to the payment's order.
    #[error("The selected order lines do not belong to the payment's order")]
    PaymentOrderMismatch,

    /// Referenced order lines span more than one order.
    #[error("The selected order lines belong to multiple orders")]
    MultipleOrder,

    #[error("Cannot refund {requested} of line {order_line_id}: only {maximum} refundable")]
    QuantityTooGreat {
        order_line_id: String,
        requested: i64,
        maximum: i64,
    },

    #[error("Quantity {quantity} is negative")]
    NegativeQuantity { quantity: i64 },

    /// Order has not reached a refundable state yet.
    #[error("Order in state {order_state:?} cannot be refunded")]
    RefundOrderState { order_state: OrderState },

    #[error(transparent)]
    RefundTransition(#[from] RefundStateTransitionError),

    #[error(transparent)]
    OrderTransition(#[from] OrderStateTransitionError),
}

impl RefundOrderError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::RefundAmount { .. } => ErrorCode::RefundAmountError,
            Self::NothingToRefund => ErrorCode::NothingToRefundError,
            Self::AlreadyRefunded { .. } => ErrorCode::AlreadyRefundedError,
            Self::PaymentOrderMismatch => ErrorCode::PaymentOrderMismatchError,
            Self::MultipleOrder => ErrorCode::MultipleOrderError,
            Self::QuantityTooGreat { .. } => ErrorCode::QuantityTooGreatError,
            Self::NegativeQuantity { .. } => ErrorCode::NegativeQuantityError,
            Self::RefundOrderState { .. } => ErrorCode::RefundOrderStateError,
            Self::RefundTransition(_) => ErrorCode::RefundStateTransitionError,
            Self::OrderTransition(_) => ErrorCode::OrderStateTransitionError,
        }
    }
}

// =============================================================================
// Cashier Sessions & Reconciliation
// =============================================================================

/// Errors for cashier-session operations.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum SessionError {
    /// Operation requires an open session.
    #[error("Cashier session {session_id} is not open")]
    NotOpen { session_id: String },

    /// The cashier already has an open session in this channel.
    #[error("Cashier already has open session {session_id}")]
    AlreadyOpen { session_id: String },

    /// Close requires a declared balance for every cash-controlled account.
    #[error("Missing closing balance for account {account_code}")]
    MissingClosingBalance { account_code: String },

    /// Channel policy requires an opening count before other counts.
    #[error("An opening count is required before recording further counts")]
    OpeningCountRequired,
}

impl SessionError {
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::SessionError
    }
}

/// Errors for reconciliation operations.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ReconciliationError {
    #[error("Reconciliation {reconciliation_id} is already verified")]
    AlreadyVerified { reconciliation_id: String },

    #[error("Range start {range_start} is not before range end {range_end}")]
    InvalidRange {
        range_start: String,
        range_end: String,
    },
}

impl ReconciliationError {
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::ReconciliationError
    }
}

// =============================================================================
// Ledger (fatal invariants)
// =============================================================================

/// Ledger invariant violations.
///
/// These are **not** business results. A violation means the calling code
/// constructed an invalid posting; the enclosing transaction must roll back
/// and a generic internal error surfaces to the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Debits and credits do not balance.
    #[error("Unbalanced journal entry: debits {debit_cents} != credits {credit_cents}")]
    Unbalanced { debit_cents: i64, credit_cents: i64 },

    /// A journal entry must have at least two lines.
    #[error("Journal entry must contain at least two lines")]
    EmptyEntry,

    /// Debit and credit amounts are magnitudes; signs live in the pairing.
    #[error("Negative amount on account {account_code}")]
    NegativeAmount { account_code: String },

    /// Posting dated inside a closed accounting period.
    #[error("Accounting period containing {posted_at} is closed")]
    PeriodClosed { posted_at: String },
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ModifyOrderError::InsufficientStock {
            product_variant_id: "variant-1".to_string(),
            quantity_available: 3,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for variant variant-1: only 3 available"
        );
        assert_eq!(err.error_code(), ErrorCode::InsufficientStockError);
    }

    #[test]
    fn test_transition_error_flattens_into_unions() {
        let inner = OrderStateTransitionError {
            from_state: OrderState::AddingItems,
            to_state: OrderState::Delivered,
            transition_error: "no path".to_string(),
        };
        let as_cancel: CancelOrderError = inner.clone().into();
        assert_eq!(as_cancel.error_code(), ErrorCode::OrderStateTransitionError);

        let as_settle: SettlePaymentError = inner.into();
        assert_eq!(as_settle.error_code(), ErrorCode::OrderStateTransitionError);
    }

    #[test]
    fn test_error_code_wire_format() {
        let json = serde_json::to_string(&ErrorCode::RefundAmountError).unwrap();
        assert_eq!(json, "\"REFUND_AMOUNT_ERROR\"");
    }

    #[test]
    fn test_ledger_error_is_not_serializable_union_member() {
        // LedgerError is fatal, surfaced as Display text only.
        let err = LedgerError::Unbalanced {
            debit_cents: 100,
            credit_cents: 99,
        };
        assert_eq!(
            err.to_string(),
            "Unbalanced journal entry: debits 100 != credits 99"
        );
    }
}
