//! # Payment & Refund Mutations
//!
//! `addPaymentToOrder`, `settlePayment`, `cancelPayment` and
//! `refundOrder`.
//!
//! Settlement talks to the [`crate::SettlementHandler`] *before* the
//! commit transaction opens: a handler decline becomes a typed business
//! error and the database is only touched to record the decline.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use meridian_core::error::{CancelPaymentError, RefundOrderError, SettlePaymentError};
use meridian_core::ledger::postings;
use meridian_core::order::OrderState;
use meridian_core::payment::{plan_refund, Payment, PaymentState, Refund, RefundOrderInput, RefundState};

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::locks::LockRegistry;

impl Engine {
    /// Records a new payment in `Created` against an order. `amount: None`
    /// means the order's outstanding balance.
    pub async fn add_payment_to_order(
        &self,
        order_id: &str,
        method: impl Into<String>,
        amount_cents: Option<i64>,
    ) -> EngineResult<Payment> {
        let _guard = self.locks.acquire(&LockRegistry::order_key(order_id)).await;

        let order = self
            .db
            .orders()
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", order_id))?;

        let amount = match amount_cents {
            Some(amount) => amount,
            None => {
                let settled = self.db.payments().settled_total_for_order(order_id).await?;
                (order.total_with_tax_cents() - settled).max(0)
            }
        };

        let payment = Payment::new(
            Uuid::new_v4().to_string(),
            order_id,
            method,
            amount,
            Utc::now(),
        );
        self.db.payments().insert(&payment).await?;

        info!(order_id, payment_id = %payment.id, amount_cents = amount, "Payment added");
        Ok(payment)
    }

    /// Records a manual payment taken outside any processor (bank
    /// transfer, store credit note). The payment is created already
    /// `Authorized`; capture still goes through [`Engine::settle_payment`].
    pub async fn add_manual_payment_to_order(
        &self,
        order_id: &str,
        method: impl Into<String>,
        amount_cents: i64,
        transaction_id: Option<String>,
    ) -> EngineResult<Payment> {
        let _guard = self.locks.acquire(&LockRegistry::order_key(order_id)).await;

        self.db
            .orders()
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", order_id))?;

        let mut payment = Payment::new(
            Uuid::new_v4().to_string(),
            order_id,
            method,
            amount_cents,
            Utc::now(),
        );
        // Fresh payment, Created -> Authorized is always legal.
        payment.state = PaymentState::Authorized;
        payment.transaction_id = transaction_id;
        self.db.payments().insert(&payment).await?;

        info!(
            order_id,
            payment_id = %payment.id,
            amount_cents,
            "Manual payment added"
        );
        Ok(payment)
    }

    /// Settles a payment through the settlement handler and posts the
    /// journal entry.
    ///
    /// On success the owning order advances: `PaymentSettled` once settled
    /// payments cover the order total, `PaymentAuthorized` for a partial
    /// capture out of checkout. A handler decline parks the payment in
    /// `Declined` with the handler's message and surfaces as a typed error.
    pub async fn settle_payment(
        &self,
        payment_id: &str,
    ) -> EngineResult<Result<Payment, SettlePaymentError>> {
        let mut payment = self
            .db
            .payments()
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Payment", payment_id))?;

        let _guard = self
            .locks
            .acquire(&LockRegistry::order_key(&payment.order_id))
            .await;
        // Reload under the lock; a concurrent mutation may have advanced it.
        payment = self.db.payments().get_by_id(payment_id).await?;

        let mut order = self.db.orders().get_by_id(&payment.order_id).await?;
        let prior_settled = self
            .db
            .payments()
            .settled_total_for_order(&payment.order_id)
            .await?;

        let outcome = self.settlement.settle(&payment);
        let now = Utc::now();
        if !outcome.success {
            let message = outcome
                .error_message
                .unwrap_or_else(|| "Settlement declined".to_string());
            warn!(payment_id, order_id = %payment.order_id, %message, "Settlement declined");

            if let Err(err) = payment.transition_to(PaymentState::Declined) {
                return Ok(Err(err.into()));
            }
            payment.error_message = Some(message.clone());
            payment.updated_at = now;

            let mut tx = self.db.pool().begin().await?;
            self.db.payments().update_tx(&mut tx, &payment).await?;
            tx.commit().await?;

            return Ok(Err(SettlePaymentError::SettlementFailed {
                payment_error_message: message,
            }));
        }

        if let Err(err) = payment.transition_to(PaymentState::Settled) {
            return Ok(Err(err.into()));
        }
        payment.transaction_id = outcome.transaction_id;
        payment.updated_at = now;

        // Order follow-up: only while the order is still collecting payment.
        let covered = prior_settled + payment.amount_cents >= order.total_with_tax_cents();
        let order_target = match order.state {
            OrderState::ArrangingPayment if covered => Some(OrderState::PaymentSettled),
            OrderState::ArrangingPayment => Some(OrderState::PaymentAuthorized),
            OrderState::PaymentAuthorized if covered => Some(OrderState::PaymentSettled),
            _ => None,
        };
        let mut order_changed = false;
        if let Some(target) = order_target {
            match order.transition_to(target) {
                Ok(changed) => order_changed = changed,
                Err(err) => return Ok(Err(err.into())),
            }
            if order_changed && order.order_placed_at.is_none() {
                order.order_placed_at = Some(now);
            }
            order.updated_at = now;
        }

        let entry = postings::payment_settled(
            Uuid::new_v4().to_string(),
            order.channel_id.clone(),
            &order.id,
            &payment.method,
            payment.amount_cents,
            now,
        )?;

        let mut tx = self.db.pool().begin().await?;
        self.db.payments().update_tx(&mut tx, &payment).await?;
        if order_changed {
            self.db.orders().update_tx(&mut tx, &order).await?;
        }
        self.post_entry(&mut tx, &entry, now).await?;
        tx.commit().await?;

        info!(
            payment_id,
            order_id = %payment.order_id,
            amount_cents = payment.amount_cents,
            order_state = order.state.as_str(),
            "Payment settled"
        );
        Ok(Ok(payment))
    }

    /// Cancels an unsettled payment through the settlement handler.
    pub async fn cancel_payment(
        &self,
        payment_id: &str,
    ) -> EngineResult<Result<Payment, CancelPaymentError>> {
        let mut payment = self
            .db
            .payments()
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Payment", payment_id))?;

        let _guard = self
            .locks
            .acquire(&LockRegistry::order_key(&payment.order_id))
            .await;
        payment = self.db.payments().get_by_id(payment_id).await?;

        if let Err(err) = payment.transition_to(PaymentState::Cancelled) {
            return Ok(Err(err.into()));
        }

        let outcome = self.settlement.cancel(&payment);
        if !outcome.success {
            let message = outcome
                .error_message
                .unwrap_or_else(|| "Cancellation declined".to_string());
            return Ok(Err(CancelPaymentError::CancellationFailed {
                payment_error_message: message,
            }));
        }
        payment.updated_at = Utc::now();

        let mut tx = self.db.pool().begin().await?;
        self.db.payments().update_tx(&mut tx, &payment).await?;
        tx.commit().await?;

        info!(payment_id, order_id = %payment.order_id, "Payment cancelled");
        Ok(Ok(payment))
    }

    /// Refunds against a settled payment.
    ///
    /// The refund is planned and bounded in core, executed through the
    /// settlement handler, and posted to the ledger in the same
    /// transaction as the refund row. A handler decline records the
    /// refund as `Failed`; failed refunds never count against the
    /// refundable maximum.
    pub async fn refund_order(
        &self,
        input: RefundOrderInput,
    ) -> EngineResult<Result<Refund, RefundOrderError>> {
        let payment = self
            .db
            .payments()
            .find_by_id(&input.payment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Payment", &input.payment_id))?;

        let _guard = self
            .locks
            .acquire(&LockRegistry::order_key(&payment.order_id))
            .await;
        let payment = self.db.payments().get_by_id(&input.payment_id).await?;
        let order = self.db.orders().get_by_id(&payment.order_id).await?;
        let existing = self
            .db
            .payments()
            .refunds_for_payment(&payment.id)
            .await?;

        let now = Utc::now();
        let mut refund = match plan_refund(
            &payment,
            &existing,
            &order,
            &input,
            Uuid::new_v4().to_string(),
            now,
        ) {
            Ok(refund) => refund,
            Err(err) => return Ok(Err(err)),
        };

        let outcome = self.settlement.refund(&payment, &refund);
        if !outcome.success {
            let message = outcome
                .error_message
                .unwrap_or_else(|| "Refund declined".to_string());
            warn!(payment_id = %payment.id, %message, "Refund declined");

            // Recorded so the attempt is auditable; Failed refunds do not
            // consume refundable funds.
            refund.state = RefundState::Failed;
            let mut tx = self.db.pool().begin().await?;
            self.db.payments().insert_refund_tx(&mut tx, &refund).await?;
            tx.commit().await?;

            return Err(EngineError::Handler(message));
        }
        refund.state = RefundState::Settled;
        refund.transaction_id = outcome.transaction_id;

        let entry = postings::refund_settled(
            Uuid::new_v4().to_string(),
            order.channel_id.clone(),
            &order.id,
            &payment.method,
            refund.total_cents,
            now,
        )?;

        let mut tx = self.db.pool().begin().await?;
        self.db.payments().insert_refund_tx(&mut tx, &refund).await?;
        self.post_entry(&mut tx, &entry, now).await?;
        tx.commit().await?;

        info!(
            payment_id = %payment.id,
            refund_id = %refund.id,
            total_cents = refund.total_cents,
            "Refund settled"
        );
        Ok(Ok(refund))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
