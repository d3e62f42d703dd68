//! # Order Mutations
//!
//! `transitionOrderToState`, `cancelOrder`, `reverseOrder` and
//! `addFulfillmentToOrder`.
//!
//! All planning is pure and lives in meridian-core; this module acquires
//! the order lock, loads, plans, and commits the outcome in one
//! transaction.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use meridian_core::error::{AddFulfillmentError, CancelOrderError, OrderStateTransitionError};
use meridian_core::order::{Fulfillment, Order, OrderLineInput, OrderState};

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::locks::LockRegistry;

/// Outcome of `transitionOrderToState`.
#[derive(Debug, Clone)]
pub struct OrderTransition {
    pub order: Order,
    /// False when the target equalled the current state (no-op success).
    pub changed: bool,
}

/// Outcome of `reverseOrder`.
#[derive(Debug, Clone)]
pub struct OrderReversal {
    pub order: Order,
    /// Whether any payments had been taken on the order. The caller uses
    /// this to decide whether refunds must follow.
    pub had_payments: bool,
    /// Ids of the mirror journal entries posted.
    pub reversal_entry_ids: Vec<String>,
}

/// States in which an order is still a cart being assembled.
fn is_active_phase(state: OrderState) -> bool {
    matches!(
        state,
        OrderState::AddingItems | OrderState::ArrangingPayment
    )
}

impl Engine {
    /// Attempts an explicit order-state transition.
    ///
    /// Transitioning to the current state is a no-op success. Leaving the
    /// active phase stamps `order_placed_at` (once, never cleared).
    pub async fn transition_order_to_state(
        &self,
        order_id: &str,
        target: OrderState,
    ) -> EngineResult<Result<OrderTransition, OrderStateTransitionError>> {
        let _guard = self.locks.acquire(&LockRegistry::order_key(order_id)).await;

        let mut order = self
            .db
            .orders()
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", order_id))?;

        let changed = match order.transition_to(target) {
            Ok(changed) => changed,
            Err(err) => return Ok(Err(err)),
        };
        if !changed {
            return Ok(Ok(OrderTransition { order, changed: false }));
        }

        let now = Utc::now();
        if order.order_placed_at.is_none() && !is_active_phase(order.state) {
            order.order_placed_at = Some(now);
        }
        order.updated_at = now;

        let mut tx = self.db.pool().begin().await?;
        let new_version = self.db.orders().update_tx(&mut tx, &order).await?;
        tx.commit().await?;
        order.version = new_version;

        info!(order_id, to_state = target.as_str(), "Order transitioned");
        Ok(Ok(OrderTransition { order, changed: true }))
    }

    /// Cancels an order, wholly or per line.
    ///
    /// `lines: None` cancels everything still active; an explicit empty
    /// selection is rejected. The order transitions to `Cancelled` only
    /// when the cancellation covers every active unit.
    pub async fn cancel_order(
        &self,
        order_id: &str,
        lines: Option<Vec<OrderLineInput>>,
    ) -> EngineResult<Result<Order, CancelOrderError>> {
        let _guard = self.locks.acquire(&LockRegistry::order_key(order_id)).await;

        let mut order = self
            .db
            .orders()
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", order_id))?;

        let plan = match order.plan_cancellation(lines.as_deref()) {
            Ok(plan) => plan,
            Err(err) => return Ok(Err(err)),
        };

        for input in &plan.lines {
            if let Some(line) = order.lines.iter_mut().find(|l| l.id == input.order_line_id) {
                line.cancelled_quantity += input.quantity;
            }
        }
        if plan.cancels_whole_order {
            if let Err(err) = order.transition_to(OrderState::Cancelled) {
                return Ok(Err(err.into()));
            }
        }
        order.updated_at = Utc::now();

        let mut tx = self.db.pool().begin().await?;
        let new_version = self.db.orders().update_tx(&mut tx, &order).await?;
        tx.commit().await?;
        order.version = new_version;

        info!(
            order_id,
            whole_order = plan.cancels_whole_order,
            lines = plan.lines.len(),
            "Order cancellation committed"
        );
        Ok(Ok(order))
    }

    /// Reverses an order: cancels everything still active and posts a
    /// mirror journal entry for every financial entry recorded against it.
    ///
    /// The reversal is an accounting undo, not a refund: money already
    /// captured is flagged via `had_payments` so the caller can follow up
    /// with `refundOrder`.
    pub async fn reverse_order(
        &self,
        order_id: &str,
    ) -> EngineResult<Result<OrderReversal, CancelOrderError>> {
        let _guard = self.locks.acquire(&LockRegistry::order_key(order_id)).await;

        let mut order = self
            .db
            .orders()
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", order_id))?;

        let plan = match order.plan_cancellation(None) {
            Ok(plan) => plan,
            Err(err) => return Ok(Err(err)),
        };

        let payments = self.db.payments().payments_for_order(order_id).await?;
        let had_payments = !payments.is_empty();

        // Mirror every original financial entry. Reversal entries are
        // skipped so reversing twice cannot double back.
        let entries = self.db.ledger().entries_for_scope("order", order_id).await?;
        let now = Utc::now();
        let mirrors: Vec<_> = entries
            .iter()
            .filter(|e| e.entry_type != meridian_core::ledger::JournalEntryType::OrderReversal)
            .map(|e| e.reversal(Uuid::new_v4().to_string(), now))
            .collect();

        for input in &plan.lines {
            if let Some(line) = order.lines.iter_mut().find(|l| l.id == input.order_line_id) {
                line.cancelled_quantity += input.quantity;
            }
        }
        if let Err(err) = order.transition_to(OrderState::Cancelled) {
            return Ok(Err(err.into()));
        }
        order.updated_at = now;

        let mut tx = self.db.pool().begin().await?;
        let new_version = self.db.orders().update_tx(&mut tx, &order).await?;
        for mirror in &mirrors {
            self.post_entry(&mut tx, mirror, now).await?;
        }
        tx.commit().await?;
        order.version = new_version;

        info!(
            order_id,
            had_payments,
            reversal_entries = mirrors.len(),
            "Order reversed"
        );
        Ok(Ok(OrderReversal {
            order,
            had_payments,
            reversal_entry_ids: mirrors.into_iter().map(|m| m.id).collect(),
        }))
    }

    /// Records a fulfillment and moves the order to `PartiallyShipped` or
    /// `Shipped` depending on coverage.
    pub async fn add_fulfillment_to_order(
        &self,
        order_id: &str,
        method: impl Into<String>,
        tracking_code: Option<String>,
        lines: Vec<OrderLineInput>,
    ) -> EngineResult<Result<Fulfillment, AddFulfillmentError>> {
        let _guard = self.locks.acquire(&LockRegistry::order_key(order_id)).await;

        let mut order = self
            .db
            .orders()
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", order_id))?;

        let plan = match order.plan_fulfillment(&lines) {
            Ok(plan) => plan,
            Err(err) => return Ok(Err(err)),
        };

        for input in &plan.lines {
            if let Some(line) = order.lines.iter_mut().find(|l| l.id == input.order_line_id) {
                line.fulfilled_quantity += input.quantity;
            }
        }
        if let Err(err) = order.transition_to(plan.resulting_state) {
            return Ok(Err(err.into()));
        }
        let now = Utc::now();
        order.updated_at = now;

        let fulfillment = Fulfillment {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            method: method.into(),
            tracking_code,
            lines: plan.lines,
            created_at: now,
        };

        let mut tx = self.db.pool().begin().await?;
        self.db.orders().update_tx(&mut tx, &order).await?;
        self.db
            .orders()
            .insert_fulfillment_tx(&mut tx, &fulfillment)
            .await?;
        tx.commit().await?;

        info!(
            order_id,
            fulfillment_id = %fulfillment.id,
            resulting_state = order.state.as_str(),
            "Fulfillment added"
        );
        Ok(Ok(fulfillment))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::config::ChannelSettings;
    use meridian_core::ledger::postings;
    use meridian_core::order::OrderLine;
    use meridian_db::{Database, DbConfig};

    async fn test_engine() -> Engine {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        Engine::new(db, ChannelSettings::default())
    }

    async fn seed_order(engine: &Engine, id: &str, state: OrderState, placed: bool) -> Order {
        let now = Utc::now();
        let mut order = Order::new(id, "channel-1", format!("MRD-{id}"), "USD", now);
        order.lines.push(OrderLine::new(
            format!("{id}-line-1"),
            id,
            "variant-1",
            2,
            1000,
            0,
            now,
        ));
        order.recalculate_totals();
        order.state = state;
        if placed {
            order.order_placed_at = Some(now);
        }
        engine.db().orders().insert(&order).await.unwrap();
        order
    }

    #[tokio::test]
    async fn test_transition_persists_and_bumps_version() {
        let engine = test_engine().await;
        seed_order(&engine, "order-1", OrderState::AddingItems, false).await;

        let result = engine
            .transition_order_to_state("order-1", OrderState::ArrangingPayment)
            .await
            .unwrap()
            .unwrap();
        assert!(result.changed);
        assert_eq!(result.order.state, OrderState::ArrangingPayment);
        assert_eq!(result.order.version, 1);

        let loaded = engine.db().orders().get_by_id("order-1").await.unwrap();
        assert_eq!(loaded.state, OrderState::ArrangingPayment);
    }

    #[tokio::test]
    async fn test_same_state_is_noop_without_version_bump() {
        let engine = test_engine().await;
        seed_order(&engine, "order-1", OrderState::AddingItems, false).await;

        let result = engine
            .transition_order_to_state("order-1", OrderState::AddingItems)
            .await
            .unwrap()
            .unwrap();
        assert!(!result.changed);
        assert_eq!(result.order.version, 0);
    }

    #[tokio::test]
    async fn test_illegal_transition_is_typed_error() {
        let engine = test_engine().await;
        seed_order(&engine, "order-1", OrderState::AddingItems, false).await;

        let err = engine
            .transition_order_to_state("order-1", OrderState::Delivered)
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.from_state, OrderState::AddingItems);
        assert_eq!(err.to_state, OrderState::Delivered);
    }

    #[tokio::test]
    async fn test_leaving_active_phase_stamps_placed_at() {
        let engine = test_engine().await;
        seed_order(&engine, "order-1", OrderState::ArrangingPayment, false).await;

        let result = engine
            .transition_order_to_state("order-1", OrderState::PaymentSettled)
            .await
            .unwrap()
            .unwrap();
        assert!(result.order.order_placed_at.is_some());

        // Bouncing back into the active phase never clears the stamp
        let loaded = engine.db().orders().get_by_id("order-1").await.unwrap();
        assert!(loaded.order_placed_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_order_is_engine_error() {
        let engine = test_engine().await;
        let err = engine
            .transition_order_to_state("ghost", OrderState::ArrangingPayment)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_cancel_whole_order() {
        let engine = test_engine().await;
        seed_order(&engine, "order-1", OrderState::PaymentSettled, true).await;

        let order = engine.cancel_order("order-1", None).await.unwrap().unwrap();
        assert_eq!(order.state, OrderState::Cancelled);
        assert_eq!(order.lines[0].cancelled_quantity, 2);
    }

    #[tokio::test]
    async fn test_cancel_partial_keeps_state() {
        let engine = test_engine().await;
        seed_order(&engine, "order-1", OrderState::PaymentSettled, true).await;

        let order = engine
            .cancel_order(
                "order-1",
                Some(vec![OrderLineInput {
                    order_line_id: "order-1-line-1".to_string(),
                    quantity: 1,
                }]),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.state, OrderState::PaymentSettled);
        assert_eq!(order.lines[0].cancelled_quantity, 1);
    }

    #[tokio::test]
    async fn test_cancel_unplaced_rejected() {
        let engine = test_engine().await;
        seed_order(&engine, "order-1", OrderState::AddingItems, false).await;

        let err = engine.cancel_order("order-1", None).await.unwrap().unwrap_err();
        assert!(matches!(err, CancelOrderError::CancelActiveOrder { .. }));
    }

    #[tokio::test]
    async fn test_reverse_order_mirrors_ledger_and_flags_payments() {
        let engine = test_engine().await;
        seed_order(&engine, "order-1", OrderState::PaymentSettled, true).await;

        // A settled cash payment and its posting
        let payment = meridian_core::payment::Payment {
            state: meridian_core::payment::PaymentState::Settled,
            ..meridian_core::payment::Payment::new("pay-1", "order-1", "cash", 2000, Utc::now())
        };
        engine.db().payments().insert(&payment).await.unwrap();
        let entry =
            postings::payment_settled("j-1", "channel-1", "order-1", "cash", 2000, Utc::now())
                .unwrap();
        let mut tx = engine.db().pool().begin().await.unwrap();
        engine.db().ledger().insert_entry_tx(&mut tx, &entry).await.unwrap();
        tx.commit().await.unwrap();

        let reversal = engine.reverse_order("order-1").await.unwrap().unwrap();
        assert!(reversal.had_payments);
        assert_eq!(reversal.order.state, OrderState::Cancelled);
        assert_eq!(reversal.reversal_entry_ids.len(), 1);

        // Net cash movement over the order is now zero
        let entries = engine
            .db()
            .ledger()
            .entries_for_scope("order", "order-1")
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        let net: i64 = entries
            .iter()
            .flat_map(|e| e.lines.iter())
            .filter(|l| l.account_code == meridian_core::ledger::accounts::CASH_ON_HAND)
            .map(|l| l.debit_cents - l.credit_cents)
            .sum();
        assert_eq!(net, 0);
    }

    #[tokio::test]
    async fn test_reverse_without_payments() {
        let engine = test_engine().await;
        seed_order(&engine, "order-1", OrderState::PaymentSettled, true).await;

        let reversal = engine.reverse_order("order-1").await.unwrap().unwrap();
        assert!(!reversal.had_payments);
        assert!(reversal.reversal_entry_ids.is_empty());
    }

    #[tokio::test]
    async fn test_fulfillment_full_coverage_ships_order() {
        let engine = test_engine().await;
        seed_order(&engine, "order-1", OrderState::PaymentSettled, true).await;

        let fulfillment = engine
            .add_fulfillment_to_order(
                "order-1",
                "courier",
                Some("TRACK-1".to_string()),
                vec![OrderLineInput {
                    order_line_id: "order-1-line-1".to_string(),
                    quantity: 2,
                }],
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fulfillment.tracking_code.as_deref(), Some("TRACK-1"));

        let loaded = engine.db().orders().get_by_id("order-1").await.unwrap();
        assert_eq!(loaded.state, OrderState::Shipped);
        assert_eq!(loaded.lines[0].fulfilled_quantity, 2);

        let stored = engine
            .db()
            .orders()
            .fulfillments_for_order("order-1")
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_fulfillment_partial_coverage() {
        let engine = test_engine().await;
        seed_order(&engine, "order-1", OrderState::PaymentSettled, true).await;

        engine
            .add_fulfillment_to_order(
                "order-1",
                "courier",
                None,
                vec![OrderLineInput {
                    order_line_id: "order-1-line-1".to_string(),
                    quantity: 1,
                }],
            )
            .await
            .unwrap()
            .unwrap();

        let loaded = engine.db().orders().get_by_id("order-1").await.unwrap();
        assert_eq!(loaded.state, OrderState::PartiallyShipped);
    }

    #[tokio::test]
    async fn test_fulfillment_over_quantity_rejected() {
        let engine = test_engine().await;
        seed_order(&engine, "order-1", OrderState::PaymentSettled, true).await;

        let err = engine
            .add_fulfillment_to_order(
                "order-1",
                "courier",
                None,
                vec![OrderLineInput {
                    order_line_id: "order-1-line-1".to_string(),
                    quantity: 3,
                }],
            )
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(
            err,
            AddFulfillmentError::QuantityTooGreat { requested: 3, maximum: 2, .. }
        ));
    }
}
