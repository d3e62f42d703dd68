//! # Order Modification
//!
//! `modifyOrder`: amends a placed order as one atomic batch.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  modify_order(input)                                                    │
//! │      │                                                                  │
//! │      ├── resolve reference data (stock, coupons, shipping quotes)       │
//! │      ├── plan_modification (pure, typed errors)                         │
//! │      │                                                                  │
//! │      ├── dry_run ──► return the plan, nothing persisted                 │
//! │      │                                                                  │
//! │      └── settle + persist in ONE transaction:                           │
//! │            price up   → settled payment row + journal entry             │
//! │            price down → settled refund row  + journal entry             │
//! │            no change  → order + modification record only                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use meridian_core::error::ModifyOrderError;
use meridian_core::ledger::postings;
use meridian_core::modification::{
    plan_modification, ModificationPlan, ModificationSettlement, ModifyOrderInput,
};
use meridian_core::payment::{Payment, PaymentState, Refund, RefundState};

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::locks::LockRegistry;

impl Engine {
    /// Applies a modification batch to an order in the `Modifying` state.
    ///
    /// With `dry_run` set the returned plan is computed but nothing is
    /// written. Otherwise the order update, the modification record, its
    /// settlement (payment or refund) and the journal entry commit
    /// together.
    pub async fn modify_order(
        &self,
        input: ModifyOrderInput,
    ) -> EngineResult<Result<ModificationPlan, ModifyOrderError>> {
        let _guard = self
            .locks
            .acquire(&LockRegistry::order_key(&input.order_id))
            .await;

        let order = self
            .db
            .orders()
            .find_by_id(&input.order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Order", &input.order_id))?;

        // The planner skips unknown line ids; reject them up front.
        for adjust in &input.adjust_order_lines {
            if order.line(&adjust.order_line_id).is_none() {
                return Err(EngineError::not_found("OrderLine", &adjust.order_line_id));
            }
        }

        let refs = self.references.resolve(&order, &input);
        let now = Utc::now();
        let mut plan = match plan_modification(&order, &input, &refs, &self.settings, now) {
            Ok(plan) => plan,
            Err(err) => return Ok(Err(err)),
        };

        if input.dry_run {
            info!(
                order_id = %input.order_id,
                price_change_cents = plan.price_change_cents,
                "Modification dry run"
            );
            return Ok(Ok(plan));
        }

        plan.updated_order.updated_at = now;

        match &plan.settlement {
            ModificationSettlement::None => {
                let mut tx = self.db.pool().begin().await?;
                let version = self.db.orders().update_tx(&mut tx, &plan.updated_order).await?;
                self.db
                    .orders()
                    .insert_modification_tx(&mut tx, &plan.modification)
                    .await?;
                tx.commit().await?;
                plan.updated_order.version = version;
            }

            ModificationSettlement::Payment { method, amount_cents } => {
                let mut payment = Payment::new(
                    Uuid::new_v4().to_string(),
                    order.id.clone(),
                    method.clone(),
                    *amount_cents,
                    now,
                );
                let outcome = self.settlement.settle(&payment);
                if !outcome.success {
                    let message = outcome
                        .error_message
                        .unwrap_or_else(|| "Settlement declined".to_string());
                    return Err(EngineError::Handler(message));
                }
                payment.state = PaymentState::Settled;
                payment.transaction_id = outcome.transaction_id;

                let entry = postings::modification_settled(
                    Uuid::new_v4().to_string(),
                    order.channel_id.clone(),
                    &order.id,
                    method,
                    plan.price_change_cents,
                    now,
                )?;

                let mut tx = self.db.pool().begin().await?;
                let version = self.db.orders().update_tx(&mut tx, &plan.updated_order).await?;
                self.db.payments().insert_tx(&mut tx, &payment).await?;
                self.db
                    .orders()
                    .insert_modification_tx(&mut tx, &plan.modification)
                    .await?;
                self.db
                    .orders()
                    .settle_modification_tx(&mut tx, &plan.modification.id, Some(&payment.id), None)
                    .await?;
                self.post_entry(&mut tx, &entry, now).await?;
                tx.commit().await?;

                plan.updated_order.version = version;
                plan.modification.payment_id = Some(payment.id);
                plan.modification.is_settled = true;
            }

            ModificationSettlement::Refund { payment_id, amount_cents } => {
                let target = self
                    .db
                    .payments()
                    .find_by_id(payment_id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("Payment", payment_id))?;

                let mut refund = Refund {
                    id: Uuid::new_v4().to_string(),
                    payment_id: target.id.clone(),
                    state: RefundState::Pending,
                    items_cents: 0,
                    shipping_cents: 0,
                    adjustment_cents: *amount_cents,
                    total_cents: *amount_cents,
                    reason: input.note.clone(),
                    lines: Vec::new(),
                    transaction_id: None,
                    created_at: now,
                };
                let outcome = self.settlement.refund(&target, &refund);
                if !outcome.success {
                    let message = outcome
                        .error_message
                        .unwrap_or_else(|| "Refund declined".to_string());
                    return Err(EngineError::Handler(message));
                }
                refund.state = RefundState::Settled;
                refund.transaction_id = outcome.transaction_id;

                let entry = postings::modification_settled(
                    Uuid::new_v4().to_string(),
                    order.channel_id.clone(),
                    &order.id,
                    &target.method,
                    plan.price_change_cents,
                    now,
                )?;

                let mut tx = self.db.pool().begin().await?;
                let version = self.db.orders().update_tx(&mut tx, &plan.updated_order).await?;
                self.db.payments().insert_refund_tx(&mut tx, &refund).await?;
                self.db
                    .orders()
                    .insert_modification_tx(&mut tx, &plan.modification)
                    .await?;
                self.db
                    .orders()
                    .settle_modification_tx(&mut tx, &plan.modification.id, None, Some(&refund.id))
                    .await?;
                self.post_entry(&mut tx, &entry, now).await?;
                tx.commit().await?;

                plan.updated_order.version = version;
                plan.modification.refund_id = Some(refund.id);
                plan.modification.is_settled = true;
            }
        }

        info!(
            order_id = %input.order_id,
            modification_id = %plan.modification.id,
            price_change_cents = plan.price_change_cents,
            "Order modified"
        );
        Ok(Ok(plan))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use meridian_core::config::ChannelSettings;
    use meridian_core::ledger::accounts;
    use meridian_core::modification::{AddItemInput, ReferenceSnapshot, VariantReference};
    use meridian_core::order::{Order, OrderLine, OrderLineInput, OrderState};
    use meridian_db::{Database, DbConfig};

    use crate::engine::StaticReferenceData;

    fn catalog() -> ReferenceSnapshot {
        ReferenceSnapshot {
            variants: vec![VariantReference {
                product_variant_id: "variant-2".to_string(),
                unit_price_cents: 500,
                tax_rate_bps: 0,
                stock_available: 10,
            }],
            ..Default::default()
        }
    }

    async fn test_engine() -> Engine {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        Engine::new(db, ChannelSettings::default())
            .with_reference_data(Arc::new(StaticReferenceData::new(catalog())))
    }

    /// A placed order of 2 × 500 in the Modifying state.
    async fn seed_modifying_order(engine: &Engine, id: &str) -> Order {
        let now = Utc::now();
        let mut order = Order::new(id, "channel-1", format!("MRD-{id}"), "USD", now);
        order.lines.push(OrderLine::new(
            format!("{id}-line-1"),
            id,
            "variant-1",
            2,
            500,
            0,
            now,
        ));
        order.recalculate_totals();
        order.order_placed_at = Some(now);
        order.state = OrderState::Modifying;
        engine.db().orders().insert(&order).await.unwrap();
        order
    }

    fn add_item_input(order_id: &str) -> ModifyOrderInput {
        ModifyOrderInput {
            order_id: order_id.to_string(),
            add_items: vec![AddItemInput {
                product_variant_id: "variant-2".to_string(),
                quantity: 1,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_price_increase_without_payment_method_rejected() {
        let engine = test_engine().await;
        seed_modifying_order(&engine, "order-1").await;

        let err = engine
            .modify_order(add_item_input("order-1"))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err, ModifyOrderError::PaymentMethodMissing);
    }

    #[tokio::test]
    async fn test_price_increase_settles_payment_and_posts() {
        let engine = test_engine().await;
        seed_modifying_order(&engine, "order-1").await;

        let mut input = add_item_input("order-1");
        input.payment_method = Some("cash".to_string());
        let plan = engine.modify_order(input).await.unwrap().unwrap();
        assert_eq!(plan.price_change_cents, 500);
        assert!(plan.modification.is_settled);
        assert!(plan.modification.payment_id.is_some());

        let order = engine.db().orders().get_by_id("order-1").await.unwrap();
        assert_eq!(order.sub_total_cents, 1500);
        assert_eq!(order.lines.len(), 2);
        assert_eq!(order.version, 1);

        let payments = engine
            .db()
            .payments()
            .payments_for_order("order-1")
            .await
            .unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].amount_cents, 500);
        assert_eq!(payments[0].state, PaymentState::Settled);

        let entries = engine
            .db()
            .ledger()
            .entries_for_scope("order", "order-1")
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        let cash_debit: i64 = entries[0]
            .lines
            .iter()
            .filter(|l| l.account_code == accounts::CASH_ON_HAND)
            .map(|l| l.debit_cents)
            .sum();
        assert_eq!(cash_debit, 500);

        let mods = engine
            .db()
            .orders()
            .modifications_for_order("order-1")
            .await
            .unwrap();
        assert_eq!(mods.len(), 1);
        assert!(mods[0].is_settled);
    }

    #[tokio::test]
    async fn test_dry_run_persists_nothing() {
        let engine = test_engine().await;
        seed_modifying_order(&engine, "order-1").await;

        let mut input = add_item_input("order-1");
        input.dry_run = true;
        input.payment_method = Some("cash".to_string());
        let plan = engine.modify_order(input).await.unwrap().unwrap();
        assert_eq!(plan.price_change_cents, 500);

        let order = engine.db().orders().get_by_id("order-1").await.unwrap();
        assert_eq!(order.sub_total_cents, 1000);
        assert_eq!(order.version, 0);
        assert!(engine
            .db()
            .orders()
            .modifications_for_order("order-1")
            .await
            .unwrap()
            .is_empty());
        assert!(engine
            .db()
            .payments()
            .payments_for_order("order-1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_price_decrease_refunds_against_payment() {
        let engine = test_engine().await;
        seed_modifying_order(&engine, "order-1").await;

        // The original settled payment the refund targets
        let mut payment = Payment::new("pay-1", "order-1", "cash", 1000, Utc::now());
        payment.state = PaymentState::Settled;
        engine.db().payments().insert(&payment).await.unwrap();

        let input = ModifyOrderInput {
            order_id: "order-1".to_string(),
            adjust_order_lines: vec![OrderLineInput {
                order_line_id: "order-1-line-1".to_string(),
                quantity: 1,
            }],
            refund_payment_id: Some("pay-1".to_string()),
            note: Some("Customer removed one unit".to_string()),
            ..Default::default()
        };
        let plan = engine.modify_order(input).await.unwrap().unwrap();
        assert_eq!(plan.price_change_cents, -500);
        assert!(plan.modification.refund_id.is_some());

        let refunds = engine
            .db()
            .payments()
            .refunds_for_payment("pay-1")
            .await
            .unwrap();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].total_cents, 500);
        assert_eq!(refunds[0].state, RefundState::Settled);

        let order = engine.db().orders().get_by_id("order-1").await.unwrap();
        assert_eq!(order.sub_total_cents, 500);
        assert_eq!(order.lines[0].quantity, 1);
    }

    #[tokio::test]
    async fn test_unknown_adjust_line_rejected() {
        let engine = test_engine().await;
        seed_modifying_order(&engine, "order-1").await;

        let input = ModifyOrderInput {
            order_id: "order-1".to_string(),
            adjust_order_lines: vec![OrderLineInput {
                order_line_id: "ghost-line".to_string(),
                quantity: 1,
            }],
            ..Default::default()
        };
        let err = engine.modify_order(input).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_wrong_state_rejected() {
        let engine = test_engine().await;
        let now = Utc::now();
        let mut order = Order::new("order-1", "channel-1", "MRD-order-1", "USD", now);
        order.lines.push(OrderLine::new(
            "order-1-line-1",
            "order-1",
            "variant-1",
            1,
            500,
            0,
            now,
        ));
        order.recalculate_totals();
        order.state = OrderState::PaymentSettled;
        engine.db().orders().insert(&order).await.unwrap();

        let err = engine
            .modify_order(add_item_input("order-1"))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(
            err,
            ModifyOrderError::OrderModificationState {
                order_state: OrderState::PaymentSettled
            }
        );
    }
}
