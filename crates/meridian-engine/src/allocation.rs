//! # Bulk Payment Allocation
//!
//! `allocateBulkPayment`: one incoming amount spread across a customer's
//! outstanding orders.
//!
//! The outstanding set is derived from the books (order totals less
//! settled payments plus settled refunds), allocated greedily in core,
//! and committed as one settled payment row per funded order plus a
//! single multi-leg journal entry.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use meridian_core::allocation::{
    allocate, sort_outstanding, OutstandingOrder, PaymentAllocationInput, PaymentAllocationResult,
};
use meridian_core::ledger::postings;
use meridian_core::payment::{Payment, PaymentState};

use crate::engine::Engine;
use crate::error::EngineResult;
use crate::locks::LockRegistry;

impl Engine {
    /// Allocates `input.payment_amount` across the customer's outstanding
    /// orders.
    ///
    /// With `input.order_ids` set the given sequence is honored (unknown
    /// ids are ignored); otherwise the channel's allocation policy orders
    /// the set. Allocation never fails as a business matter: shortfall and
    /// surplus are reported on the result.
    pub async fn allocate_bulk_payment(
        &self,
        input: PaymentAllocationInput,
        method: impl Into<String>,
    ) -> EngineResult<PaymentAllocationResult> {
        let method = method.into();
        let _guard = self
            .locks
            .acquire(&LockRegistry::customer_key(&input.customer_id))
            .await;

        let mut outstanding = self
            .db
            .orders()
            .outstanding_for_customer(&input.customer_id)
            .await?;

        let sequence: Vec<OutstandingOrder> = match &input.order_ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| outstanding.iter().find(|o| &o.order_id == id).cloned())
                .collect(),
            None => {
                sort_outstanding(&mut outstanding, self.settings.allocation_order);
                outstanding
            }
        };

        let result = allocate(&input.customer_id, input.payment_amount, &sequence);
        if result.orders_paid.is_empty() {
            info!(
                customer_id = %input.customer_id,
                payment_amount_cents = input.payment_amount,
                "Bulk allocation applied nothing"
            );
            return Ok(result);
        }

        let now = Utc::now();
        let applied: Vec<(String, i64)> = result
            .orders_paid
            .iter()
            .map(|o| (o.order_id.clone(), o.amount_applied_cents))
            .collect();
        let entry = postings::bulk_allocation(
            Uuid::new_v4().to_string(),
            self.channel_id.clone(),
            &input.customer_id,
            &method,
            &applied,
            now,
        )?;

        let mut tx = self.db.pool().begin().await?;
        for allocated in &result.orders_paid {
            let mut payment = Payment::new(
                Uuid::new_v4().to_string(),
                allocated.order_id.clone(),
                method.clone(),
                allocated.amount_applied_cents,
                now,
            );
            payment.state = PaymentState::Settled;
            self.db.payments().insert_tx(&mut tx, &payment).await?;
        }
        self.post_entry(&mut tx, &entry, now).await?;
        tx.commit().await?;

        info!(
            customer_id = %input.customer_id,
            payment_amount_cents = input.payment_amount,
            orders_paid = result.orders_paid.len(),
            excess_payment_cents = result.excess_payment_cents,
            remaining_balance_cents = result.remaining_balance_cents,
            "Bulk payment allocated"
        );
        Ok(result)
    }

    /// Allocates an outgoing payment across a supplier's outstanding
    /// purchases.
    ///
    /// Purchases live outside this store, so the caller supplies the
    /// outstanding set; the channel's allocation policy orders it. The
    /// allocation is recorded as one supplier-scoped journal entry
    /// (payables debited per purchase, the settlement account credited
    /// for the total) with no payment rows.
    pub async fn allocate_bulk_supplier_payment(
        &self,
        supplier_id: &str,
        payment_amount: i64,
        mut outstanding: Vec<OutstandingOrder>,
        method: &str,
    ) -> EngineResult<PaymentAllocationResult> {
        sort_outstanding(&mut outstanding, self.settings.allocation_order);
        let result = allocate(supplier_id, payment_amount, &outstanding);
        if result.orders_paid.is_empty() {
            return Ok(result);
        }

        let now = Utc::now();
        let applied: Vec<(String, i64)> = result
            .orders_paid
            .iter()
            .map(|o| (o.order_id.clone(), o.amount_applied_cents))
            .collect();
        let entry = postings::supplier_bulk_allocation(
            Uuid::new_v4().to_string(),
            self.channel_id.clone(),
            supplier_id,
            method,
            &applied,
            now,
        )?;

        let mut tx = self.db.pool().begin().await?;
        self.post_entry(&mut tx, &entry, now).await?;
        tx.commit().await?;

        info!(
            supplier_id,
            payment_amount_cents = payment_amount,
            purchases_paid = result.orders_paid.len(),
            "Bulk supplier payment allocated"
        );
        Ok(result)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    use meridian_core::config::{AllocationOrder, ChannelSettings};
    use meridian_core::ledger::accounts;
    use meridian_core::order::{Order, OrderLine, OrderState};
    use meridian_db::{Database, DbConfig};

    async fn test_engine(settings: ChannelSettings) -> Engine {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        Engine::new(db, settings)
    }

    /// A placed credit order owing `cents`, placed `days_ago` days back.
    async fn seed_credit_order(engine: &Engine, id: &str, cents: i64, days_ago: i64) {
        let now = Utc::now();
        let mut order = Order::new(id, "channel-1", format!("MRD-{id}"), "USD", now);
        order.customer_id = Some("cust-1".to_string());
        order
            .lines
            .push(OrderLine::new(format!("{id}-line-1"), id, "variant-1", 1, cents, 0, now));
        order.recalculate_totals();
        order.order_placed_at = Some(now - Duration::days(days_ago));
        order.state = OrderState::PaymentAuthorized;
        engine.db().orders().insert(&order).await.unwrap();
    }

    fn input(amount: i64) -> PaymentAllocationInput {
        PaymentAllocationInput {
            customer_id: "cust-1".to_string(),
            payment_amount: amount,
            order_ids: None,
        }
    }

    #[tokio::test]
    async fn test_fifo_allocation_settles_oldest_first() {
        let engine = test_engine(ChannelSettings::default()).await;
        seed_credit_order(&engine, "order-old", 1000, 10).await;
        seed_credit_order(&engine, "order-new", 2000, 1).await;

        let result = engine
            .allocate_bulk_payment(input(1500), "cash")
            .await
            .unwrap();

        assert_eq!(result.orders_paid.len(), 2);
        assert_eq!(result.orders_paid[0].order_id, "order-old");
        assert_eq!(result.orders_paid[0].amount_applied_cents, 1000);
        assert!(result.orders_paid[0].fully_paid);
        assert_eq!(result.orders_paid[1].amount_applied_cents, 500);
        assert_eq!(result.remaining_balance_cents, 1500);
        assert_eq!(result.excess_payment_cents, 0);

        // One settled payment row per funded order
        let old_payments = engine
            .db()
            .payments()
            .payments_for_order("order-old")
            .await
            .unwrap();
        assert_eq!(old_payments.len(), 1);
        assert_eq!(old_payments[0].amount_cents, 1000);
        assert_eq!(old_payments[0].state, PaymentState::Settled);

        // The old order no longer appears in the outstanding set
        let outstanding = engine
            .db()
            .orders()
            .outstanding_for_customer("cust-1")
            .await
            .unwrap();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].order_id, "order-new");
        assert_eq!(outstanding[0].outstanding_cents, 1500);
    }

    #[tokio::test]
    async fn test_newest_first_policy() {
        let settings = ChannelSettings::default().allocation_order(AllocationOrder::NewestFirst);
        let engine = test_engine(settings).await;
        seed_credit_order(&engine, "order-old", 1000, 10).await;
        seed_credit_order(&engine, "order-new", 1000, 1).await;

        let result = engine
            .allocate_bulk_payment(input(1000), "cash")
            .await
            .unwrap();
        assert_eq!(result.orders_paid.len(), 1);
        assert_eq!(result.orders_paid[0].order_id, "order-new");
    }

    #[tokio::test]
    async fn test_explicit_order_sequence_wins_over_policy() {
        let engine = test_engine(ChannelSettings::default()).await;
        seed_credit_order(&engine, "order-old", 1000, 10).await;
        seed_credit_order(&engine, "order-new", 1000, 1).await;

        let result = engine
            .allocate_bulk_payment(
                PaymentAllocationInput {
                    customer_id: "cust-1".to_string(),
                    payment_amount: 1000,
                    order_ids: Some(vec!["order-new".to_string(), "order-old".to_string()]),
                },
                "cash",
            )
            .await
            .unwrap();
        assert_eq!(result.orders_paid.len(), 1);
        assert_eq!(result.orders_paid[0].order_id, "order-new");
    }

    #[tokio::test]
    async fn test_allocation_posts_single_multi_leg_entry() {
        let engine = test_engine(ChannelSettings::default()).await;
        seed_credit_order(&engine, "order-a", 1000, 5).await;
        seed_credit_order(&engine, "order-b", 500, 2).await;

        engine
            .allocate_bulk_payment(input(1500), "cash")
            .await
            .unwrap();

        let entries = engine
            .db()
            .ledger()
            .entries_for_scope("customer", "cust-1")
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        // One cash debit leg plus one receivable credit per funded order
        assert_eq!(entries[0].lines.len(), 3);
        let cash_debit: i64 = entries[0]
            .lines
            .iter()
            .filter(|l| l.account_code == accounts::CASH_ON_HAND)
            .map(|l| l.debit_cents)
            .sum();
        assert_eq!(cash_debit, 1500);
        let receivable_credit: i64 = entries[0]
            .lines
            .iter()
            .filter(|l| l.account_code == accounts::ACCOUNTS_RECEIVABLE)
            .map(|l| l.credit_cents)
            .sum();
        assert_eq!(receivable_credit, 1500);
    }

    #[tokio::test]
    async fn test_supplier_allocation_posts_payable_entry() {
        let engine = test_engine(ChannelSettings::default()).await;
        let now = Utc::now();
        let outstanding = vec![
            OutstandingOrder {
                order_id: "purchase-b".to_string(),
                order_code: "PO-B".to_string(),
                placed_at: now - Duration::days(2),
                outstanding_cents: 800,
            },
            OutstandingOrder {
                order_id: "purchase-a".to_string(),
                order_code: "PO-A".to_string(),
                placed_at: now - Duration::days(7),
                outstanding_cents: 1200,
            },
        ];

        let result = engine
            .allocate_bulk_supplier_payment("supp-1", 1500, outstanding, "card")
            .await
            .unwrap();

        // Policy ordering applies: the older purchase is settled first
        assert_eq!(result.orders_paid[0].order_id, "purchase-a");
        assert_eq!(result.orders_paid[0].amount_applied_cents, 1200);
        assert_eq!(result.orders_paid[1].amount_applied_cents, 300);
        assert_eq!(result.remaining_balance_cents, 500);

        let entries = engine
            .db()
            .ledger()
            .entries_for_scope("supplier", "supp-1")
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        let payable_debit: i64 = entries[0]
            .lines
            .iter()
            .filter(|l| l.account_code == accounts::ACCOUNTS_PAYABLE)
            .map(|l| l.debit_cents)
            .sum();
        assert_eq!(payable_debit, 1500);
        // No payment rows are created for supplier allocations
        let payments = engine
            .db()
            .payments()
            .payments_for_order("purchase-a")
            .await
            .unwrap();
        assert!(payments.is_empty());
    }

    #[tokio::test]
    async fn test_nothing_outstanding_writes_nothing() {
        let engine = test_engine(ChannelSettings::default()).await;

        let result = engine
            .allocate_bulk_payment(input(1000), "cash")
            .await
            .unwrap();
        assert!(result.orders_paid.is_empty());
        assert_eq!(result.excess_payment_cents, 1000);

        let entries = engine
            .db()
            .ledger()
            .entries_for_scope("customer", "cust-1")
            .await
            .unwrap();
        assert!(entries.is_empty());
    }
}
