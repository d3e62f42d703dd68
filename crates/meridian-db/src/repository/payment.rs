//! # Payment Repository
//!
//! Persistence for payments and the refunds attached to them.
//!
//! Payments are mutable only in the fields a state transition touches
//! (`state`, `transaction_id`, `error_message`, `updated_at`); the amount
//! and method are frozen at creation. Refunds are insert-then-transition:
//! a refund row's breakdown never changes after planning.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use meridian_core::order::OrderLineInput;
use meridian_core::payment::{Payment, PaymentState, Refund, RefundState};

use super::{from_json, parse_enum, to_json};
use crate::error::{DbError, DbResult};

// =============================================================================
// Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: String,
    order_id: String,
    method: String,
    state: String,
    amount_cents: i64,
    transaction_id: Option<String>,
    error_message: Option<String>,
    metadata: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_payment(self) -> DbResult<Payment> {
        let state: PaymentState = parse_enum("payments.state", &self.state)?;
        let metadata: serde_json::Value = from_json("payments.metadata", &self.metadata)?;
        Ok(Payment {
            id: self.id,
            order_id: self.order_id,
            method: self.method,
            state,
            amount_cents: self.amount_cents,
            transaction_id: self.transaction_id,
            error_message: self.error_message,
            metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RefundRow {
    id: String,
    payment_id: String,
    state: String,
    items_cents: i64,
    shipping_cents: i64,
    adjustment_cents: i64,
    total_cents: i64,
    reason: Option<String>,
    lines: String,
    transaction_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl RefundRow {
    fn into_refund(self) -> DbResult<Refund> {
        let state: RefundState = parse_enum("refunds.state", &self.state)?;
        let lines: Vec<OrderLineInput> = from_json("refunds.lines", &self.lines)?;
        Ok(Refund {
            id: self.id,
            payment_id: self.payment_id,
            state,
            items_cents: self.items_cents,
            shipping_cents: self.shipping_cents,
            adjustment_cents: self.adjustment_cents,
            total_cents: self.total_cents,
            reason: self.reason,
            lines,
            transaction_id: self.transaction_id,
            created_at: self.created_at,
        })
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for payments and refunds.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Payments
    // -------------------------------------------------------------------------

    pub async fn insert(&self, payment: &Payment) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        self.insert_tx(&mut tx, payment).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_tx(&self, conn: &mut SqliteConnection, payment: &Payment) -> DbResult<()> {
        debug!(payment_id = %payment.id, order_id = %payment.order_id, "Inserting payment");

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, order_id, method, state, amount_cents,
                transaction_id, error_message, metadata, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.order_id)
        .bind(&payment.method)
        .bind(payment.state.as_str())
        .bind(payment.amount_cents)
        .bind(&payment.transaction_id)
        .bind(&payment.error_message)
        .bind(to_json("payments.metadata", &payment.metadata)?)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> DbResult<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as("SELECT * FROM payments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(PaymentRow::into_payment).transpose()
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Payment> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Payment", id))
    }

    /// Writes back the fields a state transition may touch.
    pub async fn update_tx(&self, conn: &mut SqliteConnection, payment: &Payment) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET state = ?, transaction_id = ?, error_message = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(payment.state.as_str())
        .bind(&payment.transaction_id)
        .bind(&payment.error_message)
        .bind(payment.updated_at)
        .bind(&payment.id)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Payment", &payment.id));
        }
        Ok(())
    }

    /// All payments on an order, oldest first.
    pub async fn payments_for_order(&self, order_id: &str) -> DbResult<Vec<Payment>> {
        let rows: Vec<PaymentRow> =
            sqlx::query_as("SELECT * FROM payments WHERE order_id = ? ORDER BY created_at, id")
                .bind(order_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(PaymentRow::into_payment).collect()
    }

    /// Sum of settled payments on an order, in cents.
    pub async fn settled_total_for_order(&self, order_id: &str) -> DbResult<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM payments WHERE order_id = ? AND state = ?",
        )
        .bind(order_id)
        .bind(PaymentState::Settled.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    // -------------------------------------------------------------------------
    // Refunds
    // -------------------------------------------------------------------------

    pub async fn insert_refund_tx(
        &self,
        conn: &mut SqliteConnection,
        refund: &Refund,
    ) -> DbResult<()> {
        debug!(refund_id = %refund.id, payment_id = %refund.payment_id, "Inserting refund");

        sqlx::query(
            r#"
            INSERT INTO refunds (
                id, payment_id, state,
                items_cents, shipping_cents, adjustment_cents, total_cents,
                reason, lines, transaction_id, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&refund.id)
        .bind(&refund.payment_id)
        .bind(refund.state.as_str())
        .bind(refund.items_cents)
        .bind(refund.shipping_cents)
        .bind(refund.adjustment_cents)
        .bind(refund.total_cents)
        .bind(&refund.reason)
        .bind(to_json("refunds.lines", &refund.lines)?)
        .bind(&refund.transaction_id)
        .bind(refund.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn find_refund_by_id(&self, id: &str) -> DbResult<Option<Refund>> {
        let row: Option<RefundRow> = sqlx::query_as("SELECT * FROM refunds WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(RefundRow::into_refund).transpose()
    }

    /// Writes back a refund's state and processor reference.
    pub async fn update_refund_tx(
        &self,
        conn: &mut SqliteConnection,
        refund: &Refund,
    ) -> DbResult<()> {
        let result = sqlx::query("UPDATE refunds SET state = ?, transaction_id = ? WHERE id = ?")
            .bind(refund.state.as_str())
            .bind(&refund.transaction_id)
            .bind(&refund.id)
            .execute(conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Refund", &refund.id));
        }
        Ok(())
    }

    pub async fn refunds_for_payment(&self, payment_id: &str) -> DbResult<Vec<Refund>> {
        let rows: Vec<RefundRow> =
            sqlx::query_as("SELECT * FROM refunds WHERE payment_id = ? ORDER BY created_at, id")
                .bind(payment_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(RefundRow::into_refund).collect()
    }

    /// All refunds touching an order, across its payments.
    pub async fn refunds_for_order(&self, order_id: &str) -> DbResult<Vec<Refund>> {
        let rows: Vec<RefundRow> = sqlx::query_as(
            r#"
            SELECT r.* FROM refunds r
            JOIN payments p ON r.payment_id = p.id
            WHERE p.order_id = ?
            ORDER BY r.created_at, r.id
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RefundRow::into_refund).collect()
    }

    /// Sum of settled refunds on an order, in cents.
    pub async fn settled_refund_total_for_order(&self, order_id: &str) -> DbResult<i64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(r.total_cents), 0) FROM refunds r
            JOIN payments p ON r.payment_id = p.id
            WHERE p.order_id = ? AND r.state = ?
            "#,
        )
        .bind(order_id)
        .bind(RefundState::Settled.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
