//! # Order Repository
//!
//! Persistence for the order aggregate: order rows, their lines, and the
//! fulfillment and modification records that hang off them.
//!
//! ## Aggregate Loading
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  find_by_id("order-1")                                                  │
//! │       │                                                                 │
//! │       ├── SELECT * FROM orders WHERE id = ?                            │
//! │       │       JSON columns → shipping_lines, surcharges, addresses     │
//! │       │                                                                 │
//! │       └── SELECT * FROM order_lines WHERE order_id = ?                 │
//! │               real child rows → Vec<OrderLine>                         │
//! │                                                                         │
//! │  update_tx bumps the version stamp:                                    │
//! │       UPDATE orders SET ..., version = version + 1                     │
//! │       WHERE id = ? AND version = ?     ← 0 rows = StaleVersion         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use meridian_core::allocation::OutstandingOrder;
use meridian_core::modification::{OrderModification, OrderModificationLine};
use meridian_core::order::{
    Address, Fulfillment, Order, OrderLine, OrderLineInput, OrderState, ShippingLine, Surcharge,
};
use meridian_core::payment::{PaymentState, RefundState};

use super::{from_json, parse_enum, to_json};
use crate::error::{DbError, DbResult};

// =============================================================================
// Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: String,
    channel_id: String,
    code: String,
    customer_id: Option<String>,
    state: String,
    currency_code: String,
    shipping_lines: String,
    surcharges: String,
    coupon_codes: String,
    shipping_address: Option<String>,
    billing_address: Option<String>,
    sub_total_cents: i64,
    sub_total_with_tax_cents: i64,
    shipping_cents: i64,
    shipping_with_tax_cents: i64,
    order_placed_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self, lines: Vec<OrderLine>) -> DbResult<Order> {
        let state: OrderState = parse_enum("orders.state", &self.state)?;
        let shipping_lines: Vec<ShippingLine> =
            from_json("orders.shipping_lines", &self.shipping_lines)?;
        let surcharges: Vec<Surcharge> = from_json("orders.surcharges", &self.surcharges)?;
        let coupon_codes: Vec<String> = from_json("orders.coupon_codes", &self.coupon_codes)?;
        let shipping_address: Option<Address> = match &self.shipping_address {
            Some(raw) => Some(from_json("orders.shipping_address", raw)?),
            None => None,
        };
        let billing_address: Option<Address> = match &self.billing_address {
            Some(raw) => Some(from_json("orders.billing_address", raw)?),
            None => None,
        };

        Ok(Order {
            id: self.id,
            channel_id: self.channel_id,
            code: self.code,
            customer_id: self.customer_id,
            state,
            currency_code: self.currency_code,
            lines,
            shipping_lines,
            surcharges,
            coupon_codes,
            shipping_address,
            billing_address,
            sub_total_cents: self.sub_total_cents,
            sub_total_with_tax_cents: self.sub_total_with_tax_cents,
            shipping_cents: self.shipping_cents,
            shipping_with_tax_cents: self.shipping_with_tax_cents,
            order_placed_at: self.order_placed_at,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderLineRow {
    id: String,
    order_id: String,
    product_variant_id: String,
    quantity: i64,
    fulfilled_quantity: i64,
    cancelled_quantity: i64,
    unit_price_cents: i64,
    tax_rate_bps: i64,
    discounted_line_price_cents: i64,
    prorated_line_price_cents: i64,
    created_at: DateTime<Utc>,
}

impl From<OrderLineRow> for OrderLine {
    fn from(row: OrderLineRow) -> Self {
        OrderLine {
            id: row.id,
            order_id: row.order_id,
            product_variant_id: row.product_variant_id,
            quantity: row.quantity,
            fulfilled_quantity: row.fulfilled_quantity,
            cancelled_quantity: row.cancelled_quantity,
            unit_price_cents: row.unit_price_cents,
            tax_rate_bps: row.tax_rate_bps as u32,
            discounted_line_price_cents: row.discounted_line_price_cents,
            prorated_line_price_cents: row.prorated_line_price_cents,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct FulfillmentRow {
    id: String,
    order_id: String,
    method: String,
    tracking_code: Option<String>,
    lines: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ModificationRow {
    id: String,
    order_id: String,
    note: Option<String>,
    price_change_cents: i64,
    is_settled: bool,
    lines: String,
    surcharges: String,
    payment_id: Option<String>,
    refund_id: Option<String>,
    created_at: DateTime<Utc>,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for orders, order lines, fulfillments and modifications.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// Inserts a new order and its lines in one transaction.
    pub async fn insert(&self, order: &Order) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        self.insert_tx(&mut tx, order).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Inserts an order within the caller's transaction.
    pub async fn insert_tx(&self, conn: &mut SqliteConnection, order: &Order) -> DbResult<()> {
        debug!(order_id = %order.id, code = %order.code, "Inserting order");

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, channel_id, code, customer_id, state, currency_code,
                shipping_lines, surcharges, coupon_codes,
                shipping_address, billing_address,
                sub_total_cents, sub_total_with_tax_cents,
                shipping_cents, shipping_with_tax_cents,
                order_placed_at, version, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&order.id)
        .bind(&order.channel_id)
        .bind(&order.code)
        .bind(&order.customer_id)
        .bind(order.state.as_str())
        .bind(&order.currency_code)
        .bind(to_json("orders.shipping_lines", &order.shipping_lines)?)
        .bind(to_json("orders.surcharges", &order.surcharges)?)
        .bind(to_json("orders.coupon_codes", &order.coupon_codes)?)
        .bind(match &order.shipping_address {
            Some(a) => Some(to_json("orders.shipping_address", a)?),
            None => None,
        })
        .bind(match &order.billing_address {
            Some(a) => Some(to_json("orders.billing_address", a)?),
            None => None,
        })
        .bind(order.sub_total_cents)
        .bind(order.sub_total_with_tax_cents)
        .bind(order.shipping_cents)
        .bind(order.shipping_with_tax_cents)
        .bind(order.order_placed_at)
        .bind(order.version)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *conn)
        .await?;

        for line in &order.lines {
            self.insert_line_tx(conn, line).await?;
        }
        Ok(())
    }

    async fn insert_line_tx(&self, conn: &mut SqliteConnection, line: &OrderLine) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO order_lines (
                id, order_id, product_variant_id,
                quantity, fulfilled_quantity, cancelled_quantity,
                unit_price_cents, tax_rate_bps,
                discounted_line_price_cents, prorated_line_price_cents, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&line.id)
        .bind(&line.order_id)
        .bind(&line.product_variant_id)
        .bind(line.quantity)
        .bind(line.fulfilled_quantity)
        .bind(line.cancelled_quantity)
        .bind(line.unit_price_cents)
        .bind(line.tax_rate_bps as i64)
        .bind(line.discounted_line_price_cents)
        .bind(line.prorated_line_price_cents)
        .bind(line.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Loads an order with its lines.
    pub async fn find_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        let row: Option<OrderRow> = sqlx::query_as("SELECT * FROM orders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };

        let line_rows: Vec<OrderLineRow> =
            sqlx::query_as("SELECT * FROM order_lines WHERE order_id = ? ORDER BY created_at, id")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;

        let lines = line_rows.into_iter().map(OrderLine::from).collect();
        row.into_order(lines).map(Some)
    }

    /// Loads an order, failing when it does not exist.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Order> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", id))
    }

    /// Writes back an order's current state under the optimistic version
    /// check, replacing its lines. Returns the new version stamp.
    ///
    /// `order.version` must hold the version that was read; a mismatch
    /// fails with [`DbError::StaleVersion`] and writes nothing.
    pub async fn update_tx(&self, conn: &mut SqliteConnection, order: &Order) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                customer_id = ?, state = ?,
                shipping_lines = ?, surcharges = ?, coupon_codes = ?,
                shipping_address = ?, billing_address = ?,
                sub_total_cents = ?, sub_total_with_tax_cents = ?,
                shipping_cents = ?, shipping_with_tax_cents = ?,
                order_placed_at = ?, updated_at = ?,
                version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&order.customer_id)
        .bind(order.state.as_str())
        .bind(to_json("orders.shipping_lines", &order.shipping_lines)?)
        .bind(to_json("orders.surcharges", &order.surcharges)?)
        .bind(to_json("orders.coupon_codes", &order.coupon_codes)?)
        .bind(match &order.shipping_address {
            Some(a) => Some(to_json("orders.shipping_address", a)?),
            None => None,
        })
        .bind(match &order.billing_address {
            Some(a) => Some(to_json("orders.billing_address", a)?),
            None => None,
        })
        .bind(order.sub_total_cents)
        .bind(order.sub_total_with_tax_cents)
        .bind(order.shipping_cents)
        .bind(order.shipping_with_tax_cents)
        .bind(order.order_placed_at)
        .bind(order.updated_at)
        .bind(&order.id)
        .bind(order.version)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::stale("Order", &order.id));
        }

        // Replace the line set wholesale; modifications may add, adjust
        // or cancel any subset.
        sqlx::query("DELETE FROM order_lines WHERE order_id = ?")
            .bind(&order.id)
            .execute(&mut *conn)
            .await?;
        for line in &order.lines {
            self.insert_line_tx(conn, line).await?;
        }

        Ok(order.version + 1)
    }

    // -------------------------------------------------------------------------
    // Fulfillments
    // -------------------------------------------------------------------------

    pub async fn insert_fulfillment_tx(
        &self,
        conn: &mut SqliteConnection,
        fulfillment: &Fulfillment,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO fulfillments (id, order_id, method, tracking_code, lines, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&fulfillment.id)
        .bind(&fulfillment.order_id)
        .bind(&fulfillment.method)
        .bind(&fulfillment.tracking_code)
        .bind(to_json("fulfillments.lines", &fulfillment.lines)?)
        .bind(fulfillment.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn fulfillments_for_order(&self, order_id: &str) -> DbResult<Vec<Fulfillment>> {
        let rows: Vec<FulfillmentRow> =
            sqlx::query_as("SELECT * FROM fulfillments WHERE order_id = ? ORDER BY created_at")
                .bind(order_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|row| {
                let lines: Vec<OrderLineInput> = from_json("fulfillments.lines", &row.lines)?;
                Ok(Fulfillment {
                    id: row.id,
                    order_id: row.order_id,
                    method: row.method,
                    tracking_code: row.tracking_code,
                    lines,
                    created_at: row.created_at,
                })
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Modifications
    // -------------------------------------------------------------------------

    pub async fn insert_modification_tx(
        &self,
        conn: &mut SqliteConnection,
        modification: &OrderModification,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO order_modifications (
                id, order_id, note, price_change_cents, is_settled,
                lines, surcharges, payment_id, refund_id, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&modification.id)
        .bind(&modification.order_id)
        .bind(&modification.note)
        .bind(modification.price_change_cents)
        .bind(modification.is_settled)
        .bind(to_json("order_modifications.lines", &modification.lines)?)
        .bind(to_json("order_modifications.surcharges", &modification.surcharges)?)
        .bind(&modification.payment_id)
        .bind(&modification.refund_id)
        .bind(modification.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Marks a modification settled and links the payment or refund that
    /// settled it.
    pub async fn settle_modification_tx(
        &self,
        conn: &mut SqliteConnection,
        modification_id: &str,
        payment_id: Option<&str>,
        refund_id: Option<&str>,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE order_modifications SET is_settled = 1, payment_id = ?, refund_id = ? WHERE id = ?",
        )
        .bind(payment_id)
        .bind(refund_id)
        .bind(modification_id)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn modifications_for_order(&self, order_id: &str) -> DbResult<Vec<OrderModification>> {
        let rows: Vec<ModificationRow> = sqlx::query_as(
            "SELECT * FROM order_modifications WHERE order_id = ? ORDER BY created_at",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let lines: Vec<OrderModificationLine> =
                    from_json("order_modifications.lines", &row.lines)?;
                let surcharges: Vec<Surcharge> =
                    from_json("order_modifications.surcharges", &row.surcharges)?;
                Ok(OrderModification {
                    id: row.id,
                    order_id: row.order_id,
                    note: row.note,
                    price_change_cents: row.price_change_cents,
                    is_settled: row.is_settled,
                    lines,
                    surcharges,
                    payment_id: row.payment_id,
                    refund_id: row.refund_id,
                    created_at: row.created_at,
                })
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Outstanding balances (bulk allocation input)
    // -------------------------------------------------------------------------

    /// Placed, uncancelled orders for a customer that still carry an unpaid
    /// balance: `total_with_tax - settled payments + settled refunds > 0`.
    ///
    /// Returned unordered; the allocator sorts by channel policy.
    pub async fn outstanding_for_customer(
        &self,
        customer_id: &str,
    ) -> DbResult<Vec<OutstandingOrder>> {
        #[derive(sqlx::FromRow)]
        struct OutstandingRow {
            order_id: String,
            order_code: String,
            placed_at: DateTime<Utc>,
            outstanding_cents: i64,
        }

        let rows: Vec<OutstandingRow> = sqlx::query_as(
            r#"
            SELECT
                o.id AS order_id,
                o.code AS order_code,
                o.order_placed_at AS placed_at,
                (o.sub_total_with_tax_cents + o.shipping_with_tax_cents)
                    - COALESCE((
                        SELECT SUM(p.amount_cents) FROM payments p
                        WHERE p.order_id = o.id AND p.state = ?
                    ), 0)
                    + COALESCE((
                        SELECT SUM(r.total_cents) FROM refunds r
                        JOIN payments p2 ON r.payment_id = p2.id
                        WHERE p2.order_id = o.id AND r.state = ?
                    ), 0)
                    AS outstanding_cents
            FROM orders o
            WHERE o.customer_id = ?
              AND o.order_placed_at IS NOT NULL
              AND o.state != ?
            "#,
        )
        .bind(PaymentState::Settled.as_str())
        .bind(RefundState::Settled.as_str())
        .bind(customer_id)
        .bind(OrderState::Cancelled.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter(|r| r.outstanding_cents > 0)
            .map(|r| OutstandingOrder {
                order_id: r.order_id,
                order_code: r.order_code,
                placed_at: r.placed_at,
                outstanding_cents: r.outstanding_cents,
            })
            .collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
