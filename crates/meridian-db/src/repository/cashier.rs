//! # Cashier Repository
//!
//! Persistence for cashier sessions and drawer counts.
//!
//! Sessions are updated exactly once, at close. Count rows are immutable
//! in their amounts; only the annotation fields (`variance_reason` and the
//! review trio) may be written after insert.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use meridian_core::cashier::{
    AccountBalance, CashDrawerCount, CashierSession, CashierSessionStatus, CountType,
};

use super::{from_json, parse_enum, to_json};
use crate::error::{DbError, DbResult};

// =============================================================================
// Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    channel_id: String,
    cashier_user_id: String,
    status: String,
    opening_balances: String,
    closing_declared: Option<String>,
    notes: Option<String>,
    opened_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl SessionRow {
    fn into_session(self) -> DbResult<CashierSession> {
        let status: CashierSessionStatus = parse_enum("cashier_sessions.status", &self.status)?;
        let opening_balances: Vec<AccountBalance> =
            from_json("cashier_sessions.opening_balances", &self.opening_balances)?;
        let closing_declared: Option<Vec<AccountBalance>> = match &self.closing_declared {
            Some(raw) => Some(from_json("cashier_sessions.closing_declared", raw)?),
            None => None,
        };
        Ok(CashierSession {
            id: self.id,
            channel_id: self.channel_id,
            cashier_user_id: self.cashier_user_id,
            status,
            opening_balances,
            closing_declared,
            notes: self.notes,
            opened_at: self.opened_at,
            closed_at: self.closed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CountRow {
    id: String,
    session_id: String,
    count_type: String,
    declared_cash_cents: i64,
    expected_cash_cents: i64,
    variance_cents: i64,
    variance_reason: Option<String>,
    reviewed_by_user_id: Option<String>,
    reviewed_at: Option<DateTime<Utc>>,
    review_notes: Option<String>,
    counted_at: DateTime<Utc>,
}

impl CountRow {
    fn into_count(self) -> DbResult<CashDrawerCount> {
        let count_type: CountType = parse_enum("cash_counts.count_type", &self.count_type)?;
        Ok(CashDrawerCount {
            id: self.id,
            session_id: self.session_id,
            count_type,
            declared_cash_cents: self.declared_cash_cents,
            expected_cash_cents: self.expected_cash_cents,
            variance_cents: self.variance_cents,
            variance_reason: self.variance_reason,
            reviewed_by_user_id: self.reviewed_by_user_id,
            reviewed_at: self.reviewed_at,
            review_notes: self.review_notes,
            counted_at: self.counted_at,
        })
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for cashier sessions and cash counts.
#[derive(Debug, Clone)]
pub struct CashierRepository {
    pool: SqlitePool,
}

impl CashierRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CashierRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------

    pub async fn insert_session(&self, session: &CashierSession) -> DbResult<()> {
        debug!(session_id = %session.id, cashier = %session.cashier_user_id, "Opening session");

        sqlx::query(
            r#"
            INSERT INTO cashier_sessions (
                id, channel_id, cashier_user_id, status,
                opening_balances, closing_declared, notes, opened_at, closed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.channel_id)
        .bind(&session.cashier_user_id)
        .bind(session.status.as_str())
        .bind(to_json("cashier_sessions.opening_balances", &session.opening_balances)?)
        .bind(match &session.closing_declared {
            Some(declared) => Some(to_json("cashier_sessions.closing_declared", declared)?),
            None => None,
        })
        .bind(&session.notes)
        .bind(session.opened_at)
        .bind(session.closed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_session(&self, id: &str) -> DbResult<Option<CashierSession>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM cashier_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(SessionRow::into_session).transpose()
    }

    pub async fn get_session(&self, id: &str) -> DbResult<CashierSession> {
        self.find_session(id)
            .await?
            .ok_or_else(|| DbError::not_found("CashierSession", id))
    }

    /// The currently open session for a cashier in a channel, if any.
    pub async fn open_session_for_cashier(
        &self,
        channel_id: &str,
        cashier_user_id: &str,
    ) -> DbResult<Option<CashierSession>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT * FROM cashier_sessions
            WHERE channel_id = ? AND cashier_user_id = ? AND status = ?
            ORDER BY opened_at DESC
            LIMIT 1
            "#,
        )
        .bind(channel_id)
        .bind(cashier_user_id)
        .bind(CashierSessionStatus::Open.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(SessionRow::into_session).transpose()
    }

    /// Writes back the fields a close touches.
    pub async fn update_session_tx(
        &self,
        conn: &mut SqliteConnection,
        session: &CashierSession,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE cashier_sessions
            SET status = ?, closing_declared = ?, notes = ?, closed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(session.status.as_str())
        .bind(match &session.closing_declared {
            Some(declared) => Some(to_json("cashier_sessions.closing_declared", declared)?),
            None => None,
        })
        .bind(&session.notes)
        .bind(session.closed_at)
        .bind(&session.id)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("CashierSession", &session.id));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Counts
    // -------------------------------------------------------------------------

    pub async fn insert_count(&self, count: &CashDrawerCount) -> DbResult<()> {
        debug!(
            count_id = %count.id,
            session_id = %count.session_id,
            count_type = count.count_type.as_str(),
            "Recording cash count"
        );

        sqlx::query(
            r#"
            INSERT INTO cash_counts (
                id, session_id, count_type,
                declared_cash_cents, expected_cash_cents, variance_cents,
                variance_reason, reviewed_by_user_id, reviewed_at, review_notes, counted_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&count.id)
        .bind(&count.session_id)
        .bind(count.count_type.as_str())
        .bind(count.declared_cash_cents)
        .bind(count.expected_cash_cents)
        .bind(count.variance_cents)
        .bind(&count.variance_reason)
        .bind(&count.reviewed_by_user_id)
        .bind(count.reviewed_at)
        .bind(&count.review_notes)
        .bind(count.counted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_count(&self, id: &str) -> DbResult<Option<CashDrawerCount>> {
        let row: Option<CountRow> = sqlx::query_as("SELECT * FROM cash_counts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(CountRow::into_count).transpose()
    }

    pub async fn get_count(&self, id: &str) -> DbResult<CashDrawerCount> {
        self.find_count(id)
            .await?
            .ok_or_else(|| DbError::not_found("CashDrawerCount", id))
    }

    pub async fn counts_for_session(&self, session_id: &str) -> DbResult<Vec<CashDrawerCount>> {
        let rows: Vec<CountRow> =
            sqlx::query_as("SELECT * FROM cash_counts WHERE session_id = ? ORDER BY counted_at, id")
                .bind(session_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(CountRow::into_count).collect()
    }

    /// Writes back the annotation fields. The amounts never change.
    pub async fn update_count_annotations(&self, count: &CashDrawerCount) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE cash_counts
            SET variance_reason = ?, reviewed_by_user_id = ?, reviewed_at = ?, review_notes = ?
            WHERE id = ?
            "#,
        )
        .bind(&count.variance_reason)
        .bind(&count.reviewed_by_user_id)
        .bind(count.reviewed_at)
        .bind(&count.review_notes)
        .bind(&count.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("CashDrawerCount", &count.id));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
