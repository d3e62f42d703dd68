//! # Ledger Repository
//!
//! Persistence for the append-only journal. Entries are inserted and read;
//! there is deliberately no update or delete path. Corrections go in as
//! new reversing entries.
//!
//! ## Balance Queries
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  account_movement_cents("1000", from, to)                               │
//! │                                                                         │
//! │  SELECT SUM(l.debit_cents - l.credit_cents)                            │
//! │  FROM journal_lines l JOIN journal_entries e ON l.entry_id = e.id      │
//! │  WHERE e.channel_id = ? AND l.account_code = ?                         │
//! │    AND e.posted_at >= from [AND e.posted_at < to]                      │
//! │                                                                         │
//! │  Asset accounts (1000, 1010, 1100) carry debit-positive balances:      │
//! │  a positive movement means money flowed IN over the window.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use meridian_core::ledger::{JournalEntry, JournalEntryType, JournalLine};

use super::parse_enum;
use crate::error::DbResult;

// =============================================================================
// Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: String,
    channel_id: String,
    entry_type: String,
    scope: String,
    scope_ref_id: String,
    description: String,
    posted_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct LineRow {
    entry_id: String,
    account_code: String,
    debit_cents: i64,
    credit_cents: i64,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for journal entries and account-balance aggregation.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LedgerRepository { pool }
    }

    /// Appends a journal entry and its lines within the caller's
    /// transaction. The entry was balance-checked at construction.
    pub async fn insert_entry_tx(
        &self,
        conn: &mut SqliteConnection,
        entry: &JournalEntry,
    ) -> DbResult<()> {
        debug!(
            entry_id = %entry.id,
            entry_type = entry.entry_type.as_str(),
            total_cents = entry.total_cents(),
            "Posting journal entry"
        );

        sqlx::query(
            r#"
            INSERT INTO journal_entries (
                id, channel_id, entry_type, scope, scope_ref_id, description, posted_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.channel_id)
        .bind(entry.entry_type.as_str())
        .bind(&entry.scope)
        .bind(&entry.scope_ref_id)
        .bind(&entry.description)
        .bind(entry.posted_at)
        .execute(&mut *conn)
        .await?;

        for line in &entry.lines {
            sqlx::query(
                r#"
                INSERT INTO journal_lines (entry_id, account_code, debit_cents, credit_cents)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&entry.id)
            .bind(&line.account_code)
            .bind(line.debit_cents)
            .bind(line.credit_cents)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// All entries attached to one scope reference, oldest first.
    pub async fn entries_for_scope(
        &self,
        scope: &str,
        scope_ref_id: &str,
    ) -> DbResult<Vec<JournalEntry>> {
        let entry_rows: Vec<EntryRow> = sqlx::query_as(
            r#"
            SELECT * FROM journal_entries
            WHERE scope = ? AND scope_ref_id = ?
            ORDER BY posted_at, id
            "#,
        )
        .bind(scope)
        .bind(scope_ref_id)
        .fetch_all(&self.pool)
        .await?;

        self.attach_lines(entry_rows).await
    }

    async fn attach_lines(&self, entry_rows: Vec<EntryRow>) -> DbResult<Vec<JournalEntry>> {
        let mut entries = Vec::with_capacity(entry_rows.len());
        for row in entry_rows {
            let line_rows: Vec<LineRow> = sqlx::query_as(
                "SELECT entry_id, account_code, debit_cents, credit_cents
                 FROM journal_lines WHERE entry_id = ? ORDER BY id",
            )
            .bind(&row.id)
            .fetch_all(&self.pool)
            .await?;

            let entry_type: JournalEntryType =
                parse_enum("journal_entries.entry_type", &row.entry_type)?;
            entries.push(JournalEntry {
                id: row.id,
                channel_id: row.channel_id,
                entry_type,
                scope: row.scope,
                scope_ref_id: row.scope_ref_id,
                description: row.description,
                lines: line_rows
                    .into_iter()
                    .map(|l| JournalLine {
                        account_code: l.account_code,
                        debit_cents: l.debit_cents,
                        credit_cents: l.credit_cents,
                    })
                    .collect(),
                posted_at: row.posted_at,
            });
        }
        Ok(entries)
    }

    /// Net movement of one account over a window: `sum(debit - credit)`.
    ///
    /// `until` is exclusive when given; an open end takes everything
    /// posted since `since`.
    pub async fn account_movement_cents(
        &self,
        channel_id: &str,
        account_code: &str,
        since: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> DbResult<i64> {
        let movement: i64 = match until {
            Some(until) => {
                sqlx::query_scalar(
                    r#"
                    SELECT COALESCE(SUM(l.debit_cents - l.credit_cents), 0)
                    FROM journal_lines l
                    JOIN journal_entries e ON l.entry_id = e.id
                    WHERE e.channel_id = ? AND l.account_code = ?
                      AND e.posted_at >= ? AND e.posted_at < ?
                    "#,
                )
                .bind(channel_id)
                .bind(account_code)
                .bind(since)
                .bind(until)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    r#"
                    SELECT COALESCE(SUM(l.debit_cents - l.credit_cents), 0)
                    FROM journal_lines l
                    JOIN journal_entries e ON l.entry_id = e.id
                    WHERE e.channel_id = ? AND l.account_code = ?
                      AND e.posted_at >= ?
                    "#,
                )
                .bind(channel_id)
                .bind(account_code)
                .bind(since)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(movement)
    }

    /// Net movement per account over a window, for reconciliation of a
    /// whole range in one pass. Accounts with no postings are absent.
    pub async fn movement_per_account(
        &self,
        channel_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> DbResult<Vec<(String, i64)>> {
        #[derive(sqlx::FromRow)]
        struct MovementRow {
            account_code: String,
            movement_cents: i64,
        }

        let rows: Vec<MovementRow> = sqlx::query_as(
            r#"
            SELECT l.account_code AS account_code,
                   COALESCE(SUM(l.debit_cents - l.credit_cents), 0) AS movement_cents
            FROM journal_lines l
            JOIN journal_entries e ON l.entry_id = e.id
            WHERE e.channel_id = ? AND e.posted_at >= ? AND e.posted_at < ?
            GROUP BY l.account_code
            ORDER BY l.account_code
            "#,
        )
        .bind(channel_id)
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| (r.account_code, r.movement_cents)).collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
