//! # Reconciliation Repository
//!
//! Persistence for reconciliations and accounting periods.
//!
//! Reconciliation rows hold their figures from creation; the only update
//! path is verification sign-off. Periods flip from open to closed once
//! and never reopen.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use meridian_core::cashier::AccountBalance;
use meridian_core::reconciliation::{
    AccountingPeriod, PeriodState, Reconciliation, ReconciliationStatus,
};

use super::{from_json, parse_enum, to_json};
use crate::error::{DbError, DbResult};

// =============================================================================
// Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ReconciliationRow {
    id: String,
    channel_id: String,
    scope: String,
    scope_ref_id: String,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
    expected_balance_cents: i64,
    actual_balance_cents: i64,
    variance_amount_cents: i64,
    status: String,
    declared_amounts: String,
    verified_by_user_id: Option<String>,
    verified_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl ReconciliationRow {
    fn into_reconciliation(self) -> DbResult<Reconciliation> {
        let status: ReconciliationStatus = parse_enum("reconciliations.status", &self.status)?;
        let declared_amounts: Vec<AccountBalance> =
            from_json("reconciliations.declared_amounts", &self.declared_amounts)?;
        Ok(Reconciliation {
            id: self.id,
            channel_id: self.channel_id,
            scope: self.scope,
            scope_ref_id: self.scope_ref_id,
            range_start: self.range_start,
            range_end: self.range_end,
            expected_balance_cents: self.expected_balance_cents,
            actual_balance_cents: self.actual_balance_cents,
            variance_amount_cents: self.variance_amount_cents,
            status,
            declared_amounts,
            verified_by_user_id: self.verified_by_user_id,
            verified_at: self.verified_at,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PeriodRow {
    id: String,
    channel_id: String,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    state: String,
    closed_by_user_id: Option<String>,
    closed_at: Option<DateTime<Utc>>,
}

impl PeriodRow {
    fn into_period(self) -> DbResult<AccountingPeriod> {
        let state: PeriodState = parse_enum("accounting_periods.state", &self.state)?;
        Ok(AccountingPeriod {
            id: self.id,
            channel_id: self.channel_id,
            start_date: self.start_date,
            end_date: self.end_date,
            state,
            closed_by_user_id: self.closed_by_user_id,
            closed_at: self.closed_at,
        })
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for reconciliations and accounting periods.
#[derive(Debug, Clone)]
pub struct ReconciliationRepository {
    pool: SqlitePool,
}

impl ReconciliationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ReconciliationRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Reconciliations
    // -------------------------------------------------------------------------

    pub async fn insert(&self, reconciliation: &Reconciliation) -> DbResult<()> {
        debug!(
            reconciliation_id = %reconciliation.id,
            scope = %reconciliation.scope,
            status = reconciliation.status.as_str(),
            "Inserting reconciliation"
        );

        sqlx::query(
            r#"
            INSERT INTO reconciliations (
                id, channel_id, scope, scope_ref_id,
                range_start, range_end,
                expected_balance_cents, actual_balance_cents, variance_amount_cents,
                status, declared_amounts,
                verified_by_user_id, verified_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&reconciliation.id)
        .bind(&reconciliation.channel_id)
        .bind(&reconciliation.scope)
        .bind(&reconciliation.scope_ref_id)
        .bind(reconciliation.range_start)
        .bind(reconciliation.range_end)
        .bind(reconciliation.expected_balance_cents)
        .bind(reconciliation.actual_balance_cents)
        .bind(reconciliation.variance_amount_cents)
        .bind(reconciliation.status.as_str())
        .bind(to_json("reconciliations.declared_amounts", &reconciliation.declared_amounts)?)
        .bind(&reconciliation.verified_by_user_id)
        .bind(reconciliation.verified_at)
        .bind(reconciliation.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> DbResult<Option<Reconciliation>> {
        let row: Option<ReconciliationRow> =
            sqlx::query_as("SELECT * FROM reconciliations WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(ReconciliationRow::into_reconciliation).transpose()
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Reconciliation> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Reconciliation", id))
    }

    /// Writes back the verification sign-off fields.
    pub async fn update_verification(&self, reconciliation: &Reconciliation) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE reconciliations
            SET status = ?, verified_by_user_id = ?, verified_at = ?
            WHERE id = ?
            "#,
        )
        .bind(reconciliation.status.as_str())
        .bind(&reconciliation.verified_by_user_id)
        .bind(reconciliation.verified_at)
        .bind(&reconciliation.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Reconciliation", &reconciliation.id));
        }
        Ok(())
    }

    /// Reconciliations whose range overlaps `[range_start, range_end]`.
    pub async fn list_overlapping(
        &self,
        channel_id: &str,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> DbResult<Vec<Reconciliation>> {
        let rows: Vec<ReconciliationRow> = sqlx::query_as(
            r#"
            SELECT * FROM reconciliations
            WHERE channel_id = ? AND range_start <= ? AND range_end >= ?
            ORDER BY range_start, id
            "#,
        )
        .bind(channel_id)
        .bind(range_end)
        .bind(range_start)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(ReconciliationRow::into_reconciliation)
            .collect()
    }

    // -------------------------------------------------------------------------
    // Accounting Periods
    // -------------------------------------------------------------------------

    pub async fn insert_period(&self, period: &AccountingPeriod) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounting_periods (
                id, channel_id, start_date, end_date, state, closed_by_user_id, closed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&period.id)
        .bind(&period.channel_id)
        .bind(period.start_date)
        .bind(period.end_date)
        .bind(period.state.as_str())
        .bind(&period.closed_by_user_id)
        .bind(period.closed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_period(&self, id: &str) -> DbResult<Option<AccountingPeriod>> {
        let row: Option<PeriodRow> = sqlx::query_as("SELECT * FROM accounting_periods WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(PeriodRow::into_period).transpose()
    }

    pub async fn get_period(&self, id: &str) -> DbResult<AccountingPeriod> {
        self.find_period(id)
            .await?
            .ok_or_else(|| DbError::not_found("AccountingPeriod", id))
    }

    /// All periods for a channel; the posting guard scans these.
    pub async fn periods_for_channel(&self, channel_id: &str) -> DbResult<Vec<AccountingPeriod>> {
        let rows: Vec<PeriodRow> = sqlx::query_as(
            "SELECT * FROM accounting_periods WHERE channel_id = ? ORDER BY start_date",
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PeriodRow::into_period).collect()
    }

    /// Same lookup on the caller's connection, for the posting guard that
    /// runs inside a write transaction.
    pub async fn periods_for_channel_tx(
        &self,
        conn: &mut SqliteConnection,
        channel_id: &str,
    ) -> DbResult<Vec<AccountingPeriod>> {
        let rows: Vec<PeriodRow> = sqlx::query_as(
            "SELECT * FROM accounting_periods WHERE channel_id = ? ORDER BY start_date",
        )
        .bind(channel_id)
        .fetch_all(conn)
        .await?;
        rows.into_iter().map(PeriodRow::into_period).collect()
    }

    /// Marks a period closed within the caller's transaction.
    pub async fn close_period_tx(
        &self,
        conn: &mut SqliteConnection,
        period: &AccountingPeriod,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE accounting_periods
            SET state = ?, closed_by_user_id = ?, closed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(period.state.as_str())
        .bind(&period.closed_by_user_id)
        .bind(period.closed_at)
        .bind(&period.id)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("AccountingPeriod", &period.id));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::TimeZone;
    use meridian_core::config::ChannelSettings;
    use meridian_core::reconciliation::CreateReconciliationInput;

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    fn sample_rec(id: &str, start_day: u32, end_day: u32) -> Reconciliation {
        Reconciliation::create(
            id,
            CreateReconciliationInput {
                channel_id: "channel-1".to_string(),
                scope: "cashier_session".to_string(),
                scope_ref_id: "sess-1".to_string(),
                range_start: at(start_day),
                range_end: at(end_day),
                declared_amounts: vec![AccountBalance::new("1000", 5000)],
                actual_balance: 5000,
            },
            5050,
            &ChannelSettings::default().variance_threshold(100),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_reconciliation_roundtrip() {
        let db = test_db().await;
        let rec = sample_rec("rec-1", 1, 2);
        db.reconciliations().insert(&rec).await.unwrap();

        let loaded = db.reconciliations().get_by_id("rec-1").await.unwrap();
        assert_eq!(loaded.status, ReconciliationStatus::Pending);
        assert_eq!(loaded.variance_amount_cents, -50);
        assert_eq!(loaded.declared_amounts[0].amount_cents, 5000);
    }

    #[tokio::test]
    async fn test_verification_persists() {
        let db = test_db().await;
        let repo = db.reconciliations();
        let mut rec = sample_rec("rec-1", 1, 2);
        repo.insert(&rec).await.unwrap();

        rec.verify("manager-1", Utc::now()).unwrap();
        repo.update_verification(&rec).await.unwrap();

        let loaded = repo.get_by_id("rec-1").await.unwrap();
        assert_eq!(loaded.status, ReconciliationStatus::Verified);
        assert_eq!(loaded.verified_by_user_id.as_deref(), Some("manager-1"));
        assert!(loaded.verified_at.is_some());
    }

    #[tokio::test]
    async fn test_overlap_query_matches_gate_semantics() {
        let db = test_db().await;
        let repo = db.reconciliations();
        repo.insert(&sample_rec("rec-1", 1, 2)).await.unwrap();
        repo.insert(&sample_rec("rec-2", 9, 12)).await.unwrap(); // straddles the end
        repo.insert(&sample_rec("rec-3", 20, 21)).await.unwrap(); // outside

        let overlapping = repo
            .list_overlapping("channel-1", at(1), at(10))
            .await
            .unwrap();
        let ids: Vec<&str> = overlapping.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["rec-1", "rec-2"]);
    }

    #[tokio::test]
    async fn test_period_close_roundtrip() {
        let db = test_db().await;
        let repo = db.reconciliations();
        let mut period = AccountingPeriod {
            id: "period-1".to_string(),
            channel_id: "channel-1".to_string(),
            start_date: at(1),
            end_date: at(10),
            state: PeriodState::Open,
            closed_by_user_id: None,
            closed_at: None,
        };
        repo.insert_period(&period).await.unwrap();

        period.state = PeriodState::Closed;
        period.closed_by_user_id = Some("manager-1".to_string());
        period.closed_at = Some(at(11));

        let mut tx = db.pool().begin().await.unwrap();
        repo.close_period_tx(&mut tx, &period).await.unwrap();
        tx.commit().await.unwrap();

        let loaded = repo.get_period("period-1").await.unwrap();
        assert_eq!(loaded.state, PeriodState::Closed);
        assert!(loaded.contains(at(5)));
        assert!(!loaded.contains(at(15)));
    }
}
