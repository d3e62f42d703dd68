//! # Reconciliation & Period-End Close
//!
//! `createReconciliation`, `verifyReconciliation` and
//! `closeAccountingPeriod`.
//!
//! The expected balance for a reconciliation is always ledger-derived:
//! the sum of movements on the declared accounts over the range. Closing
//! a period is gated on every overlapping reconciliation being verified;
//! once closed, [`crate::Engine`]'s posting path rejects entries dated
//! inside it.

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use meridian_core::cashier::AccountBalance;
use meridian_core::error::ReconciliationError;
use meridian_core::reconciliation::{
    period_status, AccountingPeriod, CreateReconciliationInput, PeriodEndCloseResult, PeriodState,
    Reconciliation,
};

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};

impl Engine {
    /// Creates a reconciliation for a scope and time range.
    ///
    /// The expected balance is computed from the books as the movement on
    /// each declared account over `[range_start, range_end)`; the caller
    /// supplies only the declared figures. Starts `pending`, or `flagged`
    /// when the variance exceeds the channel threshold.
    pub async fn create_reconciliation(
        &self,
        input: CreateReconciliationInput,
    ) -> EngineResult<Result<Reconciliation, ReconciliationError>> {
        let mut expected_balance = 0i64;
        for declared in &input.declared_amounts {
            expected_balance += self
                .db
                .ledger()
                .account_movement_cents(
                    &input.channel_id,
                    &declared.account_code,
                    input.range_start,
                    Some(input.range_end),
                )
                .await?;
        }

        let reconciliation = match Reconciliation::create(
            Uuid::new_v4().to_string(),
            input,
            expected_balance,
            &self.settings,
            Utc::now(),
        ) {
            Ok(reconciliation) => reconciliation,
            Err(err) => return Ok(Err(err)),
        };
        self.db.reconciliations().insert(&reconciliation).await?;

        info!(
            reconciliation_id = %reconciliation.id,
            scope = %reconciliation.scope,
            status = reconciliation.status.as_str(),
            variance_amount_cents = reconciliation.variance_amount_cents,
            "Reconciliation created"
        );
        Ok(Ok(reconciliation))
    }

    /// Creates a reconciliation scoped to a cashier session, ranging from
    /// the session's open to its close (or to now while it is still
    /// open). Delegates to [`Engine::create_reconciliation`].
    pub async fn create_cashier_session_reconciliation(
        &self,
        session_id: &str,
        declared_amounts: Vec<AccountBalance>,
        actual_balance: i64,
    ) -> EngineResult<Result<Reconciliation, ReconciliationError>> {
        let session = self
            .db
            .cashier()
            .find_session(session_id)
            .await?
            .ok_or_else(|| EngineError::not_found("CashierSession", session_id))?;

        self.create_reconciliation(CreateReconciliationInput {
            channel_id: session.channel_id.clone(),
            scope: "cashier_session".to_string(),
            scope_ref_id: session.id.clone(),
            range_start: session.opened_at,
            range_end: session.closed_at.unwrap_or_else(Utc::now),
            declared_amounts,
            actual_balance,
        })
        .await
    }

    /// Human sign-off on a reconciliation. The recorded figures stand;
    /// nothing is recomputed.
    pub async fn verify_reconciliation(
        &self,
        reconciliation_id: &str,
        verifier_user_id: &str,
    ) -> EngineResult<Result<Reconciliation, ReconciliationError>> {
        let mut reconciliation = self
            .db
            .reconciliations()
            .find_by_id(reconciliation_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Reconciliation", reconciliation_id))?;

        if let Err(err) = reconciliation.verify(verifier_user_id, Utc::now()) {
            return Ok(Err(err));
        }
        self.db
            .reconciliations()
            .update_verification(&reconciliation)
            .await?;

        info!(
            reconciliation_id,
            verifier = verifier_user_id,
            "Reconciliation verified"
        );
        Ok(Ok(reconciliation))
    }

    /// Opens an accounting period for the engine's channel.
    pub async fn open_accounting_period(
        &self,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> EngineResult<AccountingPeriod> {
        let period = AccountingPeriod {
            id: Uuid::new_v4().to_string(),
            channel_id: self.channel_id.clone(),
            start_date,
            end_date,
            state: PeriodState::Open,
            closed_by_user_id: None,
            closed_at: None,
        };
        self.db.reconciliations().insert_period(&period).await?;
        Ok(period)
    }

    /// Attempts the period-end close.
    ///
    /// Succeeds only when every reconciliation overlapping the period is
    /// verified; otherwise reports the blockers without erroring. Closing
    /// an already-closed period is an idempotent success.
    pub async fn close_accounting_period(
        &self,
        period_id: &str,
        closed_by_user_id: &str,
    ) -> EngineResult<PeriodEndCloseResult> {
        let mut period = self
            .db
            .reconciliations()
            .find_period(period_id)
            .await?
            .ok_or_else(|| EngineError::not_found("AccountingPeriod", period_id))?;

        let overlapping = self
            .db
            .reconciliations()
            .list_overlapping(&period.channel_id, period.start_date, period.end_date)
            .await?;
        let summary = period_status(&overlapping, period.start_date, period.end_date);

        if period.state == PeriodState::Closed {
            return Ok(PeriodEndCloseResult {
                success: true,
                period: Some(period),
                reconciliation_summary: summary,
            });
        }

        if !summary.is_complete() {
            info!(
                period_id,
                missing = summary.missing_reconciliations.len(),
                "Period close blocked by unverified reconciliations"
            );
            return Ok(PeriodEndCloseResult {
                success: false,
                period: None,
                reconciliation_summary: summary,
            });
        }

        period.state = PeriodState::Closed;
        period.closed_by_user_id = Some(closed_by_user_id.to_string());
        period.closed_at = Some(Utc::now());

        let mut tx = self.db.pool().begin().await?;
        self.db
            .reconciliations()
            .close_period_tx(&mut tx, &period)
            .await?;
        tx.commit().await?;

        info!(
            period_id,
            closed_by = closed_by_user_id,
            verified = summary.verified_reconciliations,
            "Accounting period closed"
        );
        Ok(PeriodEndCloseResult {
            success: true,
            period: Some(period),
            reconciliation_summary: summary,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
