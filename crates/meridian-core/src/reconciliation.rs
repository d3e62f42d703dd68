//! # Reconciliation & Accounting Periods
//!
//! Declared-vs-expected comparison for a time range, and the period-close
//! gate built on top of it.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   createReconciliation                                                  │
//! │        │  expected = ledger sum over [range_start, range_end]           │
//! │        │  variance = actual - expected                                  │
//! │        ▼                                                                │
//! │   ┌─────────┐   verifyReconciliation    ┌──────────┐                    │
//! │   │ Pending │──────────────────────────►│ Verified │                    │
//! │   └─────────┘   (human sign-off, no     └──────────┘                    │
//! │        │         recomputation)               │                         │
//! │        │ auto, when |variance| exceeds        │  closeAccountingPeriod  │
//! │        ▼ the channel threshold                ▼  requires EVERY         │
//! │   ┌─────────┐                           ┌──────────┐  reconciliation    │
//! │   │ Flagged │── verifyReconciliation ──►│  Period  │  in range verified │
//! │   └─────────┘                           │  Closed  │                    │
//! │                                         └──────────┘                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A closed period rejects further postings dated inside it; the check is
//! [`period_close_posting_check`], surfaced as the fatal
//! [`LedgerError::PeriodClosed`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::cashier::AccountBalance;
use crate::config::ChannelSettings;
use crate::error::{LedgerError, ReconciliationError};

// =============================================================================
// Reconciliation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    Pending,
    Verified,
    Flagged,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Pending => "pending",
            ReconciliationStatus::Verified => "verified",
            ReconciliationStatus::Flagged => "flagged",
        }
    }
}

impl std::str::FromStr for ReconciliationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReconciliationStatus::Pending),
            "verified" => Ok(ReconciliationStatus::Verified),
            "flagged" => Ok(ReconciliationStatus::Flagged),
            other => Err(format!("Unknown reconciliation status: {other}")),
        }
    }
}

/// Input for `createReconciliation`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CreateReconciliationInput {
    pub channel_id: String,
    /// What is being reconciled: "cashier_session", "accounting_period", ...
    pub scope: String,
    pub scope_ref_id: String,
    #[ts(as = "String")]
    pub range_start: DateTime<Utc>,
    #[ts(as = "String")]
    pub range_end: DateTime<Utc>,
    /// Declared per-account balances for the range.
    pub declared_amounts: Vec<AccountBalance>,
    /// Declared total across accounts.
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub actual_balance: i64,
}

/// One declared-vs-expected comparison over a scope and time range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Reconciliation {
    pub id: String,
    pub channel_id: String,
    pub scope: String,
    pub scope_ref_id: String,
    #[ts(as = "String")]
    pub range_start: DateTime<Utc>,
    #[ts(as = "String")]
    pub range_end: DateTime<Utc>,
    /// Ledger-derived balance over the range.
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub expected_balance_cents: i64,
    /// Declared balance.
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub actual_balance_cents: i64,
    /// actual - expected.
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub variance_amount_cents: i64,
    pub status: ReconciliationStatus,
    pub declared_amounts: Vec<AccountBalance>,
    pub verified_by_user_id: Option<String>,
    #[ts(as = "Option<String>")]
    pub verified_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Reconciliation {
    /// Builds a reconciliation from the declared input and the
    /// ledger-expected balance the caller computed for the range.
    ///
    /// Starts `Pending`, or `Flagged` immediately when the absolute
    /// variance exceeds the channel threshold. Rejects an empty or
    /// inverted range.
    pub fn create(
        id: impl Into<String>,
        input: CreateReconciliationInput,
        expected_balance_cents: i64,
        settings: &ChannelSettings,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ReconciliationError> {
        if input.range_start >= input.range_end {
            return Err(ReconciliationError::InvalidRange {
                range_start: input.range_start.to_rfc3339(),
                range_end: input.range_end.to_rfc3339(),
            });
        }

        let variance = input.actual_balance - expected_balance_cents;
        let status = if variance.abs() > settings.variance_notification_threshold_cents {
            ReconciliationStatus::Flagged
        } else {
            ReconciliationStatus::Pending
        };

        Ok(Reconciliation {
            id: id.into(),
            channel_id: input.channel_id,
            scope: input.scope,
            scope_ref_id: input.scope_ref_id,
            range_start: input.range_start,
            range_end: input.range_end,
            expected_balance_cents,
            actual_balance_cents: input.actual_balance,
            variance_amount_cents: variance,
            status,
            declared_amounts: input.declared_amounts,
            verified_by_user_id: None,
            verified_at: None,
            created_at,
        })
    }

    /// Human sign-off. No recomputation; the recorded figures stand.
    pub fn verify(
        &mut self,
        verifier_user_id: impl Into<String>,
        verified_at: DateTime<Utc>,
    ) -> Result<(), ReconciliationError> {
        if self.status == ReconciliationStatus::Verified {
            return Err(ReconciliationError::AlreadyVerified {
                reconciliation_id: self.id.clone(),
            });
        }
        self.status = ReconciliationStatus::Verified;
        self.verified_by_user_id = Some(verifier_user_id.into());
        self.verified_at = Some(verified_at);
        Ok(())
    }
}

// =============================================================================
// Accounting Periods
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PeriodState {
    Open,
    Closed,
}

impl PeriodState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodState::Open => "open",
            PeriodState::Closed => "closed",
        }
    }
}

impl std::str::FromStr for PeriodState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(PeriodState::Open),
            "closed" => Ok(PeriodState::Closed),
            other => Err(format!("Unknown period state: {other}")),
        }
    }
}

/// A channel-scoped date range that, once closed, rejects further postings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AccountingPeriod {
    pub id: String,
    pub channel_id: String,
    #[ts(as = "String")]
    pub start_date: DateTime<Utc>,
    #[ts(as = "String")]
    pub end_date: DateTime<Utc>,
    pub state: PeriodState,
    pub closed_by_user_id: Option<String>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl AccountingPeriod {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start_date <= at && at <= self.end_date
    }
}

/// Summary of a period's reconciliation completeness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PeriodStatus {
    pub total_reconciliations: usize,
    pub verified_reconciliations: usize,
    /// Ids of reconciliations in range that are not yet `verified`.
    pub missing_reconciliations: Vec<String>,
}

impl PeriodStatus {
    pub fn is_complete(&self) -> bool {
        self.missing_reconciliations.is_empty()
    }
}

/// Result of `closeAccountingPeriod`. Closing never errors on an
/// incomplete period; it reports `success: false` with the blockers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PeriodEndCloseResult {
    pub success: bool,
    pub period: Option<AccountingPeriod>,
    pub reconciliation_summary: PeriodStatus,
}

/// Computes the reconciliation-completeness gate for a period range.
///
/// A reconciliation counts against the gate when its range overlaps
/// `[period_start, period_end]` and its status is anything other than
/// `verified`.
pub fn period_status(
    reconciliations: &[Reconciliation],
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> PeriodStatus {
    let in_range: Vec<&Reconciliation> = reconciliations
        .iter()
        .filter(|r| r.range_start <= period_end && r.range_end >= period_start)
        .collect();
    let verified = in_range
        .iter()
        .filter(|r| r.status == ReconciliationStatus::Verified)
        .count();
    let missing: Vec<String> = in_range
        .iter()
        .filter(|r| r.status != ReconciliationStatus::Verified)
        .map(|r| r.id.clone())
        .collect();

    PeriodStatus {
        total_reconciliations: in_range.len(),
        verified_reconciliations: verified,
        missing_reconciliations: missing,
    }
}

/// Guard applied before persisting any journal entry: fails when the
/// posting date falls inside a closed period.
pub fn period_close_posting_check(
    periods: &[AccountingPeriod],
    posted_at: DateTime<Utc>,
) -> Result<(), LedgerError> {
    for period in periods {
        if period.state == PeriodState::Closed && period.contains(posted_at) {
            return Err(LedgerError::PeriodClosed {
                posted_at: posted_at.to_rfc3339(),
            });
        }
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    fn input(actual: i64) -> CreateReconciliationInput {
        CreateReconciliationInput {
            channel_id: "channel-1".to_string(),
            scope: "cashier_session".to_string(),
            scope_ref_id: "sess-1".to_string(),
            range_start: at(1),
            range_end: at(2),
            declared_amounts: vec![AccountBalance::new("1000", actual)],
            actual_balance: actual,
        }
    }

    #[test]
    fn test_create_computes_variance() {
        let rec = Reconciliation::create(
            "rec-1",
            input(5000),
            5050,
            &ChannelSettings::default().variance_threshold(100),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(rec.variance_amount_cents, -50);
        assert_eq!(rec.status, ReconciliationStatus::Pending);
    }

    #[test]
    fn test_create_flags_large_variance() {
        let rec = Reconciliation::create(
            "rec-1",
            input(5000),
            5200,
            &ChannelSettings::default().variance_threshold(100),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(rec.variance_amount_cents, -200);
        assert_eq!(rec.status, ReconciliationStatus::Flagged);
    }

    #[test]
    fn test_create_rejects_inverted_range() {
        let mut bad = input(5000);
        bad.range_start = at(5);
        bad.range_end = at(1);
        let err = Reconciliation::create("rec-1", bad, 0, &ChannelSettings::default(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, ReconciliationError::InvalidRange { .. }));
    }

    #[test]
    fn test_verify_is_sign_off_without_recomputation() {
        let mut rec = Reconciliation::create(
            "rec-1",
            input(5000),
            5200,
            &ChannelSettings::default().variance_threshold(100),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(rec.status, ReconciliationStatus::Flagged);

        rec.verify("manager-1", Utc::now()).unwrap();
        assert_eq!(rec.status, ReconciliationStatus::Verified);
        // The figures stand
        assert_eq!(rec.variance_amount_cents, -200);

        let err = rec.verify("manager-2", Utc::now()).unwrap_err();
        assert_eq!(
            err,
            ReconciliationError::AlreadyVerified { reconciliation_id: "rec-1".to_string() }
        );
    }

    fn rec_in_range(id: &str, start_day: u32, end_day: u32, status: ReconciliationStatus) -> Reconciliation {
        let mut rec = Reconciliation::create(
            id,
            CreateReconciliationInput {
                channel_id: "channel-1".to_string(),
                scope: "cashier_session".to_string(),
                scope_ref_id: id.to_string(),
                range_start: at(start_day),
                range_end: at(end_day),
                declared_amounts: vec![],
                actual_balance: 0,
            },
            0,
            &ChannelSettings::default(),
            Utc::now(),
        )
        .unwrap();
        rec.status = status;
        rec
    }

    #[test]
    fn test_period_status_gate() {
        let recs = vec![
            rec_in_range("rec-1", 1, 2, ReconciliationStatus::Verified),
            rec_in_range("rec-2", 3, 4, ReconciliationStatus::Pending),
            rec_in_range("rec-3", 5, 6, ReconciliationStatus::Flagged),
            // Outside the period entirely
            rec_in_range("rec-4", 20, 21, ReconciliationStatus::Pending),
        ];

        let status = period_status(&recs, at(1), at(10));
        assert_eq!(status.total_reconciliations, 3);
        assert_eq!(status.verified_reconciliations, 1);
        assert_eq!(status.missing_reconciliations, vec!["rec-2", "rec-3"]);
        assert!(!status.is_complete());
    }

    #[test]
    fn test_period_status_complete_when_all_verified() {
        let recs = vec![
            rec_in_range("rec-1", 1, 2, ReconciliationStatus::Verified),
            rec_in_range("rec-2", 3, 4, ReconciliationStatus::Verified),
        ];
        let status = period_status(&recs, at(1), at(10));
        assert!(status.is_complete());
        assert_eq!(status.verified_reconciliations, 2);
    }

    #[test]
    fn test_closed_period_rejects_posting() {
        let periods = vec![AccountingPeriod {
            id: "period-1".to_string(),
            channel_id: "channel-1".to_string(),
            start_date: at(1),
            end_date: at(10),
            state: PeriodState::Closed,
            closed_by_user_id: Some("manager-1".to_string()),
            closed_at: Some(at(11)),
        }];

        let err = period_close_posting_check(&periods, at(5)).unwrap_err();
        assert!(matches!(err, LedgerError::PeriodClosed { .. }));

        // Outside the closed range posts fine
        period_close_posting_check(&periods, at(15)).unwrap();
    }

    #[test]
    fn test_open_period_accepts_posting() {
        let periods = vec![AccountingPeriod {
            id: "period-1".to_string(),
            channel_id: "channel-1".to_string(),
            start_date: at(1),
            end_date: at(10),
            state: PeriodState::Open,
            closed_by_user_id: None,
            closed_at: None,
        }];
        period_close_posting_check(&periods, at(5)).unwrap();
    }
}
