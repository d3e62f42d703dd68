//! # Cashier Sessions
//!
//! Cash-drawer session lifecycle and point-in-time drawer counts.
//!
//! ## Session Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   openCashierSession                                                    │
//! │        │  opening balances per account (the float)                      │
//! │        ▼                                                                │
//! │   ┌────────┐    recordCashCount (Opening / Spot)*                       │
//! │   │  Open  │──────────────────────────────────────┐                     │
//! │   └────────┘                                      │                     │
//! │        │  closeCashierSession                     ▼                     │
//! │        │  requires a declared closing       CashDrawerCount             │
//! │        ▼  balance for EVERY opened account  declared vs expected        │
//! │   ┌────────┐                                                            │
//! │   │ Closed │  terminal                                                  │
//! │   └────────┘                                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Blind Counts
//! Counts are blind: the cashier declares what they counted without seeing
//! the expected figure. When the absolute variance exceeds the channel
//! threshold AND the channel hides variance from cashiers, the count result
//! returned to a cashier carries `variance_hidden: true` with the expected
//! and variance fields withheld. The stored [`CashDrawerCount`] always keeps
//! the real numbers; managers read them via `reviewCashCount`.
//!
//! Expected cash itself is ledger-derived (opening float plus cash-account
//! movements since open) and is supplied by the caller. This module only
//! compares and classifies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::config::ChannelSettings;
use crate::error::SessionError;
use crate::ledger::accounts;

// =============================================================================
// Session Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[ts(export)]
pub enum CashierSessionStatus {
    Open,
    Closed,
}

impl CashierSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CashierSessionStatus::Open => "Open",
            CashierSessionStatus::Closed => "Closed",
        }
    }
}

impl std::str::FromStr for CashierSessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Open" => Ok(CashierSessionStatus::Open),
            "Closed" => Ok(CashierSessionStatus::Closed),
            other => Err(format!("Unknown session status: {other}")),
        }
    }
}

/// A declared balance for one account, in integer cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AccountBalance {
    pub account_code: String,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub amount_cents: i64,
}

impl AccountBalance {
    pub fn new(account_code: impl Into<String>, amount_cents: i64) -> Self {
        AccountBalance {
            account_code: account_code.into(),
            amount_cents,
        }
    }
}

/// One cashier's drawer period, open to close, within one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CashierSession {
    pub id: String,
    pub channel_id: String,
    pub cashier_user_id: String,
    pub status: CashierSessionStatus,
    /// The float: declared balances at open, per account.
    pub opening_balances: Vec<AccountBalance>,
    /// Declared balances at close. `None` while open.
    pub closing_declared: Option<Vec<AccountBalance>>,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl CashierSession {
    pub fn open(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        cashier_user_id: impl Into<String>,
        opening_balances: Vec<AccountBalance>,
        opened_at: DateTime<Utc>,
    ) -> Self {
        CashierSession {
            id: id.into(),
            channel_id: channel_id.into(),
            cashier_user_id: cashier_user_id.into(),
            status: CashierSessionStatus::Open,
            opening_balances,
            closing_declared: None,
            notes: None,
            opened_at,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == CashierSessionStatus::Open
    }

    /// Declared opening float on the physical-cash account.
    pub fn opening_cash_cents(&self) -> i64 {
        self.opening_balances
            .iter()
            .filter(|b| b.account_code == accounts::CASH_ON_HAND)
            .map(|b| b.amount_cents)
            .sum()
    }

    /// Closes the session with declared closing balances.
    ///
    /// Every account opened with a float must appear in `closing_balances`;
    /// a missing account fails with [`SessionError::MissingClosingBalance`].
    pub fn close(
        &mut self,
        closing_balances: Vec<AccountBalance>,
        notes: Option<String>,
        closed_at: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::NotOpen {
                session_id: self.id.clone(),
            });
        }
        for opened in &self.opening_balances {
            let covered = closing_balances
                .iter()
                .any(|c| c.account_code == opened.account_code);
            if !covered {
                return Err(SessionError::MissingClosingBalance {
                    account_code: opened.account_code.clone(),
                });
            }
        }

        self.status = CashierSessionStatus::Closed;
        self.closing_declared = Some(closing_balances);
        self.notes = notes;
        self.closed_at = Some(closed_at);
        Ok(())
    }

    /// Checks that a count of `count_type` may be recorded now.
    ///
    /// The session must be open, and when the channel requires an opening
    /// count, it must exist before any Spot or Closing count.
    pub fn validate_count_allowed(
        &self,
        count_type: CountType,
        prior_counts: &[CashDrawerCount],
        settings: &ChannelSettings,
    ) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::NotOpen {
                session_id: self.id.clone(),
            });
        }
        if settings.require_opening_count
            && count_type != CountType::Opening
            && !prior_counts.iter().any(|c| c.count_type == CountType::Opening)
        {
            return Err(SessionError::OpeningCountRequired);
        }
        Ok(())
    }
}

// =============================================================================
// Cash Counts
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[ts(export)]
pub enum CountType {
    Opening,
    Spot,
    Closing,
}

impl CountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CountType::Opening => "Opening",
            CountType::Spot => "Spot",
            CountType::Closing => "Closing",
        }
    }
}

impl std::str::FromStr for CountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Opening" => Ok(CountType::Opening),
            "Spot" => Ok(CountType::Spot),
            "Closing" => Ok(CountType::Closing),
            other => Err(format!("Unknown count type: {other}")),
        }
    }
}

/// Who is receiving the count result. Determines variance visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum CounterRole {
    Cashier,
    Manager,
}

/// A stored point-in-time drawer count. Always carries the real figures;
/// redaction happens only on the cashier-facing [`CashCountResult`].
///
/// After creation only the annotation fields change (`explainVariance`,
/// `reviewCashCount`). Declared and expected amounts are immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CashDrawerCount {
    pub id: String,
    pub session_id: String,
    pub count_type: CountType,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub declared_cash_cents: i64,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub expected_cash_cents: i64,
    /// declared - expected. Positive means the drawer is over.
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub variance_cents: i64,
    pub variance_reason: Option<String>,
    pub reviewed_by_user_id: Option<String>,
    #[ts(as = "Option<String>")]
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    #[ts(as = "String")]
    pub counted_at: DateTime<Utc>,
}

impl CashDrawerCount {
    pub fn new(
        id: impl Into<String>,
        session_id: impl Into<String>,
        count_type: CountType,
        declared_cash_cents: i64,
        expected_cash_cents: i64,
        counted_at: DateTime<Utc>,
    ) -> Self {
        CashDrawerCount {
            id: id.into(),
            session_id: session_id.into(),
            count_type,
            declared_cash_cents,
            expected_cash_cents,
            variance_cents: declared_cash_cents - expected_cash_cents,
            variance_reason: None,
            reviewed_by_user_id: None,
            reviewed_at: None,
            review_notes: None,
            counted_at,
        }
    }

    /// Attaches the cashier's explanation. Annotative only.
    pub fn explain_variance(&mut self, reason: impl Into<String>) {
        self.variance_reason = Some(reason.into());
    }

    /// Manager sign-off. Annotative only; never alters the amounts.
    pub fn review(
        &mut self,
        reviewer_user_id: impl Into<String>,
        notes: Option<String>,
        reviewed_at: DateTime<Utc>,
    ) {
        self.reviewed_by_user_id = Some(reviewer_user_id.into());
        self.review_notes = notes;
        self.reviewed_at = Some(reviewed_at);
    }
}

/// The count result as seen by its recipient.
///
/// When `variance_hidden` is true the expected and variance figures are
/// `None`; the recipient sees only what they declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CashCountResult {
    pub count_id: String,
    pub session_id: String,
    pub count_type: CountType,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub declared_cash_cents: i64,
    #[serde(with = "crate::money::cents_string_opt")]
    #[ts(as = "Option<String>")]
    pub expected_cash_cents: Option<i64>,
    #[serde(with = "crate::money::cents_string_opt")]
    #[ts(as = "Option<String>")]
    pub variance_cents: Option<i64>,
    pub has_variance: bool,
    pub variance_hidden: bool,
    #[ts(as = "String")]
    pub counted_at: DateTime<Utc>,
}

/// Classifies a stored count for a given recipient under channel policy.
///
/// `has_variance` is true when the absolute variance exceeds the channel
/// threshold (strictly greater, so a variance exactly at the threshold does
/// not flag). `variance_hidden` additionally requires the hide policy and a
/// cashier recipient.
pub fn evaluate_count(
    count: &CashDrawerCount,
    settings: &ChannelSettings,
    role: CounterRole,
) -> CashCountResult {
    let has_variance = settings.cash_control_enabled
        && count.variance_cents.abs() > settings.variance_notification_threshold_cents;
    let variance_hidden =
        has_variance && settings.hide_variance_from_cashier && role == CounterRole::Cashier;

    let (expected, variance) = if variance_hidden {
        (None, None)
    } else {
        (Some(count.expected_cash_cents), Some(count.variance_cents))
    };

    CashCountResult {
        count_id: count.id.clone(),
        session_id: count.session_id.clone(),
        count_type: count.count_type,
        declared_cash_cents: count.declared_cash_cents,
        expected_cash_cents: expected,
        variance_cents: variance,
        has_variance,
        variance_hidden,
        counted_at: count.counted_at,
    }
}

// =============================================================================
// Close Summary
// =============================================================================

/// Declared-vs-expected for one account at session close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AccountVariance {
    pub account_code: String,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub declared_cents: i64,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub expected_cents: i64,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub variance_cents: i64,
}

/// Result of `closeCashierSession`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CashierSessionSummary {
    pub session: CashierSession,
    pub counts_recorded: usize,
    pub account_variances: Vec<AccountVariance>,
    /// Sum of per-account variances.
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub total_variance_cents: i64,
}

/// Builds the close summary from the closed session and the
/// ledger-expected balance per account.
///
/// Accounts with no expected entry are compared against zero.
pub fn summarize_close(
    session: &CashierSession,
    expected_balances: &[AccountBalance],
    counts_recorded: usize,
) -> CashierSessionSummary {
    let declared = session.closing_declared.as_deref().unwrap_or(&[]);
    let account_variances: Vec<AccountVariance> = declared
        .iter()
        .map(|d| {
            let expected = expected_balances
                .iter()
                .find(|e| e.account_code == d.account_code)
                .map(|e| e.amount_cents)
                .unwrap_or(0);
            AccountVariance {
                account_code: d.account_code.clone(),
                declared_cents: d.amount_cents,
                expected_cents: expected,
                variance_cents: d.amount_cents - expected,
            }
        })
        .collect();
    let total_variance_cents = account_variances.iter().map(|v| v.variance_cents).sum();

    CashierSessionSummary {
        session: session.clone(),
        counts_recorded,
        account_variances,
        total_variance_cents,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn open_session() -> CashierSession {
        CashierSession::open(
            "sess-1",
            "channel-1",
            "user-1",
            vec![AccountBalance::new(accounts::CASH_ON_HAND, 5000)],
            Utc::now(),
        )
    }

    fn count(declared: i64, expected: i64) -> CashDrawerCount {
        CashDrawerCount::new("count-1", "sess-1", CountType::Spot, declared, expected, Utc::now())
    }

    #[test]
    fn test_open_session_state() {
        let session = open_session();
        assert!(session.is_open());
        assert_eq!(session.opening_cash_cents(), 5000);
        assert!(session.closed_at.is_none());
    }

    #[test]
    fn test_close_requires_balance_per_opened_account() {
        let mut session = open_session();
        let err = session.close(vec![], None, Utc::now()).unwrap_err();
        assert_eq!(
            err,
            SessionError::MissingClosingBalance {
                account_code: accounts::CASH_ON_HAND.to_string()
            }
        );
        assert!(session.is_open());
    }

    #[test]
    fn test_close_then_operations_rejected() {
        let mut session = open_session();
        session
            .close(vec![AccountBalance::new(accounts::CASH_ON_HAND, 5200)], None, Utc::now())
            .unwrap();
        assert_eq!(session.status, CashierSessionStatus::Closed);

        let err = session
            .close(vec![AccountBalance::new(accounts::CASH_ON_HAND, 5200)], None, Utc::now())
            .unwrap_err();
        assert_eq!(err, SessionError::NotOpen { session_id: "sess-1".to_string() });

        let err = session
            .validate_count_allowed(CountType::Spot, &[], &ChannelSettings::default())
            .unwrap_err();
        assert_eq!(err, SessionError::NotOpen { session_id: "sess-1".to_string() });
    }

    #[test]
    fn test_opening_count_required_policy() {
        let session = open_session();
        let settings = ChannelSettings::default();

        let err = session
            .validate_count_allowed(CountType::Spot, &[], &settings)
            .unwrap_err();
        assert_eq!(err, SessionError::OpeningCountRequired);

        // An opening count itself is always allowed
        session
            .validate_count_allowed(CountType::Opening, &[], &settings)
            .unwrap();

        // After one, spot counts are allowed
        let opening = CashDrawerCount::new(
            "count-0", "sess-1", CountType::Opening, 5000, 5000, Utc::now(),
        );
        session
            .validate_count_allowed(CountType::Spot, &[opening], &settings)
            .unwrap();

        // Policy off: no opening count needed
        let relaxed = ChannelSettings::default().require_opening_count(false);
        session
            .validate_count_allowed(CountType::Spot, &[], &relaxed)
            .unwrap();
    }

    #[test]
    fn test_variance_below_threshold_not_flagged() {
        // declared 5000 vs expected 5050: variance 50, threshold 100
        let settings = ChannelSettings::default().variance_threshold(100);
        let result = evaluate_count(&count(5000, 5050), &settings, CounterRole::Cashier);

        assert!(!result.has_variance);
        assert!(!result.variance_hidden);
        assert_eq!(result.variance_cents, Some(-50));
    }

    #[test]
    fn test_variance_above_threshold_hidden_from_cashier() {
        // declared 5000 vs expected 5200: variance 200, threshold 100
        let settings = ChannelSettings::default().variance_threshold(100).hide_variance(true);
        let result = evaluate_count(&count(5000, 5200), &settings, CounterRole::Cashier);

        assert!(result.has_variance);
        assert!(result.variance_hidden);
        assert_eq!(result.expected_cash_cents, None);
        assert_eq!(result.variance_cents, None);
        assert_eq!(result.declared_cash_cents, 5000);
    }

    #[test]
    fn test_manager_always_sees_variance() {
        let settings = ChannelSettings::default().variance_threshold(100).hide_variance(true);
        let result = evaluate_count(&count(5000, 5200), &settings, CounterRole::Manager);

        assert!(result.has_variance);
        assert!(!result.variance_hidden);
        assert_eq!(result.variance_cents, Some(-200));
    }

    #[test]
    fn test_variance_at_threshold_not_flagged() {
        let settings = ChannelSettings::default().variance_threshold(100);
        let result = evaluate_count(&count(5100, 5000), &settings, CounterRole::Cashier);
        assert!(!result.has_variance);
    }

    #[test]
    fn test_cash_control_disabled_never_flags() {
        let mut settings = ChannelSettings::default().variance_threshold(100);
        settings.cash_control_enabled = false;
        let result = evaluate_count(&count(5000, 9000), &settings, CounterRole::Cashier);
        assert!(!result.has_variance);
    }

    #[test]
    fn test_review_is_annotative_only() {
        let mut count = count(5000, 5200);
        count.explain_variance("till opened during power cut");
        count.review("manager-1", Some("verified against camera".to_string()), Utc::now());

        assert_eq!(count.declared_cash_cents, 5000);
        assert_eq!(count.expected_cash_cents, 5200);
        assert_eq!(count.variance_cents, -200);
        assert_eq!(count.reviewed_by_user_id.as_deref(), Some("manager-1"));
        assert!(count.variance_reason.is_some());
    }

    #[test]
    fn test_close_summary_variances() {
        let mut session = open_session();
        session
            .close(
                vec![
                    AccountBalance::new(accounts::CASH_ON_HAND, 7000),
                    AccountBalance::new(accounts::CARD_CLEARING, 3000),
                ],
                Some("end of shift".to_string()),
                Utc::now(),
            )
            .unwrap();

        let expected = vec![AccountBalance::new(accounts::CASH_ON_HAND, 7100)];
        let summary = summarize_close(&session, &expected, 3);

        assert_eq!(summary.counts_recorded, 3);
        assert_eq!(summary.account_variances[0].variance_cents, -100);
        // No expected entry for card clearing: compared against zero
        assert_eq!(summary.account_variances[1].variance_cents, 3000);
        assert_eq!(summary.total_variance_cents, 2900);
    }
}
