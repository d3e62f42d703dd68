//! # Journal Ledger
//!
//! Append-only double-entry journal records.
//!
//! ## Double Entry
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every entry balances:  sum(debit) == sum(credit)                       │
//! │                                                                         │
//! │  Cash payment settled, 1099:                                            │
//! │      1000 Cash on Hand            debit 1099                            │
//! │      4000 Sales Revenue                        credit 1099              │
//! │                                                                         │
//! │  Refund of 500 to card:                                                 │
//! │      4100 Refunds                 debit  500                            │
//! │      1010 Card Clearing                        credit  500              │
//! │                                                                         │
//! │  Entries are audit-grade: NEVER updated or deleted after creation.      │
//! │  Corrections are new, reversing entries.                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! An unbalanced entry is a programming error, not a business outcome:
//! construction fails with [`LedgerError`] and the enclosing transaction
//! must roll back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::LedgerError;

// =============================================================================
// Account Codes
// =============================================================================

/// The minimal chart of accounts this core posts against.
pub mod accounts {
    /// Physical cash in drawers.
    pub const CASH_ON_HAND: &str = "1000";
    /// Card captures awaiting processor payout.
    pub const CARD_CLEARING: &str = "1010";
    /// Credit-customer receivables.
    pub const ACCOUNTS_RECEIVABLE: &str = "1100";
    /// Supplier payables.
    pub const ACCOUNTS_PAYABLE: &str = "2100";
    /// Sales revenue.
    pub const SALES_REVENUE: &str = "4000";
    /// Contra-revenue for refunds.
    pub const REFUNDS: &str = "4100";

    /// Settlement account for a payment method code.
    /// Cash goes to the drawer; everything else clears through the
    /// processor account.
    pub fn settlement_account(method: &str) -> &'static str {
        if method == "cash" {
            CASH_ON_HAND
        } else {
            CARD_CLEARING
        }
    }
}

// =============================================================================
// Journal Types
// =============================================================================

/// What caused a journal entry. Stored for audit queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[ts(export)]
pub enum JournalEntryType {
    PaymentSettled,
    RefundSettled,
    OrderModification,
    OrderReversal,
    BulkAllocation,
}

impl JournalEntryType {
    pub fn as_str(&self) -> &'static str {
        use JournalEntryType::*;
        match self {
            PaymentSettled => "PaymentSettled",
            RefundSettled => "RefundSettled",
            OrderModification => "OrderModification",
            OrderReversal => "OrderReversal",
            BulkAllocation => "BulkAllocation",
        }
    }
}

impl std::str::FromStr for JournalEntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use JournalEntryType::*;
        Ok(match s {
            "PaymentSettled" => PaymentSettled,
            "RefundSettled" => RefundSettled,
            "OrderModification" => OrderModification,
            "OrderReversal" => OrderReversal,
            "BulkAllocation" => BulkAllocation,
            other => return Err(format!("Unknown journal entry type: {other}")),
        })
    }
}

/// One side of a posting: an account and a debit or credit magnitude.
///
/// Exactly one of `debit_cents`/`credit_cents` is positive; both are
/// non-negative. Signs live in the debit/credit pairing, never in the
/// amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct JournalLine {
    pub account_code: String,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub debit_cents: i64,
    #[serde(with = "crate::money::cents_string")]
    #[ts(as = "String")]
    pub credit_cents: i64,
}

impl JournalLine {
    /// A debit line.
    pub fn debit(account_code: impl Into<String>, cents: i64) -> Self {
        JournalLine {
            account_code: account_code.into(),
            debit_cents: cents,
            credit_cents: 0,
        }
    }

    /// A credit line.
    pub fn credit(account_code: impl Into<String>, cents: i64) -> Self {
        JournalLine {
            account_code: account_code.into(),
            debit_cents: 0,
            credit_cents: cents,
        }
    }
}

/// An immutable double-entry journal record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct JournalEntry {
    pub id: String,
    pub channel_id: String,
    pub entry_type: JournalEntryType,
    /// What this entry is about: "order", "payment", "cashier_session", ...
    pub scope: String,
    pub scope_ref_id: String,
    pub description: String,
    pub lines: Vec<JournalLine>,
    #[ts(as = "String")]
    pub posted_at: DateTime<Utc>,
}

impl JournalEntry {
    /// Constructs a balanced entry, or fails with [`LedgerError`].
    ///
    /// ## Validation
    /// - At least two lines.
    /// - All amounts non-negative.
    /// - `sum(debit) == sum(credit)`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        entry_type: JournalEntryType,
        scope: impl Into<String>,
        scope_ref_id: impl Into<String>,
        description: impl Into<String>,
        lines: Vec<JournalLine>,
        posted_at: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        if lines.len() < 2 {
            return Err(LedgerError::EmptyEntry);
        }
        for line in &lines {
            if line.debit_cents < 0 || line.credit_cents < 0 {
                return Err(LedgerError::NegativeAmount {
                    account_code: line.account_code.clone(),
                });
            }
        }
        let debit: i64 = lines.iter().map(|l| l.debit_cents).sum();
        let credit: i64 = lines.iter().map(|l| l.credit_cents).sum();
        if debit != credit {
            return Err(LedgerError::Unbalanced {
                debit_cents: debit,
                credit_cents: credit,
            });
        }

        Ok(JournalEntry {
            id: id.into(),
            channel_id: channel_id.into(),
            entry_type,
            scope: scope.into(),
            scope_ref_id: scope_ref_id.into(),
            description: description.into(),
            lines,
            posted_at,
        })
    }

    /// Total debit side (== total credit side by construction).
    pub fn total_cents(&self) -> i64 {
        self.lines.iter().map(|l| l.debit_cents).sum()
    }

    /// Builds the mirror entry that backs this one out: every debit
    /// becomes a credit and vice versa. Used by `reverseOrder`.
    pub fn reversal(
        &self,
        new_id: impl Into<String>,
        posted_at: DateTime<Utc>,
    ) -> JournalEntry {
        JournalEntry {
            id: new_id.into(),
            channel_id: self.channel_id.clone(),
            entry_type: JournalEntryType::OrderReversal,
            scope: self.scope.clone(),
            scope_ref_id: self.scope_ref_id.clone(),
            description: format!("Reversal of {}: {}", self.id, self.description),
            lines: self
                .lines
                .iter()
                .map(|l| JournalLine {
                    account_code: l.account_code.clone(),
                    debit_cents: l.credit_cents,
                    credit_cents: l.debit_cents,
                })
                .collect(),
            posted_at,
        }
    }
}

// =============================================================================
// Posting Builders
// =============================================================================

/// Canonical postings for the business events this core emits.
///
/// Keeping them here means every caller produces identical account
/// pairings for the same event — the reconciliation math depends on it.
pub mod postings {
    use super::accounts::{self, settlement_account};
    use super::*;

    /// Payment settled: debit the settlement account, credit revenue.
    pub fn payment_settled(
        entry_id: impl Into<String>,
        channel_id: impl Into<String>,
        order_id: &str,
        method: &str,
        amount_cents: i64,
        posted_at: DateTime<Utc>,
    ) -> Result<JournalEntry, LedgerError> {
        JournalEntry::new(
            entry_id,
            channel_id,
            JournalEntryType::PaymentSettled,
            "order",
            order_id,
            format!("Payment settled ({method})"),
            vec![
                JournalLine::debit(settlement_account(method), amount_cents),
                JournalLine::credit(accounts::SALES_REVENUE, amount_cents),
            ],
            posted_at,
        )
    }

    /// Refund settled: debit contra-revenue, credit the settlement account.
    pub fn refund_settled(
        entry_id: impl Into<String>,
        channel_id: impl Into<String>,
        order_id: &str,
        method: &str,
        amount_cents: i64,
        posted_at: DateTime<Utc>,
    ) -> Result<JournalEntry, LedgerError> {
        JournalEntry::new(
            entry_id,
            channel_id,
            JournalEntryType::RefundSettled,
            "order",
            order_id,
            format!("Refund settled ({method})"),
            vec![
                JournalLine::debit(accounts::REFUNDS, amount_cents),
                JournalLine::credit(settlement_account(method), amount_cents),
            ],
            posted_at,
        )
    }

    /// Order modification settled. Positive `price_change_cents` settles
    /// like an extra payment; negative like a refund.
    pub fn modification_settled(
        entry_id: impl Into<String>,
        channel_id: impl Into<String>,
        order_id: &str,
        method: &str,
        price_change_cents: i64,
        posted_at: DateTime<Utc>,
    ) -> Result<JournalEntry, LedgerError> {
        let amount = price_change_cents.abs();
        let lines = if price_change_cents >= 0 {
            vec![
                JournalLine::debit(settlement_account(method), amount),
                JournalLine::credit(accounts::SALES_REVENUE, amount),
            ]
        } else {
            vec![
                JournalLine::debit(accounts::REFUNDS, amount),
                JournalLine::credit(settlement_account(method), amount),
            ]
        };
        JournalEntry::new(
            entry_id,
            channel_id,
            JournalEntryType::OrderModification,
            "order",
            order_id,
            format!("Order modification ({price_change_cents} cents)"),
            lines,
            posted_at,
        )
    }

    /// Bulk allocation: one debit to the settlement account, one credit
    /// to receivables per order paid.
    pub fn bulk_allocation(
        entry_id: impl Into<String>,
        channel_id: impl Into<String>,
        customer_id: &str,
        method: &str,
        applied: &[(String, i64)],
        posted_at: DateTime<Utc>,
    ) -> Result<JournalEntry, LedgerError> {
        let total: i64 = applied.iter().map(|(_, cents)| cents).sum();
        let mut lines = vec![JournalLine::debit(settlement_account(method), total)];
        for (_order_id, cents) in applied {
            lines.push(JournalLine::credit(accounts::ACCOUNTS_RECEIVABLE, *cents));
        }
        JournalEntry::new(
            entry_id,
            channel_id,
            JournalEntryType::BulkAllocation,
            "customer",
            customer_id,
            format!("Bulk payment allocation across {} orders", applied.len()),
            lines,
            posted_at,
        )
    }

    /// Supplier-side bulk allocation: the outgoing mirror of
    /// [`bulk_allocation`]. One debit to payables per purchase settled,
    /// one credit to the settlement account for the total.
    pub fn supplier_bulk_allocation(
        entry_id: impl Into<String>,
        channel_id: impl Into<String>,
        supplier_id: &str,
        method: &str,
        applied: &[(String, i64)],
        posted_at: DateTime<Utc>,
    ) -> Result<JournalEntry, LedgerError> {
        let total: i64 = applied.iter().map(|(_, cents)| cents).sum();
        let mut lines: Vec<JournalLine> = applied
            .iter()
            .map(|(_purchase_id, cents)| JournalLine::debit(accounts::ACCOUNTS_PAYABLE, *cents))
            .collect();
        lines.push(JournalLine::credit(settlement_account(method), total));
        JournalEntry::new(
            entry_id,
            channel_id,
            JournalEntryType::BulkAllocation,
            "supplier",
            supplier_id,
            format!("Bulk supplier payment across {} purchases", applied.len()),
            lines,
            posted_at,
        )
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_entry_accepted() {
        let entry = JournalEntry::new(
            "j-1",
            "channel-1",
            JournalEntryType::PaymentSettled,
            "order",
            "order-1",
            "test",
            vec![
                JournalLine::debit(accounts::CASH_ON_HAND, 1000),
                JournalLine::credit(accounts::SALES_REVENUE, 1000),
            ],
            Utc::now(),
        )
        .unwrap();
        assert_eq!(entry.total_cents(), 1000);
    }

    #[test]
    fn test_unbalanced_entry_rejected() {
        let err = JournalEntry::new(
            "j-1",
            "channel-1",
            JournalEntryType::PaymentSettled,
            "order",
            "order-1",
            "test",
            vec![
                JournalLine::debit(accounts::CASH_ON_HAND, 1000),
                JournalLine::credit(accounts::SALES_REVENUE, 999),
            ],
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, LedgerError::Unbalanced { debit_cents: 1000, credit_cents: 999 });
    }

    #[test]
    fn test_single_line_rejected() {
        let err = JournalEntry::new(
            "j-1",
            "channel-1",
            JournalEntryType::PaymentSettled,
            "order",
            "order-1",
            "test",
            vec![JournalLine::debit(accounts::CASH_ON_HAND, 0)],
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, LedgerError::EmptyEntry);
    }

    #[test]
    fn test_negative_amount_rejected() {
        let err = JournalEntry::new(
            "j-1",
            "channel-1",
            JournalEntryType::PaymentSettled,
            "order",
            "order-1",
            "test",
            vec![
                JournalLine::debit(accounts::CASH_ON_HAND, -100),
                JournalLine::credit(accounts::SALES_REVENUE, -100),
            ],
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::NegativeAmount { .. }));
    }

    #[test]
    fn test_reversal_mirrors_and_balances() {
        let entry = postings::payment_settled("j-1", "channel-1", "order-1", "cash", 1500, Utc::now())
            .unwrap();
        let reversal = entry.reversal("j-2", Utc::now());

        assert_eq!(reversal.entry_type, JournalEntryType::OrderReversal);
        assert_eq!(reversal.lines[0].credit_cents, 1500);
        assert_eq!(reversal.lines[1].debit_cents, 1500);
        // Still balanced
        let debit: i64 = reversal.lines.iter().map(|l| l.debit_cents).sum();
        let credit: i64 = reversal.lines.iter().map(|l| l.credit_cents).sum();
        assert_eq!(debit, credit);
    }

    #[test]
    fn test_settlement_account_by_method() {
        assert_eq!(accounts::settlement_account("cash"), accounts::CASH_ON_HAND);
        assert_eq!(accounts::settlement_account("card"), accounts::CARD_CLEARING);
    }

    #[test]
    fn test_refund_posting_credits_settlement_account() {
        let entry =
            postings::refund_settled("j-1", "channel-1", "order-1", "cash", 500, Utc::now()).unwrap();
        assert_eq!(entry.lines[0].account_code, accounts::REFUNDS);
        assert_eq!(entry.lines[0].debit_cents, 500);
        assert_eq!(entry.lines[1].account_code, accounts::CASH_ON_HAND);
        assert_eq!(entry.lines[1].credit_cents, 500);
    }

    #[test]
    fn test_modification_posting_direction() {
        let up = postings::modification_settled("j-1", "c", "o", "cash", 500, Utc::now()).unwrap();
        assert_eq!(up.lines[0].debit_cents, 500); // cash in

        let down = postings::modification_settled("j-2", "c", "o", "cash", -500, Utc::now()).unwrap();
        assert_eq!(down.lines[0].account_code, accounts::REFUNDS);
        assert_eq!(down.lines[1].credit_cents, 500); // cash out
    }

    #[test]
    fn test_bulk_allocation_posting_balances_across_orders() {
        let applied = vec![("o-1".to_string(), 1000), ("o-2".to_string(), 500)];
        let entry =
            postings::bulk_allocation("j-1", "c", "cust-1", "cash", &applied, Utc::now()).unwrap();

        assert_eq!(entry.lines.len(), 3);
        assert_eq!(entry.total_cents(), 1500);
        assert_eq!(entry.entry_type, JournalEntryType::BulkAllocation);
    }

    #[test]
    fn test_supplier_bulk_allocation_debits_payables() {
        let applied = vec![("p-1".to_string(), 2000), ("p-2".to_string(), 750)];
        let entry = postings::supplier_bulk_allocation(
            "j-1", "c", "supp-1", "card", &applied, Utc::now(),
        )
        .unwrap();

        assert_eq!(entry.scope, "supplier");
        let payable_debit: i64 = entry
            .lines
            .iter()
            .filter(|l| l.account_code == accounts::ACCOUNTS_PAYABLE)
            .map(|l| l.debit_cents)
            .sum();
        assert_eq!(payable_debit, 2750);
        assert_eq!(entry.lines.last().unwrap().account_code, accounts::CARD_CLEARING);
        assert_eq!(entry.lines.last().unwrap().credit_cents, 2750);
    }
}
