//! # Cashier Sessions & Drawer Counts
//!
//! `openCashierSession`, `recordCashCount`, `explainVariance`,
//! `reviewCashCount` and `closeCashierSession`.
//!
//! Expected cash is never typed in by anyone: it is derived from the books
//! as the session's opening float plus the cash-account movement posted to
//! the ledger since open. The comparison and the hide-variance policy live
//! in meridian-core.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use meridian_core::cashier::{
    evaluate_count, summarize_close, AccountBalance, CashCountResult, CashDrawerCount,
    CashierSession, CashierSessionSummary, CountType, CounterRole,
};
use meridian_core::error::SessionError;
use meridian_core::ledger::accounts;

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::locks::LockRegistry;

impl Engine {
    /// Opens a drawer session for a cashier with the declared opening
    /// float. One open session per cashier per channel.
    pub async fn open_cashier_session(
        &self,
        cashier_user_id: &str,
        opening_balances: Vec<AccountBalance>,
    ) -> EngineResult<Result<CashierSession, SessionError>> {
        if let Some(existing) = self
            .db
            .cashier()
            .open_session_for_cashier(&self.channel_id, cashier_user_id)
            .await?
        {
            return Ok(Err(SessionError::AlreadyOpen {
                session_id: existing.id,
            }));
        }

        let session = CashierSession::open(
            Uuid::new_v4().to_string(),
            self.channel_id.clone(),
            cashier_user_id,
            opening_balances,
            Utc::now(),
        );
        self.db.cashier().insert_session(&session).await?;

        info!(
            session_id = %session.id,
            cashier = cashier_user_id,
            opening_cash_cents = session.opening_cash_cents(),
            "Cashier session opened"
        );
        Ok(Ok(session))
    }

    /// Records a blind drawer count against a session.
    ///
    /// The stored count always carries the real expected figure and
    /// variance; the returned [`CashCountResult`] is redacted per channel
    /// policy and the recipient's role.
    pub async fn record_cash_count(
        &self,
        session_id: &str,
        count_type: CountType,
        declared_cash_cents: i64,
        role: CounterRole,
    ) -> EngineResult<Result<CashCountResult, SessionError>> {
        let _guard = self
            .locks
            .acquire(&LockRegistry::session_key(session_id))
            .await;

        let session = self
            .db
            .cashier()
            .find_session(session_id)
            .await?
            .ok_or_else(|| EngineError::not_found("CashierSession", session_id))?;
        let prior_counts = self.db.cashier().counts_for_session(session_id).await?;

        if let Err(err) = session.validate_count_allowed(count_type, &prior_counts, &self.settings)
        {
            return Ok(Err(err));
        }

        let movement = self
            .db
            .ledger()
            .account_movement_cents(
                &session.channel_id,
                accounts::CASH_ON_HAND,
                session.opened_at,
                None,
            )
            .await?;
        let expected = session.opening_cash_cents() + movement;

        let count = CashDrawerCount::new(
            Uuid::new_v4().to_string(),
            session_id,
            count_type,
            declared_cash_cents,
            expected,
            Utc::now(),
        );
        self.db.cashier().insert_count(&count).await?;

        let result = evaluate_count(&count, &self.settings, role);
        info!(
            session_id,
            count_id = %count.id,
            count_type = count_type.as_str(),
            has_variance = result.has_variance,
            variance_hidden = result.variance_hidden,
            "Cash count recorded"
        );
        Ok(Ok(result))
    }

    /// Attaches the cashier's variance explanation to a stored count.
    pub async fn explain_variance(
        &self,
        count_id: &str,
        reason: impl Into<String>,
    ) -> EngineResult<CashDrawerCount> {
        let mut count = self
            .db
            .cashier()
            .find_count(count_id)
            .await?
            .ok_or_else(|| EngineError::not_found("CashDrawerCount", count_id))?;
        count.explain_variance(reason);
        self.db.cashier().update_count_annotations(&count).await?;
        Ok(count)
    }

    /// Manager review of a count: records the sign-off and returns the
    /// unredacted figures.
    pub async fn review_cash_count(
        &self,
        count_id: &str,
        reviewer_user_id: &str,
        notes: Option<String>,
    ) -> EngineResult<CashDrawerCount> {
        let mut count = self
            .db
            .cashier()
            .find_count(count_id)
            .await?
            .ok_or_else(|| EngineError::not_found("CashDrawerCount", count_id))?;
        count.review(reviewer_user_id, notes, Utc::now());
        self.db.cashier().update_count_annotations(&count).await?;

        info!(count_id, reviewer = reviewer_user_id, "Cash count reviewed");
        Ok(count)
    }

    /// Closes a session against declared closing balances and summarizes
    /// the variance per account.
    ///
    /// The expected balance for each opened account is its opening float
    /// plus the ledger movement on that account over the session window.
    pub async fn close_cashier_session(
        &self,
        session_id: &str,
        closing_balances: Vec<AccountBalance>,
        notes: Option<String>,
    ) -> EngineResult<Result<CashierSessionSummary, SessionError>> {
        let _guard = self
            .locks
            .acquire(&LockRegistry::session_key(session_id))
            .await;

        let mut session = self
            .db
            .cashier()
            .find_session(session_id)
            .await?
            .ok_or_else(|| EngineError::not_found("CashierSession", session_id))?;
        let counts = self.db.cashier().counts_for_session(session_id).await?;

        let closed_at = Utc::now();
        if let Err(err) = session.close(closing_balances, notes, closed_at) {
            return Ok(Err(err));
        }

        let mut expected_balances = Vec::with_capacity(session.opening_balances.len());
        for opening in &session.opening_balances {
            let movement = self
                .db
                .ledger()
                .account_movement_cents(
                    &session.channel_id,
                    &opening.account_code,
                    session.opened_at,
                    Some(closed_at),
                )
                .await?;
            expected_balances.push(AccountBalance::new(
                opening.account_code.clone(),
                opening.amount_cents + movement,
            ));
        }

        let mut tx = self.db.pool().begin().await?;
        self.db.cashier().update_session_tx(&mut tx, &session).await?;
        tx.commit().await?;

        let summary = summarize_close(&session, &expected_balances, counts.len());
        info!(
            session_id,
            counts_recorded = summary.counts_recorded,
            total_variance_cents = summary.total_variance_cents,
            "Cashier session closed"
        );
        Ok(Ok(summary))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::config::ChannelSettings;
    use meridian_core::ledger::postings;
    use meridian_core::DEFAULT_CHANNEL_ID;
    use meridian_db::{Database, DbConfig};

    async fn test_engine() -> Engine {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        Engine::new(db, ChannelSettings::default())
    }

    fn float_5000() -> Vec<AccountBalance> {
        vec![AccountBalance::new(accounts::CASH_ON_HAND, 5000)]
    }

    /// Posts a settled cash sale into the engine's channel, moving the
    /// expected drawer cash by `cents`.
    async fn post_cash_sale(engine: &Engine, order_id: &str, cents: i64) {
        let entry = postings::payment_settled(
            Uuid::new_v4().to_string(),
            DEFAULT_CHANNEL_ID,
            order_id,
            "cash",
            cents,
            Utc::now(),
        )
        .unwrap();
        let mut tx = engine.db().pool().begin().await.unwrap();
        engine
            .db()
            .ledger()
            .insert_entry_tx(&mut tx, &entry)
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_session_then_double_open_rejected() {
        let engine = test_engine().await;

        let session = engine
            .open_cashier_session("cashier-1", float_5000())
            .await
            .unwrap()
            .unwrap();
        assert!(session.is_open());

        let err = engine
            .open_cashier_session("cashier-1", float_5000())
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err, SessionError::AlreadyOpen { session_id: session.id });

        // A different cashier opens independently
        engine
            .open_cashier_session("cashier-2", float_5000())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_spot_count_requires_opening_count() {
        let engine = test_engine().await;
        let session = engine
            .open_cashier_session("cashier-1", float_5000())
            .await
            .unwrap()
            .unwrap();

        let err = engine
            .record_cash_count(&session.id, CountType::Spot, 5000, CounterRole::Cashier)
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err, SessionError::OpeningCountRequired);
    }

    #[tokio::test]
    async fn test_small_variance_visible_large_variance_hidden() {
        let engine = test_engine().await;
        let session = engine
            .open_cashier_session("cashier-1", float_5000())
            .await
            .unwrap()
            .unwrap();
        engine
            .record_cash_count(&session.id, CountType::Opening, 5000, CounterRole::Cashier)
            .await
            .unwrap()
            .unwrap();

        // 50 cents of cash sales: expected 5050, declared 5000 → variance
        // -50, under the 100-cent threshold, fully visible
        post_cash_sale(&engine, "order-1", 50).await;
        let result = engine
            .record_cash_count(&session.id, CountType::Spot, 5000, CounterRole::Cashier)
            .await
            .unwrap()
            .unwrap();
        assert!(!result.has_variance);
        assert!(!result.variance_hidden);
        assert_eq!(result.expected_cash_cents, Some(5050));
        assert_eq!(result.variance_cents, Some(-50));

        // 150 more: expected 5200, declared 5000 → variance -200, over
        // threshold, redacted for the cashier
        post_cash_sale(&engine, "order-2", 150).await;
        let result = engine
            .record_cash_count(&session.id, CountType::Spot, 5000, CounterRole::Cashier)
            .await
            .unwrap()
            .unwrap();
        assert!(result.has_variance);
        assert!(result.variance_hidden);
        assert_eq!(result.expected_cash_cents, None);
        assert_eq!(result.variance_cents, None);
        assert_eq!(result.declared_cash_cents, 5000);

        // The stored count keeps the real numbers; the manager sees them
        let reviewed = engine
            .review_cash_count(&result.count_id, "manager-1", Some("checked".to_string()))
            .await
            .unwrap();
        assert_eq!(reviewed.expected_cash_cents, 5200);
        assert_eq!(reviewed.variance_cents, -200);
        assert_eq!(reviewed.reviewed_by_user_id.as_deref(), Some("manager-1"));
    }

    #[tokio::test]
    async fn test_explain_variance_persists() {
        let engine = test_engine().await;
        let session = engine
            .open_cashier_session("cashier-1", float_5000())
            .await
            .unwrap()
            .unwrap();
        let result = engine
            .record_cash_count(&session.id, CountType::Opening, 4900, CounterRole::Cashier)
            .await
            .unwrap()
            .unwrap();

        engine
            .explain_variance(&result.count_id, "float was short from yesterday")
            .await
            .unwrap();

        let stored = engine.db().cashier().get_count(&result.count_id).await.unwrap();
        assert_eq!(
            stored.variance_reason.as_deref(),
            Some("float was short from yesterday")
        );
    }

    #[tokio::test]
    async fn test_close_session_summarizes_ledger_expected() {
        let engine = test_engine().await;
        let session = engine
            .open_cashier_session("cashier-1", float_5000())
            .await
            .unwrap()
            .unwrap();
        post_cash_sale(&engine, "order-1", 250).await;

        let summary = engine
            .close_cashier_session(
                &session.id,
                vec![AccountBalance::new(accounts::CASH_ON_HAND, 5200)],
                Some("end of shift".to_string()),
            )
            .await
            .unwrap()
            .unwrap();

        assert!(!summary.session.is_open());
        assert_eq!(summary.account_variances.len(), 1);
        assert_eq!(summary.account_variances[0].expected_cents, 5250);
        assert_eq!(summary.account_variances[0].variance_cents, -50);
        assert_eq!(summary.total_variance_cents, -50);

        let stored = engine.db().cashier().get_session(&session.id).await.unwrap();
        assert!(!stored.is_open());
        assert!(stored.closed_at.is_some());
    }

    #[tokio::test]
    async fn test_close_requires_every_opened_account() {
        let engine = test_engine().await;
        let session = engine
            .open_cashier_session("cashier-1", float_5000())
            .await
            .unwrap()
            .unwrap();

        let err = engine
            .close_cashier_session(&session.id, vec![], None)
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::MissingClosingBalance {
                account_code: accounts::CASH_ON_HAND.to_string()
            }
        );

        // Session stays open after the failed close
        let stored = engine.db().cashier().get_session(&session.id).await.unwrap();
        assert!(stored.is_open());
    }

    #[tokio::test]
    async fn test_count_on_closed_session_rejected() {
        let engine = test_engine().await;
        let session = engine
            .open_cashier_session("cashier-1", float_5000())
            .await
            .unwrap()
            .unwrap();
        engine
            .close_cashier_session(
                &session.id,
                vec![AccountBalance::new(accounts::CASH_ON_HAND, 5000)],
                None,
            )
            .await
            .unwrap()
            .unwrap();

        let err = engine
            .record_cash_count(&session.id, CountType::Opening, 5000, CounterRole::Cashier)
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err, SessionError::NotOpen { session_id: session.id });
    }
}
