//! # Engine Context
//!
//! The [`Engine`] owns everything a mutation needs: the database handle,
//! the channel settings, the per-aggregate lock registry, and the
//! pluggable external handlers.
//!
//! ## Mutation Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. acquire the aggregate lock                                          │
//! │  2. load the aggregate(s)                                               │
//! │  3. plan in meridian-core (pure, typed errors)                          │
//! │  4. BEGIN; write aggregate + ledger posting; COMMIT                     │
//! │  5. return the typed result union                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Business failures short-circuit at step 3 and never open a transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use meridian_core::config::ChannelSettings;
use meridian_core::ledger::JournalEntry;
use meridian_core::modification::{ModifyOrderInput, ReferenceSnapshot};
use meridian_core::order::Order;
use meridian_core::payment::{Payment, Refund};
use meridian_core::reconciliation::period_close_posting_check;
use meridian_db::Database;

use crate::error::EngineResult;
use crate::locks::LockRegistry;

// =============================================================================
// External Handlers
// =============================================================================

/// Outcome of an external settlement attempt.
#[derive(Debug, Clone)]
pub struct SettlementOutcome {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub error_message: Option<String>,
}

impl SettlementOutcome {
    pub fn ok(transaction_id: impl Into<String>) -> Self {
        SettlementOutcome {
            success: true,
            transaction_id: Some(transaction_id.into()),
            error_message: None,
        }
    }

    pub fn declined(message: impl Into<String>) -> Self {
        SettlementOutcome {
            success: false,
            transaction_id: None,
            error_message: Some(message.into()),
        }
    }
}

/// Downstream payment processor. Declines become typed business errors;
/// only transport-level failures surface as [`crate::EngineError::Handler`].
pub trait SettlementHandler: Send + Sync {
    fn settle(&self, payment: &Payment) -> SettlementOutcome;
    fn cancel(&self, payment: &Payment) -> SettlementOutcome;
    fn refund(&self, payment: &Payment, refund: &Refund) -> SettlementOutcome;
}

/// Handler for methods settled at the counter (cash and equivalents):
/// every settlement succeeds immediately with a locally generated
/// transaction reference.
#[derive(Debug, Default)]
pub struct AutoSettlementHandler;

impl SettlementHandler for AutoSettlementHandler {
    fn settle(&self, _payment: &Payment) -> SettlementOutcome {
        SettlementOutcome::ok(format!("auto-{}", uuid::Uuid::new_v4()))
    }

    fn cancel(&self, _payment: &Payment) -> SettlementOutcome {
        SettlementOutcome::ok(format!("auto-{}", uuid::Uuid::new_v4()))
    }

    fn refund(&self, _payment: &Payment, _refund: &Refund) -> SettlementOutcome {
        SettlementOutcome::ok(format!("auto-{}", uuid::Uuid::new_v4()))
    }
}

/// Resolves the external reference data a modification plan needs:
/// stock levels, coupon validity, shipping quotes.
pub trait ReferenceData: Send + Sync {
    fn resolve(&self, order: &Order, input: &ModifyOrderInput) -> ReferenceSnapshot;
}

/// A fixed snapshot, for channels with a locally cached catalog and for
/// tests.
#[derive(Debug, Default)]
pub struct StaticReferenceData {
    pub snapshot: ReferenceSnapshot,
}

impl StaticReferenceData {
    pub fn new(snapshot: ReferenceSnapshot) -> Self {
        StaticReferenceData { snapshot }
    }
}

impl ReferenceData for StaticReferenceData {
    fn resolve(&self, _order: &Order, _input: &ModifyOrderInput) -> ReferenceSnapshot {
        self.snapshot.clone()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// The mutation engine. Cheap to clone not required; services share one
/// instance behind an `Arc` when needed.
pub struct Engine {
    pub(crate) db: Database,
    pub(crate) channel_id: String,
    pub(crate) settings: ChannelSettings,
    pub(crate) locks: LockRegistry,
    pub(crate) settlement: Arc<dyn SettlementHandler>,
    pub(crate) references: Arc<dyn ReferenceData>,
}

impl Engine {
    /// Creates an engine for the default channel with counter-settled
    /// payments and an empty reference snapshot. Production callers swap
    /// in real handlers.
    pub fn new(db: Database, settings: ChannelSettings) -> Self {
        Engine {
            db,
            channel_id: meridian_core::DEFAULT_CHANNEL_ID.to_string(),
            settings,
            locks: LockRegistry::new(),
            settlement: Arc::new(AutoSettlementHandler),
            references: Arc::new(StaticReferenceData::default()),
        }
    }

    pub fn with_channel_id(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = channel_id.into();
        self
    }

    pub fn with_settlement_handler(mut self, handler: Arc<dyn SettlementHandler>) -> Self {
        self.settlement = handler;
        self
    }

    pub fn with_reference_data(mut self, references: Arc<dyn ReferenceData>) -> Self {
        self.references = references;
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Posts a journal entry inside the caller's transaction, after the
    /// closed-period guard. Every posting in the engine goes through here.
    pub(crate) async fn post_entry(
        &self,
        conn: &mut SqliteConnection,
        entry: &JournalEntry,
        posted_at: DateTime<Utc>,
    ) -> EngineResult<()> {
        let periods = self
            .db
            .reconciliations()
            .periods_for_channel_tx(conn, &entry.channel_id)
            .await?;
        period_close_posting_check(&periods, posted_at)?;
        self.db.ledger().insert_entry_tx(conn, entry).await?;
        Ok(())
    }
}
