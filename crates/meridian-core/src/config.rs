//! # Channel Settings
//!
//! Channel-scoped configuration that affects computation.
//!
//! ## Why Explicit Config?
//! Settings like the variance-notification threshold change what
//! `record_cash_count` returns. They are therefore threaded into each entry
//! point as an explicit parameter — never read from ambient global state —
//! so unit tests can vary them per test case.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   ChannelSettings                                                       │
//! │        │                                                                │
//! │        ├──► record_cash_count(.., &settings)   variance threshold       │
//! │        ├──► close_session(.., &settings)       hide-variance policy     │
//! │        ├──► allocate(.., settings.allocation_order)  FIFO default       │
//! │        └──► plan_modification(.., &settings)   line-count limit         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Ordering policy for bulk payment allocation when the caller does not
/// supply an explicit order list.
///
/// Oldest-first is the documented default: paying down the oldest receivable
/// first minimizes aging. It is a policy, not a guess — hence configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum AllocationOrder {
    /// Oldest placed order first (FIFO). Default.
    OldestFirst,
    /// Newest placed order first.
    NewestFirst,
}

impl Default for AllocationOrder {
    fn default() -> Self {
        AllocationOrder::OldestFirst
    }
}

/// Per-channel configuration record.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ChannelSettings {
    /// Master switch for cash-drawer controls.
    pub cash_control_enabled: bool,

    /// Require an opening count before any other count in a session.
    pub require_opening_count: bool,

    /// Absolute variance (cents) above which a count is flagged.
    pub variance_notification_threshold_cents: i64,

    /// Withhold the raw variance from cashier-facing count results.
    /// Managers always see it via `review_cash_count`.
    pub hide_variance_from_cashier: bool,

    /// Allocation ordering when `order_ids` is omitted.
    pub allocation_order: AllocationOrder,

    /// Maximum lines an order may hold after modification.
    pub max_order_lines: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        ChannelSettings {
            cash_control_enabled: true,
            require_opening_count: true,
            variance_notification_threshold_cents: 100,
            hide_variance_from_cashier: true,
            allocation_order: AllocationOrder::OldestFirst,
            max_order_lines: 100,
        }
    }
}

impl ChannelSettings {
    /// Sets the variance threshold (builder style, for tests and setup code).
    pub fn variance_threshold(mut self, cents: i64) -> Self {
        self.variance_notification_threshold_cents = cents;
        self
    }

    /// Sets the hide-variance-from-cashier policy.
    pub fn hide_variance(mut self, hide: bool) -> Self {
        self.hide_variance_from_cashier = hide;
        self
    }

    /// Sets the allocation ordering policy.
    pub fn allocation_order(mut self, order: AllocationOrder) -> Self {
        self.allocation_order = order;
        self
    }

    /// Sets the opening-count requirement.
    pub fn require_opening_count(mut self, require: bool) -> Self {
        self.require_opening_count = require;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ChannelSettings::default();
        assert!(settings.cash_control_enabled);
        assert_eq!(settings.variance_notification_threshold_cents, 100);
        assert_eq!(settings.allocation_order, AllocationOrder::OldestFirst);
    }

    #[test]
    fn test_builder() {
        let settings = ChannelSettings::default()
            .variance_threshold(500)
            .hide_variance(false);
        assert_eq!(settings.variance_notification_threshold_cents, 500);
        assert!(!settings.hide_variance_from_cashier);
    }
}
