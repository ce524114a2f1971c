//! Per-user daily call quota.
//!
//! One [`QuotaRecord`] per uid lives in a remote document store. The policy is
//! fixed: at most [`DAILY_CALL_CEILING`] successful calls per UTC calendar
//! day, counted only after the upstream call succeeded.
//!
//! # Known limitation
//!
//! The check and the increment are two separate store calls (read, then
//! write). Two concurrent requests for the same uid can both read
//! `call_count = 19`, both be admitted, and both write `20`: the ceiling can be
//! exceeded under concurrent load from one user. `tests/quota_race.rs`
//! demonstrates this.

pub mod audit;
pub mod firestore;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use firestore::FirestoreQuotaStore;
pub use store::{InMemoryQuotaStore, QuotaStore};

/// Successful calls allowed per user per UTC day.
pub const DAILY_CALL_CEILING: u32 = 20;

/// Usage counter for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    /// Calls recorded since `last_call_date`'s UTC day began
    pub call_count: u32,
    /// Instant of the last recorded call
    pub last_call_date: DateTime<Utc>,
}

impl QuotaRecord {
    /// Record for a user that has never called: zero calls, epoch date.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            call_count: 0,
            last_call_date: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// The record after one more successful call at `now`.
    #[must_use]
    pub fn incremented(&self, now: DateTime<Utc>) -> Self {
        Self {
            call_count: self.call_count.saturating_add(1),
            last_call_date: now,
        }
    }
}

impl Default for QuotaRecord {
    fn default() -> Self {
        Self::zero()
    }
}

/// Reset the counter when the last call fell on an earlier (or later) UTC day.
///
/// Pure and idempotent within a day.
#[must_use]
pub fn apply_daily_reset(record: QuotaRecord, now: DateTime<Utc>) -> QuotaRecord {
    if record.last_call_date.date_naive() == now.date_naive() {
        record
    } else {
        QuotaRecord {
            call_count: 0,
            ..record
        }
    }
}

/// Whether another call may go through.
#[must_use]
pub fn admit(record: &QuotaRecord, ceiling: u32) -> bool {
    record.call_count < ceiling
}
