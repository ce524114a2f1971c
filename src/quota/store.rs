//! Quota store: persistence layer for per-user call counters.
//!
//! The [`QuotaStore`] trait abstracts over storage backends. The production
//! implementation is [`FirestoreQuotaStore`](super::FirestoreQuotaStore);
//! [`InMemoryQuotaStore`] is a `DashMap`-backed store for tests and local runs.
//!
//! Every call carries the bearer token minted for the current request. Stores
//! that do not authenticate ignore it.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::QuotaRecord;
use crate::Result;
use crate::oauth::AccessToken;

/// Trait abstracting the quota storage backend.
///
/// Implementations must be `Send + Sync` because the store is shared across
/// request tasks.
#[async_trait::async_trait]
pub trait QuotaStore: Send + Sync + 'static {
    /// Fetch the stored record for `uid`.
    ///
    /// A user with no stored record reads as [`QuotaRecord::zero`]. No daily
    /// reset is applied here.
    async fn read_quota(&self, uid: &str, token: &AccessToken) -> Result<QuotaRecord>;

    /// Persist one more successful call for `uid` at `now`.
    ///
    /// Writes `record.call_count + 1` and `now`, replacing both fields.
    /// `record` is the counter as seen at admission, after the daily reset.
    async fn record_success(
        &self,
        uid: &str,
        record: &QuotaRecord,
        now: DateTime<Utc>,
        token: &AccessToken,
    ) -> Result<()>;
}

/// In-memory quota store backed by a `DashMap` (uid → record).
///
/// Read and write are separate map operations, matching the remote store's
/// read-then-write shape.
#[derive(Debug)]
pub struct InMemoryQuotaStore {
    records: DashMap<String, QuotaRecord>,
}

impl InMemoryQuotaStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Seed a record, e.g. to start a test at 19 calls.
    pub fn insert(&self, uid: impl Into<String>, record: QuotaRecord) {
        self.records.insert(uid.into(), record);
    }

    /// Current record for `uid`, if one was ever written.
    #[must_use]
    pub fn get(&self, uid: &str) -> Option<QuotaRecord> {
        self.records.get(uid).map(|entry| *entry)
    }

    /// Number of users with a stored record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record has been written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for InMemoryQuotaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn read_quota(&self, uid: &str, _token: &AccessToken) -> Result<QuotaRecord> {
        Ok(self.get(uid).unwrap_or_default())
    }

    async fn record_success(
        &self,
        uid: &str,
        record: &QuotaRecord,
        now: DateTime<Utc>,
        _token: &AccessToken,
    ) -> Result<()> {
        let next = record.incremented(now);
        debug!(uid = %uid, call_count = next.call_count, "Quota recorded");
        self.records.insert(uid.to_string(), next);
        Ok(())
    }
}
