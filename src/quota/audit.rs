//! Audit logging for quota decisions.
//!
//! Every transition is emitted through `tracing` with a JSON blob in the
//! `audit` field, so the trail is queryable by any log aggregator.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `quota.reset` | The stored counter belongs to an earlier UTC day and was zeroed |
//! | `quota.admitted` | The counter is below the ceiling; the upstream call proceeds |
//! | `quota.rejected` | The counter reached the ceiling; the request ends with 429 |
//! | `quota.recorded` | The incremented counter was written after upstream success |
//! | `quota.record_failed` | The write failed; the upstream response is still returned |

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::QuotaRecord;

/// Structured audit event for one quota transition.
#[derive(Debug, Serialize)]
pub struct QuotaEvent {
    /// Event type string (e.g., `"quota.admitted"`).
    pub event: &'static str,
    /// User the counter belongs to.
    pub uid: String,
    /// Counter value relevant to the event.
    pub call_count: u32,
    /// Ceiling the counter was checked against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ceiling: Option<u32>,
    /// Stored date of the last call, for `quota.reset`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_call_date: Option<DateTime<Utc>>,
    /// Failure reason, for `quota.record_failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl QuotaEvent {
    fn base(event: &'static str, uid: &str, call_count: u32) -> Self {
        Self {
            event,
            uid: uid.to_string(),
            call_count,
            ceiling: None,
            last_call_date: None,
            reason: None,
        }
    }

    /// Construct a `quota.reset` event from the record as stored.
    #[must_use]
    pub fn reset(uid: &str, stored: &QuotaRecord) -> Self {
        Self {
            last_call_date: Some(stored.last_call_date),
            ..Self::base("quota.reset", uid, stored.call_count)
        }
    }

    /// Construct a `quota.admitted` event.
    #[must_use]
    pub fn admitted(uid: &str, call_count: u32, ceiling: u32) -> Self {
        Self {
            ceiling: Some(ceiling),
            ..Self::base("quota.admitted", uid, call_count)
        }
    }

    /// Construct a `quota.rejected` event.
    #[must_use]
    pub fn rejected(uid: &str, call_count: u32, ceiling: u32) -> Self {
        Self {
            ceiling: Some(ceiling),
            ..Self::base("quota.rejected", uid, call_count)
        }
    }

    /// Construct a `quota.recorded` event carrying the new count.
    #[must_use]
    pub fn recorded(uid: &str, call_count: u32) -> Self {
        Self::base("quota.recorded", uid, call_count)
    }

    /// Construct a `quota.record_failed` event.
    #[must_use]
    pub fn record_failed(uid: &str, call_count: u32, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::base("quota.record_failed", uid, call_count)
        }
    }
}

/// Emit a quota event. Failures go out at `warn`, everything else at `info`.
pub fn emit(event: &QuotaEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) if event.reason.is_some() => tracing::warn!(audit = %json, "quota audit"),
        Ok(ref json) => tracing::info!(audit = %json, "quota audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize quota event"),
    }
}
