//! Firestore-backed quota store.
//!
//! One document per user at
//! `{base}/projects/{project}/databases/(default)/documents/{collection}/{uid}`.
//! Only two fields are owned by the gateway:
//!
//! | Field | Wire type | Example |
//! |-------|-----------|---------|
//! | `callCount` | `integerValue` (decimal string) | `{"integerValue":"3"}` |
//! | `lastCallDate` | `timestampValue` (RFC 3339 UTC) | `{"timestampValue":"2026-10-19T08:30:00.000Z"}` |
//!
//! Other fields on the document are ignored on read and left untouched on
//! write (the PATCH carries an update mask naming exactly the two fields).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, warn};

use super::QuotaRecord;
use super::store::QuotaStore;
use crate::oauth::AccessToken;
use crate::{Error, Result};

/// Firestore REST API root
pub const DEFAULT_FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";

/// Collection holding one document per user
pub const DEFAULT_COLLECTION: &str = "users";

const CALL_COUNT_FIELD: &str = "callCount";
const LAST_CALL_DATE_FIELD: &str = "lastCallDate";

// ============================================================================
// Typed-field codec
// ============================================================================

/// A Firestore document as returned by `GET` and sent by `PATCH`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    fields: HashMap<String, FieldValue>,
}

/// A typed Firestore value. Only the wrappers the quota fields use are modeled.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldValue {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "integer_as_string",
        deserialize_with = "lenient_integer"
    )]
    integer_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    string_value: Option<String>,
}

impl FieldValue {
    fn integer(value: i64) -> Self {
        Self {
            integer_value: Some(value),
            ..Self::default()
        }
    }

    fn timestamp(value: DateTime<Utc>) -> Self {
        Self {
            timestamp_value: Some(value.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ..Self::default()
        }
    }
}

// Firestore encodes int64 as a JSON string.
#[allow(clippy::ref_option, clippy::trivially_copy_pass_by_ref)]
fn integer_as_string<S: Serializer>(
    value: &Option<i64>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(n) => serializer.serialize_str(&n.to_string()),
        None => serializer.serialize_none(),
    }
}

fn lenient_integer<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<i64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Parse a stored date: RFC 3339 timestamp, or a bare `YYYY-MM-DD` day.
fn parse_call_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Decode a document into a record. Missing fields read as zero values.
fn decode_record(document: &Document) -> QuotaRecord {
    let call_count = document
        .fields
        .get(CALL_COUNT_FIELD)
        .and_then(|value| value.integer_value)
        .map_or(0, |n| u32::try_from(n.max(0)).unwrap_or(u32::MAX));

    let last_call_date = document
        .fields
        .get(LAST_CALL_DATE_FIELD)
        .and_then(|value| {
            value
                .timestamp_value
                .as_deref()
                .or(value.string_value.as_deref())
        })
        .and_then(parse_call_date)
        .unwrap_or_else(|| QuotaRecord::zero().last_call_date);

    QuotaRecord {
        call_count,
        last_call_date,
    }
}

/// Encode a record as the PATCH body.
fn encode_record(record: &QuotaRecord) -> Document {
    let mut fields = HashMap::with_capacity(2);
    fields.insert(
        CALL_COUNT_FIELD.to_string(),
        FieldValue::integer(i64::from(record.call_count)),
    );
    fields.insert(
        LAST_CALL_DATE_FIELD.to_string(),
        FieldValue::timestamp(record.last_call_date),
    );
    Document { fields }
}

// ============================================================================
// Store
// ============================================================================

/// Quota store talking to the Firestore REST API
#[derive(Debug, Clone)]
pub struct FirestoreQuotaStore {
    http: Client,
    collection_url: Url,
}

impl FirestoreQuotaStore {
    /// Create a store for `project_id`, rooted at `base_url`.
    pub fn new(
        base_url: &str,
        project_id: &str,
        collection: &str,
        timeout: Duration,
    ) -> Result<Self> {
        if project_id.trim().is_empty() {
            return Err(Error::Config("quota store project id is empty".to_string()));
        }

        let mut collection_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid document store URL '{base_url}': {e}")))?;
        collection_url
            .path_segments_mut()
            .map_err(|()| Error::Config(format!("document store URL '{base_url}' cannot be a base")))?
            .pop_if_empty()
            .extend([
                "projects",
                project_id,
                "databases",
                "(default)",
                "documents",
                collection,
            ]);

        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build document store client: {e}")))?;

        Ok(Self {
            http,
            collection_url,
        })
    }

    /// URL of the quota document for `uid`.
    #[must_use]
    pub fn document_url(&self, uid: &str) -> Url {
        let mut url = self.collection_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(uid);
        }
        url
    }
}

#[async_trait::async_trait]
impl QuotaStore for FirestoreQuotaStore {
    async fn read_quota(&self, uid: &str, token: &AccessToken) -> Result<QuotaRecord> {
        let response = self
            .http
            .get(self.document_url(uid))
            .bearer_auth(token.value())
            .send()
            .await
            .map_err(|e| Error::Store(format!("quota read failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(uid = %uid, "No quota document, starting from zero");
            return Ok(QuotaRecord::zero());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(uid = %uid, status = status.as_u16(), body = %body, "Quota read rejected");
            return Err(Error::Store(format!("quota read returned HTTP {status}")));
        }

        let document: Document = response
            .json()
            .await
            .map_err(|e| Error::Store(format!("malformed quota document: {e}")))?;
        Ok(decode_record(&document))
    }

    async fn record_success(
        &self,
        uid: &str,
        record: &QuotaRecord,
        now: DateTime<Utc>,
        token: &AccessToken,
    ) -> Result<()> {
        let next = record.incremented(now);
        let response = self
            .http
            .patch(self.document_url(uid))
            .bearer_auth(token.value())
            .query(&[
                ("updateMask.fieldPaths", CALL_COUNT_FIELD),
                ("updateMask.fieldPaths", LAST_CALL_DATE_FIELD),
            ])
            .json(&encode_record(&next))
            .send()
            .await
            .map_err(|e| Error::Store(format!("quota write failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(uid = %uid, status = status.as_u16(), body = %body, "Quota write rejected");
            return Err(Error::Store(format!("quota write returned HTTP {status}")));
        }

        debug!(uid = %uid, call_count = next.call_count, "Quota document updated");
        Ok(())
    }
}
