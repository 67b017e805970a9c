//! Bucket record and its flat field mapping in the store.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{Result, TollgateError};

pub const FIELD_STORED_PERMITS: &str = "stored_permits";
pub const FIELD_MAX_PERMITS: &str = "max_permits";
pub const FIELD_INTERVAL: &str = "interval";
pub const FIELD_LAST_REFILL: &str = "last_refill";
pub const FIELD_APP: &str = "app";

/// State of one client's token bucket.
///
/// Timestamps and the refill interval are in microseconds of the store clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketRecord {
    /// Tokens currently available
    pub stored_permits: u64,
    /// Bucket capacity
    pub max_permits: u64,
    /// Time required to add one token, in microseconds
    pub interval_micros: u64,
    /// Store time at which refill was last credited
    pub last_refill: u64,
    /// Descriptive label, for observability only
    pub app: Option<String>,
}

impl BucketRecord {
    /// Credit whole tokens for the time elapsed since the last refill.
    ///
    /// The refill clock only moves by whole-token increments, so the
    /// fractional remainder is credited on a later call. A timestamp earlier
    /// than `last_refill` counts as zero elapsed time.
    pub fn refill(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last_refill);
        let tokens = elapsed / self.interval_micros;
        if tokens == 0 {
            return;
        }

        self.stored_permits = self
            .stored_permits
            .saturating_add(tokens)
            .min(self.max_permits);
        // tokens * interval <= elapsed, so this cannot pass `now`
        self.last_refill += tokens * self.interval_micros;
    }

    /// Encode as the flat field mapping stored under the bucket key.
    pub fn to_fields(&self) -> HashMap<String, String> {
        let mut fields = HashMap::with_capacity(5);
        fields.insert(FIELD_STORED_PERMITS.to_string(), self.stored_permits.to_string());
        fields.insert(FIELD_MAX_PERMITS.to_string(), self.max_permits.to_string());
        fields.insert(FIELD_INTERVAL.to_string(), self.interval_micros.to_string());
        fields.insert(FIELD_LAST_REFILL.to_string(), self.last_refill.to_string());
        if let Some(ref app) = self.app {
            fields.insert(FIELD_APP.to_string(), app.clone());
        }
        fields
    }

    /// Decode a field mapping read from the store.
    ///
    /// An empty mapping is an absent record. A present record missing any
    /// numeric field, or holding a non-numeric value, is malformed.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Option<Self>> {
        if fields.is_empty() {
            return Ok(None);
        }

        let record = Self {
            stored_permits: parse_field(fields, FIELD_STORED_PERMITS)?,
            max_permits: parse_field(fields, FIELD_MAX_PERMITS)?,
            interval_micros: parse_field(fields, FIELD_INTERVAL)?,
            last_refill: parse_field(fields, FIELD_LAST_REFILL)?,
            app: fields
                .get(FIELD_APP)
                .filter(|app| !app.is_empty())
                .cloned(),
        };

        if record.interval_micros == 0 {
            return Err(TollgateError::MalformedRecord("interval is zero".to_string()));
        }

        Ok(Some(record))
    }
}

fn parse_field(fields: &HashMap<String, String>, name: &str) -> Result<u64> {
    let raw = fields
        .get(name)
        .ok_or_else(|| TollgateError::MalformedRecord(format!("missing field '{}'", name)))?;

    raw.parse().map_err(|_| {
        TollgateError::MalformedRecord(format!("field '{}' is not an integer: {:?}", name, raw))
    })
}

/// Read-only view of a bucket, as returned by
/// [`RateLimitClient::inspect`](crate::ratelimit::RateLimitClient::inspect).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketSnapshot {
    pub client_id: String,
    pub stored_permits: u64,
    pub max_permits: u64,
    pub interval_micros: u64,
    pub last_refill_micros: u64,
    pub app: Option<String>,
}

impl BucketSnapshot {
    pub(crate) fn new(client_id: &str, record: BucketRecord) -> Self {
        Self {
            client_id: client_id.to_string(),
            stored_permits: record.stored_permits,
            max_permits: record.max_permits,
            interval_micros: record.interval_micros,
            last_refill_micros: record.last_refill,
            app: record.app,
        }
    }

    /// Wall-clock time of the last refill, when the store clock is epoch based.
    pub fn last_refill_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let micros = i64::try_from(self.last_refill_micros).ok()?;
        chrono::DateTime::from_timestamp_micros(micros)
    }
}
