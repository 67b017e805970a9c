//! Token bucket engine.
//!
//! [`apply`] is the read-modify-write step that a store runs atomically per
//! key. It is pure: it takes the current record (if any) and an invocation,
//! and returns the result code together with the write the store must
//! perform. The Redis backend runs [`BUCKET_SCRIPT`], which implements the
//! same steps server-side.

use super::invocation::{Invocation, Operation};
use super::record::BucketRecord;
use super::result::{CODE_ACQUIRE_FAIL, CODE_NOT_FOUND, CODE_SUCCESS};

/// Lua rendition of [`apply`] for stores that execute scripts atomically.
pub const BUCKET_SCRIPT: &str = include_str!("bucket.lua");

/// What the store must do with the record after an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    /// Leave the stored record untouched
    Unchanged,
    /// Replace the stored record
    Put(BucketRecord),
    /// Remove the record
    Remove,
}

/// Result of applying one invocation to a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub code: i64,
    pub write: Write,
}

impl Outcome {
    fn new(code: i64, write: Write) -> Self {
        Self { code, write }
    }
}

/// Apply an invocation to the current bucket state.
///
/// The invocation is assumed to be validated (positive capacity, interval
/// and permit count).
pub fn apply(current: Option<BucketRecord>, invocation: &Invocation) -> Outcome {
    let now = invocation.timestamp;

    match (&invocation.operation, current) {
        (
            Operation::Init {
                initial_permits,
                max_permits,
                interval_micros,
                app,
            },
            _,
        ) => {
            let record = BucketRecord {
                stored_permits: (*initial_permits).min(*max_permits),
                max_permits: *max_permits,
                interval_micros: *interval_micros,
                last_refill: now,
                app: if app.is_empty() { None } else { Some(app.clone()) },
            };
            Outcome::new(CODE_SUCCESS, Write::Put(record))
        }

        (Operation::Delete, _) => Outcome::new(CODE_SUCCESS, Write::Remove),

        (Operation::Modify { .. }, None) | (Operation::Acquire { .. }, None) => {
            Outcome::new(CODE_NOT_FOUND, Write::Unchanged)
        }

        (
            Operation::Modify {
                max_permits,
                interval_micros,
            },
            Some(mut record),
        ) => {
            record.max_permits = *max_permits;
            record.interval_micros = *interval_micros;
            record.stored_permits = record.stored_permits.min(record.max_permits);
            Outcome::new(CODE_SUCCESS, Write::Put(record))
        }

        (Operation::Acquire { permits }, Some(mut record)) => {
            record.refill(now);

            let code = if record.stored_permits >= *permits {
                record.stored_permits -= permits;
                CODE_SUCCESS
            } else {
                CODE_ACQUIRE_FAIL
            };

            // The refill is persisted even when the debit is refused.
            Outcome::new(code, Write::Put(record))
        }
    }
}
