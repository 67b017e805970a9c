//! Result codes returned by the bucket procedure.

use std::fmt;

use serde::Serialize;

/// Raw code: the operation was applied.
pub const CODE_SUCCESS: i64 = 1;
/// Raw code: not enough permits were available.
pub const CODE_ACQUIRE_FAIL: i64 = 0;
/// Raw code: no bucket is configured for the key.
pub const CODE_NOT_FOUND: i64 = -1;

/// Outcome of a rate limit call as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateLimitResult {
    /// The operation was applied (for `acquire`: permits were granted)
    Success,
    /// The bucket did not hold enough permits
    AcquireFail,
    /// No bucket is configured for the client
    NotFound,
    /// The store could not be consulted
    Error,
}

impl RateLimitResult {
    /// Map a raw procedure code. Unknown codes yield `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            CODE_SUCCESS => Some(RateLimitResult::Success),
            CODE_ACQUIRE_FAIL => Some(RateLimitResult::AcquireFail),
            CODE_NOT_FOUND => Some(RateLimitResult::NotFound),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == RateLimitResult::Success
    }
}

impl fmt::Display for RateLimitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RateLimitResult::Success => "SUCCESS",
            RateLimitResult::AcquireFail => "ACQUIRE_FAIL",
            RateLimitResult::NotFound => "NOT_FOUND",
            RateLimitResult::Error => "ERROR",
        };
        f.write_str(name)
    }
}
