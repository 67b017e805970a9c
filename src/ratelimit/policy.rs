//! Admission decisions for consumers.
//!
//! `Success` always admits and `AcquireFail` always throttles. What happens
//! on `NotFound` and `Error` is a deployment choice: admitting on `Error`
//! keeps the protected service available while the store is down, at the
//! cost of not enforcing any limit during that time.

use serde::{Deserialize, Serialize};

use super::result::RateLimitResult;

/// Admit or reject a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Deny,
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        *self == Verdict::Allow
    }
}

/// Maps rate limit results to verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    /// Verdict when the store could not be consulted
    pub on_error: Verdict,
    /// Verdict when the client has no bucket configured
    pub on_not_found: Verdict,
}

impl AdmissionPolicy {
    /// Admit on store errors.
    pub fn fail_open() -> Self {
        Self {
            on_error: Verdict::Allow,
            on_not_found: Verdict::Allow,
        }
    }

    /// Reject on store errors. Unconfigured clients are still admitted.
    pub fn fail_closed() -> Self {
        Self {
            on_error: Verdict::Deny,
            on_not_found: Verdict::Allow,
        }
    }

    pub fn decide(&self, result: RateLimitResult) -> Verdict {
        match result {
            RateLimitResult::Success => Verdict::Allow,
            RateLimitResult::AcquireFail => Verdict::Deny,
            RateLimitResult::NotFound => self.on_not_found,
            RateLimitResult::Error => self.on_error,
        }
    }
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::fail_closed()
    }
}
