//! Token bucket rate limiting.
//!
//! The [`engine`] holds the bucket arithmetic, [`RateLimitClient`] is what
//! application instances call, and [`AdmissionPolicy`] turns results into
//! admit/deny verdicts.

mod client;
pub mod engine;
mod invocation;
mod policy;
mod record;
mod result;

pub use client::{RateLimitClient, DEFAULT_KEY_PREFIX, DEFAULT_TIMEOUT_MS};
pub use invocation::{Invocation, Method, Operation};
pub use policy::{AdmissionPolicy, Verdict};
pub use record::{BucketRecord, BucketSnapshot};
pub use result::{RateLimitResult, CODE_ACQUIRE_FAIL, CODE_NOT_FOUND, CODE_SUCCESS};
