//! Tollgate - Distributed Token Bucket Rate Limiting
//!
//! This crate implements a token-bucket rate limiter whose state lives in a
//! shared store. Application instances consult it through a stateless
//! client; the store applies every bucket operation atomically per key, so
//! the aggregate rate for a client never exceeds its configured ceiling no
//! matter how many processes call concurrently.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
