//! Caller-side facade over the bucket procedure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, instrument, trace, warn};

use super::invocation::{Invocation, Operation};
use super::policy::{AdmissionPolicy, Verdict};
use super::record::{BucketRecord, BucketSnapshot};
use super::result::RateLimitResult;
use crate::config::StoreConfig;
use crate::error::{Result, TollgateError};
use crate::store::BucketStore;

/// Namespace prepended to client ids to form store keys.
pub const DEFAULT_KEY_PREFIX: &str = "ratelimit:";

/// Default bound on a single store round trip, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 500;

/// Rate limit client used by application instances.
///
/// The client holds no bucket state of its own. Every call stamps the
/// operation with the store's clock and hands it to the store, which applies
/// it atomically. Calls never return an error: store failures are logged and
/// reported as [`RateLimitResult::Error`].
pub struct RateLimitClient<S: BucketStore + ?Sized> {
    store: Arc<S>,
    key_prefix: String,
    timeout: Duration,
}

impl<S: BucketStore + ?Sized> Clone for RateLimitClient<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            key_prefix: self.key_prefix.clone(),
            timeout: self.timeout,
        }
    }
}

impl<S: BucketStore + ?Sized> RateLimitClient<S> {
    /// Create a client with the default key prefix and timeout.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Create a client with the prefix and timeout from the store config.
    pub fn from_config(store: Arc<S>, config: &StoreConfig) -> Self {
        Self {
            store,
            key_prefix: config.key_prefix.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Store key holding the bucket for `client_id`.
    pub fn store_key(&self, client_id: &str) -> String {
        format!("{}{}", self.key_prefix, client_id)
    }

    /// Create or replace the bucket for `client_id`, labelled with the id.
    pub async fn init(
        &self,
        client_id: &str,
        initial_permits: u64,
        max_permits: u64,
        interval: Duration,
    ) -> RateLimitResult {
        self.init_with_app(client_id, initial_permits, max_permits, interval, client_id)
            .await
    }

    /// Create or replace the bucket for `client_id` with an explicit label.
    pub async fn init_with_app(
        &self,
        client_id: &str,
        initial_permits: u64,
        max_permits: u64,
        interval: Duration,
        app: &str,
    ) -> RateLimitResult {
        self.exec(
            client_id,
            Operation::Init {
                initial_permits,
                max_permits,
                interval_micros: interval_micros(interval),
                app: app.to_string(),
            },
        )
        .await
    }

    /// Change capacity and refill interval; stored permits are clamped to the
    /// new capacity.
    pub async fn modify(
        &self,
        client_id: &str,
        max_permits: u64,
        interval: Duration,
    ) -> RateLimitResult {
        self.exec(
            client_id,
            Operation::Modify {
                max_permits,
                interval_micros: interval_micros(interval),
            },
        )
        .await
    }

    /// Remove the bucket. Succeeds whether or not it existed.
    pub async fn delete(&self, client_id: &str) -> RateLimitResult {
        self.exec(client_id, Operation::Delete).await
    }

    /// Take one permit.
    pub async fn acquire(&self, client_id: &str) -> RateLimitResult {
        self.acquire_permits(client_id, 1).await
    }

    /// Take `permits` permits, all or nothing.
    pub async fn acquire_permits(&self, client_id: &str, permits: u64) -> RateLimitResult {
        let result = self.exec(client_id, Operation::Acquire { permits }).await;

        if result == RateLimitResult::AcquireFail {
            debug!(client_id = %client_id, permits = permits, "Rate limit exceeded");
        }

        result
    }

    /// Acquire one permit and turn the result into a verdict.
    pub async fn admit(&self, client_id: &str, policy: &AdmissionPolicy) -> Verdict {
        let result = self.acquire(client_id).await;
        let verdict = policy.decide(result);

        if result == RateLimitResult::Error && verdict.is_allowed() {
            warn!(client_id = %client_id, "Admitting request without rate limit check");
        }

        verdict
    }

    /// Read the bucket for `client_id` without modifying it.
    ///
    /// Returns `None` when no bucket exists or the store cannot be read.
    pub async fn inspect(&self, client_id: &str) -> Option<BucketSnapshot> {
        let key = self.store_key(client_id);

        match self.read_record(&key).await {
            Ok(record) => record.map(|record| BucketSnapshot::new(client_id, record)),
            Err(e) => {
                error!(client_id = %client_id, key = %key, error = %e, "Failed to read bucket");
                None
            }
        }
    }

    async fn read_record(&self, key: &str) -> Result<Option<BucketRecord>> {
        match self.bounded(self.store.read_fields(key)).await? {
            Some(fields) => BucketRecord::from_fields(&fields),
            None => Ok(None),
        }
    }

    /// Run one operation and map its outcome; the single failure boundary.
    #[instrument(level = "trace", skip(self, operation), fields(method = %operation.method()))]
    async fn exec(&self, client_id: &str, operation: Operation) -> RateLimitResult {
        let method = operation.method();

        match self.try_exec(client_id, operation).await {
            Ok(code) => match RateLimitResult::from_code(code) {
                Some(result) => {
                    trace!(client_id = %client_id, method = %method, result = %result, "Rate limit call completed");
                    result
                }
                None => {
                    error!(
                        client_id = %client_id,
                        method = %method,
                        code = code,
                        "Bucket procedure returned an unknown code"
                    );
                    RateLimitResult::Error
                }
            },
            Err(e) => {
                error!(
                    client_id = %client_id,
                    method = %method,
                    error = %e,
                    "Failed to execute bucket procedure"
                );
                RateLimitResult::Error
            }
        }
    }

    async fn try_exec(&self, client_id: &str, operation: Operation) -> Result<i64> {
        operation.validate()?;

        let key = self.store_key(client_id);
        let timestamp = self.bounded(self.store.server_time()).await?;
        let args = Invocation::new(timestamp, operation).to_args();

        self.bounded(self.store.execute(&key, &args)).await
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TollgateError::Timeout(
                u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }
}

/// Whole microseconds in `interval`, saturating.
fn interval_micros(interval: Duration) -> u64 {
    u64::try_from(interval.as_micros()).unwrap_or(u64::MAX)
}
