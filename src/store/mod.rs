//! Bucket state stores.
//!
//! A store holds one bucket record per key as a flat field mapping and runs
//! the token bucket procedure atomically per key. Two backends exist: Redis,
//! shared by every process, and an in-process map for tests and
//! single-process deployments.

mod clock;
mod memory;
mod redis_store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;

/// A shared store able to execute the bucket procedure atomically.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Current store time in microseconds. All refill math uses this clock.
    async fn server_time(&self) -> Result<u64>;

    /// Read the raw fields stored under `key`, or `None` if absent.
    async fn read_fields(&self, key: &str) -> Result<Option<HashMap<String, String>>>;

    /// Run the bucket procedure against `key` with arguments
    /// `[method, timestamp, ...params]` and return its raw result code.
    ///
    /// No other execution on the same key may interleave with this one.
    async fn execute(&self, key: &str, args: &[String]) -> Result<i64>;

    /// Release connections. Calls made after closing fail.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Open the store selected by the configuration.
pub async fn open(config: &StoreConfig) -> Result<Arc<dyn BucketStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-process bucket store; limits are not shared between processes");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.url).await?;
            Ok(Arc::new(store))
        }
    }
}
