//! Redis-backed bucket store.
//!
//! Buckets are Redis hashes. The procedure runs as a Lua script, which Redis
//! executes without interleaving any other command, and the store clock is
//! the Redis server's `TIME`.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tracing::{debug, info};

use super::BucketStore;
use crate::error::{Result, TollgateError};
use crate::ratelimit::engine::BUCKET_SCRIPT;

/// Bucket store shared by all processes through one Redis server.
pub struct RedisStore {
    /// `None` once the store has been closed.
    connection: RwLock<Option<ConnectionManager>>,
    script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("open", &self.connection.read().is_some())
            .field("script", &self.script.get_hash())
            .finish()
    }
}

impl RedisStore {
    /// Connect to the Redis server at `url`.
    ///
    /// The connection is multiplexed and reconnects on failure; it is meant
    /// to be created once per process and shared.
    pub async fn connect(url: &str) -> Result<Self> {
        info!(url = %url, "Connecting to Redis bucket store");

        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        info!("Connected to Redis bucket store");

        Ok(Self {
            connection: RwLock::new(Some(connection)),
            script: Script::new(BUCKET_SCRIPT),
        })
    }

    fn connection(&self) -> Result<ConnectionManager> {
        self.connection.read().clone().ok_or_else(|| {
            TollgateError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "bucket store is closed",
            ))
        })
    }
}

#[async_trait]
impl BucketStore for RedisStore {
    async fn server_time(&self) -> Result<u64> {
        let mut conn = self.connection()?;
        let (seconds, micros): (u64, u64) = redis::cmd("TIME").query_async(&mut conn).await?;
        Ok(seconds * 1_000_000 + micros)
    }

    async fn read_fields(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        let mut conn = self.connection()?;
        let fields: HashMap<String, String> =
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;

        if fields.is_empty() {
            Ok(None)
        } else {
            Ok(Some(fields))
        }
    }

    async fn execute(&self, key: &str, args: &[String]) -> Result<i64> {
        let mut conn = self.connection()?;

        let mut invocation = self.script.key(key);
        for arg in args {
            invocation.arg(arg);
        }

        // EVALSHA, falling back to EVAL when the script is not cached yet.
        let code: i64 = invocation.invoke_async(&mut conn).await?;

        debug!(key = %key, code = code, "Executed bucket script");
        Ok(code)
    }

    async fn close(&self) -> Result<()> {
        if self.connection.write().take().is_some() {
            info!("Closed Redis bucket store connection");
        }
        Ok(())
    }
}
