//! In-process bucket store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use super::clock::{Clock, SystemClock};
use super::BucketStore;
use crate::error::{Result, TollgateError};
use crate::ratelimit::engine::{self, Write};
use crate::ratelimit::{BucketRecord, Invocation};

/// Bucket store backed by a concurrent map.
///
/// Each execution holds the map entry for its key exclusively for the whole
/// read-modify-write, which makes executions on one key linearizable.
#[derive(Debug)]
pub struct MemoryStore {
    records: DashMap<String, HashMap<String, String>>,
    clock: Arc<dyn Clock>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create a store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a store using the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of stored buckets.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TollgateError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "bucket store is closed",
            )));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    async fn server_time(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.clock.now_micros())
    }

    async fn read_fields(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        self.ensure_open()?;
        Ok(self.records.get(key).map(|fields| fields.value().clone()))
    }

    async fn execute(&self, key: &str, args: &[String]) -> Result<i64> {
        self.ensure_open()?;
        let invocation = Invocation::from_args(args)?;

        // The entry guard is held until the write below completes.
        let outcome = match self.records.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = BucketRecord::from_fields(entry.get())?;
                let outcome = engine::apply(current, &invocation);
                match &outcome.write {
                    Write::Put(record) => {
                        *entry.get_mut() = record.to_fields();
                    }
                    Write::Remove => {
                        entry.remove();
                    }
                    Write::Unchanged => {}
                }
                outcome
            }
            Entry::Vacant(entry) => {
                let outcome = engine::apply(None, &invocation);
                if let Write::Put(record) = &outcome.write {
                    entry.insert(record.to_fields());
                }
                outcome
            }
        };

        trace!(
            key = %key,
            method = %invocation.operation.method(),
            code = outcome.code,
            "Executed bucket procedure"
        );

        Ok(outcome.code)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Operation, CODE_ACQUIRE_FAIL, CODE_NOT_FOUND, CODE_SUCCESS};

    fn args(now: u64, operation: Operation) -> Vec<String> {
        Invocation::new(now, operation).to_args()
    }

    fn init_args(now: u64, initial: u64, max: u64, interval: u64) -> Vec<String> {
        args(
            now,
            Operation::Init {
                initial_permits: initial,
                max_permits: max,
                interval_micros: interval,
                app: "svc".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_init_then_read_fields() {
        let store = MemoryStore::new();
        let code = store.execute("ratelimit:svc", &init_args(10, 3, 5, 100)).await.unwrap();
        assert_eq!(code, CODE_SUCCESS);

        let fields = store.read_fields("ratelimit:svc").await.unwrap().unwrap();
        assert_eq!(fields.get("stored_permits").map(String::as_str), Some("3"));
        assert_eq!(fields.get("max_permits").map(String::as_str), Some("5"));
        assert_eq!(fields.get("interval").map(String::as_str), Some("100"));
        assert_eq!(fields.get("last_refill").map(String::as_str), Some("10"));
        assert_eq!(fields.get("app").map(String::as_str), Some("svc"));
    }

    #[tokio::test]
    async fn test_absent_key() {
        let store = MemoryStore::new();
        assert_eq!(store.read_fields("missing").await.unwrap(), None);

        let code = store
            .execute("missing", &args(0, Operation::Acquire { permits: 1 }))
            .await
            .unwrap();
        assert_eq!(code, CODE_NOT_FOUND);
        // A failed lookup must not leave an empty record behind.
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let store = MemoryStore::new();
        store.execute("k", &init_args(0, 1, 1, 1)).await.unwrap();
        assert_eq!(store.len(), 1);

        assert_eq!(store.execute("k", &args(0, Operation::Delete)).await.unwrap(), CODE_SUCCESS);
        assert!(store.is_empty());
        assert_eq!(store.execute("k", &args(0, Operation::Delete)).await.unwrap(), CODE_SUCCESS);
    }

    #[tokio::test]
    async fn test_acquire_uses_invocation_timestamp() {
        let store = MemoryStore::new();
        store.execute("k", &init_args(0, 0, 10, 100)).await.unwrap();

        let code = store
            .execute("k", &args(99, Operation::Acquire { permits: 1 }))
            .await
            .unwrap();
        assert_eq!(code, CODE_ACQUIRE_FAIL);

        let code = store
            .execute("k", &args(100, Operation::Acquire { permits: 1 }))
            .await
            .unwrap();
        assert_eq!(code, CODE_SUCCESS);
    }

    #[tokio::test]
    async fn test_invalid_arguments_rejected() {
        let store = MemoryStore::new();
        let bad = vec!["acquire".to_string(), "not-a-time".to_string()];
        assert!(matches!(
            store.execute("k", &bad).await,
            Err(TollgateError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_record_surfaces_error() {
        let store = MemoryStore::new();
        let mut fields = HashMap::new();
        fields.insert("stored_permits".to_string(), "x".to_string());
        store.records.insert("k".to_string(), fields);

        let result = store.execute("k", &args(0, Operation::Acquire { permits: 1 })).await;
        assert!(matches!(result, Err(TollgateError::MalformedRecord(_))));
    }

    #[tokio::test]
    async fn test_server_time_follows_clock() {
        let clock = Arc::new(super::super::ManualClock::new(1_000));
        let store = MemoryStore::with_clock(clock.clone());
        assert_eq!(store.server_time().await.unwrap(), 1_000);
        clock.advance(5);
        assert_eq!(store.server_time().await.unwrap(), 1_005);
    }

    #[test]
    fn test_closed_store_rejects_calls() {
        let store = MemoryStore::new();
        tokio_test::block_on(store.close()).unwrap();
        assert!(tokio_test::block_on(store.server_time()).is_err());
        assert!(tokio_test::block_on(store.read_fields("k")).is_err());
        assert!(tokio_test::block_on(store.execute("k", &init_args(0, 1, 1, 1))).is_err());
    }
}
