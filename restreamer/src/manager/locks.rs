//! Per-stream mutual exclusion.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// Registry of per-stream async mutexes.
///
/// Every read-modify-write of a stream's persisted state must run while
/// holding that stream's lock, which totally orders its transitions.
/// Different streams never contend.
pub struct StreamLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl StreamLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Get (or create) the lock for a stream.
    pub fn lock_for(&self, stream_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(stream_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry of a deleted stream.
    pub fn remove(&self, stream_id: &str) {
        self.locks.remove(stream_id);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for StreamLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_stream_gets_same_lock() {
        let locks = StreamLocks::new();
        let a = locks.lock_for("s1");
        let b = locks.lock_for("s1");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_different_streams_do_not_contend() {
        let locks = StreamLocks::new();
        let a = locks.lock_for("s1");
        let b = locks.lock_for("s2");

        let _guard_a = a.lock().await;
        // Acquiring s2's lock must not block on s1's guard.
        let _guard_b = b.try_lock().expect("s2 lock should be free");
    }

    #[tokio::test]
    async fn test_remove() {
        let locks = StreamLocks::new();
        locks.lock_for("s1");
        assert_eq!(locks.len(), 1);
        locks.remove("s1");
        assert!(locks.is_empty());
    }
}
