//! In-memory storage adapter for testing.
//!
//! Records live in a `HashMap` behind a [`RwLock`]. Failure knobs let
//! downstream crates script unsupported backends, failing self-tests, and
//! mid-operation soft failures without touching a filesystem.

use crate::adapter::{self, StorageAdapter};
use crate::entry::CacheEntry;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use webstash_config::AdapterKind;

#[derive(Default)]
pub struct MemoryAdapter {
    storage: RwLock<HashMap<String, CacheEntry>>,
    unsupported: AtomicBool,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    writes: AtomicU64,
    reads: AtomicU64,
}

impl MemoryAdapter {
    /// Pre-populate the store.
    ///
    /// Panics on a duplicate key. If test setup is wrong, the test should
    /// not pass.
    pub fn with_entries(entries: impl IntoIterator<Item = CacheEntry>) -> Self {
        let mut map = HashMap::new();
        for entry in entries {
            if map.insert(entry.key.clone(), entry).is_some() {
                panic!("MemoryAdapter::with_entries: duplicate key");
            }
        }
        Self { storage: RwLock::new(map), ..Self::default() }
    }

    /// Report `is_supported() == false` from now on.
    pub fn mark_unsupported(self) -> Self {
        self.unsupported.store(true, Ordering::Relaxed);
        self
    }

    /// Every write (and therefore the open-time self-test) fails softly.
    pub fn fail_writes(self) -> Self {
        self.fail_writes.store(true, Ordering::Relaxed);
        self
    }

    /// Every read fails softly.
    pub fn fail_reads(self) -> Self {
        self.fail_reads.store(true, Ordering::Relaxed);
        self
    }

    /// Flip the write-failure knob mid-test.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of successful reads so far (hits and misses both count).
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Memory
    }

    // Deliberately not memoized process-wide: tests construct both
    // supported and unsupported instances in the same process.
    fn is_supported(&self) -> bool {
        !self.unsupported.load(Ordering::Relaxed)
    }

    async fn open(&self) -> Result<()> {
        adapter::self_test(self, "__memory_probe__").await
    }

    async fn create(&self, entry: &CacheEntry) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            exn::bail!(ErrorKind::Backend("scripted write failure".to_string()));
        }
        self.storage.write().await.insert(entry.key.clone(), entry.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<CacheEntry>> {
        if self.fail_reads.load(Ordering::Relaxed) {
            exn::bail!(ErrorKind::Backend("scripted read failure".to_string()));
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.storage.read().await.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.storage.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let adapter = MemoryAdapter::default();
        adapter.open().await.unwrap();
        adapter.create(&CacheEntry::new("k", "v", 1.0, 0, -1)).await.unwrap();
        assert_eq!(adapter.read("k").await.unwrap().unwrap().content, "v");
        adapter.remove("k").await.unwrap();
        adapter.remove("k").await.unwrap();
        assert!(adapter.read("k").await.unwrap().is_none());
        // Counters include the open-time self-test's sentinel traffic.
        assert_eq!(adapter.write_count(), 2);
        assert_eq!(adapter.read_count(), 3);
    }

    #[tokio::test]
    async fn test_failing_writes_fail_the_self_test() {
        let adapter = MemoryAdapter::default().fail_writes();
        let err = adapter.open().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::SelfTest));
    }

    #[tokio::test]
    async fn test_unsupported_knob() {
        let adapter = MemoryAdapter::default().mark_unsupported();
        assert!(!adapter.is_supported());
        assert!(MemoryAdapter::default().is_supported());
    }
}
