//! Storage adapter trait and implementations.
//!
//! This module defines the `StorageAdapter` trait, which provides a unified
//! interface for cache-record operations across different persistence
//! technologies (flat-file key/value snapshot, record-per-key object store,
//! embedded SQLite, sandboxed file tree).

mod file_tree;
mod keyvalue;
#[cfg(feature = "mock")]
mod memory;
mod object_store;
mod relational;

pub use self::file_tree::FileTreeAdapter;
pub use self::keyvalue::KeyValueAdapter;
#[cfg(feature = "mock")]
pub use self::memory::MemoryAdapter;
pub use self::object_store::ObjectStoreAdapter;
pub use self::relational::RelationalAdapter;
use crate::AdapterHandle;
use crate::entry::CacheEntry;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use webstash_config::{AdapterDefaults, AdapterKind, KvLifetime};

/// Unified interface for storage adapters.
///
/// All operations are asynchronous and record-typed: callers hand over a
/// whole [`CacheEntry`] and get a whole one back. How the metadata is laid
/// out physically (JSON blob, SQL columns) is the adapter's business.
///
/// # Contract
/// - `open` is idempotent: concurrent and repeat calls coalesce onto one
///   setup run, and a successful open is never repeated. First open runs a
///   self-test (create a sentinel record, read it back, delete it) so that
///   backends which claim support but fail at write time are caught before
///   anything relies on them.
/// - `create` inserts or blind-overwrites; it never partial-fails silently.
/// - `read` returns `Ok(None)` for an absent key. An `Err` is a soft
///   failure the controller will degrade to a miss.
/// - `update` is semantically `create` (records are overwritten wholesale),
///   so it defaults to it.
/// - `remove` is idempotent; removing an absent key succeeds.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    fn kind(&self) -> AdapterKind;

    /// Pure capability probe, memoized process-wide per variant: computed
    /// once, cached forever, never re-probed even if the environment
    /// changes underneath us. Capability doesn't change mid-session.
    fn is_supported(&self) -> bool;

    async fn open(&self) -> Result<()>;

    async fn create(&self, entry: &CacheEntry) -> Result<()>;

    async fn read(&self, key: &str) -> Result<Option<CacheEntry>>;

    async fn update(&self, entry: &CacheEntry) -> Result<()> {
        self.create(entry).await
    }

    async fn remove(&self, key: &str) -> Result<()>;
}

/// Construct the adapter for a kind. Returns `None` for kinds not compiled
/// into this build (the in-memory adapter outside the `mock` feature).
pub fn build(kind: AdapterKind, settings: &AdapterSettings) -> Option<AdapterHandle> {
    match kind {
        AdapterKind::KeyValue => Some(Arc::new(KeyValueAdapter::new(settings.clone()))),
        AdapterKind::ObjectStore => Some(Arc::new(ObjectStoreAdapter::new(settings.clone()))),
        AdapterKind::Relational => Some(Arc::new(RelationalAdapter::new(settings.clone()))),
        AdapterKind::FileTree => Some(Arc::new(FileTreeAdapter::new(settings.clone()))),
        #[cfg(feature = "mock")]
        AdapterKind::Memory => Some(Arc::new(MemoryAdapter::default())),
        #[cfg(not(feature = "mock"))]
        AdapterKind::Memory => None,
    }
}

/// Everything an adapter needs to know at construction time, resolved from
/// the configured [`AdapterDefaults`]. Not every adapter reads every field.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    /// Storage root; adapters namespace themselves underneath it.
    pub root: PathBuf,
    pub name: String,
    /// Schema version the object store and relational adapters migrate to.
    pub schema_version: String,
    pub table: String,
    pub description: String,
    /// Byte quota for the key/value snapshot.
    pub quota: u64,
    /// Key for the open-time self-test sentinel.
    pub sentinel_key: String,
    pub lifetime: KvLifetime,
}

impl AdapterSettings {
    /// Resolve settings from configured defaults, falling back to the
    /// platform data directory for the root.
    pub fn resolve(defaults: &AdapterDefaults) -> Result<Self> {
        let root = match &defaults.root {
            Some(root) => root.clone(),
            None => webstash_config::storage_root()
                .map_err(|e| e.raise(ErrorKind::Backend("no default storage root".to_string())))?,
        };
        Ok(Self {
            root,
            name: defaults.name.clone(),
            schema_version: defaults.version.clone(),
            table: defaults.table.clone(),
            description: defaults.description.clone(),
            quota: defaults.size,
            sentinel_key: defaults.key.clone(),
            lifetime: defaults.lifetime,
        })
    }
}

/// Write a sentinel record, read it back, verify, delete it.
///
/// Run by every adapter at the end of its first `open`. Catches backends
/// that report "supported" but fail at actual write time (quota pressure,
/// restricted filesystems). A failure here reports as [`ErrorKind::SelfTest`]
/// and never panics.
pub(crate) async fn self_test<A: StorageAdapter + ?Sized>(adapter: &A, sentinel_key: &str) -> Result<()> {
    const SENTINEL_CONTENT: &str = "webstash-self-test";
    let sentinel = CacheEntry::new(sentinel_key, SENTINEL_CONTENT, 0.0, 0, -1);
    adapter.create(&sentinel).await.map_err(|e| e.raise(ErrorKind::SelfTest))?;
    let readback = adapter.read(sentinel_key).await.map_err(|e| e.raise(ErrorKind::SelfTest))?;
    if readback.as_ref().map(|entry| entry.content.as_str()) != Some(SENTINEL_CONTENT) {
        exn::bail!(ErrorKind::SelfTest);
    }
    adapter.remove(sentinel_key).await.map_err(|e| e.raise(ErrorKind::SelfTest))?;
    Ok(())
}

/// Shared capability probe for filesystem-backed variants: can this process
/// write to its scratch space at all? Each variant memoizes the answer in
/// its own `OnceLock`.
pub(crate) fn scratch_writable() -> bool {
    let path = std::env::temp_dir().join(format!("webstash-probe-{}", std::process::id()));
    match std::fs::write(&path, b"probe") {
        Ok(()) => {
            let ok = std::fs::read(&path).map(|data| data == b"probe").unwrap_or(false);
            let _ = std::fs::remove_file(&path);
            ok
        },
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_probe_succeeds_on_a_normal_system() {
        assert!(scratch_writable());
    }

    #[test]
    fn test_settings_resolution_prefers_configured_root() {
        let defaults = AdapterDefaults { root: Some(PathBuf::from("/tmp/webstash-test")), ..AdapterDefaults::default() };
        let settings = AdapterSettings::resolve(&defaults).unwrap();
        assert_eq!(settings.root, PathBuf::from("/tmp/webstash-test"));
        assert_eq!(settings.table, "entries");
        assert_eq!(settings.sentinel_key, "__webstash_probe__");
    }
}
