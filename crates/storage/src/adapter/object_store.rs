//! Record-per-key object store adapter.
//!
//! One JSON record file per key (filename = BLAKE3 of the key) inside a
//! namespaced directory, plus a store descriptor carrying the schema
//! version. Mutations commit through temp-file-plus-rename, so a record is
//! either fully present or not there at all.
//!
//! First open takes one of two paths — a fresh store (no descriptor:
//! create it) or an upgrade (descriptor with an older version: migrate it
//! forward) — both converging on the same ready state before the
//! self-test runs.

use crate::adapter::{self, AdapterSettings, StorageAdapter};
use crate::entry::CacheEntry;
use crate::error::{ErrorKind, Result};
use crate::key;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs;
use tokio::sync::OnceCell;
use webstash_config::AdapterKind;

static SUPPORTED: OnceLock<bool> = OnceLock::new();

const DESCRIPTOR_FILE: &str = "store.json";

/// Store-level metadata, persisted next to the records.
#[derive(Debug, Serialize, Deserialize)]
struct Descriptor {
    version: String,
    description: String,
}

pub struct ObjectStoreAdapter {
    settings: AdapterSettings,
    dir: PathBuf,
    ready: OnceCell<()>,
}

impl ObjectStoreAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        let dir = settings.root.join(&settings.name).join("objects");
        Self { settings, dir, ready: OnceCell::new() }
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(key::hashed_name(key))
    }

    async fn write_descriptor(&self) -> Result<()> {
        let descriptor = Descriptor {
            version: self.settings.schema_version.clone(),
            description: self.settings.description.clone(),
        };
        let payload = serde_json::to_string(&descriptor).map_err(|_| exn::Exn::from(ErrorKind::Serialization))?;
        commit(&self.dir.join(DESCRIPTOR_FILE), &payload).await
    }

    async fn setup(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await.map_err(ErrorKind::Io)?;
        let descriptor_path = self.dir.join(DESCRIPTOR_FILE);
        match fs::read_to_string(&descriptor_path).await {
            // Fresh store: no descriptor yet.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %self.dir.display(), "creating object store");
                self.write_descriptor().await?;
            },
            Ok(raw) => {
                let descriptor: Option<Descriptor> = serde_json::from_str(&raw).ok();
                match descriptor {
                    Some(descriptor) if descriptor.version == self.settings.schema_version => {},
                    // Upgrade: descriptor exists but carries another
                    // version. Records are self-describing JSON, so the
                    // migration is a descriptor rewrite.
                    Some(descriptor) => {
                        tracing::info!(
                            from = %descriptor.version,
                            to = %self.settings.schema_version,
                            "upgrading object store"
                        );
                        self.write_descriptor().await?;
                    },
                    None => {
                        tracing::warn!(path = %descriptor_path.display(), "store descriptor corrupt, rewriting");
                        self.write_descriptor().await?;
                    },
                }
            },
            Err(err) => exn::bail!(ErrorKind::Io(err)),
        }
        adapter::self_test(self, &self.settings.sentinel_key).await
    }
}

/// Atomic single-record commit: write the payload beside the target, then
/// rename over it.
async fn commit(path: &Path, payload: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, payload).await.map_err(ErrorKind::Io)?;
    fs::rename(&tmp, path).await.map_err(ErrorKind::Io)?;
    Ok(())
}

#[async_trait]
impl StorageAdapter for ObjectStoreAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::ObjectStore
    }

    fn is_supported(&self) -> bool {
        *SUPPORTED.get_or_init(adapter::scratch_writable)
    }

    async fn open(&self) -> Result<()> {
        self.ready.get_or_try_init(|| self.setup()).await?;
        Ok(())
    }

    async fn create(&self, entry: &CacheEntry) -> Result<()> {
        key::validate(&entry.key)?;
        let payload = serde_json::to_string(entry).map_err(|_| exn::Exn::from(ErrorKind::Serialization))?;
        commit(&self.record_path(&entry.key), &payload).await
    }

    async fn read(&self, key: &str) -> Result<Option<CacheEntry>> {
        key::validate(key)?;
        let raw = match fs::read_to_string(self.record_path(key)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => exn::bail!(ErrorKind::Io(err)),
        };
        let entry = serde_json::from_str(&raw).map_err(|_| exn::Exn::from(ErrorKind::Serialization))?;
        Ok(Some(entry))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        key::validate(key)?;
        match fs::remove_file(self.record_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => exn::bail!(ErrorKind::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webstash_config::KvLifetime;

    fn settings(root: &std::path::Path) -> AdapterSettings {
        AdapterSettings {
            root: root.to_path_buf(),
            name: "webstash".to_string(),
            schema_version: "1.0".to_string(),
            table: "entries".to_string(),
            description: "test".to_string(),
            quota: 64 * 1024,
            sentinel_key: "__probe__".to_string(),
            lifetime: KvLifetime::Local,
        }
    }

    #[tokio::test]
    async fn test_fresh_open_writes_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ObjectStoreAdapter::new(settings(dir.path()));
        adapter.open().await.unwrap();
        let descriptor = dir.path().join("webstash").join("objects").join(DESCRIPTOR_FILE);
        let raw = std::fs::read_to_string(descriptor).unwrap();
        assert!(raw.contains("\"1.0\""));
    }

    #[tokio::test]
    async fn test_upgrade_path_rewrites_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        {
            let adapter = ObjectStoreAdapter::new(settings(dir.path()));
            adapter.open().await.unwrap();
            adapter.create(&CacheEntry::new("k", "v", 1.0, 0, -1)).await.unwrap();
        }
        let mut upgraded = settings(dir.path());
        upgraded.schema_version = "2.0".to_string();
        let adapter = ObjectStoreAdapter::new(upgraded);
        adapter.open().await.unwrap();
        // Existing records survive the upgrade.
        assert_eq!(adapter.read("k").await.unwrap().unwrap().content, "v");
        let descriptor = dir.path().join("webstash").join("objects").join(DESCRIPTOR_FILE);
        assert!(std::fs::read_to_string(descriptor).unwrap().contains("\"2.0\""));
    }

    #[tokio::test]
    async fn test_create_read_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ObjectStoreAdapter::new(settings(dir.path()));
        adapter.open().await.unwrap();
        let entry = CacheEntry::new("https://example.com/app.js?v=3", "let x = 1;", 3.0, 123, 60_000);
        adapter.create(&entry).await.unwrap();
        let back = adapter.read(&entry.key).await.unwrap().unwrap();
        assert_eq!(back, entry);
        adapter.remove(&entry.key).await.unwrap();
        assert!(adapter.read(&entry.key).await.unwrap().is_none());
        // Idempotent
        adapter.remove(&entry.key).await.unwrap();
    }

    #[tokio::test]
    async fn test_metadata_fields_are_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ObjectStoreAdapter::new(settings(dir.path()));
        adapter.open().await.unwrap();
        let entry = CacheEntry::new("k", "v", 4.5, 1_700_000_000_000, 30_000);
        adapter.create(&entry).await.unwrap();
        let back = adapter.read("k").await.unwrap().unwrap();
        assert_eq!(back.version, 4.5);
        assert_eq!(back.last_modified, 1_700_000_000_000);
        assert_eq!(back.lifetime, 30_000);
        assert_eq!(back.expires_at, entry.expires_at);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_a_soft_failure() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = ObjectStoreAdapter::new(settings(dir.path()));
        adapter.open().await.unwrap();
        std::fs::write(adapter.record_path("poisoned"), "{not json").unwrap();
        let err = adapter.read("poisoned").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Serialization));
    }
}
