//! Flat-file key/value snapshot adapter.
//!
//! The whole store is one file: a CRC32 checksum line followed by a JSON
//! map of every record. The map lives in memory once opened; every mutation
//! rewrites the snapshot through a temp-file-plus-rename so a crash can
//! never leave a half-written store behind (a bad checksum on load is
//! treated as an empty store, not an error).
//!
//! Honors a byte quota on the serialized snapshot. Exceeding it is a soft
//! failure that leaves the store untouched.

use crate::adapter::{self, AdapterSettings, StorageAdapter};
use crate::entry::CacheEntry;
use crate::error::{ErrorKind, Result};
use crate::key;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use tokio::fs;
use tokio::sync::{OnceCell, RwLock};
use webstash_config::{AdapterKind, KvLifetime};

static SUPPORTED: OnceLock<bool> = OnceLock::new();

pub struct KeyValueAdapter {
    settings: AdapterSettings,
    path: PathBuf,
    map: RwLock<HashMap<String, CacheEntry>>,
    ready: OnceCell<()>,
}

impl KeyValueAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        let path = match settings.lifetime {
            KvLifetime::Local => settings.root.join(&settings.name).join("kv.snapshot"),
            // A session store is a per-process file: a new process is a new
            // session, and nothing from a previous run is ever visible.
            KvLifetime::Session => {
                std::env::temp_dir().join(format!("{}-session-{}.kv", settings.name, std::process::id()))
            },
        };
        Self {
            settings,
            path,
            map: RwLock::new(HashMap::new()),
            ready: OnceCell::new(),
        }
    }

    /// Parse a snapshot file: checksum line, newline, JSON payload.
    ///
    /// Any mismatch or parse failure means a torn or foreign file; the
    /// store starts empty rather than refusing to open.
    fn parse_snapshot(raw: &str) -> Option<HashMap<String, CacheEntry>> {
        let (checksum_line, payload) = raw.split_once('\n')?;
        let recorded = u32::from_str_radix(checksum_line.trim(), 16).ok()?;
        if crc32fast::hash(payload.as_bytes()) != recorded {
            return None;
        }
        serde_json::from_str(payload).ok()
    }

    async fn load(&self) -> Result<()> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => exn::bail!(ErrorKind::Io(err)),
        };
        match Self::parse_snapshot(&raw) {
            Some(loaded) => {
                let mut map = self.map.write().await;
                *map = loaded;
            },
            None => {
                tracing::warn!(path = %self.path.display(), "key/value snapshot corrupt, starting empty");
            },
        }
        Ok(())
    }

    /// Serialize the map, enforce the quota, and commit atomically.
    /// Returns the serialized size on success.
    async fn persist(&self, map: &HashMap<String, CacheEntry>) -> Result<u64> {
        let payload = serde_json::to_string(map).map_err(|_| exn::Exn::from(ErrorKind::Serialization))?;
        let used = payload.len() as u64;
        if used > self.settings.quota {
            exn::bail!(ErrorKind::QuotaExceeded { used, quota: self.settings.quota });
        }
        let contents = format!("{:08x}\n{payload}", crc32fast::hash(payload.as_bytes()));
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents).await.map_err(ErrorKind::Io)?;
        fs::rename(&tmp, &self.path).await.map_err(ErrorKind::Io)?;
        Ok(used)
    }

    async fn setup(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
        }
        self.load().await?;
        adapter::self_test(self, &self.settings.sentinel_key).await
    }
}

#[async_trait]
impl StorageAdapter for KeyValueAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::KeyValue
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
        let mut map = self.map.write().await;
        let previous = map.insert(entry.key.clone(), entry.clone());
        match self.persist(&map).await {
            Ok(_) => Ok(()),
            Err(err) => {
                // Roll the map back so memory and disk agree.
                match previous {
                    Some(previous) => map.insert(entry.key.clone(), previous),
                    None => map.remove(&entry.key),
                };
                Err(err)
            },
        }
    }

    async fn read(&self, key: &str) -> Result<Option<CacheEntry>> {
        key::validate(key)?;
        Ok(self.map.read().await.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        key::validate(key)?;
        let mut map = self.map.write().await;
        if map.remove(key).is_some() {
            self.persist(&map).await?;
        }
        Ok(())
    }
}
