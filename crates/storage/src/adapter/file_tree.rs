//! Sandboxed file-tree adapter.
//!
//! Records are laid out as one JSON file per key at a path that mirrors the
//! URL structure (`host/path/file.ext.json`), which makes the cache
//! browsable with ordinary filesystem tools. Key-to-path mapping is
//! traversal-safe: a key can never name a file outside the tree root.

use crate::adapter::{self, AdapterSettings, StorageAdapter};
use crate::entry::CacheEntry;
use crate::error::{ErrorKind, Result};
use crate::key;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::OnceLock;
use tokio::fs;
use tokio::sync::OnceCell;
use webstash_config::AdapterKind;

static SUPPORTED: OnceLock<bool> = OnceLock::new();

pub struct FileTreeAdapter {
    settings: AdapterSettings,
    root: PathBuf,
    ready: OnceCell<()>,
}

impl FileTreeAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        let root = settings.root.join(&settings.name).join("tree");
        Self { settings, root, ready: OnceCell::new() }
    }

    fn record_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(key::tree_path(key)?))
    }

    async fn setup(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await.map_err(ErrorKind::Io)?;
        adapter::self_test(self, &self.settings.sentinel_key).await
    }
}

#[async_trait]
impl StorageAdapter for FileTreeAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::FileTree
    }

    fn is_supported(&self) -> bool {
        *SUPPORTED.get_or_init(adapter::scratch_writable)
    }

    async fn open(&self) -> Result<()> {
        self.ready.get_or_try_init(|| self.setup()).await?;
        Ok(())
    }

    async fn create(&self, entry: &CacheEntry) -> Result<()> {
        let path = self.record_path(&entry.key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
        }
        let payload = serde_json::to_string(entry).map_err(|_| exn::Exn::from(ErrorKind::Serialization))?;
        fs::write(&path, payload).await.map_err(ErrorKind::Io)?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.record_path(key)?;
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => exn::bail!(ErrorKind::Io(err)),
        };
        let entry = serde_json::from_str(&raw).map_err(|_| exn::Exn::from(ErrorKind::Serialization))?;
        Ok(Some(entry))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.record_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => exn::bail!(ErrorKind::Io(err)),
        }
    }
}
