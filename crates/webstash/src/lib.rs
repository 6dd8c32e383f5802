//! webstash: a persisted web-asset cache.
//!
//! Given a list of requested assets (scripts, stylesheets, images, HTML
//! fragments), webstash decides whether a previously persisted copy is
//! still valid and hands it to your injector without a network round trip;
//! otherwise it fetches, persists, and injects. Storage runs on whichever
//! backend survives capability probing — flat-file key/value, object
//! store, embedded SQLite, sandboxed file tree — and degrades to plain
//! fetch-and-inject when none do.
//!
//! # Example
//!
//! ```no_run
//! use webstash::{Cache, Config, Resource, ResourceKind};
//! # use webstash::Collaborators;
//!
//! # async fn example(collaborators: Collaborators) -> webstash::error::Result<()> {
//! let cache = Cache::with_collaborators(collaborators);
//! cache.setup(Config::default());
//!
//! // Library first, plugin second; same-group resources race.
//! cache
//!     .load(vec![
//!         Resource::new("https://cdn.example.com/lib.js", ResourceKind::Script).with_group(0),
//!         Resource::new("https://cdn.example.com/plugin.js", ResourceKind::Script).with_group(1),
//!     ])
//!     .await?
//!     .remove(vec![Resource::new("https://cdn.example.com/old.css", ResourceKind::Style)])
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
mod registry;

use crate::error::Result;
use crate::registry::{Hub, Op, OpOutcome};
use std::sync::Arc;
pub use webstash_config::{
    AdapterConfig, AdapterDefaults, AdapterKind, AdapterPolicy, Config, KvLifetime, ResourceConfig, ResourceDefaults,
    ResourceKind,
};
pub use webstash_loader::{Collaborators, Environment, Fetcher, Injector, OnLoaded, Resource, TargetNode};
pub use webstash_storage::manifest::{
    ManifestCache, ManifestEvent, ManifestHandle, ManifestOutcome, ManifestStatus, UpdatePrompt,
};
pub use webstash_storage::{CacheEntry, StorageController};

/// The public surface.
///
/// Cheap to clone; all clones share one controller registry, so two calls
/// with structurally equal configs — whatever their provenance — always
/// resolve to the same underlying controller.
#[derive(Clone)]
pub struct Cache {
    hub: Arc<Hub>,
}

impl Cache {
    pub fn new(
        injector: Arc<dyn Injector>,
        fetcher: Arc<dyn Fetcher>,
        environment: Arc<dyn Environment>,
    ) -> Self {
        Self::with_collaborators(Collaborators { injector, fetcher, environment })
    }

    pub fn with_collaborators(collaborators: Collaborators) -> Self {
        Self { hub: Arc::new(Hub::new(collaborators)) }
    }

    /// Replace the default configuration used when `load`/`remove` are
    /// called without an explicit one. Pure assignment, no validation.
    pub fn setup(&self, config: Config) {
        self.hub.setup(config);
    }

    /// Attach a running manifest lifecycle. Controllers constructed from
    /// here on hold the handle and expose it via
    /// [`StorageController::manifest`].
    pub fn attach_manifest(&self, handle: ManifestHandle) {
        self.hub.attach_manifest(handle);
    }

    /// Load resources under the default configuration. Returns `&Self` so
    /// calls chain fluently.
    pub async fn load(&self, resources: Vec<Resource>) -> Result<&Self> {
        self.load_with(resources, None).await?;
        Ok(self)
    }

    /// Load resources, optionally under an explicit configuration, and get
    /// the storage controller serving them back.
    pub async fn load_with(&self, resources: Vec<Resource>, config: Option<Config>) -> Result<Arc<StorageController>> {
        match self.hub.dispatch(config, Op::Load(resources)).await? {
            OpOutcome::Loaded(storage) => Ok(storage),
            OpOutcome::Removed => unreachable!("load dispatched as remove"),
        }
    }

    /// Remove resources' persisted records under the default configuration.
    /// Returns `&Self` so calls chain fluently.
    pub async fn remove(&self, resources: Vec<Resource>) -> Result<&Self> {
        self.remove_with(resources, None).await?;
        Ok(self)
    }

    /// Remove resources' persisted records, optionally under an explicit
    /// configuration. Removing what was never cached still succeeds.
    pub async fn remove_with(&self, resources: Vec<Resource>, config: Option<Config>) -> Result<()> {
        self.hub.dispatch(config, Op::Remove(resources)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webstash_loader::collab::testing;

    fn config_at(root: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.adapters.defaults.root = Some(root.to_path_buf());
        config
    }

    #[tokio::test]
    async fn test_end_to_end_cold_load_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let (injector, fetcher, set) = testing::collaborators();
        let cache = Cache::with_collaborators(set);
        cache.setup(config_at(dir.path()));

        let request = || vec![Resource::new("https://example.com/a.js", ResourceKind::Script)];
        let storage = cache.load_with(request(), None).await.unwrap();

        // Cold: one fetch, one injection, entry persisted with defaults.
        assert_eq!(fetcher.fetch_count(), 1);
        assert_eq!(injector.events().len(), 1);
        let entry = storage.read("https://example.com/a.js", ResourceKind::Script).await.unwrap();
        assert_eq!(entry.version, 1.0);
        assert_eq!(entry.lifetime, -1);

        // Warm: no further fetch, same content injected again.
        cache.load(request()).await.unwrap();
        assert_eq!(fetcher.fetch_count(), 1);
        let events = injector.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, events[1].data);
    }

    #[tokio::test]
    async fn test_deep_equal_configs_share_one_controller() {
        let dir = tempfile::tempdir().unwrap();
        let (_injector, _fetcher, set) = testing::collaborators();
        let cache = Cache::with_collaborators(set);

        // Two structurally identical configs, separate allocations.
        let first = cache.load_with(Vec::new(), Some(config_at(dir.path()))).await.unwrap();
        let second = cache.load_with(Vec::new(), Some(config_at(dir.path()))).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // A structurally different config resolves to its own controller.
        let mut other = config_at(dir.path());
        other.adapters.preferred = Some(AdapterKind::Relational);
        let third = cache.load_with(Vec::new(), Some(other)).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn test_concurrent_cold_start_runs_every_call_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let (injector, fetcher, set) = testing::collaborators();
        let cache = Cache::with_collaborators(set);
        cache.setup(config_at(dir.path()));

        // Fire load and remove back-to-back before the controller exists.
        let load = cache.load(vec![Resource::new("https://example.com/a.js", ResourceKind::Script)]);
        let remove = cache.remove(vec![Resource::new("https://example.com/b.css", ResourceKind::Style)]);
        let (loaded, removed) = tokio::join!(load, remove);
        loaded.unwrap();
        removed.unwrap();

        // Each executed exactly once against the same controller.
        assert_eq!(fetcher.fetch_count(), 1);
        assert_eq!(injector.events().len(), 1);
    }

    #[tokio::test]
    async fn test_chained_load_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let (_injector, _fetcher, set) = testing::collaborators();
        let cache = Cache::with_collaborators(set);
        cache.setup(config_at(dir.path()));

        let resource = || vec![Resource::new("https://example.com/a.js", ResourceKind::Script)];
        cache.load(resource()).await.unwrap().remove(resource()).await.unwrap();

        let storage = cache.load_with(Vec::new(), None).await.unwrap();
        assert!(storage.read("https://example.com/a.js", ResourceKind::Script).await.is_none());
    }

    #[tokio::test]
    async fn test_empty_resource_list_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let (injector, fetcher, set) = testing::collaborators();
        let cache = Cache::with_collaborators(set);
        cache.setup(config_at(dir.path()));
        cache.load(Vec::new()).await.unwrap().remove(Vec::new()).await.unwrap();
        assert_eq!(fetcher.fetch_count(), 0);
        assert!(injector.events().is_empty());
    }

    #[tokio::test]
    async fn test_attached_manifest_reaches_the_storage_controller() {
        let dir = tempfile::tempdir().unwrap();
        let (_injector, _fetcher, set) = testing::collaborators();
        let cache = Cache::with_collaborators(set);
        cache.setup(config_at(dir.path()));

        struct NeverReload;
        impl UpdatePrompt for NeverReload {
            fn should_reload(&self) -> bool {
                false
            }
        }
        let (events, rx) = tokio::sync::mpsc::channel(4);
        let (lifecycle, handle) = ManifestCache::new(rx, Arc::new(NeverReload));
        cache.attach_manifest(handle);
        let runner = tokio::spawn(lifecycle.run());

        let storage = cache.load_with(Vec::new(), None).await.unwrap();
        let attached = storage.manifest().unwrap();
        assert_eq!(attached.progress(), 0);

        events.send(ManifestEvent::Checking).await.unwrap();
        events.send(ManifestEvent::Cached).await.unwrap();
        assert_eq!(runner.await.unwrap(), ManifestOutcome::Loaded(ManifestStatus::Cached));
        assert_eq!(attached.progress(), 100);
        assert_eq!(attached.status(), ManifestStatus::Cached);
    }

    #[tokio::test]
    async fn test_offline_serves_stale_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let (injector, fetcher, set) = testing::collaborators_with_env(false);
        let cache = Cache::with_collaborators(set);
        cache.setup(config_at(dir.path()));

        // Seed a stale-by-time record directly through the controller.
        let storage = cache.load_with(Vec::new(), None).await.unwrap();
        storage.create("https://example.com/s.css", ResourceKind::Style, "stale body", 1.0, 0, 1).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        cache.load(vec![Resource::new("https://example.com/s.css", ResourceKind::Style)]).await.unwrap();
        assert_eq!(fetcher.fetch_count(), 0);
        assert_eq!(injector.events()[0].data, "stale body");
    }
}
