//! The cache controller: grouped, ordered, freshness-aware loading.

use crate::collab::Collaborators;
use crate::freshness;
use crate::resource::Resource;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use webstash_config::{Config, ResourceKind};
use webstash_storage::entry::now_ms;
use webstash_storage::manifest::ManifestHandle;
use webstash_storage::{CacheEntry, StorageController};

/// Some engines never fire an error signal for a bad script or stylesheet
/// element; an injection with no signal inside this window counts as
/// failed.
const INJECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Orchestrates resource loading against one storage controller and one
/// collaborator set.
pub struct CacheController {
    storage: Arc<StorageController>,
    collaborators: Collaborators,
}

impl CacheController {
    /// Construct the storage layer (adapter selection happens here) and
    /// bind the collaborators.
    pub async fn init(config: &Config, collaborators: Collaborators) -> Self {
        Self::init_with_manifest(config, collaborators, None).await
    }

    /// Same, handing the storage layer a running manifest lifecycle to
    /// hold on to.
    pub async fn init_with_manifest(
        config: &Config,
        collaborators: Collaborators,
        manifest: Option<ManifestHandle>,
    ) -> Self {
        let storage = StorageController::init_with_manifest(config, manifest).await;
        Self { storage, collaborators }
    }

    /// Handle onto the storage layer; shared with the public facade.
    pub fn storage(&self) -> Arc<StorageController> {
        self.storage.clone()
    }

    /// Load every resource, bucket by bucket.
    ///
    /// Buckets are keyed by the resolved `group` and execute strictly in
    /// ascending order — a resource in bucket *n+1* is not even read from
    /// storage until every bucket-*n* resource has completed its whole
    /// pipeline. Gaps in the numbering are skipped. Within one bucket
    /// resources race freely.
    #[instrument(skip_all, fields(resources = resources.len()))]
    pub async fn load(&self, resources: Vec<Resource>) {
        if resources.is_empty() {
            return;
        }
        let default_group = self.storage.resource_defaults().group;
        let mut buckets: BTreeMap<i32, Vec<Resource>> = BTreeMap::new();
        for resource in resources {
            let group = resource.group.unwrap_or(default_group);
            buckets.entry(group).or_default().push(resource);
        }
        for (group, bucket) in buckets {
            tracing::debug!(group, count = bucket.len(), "loading group");
            join_all(bucket.into_iter().map(|resource| self.load_resource(resource))).await;
        }
    }

    /// Remove every resource's record. Order doesn't matter here, so this
    /// is a plain completion count rather than the bucketed machinery.
    #[instrument(skip_all, fields(resources = resources.len()))]
    pub async fn remove(&self, resources: Vec<Resource>) {
        let total = resources.len();
        let results =
            join_all(resources.iter().map(|resource| self.storage.remove(&resource.url, resource.kind))).await;
        let removed = results
            .into_iter()
            .zip(&resources)
            .filter(|(result, resource)| match result {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(url = %resource.url, error = %err, "removal failed");
                    false
                },
            })
            .count();
        tracing::debug!(removed, total, "cache removal complete");
    }

    /// The per-resource pipeline: read, decide, fetch if needed, persist,
    /// inject, notify.
    async fn load_resource(&self, mut resource: Resource) {
        if resource.ajax.is_none() {
            resource.ajax = Some(self.storage.resource_defaults().ajax);
        }
        match self.storage.read(&resource.url, resource.kind).await {
            None => self.cold_create(&mut resource).await,
            Some(entry) => self.revalidate(&mut resource, entry).await,
        }
        if let Some(on_loaded) = resource.on_loaded.clone() {
            on_loaded(&resource);
        }
    }

    /// No record exists (or the storage layer is disabled, which looks the
    /// same): fetch, persist, inject. Persistence failure only costs the
    /// caching benefit, never the content.
    async fn cold_create(&self, resource: &mut Resource) {
        let Some(data) = self.fetch(resource).await else {
            tracing::warn!(url = %resource.url, "fetch failed with no cached copy to fall back on");
            return;
        };
        if let Err(err) = self.persist(resource, &data, false).await {
            tracing::warn!(url = %resource.url, error = %err, "could not persist, serving network copy unpersisted");
        }
        resource.data = Some(data);
        self.inject(resource, false).await;
    }

    /// A record exists: serve it if the freshness check passes — or if the
    /// environment is offline, where a stale copy beats no copy — else
    /// refetch and overwrite.
    async fn revalidate(&self, resource: &mut Resource, entry: CacheEntry) {
        let defaults = self.storage.resource_defaults().clone();
        resource.is_valid = freshness::is_resource_valid(resource, &entry, &defaults, now_ms());
        if resource.is_valid || !self.collaborators.environment.is_online() {
            tracing::debug!(url = %resource.url, valid = resource.is_valid, "serving cached copy");
            resource.data = Some(entry.content);
            self.inject(resource, false).await;
            return;
        }
        match self.fetch(resource).await {
            Some(data) => {
                if let Err(err) = self.persist(resource, &data, true).await {
                    tracing::warn!(url = %resource.url, error = %err, "could not persist refreshed copy");
                }
                resource.data = Some(data);
                self.inject(resource, true).await;
            },
            None => {
                // Same bias as offline: stale-but-present beats absent.
                tracing::warn!(url = %resource.url, "refresh fetch failed, serving stale copy");
                resource.data = Some(entry.content);
                self.inject(resource, false).await;
            },
        }
    }

    async fn fetch(&self, resource: &Resource) -> Option<String> {
        let ajax = resource.ajax.unwrap_or(true);
        self.collaborators.fetcher.fetch(&resource.url, ajax, resource.post_data.as_deref()).await
    }

    /// Create or overwrite the record with the caller's current metadata,
    /// restamping the expiry.
    async fn persist(&self, resource: &Resource, data: &str, is_update: bool) -> webstash_storage::error::Result<()> {
        let defaults = self.storage.resource_defaults();
        let version = resource.version.unwrap_or(defaults.version);
        let last_modified = resource.last_modified.unwrap_or(defaults.last_modified);
        let lifetime = resource.lifetime.unwrap_or(defaults.lifetime);
        match is_update {
            false => self.storage.create(&resource.url, resource.kind, data, version, last_modified, lifetime).await,
            true => self.storage.update(&resource.url, resource.kind, data, version, last_modified, lifetime).await,
        }
    }

    /// Dispatch to the injector. Script and style injections are bounded by
    /// [`INJECT_TIMEOUT`]; a timeout counts as a failed injection but still
    /// completes the resource, so a group fan-in can never hang on it.
    async fn inject(&self, resource: &Resource, is_update: bool) {
        let Some(data) = resource.data.as_deref() else {
            return;
        };
        let append = self.collaborators.injector.append(
            resource.kind,
            &resource.url,
            data,
            resource.target.as_ref(),
            is_update,
        );
        let succeeded = match resource.kind {
            ResourceKind::Script | ResourceKind::Style => match tokio::time::timeout(INJECT_TIMEOUT, append).await {
                Ok(succeeded) => succeeded,
                Err(_) => {
                    tracing::warn!(url = %resource.url, "no injection signal inside the timeout, assuming failure");
                    false
                },
            },
            _ => append.await,
        };
        if !succeeded {
            tracing::warn!(url = %resource.url, "injection reported failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::testing::{
        FixedEnvironment, RecordingInjector, ScriptedFetcher, StalledInjector, collaborators, collaborators_with_env,
    };
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use webstash_config::ResourceKind;

    fn test_config(root: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.adapters.defaults.root = Some(root.to_path_buf());
        config
    }

    async fn controller_with(root: &std::path::Path, set: Collaborators) -> CacheController {
        CacheController::init(&test_config(root), set).await
    }

    #[tokio::test]
    async fn test_cold_load_fetches_persists_and_injects_once() {
        let dir = tempfile::tempdir().unwrap();
        let (injector, fetcher, set) = collaborators();
        let controller = controller_with(dir.path(), set).await;

        controller.load(vec![Resource::new("https://example.com/a.js", ResourceKind::Script)]).await;

        assert_eq!(fetcher.fetch_count(), 1);
        let events = injector.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].url, "https://example.com/a.js");
        assert!(!events[0].is_update);
        // Persisted with the policy defaults.
        let entry = controller.storage().read("https://example.com/a.js", ResourceKind::Script).await.unwrap();
        assert_eq!(entry.version, 1.0);
        assert_eq!(entry.lifetime, -1);
    }

    #[tokio::test]
    async fn test_second_load_is_a_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let (injector, fetcher, set) = collaborators();
        let controller = controller_with(dir.path(), set).await;
        let request = || vec![Resource::new("https://example.com/a.js", ResourceKind::Script)];

        controller.load(request()).await;
        controller.load(request()).await;

        // One network fetch total; both loads injected the same content.
        assert_eq!(fetcher.fetch_count(), 1);
        let events = injector.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, events[1].data);
    }

    #[tokio::test]
    async fn test_groups_execute_strictly_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (_injector, _fetcher, set) = collaborators();
        let controller = controller_with(dir.path(), set).await;

        let order: Arc<Mutex<Vec<String>>> = Arc::default();
        let record = |order: &Arc<Mutex<Vec<String>>>| {
            let order = order.clone();
            move |resource: &Resource| order.lock().unwrap().push(resource.url.clone())
        };
        controller
            .load(vec![
                Resource::new("https://example.com/plugin.js", ResourceKind::Script)
                    .with_group(1)
                    .on_loaded(record(&order)),
                Resource::new("https://example.com/library.js", ResourceKind::Script)
                    .with_group(0)
                    .on_loaded(record(&order)),
            ])
            .await;

        let order = order.lock().unwrap();
        assert_eq!(*order, vec!["https://example.com/library.js", "https://example.com/plugin.js"]);
    }

    #[tokio::test]
    async fn test_group_gaps_are_skipped_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (injector, _fetcher, set) = collaborators();
        let controller = controller_with(dir.path(), set).await;

        controller
            .load(vec![
                Resource::new("https://example.com/late.js", ResourceKind::Script).with_group(40),
                Resource::new("https://example.com/early.js", ResourceKind::Script).with_group(1),
            ])
            .await;

        assert_eq!(injector.urls(), vec!["https://example.com/early.js", "https://example.com/late.js"]);
    }

    #[tokio::test]
    async fn test_offline_serves_stale_data() {
        let dir = tempfile::tempdir().unwrap();
        let (injector, fetcher, set) = collaborators_with_env(false);
        let controller = controller_with(dir.path(), set).await;
        // A record that is stale by time, present in storage.
        controller
            .storage()
            .create("https://example.com/a.css", ResourceKind::Style, "cached body", 1.0, 0, 1)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        controller.load(vec![Resource::new("https://example.com/a.css", ResourceKind::Style)]).await;

        // Never fetch while offline; the stale copy is served.
        assert_eq!(fetcher.fetch_count(), 0);
        assert_eq!(injector.events()[0].data, "cached body");
    }

    #[tokio::test]
    async fn test_zero_lifetime_always_refetches() {
        let dir = tempfile::tempdir().unwrap();
        let (injector, fetcher, set) = collaborators();
        let controller = controller_with(dir.path(), set).await;
        controller
            .storage()
            .create("https://example.com/live.js", ResourceKind::Script, "old", 1.0, 0, 0)
            .await
            .unwrap();

        controller.load(vec![Resource::new("https://example.com/live.js", ResourceKind::Script)]).await;

        assert_eq!(fetcher.fetch_count(), 1);
        let events = injector.events();
        assert!(events[0].is_update);
        assert_eq!(events[0].data, "payload://https://example.com/live.js");
        // The record was overwritten with the fresh copy.
        let entry = controller.storage().read("https://example.com/live.js", ResourceKind::Script).await.unwrap();
        assert_eq!(entry.content, "payload://https://example.com/live.js");
    }

    #[tokio::test]
    async fn test_version_bump_invalidates_and_restamps() {
        let dir = tempfile::tempdir().unwrap();
        let (_injector, fetcher, set) = collaborators();
        let controller = controller_with(dir.path(), set).await;
        controller
            .storage()
            .create("https://example.com/v.js", ResourceKind::Script, "v1", 1.0, 0, -1)
            .await
            .unwrap();

        controller
            .load(vec![Resource::new("https://example.com/v.js", ResourceKind::Script).with_version(2.0)])
            .await;

        assert_eq!(fetcher.fetch_count(), 1);
        let entry = controller.storage().read("https://example.com/v.js", ResourceKind::Script).await.unwrap();
        assert_eq!(entry.version, 2.0);
    }

    #[tokio::test]
    async fn test_matching_record_is_not_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let (injector, fetcher, set) = collaborators();
        let controller = controller_with(dir.path(), set).await;
        controller
            .storage()
            .create("https://example.com/lib.js", ResourceKind::Script, "cached", 1.0, 0, -1)
            .await
            .unwrap();

        controller.load(vec![Resource::new("https://example.com/lib.js", ResourceKind::Script)]).await;

        assert_eq!(fetcher.fetch_count(), 0);
        assert_eq!(injector.events()[0].data, "cached");
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_stale_copy() {
        let dir = tempfile::tempdir().unwrap();
        let injector = Arc::new(RecordingInjector::default());
        let fetcher = Arc::new(ScriptedFetcher::failing());
        let set = Collaborators {
            injector: injector.clone(),
            fetcher: fetcher.clone(),
            environment: Arc::new(FixedEnvironment(true)),
        };
        let controller = controller_with(dir.path(), set).await;
        controller
            .storage()
            .create("https://example.com/s.js", ResourceKind::Script, "stale", 1.0, 0, 0)
            .await
            .unwrap();

        controller.load(vec![Resource::new("https://example.com/s.js", ResourceKind::Script)]).await;

        assert_eq!(fetcher.fetch_count(), 1);
        assert_eq!(injector.events()[0].data, "stale");
    }

    #[tokio::test]
    async fn test_cold_fetch_failure_still_completes_the_group() {
        let dir = tempfile::tempdir().unwrap();
        let injector = Arc::new(RecordingInjector::default());
        let fetcher = Arc::new(ScriptedFetcher::failing());
        let set = Collaborators {
            injector: injector.clone(),
            fetcher: fetcher.clone(),
            environment: Arc::new(FixedEnvironment(true)),
        };
        let controller = controller_with(dir.path(), set).await;

        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        controller
            .load(vec![
                Resource::new("https://example.com/gone.js", ResourceKind::Script)
                    .on_loaded(move |_| _ = counter.fetch_add(1, Ordering::SeqCst)),
            ])
            .await;

        // Nothing injected, but the resource completed and notified.
        assert!(injector.events().is_empty());
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_loaded_fires_exactly_once_per_resource() {
        let dir = tempfile::tempdir().unwrap();
        let (_injector, _fetcher, set) = collaborators();
        let controller = controller_with(dir.path(), set).await;

        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        controller
            .load(vec![
                Resource::new("https://example.com/once.js", ResourceKind::Script)
                    .on_loaded(move |_| _ = counter.fetch_add(1, Ordering::SeqCst)),
            ])
            .await;
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_injection_times_out_instead_of_hanging() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::answering_everything());
        let set = Collaborators {
            injector: Arc::new(StalledInjector),
            fetcher: fetcher.clone(),
            environment: Arc::new(FixedEnvironment(true)),
        };
        let controller = controller_with(dir.path(), set).await;

        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        controller
            .load(vec![
                Resource::new("https://example.com/hang.js", ResourceKind::Script)
                    .on_loaded(move |_| _ = counter.fetch_add(1, Ordering::SeqCst)),
            ])
            .await;

        // The pipeline completed despite the injector never signalling.
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_storage_degrades_to_plain_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let (injector, fetcher, set) = collaborators();
        let mut config = test_config(dir.path());
        config.is_enabled = false;
        let controller = CacheController::init(&config, set).await;
        let request = || vec![Resource::new("https://example.com/a.js", ResourceKind::Script)];

        controller.load(request()).await;
        controller.load(request()).await;

        // No persistence layer: every load fetches, content still renders.
        assert_eq!(fetcher.fetch_count(), 2);
        assert_eq!(injector.events().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_input_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (injector, fetcher, set) = collaborators();
        let controller = controller_with(dir.path(), set).await;
        controller.load(Vec::new()).await;
        assert_eq!(fetcher.fetch_count(), 0);
        assert!(injector.events().is_empty());
    }

    #[tokio::test]
    async fn test_remove_clears_records_and_tolerates_absent_keys() {
        let dir = tempfile::tempdir().unwrap();
        let (_injector, _fetcher, set) = collaborators();
        let controller = controller_with(dir.path(), set).await;
        controller.load(vec![Resource::new("https://example.com/a.js", ResourceKind::Script)]).await;
        assert!(controller.storage().read("https://example.com/a.js", ResourceKind::Script).await.is_some());

        controller
            .remove(vec![
                Resource::new("https://example.com/a.js", ResourceKind::Script),
                Resource::new("https://example.com/never-cached.css", ResourceKind::Style),
            ])
            .await;

        assert!(controller.storage().read("https://example.com/a.js", ResourceKind::Script).await.is_none());
    }
}
