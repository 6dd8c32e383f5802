//! Storage controller: one uniform CRUD surface over whichever adapter
//! survives capability probing.
//!
//! Selection runs once at init and is immutable afterwards. When nothing
//! survives — every probe negative, every self-test failed, or persistence
//! switched off in config — the controller still satisfies the contract:
//! every read is a miss and every write a no-op, so the layer above
//! degrades to plain fetch-and-inject without special-casing.

use crate::AdapterHandle;
use crate::adapter::{self, AdapterSettings};
use crate::entry::{CacheEntry, now_ms};
use crate::error::Result;
use crate::manifest::ManifestHandle;
use std::sync::Arc;
use tracing::instrument;
use webstash_config::{AdapterKind, AdapterPolicy, Config, ResourceDefaults, ResourceKind};

pub struct StorageController {
    /// The adopted adapter and the per-kind flags it was listed with.
    adapter: Option<(AdapterHandle, AdapterPolicy)>,
    defaults: ResourceDefaults,
    manifest: Option<ManifestHandle>,
}

impl StorageController {
    /// Probe candidates and adopt the first adapter that opens. Never
    /// fails: an unusable environment yields a disabled controller.
    #[instrument(skip_all, name = "storage init")]
    pub async fn init(config: &Config) -> Arc<Self> {
        Self::init_with_manifest(config, None).await
    }

    /// Same, holding a handle onto a running manifest lifecycle.
    pub async fn init_with_manifest(config: &Config, manifest: Option<ManifestHandle>) -> Arc<Self> {
        let defaults = config.resources.defaults.clone();
        if !config.is_enabled {
            tracing::info!("persistence disabled by configuration");
            return Arc::new(Self { adapter: None, defaults, manifest });
        }
        let adapter = match AdapterSettings::resolve(&config.adapters.defaults) {
            Ok(settings) => Self::select(config, &settings).await,
            Err(err) => {
                tracing::warn!(error = %err, "could not resolve storage settings, disabling persistence");
                None
            },
        };
        Arc::new(Self { adapter, defaults, manifest })
    }

    /// Walk the candidate list in order (preferred kind pulled to the
    /// front); the first one that probes supported and passes its
    /// open-time self-test wins.
    async fn select(config: &Config, settings: &AdapterSettings) -> Option<(AdapterHandle, AdapterPolicy)> {
        let mut candidates = config.adapters.candidates();
        if let Some(preferred) = config.adapters.preferred
            && let Some(position) = candidates.iter().position(|candidate| candidate.kind == preferred)
        {
            let policy = candidates.remove(position);
            candidates.insert(0, policy);
        }
        for policy in candidates {
            let Some(adapter) = adapter::build(policy.kind, settings) else {
                tracing::debug!(kind = %policy.kind, "adapter not compiled into this build");
                continue;
            };
            if !adapter.is_supported() {
                tracing::debug!(kind = %policy.kind, "backend unsupported");
                continue;
            }
            match adapter.open().await {
                Ok(()) => {
                    tracing::info!(kind = %policy.kind, "storage adapter adopted");
                    return Some((adapter, policy));
                },
                Err(err) => tracing::warn!(kind = %policy.kind, error = %err, "adapter failed to open"),
            }
        }
        tracing::warn!("no storage adapter available, degrading to fetch-only");
        None
    }

    pub fn is_enabled(&self) -> bool {
        self.adapter.is_some()
    }

    pub fn adapter_kind(&self) -> Option<AdapterKind> {
        self.adapter.as_ref().map(|(adapter, _)| adapter.kind())
    }

    /// The resource-default policy callers fall back to for unset fields.
    pub fn resource_defaults(&self) -> &ResourceDefaults {
        &self.defaults
    }

    pub fn manifest(&self) -> Option<&ManifestHandle> {
        self.manifest.as_ref()
    }

    /// The adapter, if there is one and its flags allow this resource kind.
    fn gate(&self, kind: ResourceKind) -> Option<&AdapterHandle> {
        let (adapter, policy) = self.adapter.as_ref()?;
        policy.allows(kind).then_some(adapter)
    }

    /// Look up a cached record. Every failure mode — disabled controller,
    /// gated kind, backend error, corrupt record — is a miss.
    pub async fn read(&self, url: &str, kind: ResourceKind) -> Option<CacheEntry> {
        let adapter = self.gate(kind)?;
        match adapter.read(url).await {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(url, error = %err, "cache read failed, treating as miss");
                None
            },
        }
    }

    /// Persist a freshly fetched record. A gated or disabled controller
    /// succeeds without touching any backend.
    pub async fn create(
        &self,
        url: &str,
        kind: ResourceKind,
        content: &str,
        version: f64,
        last_modified: i64,
        lifetime: i64,
    ) -> Result<()> {
        let Some(adapter) = self.gate(kind) else {
            tracing::debug!(url, "persistence skipped");
            return Ok(());
        };
        adapter.create(&Self::record(url, content, version, last_modified, lifetime)).await
    }

    /// Overwrite a stale record wholesale, restamping its expiry.
    pub async fn update(
        &self,
        url: &str,
        kind: ResourceKind,
        content: &str,
        version: f64,
        last_modified: i64,
        lifetime: i64,
    ) -> Result<()> {
        let Some(adapter) = self.gate(kind) else {
            tracing::debug!(url, "persistence skipped");
            return Ok(());
        };
        adapter.update(&Self::record(url, content, version, last_modified, lifetime)).await
    }

    pub async fn remove(&self, url: &str, kind: ResourceKind) -> Result<()> {
        let Some(adapter) = self.gate(kind) else {
            return Ok(());
        };
        adapter.remove(url).await
    }

    fn record(url: &str, content: &str, version: f64, last_modified: i64, lifetime: i64) -> CacheEntry {
        CacheEntry {
            key: url.to_string(),
            content: content.to_string(),
            last_modified,
            version,
            lifetime,
            expires_at: now_ms() + lifetime,
        }
    }
}
