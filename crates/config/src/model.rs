//! The configuration tree and its defaults.

use crate::error::{ErrorKind, Result};
use derive_more::Display;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default quota for the flat-file key/value adapter (bytes). Matches the
/// ~5 MiB browsers historically granted a single origin.
pub const DEFAULT_KV_QUOTA: u64 = 5 * 1024 * 1024;

/// The storage technologies an adapter can be built on.
///
/// Order matters when these appear in [`AdapterConfig::types`]: candidates
/// are probed first to last, and the first one that opens wins.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// Single-file key/value snapshot store.
    #[display("key_value")]
    KeyValue,
    /// Record-per-key directory store with atomic commits.
    #[display("object_store")]
    ObjectStore,
    /// Embedded SQLite database.
    #[display("relational")]
    Relational,
    /// Sandboxed file tree addressed by URL-derived paths.
    #[display("file_tree")]
    FileTree,
    /// In-memory store. Only available with the `mock` feature of the
    /// storage crate; listing it in production config is a no-op candidate.
    #[display("memory")]
    Memory,
}

impl AdapterKind {
    /// Built-in candidate priority when the caller supplies no list:
    /// fastest/most capable first.
    pub const DEFAULT_PRIORITY: [AdapterKind; 4] =
        [AdapterKind::KeyValue, AdapterKind::ObjectStore, AdapterKind::Relational, AdapterKind::FileTree];
}

/// The kinds of assets the cache knows how to handle.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    #[display("script")]
    Script,
    #[display("style")]
    Style,
    #[display("image")]
    Image,
    #[display("html")]
    Html,
}

/// Where the key/value adapter keeps its snapshot file.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KvLifetime {
    /// Persistent: survives process restarts.
    #[default]
    #[display("local")]
    Local,
    /// Per-process: a fresh store every session.
    #[display("session")]
    Session,
}

fn default_true() -> bool {
    true
}

/// One candidate adapter plus per-kind serving flags.
///
/// A flag that is off means the adapter behaves as a guaranteed miss for
/// that resource kind; the backend is never called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterPolicy {
    #[serde(rename = "type")]
    pub kind: AdapterKind,
    #[serde(default = "default_true")]
    pub css: bool,
    #[serde(default = "default_true")]
    pub js: bool,
    #[serde(default = "default_true")]
    pub html: bool,
    #[serde(default = "default_true")]
    pub img: bool,
}

impl AdapterPolicy {
    /// A policy serving every resource kind.
    pub fn all(kind: AdapterKind) -> Self {
        Self { kind, css: true, js: true, html: true, img: true }
    }

    /// Whether this adapter is allowed to serve the given resource kind.
    pub fn allows(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::Script => self.js,
            ResourceKind::Style => self.css,
            ResourceKind::Image => self.img,
            ResourceKind::Html => self.html,
        }
    }
}

/// Knobs shared by the adapter implementations.
///
/// Not every adapter reads every field; each takes what its backend needs
/// (the table name means nothing to the file tree, the quota means nothing
/// to SQLite).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterDefaults {
    /// Byte quota for the key/value snapshot.
    pub size: u64,
    /// Namespace: directory and file names are derived from this.
    pub name: String,
    /// Schema version the object store and relational adapters migrate to.
    pub version: String,
    /// Table name for the relational adapter.
    pub table: String,
    /// Human-readable description, stored in backend descriptors.
    pub description: String,
    /// Key used for the open-time self-test sentinel.
    pub key: String,
    /// Snapshot lifetime for the key/value adapter.
    pub lifetime: KvLifetime,
    /// Override for the storage root directory. `None` resolves the
    /// platform data directory at controller init.
    pub root: Option<PathBuf>,
}

impl Default for AdapterDefaults {
    fn default() -> Self {
        Self {
            size: DEFAULT_KV_QUOTA,
            name: "webstash".to_string(),
            version: "1.0".to_string(),
            table: "entries".to_string(),
            description: "webstash asset cache".to_string(),
            key: "__webstash_probe__".to_string(),
            lifetime: KvLifetime::default(),
            root: None,
        }
    }
}

/// Adapter selection: candidate list, preferred override, shared knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AdapterConfig {
    /// Tried before the candidate list, if it names a listed candidate.
    pub preferred: Option<AdapterKind>,
    /// Ordered candidate list. Empty means the built-in priority order with
    /// every kind flag on.
    pub types: Vec<AdapterPolicy>,
    pub defaults: AdapterDefaults,
}

impl AdapterConfig {
    /// The effective candidate list: the configured one, or the built-in
    /// priority order when the caller supplied none.
    pub fn candidates(&self) -> Vec<AdapterPolicy> {
        if self.types.is_empty() {
            AdapterKind::DEFAULT_PRIORITY.into_iter().map(AdapterPolicy::all).collect()
        } else {
            self.types.clone()
        }
    }
}

/// Fallback values for fields a caller leaves unset on a resource.
///
/// Applied at read time, never earlier: a resource created before a
/// `setup()` call still picks up the active policy when it is processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceDefaults {
    pub version: f64,
    pub group: i32,
    pub last_modified: i64,
    pub ajax: bool,
    /// Milliseconds. `-1` never time-expires, `0` always stale, positive
    /// values expire that long after `last_modified`.
    pub lifetime: i64,
}

impl Default for ResourceDefaults {
    fn default() -> Self {
        Self { version: 1.0, group: 0, last_modified: 0, ajax: true, lifetime: -1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResourceConfig {
    pub defaults: ResourceDefaults,
}

/// The complete configuration tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch. `false` skips adapter selection entirely; every load
    /// degrades to fetch-and-inject without persistence.
    pub is_enabled: bool,
    pub adapters: AdapterConfig,
    pub resources: ResourceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            is_enabled: true,
            adapters: AdapterConfig::default(),
            resources: ResourceConfig::default(),
        }
    }
}

impl Config {
    /// Structural fingerprint of this configuration.
    ///
    /// Two configs with equal values produce equal fingerprints regardless
    /// of how or where they were constructed. Serde struct serialization is
    /// field-ordered, so the canonical JSON bytes are deterministic.
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self).or_raise(|| ErrorKind::Serialization)?;
        Ok(blake3::hash(&canonical).to_hex().to_string())
    }
}
