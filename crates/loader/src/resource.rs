//! The resource descriptor: what a caller asks for, and what it becomes
//! once processed.

use std::fmt;
use std::sync::Arc;
use webstash_config::ResourceKind;

/// Callback fired exactly once per resource, after its injection attempt.
/// An "attempted" signal, not a "succeeded" one.
pub type OnLoaded = Arc<dyn Fn(&Resource) + Send + Sync>;

/// Opaque descriptor of where a resource should be injected. The core never
/// interprets it; the injector does. Absent means the injector's default
/// placement for the kind (document head, before the first script).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetNode(pub String);

/// A requested asset plus, after processing, its result fields.
///
/// Fields left `None` fall back to the resource-default policy at read
/// time, never earlier.
#[derive(Clone)]
pub struct Resource {
    /// Unique key within a backend.
    pub url: String,
    pub kind: ResourceKind,
    /// Load-order bucket; lower loads first, ties race.
    pub group: Option<i32>,
    /// Caller-declared content version.
    pub version: Option<f64>,
    /// Caller-declared modification timestamp (ms). Left unset, the cached
    /// record's own timestamp is adopted as a non-invalidating default.
    pub last_modified: Option<i64>,
    /// `-1` never time-expires, `0` always stale, positive = TTL in ms.
    pub lifetime: Option<i64>,
    pub ajax: Option<bool>,
    pub post_data: Option<String>,
    pub target: Option<TargetNode>,
    pub on_loaded: Option<OnLoaded>,
    /// Populated during processing.
    pub is_valid: bool,
    /// Populated during processing.
    pub data: Option<String>,
}

impl Resource {
    pub fn new(url: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            url: url.into(),
            kind,
            group: None,
            version: None,
            last_modified: None,
            lifetime: None,
            ajax: None,
            post_data: None,
            target: None,
            on_loaded: None,
            is_valid: false,
            data: None,
        }
    }

    pub fn with_group(mut self, group: i32) -> Self {
        self.group = Some(group);
        self
    }

    pub fn with_version(mut self, version: f64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_last_modified(mut self, last_modified: i64) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    pub fn with_lifetime(mut self, lifetime: i64) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn with_ajax(mut self, ajax: bool) -> Self {
        self.ajax = Some(ajax);
        self
    }

    pub fn with_post_data(mut self, post_data: impl Into<String>) -> Self {
        self.post_data = Some(post_data.into());
        self
    }

    pub fn with_target(mut self, target: TargetNode) -> Self {
        self.target = Some(target);
        self
    }

    pub fn on_loaded(mut self, callback: impl Fn(&Resource) + Send + Sync + 'static) -> Self {
        self.on_loaded = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("url", &self.url)
            .field("kind", &self.kind)
            .field("group", &self.group)
            .field("version", &self.version)
            .field("last_modified", &self.last_modified)
            .field("lifetime", &self.lifetime)
            .field("is_valid", &self.is_valid)
            .field("has_data", &self.data.is_some())
            .finish_non_exhaustive()
    }
}
