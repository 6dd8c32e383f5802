//! Collaborator seams: DOM injection, network fetch, environment probes.
//!
//! The cache never touches a document or a socket itself — it drives these
//! traits and nothing else. The `mock` feature (also active under `test`)
//! ships recording fakes for downstream crates' dev-dependencies.

use crate::resource::TargetNode;
use async_trait::async_trait;
use std::sync::Arc;
use webstash_config::ResourceKind;

/// Commits resource content to the page.
///
/// `append` resolves `true` once the injected node signalled success,
/// `false` on an error signal — at most one resolution per call.
/// `is_update` marks content replacing a previously injected copy.
#[async_trait]
pub trait Injector: Send + Sync {
    async fn append(
        &self,
        kind: ResourceKind,
        url: &str,
        data: &str,
        target: Option<&TargetNode>,
        is_update: bool,
    ) -> bool;
}

/// Raw network fetch. `None` means the fetch failed; there is no error
/// detail the cache could act on beyond falling back.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, ajax: bool, post_data: Option<&str>) -> Option<String>;
}

/// Environment probes the pipeline consults.
pub trait Environment: Send + Sync {
    fn is_online(&self) -> bool;
}

/// The full collaborator set, bound once per cache.
#[derive(Clone)]
pub struct Collaborators {
    pub injector: Arc<dyn Injector>,
    pub fetcher: Arc<dyn Fetcher>,
    pub environment: Arc<dyn Environment>,
}

#[cfg(any(test, feature = "mock"))]
pub mod testing {
    //! Recording fakes for tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    /// One observed injection.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Injection {
        pub kind: ResourceKind,
        pub url: String,
        pub data: String,
        pub is_update: bool,
    }

    /// Records every `append` call in order; optionally reports failure.
    #[derive(Default)]
    pub struct RecordingInjector {
        events: Mutex<Vec<Injection>>,
        fail: AtomicBool,
    }

    impl RecordingInjector {
        pub fn failing() -> Self {
            let injector = Self::default();
            injector.fail.store(true, Ordering::Relaxed);
            injector
        }

        pub fn events(&self) -> Vec<Injection> {
            self.events.lock().unwrap().clone()
        }

        pub fn urls(&self) -> Vec<String> {
            self.events.lock().unwrap().iter().map(|event| event.url.clone()).collect()
        }
    }

    #[async_trait]
    impl Injector for RecordingInjector {
        async fn append(
            &self,
            kind: ResourceKind,
            url: &str,
            data: &str,
            _target: Option<&TargetNode>,
            is_update: bool,
        ) -> bool {
            self.events.lock().unwrap().push(Injection {
                kind,
                url: url.to_string(),
                data: data.to_string(),
                is_update,
            });
            !self.fail.load(Ordering::Relaxed)
        }
    }

    /// An injector whose completion signal never arrives. For exercising
    /// the injection timeout.
    #[derive(Default)]
    pub struct StalledInjector;

    #[async_trait]
    impl Injector for StalledInjector {
        async fn append(
            &self,
            _kind: ResourceKind,
            _url: &str,
            _data: &str,
            _target: Option<&TargetNode>,
            _is_update: bool,
        ) -> bool {
            std::future::pending().await
        }
    }

    /// Serves canned responses and counts fetches.
    #[derive(Default)]
    pub struct ScriptedFetcher {
        responses: Mutex<HashMap<String, String>>,
        fail_all: AtomicBool,
        calls: AtomicU64,
        log: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        /// Responds to every URL with a derived payload.
        pub fn answering_everything() -> Self {
            Self::default()
        }

        /// Every fetch fails.
        pub fn failing() -> Self {
            let fetcher = Self::default();
            fetcher.fail_all.store(true, Ordering::Relaxed);
            fetcher
        }

        pub fn with_response(self, url: impl Into<String>, body: impl Into<String>) -> Self {
            self.responses.lock().unwrap().insert(url.into(), body.into());
            self
        }

        pub fn fetch_count(&self) -> u64 {
            self.calls.load(Ordering::Relaxed)
        }

        pub fn fetched_urls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str, _ajax: bool, _post_data: Option<&str>) -> Option<String> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.log.lock().unwrap().push(url.to_string());
            if self.fail_all.load(Ordering::Relaxed) {
                return None;
            }
            let canned = self.responses.lock().unwrap().get(url).cloned();
            Some(canned.unwrap_or_else(|| format!("payload://{url}")))
        }
    }

    /// A fixed online/offline answer.
    pub struct FixedEnvironment(pub bool);

    impl Environment for FixedEnvironment {
        fn is_online(&self) -> bool {
            self.0
        }
    }

    /// Convenience: recording injector + canned fetcher + online.
    pub fn collaborators() -> (Arc<RecordingInjector>, Arc<ScriptedFetcher>, Collaborators) {
        collaborators_with_env(true)
    }

    pub fn collaborators_with_env(online: bool) -> (Arc<RecordingInjector>, Arc<ScriptedFetcher>, Collaborators) {
        let injector = Arc::new(RecordingInjector::default());
        let fetcher = Arc::new(ScriptedFetcher::answering_everything());
        let set = Collaborators {
            injector: injector.clone(),
            fetcher: fetcher.clone(),
            environment: Arc::new(FixedEnvironment(online)),
        };
        (injector, fetcher, set)
    }
}
