//! Resource loading for webstash.
//!
//! The [`CacheController`] takes a list of requested assets, buckets them by
//! load-order group, and runs each resource through the cached-or-fetch
//! pipeline: read from storage, decide freshness, inject a cached copy or
//! fetch-persist-inject a fresh one. Groups run strictly in order; resources
//! inside one group race freely.
//!
//! DOM insertion, network fetch, and environment probes are not this
//! crate's business — they come in through the [`collab`] traits.

pub mod collab;
pub mod freshness;
mod controller;
mod resource;

pub use crate::collab::{Collaborators, Environment, Fetcher, Injector};
pub use crate::controller::CacheController;
pub use crate::resource::{OnLoaded, Resource, TargetNode};
