//! Configuration model for webstash.
//!
//! Everything the cache needs to know at construction time lives here: which
//! storage adapters to try (and in what order), the knobs each adapter reads
//! (namespace, table name, quota), and the resource-default policy applied to
//! fields a caller leaves unset on an individual resource.
//!
//! The whole tree is serde round-trippable on purpose: two configs are "the
//! same" when their canonical serializations match, which is what
//! [`Config::fingerprint`] hashes. Caller identity (object references) never
//! enters into it.

pub mod error;
mod load;
mod model;

pub use crate::load::storage_root;
pub use crate::model::{
    AdapterConfig, AdapterDefaults, AdapterKind, AdapterPolicy, Config, KvLifetime, ResourceConfig, ResourceDefaults,
    ResourceKind,
};
