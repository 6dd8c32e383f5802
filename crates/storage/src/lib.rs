//! Storage layer for webstash.
//!
//! One uniform asynchronous CRUD surface over several mutually incompatible
//! persistence backends. The [`StorageController`] probes an ordered list of
//! adapter candidates at init, adopts the first one whose self-test passes,
//! and degrades to a guaranteed-miss no-op layer when none do — callers
//! above never see backend-native failures, only "hit", "miss", or a soft
//! error they are free to ignore.

pub mod adapter;
pub mod entry;
pub mod error;
pub mod key;
pub mod manifest;

mod controller;

pub use crate::adapter::StorageAdapter;
pub use crate::controller::StorageController;
pub use crate::entry::CacheEntry;
use std::sync::Arc;

pub type AdapterHandle = Arc<dyn StorageAdapter + Send + Sync>;
