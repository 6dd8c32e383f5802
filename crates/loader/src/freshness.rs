//! The freshness predicate.
//!
//! Decides whether a cached record may be served without a network round
//! trip. Pure: the clock comes in as an argument so the laws are testable
//! at fixed instants.

use crate::resource::Resource;
use webstash_config::ResourceDefaults;
use webstash_storage::CacheEntry;

/// Is the cached record still good for this resource?
///
/// The record's `lifetime` gates everything: `0` forces staleness no matter
/// what (the explicit "always refetch" escape hatch), `-1` ignores the
/// clock and trusts version/last-modified equality alone, and a positive
/// value additionally requires `expires_at` to still be in the future.
///
/// Last-modified resolution carries a deliberate bias toward cache hits:
/// when the record has a timestamp but the resource declares none, the
/// record's own value is adopted onto the resource and treated as matching.
/// A caller that didn't bother declaring a modification time shouldn't eat
/// a refetch for it. (Zero counts as "not declared" on both sides.)
pub fn is_resource_valid(
    resource: &mut Resource,
    entry: &CacheEntry,
    defaults: &ResourceDefaults,
    now_ms: i64,
) -> bool {
    let declared = resource.last_modified.filter(|&value| value != 0);
    let recorded = (entry.last_modified != 0).then_some(entry.last_modified);
    let lastmod_check = match (declared, recorded) {
        (Some(declared), Some(recorded)) => declared == recorded,
        (None, Some(recorded)) => {
            resource.last_modified = Some(recorded);
            true
        },
        _ => {
            if resource.last_modified.is_none() {
                resource.last_modified = Some(defaults.last_modified);
            }
            true
        },
    };

    let version = resource.version.unwrap_or(defaults.version);
    let version_and_time_match = lastmod_check && version == entry.version;

    entry.lifetime != 0
        && ((entry.lifetime == -1 && version_and_time_match)
            || (entry.lifetime != -1 && version_and_time_match && entry.expires_at > now_ms))
}
