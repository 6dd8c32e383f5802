//! The persisted record shape shared by every adapter.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One cached asset: the content plus the metadata the freshness check
/// needs back out of storage.
///
/// Created on first fetch, overwritten wholesale whenever the freshness
/// check fails — there is no partial field patch. File-backed adapters
/// persist the whole record as JSON; the relational adapter keeps the
/// metadata in columns. Either way all four metadata fields survive a
/// round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The resource URL; unique within a backend.
    pub key: String,
    pub content: String,
    /// Milliseconds since the Unix epoch; `0` means "never declared".
    pub last_modified: i64,
    pub version: f64,
    /// `-1` never time-expires, `0` always stale, positive = TTL in ms.
    pub lifetime: i64,
    /// Absolute expiry instant, ms since the Unix epoch. Only consulted
    /// for positive lifetimes.
    pub expires_at: i64,
}

impl CacheEntry {
    /// Build a record stamped against the current clock
    /// (`expires_at = now + lifetime`).
    pub fn new(
        key: impl Into<String>,
        content: impl Into<String>,
        version: f64,
        last_modified: i64,
        lifetime: i64,
    ) -> Self {
        Self {
            key: key.into(),
            content: content.into(),
            last_modified,
            version,
            lifetime,
            expires_at: now_ms() + lifetime,
        }
    }
}

/// Current wall clock in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stamps_expiry_from_lifetime() {
        let before = now_ms();
        let entry = CacheEntry::new("https://example.com/app.js", "content", 1.0, 0, 60_000);
        let after = now_ms();
        assert!(entry.expires_at >= before + 60_000);
        assert!(entry.expires_at <= after + 60_000);
    }

    #[test]
    fn test_record_round_trips_as_json() {
        let entry = CacheEntry::new("https://example.com/a.css", "body{}", 2.5, 1_700_000_000_000, -1);
        let json = serde_json::to_string(&entry).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
    }
}
