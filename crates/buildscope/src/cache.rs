//! Memoization of query results.
//!
//! Keys are `(query, format, workspace_id)`; invalidation is event-driven
//! and always wholesale per workspace. An optional TTL is layered on top;
//! whichever mechanism fires first wins.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::target::{OutputFormat, QueryResult};

/// Cache key: one unique engine invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub query: String,
    pub format: OutputFormat,
    pub workspace_id: String,
}

impl CacheKey {
    pub fn new(
        query: impl Into<String>,
        format: OutputFormat,
        workspace_id: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            format,
            workspace_id: workspace_id.into(),
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    value: Arc<QueryResult>,
    created_at: Instant,
}

/// Concurrent query-result cache.
///
/// Callers receive `Arc<QueryResult>` read-only views; entries are created
/// only after a successful parse.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: DashMap<CacheKey, CacheEntry>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached result, honoring the TTL if one is configured.
    ///
    /// An expired entry is removed on the way out and reported as a miss.
    pub fn get(&self, key: &CacheKey, ttl: Option<Duration>) -> Option<Arc<QueryResult>> {
        let expired = {
            let entry = self.entries.get(key)?;
            match ttl {
                Some(ttl) if entry.created_at.elapsed() > ttl => true,
                _ => return Some(entry.value.clone()),
            }
        };
        if expired {
            debug!(query = %key.query, "cache entry expired");
            self.entries.remove(key);
        }
        None
    }

    pub fn put(&self, key: CacheKey, value: Arc<QueryResult>) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
            },
        );
    }

    /// Drop every entry belonging to the given workspace.
    ///
    /// Called whenever the active workspace changes, before any new query
    /// is issued, so stale cross-workspace results can never be served.
    pub fn invalidate_workspace(&self, workspace_id: &str) {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.workspace_id != workspace_id);
        debug!(
            workspace_id,
            removed = before - self.entries.len(),
            "invalidated workspace cache entries"
        );
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_for(query: &str) -> Arc<QueryResult> {
        Arc::new(QueryResult {
            query: query.to_string(),
            format: OutputFormat::Label,
            targets: Vec::new(),
            raw: String::new(),
        })
    }

    #[test]
    fn hit_and_miss() {
        let cache = QueryCache::new();
        let key = CacheKey::new("//pkg:all", OutputFormat::Label, "/ws");
        assert!(cache.get(&key, None).is_none());

        cache.put(key.clone(), result_for("//pkg:all"));
        let hit = cache.get(&key, None).unwrap();
        assert_eq!(hit.query, "//pkg:all");

        // A different format is a different key.
        let other = CacheKey::new("//pkg:all", OutputFormat::Xml, "/ws");
        assert!(cache.get(&other, None).is_none());
    }

    #[test]
    fn workspace_invalidation_is_wholesale_and_scoped() {
        let cache = QueryCache::new();
        cache.put(
            CacheKey::new("a", OutputFormat::Label, "/ws-a"),
            result_for("a"),
        );
        cache.put(
            CacheKey::new("b", OutputFormat::Label, "/ws-a"),
            result_for("b"),
        );
        cache.put(
            CacheKey::new("c", OutputFormat::Label, "/ws-b"),
            result_for("c"),
        );

        cache.invalidate_workspace("/ws-a");
        assert!(cache.get(&CacheKey::new("a", OutputFormat::Label, "/ws-a"), None).is_none());
        assert!(cache.get(&CacheKey::new("b", OutputFormat::Label, "/ws-a"), None).is_none());
        assert!(cache.get(&CacheKey::new("c", OutputFormat::Label, "/ws-b"), None).is_some());
    }

    #[test]
    fn ttl_expires_entries() {
        let cache = QueryCache::new();
        let key = CacheKey::new("a", OutputFormat::Label, "/ws");
        cache.put(key.clone(), result_for("a"));

        // A generous TTL keeps the entry; a zero TTL expires it.
        assert!(cache.get(&key, Some(Duration::from_secs(3600))).is_some());
        assert!(cache.get(&key, Some(Duration::ZERO)).is_none());
        // The expired entry was removed, not just hidden.
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_removes_everything() {
        let cache = QueryCache::new();
        cache.put(
            CacheKey::new("a", OutputFormat::Label, "/ws"),
            result_for("a"),
        );
        cache.clear();
        assert!(cache.is_empty());
    }
}
