//! 💾 File content cache keyed by (session, virtual path)
//!
//! Keying by session rather than by project is deliberate: two sessions
//! declaring the same project root may have divergent on-disk state. The
//! trade-off is memory; the mitigation is the per-session entry bound.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::RwLock;

/// Per-session entry cap; oldest entries evict first
const MAX_ENTRIES_PER_SESSION: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub session: String,
    pub path: String,
}

impl CacheKey {
    pub fn new(session: &str, path: &str) -> Self {
        Self {
            session: session.to_string(),
            path: path.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub content: String,
    /// Client-reported modification time, seconds since epoch
    pub mtime: Option<i64>,
    pub inserted_at: Instant,
}

/// 📊 Cache statistics for the stats surface
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub sessions: usize,
}

/// 💾 The cache itself
#[derive(Debug, Default)]
pub struct FileCache {
    storage: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl FileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📥 Cached content for (session, path)
    pub async fn get(&self, session: &str, path: &str) -> Option<CacheEntry> {
        let storage = self.storage.read().await;
        storage.get(&CacheKey::new(session, path)).cloned()
    }

    /// 📤 Insert content, evicting the session's oldest entry past the bound
    pub async fn insert(&self, session: &str, path: &str, content: String, mtime: Option<i64>) {
        let mut storage = self.storage.write().await;

        let session_count = storage.keys().filter(|k| k.session == session).count();
        if session_count >= MAX_ENTRIES_PER_SESSION {
            let oldest = storage
                .iter()
                .filter(|(k, _)| k.session == session)
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                storage.remove(&key);
            }
        }

        storage.insert(
            CacheKey::new(session, path),
            CacheEntry {
                content,
                mtime,
                inserted_at: Instant::now(),
            },
        );
    }

    /// 🗑️ Drop one entry (fileChanged invalidation)
    pub async fn invalidate(&self, session: &str, path: &str) -> bool {
        let mut storage = self.storage.write().await;
        storage.remove(&CacheKey::new(session, path)).is_some()
    }

    /// 🗑️ Drop everything a session cached (session cleanup hook)
    pub async fn purge_session(&self, session: &str) -> usize {
        let mut storage = self.storage.write().await;
        let before = storage.len();
        storage.retain(|key, _| key.session != session);
        before - storage.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let storage = self.storage.read().await;
        let mut sessions = std::collections::HashSet::new();
        let mut bytes = 0;
        for (key, entry) in storage.iter() {
            sessions.insert(key.session.as_str());
            bytes += entry.content.len();
        }
        CacheStats {
            entries: storage.len(),
            bytes,
            sessions: sessions.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_get_invalidate() {
        let cache = FileCache::new();
        cache.insert("s1", "/src/x.ts", "let a = 1;".into(), Some(100)).await;

        let entry = cache.get("s1", "/src/x.ts").await.unwrap();
        assert_eq!(entry.content, "let a = 1;");
        assert_eq!(entry.mtime, Some(100));

        assert!(cache.invalidate("s1", "/src/x.ts").await);
        assert!(cache.get("s1", "/src/x.ts").await.is_none());
        assert!(!cache.invalidate("s1", "/src/x.ts").await);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let cache = FileCache::new();
        cache.insert("s1", "/src/x.ts", "session one".into(), None).await;
        cache.insert("s2", "/src/x.ts", "session two".into(), None).await;

        assert_eq!(cache.get("s1", "/src/x.ts").await.unwrap().content, "session one");
        assert_eq!(cache.get("s2", "/src/x.ts").await.unwrap().content, "session two");

        assert_eq!(cache.purge_session("s1").await, 1);
        assert!(cache.get("s1", "/src/x.ts").await.is_none());
        assert!(cache.get("s2", "/src/x.ts").await.is_some());
    }

    #[tokio::test]
    async fn test_per_session_bound_evicts_oldest() {
        let cache = FileCache::new();
        for i in 0..MAX_ENTRIES_PER_SESSION {
            cache
                .insert("s1", &format!("/f{i}"), "x".into(), None)
                .await;
        }
        cache.insert("s1", "/one-more", "y".into(), None).await;

        let stats = cache.stats().await;
        assert_eq!(stats.entries, MAX_ENTRIES_PER_SESSION);
        assert!(cache.get("s1", "/one-more").await.is_some());
        assert!(cache.get("s1", "/f0").await.is_none(), "oldest entry evicted");
    }

    #[tokio::test]
    async fn test_stats() {
        let cache = FileCache::new();
        cache.insert("s1", "/a", "12345".into(), None).await;
        cache.insert("s2", "/b", "123".into(), None).await;

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.bytes, 8);
        assert_eq!(stats.sessions, 2);
    }
}
