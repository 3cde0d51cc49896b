//! Local in-process backend
//!
//! A bounded concurrent map with lazy expiry on read and a periodic
//! background sweep removing entries whose physical TTL has passed. Always
//! available: it is both the single-process default and the fail-open
//! target when the remote backend errors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::BackendStore;
use crate::error::Result;

/// Raw bytes plus the instant they stop being servable
#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Bytes,
    expires_at: Instant,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Bounded in-process key-value store
pub struct MemoryBackend {
    entries: Arc<DashMap<String, StoredValue>>,
    max_entries: usize,
    shutdown: CancellationToken,
}

impl MemoryBackend {
    /// Create a backend holding at most `max_entries`, sweeping expired
    /// entries every `sweep_interval`.
    ///
    /// Must be called from within a tokio runtime (the sweep is a spawned
    /// task). The sweep stops when the backend is dropped.
    pub fn new(max_entries: usize, sweep_interval: Duration) -> Self {
        let entries: Arc<DashMap<String, StoredValue>> = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();

        let weak = Arc::downgrade(&entries);
        let token = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so a fresh
            // backend isn't swept before anything is stored
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(entries) = weak.upgrade() else { break };
                        let now = Instant::now();
                        let before = entries.len();
                        entries.retain(|_, v| !v.is_expired(now));
                        let removed = before.saturating_sub(entries.len());
                        if removed > 0 {
                            debug!(removed, remaining = entries.len(), "swept expired cache entries");
                        }
                    }
                }
            }
        });

        Self {
            entries,
            max_entries,
            shutdown,
        }
    }

    /// Drop expired entries now, then if still at capacity evict the
    /// entries closest to expiry until one slot is free
    fn make_room(&self) {
        let now = Instant::now();
        self.entries.retain(|_, v| !v.is_expired(now));

        while self.entries.len() >= self.max_entries {
            let victim = self
                .entries
                .iter()
                .min_by_key(|e| e.value().expires_at)
                .map(|e| e.key().clone());

            match victim {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Number of entries currently held, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are held
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for MemoryBackend {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl BackendStore for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let now = Instant::now();

        if let Some(stored) = self.entries.get(key) {
            if !stored.is_expired(now) {
                return Ok(Some(stored.bytes.clone()));
            }
        } else {
            return Ok(None);
        }

        // Expired: lazy removal ahead of the next sweep
        self.entries
            .remove_if(key, |_, v| v.is_expired(Instant::now()));
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.make_room();
        }

        self.entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired(now) && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn entry_count(&self) -> u64 {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .count() as u64
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Glob-style match supporting the `*` wildcard
fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }

    let segments: Vec<&str> = pattern.split('*').collect();
    let mut remaining = text;

    // Anchored prefix
    let first = segments[0];
    if !remaining.starts_with(first) {
        return false;
    }
    remaining = &remaining[first.len()..];

    // Anchored suffix
    let last = segments[segments.len() - 1];
    if !remaining.ends_with(last) {
        return false;
    }
    remaining = &remaining[..remaining.len() - last.len()];

    // Middle segments must appear in order
    for segment in &segments[1..segments.len() - 1] {
        if segment.is_empty() {
            continue;
        }
        match remaining.find(segment) {
            Some(idx) => remaining = &remaining[idx + segment.len()..],
            None => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MemoryBackend {
        MemoryBackend::new(100, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let backend = backend();

        backend
            .set_with_ttl("k", Bytes::from_static(b"v"), Duration::from_secs(60))
            .await
            .unwrap();

        let got = backend.get("k").await.unwrap();
        assert_eq!(got, Some(Bytes::from_static(b"v")));
    }

    #[tokio::test]
    async fn test_get_absent_key() {
        let backend = backend();
        assert!(backend.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lazy_expiry_on_read() {
        let backend = backend();

        backend
            .set_with_ttl("k", Bytes::from_static(b"v"), Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(backend.get("k").await.unwrap().is_none());
        // The expired entry was dropped by the read, not just hidden
        assert_eq!(backend.len(), 0);
    }

    #[tokio::test]
    async fn test_background_sweep_removes_expired() {
        let backend = MemoryBackend::new(100, Duration::from_millis(30));

        backend
            .set_with_ttl("k", Bytes::from_static(b"v"), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(backend.len(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;

        // Swept without any read touching the key
        assert_eq!(backend.len(), 0);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let backend = backend();

        backend
            .set_with_ttl("k", Bytes::from_static(b"v"), Duration::from_secs(60))
            .await
            .unwrap();

        backend.delete("k").await.unwrap();
        backend.delete("k").await.unwrap();
        backend.delete("never-existed").await.unwrap();

        assert!(backend.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_capacity_bound_evicts_soonest_expiry() {
        let backend = MemoryBackend::new(2, Duration::from_secs(60));

        backend
            .set_with_ttl("short", Bytes::from_static(b"1"), Duration::from_secs(5))
            .await
            .unwrap();
        backend
            .set_with_ttl("long", Bytes::from_static(b"2"), Duration::from_secs(500))
            .await
            .unwrap();
        backend
            .set_with_ttl("new", Bytes::from_static(b"3"), Duration::from_secs(100))
            .await
            .unwrap();

        // The entry closest to expiry made room for the new one
        assert!(backend.get("short").await.unwrap().is_none());
        assert!(backend.get("long").await.unwrap().is_some());
        assert!(backend.get("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let backend = MemoryBackend::new(2, Duration::from_secs(60));

        backend
            .set_with_ttl("a", Bytes::from_static(b"1"), Duration::from_secs(60))
            .await
            .unwrap();
        backend
            .set_with_ttl("b", Bytes::from_static(b"2"), Duration::from_secs(60))
            .await
            .unwrap();
        backend
            .set_with_ttl("a", Bytes::from_static(b"updated"), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(backend.len(), 2);
        assert_eq!(
            backend.get("a").await.unwrap(),
            Some(Bytes::from_static(b"updated"))
        );
    }

    #[tokio::test]
    async fn test_keys_matching_glob() {
        let backend = backend();

        for key in ["cache:user:1", "cache:user:2", "cache:report:1", "other:user:1"] {
            backend
                .set_with_ttl(key, Bytes::from_static(b"v"), Duration::from_secs(60))
                .await
                .unwrap();
        }

        let mut keys = backend.keys_matching("cache:user:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["cache:user:1", "cache:user:2"]);

        let all = backend.keys_matching("cache:*").await.unwrap();
        assert_eq!(all.len(), 3);

        let exact = backend.keys_matching("other:user:1").await.unwrap();
        assert_eq!(exact, vec!["other:user:1"]);
    }

    #[tokio::test]
    async fn test_entry_count_skips_expired() {
        let backend = backend();

        backend
            .set_with_ttl("live", Bytes::from_static(b"1"), Duration::from_secs(60))
            .await
            .unwrap();
        backend
            .set_with_ttl("dying", Bytes::from_static(b"2"), Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(backend.entry_count().await, 1);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("cache:*", "cache:a"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("cache:*:1", "cache:user:1"));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(glob_match("exact", "exact"));

        assert!(!glob_match("cache:*", "other:a"));
        assert!(!glob_match("cache:*:1", "cache:user:2"));
        assert!(!glob_match("a*b*c", "aXXcYYb"));
        assert!(!glob_match("exact", "exactly"));
    }
}
