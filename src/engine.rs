//! The read-through engine
//!
//! Orchestrates lookup, freshness evaluation, miss computation,
//! stale-while-revalidate background refresh, write-back, and tag
//! registration. From the perspective of a `get_or_compute` caller the
//! only error that can surface is a failure of their own compute function
//! on a genuine miss; every caching-infrastructure failure degrades to
//! "acts like a miss" instead of raising.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::{self, BackendSelection, BackendStore, StoreHandle};
use crate::codec::EntryCodec;
use crate::config::CacheConfig;
use crate::entry::{CacheEntry, Freshness};
use crate::error::{Error, Result};
use crate::key::{self, KeyBuilder};
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::tags::TagIndex;

/// Per-call caching options
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Hard freshness window; `None` uses the engine's default (300s)
    pub ttl: Option<Duration>,
    /// Logical group memberships to register for bulk invalidation
    pub tags: Vec<String>,
    /// Additional window during which a stale value may be served while a
    /// refresh runs in the background; zero disables
    pub swr: Duration,
    /// Force (`Some(true)`) or forbid (`Some(false)`) compression;
    /// `None` applies size-based auto-detection
    pub compress: Option<bool>,
    /// Bypass caching entirely: always invoke the compute function, never
    /// read or write an entry
    pub skip: bool,
}

impl CacheOptions {
    /// Options with all defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the freshness window
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the tags registered on write
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the stale-while-revalidate grace window
    pub fn with_swr(mut self, swr: Duration) -> Self {
        self.swr = swr;
        self
    }

    /// Force or forbid compression
    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }

    /// Bypass caching for this call
    pub fn with_skip(mut self) -> Self {
        self.skip = true;
        self
    }
}

/// One entry in a warming batch
pub struct WarmEntry<F> {
    /// Cache key to warm
    pub key: String,
    /// Producer invoked on miss
    pub compute: F,
    /// Options applied to the warming call
    pub options: CacheOptions,
}

impl<F> WarmEntry<F> {
    pub fn new(key: impl Into<String>, compute: F, options: CacheOptions) -> Self {
        Self {
            key: key.into(),
            compute,
            options,
        }
    }
}

/// Outcome of a warming batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmReport {
    /// Entries now present in the cache
    pub warmed: usize,
    /// Entries whose compute function failed (logged, not surfaced)
    pub failed: usize,
}

/// Read-through cache engine
///
/// Cheap to clone; clones share the backend, tag index, counters, and
/// in-flight refresh registry.
///
/// # Example
///
/// ```ignore
/// let cache = Cache::connect(CacheConfig::from_env()?).await;
///
/// let report = cache
///     .get_or_compute(
///         &cache.key().push("report").push(2024).build(),
///         || async { build_report(2024).await },
///         CacheOptions::new()
///             .with_ttl(Duration::from_secs(600))
///             .with_swr(Duration::from_secs(120))
///             .with_tags(["reports"]),
///     )
///     .await?;
/// ```
#[derive(Clone)]
pub struct Cache {
    store: Arc<StoreHandle>,
    codec: EntryCodec,
    tags: TagIndex,
    metrics: Arc<CacheMetrics>,
    /// Keys with a background refresh currently in flight
    refreshing: Arc<DashMap<String, ()>>,
    config: CacheConfig,
}

impl Cache {
    /// Build an engine, selecting the backend once from the configuration:
    /// a reachable remote URL selects Redis with a local fallback, anything
    /// else the local in-process backend.
    pub async fn connect(config: CacheConfig) -> Self {
        let selection = backend::select(&config).await;
        Self::build(config, selection)
    }

    /// Build an engine over a caller-supplied backend (tests, custom stores)
    pub fn with_backend(config: CacheConfig, primary: Arc<dyn BackendStore>) -> Self {
        Self::build(config, BackendSelection::custom(primary))
    }

    /// Build an engine over an explicit selection, e.g. a custom primary
    /// with a local fallback behind it
    pub fn with_selection(config: CacheConfig, selection: BackendSelection) -> Self {
        Self::build(config, selection)
    }

    fn build(config: CacheConfig, selection: BackendSelection) -> Self {
        let store = Arc::new(StoreHandle::new(selection));
        let tags = TagIndex::new(store.clone(), config.namespace.clone(), config.tag_ttl);

        Self {
            store,
            codec: EntryCodec::new(config.compression_threshold),
            tags,
            metrics: Arc::new(CacheMetrics::new()),
            refreshing: Arc::new(DashMap::new()),
            config,
        }
    }

    /// The namespace scoping this cache's keys and tags
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// A key builder seeded with this cache's namespace
    pub fn key(&self) -> KeyBuilder {
        KeyBuilder::new(&self.config.namespace)
    }

    /// A request-derived key under this cache's namespace, with the query
    /// string normalized so parameter order cannot split the cache
    pub fn request_key(&self, method: &str, path: &str, query: &str) -> String {
        key::request_key(&self.config.namespace, method, path, query)
    }

    /// The tag index backing bulk invalidation
    pub fn tags(&self) -> &TagIndex {
        &self.tags
    }

    // =========================================================================
    // Read-through
    // =========================================================================

    /// Return the cached value for `key`, computing and storing it when
    /// missing or dead, and serving stale-while-revalidating when within
    /// the grace window.
    ///
    /// The compute function must tolerate being invoked more than once for
    /// the same logical key (concurrent misses are not coalesced) and is
    /// the only error source a caller can observe.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        compute: F,
        options: CacheOptions,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if options.skip {
            self.metrics.record_miss();
            return compute().await.map_err(Error::Compute);
        }

        if let Some(entry) = self.lookup::<T>(key).await {
            match entry.freshness(Utc::now()) {
                Freshness::Fresh => {
                    self.metrics.record_hit();
                    return Ok(entry.into_value());
                }
                Freshness::Stale => {
                    // Serve stale immediately; refresh without blocking
                    self.metrics.record_hit();
                    debug!(key = %key, "serving stale value, refreshing in background");
                    self.spawn_refresh(key, compute, options);
                    return Ok(entry.into_value());
                }
                Freshness::Dead => {
                    debug!(key = %key, "entry dead, recomputing");
                }
            }
        }

        self.compute_and_store(key, compute, options).await
    }

    /// Decode the stored entry for `key`; infrastructure failures and
    /// undecodable frames both read as a miss
    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let bytes = self.store.get_failopen(key).await?;

        match self.codec.decode(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key = %key, error = %e, "undecodable cache entry, treating as miss");
                self.store.delete_failopen(key).await;
                None
            }
        }
    }

    /// Synchronous miss path: the compute error is the caller's to handle,
    /// write-back failures are not
    async fn compute_and_store<T, F, Fut>(
        &self,
        key: &str,
        compute: F,
        options: CacheOptions,
    ) -> Result<T>
    where
        T: Serialize + Send,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.metrics.record_miss();
        let value = compute().await.map_err(Error::Compute)?;
        self.store_entry(key, &value, &options).await;
        Ok(value)
    }

    /// Encode and write an entry, then register its tags. Every failure on
    /// this path is logged and swallowed: the caller already has the value.
    async fn store_entry<T: Serialize>(&self, key: &str, value: &T, options: &CacheOptions) {
        let ttl = options.ttl.unwrap_or(self.config.default_ttl);
        let swr = options.swr;

        let entry = CacheEntry::new(value, ttl, swr, options.tags.clone());
        let frame = match self.codec.encode(&entry, options.compress) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to encode cache entry, skipping write");
                return;
            }
        };

        // The physical entry outlives the logical freshness window by the
        // grace window, so stale reads can still find it
        let physical_ttl = ttl + swr;
        self.store.set_failopen(key, frame, physical_ttl).await;

        if !options.tags.is_empty() {
            self.tags.register(key, &options.tags, physical_ttl).await;
        }
    }

    /// Fire-and-forget refresh for a stale entry. At most one refresh per
    /// key is in flight in this process; refresh failures leave the stale
    /// entry untouched, to fall through to dead after the grace window.
    fn spawn_refresh<T, F, Fut>(&self, key: &str, compute: F, options: CacheOptions)
    where
        T: Serialize + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if self.refreshing.insert(key.to_string(), ()).is_some() {
            debug!(key = %key, "refresh already in flight, skipping");
            return;
        }

        let guard = RefreshGuard {
            refreshing: self.refreshing.clone(),
            key: key.to_string(),
        };
        let cache = self.clone();
        let key = key.to_string();

        tokio::spawn(async move {
            // Cleared even if the compute panics
            let _guard = guard;

            match compute().await {
                Ok(value) => {
                    cache.store_entry(&key, &value, &options).await;
                    debug!(key = %key, "background refresh wrote fresh value");
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "background refresh failed, keeping stale entry");
                }
            }
        });
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Delete a single entry. Deleting an absent key is a no-op success;
    /// a genuine transport failure surfaces, since the caller needs to
    /// know staleness is not guaranteed.
    pub async fn invalidate_key(&self, key: &str) -> Result<()> {
        self.store
            .delete_strict(key)
            .await
            .map_err(|e| Error::Invalidation {
                target: key.to_string(),
                reason: e.to_string(),
            })
    }

    /// Delete every key currently registered under `tag`, then the tag's
    /// own index entry. Best-effort: keys whose tag registration had not
    /// yet landed are not covered. Returns the number of keys deleted.
    pub async fn invalidate_tag(&self, tag: &str) -> Result<u64> {
        let target = || format!("tag:{}", tag);

        let keys = self
            .tags
            .keys_for_tag(tag)
            .await
            .map_err(|e| Error::Invalidation {
                target: target(),
                reason: e.to_string(),
            })?;

        let mut removed = 0u64;
        for key in &keys {
            self.store
                .delete_strict(key)
                .await
                .map_err(|e| Error::Invalidation {
                    target: target(),
                    reason: format!("deleting {}: {}", key, e),
                })?;
            removed += 1;
        }

        self.tags
            .drop_tag(tag)
            .await
            .map_err(|e| Error::Invalidation {
                target: target(),
                reason: e.to_string(),
            })?;

        debug!(tag = %tag, removed, "tag invalidated");
        Ok(removed)
    }

    /// Delete every key matching a glob-style pattern (`*` wildcard).
    /// Native server-side matching on the remote backend, linear scan on
    /// the local one. Returns the number of keys deleted.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<u64> {
        let keys = self
            .store
            .keys_matching(pattern)
            .await
            .map_err(|e| Error::Invalidation {
                target: pattern.to_string(),
                reason: e.to_string(),
            })?;

        let mut removed = 0u64;
        for key in &keys {
            self.store
                .delete_strict(key)
                .await
                .map_err(|e| Error::Invalidation {
                    target: pattern.to_string(),
                    reason: format!("deleting {}: {}", key, e),
                })?;
            removed += 1;
        }

        debug!(pattern = %pattern, removed, "pattern invalidated");
        Ok(removed)
    }

    // =========================================================================
    // Statistics & warming
    // =========================================================================

    /// Point-in-time statistics: counters plus the local backend's live
    /// entry count (0 when the primary is remote)
    pub async fn stats(&self) -> MetricsSnapshot {
        let entry_count = self.store.entry_count().await;
        self.metrics.snapshot(entry_count)
    }

    /// Zero the hit/miss counters
    pub fn reset_stats(&self) {
        self.metrics.reset();
    }

    /// Prefetch a batch concurrently. Individual compute failures are
    /// logged and counted, never failing the batch.
    pub async fn warm<T, F, Fut>(&self, entries: Vec<WarmEntry<F>>) -> WarmReport
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let tasks = entries.into_iter().map(|entry| {
            let WarmEntry {
                key,
                compute,
                options,
            } = entry;

            async move {
                match self.get_or_compute(&key, compute, options).await {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(key = %key, error = %e, "cache warm entry failed");
                        false
                    }
                }
            }
        });

        let results = futures::future::join_all(tasks).await;
        let warmed = results.iter().filter(|ok| **ok).count();

        WarmReport {
            warmed,
            failed: results.len() - warmed,
        }
    }
}

/// Clears the in-flight marker when a refresh task finishes, including on
/// an unwinding panic inside the compute function
struct RefreshGuard {
    refreshing: Arc<DashMap<String, ()>>,
    key: String,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.refreshing.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn local_cache() -> Cache {
        Cache::with_backend(
            CacheConfig::default(),
            Arc::new(MemoryBackend::new(1000, Duration::from_secs(60))),
        )
    }

    #[tokio::test]
    async fn test_compute_error_propagates_on_miss() {
        let cache = local_cache();

        let result: Result<u32> = cache
            .get_or_compute(
                "cache:boom",
                || async { Err(anyhow::anyhow!("producer exploded")) },
                CacheOptions::new(),
            )
            .await;

        assert_matches!(result, Err(Error::Compute(_)));

        // Nothing was written
        let stats = cache.stats().await;
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test]
    async fn test_skip_never_reads_or_writes() {
        let cache = local_cache();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let value: u32 = cache
                .get_or_compute(
                    "cache:skipped",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(7)
                    },
                    CacheOptions::new().with_skip(),
                )
                .await
                .unwrap();
            assert_eq!(value, 7);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.stats().await.entry_count, 0);
    }

    #[tokio::test]
    async fn test_counters_update_once_per_call() {
        let cache = local_cache();
        let options = || CacheOptions::new().with_ttl(Duration::from_secs(60));

        let _: u32 = cache
            .get_or_compute("cache:k", || async { Ok(1) }, options())
            .await
            .unwrap();
        let _: u32 = cache
            .get_or_compute("cache:k", || async { Ok(2) }, options())
            .await
            .unwrap();

        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert!((stats.hit_rate - 0.5).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_reset_stats() {
        let cache = local_cache();

        let _: u32 = cache
            .get_or_compute("cache:k", || async { Ok(1) }, CacheOptions::new())
            .await
            .unwrap();
        cache.reset_stats();

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        // Counters reset, entries stay
        assert_eq!(stats.entry_count, 1);
    }

    #[test]
    fn test_options_defaults() {
        let options = CacheOptions::new();
        assert!(options.ttl.is_none());
        assert!(options.tags.is_empty());
        assert!(options.swr.is_zero());
        assert!(options.compress.is_none());
        assert!(!options.skip);
    }

    #[test]
    fn test_options_builder() {
        let options = CacheOptions::new()
            .with_ttl(Duration::from_secs(10))
            .with_tags(["a", "b"])
            .with_swr(Duration::from_secs(5))
            .with_compress(true)
            .with_skip();

        assert_eq!(options.ttl, Some(Duration::from_secs(10)));
        assert_eq!(options.tags, vec!["a", "b"]);
        assert_eq!(options.swr, Duration::from_secs(5));
        assert_eq!(options.compress, Some(true));
        assert!(options.skip);
    }
}
