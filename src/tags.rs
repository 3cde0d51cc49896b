//! Tag index: reverse mapping from logical tag to the keys carrying it
//!
//! Each tag's key-set is itself stored in the backend under a derived key
//! (`prefix:tag:<tag>`), so it shares the backend's consistency caveats:
//! the set may reference keys that have already expired naturally, and
//! invalidation-by-tag is best-effort. Tag metadata carries its own long
//! TTL, independent of the data entries it lists, floored at the
//! registering entry's physical TTL so a live entry cannot outlive its
//! tag coverage.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::warn;

use crate::backend::StoreHandle;
use crate::error::Result;

/// Reverse index from tag to key-set, stored in the backend
#[derive(Clone)]
pub struct TagIndex {
    store: Arc<StoreHandle>,
    namespace: String,
    tag_ttl: Duration,
}

impl TagIndex {
    pub(crate) fn new(store: Arc<StoreHandle>, namespace: String, tag_ttl: Duration) -> Self {
        Self {
            store,
            namespace,
            tag_ttl,
        }
    }

    /// Backend key holding the key-set for `tag`
    fn tag_key(&self, tag: &str) -> String {
        format!("{}:tag:{}", self.namespace, tag)
    }

    /// Add `key` to each tag's key-set.
    ///
    /// Read-modify-write without coordination: a key written microseconds
    /// before another registration round-trip completes may be missed,
    /// which is within the best-effort contract. Runs on the data write
    /// path, so failures degrade (fail-open) rather than surface.
    pub async fn register(&self, key: &str, tags: &[String], entry_ttl: Duration) {
        for tag in tags {
            let tag_key = self.tag_key(tag);

            let mut keys = match self.store.get_failopen(&tag_key).await {
                Some(bytes) => decode_key_set(&tag_key, &bytes),
                None => Vec::new(),
            };

            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }

            let bytes = match serde_json::to_vec(&keys) {
                Ok(bytes) => Bytes::from(bytes),
                Err(e) => {
                    warn!(tag = %tag, error = %e, "failed to serialize tag key-set");
                    continue;
                }
            };

            // Tag metadata must outlive the data it covers
            let ttl = self.tag_ttl.max(entry_ttl);
            self.store.set_failopen(&tag_key, bytes, ttl).await;
        }
    }

    /// All keys currently registered under `tag`.
    ///
    /// Strict read: invoked from invalidation, so a transport failure
    /// surfaces. An absent tag reads as an empty set. Fail-open writes may
    /// have split the set across the primary and the fallback; both sides
    /// are merged.
    pub async fn keys_for_tag(&self, tag: &str) -> Result<Vec<String>> {
        let tag_key = self.tag_key(tag);
        let (primary, local) = self.store.get_strict(&tag_key).await?;

        let mut keys = primary
            .map(|bytes| decode_key_set(&tag_key, &bytes))
            .unwrap_or_default();

        if let Some(bytes) = local {
            for key in decode_key_set(&tag_key, &bytes) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }

        Ok(keys)
    }

    /// Remove the tag's own index entry
    pub async fn drop_tag(&self, tag: &str) -> Result<()> {
        self.store.delete_strict(&self.tag_key(tag)).await
    }
}

/// Parse a stored key-set; corruption reads as empty (the index is derived
/// metadata, rebuilt by subsequent registrations)
fn decode_key_set(tag_key: &str, bytes: &[u8]) -> Vec<String> {
    match serde_json::from_slice(bytes) {
        Ok(keys) => keys,
        Err(e) => {
            warn!(key = %tag_key, error = %e, "corrupt tag key-set, treating as empty");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendSelection, MemoryBackend};

    fn index(tag_ttl: Duration) -> (TagIndex, Arc<StoreHandle>) {
        let backend = Arc::new(MemoryBackend::new(1000, Duration::from_secs(60)));
        let store = Arc::new(StoreHandle::new(BackendSelection::custom(backend)));
        (
            TagIndex::new(store.clone(), "cache".to_string(), tag_ttl),
            store,
        )
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let (tags, _) = index(Duration::from_secs(60));

        tags.register("cache:a", &["x".to_string()], Duration::from_secs(10))
            .await;
        tags.register("cache:b", &["x".to_string(), "y".to_string()], Duration::from_secs(10))
            .await;

        let mut x_keys = tags.keys_for_tag("x").await.unwrap();
        x_keys.sort();
        assert_eq!(x_keys, vec!["cache:a", "cache:b"]);

        assert_eq!(tags.keys_for_tag("y").await.unwrap(), vec!["cache:b"]);
    }

    #[tokio::test]
    async fn test_unknown_tag_is_empty() {
        let (tags, _) = index(Duration::from_secs(60));
        assert!(tags.keys_for_tag("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_double_registration_dedupes() {
        let (tags, _) = index(Duration::from_secs(60));

        tags.register("cache:a", &["x".to_string()], Duration::from_secs(10))
            .await;
        tags.register("cache:a", &["x".to_string()], Duration::from_secs(10))
            .await;

        assert_eq!(tags.keys_for_tag("x").await.unwrap(), vec!["cache:a"]);
    }

    #[tokio::test]
    async fn test_drop_tag() {
        let (tags, _) = index(Duration::from_secs(60));

        tags.register("cache:a", &["x".to_string()], Duration::from_secs(10))
            .await;
        tags.drop_tag("x").await.unwrap();

        assert!(tags.keys_for_tag("x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tag_ttl_floored_at_entry_ttl() {
        // Tag TTL shorter than the entry's physical TTL: registration must
        // stretch the tag entry so it outlives the data
        let (tags, _) = index(Duration::from_millis(20));

        tags.register("cache:a", &["x".to_string()], Duration::from_secs(30))
            .await;

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(tags.keys_for_tag("x").await.unwrap(), vec!["cache:a"]);
    }

    #[tokio::test]
    async fn test_corrupt_key_set_reads_empty() {
        let (tags, store) = index(Duration::from_secs(60));

        store
            .set_failopen(
                "cache:tag:x",
                Bytes::from_static(b"not json"),
                Duration::from_secs(60),
            )
            .await;

        assert!(tags.keys_for_tag("x").await.unwrap().is_empty());

        // Registration recovers by rebuilding the set
        tags.register("cache:a", &["x".to_string()], Duration::from_secs(10))
            .await;
        assert_eq!(tags.keys_for_tag("x").await.unwrap(), vec!["cache:a"]);
    }
}
