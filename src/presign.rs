//! Presigned URL issuance with caching.
//!
//! URLs are cached per `(bucket, key, method)` for 60 seconds less than
//! their validity (and never less than 60 seconds), so a cache hit is
//! always still usable by the time the caller hands it on.

use moka::sync::Cache;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::errors::{StorageError, StorageResult};
use crate::keys;
use crate::storage::backend::{ObjectBackend, PresignMethod};

/// Default validity of a presigned URL, in seconds.
pub const DEFAULT_EXPIRATION_SECS: u64 = 3600;

/// Safety margin subtracted from the URL validity when caching.
pub const CACHE_MARGIN_SECS: u64 = 60;

/// Longest validity SigV4 allows (7 days).
pub const MAX_EXPIRATION_SECS: u64 = 604_800;

/// Key/value store with per-entry expiry.
pub trait CacheStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String, ttl: Duration);
}

/// A cached value together with its own time-to-live.
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

/// Expires each entry after the TTL it was inserted with.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// [`CacheStore`] backed by a bounded Moka cache.
#[derive(Clone)]
pub struct MokaCacheStore {
    cache: Cache<String, Entry>,
}

impl MokaCacheStore {
    /// Create a store holding at most `max_entries` values.
    #[must_use]
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache }
    }

    /// Number of live entries (approximate until pending tasks run).
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}

impl CacheStore for MokaCacheStore {
    fn get(&self, key: &str) -> Option<String> {
        self.cache.get(key).map(|e| e.value)
    }

    fn set(&self, key: &str, value: String, ttl: Duration) {
        self.cache.insert(key.to_string(), Entry { value, ttl });
    }
}

/// Cache lifetime for a URL valid for `expiration_secs`.
///
/// The 60 second floor means a URL valid for 60 seconds or less stays
/// cached past its own expiry; callers issuing such short-lived URLs may
/// receive one that has already lapsed.
pub fn cache_ttl(expiration_secs: u64) -> Duration {
    Duration::from_secs(
        expiration_secs
            .saturating_sub(CACHE_MARGIN_SECS)
            .max(CACHE_MARGIN_SECS),
    )
}

/// Issues presigned URLs, consulting the cache first.
#[derive(Clone)]
pub struct PresignedUrlIssuer {
    cache: Arc<dyn CacheStore>,
}

impl PresignedUrlIssuer {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    /// Cached-or-fresh presigned URL for `method` on `bucket/key`.
    ///
    /// `method` must be `GET` or `PUT`; anything else fails before the
    /// cache or backend is consulted.
    pub async fn issue(
        &self,
        backend: &dyn ObjectBackend,
        bucket: &str,
        key: &str,
        expiration_secs: u64,
        method: &str,
    ) -> StorageResult<String> {
        let method: PresignMethod = method.parse()?;
        if expiration_secs == 0 || expiration_secs > MAX_EXPIRATION_SECS {
            return Err(StorageError::Validation(format!(
                "expiration must be within 1..={MAX_EXPIRATION_SECS} seconds, got {expiration_secs}"
            )));
        }

        let cache_key = keys::presign_cache_key(bucket, key, method.as_str());
        if let Some(url) = self.cache.get(&cache_key) {
            debug!("Presigned URL cache hit: {}", cache_key);
            metrics::counter!(crate::metrics::PRESIGN_CACHE_TOTAL, "result" => "hit").increment(1);
            return Ok(url);
        }
        metrics::counter!(crate::metrics::PRESIGN_CACHE_TOTAL, "result" => "miss").increment(1);

        let url = backend
            .presign(method, bucket, key, Duration::from_secs(expiration_secs))
            .await
            .inspect_err(|e| warn!("Presign {} {}/{} failed: {}", method, bucket, key, e))?;

        self.cache
            .set(&cache_key, url.clone(), cache_ttl(expiration_secs));
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryBackend;

    fn issuer() -> (PresignedUrlIssuer, Arc<MokaCacheStore>) {
        let store = Arc::new(MokaCacheStore::new(100));
        (PresignedUrlIssuer::new(store.clone()), store)
    }

    #[test]
    fn test_cache_ttl() {
        assert_eq!(cache_ttl(3600), Duration::from_secs(3540));
        assert_eq!(cache_ttl(120), Duration::from_secs(60));
        assert_eq!(cache_ttl(90), Duration::from_secs(60));
        assert_eq!(cache_ttl(30), Duration::from_secs(60));
        assert_eq!(cache_ttl(0), Duration::from_secs(60));
    }

    #[test]
    fn test_moka_store_roundtrip() {
        let store = MokaCacheStore::new(10);
        assert!(store.get("k").is_none());
        store.set("k", "v".to_string(), Duration::from_secs(60));
        assert_eq!(store.get("k").as_deref(), Some("v"));
        assert_eq!(store.entry_count(), 1);
    }

    #[test]
    fn test_moka_store_expires_entries() {
        let store = MokaCacheStore::new(10);
        store.set("k", "v".to_string(), Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(80));
        assert!(store.get("k").is_none());
    }

    #[tokio::test]
    async fn test_second_call_hits_cache() {
        let backend = MemoryBackend::new();
        let (issuer, _) = issuer();
        let a = issuer.issue(&backend, "media", "a.txt", 3600, "GET").await.unwrap();
        let b = issuer.issue(&backend, "media", "a.txt", 3600, "GET").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(backend.calls("presign"), 1);
    }

    #[tokio::test]
    async fn test_methods_cached_separately() {
        let backend = MemoryBackend::new();
        let (issuer, store) = issuer();
        let get = issuer.issue(&backend, "media", "a", 3600, "GET").await.unwrap();
        let put = issuer.issue(&backend, "media", "a", 3600, "PUT").await.unwrap();
        assert_ne!(get, put);
        assert_eq!(backend.calls("presign"), 2);
        assert_eq!(store.get("presigned_url:media:a:PUT"), Some(put));
    }

    #[tokio::test]
    async fn test_unsupported_method_touches_nothing() {
        let backend = MemoryBackend::new();
        let (issuer, store) = issuer();
        let err = issuer
            .issue(&backend, "media", "a", 3600, "DELETE")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ValidationError");
        assert_eq!(backend.total_calls(), 0);
        assert_eq!(store.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_is_not_cached() {
        let backend = MemoryBackend::new();
        backend.fail_operation("presign");
        let (issuer, store) = issuer();
        assert!(issuer.issue(&backend, "media", "a", 3600, "GET").await.is_err());
        assert_eq!(store.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_expiration() {
        let backend = MemoryBackend::new();
        let (issuer, _) = issuer();
        assert!(issuer.issue(&backend, "media", "a", 0, "GET").await.is_err());
        assert!(issuer
            .issue(&backend, "media", "a", MAX_EXPIRATION_SECS + 1, "GET")
            .await
            .is_err());
        assert_eq!(backend.total_calls(), 0);
    }
}
