//! In-memory object backend.
//!
//! Buckets, objects, lifecycle rules and multipart sessions are held in a
//! `tokio::sync::RwLock<HashMap<...>>`.  Every call is counted per
//! operation, and individual operations can be switched to fail, so the
//! client's call-count and failure-path guarantees can be checked without
//! a live endpoint.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::backend::{
    BackendFuture, DeleteFailure, DeleteOutcome, LifecycleRule, ListPage, ListedObject,
    ObjectBackend, ObjectData, ObjectHead, PresignMethod, PresignedPost, PutObjectRequest,
};
use crate::errors::{StorageError, StorageResult};

/// Default number of keys returned per listing page.
const DEFAULT_PAGE_SIZE: usize = 1000;

/// One stored object.
#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    metadata: HashMap<String, String>,
    etag: String,
    last_modified: DateTime<Utc>,
}

/// State of a single bucket.
#[derive(Debug, Default)]
struct BucketState {
    /// Ordered so listings come back in key order.
    objects: BTreeMap<String, StoredObject>,
    lifecycle: Vec<LifecycleRule>,
    /// upload_id -> (key, content_type)
    multipart: HashMap<String, (String, String)>,
}

/// In-memory storage backend.
pub struct MemoryBackend {
    buckets: tokio::sync::RwLock<HashMap<String, BucketState>>,
    /// Per-operation call counters.
    calls: Mutex<HashMap<&'static str, u64>>,
    /// Operations forced to fail with a backend error.
    failing: Mutex<HashSet<&'static str>>,
    /// Keys whose deletion is reported as a per-key error.
    undeletable: Mutex<HashSet<String>>,
    /// Maximum keys per listing page.
    page_size: usize,
    /// Monotonic counter embedded in presigned URLs.
    presign_serial: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty backend with no buckets.
    pub fn new() -> Self {
        Self {
            buckets: tokio::sync::RwLock::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            undeletable: Mutex::new(HashSet::new()),
            page_size: DEFAULT_PAGE_SIZE,
            presign_serial: AtomicU64::new(0),
        }
    }

    /// Cap listing pages at `page_size` keys.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Number of times `operation` was invoked.
    pub fn calls(&self, operation: &str) -> u64 {
        self.calls
            .lock()
            .map(|c| c.get(operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Total number of backend invocations across all operations.
    pub fn total_calls(&self) -> u64 {
        self.calls.lock().map(|c| c.values().sum()).unwrap_or(0)
    }

    /// Make every subsequent `operation` call fail with a backend error.
    pub fn fail_operation(&self, operation: &'static str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(operation);
        }
    }

    /// Report deletion of `key` as a per-key error.
    pub fn refuse_delete(&self, key: impl Into<String>) {
        if let Ok(mut keys) = self.undeletable.lock() {
            keys.insert(key.into());
        }
    }

    /// Lifecycle rules currently attached to `bucket`.
    pub async fn lifecycle_rules(&self, bucket: &str) -> Vec<LifecycleRule> {
        let buckets = self.buckets.read().await;
        buckets
            .get(bucket)
            .map(|b| b.lifecycle.clone())
            .unwrap_or_default()
    }

    /// Whether an object exists, without counting a call.
    pub async fn contains(&self, bucket: &str, key: &str) -> bool {
        let buckets = self.buckets.read().await;
        buckets
            .get(bucket)
            .is_some_and(|b| b.objects.contains_key(key))
    }

    /// Count the call and apply any configured failure.
    fn enter(&self, operation: &'static str) -> StorageResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(operation).or_insert(0) += 1;
        }
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(operation))
            .unwrap_or(false);
        if failing {
            return Err(StorageError::backend(operation, "injected failure"));
        }
        Ok(())
    }

    /// Compute the quoted MD5-hex ETag for a byte slice.
    fn compute_etag(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        format!("\"{}\"", hex::encode(hasher.finalize()))
    }

    fn no_such_bucket(bucket: &str) -> StorageError {
        StorageError::not_found(format!("bucket {bucket}"))
    }

    fn no_such_key(key: &str) -> StorageError {
        StorageError::not_found(format!("object {key}"))
    }
}

impl ObjectBackend for MemoryBackend {
    fn head_bucket<'a>(&'a self, bucket: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.enter("head_bucket")?;
            let buckets = self.buckets.read().await;
            if buckets.contains_key(bucket) {
                Ok(())
            } else {
                Err(Self::no_such_bucket(bucket))
            }
        })
    }

    fn create_bucket<'a>(&'a self, bucket: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.enter("create_bucket")?;
            let mut buckets = self.buckets.write().await;
            buckets.entry(bucket.to_string()).or_default();
            Ok(())
        })
    }

    fn put_object(&self, request: PutObjectRequest) -> BackendFuture<'_, String> {
        Box::pin(async move {
            self.enter("put_object")?;
            let mut buckets = self.buckets.write().await;
            let state = buckets
                .get_mut(&request.bucket)
                .ok_or_else(|| Self::no_such_bucket(&request.bucket))?;
            let etag = Self::compute_etag(&request.body);
            state.objects.insert(
                request.key,
                StoredObject {
                    data: request.body,
                    content_type: request.content_type,
                    metadata: request.metadata,
                    etag: etag.clone(),
                    last_modified: Utc::now(),
                },
            );
            Ok(etag)
        })
    }

    fn get_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, ObjectData> {
        Box::pin(async move {
            self.enter("get_object")?;
            let buckets = self.buckets.read().await;
            let state = buckets
                .get(bucket)
                .ok_or_else(|| Self::no_such_bucket(bucket))?;
            let obj = state
                .objects
                .get(key)
                .ok_or_else(|| Self::no_such_key(key))?;
            Ok(ObjectData {
                data: obj.data.clone(),
                content_type: Some(obj.content_type.clone()),
                metadata: obj.metadata.clone(),
            })
        })
    }

    fn head_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, ObjectHead> {
        Box::pin(async move {
            self.enter("head_object")?;
            let buckets = self.buckets.read().await;
            let state = buckets
                .get(bucket)
                .ok_or_else(|| Self::no_such_bucket(bucket))?;
            let obj = state
                .objects
                .get(key)
                .ok_or_else(|| Self::no_such_key(key))?;
            Ok(ObjectHead {
                content_type: Some(obj.content_type.clone()),
                content_length: obj.data.len() as u64,
                metadata: obj.metadata.clone(),
                e_tag: Some(obj.etag.clone()),
                last_modified: Some(obj.last_modified),
            })
        })
    }

    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
        max_keys: Option<u32>,
        continuation_token: Option<String>,
    ) -> BackendFuture<'a, ListPage> {
        Box::pin(async move {
            self.enter("list_objects")?;
            let buckets = self.buckets.read().await;
            let state = buckets
                .get(bucket)
                .ok_or_else(|| Self::no_such_bucket(bucket))?;

            let limit = max_keys
                .map(|m| (m as usize).min(self.page_size))
                .unwrap_or(self.page_size);

            // The continuation token is the last key of the previous page.
            let mut matching = state
                .objects
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .filter(|(k, _)| {
                    continuation_token
                        .as_deref()
                        .map_or(true, |after| k.as_str() > after)
                })
                .peekable();

            let mut objects = Vec::new();
            while objects.len() < limit {
                match matching.next() {
                    Some((key, obj)) => objects.push(ListedObject {
                        key: key.clone(),
                        size: obj.data.len() as u64,
                        last_modified: obj.last_modified,
                        e_tag: obj.etag.clone(),
                    }),
                    None => break,
                }
            }

            let next_continuation_token = if matching.peek().is_some() {
                objects.last().map(|o: &ListedObject| o.key.clone())
            } else {
                None
            };

            Ok(ListPage {
                objects,
                next_continuation_token,
            })
        })
    }

    fn copy_object<'a>(
        &'a self,
        src_bucket: &'a str,
        src_key: &'a str,
        dst_bucket: &'a str,
        dst_key: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.enter("copy_object")?;
            let mut buckets = self.buckets.write().await;
            let source = buckets
                .get(src_bucket)
                .ok_or_else(|| Self::no_such_bucket(src_bucket))?
                .objects
                .get(src_key)
                .cloned()
                .ok_or_else(|| Self::no_such_key(src_key))?;
            let dest = buckets
                .get_mut(dst_bucket)
                .ok_or_else(|| Self::no_such_bucket(dst_bucket))?;
            dest.objects.insert(
                dst_key.to_string(),
                StoredObject {
                    last_modified: Utc::now(),
                    ..source
                },
            );
            Ok(())
        })
    }

    fn delete_objects<'a>(
        &'a self,
        bucket: &'a str,
        keys: &'a [String],
    ) -> BackendFuture<'a, DeleteOutcome> {
        Box::pin(async move {
            self.enter("delete_objects")?;
            let refused = self
                .undeletable
                .lock()
                .map(|k| k.clone())
                .unwrap_or_default();
            let mut buckets = self.buckets.write().await;
            let state = buckets
                .get_mut(bucket)
                .ok_or_else(|| Self::no_such_bucket(bucket))?;

            let mut outcome = DeleteOutcome::default();
            for key in keys {
                if refused.contains(key) {
                    outcome.errors.push(DeleteFailure {
                        key: key.clone(),
                        message: "Access Denied".to_string(),
                    });
                    continue;
                }
                // S3 reports absent keys as deleted.
                state.objects.remove(key);
                outcome.deleted.push(key.clone());
            }
            Ok(outcome)
        })
    }

    fn put_bucket_lifecycle<'a>(
        &'a self,
        bucket: &'a str,
        rules: &'a [LifecycleRule],
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.enter("put_bucket_lifecycle")?;
            let mut buckets = self.buckets.write().await;
            let state = buckets
                .get_mut(bucket)
                .ok_or_else(|| Self::no_such_bucket(bucket))?;
            state.lifecycle = rules.to_vec();
            Ok(())
        })
    }

    fn create_multipart_upload<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        content_type: &'a str,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            self.enter("create_multipart_upload")?;
            let mut buckets = self.buckets.write().await;
            let state = buckets
                .get_mut(bucket)
                .ok_or_else(|| Self::no_such_bucket(bucket))?;
            let upload_id = uuid::Uuid::new_v4().to_string();
            state
                .multipart
                .insert(upload_id.clone(), (key.to_string(), content_type.to_string()));
            Ok(upload_id)
        })
    }

    fn presign<'a>(
        &'a self,
        method: PresignMethod,
        bucket: &'a str,
        key: &'a str,
        expires_in: Duration,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            self.enter("presign")?;
            let serial = self.presign_serial.fetch_add(1, Ordering::SeqCst);
            Ok(format!(
                "memory://{}/{}?method={}&expires={}&serial={}",
                bucket,
                utf8_percent_encode(key, NON_ALPHANUMERIC),
                method,
                expires_in.as_secs(),
                serial
            ))
        })
    }

    fn presign_post<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        content_type: &'a str,
        expires_in: Duration,
    ) -> BackendFuture<'a, PresignedPost> {
        Box::pin(async move {
            self.enter("presign_post")?;
            let mut fields = BTreeMap::new();
            fields.insert("key".to_string(), key.to_string());
            fields.insert("Content-Type".to_string(), content_type.to_string());
            fields.insert("expires".to_string(), expires_in.as_secs().to_string());
            Ok(PresignedPost {
                url: format!("memory://{bucket}"),
                fields,
            })
        })
    }
}
