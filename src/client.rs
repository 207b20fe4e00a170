//! Storage operations facade.
//!
//! [`ObjectStoreClient`] is the long-lived handle applications build once
//! and share.  Every operation wraps one or more backend calls and returns
//! a documented value on failure (`false`, `None`, an empty list, a zeroed
//! total or a failure variant) after logging the cause; backend errors
//! never propagate to the caller.

use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Seek};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, Config};
use crate::errors::{StorageError, StorageResult};
use crate::keys;
use crate::metadata::{self, EncodedObject, DEFAULT_CONTENT_TYPE};
use crate::metrics::record_operation;
use crate::presign::{CacheStore, MokaCacheStore, PresignedUrlIssuer};
use crate::storage::backend::{LifecycleRule, ObjectBackend, PutObjectRequest};
use crate::storage::s3::S3Backend;
use crate::thumbnail::{self, ImageCodec, JpegThumbnailCodec, ThumbnailSpec};

/// Id of the single lifecycle rule this client manages.
pub const LIFECYCLE_RULE_ID: &str = "auto-delete-rule";
/// Default expiry of the lifecycle rule, in days.
pub const DEFAULT_LIFECYCLE_DAYS: u32 = 90;
/// Default key prefix of the lifecycle rule.
pub const DEFAULT_LIFECYCLE_PREFIX: &str = "temp/";
/// Default page size of [`ObjectStoreClient::list_with_metadata`].
pub const DEFAULT_MAX_KEYS: u32 = 1000;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Optional inputs to [`ObjectStoreClient::upload_with_metadata`].
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Caller metadata; reserved keys are overwritten.
    pub metadata: HashMap<String, String>,
    /// Explicit content type; inferred from the key when absent.
    pub content_type: Option<String>,
    /// Name of the source file, recorded as `original-name`.
    pub original_name: Option<String>,
}

/// Outcome of an upload: either every success field, or the error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadResult {
    Success {
        object_name: String,
        size: u64,
        hash: String,
        content_type: String,
        url: String,
    },
    Failure {
        object_name: String,
        error: String,
    },
}

impl UploadResult {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadResult::Success { .. })
    }

    pub fn object_name(&self) -> &str {
        match self {
            UploadResult::Success { object_name, .. } | UploadResult::Failure { object_name, .. } => {
                object_name
            }
        }
    }
}

/// A listed object enriched with its head metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectDescriptor {
    pub key: String,
    pub size: u64,
    /// RFC 3339 timestamp.
    pub last_modified: String,
    /// Entity tag without surrounding quotes.
    pub etag: String,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

/// A failed deletion.  `key` is `None` when the whole batch failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteError {
    pub key: Option<String>,
    pub error: String,
}

/// Outcome of [`ObjectStoreClient::delete_objects`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub deleted: Vec<String>,
    pub errors: Vec<DeleteError>,
}

/// Aggregate size of a bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BucketSize {
    pub total_size_bytes: u64,
    pub total_size_mb: f64,
    pub total_size_gb: f64,
    pub object_count: u64,
}

impl BucketSize {
    fn from_totals(total_size_bytes: u64, object_count: u64) -> Self {
        Self {
            total_size_bytes,
            total_size_mb: round2(total_size_bytes as f64 / BYTES_PER_MB),
            total_size_gb: round2(total_size_bytes as f64 / BYTES_PER_GB),
            object_count,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Client handle over one endpoint and default bucket.
#[derive(Clone)]
pub struct ObjectStoreClient {
    config: ClientConfig,
    backend: Arc<dyn ObjectBackend>,
    presigner: PresignedUrlIssuer,
    codec: Arc<dyn ImageCodec>,
    thumbnails: ThumbnailSpec,
}

impl ObjectStoreClient {
    /// Build a client over an existing backend and cache store.
    pub fn new(
        config: ClientConfig,
        backend: Arc<dyn ObjectBackend>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            config,
            backend,
            presigner: PresignedUrlIssuer::new(cache),
            codec: Arc::new(JpegThumbnailCodec),
            thumbnails: ThumbnailSpec::from(&crate::config::ThumbnailConfig::default()),
        }
    }

    /// Build a client talking to the configured S3 endpoint.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let backend = S3Backend::new(&config.storage).await?;
        let cache = MokaCacheStore::new(config.cache.max_entries);
        Ok(Self::new(config.storage.clone(), Arc::new(backend), Arc::new(cache))
            .with_thumbnail_defaults(ThumbnailSpec::from(&config.thumbnail)))
    }

    /// Replace the image codec used for thumbnails.
    pub fn with_codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Replace the default thumbnail bounds and prefix.
    pub fn with_thumbnail_defaults(mut self, spec: ThumbnailSpec) -> Self {
        self.thumbnails = spec;
        self
    }

    /// The default bucket.
    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn ObjectBackend {
        self.backend.as_ref()
    }

    pub fn thumbnail_defaults(&self) -> &ThumbnailSpec {
        &self.thumbnails
    }

    /// Make sure `bucket` (default bucket when `None`) exists, creating it
    /// if the backend reports it missing.
    pub async fn ensure_bucket_exists(&self, bucket: Option<&str>) -> bool {
        let bucket = bucket.unwrap_or(self.config.bucket.as_str());
        let ok = match self.backend.head_bucket(bucket).await {
            Ok(()) => true,
            Err(e) if e.is_not_found() => match self.backend.create_bucket(bucket).await {
                Ok(()) => {
                    info!("Created bucket {}", bucket);
                    true
                }
                Err(e) => {
                    warn!("Failed to create bucket {}: {}", bucket, e);
                    false
                }
            },
            Err(e) => {
                warn!("Failed to probe bucket {}: {}", bucket, e);
                false
            }
        };
        record_operation("ensure_bucket_exists", ok);
        ok
    }

    /// Hash, tag and store the contents of `source` under `key`.
    ///
    /// `source` is read to the end and rewound to its start.
    pub async fn upload_with_metadata<R: Read + Seek>(
        &self,
        source: &mut R,
        key: &str,
        options: UploadOptions,
    ) -> UploadResult {
        let encoded = metadata::build_metadata(
            source,
            key,
            options.original_name.as_deref(),
            Some(&options.metadata),
            options.content_type.as_deref(),
        );
        let result = match encoded {
            Ok(encoded) => self.put_encoded(key, encoded).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(success) => {
                record_operation("upload_with_metadata", true);
                success
            }
            Err(e) => {
                warn!("Upload of {} failed: {}", key, e);
                record_operation("upload_with_metadata", false);
                UploadResult::Failure {
                    object_name: key.to_string(),
                    error: e.to_string(),
                }
            }
        }
    }

    async fn put_encoded(&self, key: &str, encoded: EncodedObject) -> StorageResult<UploadResult> {
        let EncodedObject {
            body,
            size,
            sha256,
            content_type,
            metadata,
        } = encoded;

        self.backend
            .put_object(PutObjectRequest {
                bucket: self.config.bucket.clone(),
                key: key.to_string(),
                body,
                content_type: content_type.clone(),
                metadata,
            })
            .await?;

        metrics::counter!(crate::metrics::BYTES_UPLOADED_TOTAL).increment(size);
        debug!("Uploaded {} ({} bytes, sha256={})", key, size, sha256);

        Ok(UploadResult::Success {
            object_name: key.to_string(),
            size,
            hash: sha256,
            content_type,
            url: self.object_url(key),
        })
    }

    /// List up to `max_keys` objects under `prefix`, fetching each
    /// object's head for its content type and metadata.
    ///
    /// This issues one head request per listed object.  Any failure
    /// yields an empty list.
    pub async fn list_with_metadata(&self, prefix: &str, max_keys: u32) -> Vec<ObjectDescriptor> {
        let result = self.try_list_with_metadata(prefix, max_keys).await;
        record_operation("list_with_metadata", result.is_ok());
        result.unwrap_or_else(|e| {
            warn!("Listing {}/{} failed: {}", self.config.bucket, prefix, e);
            Vec::new()
        })
    }

    async fn try_list_with_metadata(
        &self,
        prefix: &str,
        max_keys: u32,
    ) -> StorageResult<Vec<ObjectDescriptor>> {
        let bucket = &self.config.bucket;
        let page = self
            .backend
            .list_objects(bucket, prefix, Some(max_keys), None)
            .await?;

        let mut objects = Vec::with_capacity(page.objects.len());
        for listed in page.objects {
            let head = self.backend.head_object(bucket, &listed.key).await?;
            objects.push(ObjectDescriptor {
                size: listed.size,
                last_modified: listed.last_modified.to_rfc3339(),
                etag: listed.e_tag.trim_matches('"').to_string(),
                content_type: head.content_type.unwrap_or_else(|| "unknown".to_string()),
                metadata: head.metadata,
                key: listed.key,
            });
        }
        Ok(objects)
    }

    /// Server-side copy from the default bucket to `dest_bucket`
    /// (the default bucket when `None`).
    pub async fn copy_object(
        &self,
        source_key: &str,
        dest_key: &str,
        dest_bucket: Option<&str>,
    ) -> bool {
        let dest_bucket = dest_bucket.unwrap_or(self.config.bucket.as_str());
        let ok = match self
            .backend
            .copy_object(&self.config.bucket, source_key, dest_bucket, dest_key)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Copy {}/{} -> {}/{} failed: {}",
                    self.config.bucket, source_key, dest_bucket, dest_key, e
                );
                false
            }
        };
        record_operation("copy_object", ok);
        ok
    }

    /// Delete `keys` from the default bucket in one batch.
    pub async fn delete_objects(&self, keys: &[String]) -> DeleteReport {
        if keys.is_empty() {
            record_operation("delete_objects", true);
            return DeleteReport::default();
        }
        match self.backend.delete_objects(&self.config.bucket, keys).await {
            Ok(outcome) => {
                record_operation("delete_objects", outcome.errors.is_empty());
                DeleteReport {
                    deleted: outcome.deleted,
                    errors: outcome
                        .errors
                        .into_iter()
                        .map(|f| DeleteError {
                            key: Some(f.key),
                            error: f.message,
                        })
                        .collect(),
                }
            }
            Err(e) => {
                warn!("Batch delete of {} keys failed: {}", keys.len(), e);
                record_operation("delete_objects", false);
                DeleteReport {
                    deleted: Vec::new(),
                    errors: vec![DeleteError {
                        key: None,
                        error: e.to_string(),
                    }],
                }
            }
        }
    }

    /// Replace the bucket lifecycle with one enabled rule expiring keys
    /// under `prefix` after `days_to_expire` days.
    pub async fn set_bucket_lifecycle(&self, days_to_expire: u32, prefix: &str) -> bool {
        if days_to_expire == 0 {
            warn!("Lifecycle expiry must be at least one day");
            record_operation("set_bucket_lifecycle", false);
            return false;
        }
        let rules = [LifecycleRule {
            id: LIFECYCLE_RULE_ID.to_string(),
            enabled: true,
            prefix: prefix.to_string(),
            expiration_days: days_to_expire,
        }];
        let ok = match self
            .backend
            .put_bucket_lifecycle(&self.config.bucket, &rules)
            .await
        {
            Ok(()) => {
                info!(
                    "Lifecycle set on {}: prefix='{}' days={}",
                    self.config.bucket, prefix, days_to_expire
                );
                true
            }
            Err(e) => {
                warn!("Setting lifecycle on {} failed: {}", self.config.bucket, e);
                false
            }
        };
        record_operation("set_bucket_lifecycle", ok);
        ok
    }

    /// Total size and object count of the default bucket, walking every
    /// listing page.  Zeroed on failure.
    pub async fn get_bucket_size(&self) -> BucketSize {
        let result = self.try_bucket_size().await;
        record_operation("get_bucket_size", result.is_ok());
        result.unwrap_or_else(|e| {
            warn!("Sizing bucket {} failed: {}", self.config.bucket, e);
            BucketSize::default()
        })
    }

    async fn try_bucket_size(&self) -> StorageResult<BucketSize> {
        let mut total_bytes = 0u64;
        let mut count = 0u64;
        let mut token = None;
        loop {
            let page = self
                .backend
                .list_objects(&self.config.bucket, "", None, token)
                .await?;
            for obj in &page.objects {
                total_bytes += obj.size;
                count += 1;
            }
            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(BucketSize::from_totals(total_bytes, count))
    }

    /// Start a multipart upload, returning its upload id.
    pub async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> Option<String> {
        let content_type = content_type.unwrap_or(DEFAULT_CONTENT_TYPE);
        let result = self
            .backend
            .create_multipart_upload(&self.config.bucket, key, content_type)
            .await;
        record_operation("create_multipart_upload", result.is_ok());
        result
            .inspect_err(|e| warn!("Starting multipart upload of {} failed: {}", key, e))
            .ok()
    }

    /// Public URL of `key` in the default bucket.
    pub fn get_object_url(&self, key: &str) -> String {
        record_operation("get_object_url", true);
        self.object_url(key)
    }

    fn object_url(&self, key: &str) -> String {
        keys::public_url(&self.config, &self.config.bucket, key)
    }

    /// Presigned `GET` or `PUT` URL for `key`, served from cache when
    /// possible.  `None` for any other method or on backend failure.
    pub async fn get_presigned_url(
        &self,
        key: &str,
        expiration_secs: u64,
        method: &str,
    ) -> Option<String> {
        let result = self
            .presigner
            .issue(
                self.backend.as_ref(),
                &self.config.bucket,
                key,
                expiration_secs,
                method,
            )
            .await;
        record_operation("get_presigned_url", result.is_ok());
        match result {
            Ok(url) => Some(url),
            Err(StorageError::Validation(reason)) => {
                debug!("Presign request rejected: {}", reason);
                None
            }
            Err(_) => None,
        }
    }

    /// Thumbnail `source_key` into `prefix`, bounded by
    /// `max_width`×`max_height`.
    ///
    /// Failures are logged and returned, never panicked on, so batch
    /// callers can carry on with the next image.
    pub async fn generate_thumbnail(
        &self,
        source_key: &str,
        max_width: u32,
        max_height: u32,
        prefix: &str,
    ) -> StorageResult<String> {
        let spec = ThumbnailSpec {
            max_width,
            max_height,
            prefix: prefix.to_string(),
        };
        let result = thumbnail::generate_thumbnail(
            self.backend.as_ref(),
            self.codec.clone(),
            &self.config.bucket,
            source_key,
            &spec,
        )
        .await;
        record_operation("generate_thumbnail", result.is_ok());
        result.inspect_err(|e| warn!("Thumbnail of {} failed: {} ({})", source_key, e, e.code()))
    }

    /// [`generate_thumbnail`](Self::generate_thumbnail) with the configured defaults.
    pub async fn generate_default_thumbnail(&self, source_key: &str) -> StorageResult<String> {
        let ThumbnailSpec {
            max_width,
            max_height,
            prefix,
        } = self.thumbnails.clone();
        self.generate_thumbnail(source_key, max_width, max_height, &prefix)
            .await
    }
}
