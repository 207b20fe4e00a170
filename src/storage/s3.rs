//! S3-compatible backend over the AWS SDK.
//!
//! Talks to AWS S3 or any S3-compatible endpoint (MinIO, Ceph RGW,
//! LocalStack).  Credentials come from the configuration when present,
//! otherwise from the standard AWS credential chain.

use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLifecycleConfiguration, BucketLocationConstraint, CreateBucketConfiguration, Delete,
    ExpirationStatus, LifecycleExpiration, LifecycleRuleFilter, ObjectIdentifier,
};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::time::Duration;
use tracing::{debug, info};

use super::backend::{
    BackendFuture, DeleteFailure, DeleteOutcome, LifecycleRule, ListPage, ListedObject,
    ObjectBackend, ObjectData, ObjectHead, PresignMethod, PresignedPost, PutObjectRequest,
};
use super::post_policy::{sign_post_policy, PostPolicyParams};
use crate::config::ClientConfig;
use crate::errors::StorageError;

/// Characters left unescaped in an `x-amz-copy-source` value.
const COPY_SOURCE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Error codes S3-compatible servers use for a missing bucket or key.
const NOT_FOUND_CODES: [&str; 4] = ["NoSuchKey", "NoSuchBucket", "NotFound", "404"];

/// Backend that forwards every operation to an S3-compatible endpoint.
pub struct S3Backend {
    /// AWS S3 SDK client.
    client: Client,
    /// Endpoint URL without trailing slash.
    endpoint_url: String,
    access_key: String,
    secret_key: String,
    region: String,
    use_path_style: bool,
}

impl S3Backend {
    /// Build the SDK client for `config`.
    ///
    /// Explicit credentials in `config` are injected as static
    /// credentials; empty ones fall back to the default provider chain.
    pub async fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint_url);

        if !config.access_key.is_empty() && !config.secret_key.is_empty() {
            let creds = aws_sdk_s3::config::Credentials::new(
                &config.access_key,
                &config.secret_key,
                None, // session_token
                None, // expiry
                "s3kit-config",
            );
            config_loader = config_loader.credentials_provider(creds);
        }

        let sdk_config = config_loader.load().await;

        let s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.use_path_style);

        let client = Client::from_conf(s3_config_builder.build());

        info!(
            "S3 backend initialized: endpoint={} region={} path_style={}",
            config.endpoint_url, config.region, config.use_path_style
        );

        Ok(Self {
            client,
            endpoint_url: config.endpoint_url.trim_end_matches('/').to_string(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            region: config.region.clone(),
            use_path_style: config.use_path_style,
        })
    }

    /// Classify a service error by its S3 error code.
    fn map_service_error(
        operation: &str,
        code: Option<&str>,
        resource: String,
        err: impl std::fmt::Display,
    ) -> StorageError {
        match code {
            Some(code) if NOT_FOUND_CODES.contains(&code) => StorageError::not_found(resource),
            _ => StorageError::backend(operation, err),
        }
    }

    /// Target URL of a browser upload form for `bucket`.
    fn form_url(&self, bucket: &str) -> String {
        if self.use_path_style {
            return format!("{}/{}", self.endpoint_url, bucket);
        }
        match self.endpoint_url.split_once("://") {
            Some((scheme, host)) => format!("{scheme}://{bucket}.{host}"),
            None => format!("{}/{}", self.endpoint_url, bucket),
        }
    }
}

/// Convert an SDK timestamp to chrono.
fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()).unwrap_or_default()
}

impl ObjectBackend for S3Backend {
    fn head_bucket<'a>(&'a self, bucket: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            debug!("S3 head_bucket: bucket={}", bucket);
            match self.client.head_bucket().bucket(bucket).send().await {
                Ok(_) => Ok(()),
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        Err(StorageError::not_found(format!("bucket {bucket}")))
                    } else {
                        Err(Self::map_service_error(
                            "head_bucket",
                            service_err.meta().code(),
                            format!("bucket {bucket}"),
                            &service_err,
                        ))
                    }
                }
            }
        })
    }

    fn create_bucket<'a>(&'a self, bucket: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            debug!("S3 create_bucket: bucket={}", bucket);
            let mut req = self.client.create_bucket().bucket(bucket);
            // us-east-1 rejects an explicit location constraint.
            if self.region != "us-east-1" {
                req = req.create_bucket_configuration(
                    CreateBucketConfiguration::builder()
                        .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                        .build(),
                );
            }
            req.send()
                .await
                .map_err(|e| StorageError::backend("create_bucket", e.into_service_error()))?;
            Ok(())
        })
    }

    fn put_object(&self, request: PutObjectRequest) -> BackendFuture<'_, String> {
        Box::pin(async move {
            debug!(
                "S3 put_object: bucket={} key={} size={}",
                request.bucket,
                request.key,
                request.body.len()
            );
            let resp = self
                .client
                .put_object()
                .bucket(&request.bucket)
                .key(&request.key)
                .content_type(&request.content_type)
                .set_metadata(Some(request.metadata))
                .body(ByteStream::from(request.body))
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    Self::map_service_error(
                        "put_object",
                        service_err.meta().code(),
                        format!("bucket {}", request.bucket),
                        &service_err,
                    )
                })?;
            Ok(resp.e_tag().unwrap_or_default().to_string())
        })
    }

    fn get_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, ObjectData> {
        Box::pin(async move {
            debug!("S3 get_object: bucket={} key={}", bucket, key);
            let resp = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        StorageError::not_found(format!("object {key}"))
                    } else {
                        Self::map_service_error(
                            "get_object",
                            service_err.meta().code(),
                            format!("object {key}"),
                            &service_err,
                        )
                    }
                })?;

            let content_type = resp.content_type().map(str::to_string);
            let metadata = resp.metadata().cloned().unwrap_or_default();
            let data = resp
                .body
                .collect()
                .await
                .map_err(|e| StorageError::backend("get_object body", e))?
                .into_bytes();

            Ok(ObjectData {
                data,
                content_type,
                metadata,
            })
        })
    }

    fn head_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, ObjectHead> {
        Box::pin(async move {
            debug!("S3 head_object: bucket={} key={}", bucket, key);
            let resp = self
                .client
                .head_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        StorageError::not_found(format!("object {key}"))
                    } else {
                        Self::map_service_error(
                            "head_object",
                            service_err.meta().code(),
                            format!("object {key}"),
                            &service_err,
                        )
                    }
                })?;

            Ok(ObjectHead {
                content_type: resp.content_type().map(str::to_string),
                content_length: resp.content_length().unwrap_or(0).max(0) as u64,
                metadata: resp.metadata().cloned().unwrap_or_default(),
                e_tag: resp.e_tag().map(str::to_string),
                last_modified: resp.last_modified().map(to_chrono),
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
            debug!(
                "S3 list_objects_v2: bucket={} prefix='{}' max_keys={:?}",
                bucket, prefix, max_keys
            );
            let mut req = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(max) = max_keys {
                req = req.max_keys(i32::try_from(max).unwrap_or(i32::MAX));
            }
            if let Some(token) = continuation_token {
                req = req.continuation_token(token);
            }

            let resp = req.send().await.map_err(|e| {
                let service_err = e.into_service_error();
                Self::map_service_error(
                    "list_objects_v2",
                    service_err.meta().code(),
                    format!("bucket {bucket}"),
                    &service_err,
                )
            })?;

            let objects = resp
                .contents()
                .iter()
                .filter_map(|obj| {
                    obj.key().map(|key| ListedObject {
                        key: key.to_string(),
                        size: obj.size().unwrap_or(0).max(0) as u64,
                        last_modified: obj.last_modified().map(to_chrono).unwrap_or_default(),
                        e_tag: obj.e_tag().unwrap_or_default().to_string(),
                    })
                })
                .collect();

            let next_continuation_token = if resp.is_truncated() == Some(true) {
                resp.next_continuation_token().map(str::to_string)
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
            debug!(
                "S3 copy_object: src={}/{} dst={}/{}",
                src_bucket, src_key, dst_bucket, dst_key
            );
            let copy_source = format!(
                "{}/{}",
                src_bucket,
                utf8_percent_encode(src_key, COPY_SOURCE_SET)
            );
            self.client
                .copy_object()
                .bucket(dst_bucket)
                .key(dst_key)
                .copy_source(copy_source)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    Self::map_service_error(
                        "copy_object",
                        service_err.meta().code(),
                        format!("object {src_key}"),
                        &service_err,
                    )
                })?;
            Ok(())
        })
    }

    fn delete_objects<'a>(
        &'a self,
        bucket: &'a str,
        keys: &'a [String],
    ) -> BackendFuture<'a, DeleteOutcome> {
        Box::pin(async move {
            debug!("S3 delete_objects: bucket={} count={}", bucket, keys.len());
            let objects = keys
                .iter()
                .map(|k| ObjectIdentifier::builder().key(k).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StorageError::backend("delete_objects build", e))?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .build()
                .map_err(|e| StorageError::backend("delete_objects build", e))?;

            let resp = self
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    Self::map_service_error(
                        "delete_objects",
                        service_err.meta().code(),
                        format!("bucket {bucket}"),
                        &service_err,
                    )
                })?;

            Ok(DeleteOutcome {
                deleted: resp
                    .deleted()
                    .iter()
                    .filter_map(|d| d.key().map(str::to_string))
                    .collect(),
                errors: resp
                    .errors()
                    .iter()
                    .map(|e| DeleteFailure {
                        key: e.key().unwrap_or_default().to_string(),
                        message: e.message().unwrap_or_default().to_string(),
                    })
                    .collect(),
            })
        })
    }

    fn put_bucket_lifecycle<'a>(
        &'a self,
        bucket: &'a str,
        rules: &'a [LifecycleRule],
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            debug!(
                "S3 put_bucket_lifecycle_configuration: bucket={} rules={}",
                bucket,
                rules.len()
            );
            let sdk_rules = rules
                .iter()
                .map(|rule| {
                    let status = if rule.enabled {
                        ExpirationStatus::Enabled
                    } else {
                        ExpirationStatus::Disabled
                    };
                    aws_sdk_s3::types::LifecycleRule::builder()
                        .id(&rule.id)
                        .status(status)
                        .filter(LifecycleRuleFilter::builder().prefix(&rule.prefix).build())
                        .expiration(
                            LifecycleExpiration::builder()
                                .days(i32::try_from(rule.expiration_days).unwrap_or(i32::MAX))
                                .build(),
                        )
                        .build()
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StorageError::backend("lifecycle rule build", e))?;

            let configuration = BucketLifecycleConfiguration::builder()
                .set_rules(Some(sdk_rules))
                .build()
                .map_err(|e| StorageError::backend("lifecycle configuration build", e))?;

            self.client
                .put_bucket_lifecycle_configuration()
                .bucket(bucket)
                .lifecycle_configuration(configuration)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    Self::map_service_error(
                        "put_bucket_lifecycle_configuration",
                        service_err.meta().code(),
                        format!("bucket {bucket}"),
                        &service_err,
                    )
                })?;
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
            debug!(
                "S3 create_multipart_upload: bucket={} key={} content_type={}",
                bucket, key, content_type
            );
            let resp = self
                .client
                .create_multipart_upload()
                .bucket(bucket)
                .key(key)
                .content_type(content_type)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    Self::map_service_error(
                        "create_multipart_upload",
                        service_err.meta().code(),
                        format!("bucket {bucket}"),
                        &service_err,
                    )
                })?;

            resp.upload_id()
                .map(str::to_string)
                .ok_or_else(|| StorageError::backend("create_multipart_upload", "no upload id"))
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
            debug!(
                "S3 presign: method={} bucket={} key={} expires={}s",
                method,
                bucket,
                key,
                expires_in.as_secs()
            );
            let presigning = PresigningConfig::expires_in(expires_in)
                .map_err(|e| StorageError::Validation(e.to_string()))?;

            let request = match method {
                PresignMethod::Get => self
                    .client
                    .get_object()
                    .bucket(bucket)
                    .key(key)
                    .presigned(presigning)
                    .await
                    .map_err(|e| StorageError::backend("presign get_object", e))?,
                PresignMethod::Put => self
                    .client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .presigned(presigning)
                    .await
                    .map_err(|e| StorageError::backend("presign put_object", e))?,
            };
            Ok(request.uri().to_string())
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
            if self.access_key.is_empty() || self.secret_key.is_empty() {
                return Err(StorageError::backend(
                    "presign_post",
                    "static credentials are required to sign upload forms",
                ));
            }
            debug!(
                "S3 presign_post: bucket={} key={} expires={}s",
                bucket,
                key,
                expires_in.as_secs()
            );
            let params = PostPolicyParams {
                url: self.form_url(bucket),
                bucket,
                key,
                content_type,
                access_key: &self.access_key,
                secret_key: &self.secret_key,
                region: &self.region,
                expires_in,
            };
            Ok(sign_post_policy(&params, Utc::now()))
        })
    }
}

// -- Tests -------------------------------------------------------------------
