//! Abstract object storage backend.
//!
//! [`ObjectBackend`] is the capability the client orchestrates: bucket
//! probes, object put/get/head/list/copy/delete, lifecycle rules,
//! multipart initiation and presigning.  Implementations must report a
//! missing bucket or object as [`StorageError::NotFound`] so callers can
//! tell it apart from a generic failure.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{StorageError, StorageResult};

/// Boxed future returned by every backend method.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = StorageResult<T>> + Send + 'a>>;

/// A request to store one object.
#[derive(Debug, Clone)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

/// Full object content as returned by `get_object`.
#[derive(Debug, Clone)]
pub struct ObjectData {
    /// Raw bytes of the object.
    pub data: Bytes,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Object attributes as returned by `head_object`.
#[derive(Debug, Clone, Default)]
pub struct ObjectHead {
    pub content_type: Option<String>,
    pub content_length: u64,
    /// User metadata (without the `x-amz-meta-` prefix).
    pub metadata: HashMap<String, String>,
    pub e_tag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One entry of a listing page.
#[derive(Debug, Clone)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    /// Entity tag as the backend reports it (usually quoted).
    pub e_tag: String,
}

/// A single page of `list_objects`.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ListedObject>,
    /// Token for the next page; `None` once the listing is exhausted.
    pub next_continuation_token: Option<String>,
}

/// A key the backend refused to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    pub key: String,
    pub message: String,
}

/// Outcome of a batch delete.
#[derive(Debug, Clone, Default)]
pub struct DeleteOutcome {
    pub deleted: Vec<String>,
    pub errors: Vec<DeleteFailure>,
}

/// A prefix-scoped expiration rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleRule {
    pub id: String,
    pub enabled: bool,
    pub prefix: String,
    pub expiration_days: u32,
}

/// HTTP method a presigned URL is issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresignMethod {
    Get,
    Put,
}

impl PresignMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresignMethod::Get => "GET",
            PresignMethod::Put => "PUT",
        }
    }
}

impl fmt::Display for PresignMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresignMethod {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(PresignMethod::Get),
            "PUT" => Ok(PresignMethod::Put),
            other => Err(StorageError::Validation(format!(
                "unsupported presign method: {other}"
            ))),
        }
    }
}

/// Form-POST upload descriptor: target URL plus the fields the browser
/// must submit alongside the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedPost {
    pub url: String,
    pub fields: BTreeMap<String, String>,
}

/// Async object storage contract.
pub trait ObjectBackend: Send + Sync + 'static {
    /// Succeeds if `bucket` exists; `NotFound` if it does not.
    fn head_bucket<'a>(&'a self, bucket: &'a str) -> BackendFuture<'a, ()>;

    /// Create `bucket`.
    fn create_bucket<'a>(&'a self, bucket: &'a str) -> BackendFuture<'a, ()>;

    /// Store an object, returning its entity tag.
    fn put_object(&self, request: PutObjectRequest) -> BackendFuture<'_, String>;

    /// Read the full object.
    fn get_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, ObjectData>;

    /// Read object attributes without the body.
    fn head_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, ObjectHead>;

    /// List one page of objects under `prefix`, in key order.
    fn list_objects<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
        max_keys: Option<u32>,
        continuation_token: Option<String>,
    ) -> BackendFuture<'a, ListPage>;

    /// Server-side copy.
    fn copy_object<'a>(
        &'a self,
        src_bucket: &'a str,
        src_key: &'a str,
        dst_bucket: &'a str,
        dst_key: &'a str,
    ) -> BackendFuture<'a, ()>;

    /// Delete a batch of keys, reporting per-key failures.
    fn delete_objects<'a>(
        &'a self,
        bucket: &'a str,
        keys: &'a [String],
    ) -> BackendFuture<'a, DeleteOutcome>;

    /// Replace the bucket's lifecycle configuration with `rules`.
    fn put_bucket_lifecycle<'a>(
        &'a self,
        bucket: &'a str,
        rules: &'a [LifecycleRule],
    ) -> BackendFuture<'a, ()>;

    /// Start a multipart upload, returning the upload id.
    fn create_multipart_upload<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        content_type: &'a str,
    ) -> BackendFuture<'a, String>;

    /// Issue a presigned URL for `method` on one object.
    fn presign<'a>(
        &'a self,
        method: PresignMethod,
        bucket: &'a str,
        key: &'a str,
        expires_in: Duration,
    ) -> BackendFuture<'a, String>;

    /// Issue a browser form-POST upload descriptor for one key.
    fn presign_post<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        content_type: &'a str,
        expires_in: Duration,
    ) -> BackendFuture<'a, PresignedPost>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presign_method_parse() {
        assert_eq!("GET".parse::<PresignMethod>().unwrap(), PresignMethod::Get);
        assert_eq!("PUT".parse::<PresignMethod>().unwrap(), PresignMethod::Put);
    }

    #[test]
    fn test_presign_method_rejects_others() {
        let err = "DELETE".parse::<PresignMethod>().unwrap_err();
        assert_eq!(err.code(), "ValidationError");
        assert!("get".parse::<PresignMethod>().is_err());
    }

    #[test]
    fn test_presign_method_display() {
        assert_eq!(PresignMethod::Put.to_string(), "PUT");
    }
}
