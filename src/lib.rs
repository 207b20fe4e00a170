//! s3kit -- client-side orchestration over S3-compatible object storage.
//!
//! This crate combines calls to an S3-compatible backend with the local
//! work around them: content hashing and type inference on upload,
//! thumbnail rendering, cached presigned URLs, lifecycle rules, bucket
//! accounting and browser upload forms.  Every public operation reports
//! failure through its return value instead of propagating backend errors.

pub mod client;
pub mod config;
pub mod errors;
pub mod keys;
pub mod metadata;
pub mod metrics;
pub mod presign;
pub mod storage;
pub mod sync;
pub mod thumbnail;

pub use client::{ObjectStoreClient, UploadOptions, UploadResult};
pub use errors::{StorageError, StorageResult};
