//! Upload metadata codec.
//!
//! Reads an upload source once to compute its SHA-256 digest, resolves the
//! content type and merges caller metadata with the reserved system keys.
//! The whole body is buffered in memory; streaming hashing of very large
//! sources is not supported.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{Read, Seek};

use crate::errors::StorageResult;

/// Content type used when neither the caller nor the key's extension gives one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Reserved metadata key: UTC upload time, ISO-8601.
pub const META_UPLOAD_TIMESTAMP: &str = "upload-timestamp";
/// Reserved metadata key: source file name.
pub const META_ORIGINAL_NAME: &str = "original-name";
/// Reserved metadata key: hex SHA-256 of the body.
pub const META_SHA256: &str = "sha256";

/// Recorded as `original-name` when the source has no name.
pub const UNKNOWN_NAME: &str = "unknown";

/// An upload body with everything derived from it.
#[derive(Debug, Clone)]
pub struct EncodedObject {
    pub body: Bytes,
    pub size: u64,
    /// Lowercase hex SHA-256 of `body`.
    pub sha256: String,
    pub content_type: String,
    /// Caller metadata with the reserved keys applied.
    pub metadata: HashMap<String, String>,
}

/// Resolve the content type: explicit value, else the key's extension,
/// else [`DEFAULT_CONTENT_TYPE`].
pub fn resolve_content_type(key: &str, explicit: Option<&str>) -> String {
    if let Some(ct) = explicit.filter(|ct| !ct.is_empty()) {
        return ct.to_string();
    }
    mime_guess::from_path(key)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

/// Hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Read `source` to the end, hash it and build the object metadata.
///
/// The source is rewound to its start afterwards so the caller can hand
/// it on without reopening it.
pub fn build_metadata<R: Read + Seek>(
    source: &mut R,
    key: &str,
    original_name: Option<&str>,
    user_metadata: Option<&HashMap<String, String>>,
    content_type: Option<&str>,
) -> StorageResult<EncodedObject> {
    build_metadata_at(
        source,
        key,
        original_name,
        user_metadata,
        content_type,
        Utc::now(),
    )
}

/// [`build_metadata`] with an explicit upload time.
pub fn build_metadata_at<R: Read + Seek>(
    source: &mut R,
    key: &str,
    original_name: Option<&str>,
    user_metadata: Option<&HashMap<String, String>>,
    content_type: Option<&str>,
    now: DateTime<Utc>,
) -> StorageResult<EncodedObject> {
    let mut buf = Vec::new();
    source.rewind()?;
    source.read_to_end(&mut buf)?;
    source.rewind()?;

    let sha256 = sha256_hex(&buf);

    let mut metadata = user_metadata.cloned().unwrap_or_default();
    metadata.insert(
        META_UPLOAD_TIMESTAMP.to_string(),
        now.to_rfc3339_opts(SecondsFormat::Micros, true),
    );
    metadata.insert(
        META_ORIGINAL_NAME.to_string(),
        original_name
            .filter(|n| !n.is_empty())
            .unwrap_or(UNKNOWN_NAME)
            .to_string(),
    );
    metadata.insert(META_SHA256.to_string(), sha256.clone());

    Ok(EncodedObject {
        size: buf.len() as u64,
        body: Bytes::from(buf),
        sha256,
        content_type: resolve_content_type(key, content_type),
        metadata,
    })
}
