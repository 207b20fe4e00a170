//! Object key conventions.
//!
//! Keys are plain strings; `/` is only a naming convention.  This module
//! holds the few derivations the client performs on them.

use crate::config::ClientConfig;

/// Suffix appended to every generated thumbnail key.
pub const THUMBNAIL_SUFFIX: &str = "_thumb.jpg";

/// Derive the thumbnail key for `source_key` under `prefix`.
///
/// Every `/` in the source key is flattened to `_`, so
/// `photos/a/b.png` under `thumbnails/` becomes
/// `thumbnails/photos_a_b.png_thumb.jpg`.
pub fn thumbnail_key(source_key: &str, prefix: &str) -> String {
    format!("{prefix}{}{THUMBNAIL_SUFFIX}", source_key.replace('/', "_"))
}

/// Public URL of `key` in `bucket`: `{scheme}://{host}/{bucket}/{key}`.
pub fn public_url(config: &ClientConfig, bucket: &str, key: &str) -> String {
    format!(
        "{}://{}/{}/{}",
        config.scheme(),
        config.endpoint_host(),
        bucket,
        key
    )
}

/// Cache key for a presigned URL.
pub fn presign_cache_key(bucket: &str, key: &str, method: &str) -> String {
    format!("presigned_url:{bucket}:{key}:{method}")
}
