//! Convenience helpers on top of [`ObjectStoreClient`].

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::client::{ObjectStoreClient, UploadOptions};
use crate::metadata::DEFAULT_CONTENT_TYPE;
use crate::metrics::record_operation;
use crate::presign::DEFAULT_EXPIRATION_SECS;

/// Metadata tag recorded on every synced file.
pub const SYNC_SOURCE_TAG: (&str, &str) = ("source", "local_sync");

/// Form-POST descriptor for a direct browser upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedUpload {
    pub url: String,
    pub fields: BTreeMap<String, String>,
    pub object_name: String,
    pub expires_in: u64,
}

/// Upload the file at `local_path` to `key`, tagged `source=local_sync`.
///
/// Returns `false` if the file cannot be opened or the upload fails.
pub async fn sync_file_to_object(
    client: &ObjectStoreClient,
    local_path: impl AsRef<Path>,
    key: &str,
) -> bool {
    let local_path = local_path.as_ref();
    let mut file = match std::fs::File::open(local_path) {
        Ok(file) => file,
        Err(e) => {
            warn!("Cannot open {} for sync: {}", local_path.display(), e);
            record_operation("sync_file_to_object", false);
            return false;
        }
    };

    let options = UploadOptions {
        metadata: HashMap::from([(SYNC_SOURCE_TAG.0.to_string(), SYNC_SOURCE_TAG.1.to_string())]),
        content_type: None,
        original_name: Some(local_path.display().to_string()),
    };
    let ok = client
        .upload_with_metadata(&mut file, key, options)
        .await
        .is_success();
    record_operation("sync_file_to_object", ok);
    ok
}

/// Issue a form-POST descriptor letting a browser upload straight to `key`.
///
/// `content_type` defaults to `application/octet-stream`.  `None` on
/// backend failure.
pub async fn generate_signed_upload_url(
    client: &ObjectStoreClient,
    key: &str,
    content_type: Option<&str>,
    expiration_secs: u64,
) -> Option<SignedUpload> {
    let content_type = content_type.unwrap_or(DEFAULT_CONTENT_TYPE);
    let expiration_secs = if expiration_secs == 0 {
        DEFAULT_EXPIRATION_SECS
    } else {
        expiration_secs
    };

    let result = client
        .backend()
        .presign_post(
            client.bucket(),
            key,
            content_type,
            Duration::from_secs(expiration_secs),
        )
        .await;
    record_operation("generate_signed_upload_url", result.is_ok());

    match result {
        Ok(post) => Some(SignedUpload {
            url: post.url,
            fields: post.fields,
            object_name: key.to_string(),
            expires_in: expiration_secs,
        }),
        Err(e) => {
            warn!("Signing upload form for {} failed: {}", key, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::presign::MokaCacheStore;
    use crate::storage::backend::ObjectBackend;
    use crate::storage::memory::MemoryBackend;
    use std::io::Write;
    use std::sync::Arc;

    async fn client() -> (ObjectStoreClient, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        backend.create_bucket("media").await.unwrap();
        let client = ObjectStoreClient::new(
            ClientConfig::new("http://minio.local:9000", "media"),
            backend.clone(),
            Arc::new(MokaCacheStore::new(10)),
        );
        (client, backend)
    }

    #[tokio::test]
    async fn test_sync_uploads_with_tag_and_name() {
        let (client, backend) = client().await;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"local contents").unwrap();

        assert!(sync_file_to_object(&client, file.path(), "synced/notes.txt").await);

        let head = backend.head_object("media", "synced/notes.txt").await.unwrap();
        assert_eq!(head.metadata["source"], "local_sync");
        assert_eq!(
            head.metadata["original-name"],
            file.path().display().to_string()
        );
        assert_eq!(head.content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_sync_missing_file_is_false() {
        let (client, backend) = client().await;
        let before = backend.total_calls();
        assert!(!sync_file_to_object(&client, "/nonexistent/file.bin", "x").await);
        assert_eq!(backend.total_calls(), before);
    }

    #[tokio::test]
    async fn test_sync_upload_failure_is_false() {
        let (client, backend) = client().await;
        backend.fail_operation("put_object");
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(!sync_file_to_object(&client, file.path(), "x").await);
    }

    #[tokio::test]
    async fn test_signed_upload_descriptor() {
        let (client, _) = client().await;
        let signed = generate_signed_upload_url(&client, "up/a.png", Some("image/png"), 600)
            .await
            .unwrap();
        assert_eq!(signed.object_name, "up/a.png");
        assert_eq!(signed.expires_in, 600);
        assert_eq!(signed.url, "memory://media");
        assert_eq!(signed.fields["key"], "up/a.png");
        assert_eq!(signed.fields["Content-Type"], "image/png");
    }

    #[tokio::test]
    async fn test_signed_upload_defaults() {
        let (client, _) = client().await;
        let signed = generate_signed_upload_url(&client, "k", None, 0).await.unwrap();
        assert_eq!(signed.expires_in, DEFAULT_EXPIRATION_SECS);
        assert_eq!(signed.fields["Content-Type"], DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_signed_upload_backend_failure() {
        let (client, backend) = client().await;
        backend.fail_operation("presign_post");
        assert!(generate_signed_upload_url(&client, "k", None, 60).await.is_none());
    }
}
