//! End-to-end behaviour of the client against the in-memory backend.

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use s3kit::client::{BucketSize, DEFAULT_LIFECYCLE_PREFIX, DEFAULT_MAX_KEYS};
use s3kit::config::ClientConfig;
use s3kit::metadata::{sha256_hex, META_ORIGINAL_NAME, META_SHA256, META_UPLOAD_TIMESTAMP};
use s3kit::presign::MokaCacheStore;
use s3kit::storage::backend::{LifecycleRule, ObjectBackend};
use s3kit::storage::memory::MemoryBackend;
use s3kit::thumbnail::{META_ORIGINAL_IMAGE, META_THUMBNAIL_SIZE};
use s3kit::{ObjectStoreClient, UploadOptions, UploadResult};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

fn client_over(backend: Arc<MemoryBackend>) -> ObjectStoreClient {
    ObjectStoreClient::new(
        ClientConfig::new("http://minio.local:9000", "media"),
        backend,
        Arc::new(MokaCacheStore::new(1000)),
    )
}

async fn ready_client() -> (ObjectStoreClient, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let client = client_over(backend.clone());
    assert!(client.ensure_bucket_exists(None).await);
    (client, backend)
}

async fn upload(client: &ObjectStoreClient, key: &str, body: &[u8]) -> UploadResult {
    client
        .upload_with_metadata(&mut Cursor::new(body.to_vec()), key, UploadOptions::default())
        .await
}

fn png(w: u32, h: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(w, h, Rgba([0, 128, 255, 200]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

// -- Upload ------------------------------------------------------------------

#[tokio::test]
async fn upload_hash_matches_stored_bytes() {
    let (client, backend) = ready_client().await;
    let body = b"The quick brown fox jumps over the lazy dog";

    let result = upload(&client, "docs/fox.txt", body).await;
    let UploadResult::Success {
        object_name,
        size,
        hash,
        content_type,
        url,
    } = result.clone()
    else {
        panic!("upload failed: {result:?}");
    };

    assert_eq!(object_name, "docs/fox.txt");
    assert_eq!(size, body.len() as u64);
    assert_eq!(content_type, "text/plain");
    assert_eq!(url, "http://minio.local:9000/media/docs/fox.txt");

    let stored = backend.get_object("media", "docs/fox.txt").await.unwrap();
    assert_eq!(stored.data.as_ref(), body);
    assert_eq!(hash, sha256_hex(&stored.data));
    assert_eq!(stored.metadata[META_SHA256], hash);
}

#[tokio::test]
async fn upload_merges_user_and_system_metadata() {
    let (client, backend) = ready_client().await;
    let options = UploadOptions {
        metadata: HashMap::from([
            ("owner".to_string(), "alice".to_string()),
            (META_ORIGINAL_NAME.to_string(), "forged".to_string()),
        ]),
        content_type: Some("application/x-custom".to_string()),
        original_name: Some("report.bin".to_string()),
    };
    let result = client
        .upload_with_metadata(&mut Cursor::new(vec![1, 2, 3]), "r.png", options)
        .await;
    assert!(result.is_success());

    let head = backend.head_object("media", "r.png").await.unwrap();
    assert_eq!(head.content_type.as_deref(), Some("application/x-custom"));
    assert_eq!(head.metadata["owner"], "alice");
    assert_eq!(head.metadata[META_ORIGINAL_NAME], "report.bin");
    assert!(head.metadata.contains_key(META_UPLOAD_TIMESTAMP));
}

#[tokio::test]
async fn upload_reads_whole_stream_and_rewinds() {
    let (client, backend) = ready_client().await;
    let mut source = Cursor::new(b"reusable".to_vec());
    source.set_position(3);
    let first = client
        .upload_with_metadata(&mut source, "a", UploadOptions::default())
        .await;
    assert_eq!(source.position(), 0);

    let UploadResult::Success { size, hash, .. } = first.clone() else {
        panic!("upload failed: {first:?}");
    };
    assert_eq!(size, 8);
    assert_eq!(hash, sha256_hex(b"reusable"));
    let stored = backend.get_object("media", "a").await.unwrap();
    assert_eq!(stored.data.as_ref(), b"reusable");
}

// -- Buckets -----------------------------------------------------------------

#[tokio::test]
async fn ensure_bucket_is_idempotent() {
    let backend = Arc::new(MemoryBackend::new());
    let client = client_over(backend.clone());

    assert!(client.ensure_bucket_exists(None).await);
    assert!(client.ensure_bucket_exists(None).await);
    assert_eq!(backend.calls("create_bucket"), 1);
    assert_eq!(backend.calls("head_bucket"), 2);
}

// -- Presigned URLs ----------------------------------------------------------

#[tokio::test]
async fn presigned_url_is_cached() {
    let (client, backend) = ready_client().await;
    let a = client.get_presigned_url("a.txt", 3600, "GET").await.unwrap();
    let b = client.get_presigned_url("a.txt", 3600, "GET").await.unwrap();
    assert_eq!(a, b);
    assert_eq!(backend.calls("presign"), 1);
}

#[tokio::test]
async fn presigned_delete_is_rejected_without_backend_calls() {
    let (client, backend) = ready_client().await;
    let before = backend.total_calls();
    assert!(client.get_presigned_url("a.txt", 3600, "DELETE").await.is_none());
    assert_eq!(backend.total_calls(), before);
}

#[tokio::test]
async fn presigned_backend_failure_is_none() {
    let (client, backend) = ready_client().await;
    backend.fail_operation("presign");
    assert!(client.get_presigned_url("a.txt", 3600, "PUT").await.is_none());
}

// -- Delete ------------------------------------------------------------------

#[tokio::test]
async fn delete_empty_short_circuits() {
    let (client, backend) = ready_client().await;
    let before = backend.total_calls();
    let report = client.delete_objects(&[]).await;
    assert!(report.deleted.is_empty());
    assert!(report.errors.is_empty());
    assert_eq!(backend.total_calls(), before);
}

#[tokio::test]
async fn delete_reports_per_key_results() {
    let (client, backend) = ready_client().await;
    upload(&client, "a", b"1").await;
    upload(&client, "b", b"2").await;
    backend.refuse_delete("b");

    let report = client
        .delete_objects(&["a".to_string(), "b".to_string()])
        .await;
    assert_eq!(report.deleted, vec!["a".to_string()]);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].key.as_deref(), Some("b"));
    assert!(!backend.contains("media", "a").await);
}

// -- Thumbnails --------------------------------------------------------------

#[tokio::test]
async fn thumbnail_key_and_content() {
    let (client, backend) = ready_client().await;
    upload(&client, "photos/a/b.png", &png(640, 480)).await;

    let key = client
        .generate_thumbnail("photos/a/b.png", 200, 200, "thumbnails/")
        .await
        .unwrap();
    assert_eq!(key, "thumbnails/photos_a_b.png_thumb.jpg");

    let thumb = backend.get_object("media", &key).await.unwrap();
    assert_eq!(thumb.content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(thumb.metadata[META_ORIGINAL_IMAGE], "photos/a/b.png");
    assert_eq!(thumb.metadata[META_THUMBNAIL_SIZE], "200x200");

    let decoded = image::load_from_memory(&thumb.data).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (200, 150));
}

#[tokio::test]
async fn thumbnail_regeneration_overwrites_same_key() {
    let (client, backend) = ready_client().await;
    upload(&client, "x.png", &png(10, 10)).await;
    let first = client.generate_default_thumbnail("x.png").await.unwrap();
    let second = client.generate_default_thumbnail("x.png").await.unwrap();
    assert_eq!(first, second);

    let decoded = image::load_from_memory(&backend.get_object("media", &first).await.unwrap().data)
        .unwrap();
    // Small sources are not upscaled.
    assert_eq!((decoded.width(), decoded.height()), (10, 10));
}

#[tokio::test]
async fn thumbnail_of_corrupt_blob_is_failure() {
    let (client, backend) = ready_client().await;
    upload(&client, "broken.png", b"\x89PNG but not really").await;

    let err = client
        .generate_thumbnail("broken.png", 200, 200, "thumbnails/")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DecodeError");
    assert!(!backend
        .contains("media", "thumbnails/broken.png_thumb.jpg")
        .await);
}

#[tokio::test]
async fn thumbnail_of_missing_object_is_not_found() {
    let (client, _) = ready_client().await;
    let err = client
        .generate_thumbnail("ghost.png", 200, 200, "thumbnails/")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn thumbnail_batch_continues_after_failure() {
    let (client, _) = ready_client().await;
    upload(&client, "ok1.png", &png(300, 300)).await;
    upload(&client, "bad.png", b"nope").await;
    upload(&client, "ok2.png", &png(300, 100)).await;

    let mut made = Vec::new();
    for key in ["ok1.png", "bad.png", "ok2.png"] {
        if let Ok(thumb) = client.generate_default_thumbnail(key).await {
            made.push(thumb);
        }
    }
    assert_eq!(
        made,
        vec![
            "thumbnails/ok1.png_thumb.jpg".to_string(),
            "thumbnails/ok2.png_thumb.jpg".to_string()
        ]
    );
}

// -- Listing, copy, size -----------------------------------------------------

#[tokio::test]
async fn list_enriches_each_object() {
    let (client, backend) = ready_client().await;
    upload(&client, "img/a.png", b"aa").await;
    upload(&client, "img/b.txt", b"bbb").await;
    upload(&client, "other/c", b"c").await;

    let heads_before = backend.calls("head_object");
    let listed = client.list_with_metadata("img/", DEFAULT_MAX_KEYS).await;
    assert_eq!(backend.calls("head_object") - heads_before, 2);

    let keys: Vec<_> = listed.iter().map(|o| o.key.as_str()).collect();
    assert_eq!(keys, ["img/a.png", "img/b.txt"]);
    assert_eq!(listed[0].size, 2);
    assert_eq!(listed[0].content_type, "image/png");
    assert!(!listed[0].etag.contains('"'));
    assert!(listed[1].metadata.contains_key(META_SHA256));
}

#[tokio::test]
async fn list_on_backend_error_is_empty() {
    let backend = Arc::new(MemoryBackend::new());
    let client = client_over(backend);
    assert!(client.list_with_metadata("", 10).await.is_empty());
}

#[tokio::test]
async fn copy_within_and_across_buckets() {
    let (client, backend) = ready_client().await;
    upload(&client, "src.txt", b"copy me").await;
    assert!(client.ensure_bucket_exists(Some("archive")).await);

    assert!(client.copy_object("src.txt", "dup.txt", None).await);
    assert!(client.copy_object("src.txt", "old/src.txt", Some("archive")).await);
    assert!(backend.contains("media", "dup.txt").await);
    assert!(backend.contains("archive", "old/src.txt").await);

    assert!(!client.copy_object("missing.txt", "x", None).await);
}

#[tokio::test]
async fn bucket_size_empty_is_zero() {
    let (client, _) = ready_client().await;
    let size = client.get_bucket_size().await;
    assert_eq!(size, BucketSize::default());
    assert_eq!(size.total_size_bytes, 0);
    assert_eq!(size.total_size_mb, 0.0);
    assert_eq!(size.total_size_gb, 0.0);
    assert_eq!(size.object_count, 0);
}

#[tokio::test]
async fn bucket_size_walks_every_page() {
    let backend = Arc::new(MemoryBackend::new().with_page_size(3));
    let client = client_over(backend.clone());
    client.ensure_bucket_exists(None).await;
    for i in 0..10 {
        upload(&client, &format!("k{i:02}"), &[0u8; 100]).await;
    }

    let size = client.get_bucket_size().await;
    assert_eq!(size.object_count, 10);
    assert_eq!(size.total_size_bytes, 1000);
    assert_eq!(backend.calls("list_objects"), 4);
}

// -- Lifecycle, multipart, URLs ----------------------------------------------

#[tokio::test]
async fn lifecycle_replaces_prior_rule() {
    let (client, backend) = ready_client().await;
    assert!(client.set_bucket_lifecycle(30, "scratch/").await);
    assert!(client.set_bucket_lifecycle(90, DEFAULT_LIFECYCLE_PREFIX).await);

    assert_eq!(
        backend.lifecycle_rules("media").await,
        vec![LifecycleRule {
            id: "auto-delete-rule".to_string(),
            enabled: true,
            prefix: "temp/".to_string(),
            expiration_days: 90,
        }]
    );
}

#[tokio::test]
async fn lifecycle_backend_error_is_false() {
    let (client, backend) = ready_client().await;
    backend.fail_operation("put_bucket_lifecycle");
    assert!(!client.set_bucket_lifecycle(90, "temp/").await);
}

#[tokio::test]
async fn multipart_returns_upload_id() {
    let (client, _) = ready_client().await;
    let id = client.create_multipart_upload("big.iso", None).await.unwrap();
    assert!(!id.is_empty());
}

#[test]
fn object_url_plain_http() {
    let client = client_over(Arc::new(MemoryBackend::new()));
    assert_eq!(
        client.get_object_url("key"),
        "http://minio.local:9000/media/key"
    );
}

#[test]
fn object_url_tls() {
    let mut config = ClientConfig::new("http://minio.local:9000", "media");
    config.use_ssl = true;
    let client = ObjectStoreClient::new(
        config,
        Arc::new(MemoryBackend::new()),
        Arc::new(MokaCacheStore::new(1)),
    );
    assert_eq!(
        client.get_object_url("a/b"),
        "https://minio.local:9000/media/a/b"
    );
}
