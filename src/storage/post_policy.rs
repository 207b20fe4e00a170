//! SigV4 browser-upload (form POST) policies.
//!
//! A POST policy is a JSON document listing the conditions an upload
//! must satisfy.  It is base64-encoded and signed with the SigV4 signing
//! key; the browser submits the encoded policy, the signature and the
//! credential scope as form fields next to the file.
//!
//! The algorithm:
//! 1. Build the policy document (expiration + conditions)
//! 2. Base64-encode it; that string is the string-to-sign
//! 3. Derive a signing key via HMAC chain
//! 4. Hex-encode HMAC-SHA256(signing key, encoded policy)

use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::time::Duration;

use super::backend::PresignedPost;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

/// Everything needed to sign one upload form.
#[derive(Debug, Clone)]
pub struct PostPolicyParams<'a> {
    /// Form target, e.g. `http://minio.local:9000/media`.
    pub url: String,
    pub bucket: &'a str,
    pub key: &'a str,
    pub content_type: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub region: &'a str,
    pub expires_in: Duration,
}

/// Derive the SigV4 signing key.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, date_stamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
pub fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Vec<u8> {
    let k_secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Compute HMAC-SHA256.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Build and sign an upload form as of `now`.
pub fn sign_post_policy(params: &PostPolicyParams<'_>, now: DateTime<Utc>) -> PresignedPost {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let credential = format!(
        "{}/{}/{}/{}/aws4_request",
        params.access_key, date_stamp, params.region, SERVICE
    );

    let expires_in = chrono::Duration::from_std(params.expires_in)
        .unwrap_or_else(|_| chrono::Duration::seconds(0));
    let expiration = (now + expires_in)
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string();

    let policy = json!({
        "expiration": expiration,
        "conditions": [
            { "bucket": params.bucket },
            { "key": params.key },
            { "Content-Type": params.content_type },
            { "x-amz-algorithm": ALGORITHM },
            { "x-amz-credential": credential },
            { "x-amz-date": amz_date },
        ],
    });
    let encoded = base64::engine::general_purpose::STANDARD.encode(policy.to_string());

    let signing_key = derive_signing_key(params.secret_key, &date_stamp, params.region, SERVICE);
    let signature = hex::encode(hmac_sha256(&signing_key, encoded.as_bytes()));

    let mut fields = BTreeMap::new();
    fields.insert("key".to_string(), params.key.to_string());
    fields.insert("Content-Type".to_string(), params.content_type.to_string());
    fields.insert("x-amz-algorithm".to_string(), ALGORITHM.to_string());
    fields.insert("x-amz-credential".to_string(), credential);
    fields.insert("x-amz-date".to_string(), amz_date);
    fields.insert("policy".to_string(), encoded);
    fields.insert("x-amz-signature".to_string(), signature);

    PresignedPost {
        url: params.url.clone(),
        fields,
    }
}
