//! Configuration loading and types for s3kit.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! client: the storage endpoint and credentials, the presigned URL cache,
//! thumbnail defaults, and logging.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Storage endpoint, credentials and default bucket.
    pub storage: ClientConfig,

    /// Presigned URL cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Thumbnail generation defaults.
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings for the S3-compatible endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Endpoint URL, e.g. `http://minio.local:9000`.
    pub endpoint_url: String,

    /// Access key (also accepts `access_key_id`).
    #[serde(alias = "access_key_id", default)]
    pub access_key: String,

    /// Secret key (also accepts `secret_access_key`).
    #[serde(alias = "secret_access_key", default)]
    pub secret_key: String,

    /// Default bucket for every operation.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Whether public object URLs use `https`.
    #[serde(default)]
    pub use_ssl: bool,

    /// Signing region.
    #[serde(default = "default_region")]
    pub region: String,

    /// Force path-style addressing (MinIO requires it).
    #[serde(default = "default_true")]
    pub use_path_style: bool,
}

impl ClientConfig {
    /// Build a config for `endpoint_url` with every other field defaulted.
    pub fn new(endpoint_url: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            access_key: String::new(),
            secret_key: String::new(),
            bucket: bucket.into(),
            use_ssl: false,
            region: default_region(),
            use_path_style: true,
        }
    }

    /// The `host[:port]` authority of the endpoint URL.
    ///
    /// `http://minio.local:9000/` yields `minio.local:9000`.  An endpoint
    /// without a scheme is taken as-is up to the first `/`.
    pub fn endpoint_host(&self) -> String {
        let raw = self.endpoint_url.trim();
        if let Ok(uri) = raw.parse::<http::Uri>() {
            if uri.scheme().is_some() {
                if let Some(authority) = uri.authority() {
                    return authority.as_str().to_string();
                }
            }
        }
        let without_scheme = raw.split_once("://").map_or(raw, |(_, rest)| rest);
        without_scheme
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    /// `https` when TLS is enabled, else `http`.
    pub fn scheme(&self) -> &'static str {
        if self.use_ssl {
            "https"
        } else {
            "http"
        }
    }
}

/// Presigned URL cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached URLs.
    #[serde(default = "default_cache_entries")]
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
        }
    }
}

/// Defaults for thumbnail generation.
#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailConfig {
    /// Bounding box width in pixels.
    #[serde(default = "default_thumb_dim")]
    pub max_width: u32,

    /// Bounding box height in pixels.
    #[serde(default = "default_thumb_dim")]
    pub max_height: u32,

    /// Key prefix for generated thumbnails.
    #[serde(default = "default_thumb_prefix")]
    pub prefix: String,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_width: default_thumb_dim(),
            max_height: default_thumb_dim(),
            prefix: default_thumb_prefix(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_bucket() -> String {
    "media".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_cache_entries() -> u64 {
    10_000
}

fn default_thumb_dim() -> u32 {
    200
}

fn default_thumb_prefix() -> String {
    "thumbnails/".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
