//! s3kit -- command-line front end to the object storage client.
//!
//! Every subcommand maps onto one client operation and prints its result
//! as JSON on stdout.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use s3kit::client::{DEFAULT_LIFECYCLE_DAYS, DEFAULT_LIFECYCLE_PREFIX, DEFAULT_MAX_KEYS};
use s3kit::config::LoggingConfig;
use s3kit::presign::DEFAULT_EXPIRATION_SECS;
use s3kit::ObjectStoreClient;

/// Command-line arguments for s3kit.
#[derive(Parser, Debug)]
#[command(
    name = "s3kit",
    version,
    about = "Object storage client for S3-compatible endpoints"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "s3kit.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the bucket if it does not exist.
    EnsureBucket {
        #[arg(long)]
        bucket: Option<String>,
    },
    /// Upload a local file with hash and provenance metadata.
    Upload {
        path: PathBuf,
        key: String,
    },
    /// List objects with their metadata.
    List {
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long, default_value_t = DEFAULT_MAX_KEYS)]
        max_keys: u32,
    },
    /// Copy an object.
    Copy {
        source: String,
        dest: String,
        #[arg(long)]
        dest_bucket: Option<String>,
    },
    /// Delete objects in one batch.
    Delete {
        keys: Vec<String>,
    },
    /// Install the auto-delete lifecycle rule.
    Lifecycle {
        #[arg(long, default_value_t = DEFAULT_LIFECYCLE_DAYS)]
        days: u32,
        #[arg(long, default_value = DEFAULT_LIFECYCLE_PREFIX)]
        prefix: String,
    },
    /// Total size and object count of the bucket.
    Size,
    /// Start a multipart upload and print its id.
    Multipart {
        key: String,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Print the public URL of an object.
    Url {
        key: String,
    },
    /// Issue a presigned GET or PUT URL.
    Presign {
        key: String,
        #[arg(long, default_value = "GET")]
        method: String,
        #[arg(long, default_value_t = DEFAULT_EXPIRATION_SECS)]
        expires: u64,
    },
    /// Render a JPEG thumbnail of an image object.
    Thumbnail {
        key: String,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Issue a browser form-POST upload descriptor.
    UploadForm {
        key: String,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long, default_value_t = DEFAULT_EXPIRATION_SECS)]
        expires: u64,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = s3kit::config::load_config(&cli.config)?;
    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    s3kit::metrics::describe_metrics();

    let client = ObjectStoreClient::from_config(&config).await?;

    match cli.command {
        Command::EnsureBucket { bucket } => {
            print_json(&client.ensure_bucket_exists(bucket.as_deref()).await)?;
        }
        Command::Upload { path, key } => {
            print_json(&s3kit::sync::sync_file_to_object(&client, &path, &key).await)?;
        }
        Command::List { prefix, max_keys } => {
            print_json(&client.list_with_metadata(&prefix, max_keys).await)?;
        }
        Command::Copy {
            source,
            dest,
            dest_bucket,
        } => {
            print_json(
                &client
                    .copy_object(&source, &dest, dest_bucket.as_deref())
                    .await,
            )?;
        }
        Command::Delete { keys } => {
            print_json(&client.delete_objects(&keys).await)?;
        }
        Command::Lifecycle { days, prefix } => {
            print_json(&client.set_bucket_lifecycle(days, &prefix).await)?;
        }
        Command::Size => {
            print_json(&client.get_bucket_size().await)?;
        }
        Command::Multipart { key, content_type } => {
            print_json(
                &client
                    .create_multipart_upload(&key, content_type.as_deref())
                    .await,
            )?;
        }
        Command::Url { key } => {
            print_json(&client.get_object_url(&key))?;
        }
        Command::Presign {
            key,
            method,
            expires,
        } => {
            print_json(&client.get_presigned_url(&key, expires, &method).await)?;
        }
        Command::Thumbnail {
            key,
            width,
            height,
            prefix,
        } => {
            let defaults = client.thumbnail_defaults().clone();
            let result = client
                .generate_thumbnail(
                    &key,
                    width.unwrap_or(defaults.max_width),
                    height.unwrap_or(defaults.max_height),
                    prefix.as_deref().unwrap_or(defaults.prefix.as_str()),
                )
                .await;
            print_json(&result.ok())?;
        }
        Command::UploadForm {
            key,
            content_type,
            expires,
        } => {
            print_json(
                &s3kit::sync::generate_signed_upload_url(
                    &client,
                    &key,
                    content_type.as_deref(),
                    expires,
                )
                .await,
            )?;
        }
    }

    Ok(())
}
