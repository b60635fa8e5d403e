use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use xlstore_storage::objects::MD5_METADATA_KEY;
use xlstore_storage::traits::ObjectReader;
use xlstore_storage::{ObjectLayer, ObjectLayerConfig, XlObjects, XlStorage};

#[derive(Parser)]
#[command(name = "xlstore", about = "Object storage over a mirrored set of local disks")]
struct Cli {
    /// Disk directories in set order.
    #[arg(long, env = "XLSTORE_DISKS", value_delimiter = ',', required = true)]
    disks: Vec<PathBuf>,

    /// Seconds a paused listing stays resumable.
    #[arg(long, default_value_t = 300)]
    list_cache_ttl: u64,

    #[arg(long, default_value_t = 1024)]
    list_cache_capacity: usize,

    #[arg(long, env = "XLSTORE_LOG_JSON", default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a bucket.
    Mb { bucket: String },
    /// Remove an empty bucket.
    Rb { bucket: String },
    LsBuckets,
    /// Upload a local file as an object.
    Put {
        bucket: String,
        key: String,
        file: PathBuf,
        /// Expected hex md5 of the file.
        #[arg(long)]
        md5: Option<String>,
    },
    /// Upload a local file as one part of a multipart object.
    PutPart {
        bucket: String,
        key: String,
        part_number: i32,
        file: PathBuf,
    },
    /// Assemble uploaded parts into a multipart object.
    Complete {
        bucket: String,
        key: String,
        #[arg(required = true)]
        parts: Vec<i32>,
    },
    /// Discard the parts of an upload that was never completed.
    Abort { bucket: String, key: String },
    /// Stream an object to stdout or a file.
    Get {
        bucket: String,
        key: String,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    Stat { bucket: String, key: String },
    Rm { bucket: String, key: String },
    Ls {
        bucket: String,
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long, default_value = "")]
        marker: String,
        #[arg(long, default_value = "")]
        delimiter: String,
        #[arg(long, default_value_t = 1000)]
        max_keys: i32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::from_default_env().add_directive("xlstore=info".parse()?);
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    if cli.disks.is_empty() {
        bail!("--disks must include at least one disk path");
    }
    let disk_names: Vec<String> = cli
        .disks
        .iter()
        .map(|path| path.display().to_string())
        .collect();

    let storage = XlStorage::new(cli.disks.clone())
        .await
        .with_context(|| format!("failed to open disks {disk_names:?}"))?;
    let config = ObjectLayerConfig {
        list_cache_ttl: Duration::from_secs(cli.list_cache_ttl),
        list_cache_capacity: cli.list_cache_capacity,
        ..ObjectLayerConfig::default()
    };
    let layer = XlObjects::new(Arc::new(storage), &disk_names, config).await?;
    debug!(disks = disk_names.len(), "object layer ready");

    run(&layer, cli.command).await
}

async fn run(layer: &XlObjects, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Mb { bucket } => {
            layer.make_bucket(&bucket).await?;
            info!(bucket, "bucket created");
        }
        Command::Rb { bucket } => {
            layer.delete_bucket(&bucket).await?;
            info!(bucket, "bucket removed");
        }
        Command::LsBuckets => {
            print_json(&layer.list_buckets().await?)?;
        }
        Command::Put {
            bucket,
            key,
            file,
            md5,
        } => {
            let (size, reader) = open_upload(&file).await?;
            let metadata = md5
                .map(|md5| HashMap::from([(MD5_METADATA_KEY.to_string(), md5)]))
                .unwrap_or_default();
            let etag = layer
                .put_object(&bucket, &key, size, reader, metadata)
                .await?;
            print_json(&json!({ "bucket": bucket, "key": key, "etag": etag }))?;
        }
        Command::PutPart {
            bucket,
            key,
            part_number,
            file,
        } => {
            let (size, reader) = open_upload(&file).await?;
            let etag = layer
                .put_object_part(&bucket, &key, part_number, size, reader, HashMap::new())
                .await?;
            print_json(&json!({ "bucket": bucket, "key": key, "part_number": part_number, "etag": etag }))?;
        }
        Command::Complete { bucket, key, parts } => {
            let etag = layer.complete_multipart_object(&bucket, &key, &parts).await?;
            print_json(&json!({ "bucket": bucket, "key": key, "etag": etag }))?;
        }
        Command::Abort { bucket, key } => {
            let parts = layer.abort_multipart_object(&bucket, &key).await?;
            info!(bucket, key, parts, "upload aborted");
        }
        Command::Get {
            bucket,
            key,
            offset,
            output,
        } => {
            let mut reader = layer.get_object(&bucket, &key, offset).await?;
            let copied = match output {
                Some(path) => {
                    let mut file = tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    let copied = tokio::io::copy(&mut reader, &mut file).await?;
                    file.flush().await?;
                    copied
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    let copied = tokio::io::copy(&mut reader, &mut stdout).await?;
                    stdout.flush().await?;
                    copied
                }
            };
            debug!(bucket, key, offset, copied, "object streamed");
        }
        Command::Stat { bucket, key } => {
            print_json(&layer.get_object_info(&bucket, &key).await?)?;
        }
        Command::Rm { bucket, key } => {
            layer.delete_object(&bucket, &key).await?;
            info!(bucket, key, "object removed");
        }
        Command::Ls {
            bucket,
            prefix,
            marker,
            delimiter,
            max_keys,
        } => {
            let listing = layer
                .list_objects(&bucket, &prefix, &marker, &delimiter, max_keys)
                .await?;
            print_json(&listing)?;
        }
    }

    Ok(())
}

async fn open_upload(path: &Path) -> anyhow::Result<(i64, ObjectReader)> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let len = file.metadata().await?.len();
    let size = i64::try_from(len).context("file too large")?;
    Ok((size, Box::new(file)))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
