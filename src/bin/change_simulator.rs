//! Synthetic change generator: appends random Upsert/Remove mutations to a
//! partition's spool file to produce test traffic for the replicator. Keys
//! are drawn from a small id range so upserts and removes collide on the
//! same keys, which is what exercises per-key ordering downstream.

use chrono::Utc;
use clap::Parser;
use rand::Rng;
use std::path::PathBuf;
use stream_cache_sync::stream::{EventKind, RowImage, StreamEvent};
use stream_cache_sync::Result;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

const NAMES: &[&str] = &[
    "Alice", "Bob", "Charlie", "David", "Eve", "Frank", "Grace", "Henry",
];

#[derive(Parser, Debug)]
#[command(name = "change-simulator")]
#[command(about = "Writes synthetic change events into a spool directory", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "DIR", default_value = "spool")]
    spool_dir: PathBuf,

    #[arg(short, long, default_value = "shard-0")]
    partition: String,

    #[arg(short, long, default_value_t = 10, help = "Number of mutations to generate")]
    count: u32,

    #[arg(short, long, default_value_t = 100, help = "Key space size (ids 1..=N)")]
    key_space: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    fs::create_dir_all(&args.spool_dir).await?;
    let path = args.spool_dir.join(format!("{}.ndjson", args.partition));

    // Continue the partition's sequence numbering across invocations.
    let start_sequence = match fs::read_to_string(&path).await {
        Ok(content) => content.lines().count() as u64,
        Err(_) => 0,
    };

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;

    let mut rng = rand::thread_rng();
    let mut upserts = 0u32;
    let mut removes = 0u32;

    for i in 0..args.count {
        let sequence = start_sequence + i as u64;
        let id = rng.gen_range(1..=args.key_space).to_string();
        let now = Utc::now();

        // 2:1 ratio favoring upserts
        let event = if rng.gen_range(0..3) < 2 {
            upserts += 1;
            let name = NAMES[rng.gen_range(0..NAMES.len())];
            StreamEvent {
                kind: EventKind::Insert,
                sequence,
                created_at: now,
                new_image: Some(
                    RowImage::new()
                        .with_attribute("id", &id)
                        .with_attribute("name", name)
                        .with_attribute("timestamp", &now.to_rfc3339()),
                ),
                old_image: None,
            }
        } else {
            removes += 1;
            StreamEvent {
                kind: EventKind::Remove,
                sequence,
                created_at: now,
                new_image: None,
                old_image: Some(RowImage::new().with_attribute("id", &id)),
            }
        };

        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
    }

    file.sync_all().await?;

    info!(
        partition = %args.partition,
        upserts,
        removes,
        "Wrote synthetic change events"
    );

    Ok(())
}
