//! Download Example
//!
//! This example streams a Dropbox file to the local filesystem without
//! holding it in memory.
//!
//! Run this example with:
//! ```bash
//! DROPBOX_ACCESS_TOKEN=... cargo run --example download_file -- /Photos/beach.jpg ./beach.jpg
//! ```

use dropbox::{Client, ClientConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(dropbox_path), Some(local_path)) = (args.next(), args.next()) else {
        eprintln!("usage: download_file <dropbox-path> <local-path> [rev]");
        std::process::exit(2);
    };
    let rev = args.next();

    let client = Client::new(ClientConfig::from_env()?)?;

    match client
        .download_to_file(&dropbox_path, &local_path, rev.as_deref())
        .await?
    {
        Some(metadata) => {
            println!("Downloaded {} to {}", metadata.path, local_path);
            println!("  size:     {} ({} bytes)", metadata.size, metadata.bytes);
            println!(
                "  modified: {}",
                metadata.modified.as_deref().unwrap_or("-")
            );
        }
        None => {
            eprintln!("No file at {}", dropbox_path);
            std::process::exit(1);
        }
    }

    client.close().await;
    Ok(())
}
