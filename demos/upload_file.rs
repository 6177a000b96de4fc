//! Upload Example
//!
//! This example uploads a local file to Dropbox. Files above the chunked
//! upload threshold, or any file when `--chunked` is given, go through a
//! resumable upload session; smaller files are sent in one request.
//!
//! Run this example with:
//! ```bash
//! DROPBOX_ACCESS_TOKEN=... cargo run --example upload_file -- ./video.mp4 /Videos/video.mp4
//! DROPBOX_ACCESS_TOKEN=... RUST_LOG=dropbox=debug cargo run --example upload_file -- ./a.bin /a.bin --chunked
//! ```

use dropbox::{Client, ClientConfig, DropboxError, WriteMode};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: upload_file <local-path> <dropbox-path> [--chunked] [--force]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let positional: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();
    let (local_path, dropbox_path) = match positional.as_slice() {
        [local, remote] => (local.as_str(), remote.as_str()),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };
    let chunked = args.iter().any(|a| a == "--chunked");
    let write_mode = if args.iter().any(|a| a == "--force") {
        WriteMode::Force
    } else {
        WriteMode::Add
    };

    let client = Client::new(ClientConfig::from_env()?)?;

    let file = tokio::fs::File::open(local_path).await?;
    let size = file.metadata().await?.len();
    println!("Uploading {} ({} bytes) to {}", local_path, size, dropbox_path);

    let result = if chunked {
        client
            .upload_file_chunked(dropbox_path, &write_mode, file, Some(size), None)
            .await
    } else {
        client
            .upload_file(dropbox_path, &write_mode, file, Some(size))
            .await
    };

    match result {
        Ok(metadata) => {
            println!("Uploaded to {}", metadata.path);
            println!("  size: {} ({} bytes)", metadata.size, metadata.bytes);
            println!("  rev:  {}", metadata.rev.as_deref().unwrap_or("-"));
        }
        Err(DropboxError::SizeMismatch { expected, actual }) => {
            eprintln!(
                "{} changed while uploading: expected {} bytes, read {}",
                local_path, expected, actual
            );
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    }

    client.close().await;
    Ok(())
}
