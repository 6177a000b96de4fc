//! Account Info Example
//!
//! This example loads credentials and prints the account's name and quota.
//!
//! Run this example with either an auth-info file or the access token in
//! the environment:
//! ```bash
//! cargo run --example account_info -- auth.json
//! DROPBOX_ACCESS_TOKEN=... cargo run --example account_info
//! ```

use dropbox::{Client, ClientConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Step 1: Load credentials
    let config = match std::env::args().nth(1) {
        Some(auth_file) => ClientConfig::from_auth_file(auth_file)?,
        None => ClientConfig::from_env()?,
    };

    // Step 2: Create the client and ask for the account
    let client = Client::new(config)?;
    let info = client.account_info().await?;

    println!("Dropbox Account Info");
    println!("{}", "=".repeat(50));
    println!("Name:     {}", info.display_name);
    println!("User id:  {}", info.uid);
    if let Some(email) = &info.email {
        println!("E-mail:   {}", email);
    }
    if let Some(country) = &info.country {
        println!("Country:  {}", country);
    }

    let quota = &info.quota_info;
    let used = quota.normal + quota.shared;
    let percent = if quota.quota > 0 {
        used as f64 * 100.0 / quota.quota as f64
    } else {
        0.0
    };
    println!(
        "Quota:    {:.1} MiB of {:.1} MiB used ({:.1}%)",
        used as f64 / (1 << 20) as f64,
        quota.quota as f64 / (1 << 20) as f64,
        percent
    );

    client.close().await;
    Ok(())
}
