//! Query server info through a client that manages its own session.
//!
//! Run:
//! `cargo run --example scoped_server_info`
//!
//! Env vars:
//! - `SESSION_CLIENT_BASE_URL` (required)
//! - `SESSION_CLIENT_API_KEY` (required)

use session_client::Client;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let base_url = std::env::var("SESSION_CLIENT_BASE_URL")?;
    let api_key = std::env::var("SESSION_CLIENT_API_KEY")?;

    // The session is created on the first call and closed when `client` drops.
    let client = Client::new(base_url, api_key)?.scoped();
    let info = client.server_info().await?;

    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
