//! Use the low-level `ApiClient` with retries and custom TLS settings.
//!
//! Run:
//! `cargo run --example advanced_config`
//!
//! Env vars:
//! - `SESSION_CLIENT_BASE_URL` (required)
//! - `SESSION_CLIENT_API_KEY` (optional)
//! - `SESSION_CLIENT_CA_CERT` (optional PEM file)
//! - `SESSION_CLIENT_INSECURE` (set to `1` to skip certificate validation)

use std::time::Duration;

use session_client::{ApiClient, ClientConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let base_url = std::env::var("SESSION_CLIENT_BASE_URL")?;

    let mut builder = ClientConfig::builder(base_url)
        .retries(3)
        .retry_wait(Duration::from_millis(500))
        .timeout(Duration::from_secs(30))
        .tls_verify(std::env::var("SESSION_CLIENT_INSECURE").as_deref() != Ok("1"));
    if let Ok(key) = std::env::var("SESSION_CLIENT_API_KEY") {
        builder = builder.api_key(key);
    }
    if let Ok(path) = std::env::var("SESSION_CLIENT_CA_CERT") {
        builder = builder.tls_ca_cert(path);
    }

    let client = ApiClient::new(builder.build()?);
    let result = client.get_json("server-info").await;
    client.close();

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}
