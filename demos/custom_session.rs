//! Share one caller-owned session between two client handles.
//!
//! Run:
//! `cargo run --example custom_session`
//!
//! Env vars:
//! - `SESSION_CLIENT_BASE_URL` (required)
//! - `SESSION_CLIENT_API_KEY` (required)

use session_client::{Client, Session};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let base_url = std::env::var("SESSION_CLIENT_BASE_URL")?;
    let api_key = std::env::var("SESSION_CLIENT_API_KEY")?;

    let session = Session::new()?;

    let info = Client::with_session(&base_url, &api_key, session.clone())?
        .scope(|client| async move { client.server_info().await })
        .await?;
    println!("{}", serde_json::to_string_pretty(&info)?);

    // Closing the first handle left the session open for reuse.
    let health = Client::with_session(&base_url, &api_key, session.clone())?
        .scope(|client| async move { client.call_operation("getHealth", &[], &[], None).await })
        .await?;
    println!("{}", serde_json::to_string_pretty(&health)?);

    session.close();
    Ok(())
}
