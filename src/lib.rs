//! Async client for a REST API with a session-scoped connection lifecycle.
//!
//! Public API layers:
//! - [`Client`]: the client handle. Owns or borrows one [`Session`], exposes
//!   operations by id and closes its session exactly once.
//! - [`ApiClient`]: low-level JSON client configured by a [`ClientConfig`]
//!   (retries, TLS, API key header).
//! - [`Session`]: a pool of connections bound to the [`RuntimeContext`] it was
//!   created in.
//! - [`ClientError`]: unified error type used by all clients.

mod client;
mod config;
mod context;
mod error;
mod operations;
mod session;

/// Generic async JSON REST client.
pub use client::ApiClient;
pub use config::{
    ApiKey, ClientConfig, ClientConfigBuilder, DEFAULT_API_KEY_HEADER, DEFAULT_RETRY_WAIT,
    DEFAULT_USER_AGENT, TlsMode, TransportConfig,
};
pub use context::{ContextId, RuntimeContext};
/// Error types returned by all client operations.
pub use error::{ClientError, TransportError};
/// Session-scoped client handle and its operation catalog.
pub use operations::{Client, OperationDefinition, SERVER_INFO, ScopedClient};
pub use session::Session;
