use std::future::Future;
use std::ops::Deref;

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::{ApiClient, ClientConfig, ClientError, Session};

/// Metadata for one API operation.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct OperationDefinition {
    /// Stable operation identifier.
    pub operation_id: &'static str,
    /// Uppercase HTTP method (for example `GET`, `POST`).
    pub method: &'static str,
    /// Path template relative to the base URL, potentially containing `{param}` placeholders.
    pub path_template: &'static str,
    /// Required path parameter names appearing in `path_template`.
    pub path_params: &'static [&'static str],
}

// Everything except RFC 3986 unreserved characters.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Operation id of the server-info query.
pub const SERVER_INFO: &str = "getServerInfo";

// Catalog of operations callable by id. A code-generated layer would extend
// this table; the handle only needs the metadata to render and send requests.
static OPERATIONS: &[OperationDefinition] = &[
    OperationDefinition {
        operation_id: SERVER_INFO,
        method: "GET",
        path_template: "server-info",
        path_params: &[],
    },
    OperationDefinition {
        operation_id: "getHealth",
        method: "GET",
        path_template: "health",
        path_params: &[],
    },
];

/// Session-scoped API client handle.
///
/// A `Client` holds a base URL, an API key and exactly one [`Session`]:
///
/// - [`Client::new`] creates the session lazily on the first call and closes
///   it when the client is closed.
/// - [`Client::with_session`] borrows a session created by the caller and never
///   closes it.
///
/// Close the client with [`Client::close`], or let [`Client::scoped`] /
/// [`Client::scope`] do it when the block ends.
///
/// ```no_run
/// use session_client::Client;
///
/// # async fn demo() -> Result<(), session_client::ClientError> {
/// let client = Client::new("https://api.example.com", "my-key")?.scoped();
/// let info = client.server_info().await?;
/// println!("{info}");
/// // The session is closed when `client` goes out of scope.
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    inner: ApiClient,
}

impl Client {
    /// Creates a client that manages its own session.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Ok(Self::from_config(ClientConfig::new(base_url, api_key)?))
    }

    /// Creates a client that routes every call through a caller-owned session.
    pub fn with_session(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        session: Session,
    ) -> Result<Self, ClientError> {
        Ok(Self::from_config_with_session(
            ClientConfig::new(base_url, api_key)?,
            session,
        ))
    }

    /// Creates a client from a full configuration, owning its session.
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            inner: ApiClient::new(config),
        }
    }

    /// Creates a client from a full configuration, borrowing `session`.
    pub fn from_config_with_session(config: ClientConfig, session: Session) -> Self {
        Self {
            inner: ApiClient::with_session(config, session),
        }
    }

    /// Returns all operations callable by id.
    pub fn operations() -> &'static [OperationDefinition] {
        OPERATIONS
    }

    /// The low-level client behind this handle.
    pub fn api_client(&self) -> &ApiClient {
        &self.inner
    }

    pub fn config(&self) -> &ClientConfig {
        self.inner.config()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Closes the client; see [`ApiClient::close`].
    pub fn close(&self) -> bool {
        self.inner.close()
    }

    /// Wraps the client in a guard that closes it when dropped.
    pub fn scoped(self) -> ScopedClient {
        ScopedClient {
            client: self,
            armed: true,
        }
    }

    /// Runs `f` with this client and closes the client once the returned
    /// future completes, fails, panics or is dropped.
    pub async fn scope<F, Fut, T>(self, f: F) -> T
    where
        F: FnOnce(Client) -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.scoped();
        f(guard.client.clone()).await
    }

    /// Queries the server-info endpoint.
    pub async fn server_info(&self) -> Result<Value, ClientError> {
        self.call_operation(SERVER_INFO, &[], &[], None).await
    }

    /// Sends a request using a raw path and method.
    ///
    /// This bypasses operation-id lookup but keeps the client configuration.
    pub async fn request_json_with_query(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        self.inner
            .request_json_with_query(method, path, query, body)
            .await
    }

    /// Calls an endpoint by `operation_id`.
    ///
    /// `path_params` replaces `{param}` segments in the operation path template.
    /// Missing required parameters return
    /// [`ClientError::MissingPathParameter`].
    pub async fn call_operation(
        &self,
        operation_id: &str,
        path_params: &[(&str, &str)],
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        let operation = find_operation(operation_id)?;
        self.call(operation, path_params, query, body).await
    }

    /// Calls an operation described by `operation`, which need not be part of
    /// the built-in catalog.
    pub async fn call(
        &self,
        operation: &OperationDefinition,
        path_params: &[(&str, &str)],
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        let rendered_path = render_path(operation, path_params)?;
        let method = parse_method(operation)?;
        self.inner
            .request_json_with_query(method, &rendered_path, query, body)
            .await
    }
}

/// A [`Client`] that is closed when this guard is dropped.
///
/// Dereferences to the wrapped client, so every client method is available.
#[derive(Debug)]
pub struct ScopedClient {
    client: Client,
    armed: bool,
}

impl ScopedClient {
    /// Releases the client without closing it.
    pub fn into_inner(mut self) -> Client {
        self.armed = false;
        self.client.clone()
    }
}

impl Deref for ScopedClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        &self.client
    }
}

impl Drop for ScopedClient {
    fn drop(&mut self) {
        if self.armed && self.client.close() {
            tracing::debug!("scoped client closed");
        }
    }
}

fn find_operation(operation_id: &str) -> Result<&'static OperationDefinition, ClientError> {
    OPERATIONS
        .iter()
        .find(|op| op.operation_id == operation_id)
        .ok_or_else(|| ClientError::UnknownOperation(operation_id.to_owned()))
}

fn parse_method(operation: &OperationDefinition) -> Result<Method, ClientError> {
    Method::from_bytes(operation.method.as_bytes())
        .map_err(|_| ClientError::UnknownOperation(operation.operation_id.to_owned()))
}

fn render_path(
    operation: &OperationDefinition,
    path_params: &[(&str, &str)],
) -> Result<String, ClientError> {
    let mut rendered = operation.path_template.to_owned();

    for required_param in operation.path_params {
        let value = path_params
            .iter()
            .find(|(name, _)| name == required_param)
            .map(|(_, value)| *value)
            .ok_or_else(|| ClientError::MissingPathParameter {
                operation_id: operation.operation_id.to_owned(),
                parameter: (*required_param).to_owned(),
            })?;

        // Dot segments would be resolved away when the URL is joined.
        if value == "." || value == ".." {
            return Err(ClientError::InvalidPath(format!(
                "{}: '{value}' is not a valid '{required_param}'",
                operation.path_template
            )));
        }

        let placeholder = format!("{{{required_param}}}");
        rendered = rendered.replace(&placeholder, &encode_path_segment(value));
    }

    Ok(rendered)
}

fn encode_path_segment(value: &str) -> String {
    utf8_percent_encode(value, PATH_SEGMENT).to_string()
}
