use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::{Method, Url};
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::{ClientConfig, ClientError, Session, TransportError};

/// Generic async JSON REST client.
///
/// This is the low-level path: it takes a full [`ClientConfig`] (retries, TLS,
/// API key header) and sends requests to raw paths below the base URL. For
/// operation-id based calls use [`crate::Client`].
///
/// The client either owns its [`Session`] (created lazily on first request
/// with the config's transport settings) or borrows one supplied by the
/// caller. Clones share the session and the closed state.
#[derive(Clone, Debug)]
pub struct ApiClient {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    config: ClientConfig,
    slot: SessionSlot,
    closed: AtomicBool,
}

#[derive(Debug)]
enum SessionSlot {
    Owned(OnceCell<Session>),
    Borrowed(Session),
}

impl ApiClient {
    /// Creates a client that owns its session.
    ///
    /// No session is created and no I/O happens until the first request.
    pub fn new(config: ClientConfig) -> Self {
        Self::from_slot(config, SessionSlot::Owned(OnceCell::new()))
    }

    /// Creates a client that borrows `session`.
    ///
    /// [`Self::close`] leaves a borrowed session open; closing it is up to the
    /// caller. The config's transport settings are not applied to it.
    pub fn with_session(config: ClientConfig, session: Session) -> Self {
        Self::from_slot(config, SessionSlot::Borrowed(session))
    }

    fn from_slot(config: ClientConfig, slot: SessionSlot) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                slot,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn base_url(&self) -> &Url {
        self.shared.config.base_url()
    }

    /// Returns `true` when the session was created by this client.
    pub fn owns_session(&self) -> bool {
        matches!(self.shared.slot, SessionSlot::Owned(_))
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Closes the client.
    ///
    /// An owned session is closed; a borrowed one is left alone. Returns `true`
    /// on the call that closed the client and `false` on every later call.
    pub fn close(&self) -> bool {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        match &self.shared.slot {
            SessionSlot::Owned(cell) => {
                if let Some(session) = cell.get() {
                    session.close();
                }
            }
            SessionSlot::Borrowed(session) => {
                tracing::debug!(
                    session = session.id(),
                    "client closed; borrowed session left open"
                );
            }
        }
        true
    }

    /// Returns the session requests go through, creating an owned one if needed.
    pub async fn session(&self) -> Result<Session, ClientError> {
        if self.is_closed() {
            return Err(TransportError::Closed.into());
        }

        match &self.shared.slot {
            SessionSlot::Borrowed(session) => Ok(session.clone()),
            SessionSlot::Owned(cell) => {
                let session = cell
                    .get_or_try_init(|| async {
                        Session::with_transport(self.shared.config.transport())
                    })
                    .await?
                    .clone();

                // close() may have run while the session was being created.
                if self.is_closed() {
                    session.close();
                    return Err(TransportError::Closed.into());
                }
                Ok(session)
            }
        }
    }

    /// Sends a `GET` request and parses the response as JSON.
    pub async fn get_json(&self, path: &str) -> Result<Value, ClientError> {
        self.request_json(Method::GET, path, None).await
    }

    /// Sends a `GET` request with query parameters and parses the response as JSON.
    pub async fn get_json_with_query(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Value, ClientError> {
        self.request_json_with_query(Method::GET, path, query, None)
            .await
    }

    /// Sends a `POST` request with a JSON body and parses the response as JSON.
    pub async fn post_json(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        self.request_json(Method::POST, path, Some(body)).await
    }

    /// Sends a `PUT` request with a JSON body and parses the response as JSON.
    pub async fn put_json(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        self.request_json(Method::PUT, path, Some(body)).await
    }

    /// Sends a `DELETE` request and parses the response as JSON.
    pub async fn delete_json(&self, path: &str) -> Result<Value, ClientError> {
        self.request_json(Method::DELETE, path, None).await
    }

    /// Sends a request and parses the response as JSON.
    ///
    /// Use [`Self::request_json_with_query`] when query parameters are needed.
    pub async fn request_json(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        self.request_json_with_query(method, path, &[], body).await
    }

    /// Sends a request with query parameters and parses the response as JSON.
    ///
    /// Returns [`Value::Null`] for successful responses with an empty body.
    /// Requests whose connection cannot be established are retried up to
    /// `config.retries()` times; every other failure is returned as is.
    pub async fn request_json_with_query(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        let url = self.build_url(path)?;
        let config = &self.shared.config;
        let attempts = config.retries().saturating_add(1);
        let mut attempt = 1;

        let response = loop {
            let http = self.session().await?.http()?;
            let mut request = http
                .request(method.clone(), url.clone())
                .header(reqwest::header::ACCEPT, "application/json");

            if !query.is_empty() {
                request = request.query(query);
            }

            if let Some(key) = config.api_key() {
                request = request.header(config.api_key_header().clone(), key.as_ref());
            }

            if let Some(json_body) = &body {
                request = request.json(json_body);
            }

            match request.send().await {
                Ok(response) => break response,
                Err(error) if error.is_connect() && attempt < attempts => {
                    tracing::warn!(
                        %method,
                        %url,
                        attempt,
                        attempts,
                        %error,
                        "connection failed, retrying"
                    );
                    tokio::time::sleep(config.retry_wait()).await;
                    attempt += 1;
                }
                Err(error) => return Err(error.into()),
            }
        };

        let status = response.status();
        let payload = response.text().await?;
        tracing::debug!(%method, %url, %status, "request completed");

        if !status.is_success() {
            return Err(ClientError::HttpStatus {
                status,
                body: payload,
            });
        }

        if payload.trim().is_empty() {
            Ok(Value::Null)
        } else {
            Ok(serde_json::from_str(&payload)?)
        }
    }

    /// Resolves `path` below the base URL.
    ///
    /// The API key goes out with every request, so paths that resolve to
    /// another origin (absolute URLs) or above the base path (`..`) are
    /// rejected with [`ClientError::InvalidPath`].
    fn build_url(&self, path: &str) -> Result<Url, ClientError> {
        let base = self.base_url();
        let relative = path.trim_start_matches('/');
        let url = base
            .join(relative)
            .map_err(|_| ClientError::InvalidPath(path.to_owned()))?;

        let same_origin = url.scheme() == base.scheme()
            && url.host_str() == base.host_str()
            && url.port_or_known_default() == base.port_or_known_default();
        if !same_origin || !url.path().starts_with(base.path()) {
            return Err(ClientError::InvalidPath(path.to_owned()));
        }
        Ok(url)
    }
}

// Clients are shared across tasks.
const _: fn() = || {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ApiClient>();
};
