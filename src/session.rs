use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::{TlsMode, TransportConfig};
use crate::{ClientError, ContextId, TransportError};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// A pool of HTTP connections shared by every request made through it.
///
/// A session is bound to the [`ContextId`] that was current when it was created
/// and refuses to be used from any other context. Cloning a session is cheap;
/// all clones share one pool and one closed state.
///
/// Call [`Session::close`] when done. A session whose last clone is dropped
/// while still open logs a resource-leak warning before its pool is released.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: u64,
    context: ContextId,
    http: Mutex<Option<reqwest::Client>>,
}

impl Session {
    /// Creates a session with default transport settings.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Result<Self, ClientError> {
        Self::with_transport(&TransportConfig::default())
    }

    /// Creates a session with the given TLS, timeout and user agent settings.
    pub fn with_transport(transport: &TransportConfig) -> Result<Self, ClientError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ClientError::NoRuntime);
        }

        let http = build_http_client(transport)?;
        let session = Self {
            inner: Arc::new(SessionInner {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                context: ContextId::current(),
                http: Mutex::new(Some(http)),
            }),
        };
        tracing::debug!(
            session = session.inner.id,
            context = %session.inner.context,
            verify_tls = transport.tls.verifies_certificates(),
            "session opened"
        );
        Ok(session)
    }

    /// Process-unique id, used in log output.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The context this session is bound to.
    pub fn context(&self) -> ContextId {
        self.inner.context
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_none()
    }

    /// Releases the pooled connections.
    ///
    /// Returns `true` if this call closed the session and `false` if it was
    /// already closed. Requests already in flight finish on their own
    /// connection.
    pub fn close(&self) -> bool {
        let released = self.inner.lock().take();
        if released.is_some() {
            tracing::debug!(session = self.inner.id, "session closed");
            true
        } else {
            false
        }
    }

    /// Returns the pooled HTTP client after the closed and context checks.
    pub(crate) fn http(&self) -> Result<reqwest::Client, ClientError> {
        let http = self
            .inner
            .lock()
            .clone()
            .ok_or(ClientError::Transport(TransportError::Closed))?;

        let current = ContextId::current();
        if current != self.inner.context {
            return Err(ClientError::ContextMismatch {
                session: self.inner.context,
                current,
            });
        }
        Ok(http)
    }
}

impl SessionInner {
    // The guarded section only clones or takes the client, so a poisoned lock
    // still holds a consistent value.
    fn lock(&self) -> MutexGuard<'_, Option<reqwest::Client>> {
        self.http.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let open = self
            .http
            .get_mut()
            .map_or_else(|poisoned| poisoned.into_inner().is_some(), |http| http.is_some());
        if open {
            tracing::warn!(
                session = self.id,
                context = %self.context,
                "session dropped without being closed; call close() or use a scoped client"
            );
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("context", &self.inner.context)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Session {}

fn build_http_client(transport: &TransportConfig) -> Result<reqwest::Client, ClientError> {
    let mut builder = reqwest::Client::builder().user_agent(transport.user_agent.clone());

    if let Some(timeout) = transport.timeout {
        builder = builder.timeout(timeout);
    }

    match &transport.tls {
        TlsMode::System => {}
        TlsMode::CustomCa { pem, .. } => {
            let certificate = reqwest::Certificate::from_pem(pem).map_err(ClientError::Tls)?;
            builder = builder.add_root_certificate(certificate);
        }
        TlsMode::DangerAcceptInvalid => {
            builder = builder.danger_accept_invalid_certs(true);
        }
    }

    builder.build().map_err(ClientError::Tls)
}
