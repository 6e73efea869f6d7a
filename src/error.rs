use std::path::PathBuf;

use thiserror::Error;

use crate::ContextId;

/// Failures of the underlying network session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection or network failure reported by the HTTP stack.
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    /// The client handle or its session has already been closed.
    #[error("session is closed")]
    Closed,
}

/// Errors returned by client and session operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Base URL is not a valid absolute URL.
    #[error("invalid base URL '{0}'")]
    InvalidBaseUrl(String),

    /// Endpoint path could not be joined to the base URL, or resolves to a
    /// location outside of it.
    #[error("invalid endpoint path '{0}'")]
    InvalidPath(String),

    /// The API key is empty or cannot be sent as a header value.
    #[error("invalid API credential: {0}")]
    InvalidCredential(&'static str),

    /// A configured header name or value cannot be sent over HTTP.
    #[error("invalid {setting} '{value}'")]
    InvalidHeader {
        setting: &'static str,
        value: String,
    },

    /// The requested operation id is not present in the operation catalog.
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    /// A required path template parameter was not provided.
    #[error("missing required path parameter '{parameter}' for operation '{operation_id}'")]
    MissingPathParameter {
        operation_id: String,
        parameter: String,
    },

    /// Transport-layer failure, passed through from the session.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A session was used from a context other than the one that created it.
    #[error("session bound to context {session} was used from context {current}")]
    ContextMismatch {
        session: ContextId,
        current: ContextId,
    },

    /// A session was created outside of a Tokio runtime.
    #[error("no async runtime is active; sessions must be created inside a Tokio runtime")]
    NoRuntime,

    /// The configured CA certificate file could not be read.
    #[error("failed to read CA certificate '{}': {source}", path.display())]
    CaCertificate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TLS settings could not be applied to a new session.
    #[error("invalid TLS configuration: {0}")]
    Tls(#[source] reqwest::Error),

    /// Response body could not be parsed as JSON.
    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-success HTTP status with response payload.
    #[error("server returned status {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },
}

impl ClientError {
    /// Returns `true` for transport-layer failures, including use after close.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns `true` when the handle or session was already closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Closed))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(TransportError::Request(error))
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientError, TransportError};
    use crate::{ContextId, RuntimeContext};

    #[test]
    fn closed_session_is_a_transport_error() {
        let error = ClientError::from(TransportError::Closed);
        assert!(error.is_transport());
        assert!(error.is_closed());
        assert_eq!(error.to_string(), "transport error: session is closed");
    }

    #[test]
    fn context_mismatch_is_not_a_transport_error() {
        let other = RuntimeContext::new();
        let error = ClientError::ContextMismatch {
            session: ContextId::ROOT,
            current: other.id(),
        };
        assert!(!error.is_transport());
        assert!(error.to_string().starts_with("session bound to context root"));
    }
}
