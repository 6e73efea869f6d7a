//! Capability tokens for the concurrency context a session belongs to.
//!
//! A [`Session`](crate::Session) records the [`ContextId`] that is current when
//! it is created and rejects use from any other context with
//! [`ClientError::ContextMismatch`](crate::ClientError::ContextMismatch).
//!
//! Code that never enters a [`RuntimeContext`] runs in [`ContextId::ROOT`].
//! The current context is a Tokio task-local, so tasks started with
//! `tokio::spawn` begin in `ROOT` until they enter a context themselves.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static CURRENT_CONTEXT: ContextId;
}

/// Identifier of a concurrency context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// The implicit context of code running outside any [`RuntimeContext::run`].
    pub const ROOT: Self = Self(0);

    /// Returns the context the calling task is running in.
    pub fn current() -> Self {
        CURRENT_CONTEXT.try_with(|id| *id).unwrap_or(Self::ROOT)
    }

    /// Returns the raw numeric id.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::ROOT {
            f.write_str("root")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// An explicit concurrency context that sessions can be bound to.
///
/// ```no_run
/// use session_client::{Client, RuntimeContext, Session};
///
/// # async fn demo() -> Result<(), session_client::ClientError> {
/// let context = RuntimeContext::new();
/// let session = context.run(async { Session::new() }).await?;
/// let client = Client::with_session("https://api.example.com", "key", session.clone())?;
///
/// // Same context: allowed.
/// context.run(client.server_info()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RuntimeContext {
    id: ContextId,
}

impl RuntimeContext {
    /// Allocates a context with a fresh, process-unique id.
    pub fn new() -> Self {
        Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Runs `future` with this context as the current one.
    pub async fn run<F>(&self, future: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_CONTEXT.scope(self.id, future).await
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}
