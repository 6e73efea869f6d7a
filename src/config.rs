//! Client configuration.
//!
//! [`ClientConfig`] carries everything a client handle needs: the base URL,
//! the API credential, retry settings and the transport settings used for
//! sessions the handle creates itself. It is built with
//! [`ClientConfig::builder`]:
//!
//! ```rust
//! use std::time::Duration;
//! use session_client::ClientConfig;
//!
//! let config = ClientConfig::builder("https://api.example.com/v1")
//!     .api_key("secret-key")
//!     .retries(3)
//!     .retry_wait(Duration::from_millis(250))
//!     .tls_verify(false)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.base_url().as_str(), "https://api.example.com/v1/");
//! assert_eq!(config.retries(), 3);
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use reqwest::header::{HeaderName, HeaderValue};

use crate::ClientError;

/// Header used for the API key unless configured otherwise.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Delay between retry attempts unless configured otherwise.
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(1);

/// User agent of sessions created by a client handle.
pub const DEFAULT_USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// A validated, non-empty API key.
///
/// The `Debug` output masks the value so keys do not end up in logs.
///
/// ```rust
/// use session_client::ApiKey;
///
/// let key = ApiKey::new("my-key").unwrap();
/// assert_eq!(key.as_ref(), "my-key");
/// assert_eq!(format!("{key:?}"), "ApiKey(*****)");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ClientError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ClientError::InvalidCredential("API key cannot be empty"));
        }
        if HeaderValue::from_str(&key).is_err() {
            return Err(ClientError::InvalidCredential(
                "API key contains characters not allowed in a header",
            ));
        }
        Ok(Self(key))
    }
}

impl AsRef<str> for ApiKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(*****)")
    }
}

/// Certificate validation behavior of a session.
#[derive(Clone, Debug, Default)]
pub enum TlsMode {
    /// Validate against the built-in root store.
    #[default]
    System,
    /// Additionally trust the given PEM-encoded CA certificate.
    CustomCa {
        path: PathBuf,
        pem: Arc<[u8]>,
    },
    /// Accept any certificate. Only meant for test servers with self-signed certs.
    DangerAcceptInvalid,
}

impl TlsMode {
    /// Reads a PEM CA certificate from disk.
    pub fn custom_ca(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref().to_path_buf();
        let pem = std::fs::read(&path).map_err(|source| ClientError::CaCertificate {
            path: path.clone(),
            source,
        })?;
        Ok(Self::CustomCa {
            path,
            pem: pem.into(),
        })
    }

    pub fn verifies_certificates(&self) -> bool {
        !matches!(self, Self::DangerAcceptInvalid)
    }
}

/// Settings applied when a [`Session`](crate::Session) builds its connection pool.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Option<Duration>,
    pub user_agent: HeaderValue,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: None,
            user_agent: HeaderValue::from_static(DEFAULT_USER_AGENT),
        }
    }
}

/// Configuration of a client handle.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    base_url: Url,
    api_key: Option<ApiKey>,
    api_key_header: HeaderName,
    retries: u32,
    retry_wait: Duration,
    transport: TransportConfig,
}

impl ClientConfig {
    /// Starts a builder for the given base URL.
    pub fn builder(base_url: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(base_url)
    }

    /// Shorthand for a config with a base URL and API key and defaults otherwise.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Self::builder(base_url).api_key(api_key).build()
    }

    /// Base URL, always ending in `/` so relative paths join below it.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn api_key(&self) -> Option<&ApiKey> {
        self.api_key.as_ref()
    }

    pub fn api_key_header(&self) -> &HeaderName {
        &self.api_key_header
    }

    /// Extra attempts made when a connection cannot be established.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn retry_wait(&self) -> Duration {
        self.retry_wait
    }

    /// Transport settings for sessions owned by the handle.
    pub fn transport(&self) -> &TransportConfig {
        &self.transport
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    base_url: String,
    api_key: Option<String>,
    api_key_header: Option<String>,
    retries: u32,
    retry_wait: Duration,
    tls_verify: bool,
    tls_ca_cert: Option<PathBuf>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl ClientConfigBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            api_key_header: None,
            retries: 0,
            retry_wait: DEFAULT_RETRY_WAIT,
            tls_verify: true,
            tls_ca_cert: None,
            timeout: None,
            user_agent: None,
        }
    }

    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the header the API key is sent in (default `X-API-Key`).
    #[must_use]
    pub fn api_key_header(mut self, name: impl Into<String>) -> Self {
        self.api_key_header = Some(name.into());
        self
    }

    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn retry_wait(mut self, wait: Duration) -> Self {
        self.retry_wait = wait;
        self
    }

    /// Disabling verification takes precedence over [`Self::tls_ca_cert`].
    #[must_use]
    pub fn tls_verify(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    #[must_use]
    pub fn tls_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_ca_cert = Some(path.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Validates the settings and reads the CA certificate, if any.
    pub fn build(self) -> Result<ClientConfig, ClientError> {
        let base_url = parse_base_url(&self.base_url)?;
        let api_key = self.api_key.map(ApiKey::new).transpose()?;
        let api_key_header = match self.api_key_header {
            Some(name) => HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ClientError::InvalidHeader {
                    setting: "API key header name",
                    value: name,
                }
            })?,
            None => HeaderName::from_static("x-api-key"),
        };
        let user_agent = match self.user_agent {
            Some(agent) => {
                HeaderValue::from_str(&agent).map_err(|_| ClientError::InvalidHeader {
                    setting: "user agent",
                    value: agent,
                })?
            }
            None => HeaderValue::from_static(DEFAULT_USER_AGENT),
        };

        let tls = match (self.tls_verify, self.tls_ca_cert) {
            (false, _) => TlsMode::DangerAcceptInvalid,
            (true, Some(path)) => TlsMode::custom_ca(path)?,
            (true, None) => TlsMode::System,
        };

        Ok(ClientConfig {
            base_url,
            api_key,
            api_key_header,
            retries: self.retries,
            retry_wait: self.retry_wait,
            transport: TransportConfig {
                tls,
                timeout: self.timeout,
                user_agent,
            },
        })
    }
}

/// Parses an absolute base URL and normalizes it to end with a slash.
pub(crate) fn parse_base_url(raw: &str) -> Result<Url, ClientError> {
    let parsed = Url::parse(raw).map_err(|_| ClientError::InvalidBaseUrl(raw.to_owned()))?;
    if parsed.cannot_be_a_base() {
        return Err(ClientError::InvalidBaseUrl(raw.to_owned()));
    }
    Ok(ensure_trailing_slash(parsed))
}

fn ensure_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_owned();
        path.push('/');
        url.set_path(&path);
    }
    url
}
