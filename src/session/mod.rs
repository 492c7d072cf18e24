pub mod channel;
pub mod handshake;
pub mod retry;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

pub use channel::{start, ProvisionSession, SessionStatus};

/// A provisioning server address in `host:port` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Parse `host:port` (IPv6 hosts in brackets, `[::1]:4433`).
    pub fn parse(s: &str) -> Result<Self, Error> {
        let invalid = |why: &str| Error::Config(format!("invalid endpoint {s:?}: {why}"));

        let (host, port) = s.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
        let host = match host.strip_prefix('[') {
            Some(inner) => inner
                .strip_suffix(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?,
            None if host.contains(':') => return Err(invalid("IPv6 host must be bracketed")),
            None => host,
        };
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("bad port"))?;
        if port == 0 {
            return Err(invalid("port must be > 0"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Configuration for one provisioning session.
///
/// No timeouts are applied unless configured; the protocol itself has none.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Provisioning server address.
    pub endpoint: Endpoint,

    /// PEM bundle of CA certificates validating the server's chain.
    pub trust_anchor: PathBuf,

    /// Name checked against the server certificate (default: endpoint host).
    pub server_name: Option<String>,

    /// Maximum frame payload size in bytes (default: 32 MiB).
    pub max_payload_size: u32,

    /// Optional bound on the TCP connect.
    pub connect_timeout: Option<Duration>,

    /// Optional bound on the TLS handshake plus attestation check.
    pub handshake_timeout: Option<Duration>,
}

impl SessionConfig {
    /// Create a builder for constructing a `SessionConfig`.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Shorthand for a config with only the two mandatory settings.
    pub fn new(endpoint: &str, trust_anchor: impl Into<PathBuf>) -> Result<Self, Error> {
        Self::builder()
            .endpoint(endpoint)
            .trust_anchor(trust_anchor)
            .build()
    }

    /// The name the server certificate must be valid for.
    pub fn server_name(&self) -> &str {
        self.server_name
            .as_deref()
            .unwrap_or_else(|| self.endpoint.host())
    }

    pub fn trust_anchor(&self) -> &Path {
        &self.trust_anchor
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    endpoint: Option<String>,
    trust_anchor: Option<PathBuf>,
    server_name: Option<String>,
    max_payload_size: u32,
    connect_timeout: Option<Duration>,
    handshake_timeout: Option<Duration>,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self {
            endpoint: None,
            trust_anchor: None,
            server_name: None,
            max_payload_size: crate::frame::MAX_PAYLOAD_SIZE,
            connect_timeout: None,
            handshake_timeout: None,
        }
    }
}

impl SessionConfigBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn trust_anchor(mut self, path: impl Into<PathBuf>) -> Self {
        self.trust_anchor = Some(path.into());
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.max_payload_size = size;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Build the `SessionConfig`, validating that all values are sensible.
    pub fn build(self) -> Result<SessionConfig, Error> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| Error::Config("endpoint is required".into()))?;
        let endpoint = Endpoint::parse(&endpoint)?;

        let trust_anchor = self
            .trust_anchor
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| Error::Config("trust_anchor is required".into()))?;

        if self.max_payload_size == 0 {
            return Err(Error::Config("max_payload_size must be > 0".into()));
        }
        if self.server_name.as_deref() == Some("") {
            return Err(Error::Config("server_name must not be empty".into()));
        }
        if self.connect_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::Config("connect_timeout must be > 0".into()));
        }
        if self.handshake_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::Config("handshake_timeout must be > 0".into()));
        }

        Ok(SessionConfig {
            endpoint,
            trust_anchor,
            server_name: self.server_name,
            max_payload_size: self.max_payload_size,
            connect_timeout: self.connect_timeout,
            handshake_timeout: self.handshake_timeout,
        })
    }
}
