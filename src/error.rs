use std::io;

/// Errors from frame parsing and encoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: u64, max: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<FrameError> for io::Error {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(inner) => inner,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Errors from extracting or verifying the peer's attestation evidence.
#[derive(Debug, thiserror::Error)]
pub enum AttestError {
    #[error("peer presented no certificate")]
    NoPeerCertificate,

    #[error("malformed peer certificate: {0}")]
    MalformedCertificate(String),

    #[error("peer certificate carries no attestation evidence")]
    MissingEvidence,

    #[error("attestation verification failed: {0}")]
    VerificationFailed(String),

    #[error("attestation is not bound to the certificate public key")]
    PublicKeyMismatch,
}

/// Errors from the remote file exchange helpers.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("server rejected {op} with status {status}")]
    RemoteFailure { op: &'static str, status: u8 },

    #[error("malformed {op} response: {reason}")]
    MalformedResponse { op: &'static str, reason: String },

    #[error("file name too long: {len} bytes (max {max})")]
    NameTooLong { len: usize, max: usize },
}

/// Top-level error type for the crate.
///
/// Attestation rejections are kept apart from connectivity failures: callers
/// must be able to tell "the peer is not trustworthy" from "the network is
/// flaky". See [`Error::is_security_event`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot connect to {endpoint}: {source}")]
    ConnectFailed {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake with {endpoint} failed: {reason}")]
    TlsHandshakeFailed { endpoint: String, reason: String },

    #[error("peer attestation rejected: {0}")]
    AttestationFailed(#[from] AttestError),

    #[error("channel write failed: {0}")]
    ChannelWriteFailed(#[source] io::Error),

    #[error("channel read failed: {0}")]
    ChannelReadFailed(#[source] io::Error),

    #[error("server answered the secret request with a zero-length secret")]
    EmptySecret,

    #[error("unexpected message length: expected {expected} bytes, got {actual}")]
    UnexpectedLength { expected: usize, actual: usize },

    #[error("session closed")]
    SessionClosed,

    #[error("session not established")]
    NotEstablished,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot load trust anchor {path}: {reason}")]
    TrustAnchor { path: String, reason: String },

    #[error("cannot build I/O runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl Error {
    /// True when the peer failed to prove its execution environment.
    pub fn is_security_event(&self) -> bool {
        matches!(self, Self::AttestationFailed(_))
    }

    /// True for failures that a caller-side retry may reasonably recover from.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
