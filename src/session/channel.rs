use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::BytesMut;
use rustls::RootCertStore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_util::codec::{Decoder, Encoder};
use zeroize::Zeroize;

use crate::attestation::types::VerifiedAttestation;
use crate::attestation::AttestationVerifier;
use crate::error::{Error, Result};
use crate::frame::codec::LengthPrefixCodec;
use crate::frame::SECRET_REQUEST_MARKER;
use crate::secret::Secret;
use crate::state;
use crate::transport::tcp;

use super::handshake;
use super::{Endpoint, SessionConfig};

/// Lifecycle of a [`ProvisionSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Created, no channel yet.
    Uninitialized,
    /// Attested channel up; secrets may be exchanged.
    Established,
    /// Terminal. Every channel operation fails with `SessionClosed`.
    Closed,
}

/// One secret-provisioning session over an attested TLS channel.
///
/// The session exclusively owns its channel. Dropping it releases the
/// channel on every exit path; [`close`](Self::close) additionally sends a
/// TLS close_notify.
pub struct ProvisionSession<S = TcpStream> {
    config: SessionConfig,
    status: SessionStatus,
    channel: Option<TlsStream<S>>,
    peer_attestation: Option<VerifiedAttestation>,
    read_buf: BytesMut,
    codec: LengthPrefixCodec,
}

/// Connect to `config.endpoint` and establish an attested session.
pub async fn start(
    config: SessionConfig,
    verifier: &dyn AttestationVerifier,
) -> Result<ProvisionSession> {
    let mut session = ProvisionSession::new(config);
    session.start(verifier).await?;
    Ok(session)
}

impl ProvisionSession {
    /// Create an unstarted session that will connect over TCP.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_config(config)
    }

    /// Connect over TCP, run the TLS handshake and verify the server's
    /// attestation.
    ///
    /// Any failure leaves the session `Closed`.
    pub async fn start(&mut self, verifier: &dyn AttestationVerifier) -> Result<()> {
        let roots = self.prepare().await?;

        let endpoint = &self.config.endpoint;
        let stream = match tcp::connect(endpoint, self.config.connect_timeout).await {
            Ok(stream) => stream,
            Err(source) => {
                tracing::warn!(%endpoint, error = %source, "cannot reach provisioning server");
                let err = Error::ConnectFailed {
                    endpoint: endpoint.to_string(),
                    source,
                };
                self.teardown();
                return Err(err);
            }
        };

        self.establish(stream, roots, verifier).await
    }
}

impl<S> ProvisionSession<S> {
    /// Create an unstarted session for an arbitrary transport, to be started
    /// with [`start_over`](Self::start_over).
    pub fn with_config(config: SessionConfig) -> Self {
        let codec = LengthPrefixCodec::with_max_payload_size(config.max_payload_size);
        Self {
            config,
            status: SessionStatus::Uninitialized,
            channel: None,
            peer_attestation: None,
            read_buf: BytesMut::new(),
            codec,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.config.endpoint
    }

    pub fn trust_anchor(&self) -> &Path {
        self.config.trust_anchor()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The server's verified attestation, once established.
    pub fn peer_attestation(&self) -> Option<&VerifiedAttestation> {
        self.peer_attestation.as_ref()
    }

    fn ensure_established(&self) -> Result<()> {
        match self.status {
            SessionStatus::Established => Ok(()),
            SessionStatus::Uninitialized => Err(Error::NotEstablished),
            SessionStatus::Closed => Err(Error::SessionClosed),
        }
    }

    /// Check the session can be started and load its trust anchor.
    async fn prepare(&mut self) -> Result<Arc<RootCertStore>> {
        match self.status {
            SessionStatus::Uninitialized => {}
            SessionStatus::Established => {
                return Err(Error::Config("session already established".into()))
            }
            SessionStatus::Closed => return Err(Error::SessionClosed),
        }
        match state::global().trust_anchor(self.config.trust_anchor()).await {
            Ok(roots) => Ok(roots),
            Err(e) => {
                self.teardown();
                Err(e)
            }
        }
    }

    /// Drop the channel, wipe buffered bytes and enter `Closed`.
    fn teardown(&mut self) {
        self.channel = None;
        self.read_buf.as_mut().zeroize();
        self.read_buf.clear();
        self.codec = LengthPrefixCodec::with_max_payload_size(self.config.max_payload_size);
        self.status = SessionStatus::Closed;
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> ProvisionSession<S> {
    /// Run the TLS handshake over an already connected transport and verify
    /// the server's attestation.
    ///
    /// Any failure leaves the session `Closed`.
    pub async fn start_over(
        &mut self,
        transport: S,
        verifier: &dyn AttestationVerifier,
    ) -> Result<()> {
        let roots = self.prepare().await?;
        self.establish(transport, roots, verifier).await
    }

    async fn establish(
        &mut self,
        transport: S,
        roots: Arc<RootCertStore>,
        verifier: &dyn AttestationVerifier,
    ) -> Result<()> {
        match handshake::establish(transport, &self.config, roots, verifier).await {
            Ok((tls, verified)) => {
                self.channel = Some(tls);
                self.peer_attestation = Some(verified);
                self.status = SessionStatus::Established;
                tracing::info!(endpoint = %self.config.endpoint, "provisioning session established");
                Ok(())
            }
            Err(e) => {
                self.teardown();
                Err(e)
            }
        }
    }

    /// Ask the server for the bootstrap secret.
    ///
    /// A zero-length answer is a protocol violation and fails with
    /// [`Error::EmptySecret`].
    pub async fn get_bootstrap_secret(&mut self) -> Result<Secret> {
        self.ensure_established()?;
        self.send_frame(SECRET_REQUEST_MARKER).await?;

        let frame = self.recv_frame().await?;
        if frame.is_empty() {
            tracing::warn!(endpoint = %self.config.endpoint, "server sent an empty bootstrap secret");
            return Err(Error::EmptySecret);
        }
        tracing::debug!(len = frame.len(), "received bootstrap secret");
        Ok(into_secret(frame))
    }

    /// Send one length-prefixed message. Either the whole payload is written
    /// or the call fails with [`Error::ChannelWriteFailed`].
    pub async fn write(&mut self, payload: &[u8]) -> Result<usize> {
        self.ensure_established()?;
        self.send_frame(payload).await?;
        Ok(payload.len())
    }

    /// Receive one message of at most `expected_max_len` bytes.
    ///
    /// Shorter messages are accepted as they are; use
    /// [`read_exact`](Self::read_exact) when any other length must be
    /// rejected. A longer message is consumed, wiped and reported as
    /// [`Error::UnexpectedLength`]; the session stays usable.
    pub async fn read(&mut self, expected_max_len: usize) -> Result<Secret> {
        self.ensure_established()?;
        let mut frame = self.recv_frame().await?;
        if frame.len() > expected_max_len {
            let actual = frame.len();
            frame.as_mut().zeroize();
            return Err(Error::UnexpectedLength {
                expected: expected_max_len,
                actual,
            });
        }
        Ok(into_secret(frame))
    }

    /// Receive one message that must be exactly `len` bytes long.
    pub async fn read_exact(&mut self, len: usize) -> Result<Secret> {
        self.ensure_established()?;
        let mut frame = self.recv_frame().await?;
        if frame.len() != len {
            let actual = frame.len();
            frame.as_mut().zeroize();
            return Err(Error::UnexpectedLength {
                expected: len,
                actual,
            });
        }
        Ok(into_secret(frame))
    }

    /// One request/response round: write `payload`, then read the reply.
    pub async fn exchange(&mut self, payload: &[u8], expected_max_len: usize) -> Result<Secret> {
        self.write(payload).await?;
        self.read(expected_max_len).await
    }

    /// Close the session. Idempotent and infallible; also safe on a session
    /// that never reached `Established`.
    pub async fn close(&mut self) {
        let channel = self.channel.take();
        let was_open = self.status == SessionStatus::Established;
        self.teardown();

        if let Some(mut channel) = channel {
            if let Err(e) = channel.shutdown().await {
                tracing::debug!(error = %e, "close_notify failed");
            }
        }
        if was_open {
            tracing::info!(endpoint = %self.config.endpoint, "provisioning session closed");
        }
    }

    async fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        let mut buf = BytesMut::new();
        self.codec
            .encode(payload, &mut buf)
            .map_err(|e| Error::ChannelWriteFailed(e.into()))?;

        let Some(channel) = self.channel.as_mut() else {
            return Err(Error::SessionClosed);
        };
        let written = async {
            channel.write_all(&buf).await?;
            channel.flush().await
        }
        .await;
        buf.as_mut().zeroize();

        if let Err(e) = written {
            tracing::debug!(error = %e, "channel write failed, closing session");
            self.teardown();
            return Err(Error::ChannelWriteFailed(e));
        }
        tracing::debug!(len = payload.len(), "frame sent");
        Ok(())
    }

    async fn recv_frame(&mut self) -> Result<BytesMut> {
        loop {
            match self.codec.decode(&mut self.read_buf) {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "undecodable frame, closing session");
                    self.teardown();
                    return Err(Error::ChannelReadFailed(e.into()));
                }
            }

            let read = match self.channel.as_mut() {
                Some(channel) => channel.read_buf(&mut self.read_buf).await,
                None => return Err(Error::SessionClosed),
            };
            match read {
                Ok(0) => {
                    let err = match self.codec.pending_len() {
                        Some(declared) => Error::UnexpectedLength {
                            expected: declared as usize,
                            actual: self.read_buf.len(),
                        },
                        None => Error::ChannelReadFailed(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed by peer",
                        )),
                    };
                    tracing::debug!(error = %err, "peer closed the channel");
                    self.teardown();
                    return Err(err);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "channel read failed, closing session");
                    self.teardown();
                    return Err(Error::ChannelReadFailed(e));
                }
            }
        }
    }
}

/// Copy a received frame into a caller-owned secret and wipe the frame.
fn into_secret(mut frame: BytesMut) -> Secret {
    let secret = Secret::new(frame.to_vec());
    frame.as_mut().zeroize();
    secret
}

impl<S> Drop for ProvisionSession<S> {
    fn drop(&mut self) {
        self.read_buf.as_mut().zeroize();
        if self.channel.is_some() {
            tracing::debug!(endpoint = %self.config.endpoint, "provisioning session dropped without close");
        }
    }
}

impl<S> fmt::Debug for ProvisionSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionSession")
            .field("endpoint", &self.config.endpoint)
            .field("trust_anchor", &self.config.trust_anchor)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}
