//! Attested channel establishment: TLS handshake, then verification of the
//! evidence carried by the server certificate.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::attestation::extension::{self, CertificateEvidence};
use crate::attestation::types::VerifiedAttestation;
use crate::attestation::AttestationVerifier;
use crate::error::{AttestError, Error};

use super::SessionConfig;

fn anchor_error(path: &Path, reason: String) -> Error {
    Error::TrustAnchor {
        path: path.display().to_string(),
        reason,
    }
}

/// Load a PEM CA bundle into a root store.
pub fn load_trust_anchor(path: &Path) -> Result<RootCertStore, Error> {
    let pem = std::fs::read(path).map_err(|e| anchor_error(path, e.to_string()))?;
    parse_trust_anchor(path, &pem)
}

/// Parse the PEM contents of the CA bundle at `path`.
pub fn parse_trust_anchor(path: &Path, pem: &[u8]) -> Result<RootCertStore, Error> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut &pem[..]) {
        let cert = cert.map_err(|e| anchor_error(path, format!("bad PEM: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| anchor_error(path, format!("unusable CA certificate: {e}")))?;
    }
    if roots.is_empty() {
        return Err(anchor_error(path, "no certificates found".into()));
    }
    Ok(roots)
}

/// TLS client configuration validating the server chain against `roots`.
pub fn client_config(roots: Arc<RootCertStore>) -> Result<Arc<ClientConfig>, Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Config(format!("TLS setup failed: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Pull the evidence and the bound public key out of the server's leaf
/// certificate.
fn peer_evidence<S>(tls: &TlsStream<S>) -> Result<CertificateEvidence, AttestError> {
    let (_, conn) = tls.get_ref();
    let leaf = conn
        .peer_certificates()
        .and_then(|chain| chain.first())
        .ok_or(AttestError::NoPeerCertificate)?;
    let leaf: &[u8] = leaf.as_ref();
    let found = extension::extract_evidence(leaf)?;

    tracing::debug!(
        leaf_sha256 = hex::encode(Sha256::digest(leaf)),
        kind = ?found.evidence.kind,
        evidence_len = found.evidence.raw.len(),
        "extracted attestation evidence"
    );
    Ok(found)
}

/// Run `fut` to completion, or give up after `limit`.
async fn bounded<F: Future>(limit: Option<Duration>, fut: F) -> Result<F::Output, Duration> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| limit),
        None => Ok(fut.await),
    }
}

/// Run the TLS handshake over `transport` and verify the server's
/// attestation. No channel is returned unless both succeed.
///
/// `handshake_timeout` bounds the TLS handshake and the verifier call
/// separately. A verifier that runs out of time rejects the peer.
pub async fn establish<S: AsyncRead + AsyncWrite + Unpin>(
    transport: S,
    config: &SessionConfig,
    roots: Arc<RootCertStore>,
    verifier: &dyn AttestationVerifier,
) -> Result<(TlsStream<S>, VerifiedAttestation), Error> {
    let endpoint = config.endpoint.to_string();
    let server_name = ServerName::try_from(config.server_name().to_string())
        .map_err(|e| Error::Config(format!("invalid server name {:?}: {e}", config.server_name())))?;

    let connector = TlsConnector::from(client_config(roots)?);
    let handshake_failed = |reason: String| Error::TlsHandshakeFailed {
        endpoint: endpoint.clone(),
        reason,
    };
    let mut tls = bounded(config.handshake_timeout, connector.connect(server_name, transport))
        .await
        .map_err(|limit| handshake_failed(format!("handshake timed out after {limit:?}")))?
        .map_err(|e| handshake_failed(e.to_string()))?;

    let verdict = match peer_evidence(&tls) {
        Ok(found) => bounded(
            config.handshake_timeout,
            verifier.verify(&found.evidence, &found.public_key),
        )
        .await
        .unwrap_or_else(|limit| {
            Err(AttestError::VerificationFailed(format!(
                "verifier timed out after {limit:?}"
            )))
        }),
        Err(e) => Err(e),
    };

    match verdict {
        Ok(verified) => {
            tracing::info!(
                %endpoint,
                kind = ?verified.kind,
                evidence_hash = hex::encode(verified.evidence_hash),
                "attestation verification succeeded"
            );
            Ok((tls, verified))
        }
        Err(e) => {
            tracing::warn!(%endpoint, error = %e, "attestation verification failed, dropping channel");
            if let Err(close_err) = tls.shutdown().await {
                tracing::debug!(error = %close_err, "close_notify after rejected attestation failed");
            }
            Err(Error::AttestationFailed(e))
        }
    }
}
