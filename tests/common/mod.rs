//! Test PKI and a scripted provisioning server.
//!
//! Builds a throwaway CA and a server certificate carrying mock SGX evidence
//! bound to the server key, writes the CA to a temp file, and serves TLS with
//! `tokio-rustls`.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use secret_prov_client::attestation::extension::subject_public_key_info;
use secret_prov_client::{mock_quote, SessionConfig};

pub const SERVER_NAME: &str = "test-server";

const SGX_ARCS: &[u64] = &[1, 2, 840, 113741, 1, 13, 1];

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

/// What the server certificate carries in place of a real quote.
#[derive(Debug, Clone)]
pub enum LeafEvidence {
    /// A mock quote bound to the server key.
    Mock,
    /// A mock quote bound to some other key.
    ForeignKey,
    /// No evidence extension at all.
    Missing,
}

pub struct TestPki {
    pub ca_path: PathBuf,
    pub acceptor: TlsAcceptor,
}

impl Drop for TestPki {
    fn drop(&mut self) {
        std::fs::remove_file(&self.ca_path).ok();
    }
}

fn named(cn: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn
}

/// SPKI of `key` as the client will see it in the server certificate.
fn spki_of(key: &KeyPair) -> Vec<u8> {
    let scratch = CertificateParams::new(vec![SERVER_NAME.to_string()])
        .unwrap()
        .self_signed(key)
        .unwrap();
    subject_public_key_info(scratch.der()).unwrap()
}

impl TestPki {
    pub fn new(evidence: LeafEvidence) -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.distinguished_name = named("Test Provisioning CA");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let mut leaf_params = CertificateParams::new(vec![SERVER_NAME.to_string()]).unwrap();
        leaf_params.distinguished_name = named(SERVER_NAME);
        leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        match evidence {
            LeafEvidence::Mock => {
                let quote = mock_quote(&spki_of(&leaf_key), b"test-measurement");
                leaf_params.custom_extensions =
                    vec![CustomExtension::from_oid_content(SGX_ARCS, quote)];
            }
            LeafEvidence::ForeignKey => {
                let other = KeyPair::generate().unwrap();
                let quote = mock_quote(&spki_of(&other), b"test-measurement");
                leaf_params.custom_extensions =
                    vec![CustomExtension::from_oid_content(SGX_ARCS, quote)];
            }
            LeafEvidence::Missing => {}
        }
        let leaf = leaf_params.signed_by(&leaf_key, &ca, &ca_key).unwrap();

        let ca_path = std::env::temp_dir().join(format!(
            "secret-prov-test-{}-{}-ca.crt",
            std::process::id(),
            NEXT_ID.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&ca_path, ca.pem()).unwrap();

        let chain = vec![CertificateDer::from(leaf.der().to_vec())];
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der()));
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let server_config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .unwrap();

        Self {
            ca_path,
            acceptor: TlsAcceptor::from(Arc::new(server_config)),
        }
    }

    /// Config for an in-memory session addressed as `test-server:4433`.
    pub fn config(&self) -> SessionConfig {
        SessionConfig::new("test-server:4433", &self.ca_path).unwrap()
    }

    /// Config for a loopback TCP session.
    pub fn tcp_config(&self, addr: std::net::SocketAddr) -> SessionConfig {
        SessionConfig::builder()
            .endpoint(addr.to_string())
            .trust_anchor(&self.ca_path)
            .server_name(SERVER_NAME)
            .build()
            .unwrap()
    }
}

pub async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<Vec<u8>> {
    let len = stream.read_u32().await?;
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

pub async fn write_frame<S: AsyncWrite + Unpin>(stream: &mut S, payload: &[u8]) -> std::io::Result<()> {
    stream.write_u32(payload.len() as u32).await?;
    stream.write_all(payload).await?;
    stream.flush().await
}

/// Accept one TLS connection on `transport` and hand it to `script`.
/// Handshake failures are returned instead of panicking so tests covering
/// rejected handshakes can ignore them.
pub fn serve<T, F, Fut>(
    acceptor: TlsAcceptor,
    transport: T,
    script: F,
) -> tokio::task::JoinHandle<std::io::Result<()>>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: FnOnce(TlsStream<T>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = std::io::Result<()>> + Send,
{
    tokio::spawn(async move {
        let tls = acceptor.accept(transport).await?;
        script(tls).await
    })
}

/// Server half of the bootstrap exchange: expect the request marker, answer
/// with `secret`.
pub async fn answer_bootstrap<S: AsyncRead + AsyncWrite + Unpin>(
    tls: &mut S,
    secret: &[u8],
) -> std::io::Result<()> {
    let request = read_frame(tls).await?;
    assert_eq!(request, secret_prov_client::frame::SECRET_REQUEST_MARKER);
    write_frame(tls, secret).await
}
