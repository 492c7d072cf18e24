use std::net::SocketAddr;
use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::TlsAcceptor;

use secret_prov_client::attestation::extension::subject_public_key_info;
use secret_prov_client::frame::SECRET_REQUEST_MARKER;
use secret_prov_client::{mock_quote, MockVerifier, ProvisionSession, SessionConfig};

/// Workload-side provisioning against a local mock RA-TLS server.
///
/// Run with: `cargo run --example provision_client --features mock`
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "secret_prov_client=debug".into()),
        )
        .init();

    let ca_path = std::env::temp_dir().join(format!("provision-demo-{}-ca.crt", std::process::id()));
    let acceptor = mock_server_pki(&ca_path)?;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr: SocketAddr = listener.local_addr()?;
    println!("provisioning server listening on {addr}");

    let server = tokio::spawn(async move {
        let (tcp, peer) = listener.accept().await?;
        let mut tls = acceptor.accept(tcp).await?;
        println!("[server] attested TLS up with {peer}");

        let request = read_message(&mut tls).await?;
        assert_eq!(request, SECRET_REQUEST_MARKER);
        write_message(&mut tls, b"topsecret\0").await?;

        let more = read_message(&mut tls).await?;
        println!("[server] got {:?}", String::from_utf8_lossy(&more));
        write_message(&mut tls, b"AB").await?;
        tls.shutdown().await
    });

    if secret_prov_client::was_constructor_provisioned() {
        println!("[client] secrets were provisioned at start-up, nothing to do");
        return Ok(());
    }

    let config = SessionConfig::builder()
        .endpoint(addr.to_string())
        .trust_anchor(&ca_path)
        .server_name("provision-server")
        .build()?;
    let mut session = ProvisionSession::new(config);
    let result = run_client(&mut session).await;
    session.close().await;
    secret_prov_client::teardown();
    std::fs::remove_file(&ca_path).ok();

    result?;
    server.await??;
    println!("done!");
    Ok(())
}

async fn run_client(session: &mut ProvisionSession) -> Result<(), Box<dyn std::error::Error>> {
    session.start(&MockVerifier::new()).await?;

    let secret = session.get_bootstrap_secret().await?;
    println!(
        "[client] bootstrap secret: {:?} ({} bytes)",
        String::from_utf8_lossy(secret.trim_trailing_nul()),
        secret.len()
    );

    let more = session.exchange(b"MORE", 2).await?;
    println!("[client] second secret: {:?}", String::from_utf8_lossy(more.expose()));
    Ok(())
}

/// CA on disk plus a TLS acceptor whose certificate carries a mock quote
/// bound to its key.
fn mock_server_pki(ca_path: &std::path::Path) -> Result<TlsAcceptor, Box<dyn std::error::Error>> {
    let ca_key = KeyPair::generate()?;
    let mut ca_params = CertificateParams::new(Vec::<String>::new())?;
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "Demo Provisioning CA");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca = ca_params.self_signed(&ca_key)?;
    std::fs::write(ca_path, ca.pem())?;

    let leaf_key = KeyPair::generate()?;
    let scratch = CertificateParams::new(vec!["provision-server".to_string()])?.self_signed(&leaf_key)?;
    let quote = mock_quote(&subject_public_key_info(scratch.der())?, b"demo-enclave");

    let mut leaf_params = CertificateParams::new(vec!["provision-server".to_string()])?;
    leaf_params
        .distinguished_name
        .push(DnType::CommonName, "provision-server");
    leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    leaf_params.custom_extensions = vec![CustomExtension::from_oid_content(
        &[1, 2, 840, 113741, 1, 13, 1],
        quote,
    )];
    let leaf = leaf_params.signed_by(&leaf_key, &ca, &ca_key)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(
            vec![CertificateDer::from(leaf.der().to_vec())],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der())),
        )?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

async fn read_message<S: AsyncReadExt + Unpin>(stream: &mut S) -> std::io::Result<Vec<u8>> {
    let len = stream.read_u32().await?;
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn write_message<S: AsyncWriteExt + Unpin>(stream: &mut S, payload: &[u8]) -> std::io::Result<()> {
    stream.write_u32(payload.len() as u32).await?;
    stream.write_all(payload).await?;
    stream.flush().await
}
