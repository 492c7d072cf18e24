//! Tests for the `transport::tcp` connect helper.

use secret_prov_client::session::Endpoint;
use secret_prov_client::transport::tcp;

#[tokio::test]
async fn connect_sets_nodelay() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let endpoint = Endpoint::parse(&addr.to_string()).unwrap();

    let server_handle = tokio::spawn(async move { listener.accept().await.unwrap() });

    let client_stream = tcp::connect(&endpoint, None).await.unwrap();
    let (_server_stream, peer_addr) = server_handle.await.unwrap();

    assert!(client_stream.nodelay().unwrap());
    assert!(peer_addr.ip().is_loopback());
}

#[tokio::test]
async fn resolves_host_names() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let endpoint = Endpoint::parse(&format!("localhost:{port}")).unwrap();

    let server_handle = tokio::spawn(async move { listener.accept().await.unwrap() });
    let stream = tcp::connect(&endpoint, Some(std::time::Duration::from_secs(5)))
        .await
        .unwrap();
    let (_server_stream, _) = server_handle.await.unwrap();
    assert!(stream.peer_addr().unwrap().ip().is_loopback());
}

#[tokio::test]
async fn connect_to_unbound_port_fails() {
    // Bind and immediately drop to get a port that is not listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let endpoint = Endpoint::parse(&addr.to_string()).unwrap();
    let result = tcp::connect(&endpoint, None).await;
    assert!(result.is_err());
}
