use std::io;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::session::Endpoint;

/// Connect to a provisioning endpoint, resolving the host name.
///
/// A timeout, if given, is reported as `io::ErrorKind::TimedOut`.
pub async fn connect(endpoint: &Endpoint, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let connecting = TcpStream::connect((endpoint.host(), endpoint.port()));
    let stream = match timeout {
        Some(limit) => tokio::time::timeout(limit, connecting)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??,
        None => connecting.await?,
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}
