use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;

use super::ProbeError;
use crate::resolver::Resolve;

/// One TCP connect attempt. Resolution happens inside the attempt so a
/// transient DNS timeout is retried along with the connect itself; the
/// resolver's cache keeps repeat lookups cheap.
pub(super) async fn check(
    resolver: &dyn Resolve,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<Duration, ProbeError> {
    let addr = resolver.resolve(host).await?;
    let start = Instant::now();

    match tokio::time::timeout(timeout, TcpStream::connect((addr, port))).await {
        Ok(Ok(_stream)) => Ok(start.elapsed()),
        Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
            Err(ProbeError::ConnectionRefused)
        }
        Ok(Err(e)) => Err(ProbeError::Network(e.to_string())),
        Err(_) => Err(ProbeError::Timeout),
    }
}
