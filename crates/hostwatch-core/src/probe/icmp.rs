use std::time::Duration;

use super::ProbeError;
use crate::resolver::Resolve;

/// Single ICMP echo. Requires an ICMP-capable socket; permission or setup
/// failures surface as network errors like any other unreachable host.
pub(super) async fn check(
    resolver: &dyn Resolve,
    host: &str,
    timeout: Duration,
) -> Result<Duration, ProbeError> {
    let addr = resolver.resolve(host).await?;
    let payload = [0u8; 8];

    match tokio::time::timeout(timeout, surge_ping::ping(addr, &payload)).await {
        Ok(Ok((_packet, rtt))) => Ok(rtt),
        Ok(Err(e)) => Err(ProbeError::Network(e.to_string())),
        Err(_) => Err(ProbeError::Timeout),
    }
}
