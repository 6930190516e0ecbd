//! Hostname resolution with a short-lived positive cache.
//!
//! Probes resolve through the [`Resolve`] trait so tests can substitute a
//! stub. The production implementation wraps a system-configured
//! trust-dns resolver and caches successful answers for a configurable TTL;
//! entries are evicted lazily on read, there is no background sweep.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::proto::op::ResponseCode;
use trust_dns_resolver::TokioAsyncResolver;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DnsError {
    #[error("hostname not found: {0}")]
    NotFound(String),
    #[error("no address records for {0}")]
    NoRecords(String),
    #[error("DNS lookup timed out for {0}")]
    Timeout(String),
}

#[derive(Debug, Error)]
#[error("failed to initialize DNS resolver: {0}")]
pub struct DnsInitError(#[from] ResolveError);

/// Trait for resolving a hostname to one routable address.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<IpAddr, DnsError>;
}

#[derive(Debug, Clone, Copy)]
struct CachedAddr {
    addr: IpAddr,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub(crate) struct ResolveCache {
    entries: DashMap<String, CachedAddr>,
}

impl ResolveCache {
    fn get(&self, host: &str) -> Option<IpAddr> {
        let hit = match self.entries.get(host) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.addr),
            Some(_) => None,
            None => return None,
        };
        if hit.is_none() {
            self.entries.remove(host);
        }
        hit
    }

    fn insert(&self, host: &str, addr: IpAddr, ttl: Duration) {
        self.entries.insert(
            host.to_string(),
            CachedAddr {
                addr,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// System-configured resolver with a positive cache.
pub struct DnsResolver {
    inner: TokioAsyncResolver,
    cache: ResolveCache,
    ttl: Duration,
    timeout: Duration,
}

impl DnsResolver {
    pub fn from_system_conf(ttl: Duration, timeout: Duration) -> Result<Self, DnsInitError> {
        let inner = TokioAsyncResolver::tokio_from_system_conf()?;
        Ok(Self {
            inner,
            cache: ResolveCache::default(),
            ttl,
            timeout,
        })
    }
}

#[async_trait]
impl Resolve for DnsResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr, DnsError> {
        // Literal addresses need no lookup and are never cached.
        if let Ok(addr) = host.parse::<IpAddr>() {
            return Ok(addr);
        }

        if let Some(addr) = self.cache.get(host) {
            debug!(host, %addr, "DNS cache hit");
            return Ok(addr);
        }

        let lookup = tokio::time::timeout(self.timeout, self.inner.lookup_ip(host))
            .await
            .map_err(|_| DnsError::Timeout(host.to_string()))?
            .map_err(|e| map_resolve_error(host, &e))?;

        let addr = lookup
            .iter()
            .next()
            .ok_or_else(|| DnsError::NoRecords(host.to_string()))?;

        self.cache.insert(host, addr, self.ttl);
        debug!(host, %addr, "DNS resolved");
        Ok(addr)
    }
}

fn map_resolve_error(host: &str, err: &ResolveError) -> DnsError {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => {
            if *response_code == ResponseCode::NXDomain {
                DnsError::NotFound(host.to_string())
            } else {
                DnsError::NoRecords(host.to_string())
            }
        }
        ResolveErrorKind::Timeout => DnsError::Timeout(host.to_string()),
        // The taxonomy is closed at three variants; anything else means the
        // lookup produced nothing usable for this host.
        _ => DnsError::NoRecords(host.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));

    #[tokio::test(start_paused = true)]
    async fn cache_returns_entry_within_ttl() {
        let cache = ResolveCache::default();
        cache.insert("example.com", ADDR, Duration::from_secs(300));
        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get("example.com"), Some(ADDR));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_evicts_expired_entry_on_read() {
        let cache = ResolveCache::default();
        cache.insert("example.com", ADDR, Duration::from_secs(300));
        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cache.get("example.com"), None);
        // The stale entry is gone, not just masked.
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_reinsert_refreshes_ttl() {
        let cache = ResolveCache::default();
        cache.insert("example.com", ADDR, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.insert("example.com", ADDR, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get("example.com"), Some(ADDR));
    }

    #[test]
    fn not_found_display_mentions_not_found() {
        let err = DnsError::NotFound("nonexistent.invalid".into());
        assert!(err.to_string().to_lowercase().contains("not found"));
    }

    #[test]
    fn error_variants_are_distinct_diagnostics() {
        assert_ne!(
            DnsError::NoRecords("a".into()).to_string(),
            DnsError::Timeout("a".into()).to_string()
        );
    }
}
