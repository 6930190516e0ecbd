//! Probe execution.
//!
//! A probe never fails for expected failure classes: DNS errors, timeouts,
//! refused connections, and bad HTTP statuses all come back as an offline
//! [`ProbeOutcome`] with a populated error string. Only programming errors
//! propagate (by panicking), and the engine isolates those per target.

mod http;
mod icmp;
mod tcp;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use crate::config::EngineConfig;
use crate::resolver::{DnsError, Resolve};
use crate::target::{CheckKind, ProbeOutcome, Target};

#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    #[error("timed out")]
    Timeout,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {0}")]
    HttpStatus(u16),
    #[error(transparent)]
    Dns(#[from] DnsError),
    #[error("unsupported check kind: {0}")]
    Unsupported(CheckKind),
}

impl ProbeError {
    /// Whether another attempt could plausibly succeed. Client-side HTTP
    /// errors and definitive DNS answers are terminal; everything transient
    /// is worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::ConnectionRefused | Self::Network(_) => true,
            Self::HttpStatus(code) => *code == 429 || *code >= 500,
            Self::Dns(DnsError::Timeout(_)) => true,
            Self::Dns(_) => false,
            Self::Unsupported(_) => false,
        }
    }
}

/// One attempt of a retryable operation, pre-classified.
pub(crate) enum Attempt<T> {
    Success(T),
    Retryable(ProbeError),
    Terminal(ProbeError),
}

impl<T> From<Result<T, ProbeError>> for Attempt<T> {
    fn from(result: Result<T, ProbeError>) -> Self {
        match result {
            Ok(value) => Attempt::Success(value),
            Err(e) if e.is_retryable() => Attempt::Retryable(e),
            Err(e) => Attempt::Terminal(e),
        }
    }
}

/// Runs `op` up to `max_attempts` times with `delay` between attempts.
/// A terminal error aborts immediately; exhausting attempts returns the last
/// retryable error.
pub(crate) async fn run_with_retries<T, F, Fut>(
    max_attempts: u32,
    delay: Duration,
    mut op: F,
) -> Result<T, ProbeError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Attempt<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match op(attempt).await {
            Attempt::Success(value) => return Ok(value),
            Attempt::Terminal(e) => return Err(e),
            Attempt::Retryable(e) => {
                debug!(attempt, max_attempts, error = %e, "probe attempt failed");
                last_error = Some(e);
                if attempt < max_attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(last_error.expect("at least one attempt ran"))
}

/// Trait for executing a single health check against a target.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, target: &Target) -> ProbeOutcome;
}

/// Production prober: ICMP echo, TCP connect, or HTTP(S) GET per target,
/// with auxiliary service-port checks after a successful primary check.
pub struct Prober {
    resolver: Arc<dyn Resolve>,
    client: Client,
    config: EngineConfig,
}

impl Prober {
    pub fn new(resolver: Arc<dyn Resolve>, client: Client, config: EngineConfig) -> Self {
        Self {
            resolver,
            client,
            config,
        }
    }

    pub fn build_client(timeout: Duration) -> Client {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(20)
            .gzip(true)
            .build()
            .expect("Failed to build HTTP client")
    }

    async fn primary(&self, target: &Target) -> Result<Duration, ProbeError> {
        match target.check {
            // ICMP loss is itself informative, not transient: one echo only.
            CheckKind::Icmp => {
                icmp::check(
                    self.resolver.as_ref(),
                    &target.address,
                    self.config.icmp_timeout,
                )
                .await
            }
            CheckKind::Tcp => {
                let resolver = Arc::clone(&self.resolver);
                let address = target.address.clone();
                let port = target.port.unwrap_or(80);
                let timeout = self.config.tcp_timeout;
                run_with_retries(self.config.max_retries, self.config.retry_delay, move |_| {
                    let resolver = Arc::clone(&resolver);
                    let address = address.clone();
                    async move { tcp::check(resolver.as_ref(), &address, port, timeout).await.into() }
                })
                .await
            }
            CheckKind::Http | CheckKind::Https => {
                let url = http::build_url(target.check, &target.address, target.port);
                let client = self.client.clone();
                let timeout = self.config.http_timeout;
                run_with_retries(self.config.max_retries, self.config.retry_delay, move |_| {
                    let client = client.clone();
                    let url = url.clone();
                    async move { http::check(&client, &url, timeout).await.map(|(_, lat)| lat).into() }
                })
                .await
            }
        }
    }

    /// TCP connect per listed service port, no retries. Runs only after the
    /// primary check has succeeded and never affects the primary verdict.
    async fn check_services(&self, target: &Target) -> HashMap<u16, bool> {
        let mut results = HashMap::with_capacity(target.services.len());
        for service in &target.services {
            let up = tcp::check(
                self.resolver.as_ref(),
                &target.address,
                service.port,
                self.config.service_port_timeout,
            )
            .await
            .is_ok();
            results.insert(service.port, up);
        }
        results
    }
}

#[async_trait]
impl Probe for Prober {
    async fn probe(&self, target: &Target) -> ProbeOutcome {
        let outcome = match self.primary(target).await {
            Ok(latency) => ProbeOutcome::online(latency),
            Err(e) => ProbeOutcome::offline(e.to_string()),
        };

        if outcome.online && !target.services.is_empty() {
            let services = self.check_services(target).await;
            return outcome.with_services(services);
        }
        outcome
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::StubResolver;
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config() -> EngineConfig {
        EngineConfig::default().with_retry_delay(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn retries_succeed_on_last_attempt_without_error() {
        let calls = AtomicU32::new(0);
        let result = run_with_retries(3, Duration::from_millis(1), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Attempt::Retryable(ProbeError::Timeout)
                } else {
                    Attempt::Success(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_exhausted_return_last_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retries(3, Duration::from_millis(1), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Retryable(ProbeError::ConnectionRefused) }
        })
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err, ProbeError::ConnectionRefused));
        assert!(!err.to_string().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_error_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retries(3, Duration::from_millis(1), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Terminal(ProbeError::HttpStatus(404)) }
        })
        .await;
        assert!(matches!(result.unwrap_err(), ProbeError::HttpStatus(404)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retryability_classification() {
        assert!(ProbeError::Timeout.is_retryable());
        assert!(ProbeError::ConnectionRefused.is_retryable());
        assert!(ProbeError::HttpStatus(503).is_retryable());
        assert!(ProbeError::HttpStatus(429).is_retryable());
        assert!(!ProbeError::HttpStatus(404).is_retryable());
        assert!(!ProbeError::Dns(DnsError::NotFound("x".into())).is_retryable());
        assert!(ProbeError::Dns(DnsError::Timeout("x".into())).is_retryable());
    }

    #[tokio::test]
    async fn dns_not_found_yields_offline_outcome_with_message() {
        let resolver = Arc::new(StubResolver::failing(DnsError::NotFound(
            "nonexistent.invalid".into(),
        )));
        let prober = Prober::new(
            resolver,
            Prober::build_client(Duration::from_secs(1)),
            test_config(),
        );
        let target = Target::new(1, 1, "ghost", "nonexistent.invalid", CheckKind::Tcp);

        let outcome = prober.probe(&target).await;
        assert!(!outcome.online);
        let error = outcome.error.unwrap().to_lowercase();
        assert!(error.contains("not found"), "{}", error);
    }

    #[tokio::test]
    async fn tcp_probe_connects_to_listening_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let prober = Prober::new(
            Arc::new(StubResolver::loopback()),
            Prober::build_client(Duration::from_secs(1)),
            test_config(),
        );
        let target = Target::new(1, 1, "local", "localhost", CheckKind::Tcp).with_port(port);

        let outcome = prober.probe(&target).await;
        assert!(outcome.online);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn tcp_probe_reports_refused_connection() {
        // Bind then drop to find a port that is very likely closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let prober = Prober::new(
            Arc::new(StubResolver::loopback()),
            Prober::build_client(Duration::from_secs(1)),
            test_config(),
        );
        let target = Target::new(1, 1, "closed", "localhost", CheckKind::Tcp).with_port(port);

        let outcome = prober.probe(&target).await;
        assert!(!outcome.online);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn service_ports_checked_independently_after_primary() {
        let primary = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let primary_port = primary.local_addr().unwrap().port();
        let service_up = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let up_port = service_up.local_addr().unwrap().port();
        let service_down = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let down_port = service_down.local_addr().unwrap().port();
        drop(service_down);

        let prober = Prober::new(
            Arc::new(StubResolver::loopback()),
            Prober::build_client(Duration::from_secs(1)),
            test_config(),
        );
        let target = Target::new(1, 1, "host", "localhost", CheckKind::Tcp)
            .with_port(primary_port)
            .with_services(vec![
                crate::target::ServicePort { name: "up".into(), port: up_port },
                crate::target::ServicePort { name: "down".into(), port: down_port },
            ]);

        let outcome = prober.probe(&target).await;
        // A service-port failure never flips the primary verdict.
        assert!(outcome.online);
        assert_eq!(outcome.services.get(&up_port), Some(&true));
        assert_eq!(outcome.services.get(&down_port), Some(&false));
    }
}
