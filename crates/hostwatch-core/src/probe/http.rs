use std::time::Duration;

use reqwest::Client;
use tokio::time::Instant;
use tracing::debug;

use super::ProbeError;
use crate::target::CheckKind;

/// Builds the request URL for an HTTP(S) check. Addresses that already carry
/// a scheme are used as-is.
pub(super) fn build_url(kind: CheckKind, address: &str, port: Option<u16>) -> String {
    if address.contains("://") {
        return address.to_string();
    }
    let scheme = match kind {
        CheckKind::Https => "https",
        _ => "http",
    };
    match port {
        Some(p) => format!("{}://{}:{}", scheme, address, p),
        None => format!("{}://{}", scheme, address),
    }
}

/// One HTTP GET attempt. Redirects are followed by the client; the verdict is
/// based on the final status code, online for [200, 400).
pub(super) async fn check(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Result<(u16, Duration), ProbeError> {
    let start = Instant::now();

    match client.get(url).timeout(timeout).send().await {
        Ok(response) => {
            let latency = start.elapsed();
            let status = response.status().as_u16();
            debug!(url, status, headers = ?response.headers(), "HTTP probe response");
            if (200..400).contains(&status) {
                Ok((status, latency))
            } else {
                Err(ProbeError::HttpStatus(status))
            }
        }
        Err(e) if e.is_timeout() => Err(ProbeError::Timeout),
        Err(e) => Err(ProbeError::Network(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::EngineConfig;
    use crate::probe::test_support::StubResolver;
    use crate::probe::{Probe, Prober};
    use crate::target::Target;

    fn prober() -> Prober {
        Prober::new(
            Arc::new(StubResolver::loopback()),
            Prober::build_client(Duration::from_secs(2)),
            EngineConfig::default().with_retry_delay(Duration::from_millis(5)),
        )
    }

    fn target_for(server: &MockServer) -> Target {
        Target::new(1, 1, "web", format!("{}/health", server.uri()), CheckKind::Http)
    }

    #[test]
    fn url_building() {
        assert_eq!(
            build_url(CheckKind::Http, "example.com", None),
            "http://example.com"
        );
        assert_eq!(
            build_url(CheckKind::Https, "example.com", None),
            "https://example.com"
        );
        assert_eq!(
            build_url(CheckKind::Http, "example.com", Some(8080)),
            "http://example.com:8080"
        );
        assert_eq!(
            build_url(CheckKind::Https, "https://example.com/health", None),
            "https://example.com/health"
        );
    }

    #[tokio::test]
    async fn http_200_is_online() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let outcome = prober().probe(&target_for(&server)).await;
        assert!(outcome.online);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn http_304_counts_as_online() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let outcome = prober().probe(&target_for(&server)).await;
        assert!(outcome.online);
    }

    #[tokio::test]
    async fn http_retries_5xx_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let outcome = prober().probe(&target_for(&server)).await;
        assert!(outcome.online);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn http_5xx_exhausts_retries_and_reports_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let outcome = prober().probe(&target_for(&server)).await;
        assert!(!outcome.online);
        assert_eq!(outcome.error.as_deref(), Some("HTTP 500"));
    }

    #[tokio::test]
    async fn http_404_is_terminal_single_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = prober().probe(&target_for(&server)).await;
        assert!(!outcome.online);
        assert_eq!(outcome.error.as_deref(), Some("HTTP 404"));
    }
}
