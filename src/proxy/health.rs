//! Endpoint probing
//!
//! Sends one request through every endpoint in the pool and reports what came
//! back, which is how an operator sees the apparent IP each endpoint exits from.

use std::time::Instant;

use bytes::Bytes;
use futures::StreamExt;
use hyper::{HeaderMap, Method};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::models::Endpoint;
use crate::proxy::forwarder::Forwarder;
use crate::proxy::target::ResolvedTarget;

/// Target probed when none is given
pub const DEFAULT_CHECK_URL: &str = "https://ifconfig.me/ip";

/// Maximum number of endpoints probed at once
pub const PROBE_CONCURRENCY: usize = 8;

/// Outcome of probing one endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub endpoint: String,
    pub status: Option<u16>,
    pub latency_ms: u64,
    /// First line of the response body
    pub first_line: Option<String>,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn success(&self) -> bool {
        matches!(self.status, Some(status) if (200..300).contains(&status))
    }
}

impl std::fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.status, &self.error) {
            (Some(status), _) => write!(
                f,
                "{}: {} in {}ms {}",
                self.endpoint,
                status,
                self.latency_ms,
                self.first_line.as_deref().unwrap_or("")
            ),
            (None, Some(error)) => write!(
                f,
                "{}: failed after {}ms: {}",
                self.endpoint, self.latency_ms, error
            ),
            (None, None) => write!(f, "{}: no response", self.endpoint),
        }
    }
}

/// Probes endpoints through the relay's forwarder
pub struct EndpointProber {
    forwarder: Forwarder,
    target: ResolvedTarget,
    method: Method,
}

impl EndpointProber {
    pub fn new(forwarder: Forwarder, target: ResolvedTarget, method: Method) -> Self {
        Self {
            forwarder,
            target,
            method,
        }
    }

    /// Probe every endpoint, results in pool order
    pub async fn probe_all(&self, endpoints: &[Endpoint]) -> Vec<ProbeResult> {
        info!(
            "Probing {} endpoints with {} {}",
            endpoints.len(),
            self.method,
            self.target
        );

        let mut results = futures::stream::iter(endpoints.iter().enumerate())
            .map(|(index, endpoint)| async move { (index, self.probe(endpoint).await) })
            .buffer_unordered(PROBE_CONCURRENCY)
            .collect::<Vec<(usize, ProbeResult)>>()
            .await;
        results.sort_by_key(|(index, _)| *index);

        let results: Vec<ProbeResult> = results.into_iter().map(|(_, result)| result).collect();
        let healthy = results.iter().filter(|r| r.success()).count();
        info!(
            "Probe complete: {} healthy, {} unhealthy",
            healthy,
            results.len() - healthy
        );

        results
    }

    /// Probe a single endpoint
    #[instrument(skip(self), fields(endpoint = %endpoint))]
    pub async fn probe(&self, endpoint: &Endpoint) -> ProbeResult {
        let start = Instant::now();
        let outcome = self
            .forwarder
            .forward(
                endpoint,
                &self.target,
                self.method.clone(),
                &HeaderMap::new(),
                Bytes::new(),
            )
            .await;

        let mut result = ProbeResult {
            endpoint: endpoint.label().to_string(),
            status: None,
            latency_ms: 0,
            first_line: None,
            error: None,
        };

        match outcome {
            Ok(response) => {
                result.status = Some(response.status().as_u16());
                match response.text().await {
                    Ok(body) => {
                        result.first_line = body
                            .lines()
                            .next()
                            .map(|line| line.trim().to_string())
                            .filter(|line| !line.is_empty());
                    }
                    Err(e) => debug!("Failed to read probe body: {}", e),
                }
            }
            Err(e) => {
                warn!("Endpoint {} failed probe: {}", endpoint, e);
                result.error = Some(e.to_string());
            }
        }

        result.latency_ms = start.elapsed().as_millis() as u64;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::forwarder::ForwarderConfig;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prober() -> EndpointProber {
        EndpointProber::new(
            Forwarder::new(ForwarderConfig::default()).unwrap(),
            ResolvedTarget::parse(DEFAULT_CHECK_URL).unwrap(),
            Method::GET,
        )
    }

    async fn endpoint_returning(status: u16, body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_probe_reports_first_body_line() {
        let server = endpoint_returning(200, "198.51.100.23\nextra\n").await;
        let endpoint = Endpoint::parse(&server.uri()).unwrap().with_name("w1");

        let result = prober().probe(&endpoint).await;

        assert!(result.success());
        assert_eq!(result.endpoint, "w1");
        assert_eq!(result.status, Some(200));
        assert_eq!(result.first_line.as_deref(), Some("198.51.100.23"));
        assert!(result.to_string().starts_with("w1: 200 in "));
    }

    #[tokio::test]
    async fn test_probe_unreachable_endpoint() {
        let endpoint = Endpoint::parse("http://127.0.0.1:1").unwrap();
        let result = prober().probe(&endpoint).await;

        assert!(!result.success());
        assert!(result.status.is_none());
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_probe_all_keeps_pool_order() {
        let healthy = endpoint_returning(200, "198.51.100.1").await;
        let failing = endpoint_returning(503, "").await;

        let endpoints = vec![
            Endpoint::parse(&failing.uri()).unwrap().with_name("down"),
            Endpoint::parse(&healthy.uri()).unwrap().with_name("up"),
            Endpoint::parse("http://127.0.0.1:1").unwrap().with_name("gone"),
        ];

        let results = prober().probe_all(&endpoints).await;

        let names: Vec<&str> = results.iter().map(|r| r.endpoint.as_str()).collect();
        assert_eq!(names, vec!["down", "up", "gone"]);
        assert_eq!(results.iter().filter(|r| r.success()).count(), 1);
        assert_eq!(results[0].status, Some(503));
        assert!(results[0].first_line.is_none());
    }
}
