//! Outbound calls to endpoints
//!
//! Translates a resolved target into the endpoint's invocation form and
//! executes the request with the relay's timeouts.

use std::time::Duration;

use bytes::Bytes;
use hyper::{HeaderMap, Method};
use tracing::{debug, instrument};
use url::{form_urlencoded, Url};

use crate::error::{RelayError, Result};
use crate::models::Endpoint;
use crate::proxy::headers::outbound_headers;
use crate::proxy::target::{ResolvedTarget, TARGET_QUERY_PARAM};

/// How a target is embedded into an endpoint URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvocationConvention {
    /// `<endpoint-base>/<percent-encoded target>`
    #[default]
    Path,
    /// `<endpoint-base>?url=<percent-encoded target>`
    Query,
}

impl InvocationConvention {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
        }
    }

    /// Build the URL that asks `endpoint` to fetch `target`
    pub fn endpoint_url(&self, endpoint: &Endpoint, target: &ResolvedTarget) -> String {
        let encoded: String = form_urlencoded::byte_serialize(target.as_str().as_bytes()).collect();
        let base = endpoint.base();

        match self {
            Self::Path => format!("{}/{}", base, encoded),
            Self::Query => {
                let separator = if base.contains('?') { '&' } else { '?' };
                format!("{}{}{}={}", base, separator, TARGET_QUERY_PARAM, encoded)
            }
        }
    }
}

impl std::str::FromStr for InvocationConvention {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "path" => Ok(Self::Path),
            "query" => Ok(Self::Query),
            other => Err(RelayError::InvalidConfig(format!(
                "unknown invocation convention '{}' (expected path or query)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for InvocationConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for the forwarder
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Timeout for establishing the connection to an endpoint
    pub connect_timeout: Duration,
    /// Timeout for the whole exchange
    pub request_timeout: Duration,
    /// How targets are embedded into endpoint URLs
    pub convention: InvocationConvention,
    /// Optional proxy every outbound call is dialed through
    pub egress_proxy: Option<Url>,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            convention: InvocationConvention::Path,
            egress_proxy: None,
        }
    }
}

/// Whether the request body travels to the endpoint
pub fn forwards_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD)
}

/// Executes outbound requests against endpoints
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    config: ForwarderConfig,
}

impl Forwarder {
    pub fn new(config: ForwarderConfig) -> Result<Self> {
        // Redirects are relayed to the client, never followed here
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy();

        if let Some(egress) = &config.egress_proxy {
            let proxy = reqwest::Proxy::all(egress.as_str()).map_err(|e| {
                RelayError::InvalidConfig(format!("invalid egress proxy {}: {}", egress, e))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| RelayError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    /// Send the request to `endpoint` and return the response head with its
    /// body still unread
    #[instrument(skip(self, endpoint, target, headers, body), fields(endpoint = %endpoint, target = %target))]
    pub async fn forward(
        &self,
        endpoint: &Endpoint,
        target: &ResolvedTarget,
        method: Method,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response> {
        let url = self.config.convention.endpoint_url(endpoint, target);
        debug!("Forwarding {} to {}", method, url);

        let with_body = forwards_body(&method);
        let mut request = self
            .client
            .request(method, &url)
            .headers(outbound_headers(headers));

        if with_body {
            request = request.body(body);
        }

        request.send().await.map_err(map_transport_error)
    }
}

/// Classify a client error into the relay's upstream failure kinds
pub fn map_transport_error(err: reqwest::Error) -> RelayError {
    if err.is_timeout() {
        RelayError::UpstreamTimeout
    } else {
        RelayError::UpstreamUnreachable(err.to_string())
    }
}
