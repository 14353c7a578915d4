//! Relay request handler
//!
//! Drives one inbound request through resolution, endpoint selection,
//! forwarding and streaming. Any failure is turned into a JSON error response
//! here, so a bad request never affects the connection task or other clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{HeaderName, CONTENT_LENGTH, REFERER, USER_AGENT};
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::models::RequestRecord;
use crate::proxy::forwarder::{forwards_body, Forwarder};
use crate::proxy::response::{
    error_response, status_response, stream_response, BoxError, RelayBody,
};
use crate::proxy::rotation::EndpointSelector;
use crate::proxy::target::{self, InboundRequest};
use crate::proxy::tunnel::TunnelHandler;

/// Where in the pipeline a request is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Selecting,
    Forwarding,
    Streaming,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Resolving => "resolving",
            Stage::Selecting => "selecting",
            Stage::Forwarding => "forwarding",
            Stage::Streaming => "streaming",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

type StageResult<T> = std::result::Result<T, (Stage, RelayError)>;

/// Largest request body buffered for forwarding
pub const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Relay request handler
pub struct RelayHandler {
    selector: Arc<dyn EndpointSelector>,
    forwarder: Forwarder,
    max_body_bytes: usize,
}

impl RelayHandler {
    pub fn new(selector: Arc<dyn EndpointSelector>, forwarder: Forwarder) -> Self {
        Self {
            selector,
            forwarder,
            max_body_bytes: MAX_REQUEST_BODY_BYTES,
        }
    }

    pub fn with_body_limit(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn selector(&self) -> &Arc<dyn EndpointSelector> {
        &self.selector
    }

    /// Handle an incoming request; never fails
    #[instrument(skip(self, req), fields(method = %req.method(), uri = %req.uri()))]
    pub async fn handle<B>(&self, req: Request<B>, client_addr: SocketAddr) -> Response<RelayBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let start = Instant::now();
        let mut record = new_record(req.method(), &req.uri().to_string(), req.headers(), client_addr);

        let response = if req.method() == Method::CONNECT {
            self.handle_connect(req, &mut record).await
        } else {
            self.handle_http(req, &mut record).await
        };

        record.status_code = response.status().as_u16();
        record.content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        record.response_time_ms = start.elapsed().as_millis() as u64;
        record.emit();

        response
    }

    /// Handle HTTP CONNECT request (raw passthrough tunnel)
    async fn handle_connect<B>(&self, req: Request<B>, record: &mut RequestRecord) -> Response<RelayBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
    {
        let (host, port) = match TunnelHandler::parse_authority(req.uri()) {
            Ok(authority) => authority,
            Err(e) => return fail(record, Stage::Resolving, e),
        };
        record.target = Some(format!("{}:{}", host, port));

        let connect_timeout = self.forwarder.config().connect_timeout;
        let server = match TunnelHandler::connect_direct(&host, port, connect_timeout).await {
            Ok(stream) => stream,
            Err(e) => return fail(record, Stage::Forwarding, e),
        };

        let on_upgrade = hyper::upgrade::on(req);
        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    let client = TokioIo::new(upgraded);
                    let _ = TunnelHandler::copy_bidirectional(client, server).await;
                }
                Err(e) => {
                    debug!("CONNECT upgrade failed: {}", e);
                }
            }
        });

        status_response(StatusCode::OK)
    }

    /// Handle a relayed HTTP request
    async fn handle_http<B>(&self, req: Request<B>, record: &mut RequestRecord) -> Response<RelayBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        match self.relay(req, record).await {
            Ok(response) => response,
            Err((stage, e)) => fail(record, stage, e),
        }
    }

    async fn relay<B>(&self, req: Request<B>, record: &mut RequestRecord) -> StageResult<Response<RelayBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();

        let target = target::resolve(&InboundRequest::from_parts(&parts))
            .map_err(|e| (Stage::Resolving, e))?;
        record.target = Some(target.to_string());

        let endpoint = self
            .selector
            .select()
            .await
            .map_err(|e| (Stage::Selecting, e))?;
        record.endpoint = Some(endpoint.label().to_string());
        debug!(endpoint = %endpoint, target = %target, "Endpoint selected");

        let body = read_body(&parts.method, body, self.max_body_bytes)
            .await
            .map_err(|e| (Stage::Forwarding, e))?;

        let upstream = self
            .forwarder
            .forward(&endpoint, &target, parts.method.clone(), &parts.headers, body)
            .await
            .map_err(|e| (Stage::Forwarding, e))?;

        Ok(stream_response(upstream))
    }
}

/// Collect the request body, up to `limit` bytes, when it is going to be forwarded
async fn read_body<B>(method: &Method, body: B, limit: usize) -> Result<Bytes>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    if !forwards_body(method) {
        return Ok(Bytes::new());
    }

    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(RelayError::PayloadTooLarge { limit }),
        Err(e) => Err(RelayError::Http(format!(
            "Failed to read request body: {}",
            e
        ))),
    }
}

fn fail(record: &mut RequestRecord, stage: Stage, err: RelayError) -> Response<RelayBody> {
    warn!(stage = %stage, error = %err, "Relay request failed");
    record.error_message = Some(err.to_string());
    error_response(&err)
}

fn new_record(
    method: &Method,
    uri: &str,
    headers: &HeaderMap,
    client_addr: SocketAddr,
) -> RequestRecord {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    RequestRecord {
        request_id: Uuid::new_v4(),
        client_addr: client_addr.ip().to_string(),
        method: method.as_str().to_string(),
        uri: uri.to_string(),
        target: None,
        endpoint: None,
        status_code: 0,
        content_length: None,
        referer: header(REFERER),
        user_agent: header(USER_AGENT),
        error_message: None,
        response_time_ms: 0,
        timestamp: chrono::Utc::now(),
    }
}
