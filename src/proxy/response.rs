//! Responses returned to relay clients

use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Response, StatusCode};

use tracing::warn;

use crate::error::RelayError;
use crate::proxy::handler::Stage;
use crate::proxy::headers::strip_hop_by_hop;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type of every response the relay writes
pub type RelayBody = UnsyncBoxBody<Bytes, BoxError>;

pub fn full_body(bytes: impl Into<Bytes>) -> RelayBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn empty_body() -> RelayBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Mirror an endpoint response to the client
///
/// Status and end-to-end headers are copied as-is and the body is passed
/// through chunk by chunk as it arrives.
pub fn stream_response(upstream: reqwest::Response) -> Response<RelayBody> {
    let status = upstream.status();
    let headers = strip_hop_by_hop(upstream.headers());

    let frames = upstream.bytes_stream().map_ok(Frame::data).map_err(|e| {
        warn!(stage = %Stage::Streaming, error = %e, "Upstream body failed mid-stream");
        BoxError::from(e)
    });

    let mut response = Response::new(StreamBody::new(frames).boxed_unsync());
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Render a relay failure as `{"error": "<message>"}`
pub fn error_response(err: &RelayError) -> Response<RelayBody> {
    let body = serde_json::json!({ "error": err.to_string() }).to_string();

    let mut response = Response::new(full_body(body.clone()));
    *response.status_mut() = err.status_code();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
        .headers_mut()
        .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    response
}

/// A bodiless response with the given status
pub fn status_response(status: StatusCode) -> Response<RelayBody> {
    let mut response = Response::new(empty_body());
    *response.status_mut() = status;
    response
}
