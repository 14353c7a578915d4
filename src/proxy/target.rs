//! Target resolution
//!
//! Extracts the URL a client wants fetched from an inbound request. A target
//! can be embedded in the path (`/https://host/path`), passed as the `url`
//! query parameter, or sent in the `X-Target-URL` header. Strategies are tried
//! in that order and the first one that applies wins.

use hyper::{HeaderMap, Uri};
use url::{form_urlencoded, Url};

use crate::error::{RelayError, Result};

/// Header carrying an explicit target
pub const TARGET_HEADER: &str = "x-target-url";

/// Query parameter carrying an explicit target
pub const TARGET_QUERY_PARAM: &str = "url";

/// An absolute http/https URL the client asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget(Url);

impl ResolvedTarget {
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim())
            .map_err(|e| RelayError::InvalidTarget(format!("{}: {}", raw, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(RelayError::InvalidTarget(format!(
                "{}: scheme must be http or https",
                raw
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(RelayError::InvalidTarget(format!("{}: missing host", raw)));
        }

        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.0
    }
}

impl std::fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The parts of an inbound request that carry a target
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
}

impl<'a> InboundRequest<'a> {
    pub fn new(uri: &'a Uri, headers: &'a HeaderMap) -> Self {
        Self { uri, headers }
    }

    pub fn from_parts(parts: &'a http::request::Parts) -> Self {
        Self::new(&parts.uri, &parts.headers)
    }
}

/// A resolution strategy
///
/// `None` means the strategy does not apply to the request; `Some(Err(_))`
/// means it applies but the value it found is not a usable target.
pub type Strategy = fn(&InboundRequest<'_>) -> Option<Result<ResolvedTarget>>;

/// Strategies in resolution order
pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("path", from_path),
    ("query", from_query),
    ("header", from_header),
];

/// Resolve the target of an inbound request
pub fn resolve(req: &InboundRequest<'_>) -> Result<ResolvedTarget> {
    STRATEGIES
        .iter()
        .find_map(|(_, strategy)| strategy(req))
        .unwrap_or_else(|| {
            Err(RelayError::InvalidTarget(
                "no target URL specified (use /<url>, ?url=<url> or the X-Target-URL header)"
                    .to_string(),
            ))
        })
}

/// `/https://host/path?query`, or an absolute-form request URI
pub fn from_path(req: &InboundRequest<'_>) -> Option<Result<ResolvedTarget>> {
    if req.uri.scheme().is_some() {
        return Some(ResolvedTarget::parse(&req.uri.to_string()));
    }

    let path = req.uri.path().strip_prefix('/')?;
    if path.is_empty() {
        return None;
    }

    let candidate = match req.uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };

    // A path that is not itself an absolute URL is left to the other strategies
    ResolvedTarget::parse(&candidate).ok().map(Ok)
}

/// `?url=<percent-encoded target>`
pub fn from_query(req: &InboundRequest<'_>) -> Option<Result<ResolvedTarget>> {
    let query = req.uri.query()?;
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == TARGET_QUERY_PARAM)
        .map(|(_, value)| ResolvedTarget::parse(&value))
}

/// `X-Target-URL: <target>`
pub fn from_header(req: &InboundRequest<'_>) -> Option<Result<ResolvedTarget>> {
    let value = req.headers.get(TARGET_HEADER)?;
    Some(
        value
            .to_str()
            .map_err(|_| RelayError::InvalidTarget("X-Target-URL is not valid ASCII".to_string()))
            .and_then(ResolvedTarget::parse),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn resolve_uri(uri: &str, target_header: Option<&str>) -> Result<ResolvedTarget> {
        let uri: Uri = uri.parse().unwrap();
        let mut headers = HeaderMap::new();
        if let Some(value) = target_header {
            headers.insert(TARGET_HEADER, HeaderValue::from_str(value).unwrap());
        }
        resolve(&InboundRequest::new(&uri, &headers))
    }

    #[test]
    fn test_three_forms_resolve_identically() {
        let from_path = resolve_uri("/https://httpbin.org/ip?a=1&b=2", None).unwrap();
        let from_query = resolve_uri(
            "/?url=https%3A%2F%2Fhttpbin.org%2Fip%3Fa%3D1%26b%3D2",
            None,
        )
        .unwrap();
        let from_header = resolve_uri("/", Some("https://httpbin.org/ip?a=1&b=2")).unwrap();

        assert_eq!(from_path.as_str(), "https://httpbin.org/ip?a=1&b=2");
        assert_eq!(from_path, from_query);
        assert_eq!(from_query, from_header);
    }

    #[test]
    fn test_path_target_keeps_query() {
        let target = resolve_uri("/http://example.com/search?q=rust", None).unwrap();
        assert_eq!(target.as_str(), "http://example.com/search?q=rust");
    }

    #[test]
    fn test_absolute_form_uri() {
        let target = resolve_uri("http://example.com/a/b?c=d", None).unwrap();
        assert_eq!(target.as_str(), "http://example.com/a/b?c=d");
    }

    #[test]
    fn test_path_takes_precedence_over_query_and_header() {
        let target = resolve_uri(
            "/https://first.example/?url=https%3A%2F%2Fsecond.example",
            Some("https://third.example"),
        )
        .unwrap();
        assert_eq!(target.url().host_str(), Some("first.example"));
    }

    #[test]
    fn test_query_takes_precedence_over_header() {
        let target = resolve_uri(
            "/anything?url=https%3A%2F%2Fsecond.example%2F",
            Some("https://third.example"),
        )
        .unwrap();
        assert_eq!(target.as_str(), "https://second.example/");
    }

    #[test]
    fn test_relative_path_falls_through_to_header() {
        let target = resolve_uri("/api/v1/items", Some("https://api.example/items")).unwrap();
        assert_eq!(target.as_str(), "https://api.example/items");
    }

    #[test]
    fn test_missing_target_is_invalid() {
        for uri in ["/", "/api/v1/items", "/?other=1", "/ftp://files.example/x"] {
            assert!(
                matches!(resolve_uri(uri, None), Err(RelayError::InvalidTarget(_))),
                "{} should not resolve",
                uri
            );
        }
    }

    #[test]
    fn test_malformed_explicit_targets_are_invalid() {
        assert!(matches!(
            resolve_uri("/?url=not-a-url", None),
            Err(RelayError::InvalidTarget(_))
        ));
        assert!(matches!(
            resolve_uri("/?url=", None),
            Err(RelayError::InvalidTarget(_))
        ));
        assert!(matches!(
            resolve_uri("/", Some("ftp://files.example/x")),
            Err(RelayError::InvalidTarget(_))
        ));
        assert!(matches!(
            resolve_uri("/", Some("example.com")),
            Err(RelayError::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_invalid_target_maps_to_bad_request() {
        let err = resolve_uri("/", None).unwrap_err();
        assert_eq!(err.status_code(), hyper::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_strategy_order() {
        let names: Vec<&str> = STRATEGIES.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["path", "query", "header"]);
    }
}
