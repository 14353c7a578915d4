//! Hop-by-hop header handling shared by both legs of a relayed request

use hyper::header::{HeaderName, CONNECTION, CONTENT_LENGTH};
use hyper::HeaderMap;

use crate::proxy::target::TARGET_HEADER;

/// Check if a header is a hop-by-hop header that should not be forwarded
pub fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "host"
            | "connection"
            | "keep-alive"
            | "proxy-connection"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Header names listed in `Connection` apply to that connection only
fn connection_listed(headers: &HeaderMap) -> Vec<HeaderName> {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect()
}

/// Copy `headers` without hop-by-hop fields or fields named by `Connection`
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let listed = connection_listed(headers);
    let mut out = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers {
        if is_hop_by_hop_header(name.as_str()) || listed.contains(name) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    out
}

/// Headers for the outbound leg
///
/// The client recomputes `Content-Length`, and `X-Target-URL` is consumed by
/// target resolution so the endpoint only ever sees the resolved target.
pub fn outbound_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = strip_hop_by_hop(inbound);
    headers.remove(CONTENT_LENGTH);
    headers.remove(TARGET_HEADER);
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn test_is_hop_by_hop_header() {
        for name in [
            "Host",
            "Connection",
            "Keep-Alive",
            "Transfer-Encoding",
            "Upgrade",
            "Proxy-Authenticate",
            "Proxy-Authorization",
            "TE",
            "Trailer",
        ] {
            assert!(is_hop_by_hop_header(name), "{} is hop-by-hop", name);
        }
        assert!(!is_hop_by_hop_header("Content-Type"));
        assert!(!is_hop_by_hop_header("Authorization"));
    }

    #[test]
    fn test_strip_hop_by_hop_keeps_end_to_end_headers() {
        let inbound = header_map(&[
            ("host", "127.0.0.1:8080"),
            ("connection", "keep-alive, x-session-hint"),
            ("keep-alive", "timeout=5"),
            ("x-session-hint", "abc"),
            ("accept", "text/html"),
            ("accept", "application/json"),
            ("user-agent", "curl/8.0"),
        ]);

        let stripped = strip_hop_by_hop(&inbound);

        assert!(!stripped.contains_key("host"));
        assert!(!stripped.contains_key("connection"));
        assert!(!stripped.contains_key("keep-alive"));
        assert!(!stripped.contains_key("x-session-hint"));
        assert_eq!(stripped.get_all("accept").iter().count(), 2);
        assert_eq!(stripped.get("user-agent").unwrap(), "curl/8.0");
    }

    #[test]
    fn test_outbound_headers_drop_content_length() {
        let inbound = header_map(&[("content-length", "5"), ("content-type", "text/plain")]);
        let outbound = outbound_headers(&inbound);
        assert!(!outbound.contains_key("content-length"));
        assert_eq!(outbound.get("content-type").unwrap(), "text/plain");
    }

    #[test]
    fn test_outbound_headers_drop_target_header() {
        let inbound = header_map(&[
            ("X-Target-URL", "https://third.example/"),
            ("accept", "*/*"),
        ]);
        let outbound = outbound_headers(&inbound);
        assert!(!outbound.contains_key(TARGET_HEADER));
        assert_eq!(outbound.get("accept").unwrap(), "*/*");
    }
}
