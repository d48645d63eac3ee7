//! Body-framing decision machine (component E).

use crate::options::FramingDecision;
use http::HeaderMap;

/// Decide how the response body is framed, given the client's method, the
/// upstream's protocol version, and its status/headers. Rule order matters
/// — see §4.E.
pub fn decide_framing(method: &str, version: &str, status: u16, headers: &HeaderMap) -> FramingDecision {
    if method.eq_ignore_ascii_case("HEAD") {
        return FramingDecision::NoBody;
    }

    let connection_has_upgrade = header_contains_token(headers, http::header::CONNECTION, "upgrade");
    let upgrade_is_websocket = headers
        .get(http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if connection_has_upgrade && upgrade_is_websocket {
        return FramingDecision::Websocket;
    }

    if matches!(status, 100..=199 | 204 | 304) {
        return FramingDecision::NoBody;
    }

    if let Some(len) = headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        return FramingDecision::ContentLength(len);
    }

    if header_contains_token(headers, http::header::TRANSFER_ENCODING, "chunked") {
        return FramingDecision::Chunked;
    }

    if is_keep_alive(headers, version) {
        // Server claims keep-alive (explicitly or by per-version default) but
        // gave us no framing — it misbehaved. The caller is responsible for
        // marking the connection non-reusable.
        return FramingDecision::NoBody;
    }

    FramingDecision::UntilClosed
}

/// Whether the response, absent explicit framing, should still be treated as
/// keep-alive (and thus the `NoBody` branch above must mark the bridge
/// non-reusable rather than silently trusting the server). True when the
/// `Connection` header explicitly says `keep-alive`, or when it is absent
/// and `version`'s own default is keep-alive (everything but HTTP/1.0).
pub fn is_keep_alive(headers: &HeaderMap, version: &str) -> bool {
    if headers.contains_key(http::header::CONNECTION) {
        header_contains_token(headers, http::header::CONNECTION, "keep-alive")
    } else {
        !default_connection_is_close(version)
    }
}

/// Default `Connection` semantics when the header is absent: `close` for
/// HTTP/1.0, `keep-alive` otherwise.
pub fn default_connection_is_close(version: &str) -> bool {
    version.starts_with("1.0")
}

/// True when rule 6 fired: the server claimed keep-alive (explicitly or by
/// default) but gave no framing at all. The bridge must not reuse such a
/// connection even though the decided framing is `NoBody`.
pub fn response_misbehaved_keepalive(method: &str, version: &str, status: u16, headers: &HeaderMap) -> bool {
    if method.eq_ignore_ascii_case("HEAD") || matches!(status, 100..=199 | 204 | 304) {
        return false;
    }
    if headers.get(http::header::CONTENT_LENGTH).is_some() {
        return false;
    }
    if header_contains_token(headers, http::header::TRANSFER_ENCODING, "chunked") {
        return false;
    }
    is_keep_alive(headers, version)
}

fn header_contains_token(headers: &HeaderMap, name: http::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.append(
                http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                http::HeaderValue::from_str(v).unwrap(),
            );
        }
        h
    }

    #[test]
    fn head_request_has_no_body() {
        let h = headers(&[("content-length", "100")]);
        assert_eq!(decide_framing("HEAD", "HTTP/1.1", 200, &h), FramingDecision::NoBody);
    }

    #[test]
    fn websocket_upgrade() {
        let h = headers(&[("connection", "upgrade"), ("upgrade", "websocket")]);
        assert_eq!(decide_framing("GET", "HTTP/1.1", 101, &h), FramingDecision::Websocket);
    }

    #[test]
    fn no_body_statuses() {
        let h = HeaderMap::new();
        assert_eq!(decide_framing("GET", "HTTP/1.1", 204, &h), FramingDecision::NoBody);
        assert_eq!(decide_framing("GET", "HTTP/1.1", 304, &h), FramingDecision::NoBody);
        assert_eq!(decide_framing("GET", "HTTP/1.1", 100, &h), FramingDecision::NoBody);
    }

    #[test]
    fn content_length_wins_over_chunked() {
        let h = headers(&[("content-length", "42"), ("transfer-encoding", "chunked")]);
        assert_eq!(
            decide_framing("GET", "HTTP/1.1", 200, &h),
            FramingDecision::ContentLength(42)
        );
    }

    #[test]
    fn chunked_when_no_content_length() {
        let h = headers(&[("transfer-encoding", "chunked")]);
        assert_eq!(decide_framing("GET", "HTTP/1.1", 200, &h), FramingDecision::Chunked);
    }

    #[test]
    fn until_closed_on_http10_when_nothing_given() {
        // HTTP/1.0's implicit default is `close` — no keep-alive was ever
        // promised, so reading until the socket closes is correct, not a hang.
        let h = HeaderMap::new();
        assert_eq!(decide_framing("GET", "HTTP/1.0", 200, &h), FramingDecision::UntilClosed);
    }

    #[test]
    fn no_body_on_http11_when_nothing_given() {
        // HTTP/1.1's implicit default is `keep-alive` — absent any framing
        // header this is rule 6 (misbehaved server), not UntilClosed.
        let h = HeaderMap::new();
        assert_eq!(decide_framing("GET", "HTTP/1.1", 200, &h), FramingDecision::NoBody);
    }

    #[test]
    fn keep_alive_with_no_framing_is_no_body() {
        let h = headers(&[("connection", "keep-alive")]);
        assert_eq!(decide_framing("GET", "HTTP/1.1", 200, &h), FramingDecision::NoBody);
    }

    #[test]
    fn misbehaved_keepalive_flagged_only_without_framing() {
        let bad = headers(&[("connection", "keep-alive")]);
        assert!(response_misbehaved_keepalive("GET", "HTTP/1.1", 200, &bad));

        let fine = headers(&[("connection", "keep-alive"), ("content-length", "0")]);
        assert!(!response_misbehaved_keepalive("GET", "HTTP/1.1", 200, &fine));
    }

    #[test]
    fn misbehaved_keepalive_also_flagged_on_http11_implicit_default() {
        let h = HeaderMap::new();
        assert!(response_misbehaved_keepalive("GET", "HTTP/1.1", 200, &h));
        assert!(!response_misbehaved_keepalive("GET", "HTTP/1.0", 200, &h));
    }
}
