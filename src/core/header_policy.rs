//! Declarative header allow-lists for forwarded traffic.
//!
//! Adding a passthrough header means adding a name to one of the lists below.
use std::net::{IpAddr, SocketAddr};

use http::{HeaderMap, HeaderName, HeaderValue};

/// Request headers copied to the backend.
pub const INBOUND_ALLOWED: &[&str] = &[
    "content-type",
    "accept",
    "accept-encoding",
    "accept-language",
    "user-agent",
    "authorization",
    "x-request-id",
    "x-user-id",
    "x-username",
    "x-user-role",
    "x-character-id",
];

/// Any request header with this prefix is copied as well.
pub const INBOUND_CUSTOM_PREFIX: &str = "x-game-";

/// Response headers copied back to the client.
pub const OUTBOUND_ALLOWED: &[&str] = &[
    "content-type",
    "cache-control",
    "expires",
    "last-modified",
    "etag",
    "x-ratelimit-limit",
    "x-ratelimit-remaining",
    "x-ratelimit-reset",
    "x-request-id",
];

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const X_REAL_IP: &str = "x-real-ip";
pub const X_GATEWAY_VERSION: &str = "x-gateway-version";
pub const X_GATEWAY_SERVICE: &str = "x-gateway-service";
pub const X_REQUEST_ID: &str = "x-request-id";

fn inbound_allowed(name: &HeaderName) -> bool {
    let name = name.as_str();
    INBOUND_ALLOWED.contains(&name) || name.starts_with(INBOUND_CUSTOM_PREFIX)
}

fn outbound_allowed(name: &HeaderName) -> bool {
    OUTBOUND_ALLOWED.contains(&name.as_str())
}

/// Copy the allowed subset of `source` into a new map (multi-valued headers preserved).
pub fn filter_request_headers(source: &HeaderMap) -> HeaderMap {
    copy_matching(source, inbound_allowed)
}

pub fn filter_response_headers(source: &HeaderMap) -> HeaderMap {
    copy_matching(source, outbound_allowed)
}

fn copy_matching(source: &HeaderMap, allowed: fn(&HeaderName) -> bool) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in source.iter().filter(|(name, _)| allowed(name)) {
        out.append(name.clone(), value.clone());
    }
    out
}

/// Client address of a request. `X-Forwarded-For` (first hop) and `X-Real-IP`
/// are only believed when the socket peer is one of `trusted_proxies`;
/// otherwise the peer itself is the client. "unknown" without a peer.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &[IpAddr],
) -> String {
    let Some(peer) = peer.map(|addr| addr.ip()) else {
        return "unknown".to_string();
    };
    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let forwarded = header(X_FORWARDED_FOR)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or_else(|| header(X_REAL_IP))
        .map(str::to_string)
        .unwrap_or_else(|| peer.to_string())
}

/// Add X-Forwarded-For / X-Forwarded-Proto / X-Gateway-Version to an outbound request.
pub fn add_forwarding_headers(
    headers: &mut HeaderMap,
    client_ip: &str,
    proto: &str,
    gateway_version: &str,
) {
    for (name, value) in [
        (X_FORWARDED_FOR, client_ip),
        (X_FORWARDED_PROTO, proto),
        (X_GATEWAY_VERSION, gateway_version),
    ] {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_whitelist_and_custom_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));
        headers.insert("x-user-role", HeaderValue::from_static("gm"));
        headers.insert("x-game-region", HeaderValue::from_static("eu"));
        headers.insert("cookie", HeaderValue::from_static("secret=1"));
        headers.insert("host", HeaderValue::from_static("gateway.local"));
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));

        let filtered = filter_request_headers(&headers);
        assert_eq!(filtered.get("authorization").unwrap(), "Bearer t");
        assert_eq!(filtered.get("x-game-region").unwrap(), "eu");
        assert_eq!(filtered.get("x-user-role").unwrap(), "gm");
        assert_eq!(filtered.get_all("accept").iter().count(), 2);
        assert!(filtered.get("cookie").is_none());
        assert!(filtered.get("host").is_none());
    }

    #[test]
    fn response_whitelist() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("etag", HeaderValue::from_static("\"v1\""));
        headers.insert("set-cookie", HeaderValue::from_static("sid=1"));
        headers.insert("server", HeaderValue::from_static("backend/1.0"));

        let filtered = filter_response_headers(&headers);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.get("set-cookie").is_none());
    }

    #[test]
    fn client_ip_from_trusted_proxy() {
        let proxy: SocketAddr = "10.1.1.1:4000".parse().unwrap();
        let trusted = [proxy.ip()];
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, None, &trusted), "unknown");
        assert_eq!(client_ip(&headers, Some(proxy), &trusted), "10.1.1.1");

        headers.insert(X_REAL_IP, HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers, Some(proxy), &trusted), "198.51.100.2");

        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static(" 203.0.113.5 , 10.0.0.1"));
        assert_eq!(client_ip(&headers, Some(proxy), &trusted), "203.0.113.5");
    }

    #[test]
    fn forwarded_headers_ignored_from_untrusted_peer() {
        let peer: SocketAddr = "198.51.100.20:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("10.9.9.1"));
        headers.insert(X_REAL_IP, HeaderValue::from_static("10.9.9.2"));

        assert_eq!(client_ip(&headers, Some(peer), &[]), "198.51.100.20");
        let other_proxy: IpAddr = "10.1.1.1".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer), &[other_proxy]), "198.51.100.20");
    }

    #[test]
    fn forwarding_headers_are_added() {
        let mut headers = HeaderMap::new();
        add_forwarding_headers(&mut headers, "203.0.113.5", "http", "1.4.0");
        assert_eq!(headers.get(X_FORWARDED_FOR).unwrap(), "203.0.113.5");
        assert_eq!(headers.get(X_FORWARDED_PROTO).unwrap(), "http");
        assert_eq!(headers.get(X_GATEWAY_VERSION).unwrap(), "1.4.0");
    }
}
