//! Canonical origin keys used to bucket pooled upstream connections.

use std::fmt;

/// Canonicalized `scheme://host[:port]`, lowercased, with the port omitted
/// when it equals the scheme's default. Used as the pool key and as an
/// invariant check when a bridge is reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    key: String,
    scheme: String,
    host: String,
    port: u16,
}

fn default_port(scheme: &str) -> u16 {
    if scheme.eq_ignore_ascii_case("https") {
        443
    } else {
        80
    }
}

impl Origin {
    /// Build an origin from loose scheme/host/port parts, as derived from a
    /// destination URI or a front-end's `Host` header.
    pub fn new(scheme: &str, host: &str, port: Option<u16>) -> Self {
        let scheme = scheme.to_ascii_lowercase();
        let host = host.to_ascii_lowercase();
        let port = port.unwrap_or_else(|| default_port(&scheme));

        let key = if port == default_port(&scheme) {
            format!("{}://{}", scheme, host)
        } else {
            format!("{}://{}:{}", scheme, host, port)
        };

        Self {
            key,
            scheme,
            host,
            port,
        }
    }

    /// Parse an origin out of an absolute `http::Uri`.
    pub fn from_uri(uri: &http::Uri) -> Option<Self> {
        let scheme = uri.scheme_str()?.to_string();
        let host = uri.host()?.to_string();
        let port = uri.port_u16();
        Some(Self::new(&scheme, &host, port))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == "https"
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_omitted() {
        let o = Origin::new("HTTPS", "Example.com", Some(443));
        assert_eq!(o.as_str(), "https://example.com");
    }

    #[test]
    fn non_default_port_kept() {
        let o = Origin::new("http", "example.com", Some(8080));
        assert_eq!(o.as_str(), "http://example.com:8080");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let o = Origin::new("HTTPS", "Example.COM", None);
        let key = o.as_str().to_string();
        let uri: http::Uri = format!("{}/path", key).parse().unwrap();
        let reparsed = Origin::from_uri(&uri).unwrap();
        assert_eq!(reparsed.as_str(), key);
    }

    #[test]
    fn from_uri_extracts_parts() {
        let uri: http::Uri = "https://api.internal:9443/x".parse().unwrap();
        let o = Origin::from_uri(&uri).unwrap();
        assert_eq!(o.host(), "api.internal");
        assert_eq!(o.port(), 9443);
        assert!(o.is_tls());
    }
}
