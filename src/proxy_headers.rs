//! Proxy-header processor (component F): applies per-header trust policy to
//! X-Forwarded-For/Host/Proto and X-Real-IP before the outgoing request is
//! assembled.

use crate::options::{HeaderBehaviors, ProxyHeaderBehavior, ProxyOptions};
use http::{HeaderMap, HeaderName, HeaderValue};
use std::net::IpAddr;

static XFF: HeaderName = HeaderName::from_static("x-forwarded-for");
static XFH: HeaderName = HeaderName::from_static("x-forwarded-host");
static XFP: HeaderName = HeaderName::from_static("x-forwarded-proto");
static XRI: HeaderName = HeaderName::from_static("x-real-ip");

/// Everything the trust gate needs about the inbound request, gathered
/// before the outgoing headers are assembled.
pub struct TrustContext {
    pub client_ip: IpAddr,
    pub client_is_tls: bool,
    pub inbound_host: String,
}

/// Apply the four header behaviors in place. Must run before any other
/// header is copied onto the outgoing request — the trust gate is evaluated
/// before value selection, per §4.F.
pub fn apply_proxy_headers(headers: &mut HeaderMap, opts: &ProxyOptions, ctx: &TrustContext) {
    let trusted = opts.is_trusted(ctx.client_ip);
    let HeaderBehaviors {
        x_forwarded_for,
        x_forwarded_host,
        x_forwarded_proto,
        x_real_ip,
    } = &opts.header_behaviors;

    apply_one(headers, &XFF, *x_forwarded_for, trusted, || ctx.client_ip.to_string(), true);
    apply_one(headers, &XFH, *x_forwarded_host, trusted, || ctx.inbound_host.clone(), false);
    apply_one(
        headers,
        &XFP,
        *x_forwarded_proto,
        trusted,
        || if ctx.client_is_tls { "https".to_string() } else { "http".to_string() },
        false,
    );
    apply_one(headers, &XRI, *x_real_ip, trusted, || ctx.client_ip.to_string(), false);
}

/// Apply a single header's behavior. `combinable` is true only for
/// X-Forwarded-For, where `CombineUnsafe`/`CombineIfTrustedElseCreate`
/// append to a comma-separated list instead of overwriting.
fn apply_one(
    headers: &mut HeaderMap,
    name: &HeaderName,
    behavior: ProxyHeaderBehavior,
    trusted: bool,
    local_value: impl Fn() -> String,
    combinable: bool,
) {
    match behavior {
        ProxyHeaderBehavior::Drop => {
            headers.remove(name);
        }
        ProxyHeaderBehavior::Create => {
            set(headers, name, &local_value());
        }
        ProxyHeaderBehavior::CombineUnsafe => {
            if combinable {
                combine(headers, name, &local_value());
            } else {
                set(headers, name, &local_value());
            }
        }
        ProxyHeaderBehavior::CombineIfTrustedElseCreate => {
            if trusted && combinable {
                combine(headers, name, &local_value());
            } else {
                set(headers, name, &local_value());
            }
        }
        ProxyHeaderBehavior::PassthroughUnsafe => {
            // leave inbound untouched
        }
        ProxyHeaderBehavior::PassthroughIfTrustedElseDrop => {
            if !trusted {
                headers.remove(name);
            }
        }
        ProxyHeaderBehavior::PassthroughIfTrustedElseCreate => {
            if !trusted {
                set(headers, name, &local_value());
            }
        }
    }
}

fn set(headers: &mut HeaderMap, name: &HeaderName, value: &str) {
    if let Ok(v) = HeaderValue::from_str(value) {
        headers.insert(name.clone(), v);
    }
}

fn combine(headers: &mut HeaderMap, name: &HeaderName, value: &str) {
    if let Some(existing) = headers.get(name).and_then(|v| v.to_str().ok()) {
        let combined = format!("{}, {}", existing, value);
        set(headers, name, &combined);
    } else {
        set(headers, name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::HeaderBehaviors;

    fn opts_with(behaviors: HeaderBehaviors, trusted_ranges: Vec<ipnetwork::IpNetwork>) -> ProxyOptions {
        ProxyOptions {
            header_behaviors: behaviors,
            trusted_ranges,
            ..ProxyOptions::default()
        }
    }

    fn ctx(ip: &str, host: &str) -> TrustContext {
        TrustContext {
            client_ip: ip.parse().unwrap(),
            client_is_tls: false,
            inbound_host: host.to_string(),
        }
    }

    #[test]
    fn default_drop_removes_inbound() {
        let mut h = HeaderMap::new();
        h.insert(XFF.clone(), HeaderValue::from_static("1.2.3.4"));
        let opts = ProxyOptions::default();
        apply_proxy_headers(&mut h, &opts, &ctx("10.0.0.9", "a.example"));
        assert!(h.get(&XFF).is_none());
    }

    #[test]
    fn create_overwrites_with_client_ip() {
        let mut h = HeaderMap::new();
        h.insert(XFF.clone(), HeaderValue::from_static("1.2.3.4"));
        let opts = opts_with(
            HeaderBehaviors {
                x_forwarded_for: ProxyHeaderBehavior::Create,
                ..HeaderBehaviors::default()
            },
            vec![],
        );
        apply_proxy_headers(&mut h, &opts, &ctx("192.168.1.5", "a.example"));
        assert_eq!(h.get(&XFF).unwrap(), "192.168.1.5");
    }

    #[test]
    fn combine_if_trusted_appends_when_trusted() {
        let mut h = HeaderMap::new();
        h.insert(XFF.clone(), HeaderValue::from_static("10.0.0.1"));
        let opts = opts_with(
            HeaderBehaviors {
                x_forwarded_for: ProxyHeaderBehavior::CombineIfTrustedElseCreate,
                ..HeaderBehaviors::default()
            },
            vec!["192.168.1.0/24".parse().unwrap()],
        );
        apply_proxy_headers(&mut h, &opts, &ctx("192.168.1.5", "a.example"));
        assert_eq!(h.get(&XFF).unwrap(), "10.0.0.1, 192.168.1.5");
    }

    #[test]
    fn combine_if_trusted_creates_when_untrusted() {
        let mut h = HeaderMap::new();
        h.insert(XFF.clone(), HeaderValue::from_static("10.0.0.1"));
        let opts = opts_with(
            HeaderBehaviors {
                x_forwarded_for: ProxyHeaderBehavior::CombineIfTrustedElseCreate,
                ..HeaderBehaviors::default()
            },
            vec![],
        );
        apply_proxy_headers(&mut h, &opts, &ctx("8.8.8.8", "a.example"));
        assert_eq!(h.get(&XFF).unwrap(), "8.8.8.8");
    }

    #[test]
    fn passthrough_if_trusted_else_drop() {
        let mut h = HeaderMap::new();
        h.insert(XFF.clone(), HeaderValue::from_static("10.0.0.1"));
        let opts = opts_with(
            HeaderBehaviors {
                x_forwarded_for: ProxyHeaderBehavior::PassthroughIfTrustedElseDrop,
                ..HeaderBehaviors::default()
            },
            vec![],
        );
        apply_proxy_headers(&mut h, &opts, &ctx("8.8.8.8", "a.example"));
        assert!(h.get(&XFF).is_none());
    }

    #[test]
    fn x_real_ip_always_overwritten_on_create() {
        let mut h = HeaderMap::new();
        h.insert(XRI.clone(), HeaderValue::from_static("stale"));
        let opts = opts_with(
            HeaderBehaviors {
                x_real_ip: ProxyHeaderBehavior::Create,
                ..HeaderBehaviors::default()
            },
            vec![],
        );
        apply_proxy_headers(&mut h, &opts, &ctx("192.168.1.5", "a.example"));
        assert_eq!(h.get(&XRI).unwrap(), "192.168.1.5");
    }
}
