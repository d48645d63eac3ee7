use super::GatewayState;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

/// Generic over the request body type: only the URI is ever consulted, so
/// tests can drive this with a plain `Request<()>` instead of a real
/// `hyper::body::Incoming`.
pub fn handle_admin<B>(
    req: Request<B>,
    state: GatewayState,
) -> Result<Response<BoxBody>, hyper::Error> {
    match req.uri().path() {
        "/health" | "/healthz" => Ok(Response::builder()
            .status(200)
            .body(full_body(r#"{"status":"ok"}"#))
            .unwrap()),

        "/ready" | "/readyz" => Ok(Response::builder()
            .status(200)
            .body(full_body(r#"{"status":"ready"}"#))
            .unwrap()),

        "/metrics" => {
            let body = state.metrics.render();
            Ok(Response::builder()
                .status(200)
                .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
                .body(full_body(body))
                .unwrap())
        }

        _ => Ok(Response::builder()
            .status(404)
            .body(full_body(r#"{"error":"not found"}"#))
            .unwrap()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use std::sync::OnceLock;

    fn test_state() -> GatewayState {
        static STATE: OnceLock<GatewayState> = OnceLock::new();
        STATE
            .get_or_init(|| GatewayState::new(GatewayConfig::default(), 8080).unwrap())
            .clone()
    }

    fn request(path: &str) -> Request<()> {
        Request::builder().uri(path).body(()).unwrap()
    }

    #[test]
    fn health_endpoint_returns_ok() {
        let resp = handle_admin(request("/health"), test_state()).unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[test]
    fn ready_endpoint_returns_ok() {
        let resp = handle_admin(request("/ready"), test_state()).unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[test]
    fn metrics_endpoint_returns_ok() {
        let resp = handle_admin(request("/metrics"), test_state()).unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "text/plain; version=0.0.4; charset=utf-8"
        );
    }

    #[test]
    fn unknown_path_returns_404() {
        let resp = handle_admin(request("/nope"), test_state()).unwrap();
        assert_eq!(resp.status(), 404);
    }
}
