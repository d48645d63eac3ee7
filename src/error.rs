use std::fmt;

/// Error taxonomy for the proxy core. Mirrors the kinds described in the
/// error-handling design: each one maps to a `ProxyResultCode` at the
/// bridge boundary rather than being surfaced to callers directly.
#[derive(Debug)]
#[allow(dead_code)]
pub enum ProxyError {
    StalePool,
    UpstreamConnectTimeout,
    UpstreamTlsFailure(String),
    UpstreamProtocolError(String),
    UpstreamBodyOverLimit,
    ClientDisconnect,
    Cancelled,
    Io(std::io::Error),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::StalePool => write!(f, "pooled connection was stale"),
            ProxyError::UpstreamConnectTimeout => write!(f, "upstream connect timed out"),
            ProxyError::UpstreamTlsFailure(msg) => write!(f, "upstream TLS failure: {}", msg),
            ProxyError::UpstreamProtocolError(msg) => {
                write!(f, "upstream protocol error: {}", msg)
            }
            ProxyError::UpstreamBodyOverLimit => {
                write!(f, "response body exceeded buffering cap")
            }
            ProxyError::ClientDisconnect => write!(f, "client disconnected"),
            ProxyError::Cancelled => write!(f, "request cancelled"),
            ProxyError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for ProxyError {}

impl From<std::io::Error> for ProxyError {
    fn from(e: std::io::Error) -> Self {
        ProxyError::Io(e)
    }
}
