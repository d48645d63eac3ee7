//! Per-request proxy configuration and outcome types (component data model).

use ipnetwork::IpNetwork;
use regex::Regex;
use std::net::IpAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trust-gated behavior for a single forwarded header
/// (X-Forwarded-For / X-Forwarded-Host / X-Forwarded-Proto / X-Real-IP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyHeaderBehavior {
    Drop,
    Create,
    CombineUnsafe,
    CombineIfTrustedElseCreate,
    PassthroughUnsafe,
    PassthroughIfTrustedElseDrop,
    PassthroughIfTrustedElseCreate,
}

impl Default for ProxyHeaderBehavior {
    fn default() -> Self {
        ProxyHeaderBehavior::Drop
    }
}

/// Behaviors for the four forwarded headers, keyed the way §4.F enumerates them.
#[derive(Debug, Clone, Default)]
pub struct HeaderBehaviors {
    pub x_forwarded_for: ProxyHeaderBehavior,
    pub x_forwarded_host: ProxyHeaderBehavior,
    pub x_forwarded_proto: ProxyHeaderBehavior,
    pub x_real_ip: ProxyHeaderBehavior,
}

/// A single hostname substitution applied during body rewriting.
#[derive(Debug, Clone)]
pub struct HostnameSubstitution {
    pub from: String,
    pub to: String,
}

/// A single regex find-and-replace applied during body rewriting.
#[derive(Debug, Clone)]
pub struct RegexReplacement {
    pub pattern: Regex,
    pub replacement: String,
}

/// Per-request configuration carried from connect through finalize.
#[derive(Clone)]
pub struct ProxyOptions {
    pub connect_timeout: Duration,
    pub network_timeout: Duration,
    pub long_read_timeout: Duration,
    pub accept_any_cert: bool,
    /// Host override used for SNI and outgoing `Host:` header, in place of
    /// the URI's own host.
    pub host_override: Option<String>,
    pub cancellation: CancellationToken,
    pub allow_gateway_timeout_response: bool,
    pub allow_connection_keepalive: bool,
    pub header_behaviors: HeaderBehaviors,
    pub trusted_ranges: Vec<IpNetwork>,
    pub hostname_substitutions: Vec<HostnameSubstitution>,
    pub regex_replacements: Vec<RegexReplacement>,
    pub snoop_dir: Option<std::path::PathBuf>,
    pub include_server_timing_header: bool,
}

impl ProxyOptions {
    /// Whether the client IP falls inside any configured trusted range.
    pub fn is_trusted(&self, addr: IpAddr) -> bool {
        self.trusted_ranges.iter().any(|net| net.contains(addr))
    }

    /// Whether the body rewriter must run: true iff any substitution is configured.
    pub fn requires_full_response_buffering(&self) -> bool {
        !self.hostname_substitutions.is_empty() || !self.regex_replacements.is_empty()
    }
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(15_000),
            network_timeout: Duration::from_millis(60_000),
            long_read_timeout: Duration::from_secs(5 * 60),
            accept_any_cert: false,
            host_override: None,
            cancellation: CancellationToken::new(),
            allow_gateway_timeout_response: true,
            allow_connection_keepalive: true,
            header_behaviors: HeaderBehaviors::default(),
            trusted_ranges: Vec::new(),
            hostname_substitutions: Vec::new(),
            regex_replacements: Vec::new(),
            snoop_dir: None,
            include_server_timing_header: false,
        }
    }
}

/// Discriminated outcome of executing a bridge against a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyResultCode {
    Success,
    GatewayTimeout,
    TlsNegotiationError,
    ConnectionLost,
    BadGateway,
    Error,
}

#[derive(Debug, Clone)]
pub struct ProxyResult {
    pub code: ProxyResultCode,
    pub message: String,
    pub is_reusable: bool,
    pub should_retry_on_new_connection: bool,
}

impl ProxyResult {
    pub fn success() -> Self {
        Self {
            code: ProxyResultCode::Success,
            message: String::new(),
            is_reusable: false,
            should_retry_on_new_connection: false,
        }
    }

    pub fn failure(code: ProxyResultCode, message: impl Into<String>, retry: bool) -> Self {
        Self {
            code,
            message: message.into(),
            is_reusable: false,
            should_retry_on_new_connection: retry,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == ProxyResultCode::Success
    }
}

/// How the length of the response body is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingDecision {
    NoBody,
    ContentLength(u64),
    Chunked,
    UntilClosed,
    Websocket,
}
