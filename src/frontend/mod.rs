//! Front-end contract (component K, §6.1): the trait boundary between the
//! engine (components A-J) and whatever HTTP server actually terminates
//! client connections. The engine depends only on these traits; the concrete
//! hyper wiring lives in `hyper_adapter`.

pub mod hyper_adapter;

use crate::connector::BoxedTransport;
use bytes::Bytes;
use http::HeaderMap;

/// Everything the engine needs to know about the inbound request that isn't
/// already carried in `proxy_headers::TrustContext`.
pub struct ClientExchange<'a> {
    pub method: &'a str,
    pub destination: &'a http::Uri,
    pub version: &'a str,
    pub inbound_headers: &'a HeaderMap,
    pub client_wants_upgrade: bool,
    pub client_wants_websocket: bool,
    pub request_body_is_chunked: bool,
    pub best_compression: Option<&'a str>,
    pub front_end_scheme: &'a str,
    pub front_end_host: &'a str,
    pub front_end_port: u16,
    /// `ServerIsUnderHighLoad` (§6.1): gates outgoing keep-alive advertisement
    /// and pool-reuse eligibility in the bridge (§4.H).
    pub server_under_high_load: bool,
}

/// The half of the `Response` contract the Bridge drives directly: write the
/// status+headers once, stream body chunks, and (for upgrades) hand back the
/// raw client-side transport after the 101 has gone out.
pub trait ResponseSink {
    async fn write_head(&mut self, status: u16, headers: &HeaderMap) -> std::io::Result<()>;
    async fn write_body_chunk(&mut self, data: Bytes) -> std::io::Result<()>;
    async fn finish(&mut self) -> std::io::Result<()>;
    async fn take_upgrade(&mut self) -> Option<BoxedTransport>;
    fn header_written(&self) -> bool;
}
