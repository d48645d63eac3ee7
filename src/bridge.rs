//! Bridge (component H): the per-request state machine. Owns exactly one
//! upstream connection across its lifetime and drives it through
//! analyze -> connect-or-reuse -> send request -> read response head ->
//! decide framing -> (rewrite?) -> write response -> stream body or bridge a
//! websocket -> finalize.

use crate::chunked::ChunkedReader;
use crate::connector::{self, BoxedTransport};
use crate::error::ProxyError;
use crate::framing;
use crate::frontend::{ClientExchange, ResponseSink};
use crate::options::{FramingDecision, ProxyOptions, ProxyResult, ProxyResultCode};
use crate::origin::Origin;
use crate::proxy_headers::{self, TrustContext};
use crate::response::{self, HeadReadOutcome};
use crate::rewrite;
use crate::snoop::{SnoopRecorder, Tee, TeeBuffer};
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use http::{HeaderMap, HeaderName, HeaderValue};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};

const HARD_CAP_SECS: u64 = 60 * 60;
const DEFAULT_KEEPALIVE_SECS: u64 = 60;
const COPY_BUFFER: usize = 8 * 1024;

/// Headers that are never copied between the client and the upstream leg,
/// on either the request or the response side (§4.H Analyze).
fn is_do_not_proxy(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "keep-alive"
            | "transfer-encoding"
            | "te"
            | "connection"
            | "trailer"
            | "upgrade"
            | "proxy-authorization"
            | "proxy-authenticate"
            | "host"
    )
}

fn is_default_port(scheme: &str, port: u16) -> bool {
    (scheme.eq_ignore_ascii_case("https") && port == 443) || (scheme.eq_ignore_ascii_case("http") && port == 80)
}

/// Owns exactly one upstream socket and the bookkeeping needed to decide
/// whether it can outlive this request.
pub struct UpstreamBridge {
    origin: Origin,
    transport: Option<BoxedTransport>,
    expire_deadline: Instant,
    last_request_details: String,
}

impl UpstreamBridge {
    pub fn unconnected(origin: Origin) -> Self {
        Self {
            origin,
            transport: None,
            expire_deadline: Instant::now(),
            last_request_details: String::new(),
        }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expire_deadline
    }

    pub fn last_request_details(&self) -> &str {
        &self.last_request_details
    }
}

/// Drive one request across `bridge`, writing the response through `sink`.
/// `from_pool` records whether `bridge` was dequeued from the origin pool
/// (as opposed to freshly created) — it gates whether a dead-socket failure
/// is retried on a new connection or surfaced as a terminal error.
pub async fn execute<S: ResponseSink>(
    bridge: &mut UpstreamBridge,
    sink: &mut S,
    exchange: &ClientExchange<'_>,
    mut body_reader: Option<&mut (dyn AsyncRead + Unpin + Send)>,
    trust: &TrustContext,
    opts: &ProxyOptions,
    from_pool: bool,
    mut snoop: Option<&mut SnoopRecorder>,
) -> ProxyResult {
    let started = Instant::now();

    if bridge.transport.is_none() {
        let origin = Origin::from_uri(exchange.destination).unwrap_or_else(|| bridge.origin.clone());
        match connector::connect(
            &origin,
            opts.host_override.as_deref(),
            opts.accept_any_cert,
            opts.connect_timeout,
        )
        .await
        {
            Ok(transport) => {
                bridge.origin = origin;
                bridge.transport = Some(transport);
                bridge.expire_deadline = Instant::now() + Duration::from_secs(HARD_CAP_SECS);
            }
            Err(ProxyError::UpstreamConnectTimeout) => {
                metrics::counter!("proxy_upstream_connect_failures_total", "reason" => "timeout").increment(1);
                return synthesize_failure(
                    sink,
                    504,
                    ProxyResultCode::GatewayTimeout,
                    "upstream connect timed out",
                    opts,
                )
                .await;
            }
            Err(ProxyError::UpstreamTlsFailure(msg)) => {
                metrics::counter!("proxy_upstream_connect_failures_total", "reason" => "tls").increment(1);
                return synthesize_failure(sink, 502, ProxyResultCode::TlsNegotiationError, &msg, opts).await;
            }
            Err(e) => {
                metrics::counter!("proxy_upstream_connect_failures_total", "reason" => "other").increment(1);
                return synthesize_failure(sink, 502, ProxyResultCode::BadGateway, &e.to_string(), opts).await;
            }
        }
    }

    let transport = bridge.transport.take().expect("connected above");
    let (read_half, write_half) = tokio::io::split(transport);
    let request_tee: Option<TeeBuffer> = snoop.as_ref().map(|_| Arc::new(Mutex::new(Vec::new())));
    let response_tee: Option<TeeBuffer> = snoop.as_ref().map(|_| Arc::new(Mutex::new(Vec::new())));
    let mut reader = BufReader::new(Tee::new(read_half, response_tee.clone()));
    let mut writer = Tee::new(write_half, request_tee.clone());

    // --- Analyze + SendRequest ---

    let outgoing_connection = if exchange.client_wants_upgrade {
        "upgrade"
    } else if opts.allow_connection_keepalive && !exchange.server_under_high_load {
        "keep-alive"
    } else {
        "close"
    };

    let path_and_query = exchange
        .destination
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");

    let host_value = match &opts.host_override {
        Some(h) => h.clone(),
        None => {
            let host = exchange.destination.host().unwrap_or("");
            match exchange.destination.port_u16() {
                Some(p) if !is_default_port(exchange.destination.scheme_str().unwrap_or(""), p) => {
                    format!("{}:{}", host, p)
                }
                _ => host.to_string(),
            }
        }
    };

    let mut head = format!(
        "{} {} {}\r\nHost: {}\r\nConnection: {}\r\n",
        exchange.method, path_and_query, exchange.version, host_value, outgoing_connection
    );
    if exchange.client_wants_websocket {
        head.push_str("Upgrade: websocket\r\n");
    }
    if exchange.request_body_is_chunked {
        head.push_str("Transfer-Encoding: chunked\r\n");
    }

    let accept_encoding_value = if opts.requires_full_response_buffering() {
        "gzip, deflate, br".to_string()
    } else {
        exchange
            .inbound_headers
            .get(http::header::ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    if !accept_encoding_value.is_empty() {
        head.push_str(&format!("Accept-Encoding: {}\r\n", accept_encoding_value));
    }

    let mut working = exchange.inbound_headers.clone();
    for name in [
        "host",
        "connection",
        "upgrade",
        "transfer-encoding",
        "te",
        "keep-alive",
        "trailer",
        "proxy-authorization",
        "proxy-authenticate",
        "accept-encoding",
    ] {
        working.remove(name);
    }
    proxy_headers::apply_proxy_headers(&mut working, opts, trust);
    for (name, value) in working.iter() {
        head.push_str(name.as_str());
        head.push_str(": ");
        if let Ok(v) = value.to_str() {
            head.push_str(v);
        }
        head.push_str("\r\n");
    }
    head.push_str("\r\n");

    let header_write = tokio::time::timeout(opts.network_timeout, writer.write_all(head.as_bytes())).await;
    match header_write {
        Ok(Ok(())) => {}
        Ok(Err(e)) if from_pool => {
            return ProxyResult::failure(ProxyResultCode::ConnectionLost, e.to_string(), true);
        }
        Ok(Err(e)) => {
            return synthesize_failure(sink, 502, ProxyResultCode::BadGateway, &e.to_string(), opts).await;
        }
        Err(_) if from_pool => {
            return ProxyResult::failure(ProxyResultCode::ConnectionLost, "timed out sending request", true);
        }
        Err(_) => {
            return synthesize_failure(sink, 504, ProxyResultCode::GatewayTimeout, "timed out sending request", opts)
                .await;
        }
    }

    if let Some(body) = body_reader.as_deref_mut() {
        if exchange.request_body_is_chunked {
            let mut buf = vec![0u8; COPY_BUFFER];
            loop {
                let n = match body.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(_) => break,
                };
                let chunk_header = format!("{:x}\r\n", n);
                // A failure here is never retried, even on a pooled bridge:
                // request body bytes have already been pulled out of
                // `body_reader`, and replaying them on a fresh connection
                // would either drop or duplicate data. Only a failure before
                // any body byte is read (the header write above) is safe to
                // retry.
                if writer.write_all(chunk_header.as_bytes()).await.is_err()
                    || writer.write_all(&buf[..n]).await.is_err()
                    || writer.write_all(b"\r\n").await.is_err()
                {
                    return synthesize_failure(
                        sink,
                        502,
                        ProxyResultCode::BadGateway,
                        "upstream closed mid-request-body",
                        opts,
                    )
                    .await;
                }
            }
            let _ = writer.write_all(b"0\r\n\r\n").await;
        } else if let Err(e) = tokio::io::copy(body, &mut writer).await {
            return synthesize_failure(sink, 502, ProxyResultCode::BadGateway, &e.to_string(), opts).await;
        }
    }

    if let Err(e) = writer.flush().await {
        return synthesize_failure(sink, 502, ProxyResultCode::BadGateway, &e.to_string(), opts).await;
    }

    // --- ReadResponseHead ---

    let (line, mut headers) = match response::read_response_head(&mut reader, opts.network_timeout).await {
        Ok(HeadReadOutcome::Head { line, headers }) => (line, headers),
        Ok(HeadReadOutcome::Eof) => {
            if from_pool {
                return ProxyResult::failure(
                    ProxyResultCode::ConnectionLost,
                    format!("stale pooled connection (last request: {})", bridge.last_request_details),
                    true,
                );
            }
            return synthesize_failure(
                sink,
                502,
                ProxyResultCode::BadGateway,
                "upstream closed before responding",
                opts,
            )
            .await;
        }
        Err(ProxyError::Io(e)) if from_pool => {
            return ProxyResult::failure(
                ProxyResultCode::ConnectionLost,
                format!("stale pooled connection: {}", e),
                true,
            );
        }
        Err(e) => {
            return synthesize_failure(sink, 502, ProxyResultCode::BadGateway, &e.to_string(), opts).await;
        }
    };

    // --- Location rewriting ---

    if let Some(loc) = headers.get(http::header::LOCATION).and_then(|v| v.to_str().ok()).map(String::from) {
        if let Some(rewritten) = rewrite_location(
            &loc,
            bridge.origin.host(),
            exchange.front_end_scheme,
            exchange.front_end_host,
            exchange.front_end_port,
        ) {
            if let Ok(v) = HeaderValue::from_str(&rewritten) {
                headers.insert(http::header::LOCATION, v);
            }
        }
    }

    // --- DecideFraming ---

    let framing = framing::decide_framing(exchange.method, &line.version, line.code, &headers);
    let misbehaved = framing::response_misbehaved_keepalive(exchange.method, &line.version, line.code, &headers);

    let mut out_headers = HeaderMap::new();
    for (name, value) in headers.iter() {
        if !is_do_not_proxy(name) {
            out_headers.append(name.clone(), value.clone());
        }
    }
    if opts.include_server_timing_header {
        out_headers.insert(
            HeaderName::from_static("server-timing"),
            HeaderValue::from_static("proxy;dur=0"),
        );
    }

    // --- Rewrite? ---

    let content_type = out_headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let is_event_stream = content_type
        .as_deref()
        .map(|ct| ct.to_ascii_lowercase().starts_with("text/event-stream"))
        .unwrap_or(false);
    let plausibly_text = content_type.as_deref().and_then(rewrite::plausibly_text).is_some();

    let should_rewrite = opts.requires_full_response_buffering()
        && !is_event_stream
        && plausibly_text
        && !matches!(framing, FramingDecision::Websocket);
    let should_attempt_rewrite = should_rewrite
        && match framing {
            FramingDecision::ContentLength(n) => n <= rewrite::MAX_BUFFERED_BODY as u64,
            _ => true,
        };

    let mut rewritten_body: Option<rewrite::RewrittenBody> = None;
    if should_attempt_rewrite {
        let content_encoding = out_headers
            .get(http::header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        match buffer_body(&mut reader, framing, opts.network_timeout).await {
            Ok(raw) => {
                match rewrite::rewrite_body(
                    raw,
                    content_type.as_deref().unwrap_or(""),
                    content_encoding.as_deref(),
                    exchange.best_compression,
                    opts,
                )
                .await
                {
                    Ok(rb) => rewritten_body = Some(rb),
                    Err(e) => return ProxyResult::failure(ProxyResultCode::Error, e.to_string(), false),
                }
            }
            Err(ProxyError::UpstreamBodyOverLimit) => {
                return ProxyResult::failure(
                    ProxyResultCode::Error,
                    "response body exceeded the rewrite buffer cap",
                    false,
                );
            }
            Err(e) => return ProxyResult::failure(ProxyResultCode::Error, e.to_string(), false),
        }
    }

    if let Some(rb) = &rewritten_body {
        out_headers.remove(http::header::TRANSFER_ENCODING);
        out_headers.insert(
            http::header::CONTENT_LENGTH,
            HeaderValue::from_str(&rb.bytes.len().to_string()).unwrap(),
        );
        if let Some(ct) = &rb.content_type {
            if let Ok(v) = HeaderValue::from_str(ct) {
                out_headers.insert(http::header::CONTENT_TYPE, v);
            }
        }
        match &rb.content_encoding {
            Some(ce) => {
                if let Ok(v) = HeaderValue::from_str(ce) {
                    out_headers.insert(http::header::CONTENT_ENCODING, v);
                }
            }
            None => {
                out_headers.remove(http::header::CONTENT_ENCODING);
            }
        }
    }

    let rewritten_len = rewritten_body.as_ref().map(|rb| rb.bytes.len() as f64);

    // --- WriteResponse ---

    if let Err(e) = sink.write_head(line.code, &out_headers).await {
        return ProxyResult::failure(ProxyResultCode::Error, format!("writing response head: {}", e), false);
    }

    if matches!(framing, FramingDecision::Websocket) {
        metrics::counter!("proxy_websocket_upgrades_total").increment(1);
        if let Some(client_io) = sink.take_upgrade().await {
            let upstream_io = reader.into_inner().into_inner().unsplit(writer.into_inner());
            let _ = pump_websocket(client_io, upstream_io, opts.long_read_timeout).await;
        }
        return ProxyResult {
            code: ProxyResultCode::Success,
            message: String::new(),
            is_reusable: false,
            should_retry_on_new_connection: false,
        };
    }

    if let Some(rb) = rewritten_body {
        if sink.write_body_chunk(Bytes::from(rb.bytes)).await.is_err() {
            return ProxyResult::failure(ProxyResultCode::Error, "client disconnected mid-body", false);
        }
    } else {
        match framing {
            FramingDecision::NoBody => {}
            FramingDecision::ContentLength(n) => {
                let mut remaining = n;
                let mut buf = vec![0u8; COPY_BUFFER];
                while remaining > 0 {
                    let to_read = remaining.min(COPY_BUFFER as u64) as usize;
                    let n_read = match tokio::time::timeout(opts.long_read_timeout, reader.read(&mut buf[..to_read]))
                        .await
                    {
                        Ok(Ok(0)) => break,
                        Ok(Ok(n)) => n,
                        Ok(Err(e)) => {
                            return ProxyResult::failure(ProxyResultCode::Error, e.to_string(), false);
                        }
                        Err(_) => {
                            return ProxyResult::failure(ProxyResultCode::GatewayTimeout, "timed out reading body", false);
                        }
                    };
                    remaining -= n_read as u64;
                    if sink
                        .write_body_chunk(Bytes::copy_from_slice(&buf[..n_read]))
                        .await
                        .is_err()
                    {
                        return ProxyResult::failure(ProxyResultCode::Error, "client disconnected mid-body", false);
                    }
                }
            }
            FramingDecision::Chunked => {
                let mut chunked = ChunkedReader::new(&mut reader);
                loop {
                    match tokio::time::timeout(opts.long_read_timeout, chunked.next_chunk()).await {
                        Ok(Ok(Some(data))) => {
                            if sink.write_body_chunk(Bytes::from(data)).await.is_err() {
                                return ProxyResult::failure(
                                    ProxyResultCode::Error,
                                    "client disconnected mid-body",
                                    false,
                                );
                            }
                        }
                        Ok(Ok(None)) => break,
                        Ok(Err(e)) => {
                            return ProxyResult::failure(ProxyResultCode::BadGateway, e.to_string(), false);
                        }
                        Err(_) => {
                            return ProxyResult::failure(
                                ProxyResultCode::GatewayTimeout,
                                "timed out reading chunk",
                                false,
                            );
                        }
                    }
                }
            }
            FramingDecision::UntilClosed => loop {
                let mut buf = [0u8; COPY_BUFFER];
                let n_read = match tokio::time::timeout(opts.long_read_timeout, reader.read(&mut buf)).await {
                    Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
                    Ok(Ok(n)) => n,
                };
                if sink
                    .write_body_chunk(Bytes::copy_from_slice(&buf[..n_read]))
                    .await
                    .is_err()
                {
                    return ProxyResult::failure(ProxyResultCode::Error, "client disconnected mid-body", false);
                }
            },
            FramingDecision::Websocket => unreachable!("handled above"),
        }
    }

    if let Err(e) = sink.finish().await {
        return ProxyResult::failure(ProxyResultCode::Error, format!("finishing response: {}", e), false);
    }

    // --- Finalize ---

    let mut buf = itoa::Buffer::new();
    metrics::counter!(
        "proxy_requests_total",
        "status" => buf.format(line.code).to_owned(),
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds").record(started.elapsed().as_secs_f64());
    let response_len = rewritten_len.or(match framing {
        FramingDecision::ContentLength(n) => Some(n as f64),
        _ => None,
    });
    if let Some(len) = response_len {
        metrics::histogram!("proxy_response_size_bytes").record(len);
    }

    if let Some(rec) = snoop.as_mut() {
        if let Some(buf) = &request_tee {
            rec.record_request(&buf.lock().unwrap());
        }
        if let Some(buf) = &response_tee {
            rec.record_response(&buf.lock().unwrap());
        }
    }

    let upstream_keepalive = framing::is_keep_alive(&headers, &line.version);
    let reusable =
        upstream_keepalive && opts.allow_connection_keepalive && !exchange.server_under_high_load && !misbehaved;

    if reusable {
        let keepalive_secs = headers
            .get("keep-alive")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_keepalive_timeout)
            .unwrap_or(DEFAULT_KEEPALIVE_SECS)
            .min(60);
        let candidate = Instant::now() + Duration::from_secs(keepalive_secs);
        bridge.expire_deadline = bridge.expire_deadline.min(candidate);
        bridge.transport = Some(reader.into_inner().into_inner().unsplit(writer.into_inner()));
        bridge.last_request_details = format!("{} {} -> {}", exchange.method, exchange.destination, line.code);
    } else {
        bridge.last_request_details =
            format!("{} {} -> {} (not reusable)", exchange.method, exchange.destination, line.code);
    }

    ProxyResult {
        code: ProxyResultCode::Success,
        message: String::new(),
        is_reusable: reusable,
        should_retry_on_new_connection: false,
    }
}

fn parse_keepalive_timeout(v: &str) -> Option<u64> {
    v.split(',')
        .find_map(|part| part.trim().strip_prefix("timeout=").and_then(|n| n.trim().parse::<u64>().ok()))
}

/// Rewrite an absolute `Location` value whose host matches the origin we
/// just connected to, onto the front-end's own externally observed
/// scheme/host/port. Relative values (no host) are left untouched.
fn rewrite_location(
    value: &str,
    connected_host: &str,
    front_scheme: &str,
    front_host: &str,
    front_port: u16,
) -> Option<String> {
    let uri: http::Uri = value.parse().ok()?;
    let host = uri.host()?;
    if !host.eq_ignore_ascii_case(connected_host) {
        return None;
    }

    let mut parts = http::uri::Parts::default();
    parts.scheme = Some(front_scheme.parse().ok()?);
    let authority = if is_default_port(front_scheme, front_port) {
        front_host.to_string()
    } else {
        format!("{}:{}", front_host, front_port)
    };
    parts.authority = Some(authority.parse().ok()?);
    parts.path_and_query = uri.path_and_query().cloned();

    http::Uri::from_parts(parts).ok().map(|u| u.to_string())
}

async fn buffer_body<R>(reader: &mut R, framing: FramingDecision, network_timeout: Duration) -> Result<Vec<u8>, ProxyError>
where
    R: AsyncRead + tokio::io::AsyncBufRead + Unpin,
{
    match framing {
        FramingDecision::ContentLength(n) => {
            let mut buf = vec![0u8; n as usize];
            tokio::time::timeout(network_timeout, reader.read_exact(&mut buf))
                .await
                .map_err(|_| ProxyError::UpstreamProtocolError("timed out buffering response body".into()))??;
            Ok(buf)
        }
        FramingDecision::Chunked => {
            let mut chunked = ChunkedReader::new(reader);
            let mut out = Vec::new();
            while let Some(chunk) = chunked.next_chunk().await? {
                out.extend_from_slice(&chunk);
                if out.len() > rewrite::MAX_BUFFERED_BODY {
                    return Err(ProxyError::UpstreamBodyOverLimit);
                }
            }
            Ok(out)
        }
        FramingDecision::UntilClosed => {
            let mut out = Vec::new();
            let mut buf = [0u8; COPY_BUFFER];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
                if out.len() > rewrite::MAX_BUFFERED_BODY {
                    return Err(ProxyError::UpstreamBodyOverLimit);
                }
            }
            Ok(out)
        }
        FramingDecision::NoBody | FramingDecision::Websocket => Ok(Vec::new()),
    }
}

/// Pump bytes bidirectionally between the client's upgraded connection and
/// the upstream socket until either side closes. WebSocket frames are
/// copied opaquely; no framing is parsed.
pub async fn pump_websocket(
    client_io: BoxedTransport,
    upstream_io: BoxedTransport,
    long_read_timeout: Duration,
) -> std::io::Result<()> {
    let mut client_io = client_io;
    let mut upstream_io = upstream_io;
    let result = tokio::time::timeout(
        long_read_timeout,
        tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io),
    )
    .await;
    match result {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(()),
    }
}

/// Write a synthesized failure response if nothing has been sent to the
/// client yet; otherwise leave the (already-broken) response alone.
async fn synthesize_failure<S: ResponseSink>(
    sink: &mut S,
    status: u16,
    code: ProxyResultCode,
    message: &str,
    opts: &ProxyOptions,
) -> ProxyResult {
    if code == ProxyResultCode::GatewayTimeout && !opts.allow_gateway_timeout_response {
        return ProxyResult::failure(code, message, false);
    }
    if !sink.header_written() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        headers.insert(http::header::CONNECTION, HeaderValue::from_static("close"));
        let _ = sink.write_head(status, &headers).await;
        let _ = sink.finish().await;
    }
    ProxyResult::failure(code, message, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    struct RecordingSink {
        status: Option<u16>,
        headers: HeaderMap,
        body: Vec<u8>,
        finished: bool,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                status: None,
                headers: HeaderMap::new(),
                body: Vec::new(),
                finished: false,
            }
        }
    }

    impl ResponseSink for RecordingSink {
        async fn write_head(&mut self, status: u16, headers: &HeaderMap) -> std::io::Result<()> {
            self.status = Some(status);
            self.headers = headers.clone();
            Ok(())
        }

        async fn write_body_chunk(&mut self, data: Bytes) -> std::io::Result<()> {
            self.body.extend_from_slice(&data);
            Ok(())
        }

        async fn finish(&mut self) -> std::io::Result<()> {
            self.finished = true;
            Ok(())
        }

        async fn take_upgrade(&mut self) -> Option<BoxedTransport> {
            None
        }

        fn header_written(&self) -> bool {
            self.status.is_some()
        }
    }

    fn trust() -> TrustContext {
        TrustContext {
            client_ip: "127.0.0.1".parse().unwrap(),
            client_is_tls: false,
            inbound_host: "a.example".to_string(),
        }
    }

    async fn spawn_fake_origin(response: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = sock.read(&mut buf).await;
            let _ = sock.write_all(response).await;
        });
        addr
    }

    #[tokio::test]
    async fn pooled_get_success_streams_fixed_length_body() {
        let addr = spawn_fake_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\nConnection: keep-alive\r\n\r\nabc").await;
        let uri: http::Uri = format!("http://{}/x", addr).parse().unwrap();
        let origin = Origin::from_uri(&uri).unwrap();
        let mut bridge = UpstreamBridge::unconnected(origin);

        let inbound = HeaderMap::new();
        let exchange = ClientExchange {
            method: "GET",
            destination: &uri,
            version: "HTTP/1.1",
            inbound_headers: &inbound,
            client_wants_upgrade: false,
            client_wants_websocket: false,
            request_body_is_chunked: false,
            best_compression: None,
            front_end_scheme: "http",
            front_end_host: "a.example",
            front_end_port: 80,
            server_under_high_load: false,
        };

        let opts = ProxyOptions::default();
        let mut sink = RecordingSink::new();
        let result = execute(&mut bridge, &mut sink, &exchange, None, &trust(), &opts, false, None).await;

        assert!(result.is_success());
        assert_eq!(sink.status, Some(200));
        assert_eq!(sink.body, b"abc");
        assert!(result.is_reusable);
        assert_eq!(bridge.origin().host(), addr.ip().to_string());
    }

    #[tokio::test]
    async fn stale_pooled_bridge_signals_retry_before_any_bytes_written() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            drop(sock); // immediately close: the "stale pool" condition
        });

        let uri: http::Uri = format!("http://{}/x", addr).parse().unwrap();
        let origin = Origin::from_uri(&uri).unwrap();
        let transport = connector::connect(&origin, None, false, Duration::from_secs(2)).await.unwrap();

        // Give the fake origin a moment to close its side before we reuse it.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut bridge = UpstreamBridge::unconnected(origin);
        bridge.transport = Some(transport);

        let inbound = HeaderMap::new();
        let exchange = ClientExchange {
            method: "GET",
            destination: &uri,
            version: "HTTP/1.1",
            inbound_headers: &inbound,
            client_wants_upgrade: false,
            client_wants_websocket: false,
            request_body_is_chunked: false,
            best_compression: None,
            front_end_scheme: "http",
            front_end_host: "a.example",
            front_end_port: 80,
            server_under_high_load: false,
        };

        let opts = ProxyOptions::default();
        let mut sink = RecordingSink::new();
        let result = execute(&mut bridge, &mut sink, &exchange, None, &trust(), &opts, true, None).await;

        assert!(!result.is_success());
        assert!(result.should_retry_on_new_connection);
        assert!(sink.status.is_none());
    }

    #[test]
    fn location_rewrite_ignores_relative_and_other_hosts() {
        assert_eq!(rewrite_location("/foo", "origin.internal", "https", "proxy.example", 443), None);
        assert_eq!(
            rewrite_location("https://origin.internal/foo", "origin.internal", "https", "proxy.example", 443),
            Some("https://proxy.example/foo".to_string())
        );
        assert_eq!(
            rewrite_location("https://other.internal/foo", "origin.internal", "https", "proxy.example", 443),
            None
        );
    }

    #[test]
    fn keepalive_timeout_parsed_and_clamped_by_caller() {
        assert_eq!(parse_keepalive_timeout("timeout=30, max=100"), Some(30));
        assert_eq!(parse_keepalive_timeout("max=100"), None);
    }

    #[test]
    fn do_not_proxy_set_matches_spec() {
        for name in ["keep-alive", "transfer-encoding", "te", "connection", "host"] {
            assert!(is_do_not_proxy(&HeaderName::from_static(name)));
        }
        assert!(!is_do_not_proxy(&HeaderName::from_static("content-length")));
    }
}
