//! Concrete hyper-based realization of the front-end contract (§4.K). This
//! is the only module allowed to depend on a specific HTTP server
//! implementation — everything upstream of `entry::proxy_request` operates
//! on the `ClientExchange`/`ResponseSink` abstractions only.

use crate::config::{DestinationMode, GatewayConfig};
use crate::connector::BoxedTransport;
use crate::entry;
use crate::frontend::{ClientExchange, ResponseSink};
use crate::origin::Origin;
use crate::pool::OriginPoolRegistry;
use crate::proxy_headers::TrustContext;
use crate::snoop::SnoopRecorder;
use bytes::Bytes;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_util::io::StreamReader;

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

fn empty_body() -> ProxyBody {
    http_body_util::Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// The proxy's own locally-bound endpoint, used to rewrite absolute
/// `Location` headers onto our externally observed scheme/host/port (§4.H).
/// Scheme and host are derived per-request (TLS-ness of the client
/// connection, inbound `Host` header) — only the listening port is fixed.
pub struct FrontEndIdentity {
    pub port: u16,
}

/// Adapts hyper's `Incoming` request body into a plain `AsyncRead`, the way
/// the teacher's `BodyStream`/`StreamReader` combination adapts an outgoing
/// `BoxBody` for on-the-fly compression — same trick, opposite direction.
struct IncomingBodyStream(Incoming);

impl futures_util::Stream for IncomingBodyStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        use hyper::body::Body;
        loop {
            match Pin::new(&mut self.0).poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    if let Ok(data) = frame.into_data() {
                        return Poll::Ready(Some(Ok(data)));
                    }
                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(std::io::Error::other(e.to_string()))));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// A `Stream` view over an unbounded channel of response body bytes, used to
/// drive a `StreamBody` whose producer (the Bridge) fills it incrementally
/// from a background task rather than from one generator closure.
struct ChannelBody(mpsc::UnboundedReceiver<Bytes>);

impl futures_util::Stream for ChannelBody {
    type Item = Result<Frame<Bytes>, hyper::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_recv(cx).map(|opt| opt.map(|b| Ok(Frame::data(b))))
    }
}

/// `ResponseSink` implementation that hands headers to the waiting
/// `service_fn` call via a oneshot, then streams body bytes over a channel
/// so the Bridge's state machine (running in a spawned task) can keep
/// driving the response after hyper already has it.
struct HyperResponseSink {
    head_tx: Option<oneshot::Sender<(StatusCode, HeaderMap)>>,
    body_tx: Option<mpsc::UnboundedSender<Bytes>>,
    upgrade: hyper::upgrade::OnUpgrade,
    header_written: bool,
}

impl ResponseSink for HyperResponseSink {
    async fn write_head(&mut self, status: u16, headers: &HeaderMap) -> std::io::Result<()> {
        self.header_written = true;
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
        if let Some(tx) = self.head_tx.take() {
            let _ = tx.send((status, headers.clone()));
        }
        Ok(())
    }

    async fn write_body_chunk(&mut self, data: Bytes) -> std::io::Result<()> {
        match &self.body_tx {
            Some(tx) => tx
                .send(data)
                .map_err(|_| std::io::Error::other("client body channel closed")),
            None => Ok(()),
        }
    }

    async fn finish(&mut self) -> std::io::Result<()> {
        self.body_tx = None;
        Ok(())
    }

    async fn take_upgrade(&mut self) -> Option<BoxedTransport> {
        match (&mut self.upgrade).await {
            Ok(upgraded) => Some(Box::new(TokioIo::new(upgraded))),
            Err(_) => None,
        }
    }

    fn header_written(&self) -> bool {
        self.header_written
    }
}

fn resolve_destination(
    config: &DestinationMode,
    inbound_host: &str,
    path_and_query: &str,
) -> Option<http::Uri> {
    match config {
        DestinationMode::Fixed { scheme, host, port } => {
            let authority = if crate::origin::Origin::new(scheme, host, Some(*port)).port()
                == default_port_for(scheme)
            {
                host.clone()
            } else {
                format!("{}:{}", host, port)
            };
            format!("{}://{}{}", scheme, authority, path_and_query).parse().ok()
        }
        DestinationMode::HostHeader { scheme, port_override } => {
            let host_only = inbound_host.split(':').next().unwrap_or(inbound_host);
            let authority = match port_override {
                Some(p) => format!("{}:{}", host_only, p),
                None => inbound_host.to_string(),
            };
            format!("{}://{}{}", scheme, authority, path_and_query).parse().ok()
        }
    }
}

fn default_port_for(scheme: &str) -> u16 {
    if scheme.eq_ignore_ascii_case("https") {
        443
    } else {
        80
    }
}

/// Handle a single inbound request: resolve its destination, bridge it
/// through the engine, and hand hyper a streaming response as soon as the
/// upstream's status/headers are known.
pub async fn handle(
    mut req: Request<Incoming>,
    peer: SocketAddr,
    client_is_tls: bool,
    registry: Arc<OriginPoolRegistry>,
    config: Arc<GatewayConfig>,
    opts: Arc<crate::options::ProxyOptions>,
    identity: Arc<FrontEndIdentity>,
    server_under_high_load: bool,
) -> Result<Response<ProxyBody>, hyper::Error> {
    let method = req.method().as_str().to_string();
    let version_str = match req.version() {
        http::Version::HTTP_10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    };
    let inbound_host = req
        .headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/")
        .to_string();

    let destination = match resolve_destination(&config.destination, &inbound_host, &path_and_query) {
        Some(uri) => uri,
        None => {
            return Ok(Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(empty_body())
                .unwrap());
        }
    };
    let origin = match Origin::from_uri(&destination) {
        Some(o) => o,
        None => {
            return Ok(Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(empty_body())
                .unwrap());
        }
    };

    let connection_tokens: Vec<String> = req
        .headers()
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .collect();
    let client_wants_upgrade = connection_tokens.iter().any(|t| t == "upgrade");
    let client_wants_websocket = client_wants_upgrade
        && req
            .headers()
            .get(http::header::UPGRADE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);
    let request_body_is_chunked = req
        .headers()
        .get(http::header::TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("chunked")))
        .unwrap_or(false);
    let best_compression = req
        .headers()
        .get(http::header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let upgrade = hyper::upgrade::on(&mut req);
    let headers = req.headers().clone();
    let (_parts, incoming) = req.into_parts();
    let mut body_reader = StreamReader::new(IncomingBodyStream(incoming));

    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::unbounded_channel();
    let mut sink = HyperResponseSink {
        head_tx: Some(head_tx),
        body_tx: Some(body_tx),
        upgrade,
        header_written: false,
    };

    let trust = TrustContext {
        client_ip: peer.ip(),
        client_is_tls,
        inbound_host: inbound_host.clone(),
    };

    let front_end_scheme = if client_is_tls { "https" } else { "http" };
    let front_end_host = inbound_host
        .split(':')
        .next()
        .unwrap_or(&inbound_host)
        .to_string();

    tokio::spawn(async move {
        let exchange = ClientExchange {
            method: &method,
            destination: &destination,
            version: version_str,
            inbound_headers: &headers,
            client_wants_upgrade,
            client_wants_websocket,
            request_body_is_chunked,
            best_compression: best_compression.as_deref(),
            front_end_scheme,
            front_end_host: &front_end_host,
            front_end_port: identity.port,
            server_under_high_load,
        };

        let mut recorder = opts
            .snoop_dir
            .as_ref()
            .map(|dir| SnoopRecorder::new(dir, crate::snoop::next_request_id()));

        let _ = entry::proxy_request(
            &registry,
            origin,
            &mut sink,
            &exchange,
            Some(&mut body_reader),
            &trust,
            &opts,
            recorder.as_mut(),
        )
        .await;

        // Ensure the response channels are closed even if execute() bailed
        // out before ever calling write_head (shouldn't happen in practice —
        // every code path in bridge::execute either calls write_head or goes
        // through synthesize_failure — but a stuck waiter is worse than a
        // spurious 502 if a future change regresses that invariant).
        drop(sink);

        if let Some(rec) = recorder {
            if let Err(e) = rec.finish() {
                tracing::warn!(error = %e, "failed to write snoop dump");
            }
        }
    });

    let (status, out_headers) = match head_rx.await {
        Ok(v) => v,
        Err(_) => {
            return Ok(Response::builder()
                .status(StatusCode::BAD_GATEWAY)
                .body(empty_body())
                .unwrap());
        }
    };

    let mut builder = Response::builder().status(status);
    for (name, value) in out_headers.iter() {
        builder = builder.header(name, value);
    }
    let body = StreamBody::new(ChannelBody(body_rx));
    Ok(builder.body(BodyExt::boxed(body)).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_destination_fixed_mode() {
        let mode = DestinationMode::Fixed {
            scheme: "http".to_string(),
            host: "origin.internal".to_string(),
            port: 8080,
        };
        let uri = resolve_destination(&mode, "ignored", "/x?y=1").unwrap();
        assert_eq!(uri.to_string(), "http://origin.internal:8080/x?y=1");
    }

    #[test]
    fn resolve_destination_host_header_mode() {
        let mode = DestinationMode::HostHeader {
            scheme: "https".to_string(),
            port_override: None,
        };
        let uri = resolve_destination(&mode, "a.example", "/x").unwrap();
        assert_eq!(uri.to_string(), "https://a.example/x");
    }

    #[test]
    fn resolve_destination_host_header_with_port_override() {
        let mode = DestinationMode::HostHeader {
            scheme: "http".to_string(),
            port_override: Some(9000),
        };
        let uri = resolve_destination(&mode, "a.example:1234", "/x").unwrap();
        assert_eq!(uri.to_string(), "http://a.example:9000/x");
    }
}
