//! Entry Point (component J): acquires-or-creates a bridge, runs it, and
//! retries once on a fresh connection when the bridge signals a stale pool.

use crate::bridge::{self, UpstreamBridge};
use crate::frontend::{ClientExchange, ResponseSink};
use crate::options::{ProxyOptions, ProxyResult};
use crate::origin::Origin;
use crate::pool::{self, OriginPoolRegistry};
use crate::proxy_headers::TrustContext;
use crate::snoop::SnoopRecorder;
use tokio::io::AsyncRead;

/// Drive one client request to completion, retrying once on a fresh
/// connection if the pooled bridge turned out to be stale and no response
/// bytes have been committed yet.
pub async fn proxy_request<S: ResponseSink>(
    registry: &OriginPoolRegistry,
    origin: Origin,
    sink: &mut S,
    exchange: &ClientExchange<'_>,
    mut body_reader: Option<&mut (dyn AsyncRead + Unpin + Send)>,
    trust: &TrustContext,
    opts: &ProxyOptions,
    mut snoop: Option<&mut SnoopRecorder>,
) -> ProxyResult {
    metrics::gauge!("proxy_requests_in_flight").increment(1.0);

    loop {
        let (mut bridge, from_pool) = match registry.acquire(&origin).await {
            Some(b) => (b, true),
            None => (UpstreamBridge::unconnected(origin.clone()), false),
        };

        let result = bridge::execute(
            &mut bridge,
            sink,
            exchange,
            body_reader.as_deref_mut(),
            trust,
            opts,
            from_pool,
            snoop.as_deref_mut(),
        )
        .await;

        if from_pool && result.is_success() {
            metrics::counter!("proxy_pool_reuse_total").increment(1);
        }

        if result.is_reusable && registry.len(&origin).await < pool::CAPACITY {
            registry.release(origin.clone(), bridge).await;
        }
        // else: bridge is dropped here, disposing its socket (if any).

        if result.is_success() || !result.should_retry_on_new_connection {
            metrics::gauge!("proxy_requests_in_flight").decrement(1.0);
            return result;
        }

        metrics::counter!("proxy_pool_stale_retries_total").increment(1);
        // loop: retry on a freshly connected bridge. Safe only because a
        // request body is either absent or hasn't been read yet at the point
        // a stale-pool failure can occur (see bridge::execute's SendRequest
        // ordering — the header write happens, and fails, before any body
        // bytes are pulled from a stale connection).
    }
}
