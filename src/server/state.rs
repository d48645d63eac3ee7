use crate::config::GatewayConfig;
use crate::frontend::hyper_adapter::FrontEndIdentity;
use crate::metrics::Metrics;
use crate::pool::OriginPoolRegistry;
use anyhow::Result;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Shared process state, cheaply cloneable: the connection pool, metrics
/// handle, loaded config and the derived `ProxyOptions` both the proxy and
/// admin servers hand down to every request.
///
/// Config and the `ProxyOptions` it produces are loaded once at startup;
/// there is no hot-reload (§6.5). `config` is still held behind an
/// `ArcSwap` so the admin server can report the loaded values without
/// taking a lock.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<ArcSwap<GatewayConfig>>,
    pub metrics: Metrics,
    pub pool: Arc<OriginPoolRegistry>,
    pub options: Arc<crate::options::ProxyOptions>,
    pub identity: Arc<FrontEndIdentity>,
    /// Live count of accepted-but-not-yet-closed front-end connections,
    /// maintained by `run_proxy_server`'s accept loop. Compared against
    /// `server.high_load_connection_threshold` to derive `ServerIsUnderHighLoad`
    /// (§4.H Analyze/Finalize).
    pub active_conns: Arc<AtomicI64>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, listen_port: u16) -> Result<Self> {
        let options = Arc::new(config.proxy_options()?);

        Ok(Self {
            config: Arc::new(ArcSwap::new(Arc::new(config))),
            metrics: Metrics::install(),
            pool: Arc::new(OriginPoolRegistry::new()),
            options,
            identity: Arc::new(FrontEndIdentity { port: listen_port }),
            active_conns: Arc::new(AtomicI64::new(0)),
        })
    }

    /// Whether the server is currently under high load, per the configured
    /// active-connection threshold.
    pub fn server_under_high_load(&self) -> bool {
        let threshold = self.config.load().server.high_load_connection_threshold as i64;
        self.active_conns.load(Ordering::Relaxed) >= threshold
    }

    /// Drain all pooled bridges, disposing their sockets. Called on shutdown.
    pub async fn shutdown(&self) {
        self.pool.drain_all().await;
    }
}
