use crate::config::GatewayConfig;
use crate::server;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    pub listen: String,
    pub admin_listen: String,
}

/// Proxy lifecycle: init tracing → load config → build state → start
/// servers → wait for shutdown → drain (§4.L).
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    let mut config = GatewayConfig::load(&args.config_path)?;
    config.server.listen = args.listen.clone();
    config.server.admin_listen = args.admin_listen.clone();

    let listen_port: std::net::SocketAddr = config.server.listen.parse()?;
    let state = server::GatewayState::new(config, listen_port.port())?;

    let shutdown = Arc::new(Notify::new());

    tracing::info!("server: starting admin listener, addr={}", args.admin_listen);
    let admin_handle = tokio::spawn({
        let admin_listen = args.admin_listen.clone();
        let state = state.clone();
        async move {
            if let Err(e) = server::run_admin_server(&admin_listen, state).await {
                tracing::error!("server: admin task error: {}", e);
            }
        }
    });

    tracing::info!("server: starting proxy listener, addr={}", args.listen);
    let proxy_handle = tokio::spawn({
        let listen = args.listen.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_proxy_server(&listen, state, shutdown).await }
    });

    wait_for_shutdown(&shutdown).await;

    if let Err(e) = proxy_handle.await {
        tracing::error!("server: proxy task error: {}", e);
    }
    admin_handle.abort();

    state.shutdown().await;
    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    // Signal all background loops to stop.
    shutdown.notify_waiters();
}
