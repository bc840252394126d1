//! Gatekeeper - Entry point

use std::net::SocketAddr;
use std::sync::Arc;

use gatekeeper::blocklist::Blocklist;
use gatekeeper::config::Config;
use gatekeeper::downstream::Firewall;
use gatekeeper::error::GatekeeperError;
use gatekeeper::gatekeeper::Gatekeeper;
use gatekeeper::proxy::{ProxyClient, ProxyConfig};
use gatekeeper::recorder::ViolationRecorder;
use gatekeeper::scheduler::StatisticsScheduler;
use gatekeeper::server::Server;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = Config::from_env()?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| GatekeeperError::Config(format!("Invalid server address: {}", e)))?;

    let blocklist = Arc::new(Blocklist::new(config.blocklist.settings()));
    let (recorder, _worker) =
        ViolationRecorder::spawn(blocklist.clone(), config.blocklist.queue_capacity);

    let proxy_config = ProxyConfig::new(config.proxy.upstream_url.clone())
        .with_timeout(config.proxy.timeout)
        .with_preserve_host(config.proxy.preserve_host);
    let proxy = ProxyClient::new(proxy_config)?;
    let downstream = Firewall::with_methods(proxy, &config.firewall.allowed_methods);

    let gatekeeper = Arc::new(Gatekeeper::new(
        &config.routes,
        blocklist.clone(),
        recorder.clone(),
        Arc::new(downstream),
    ));

    let scheduler = StatisticsScheduler::spawn(blocklist, config.blocklist.flush_interval());

    let server = Server::bind(addr, gatekeeper).await?;
    server.run_until(shutdown_signal()).await?;

    scheduler.shutdown(&recorder).await;
    info!("Gatekeeper stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(%e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(%e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
