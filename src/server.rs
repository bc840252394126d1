//! TCP server with connection handling
//!
//! Responsibilities:
//! - Accept TCP connections
//! - HTTP/1.1 parsing via hyper
//! - Spawn per-connection tasks
//! - Gatekeeper execution
//! - Graceful shutdown support

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::error::{GatekeeperError, Result};
use crate::gatekeeper::Gatekeeper;

/// Main server struct wrapping the gatekeeper
pub struct Server {
    listener: TcpListener,
    addr: SocketAddr,
    gatekeeper: Arc<Gatekeeper>,
}

impl Server {
    pub async fn bind(addr: SocketAddr, gatekeeper: Arc<Gatekeeper>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatekeeperError::Bind { addr, source: e })?;

        let actual_addr = listener
            .local_addr()
            .map_err(|e| GatekeeperError::Config(format!("Failed to get local address: {}", e)))?;

        info!(%actual_addr, "Server bound successfully");

        Ok(Self {
            listener,
            addr: actual_addr,
            gatekeeper,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serves until the process exits.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Serves until `shutdown` resolves. Connections already accepted keep
    /// running on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(addr = %self.addr, "Starting server");
        tokio::pin!(shutdown);

        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!(addr = %self.addr, "Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(%e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            let io = TokioIo::new(stream);
            let gatekeeper = self.gatekeeper.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let gatekeeper = gatekeeper.clone();
                    async move { Ok::<_, Infallible>(gatekeeper.handle(req, remote_addr).await) }
                });
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(%remote_addr, %e, "Connection error");
                }
            });
        }
    }
}
