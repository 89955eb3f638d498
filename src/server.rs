use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::observability::{CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL};
use crate::tenant::TenantManager;
use crate::wire;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Accept loop with a connection cap and graceful drain.
pub struct Server {
    listener: TcpListener,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
    max_connections: usize,
}

impl Server {
    pub fn new(
        listener: TcpListener,
        tenant_manager: Arc<TenantManager>,
        password: String,
        tls: Option<TlsAcceptor>,
        max_connections: usize,
    ) -> Self {
        Self {
            listener,
            tenant_manager,
            password,
            tls,
            max_connections: max_connections.max(1),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` resolves, then wait up to ten seconds for open
    /// connections to finish.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (socket, peer) = match result {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                        warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    };

                    info!("connection from {peer}");
                    metrics::counter!(CONNECTIONS_TOTAL).increment(1);
                    metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
                    let tm = self.tenant_manager.clone();
                    let pw = self.password.clone();
                    let tls = self.tls.clone();

                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = wire::process_connection(socket, tm, pw, tls).await {
                            error!("connection error from {peer}: {e}");
                        }
                        metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
                    });
                }
                _ = &mut shutdown => {
                    info!("shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }

        self.drain(&semaphore).await;
    }

    async fn drain(&self, semaphore: &Semaphore) {
        info!("draining connections...");
        let deadline = tokio::time::sleep(DRAIN_TIMEOUT);
        tokio::pin!(deadline);

        loop {
            if semaphore.available_permits() == self.max_connections {
                info!("all connections drained");
                return;
            }
            tokio::select! {
                _ = &mut deadline => {
                    let remaining = self.max_connections - semaphore.available_permits();
                    warn!("drain timeout, {remaining} connections still open");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
