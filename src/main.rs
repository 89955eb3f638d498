use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use petsched::config::ServerConfig;
use petsched::server::{self, Server};
use petsched::tenant::TenantManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env()?;
    petsched::observability::init(config.metrics_port);
    let tls_acceptor = petsched::tls::load_tls_acceptor(config.tls.as_ref())?;

    std::fs::create_dir_all(&config.data_dir)?;
    let tenant_manager = Arc::new(TenantManager::new(config.data_dir.clone(), config.compact_threshold));

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("petsched listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {}", config.max_connections);
    info!("  compact_threshold: {}", config.compact_threshold);
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    Server::new(listener, tenant_manager, config.password, tls_acceptor, config.max_connections)
        .run(server::shutdown_signal())
        .await;

    info!("petsched stopped");
    Ok(())
}
