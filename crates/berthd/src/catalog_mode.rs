//! Catalog mode — runs the single-writer catalog daemon.

use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use berth_catalog::{CatalogServer, RedbCatalog};

pub async fn run_catalog(listen: &str, data_dir: &Path) -> anyhow::Result<()> {
    info!("berth daemon starting in catalog mode");
    std::fs::create_dir_all(data_dir)?;

    let db_path = data_dir.join("catalog.redb");
    let catalog = RedbCatalog::open(&db_path)?;
    info!(path = ?db_path, "catalog database opened");

    let listener = TcpListener::bind(listen).await?;
    info!(%listen, "catalog daemon listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let server = CatalogServer::new(Arc::new(catalog));
    server.serve(listener, shutdown_rx).await?;

    info!("catalog daemon stopped");
    Ok(())
}
