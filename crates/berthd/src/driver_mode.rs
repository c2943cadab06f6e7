//! Driver mode — runs the volume driver behind the plugin endpoint.
//!
//! The catalog backend is either a remote catalog daemon
//! (`--catalog-addr`) or an embedded single-node store under
//! `--data-dir`. The cloud, DNS, and container-runtime adapters are
//! wired with the built-in local implementations; a production deploy
//! substitutes provider-backed implementations of the same traits at
//! this seam.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use berth_catalog::{Catalog, RedbCatalog, RemoteCatalog};
use berth_driver::{DriverConfig, SysFsOps, VolumeDriver};
use berth_infra::{IpManager, LoopCloudServer, MemContainerSvc, MemDns};

pub struct DriverModeConfig {
    pub port: u16,
    pub catalog_addr: Option<String>,
    pub data_dir: PathBuf,
    pub mount_root: PathBuf,
    pub ifname: String,
    pub instance_id: String,
    pub availability_zone: String,
    pub private_ip: String,
    pub mount_timeout: u64,
    pub unmount_timeout: u64,
}

pub async fn run_driver(config: DriverModeConfig) -> anyhow::Result<()> {
    info!("berth daemon starting in driver mode");
    std::fs::create_dir_all(&config.mount_root)?;

    // ── Catalog backend ──────────────────────────────────────────
    let catalog: Arc<dyn Catalog> = match &config.catalog_addr {
        Some(addr) => {
            let remote = RemoteCatalog::new(addr);
            remote.ping().await?;
            info!(%addr, "connected to catalog daemon");
            Arc::new(remote)
        }
        None => {
            std::fs::create_dir_all(&config.data_dir)?;
            let db_path = config.data_dir.join("catalog.redb");
            let store = RedbCatalog::open(&db_path)?;
            info!(path = ?db_path, "embedded catalog opened");
            Arc::new(store)
        }
    };

    // ── Host adapters ────────────────────────────────────────────
    let cloud = Arc::new(LoopCloudServer::new(
        &config.instance_id,
        &config.availability_zone,
        &config.private_ip,
    ));
    let dns = Arc::new(MemDns::new());
    let containersvc = Arc::new(MemContainerSvc::new(&config.instance_id));
    info!(
        instance_id = %config.instance_id,
        az = %config.availability_zone,
        "host adapters initialized"
    );

    // ── Volume driver ────────────────────────────────────────────
    let driver_config = DriverConfig {
        mount_root: config.mount_root.clone(),
        ifname: config.ifname.clone(),
        mount_timeout: Duration::from_secs(config.mount_timeout),
        unmount_timeout: Duration::from_secs(config.unmount_timeout),
        ..DriverConfig::default()
    };
    let driver = Arc::new(VolumeDriver::new(
        catalog,
        cloud,
        dns,
        containersvc,
        Arc::new(SysFsOps),
        IpManager::system(),
        driver_config,
    ));
    info!(mount_root = ?config.mount_root, "volume driver initialized");

    // ── Plugin endpoint ──────────────────────────────────────────
    let router = berth_api::build_router(driver);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "plugin endpoint starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
        })
        .await?;

    info!("berth daemon stopped");
    Ok(())
}
