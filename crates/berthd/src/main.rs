//! berthd — the berth daemon.
//!
//! Single binary with two modes:
//!
//! - **driver** — the node-local volume driver: serves the container
//!   runtime's volume-plugin endpoint, backed by either a remote
//!   catalog daemon or an embedded single-node catalog
//! - **catalog** — the catalog daemon: a single-writer server over the
//!   persistent member catalog
//!
//! # Usage
//!
//! ```text
//! berthd catalog --listen 0.0.0.0:27040 --data-dir /var/lib/berth
//! berthd driver --catalog-addr 10.0.0.5:27040 --port 27041 --mount-root /mnt/berth
//! berthd driver --data-dir /var/lib/berth --port 27041
//! ```

mod catalog_mode;
mod driver_mode;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "berthd", about = "berth daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the volume driver and its plugin HTTP endpoint.
    Driver {
        /// Port the plugin endpoint listens on.
        #[arg(long, default_value = "27041")]
        port: u16,

        /// Address of the catalog daemon (host:port). Mutually
        /// exclusive with --data-dir.
        #[arg(long)]
        catalog_addr: Option<String>,

        /// Data directory for an embedded single-node catalog, used
        /// when no --catalog-addr is given.
        #[arg(long, default_value = "/var/lib/berth")]
        data_dir: PathBuf,

        /// Root directory mount paths are derived under.
        #[arg(long, default_value = "/mnt/berth")]
        mount_root: PathBuf,

        /// Network interface static IPs are assigned on.
        #[arg(long, default_value = "eth0")]
        ifname: String,

        /// This host's server instance ID.
        #[arg(long, default_value = "local-instance")]
        instance_id: String,

        /// This host's availability zone.
        #[arg(long, default_value = "local-az")]
        availability_zone: String,

        /// This host's primary private IP.
        #[arg(long, default_value = "127.0.0.1")]
        private_ip: String,

        /// Mount operation timeout in seconds.
        #[arg(long, default_value = "120")]
        mount_timeout: u64,

        /// Unmount operation timeout in seconds.
        #[arg(long, default_value = "60")]
        unmount_timeout: u64,
    },

    /// Run the catalog daemon.
    Catalog {
        /// Address to listen on.
        #[arg(long, default_value = "0.0.0.0:27040")]
        listen: String,

        /// Data directory for the catalog database.
        #[arg(long, default_value = "/var/lib/berth")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,berthd=debug,berth=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Driver {
            port,
            catalog_addr,
            data_dir,
            mount_root,
            ifname,
            instance_id,
            availability_zone,
            private_ip,
            mount_timeout,
            unmount_timeout,
        } => {
            driver_mode::run_driver(driver_mode::DriverModeConfig {
                port,
                catalog_addr,
                data_dir,
                mount_root,
                ifname,
                instance_id,
                availability_zone,
                private_ip,
                mount_timeout,
                unmount_timeout,
            })
            .await
        }
        Command::Catalog { listen, data_dir } => {
            catalog_mode::run_catalog(&listen, &data_dir).await
        }
    }
}
