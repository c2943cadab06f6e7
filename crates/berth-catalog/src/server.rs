//! Catalog daemon server.
//!
//! Accept loop for the length-prefixed catalog RPC: one tokio task per
//! connection, each connection carrying any number of sequential
//! request/response frames. The server wraps an inner [`Catalog`]
//! (the redb store in production); since all mutations funnel through
//! that store's write transactions, conditional updates from many
//! connections resolve to a single winner.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use berth_core::CoreResult;

use crate::catalog::Catalog;
use crate::wire::{self, CatalogRequest, CatalogResponse};

/// The catalog RPC server.
pub struct CatalogServer {
    catalog: Arc<dyn Catalog>,
}

impl CatalogServer {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Serve connections until the shutdown signal flips.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> CoreResult<()> {
        info!(addr = ?listener.local_addr().ok(), "catalog server listening");
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let catalog = self.catalog.clone();
                    tokio::spawn(async move {
                        debug!(%peer, "catalog connection opened");
                        handle_connection(stream, catalog).await;
                        debug!(%peer, "catalog connection closed");
                    });
                }
                _ = shutdown.changed() => {
                    info!("catalog server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

/// Sequential request/response loop for one connection. A malformed
/// frame closes the connection; catalog errors are answered in-band.
async fn handle_connection(mut stream: TcpStream, catalog: Arc<dyn Catalog>) {
    loop {
        let request: CatalogRequest = match wire::read_frame(&mut stream).await {
            Ok(Some(req)) => req,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "bad catalog frame");
                return;
            }
        };
        let response = dispatch(catalog.as_ref(), request).await;
        if let Err(e) = wire::write_frame(&mut stream, &response).await {
            warn!(error = %e, "catalog response write failed");
            return;
        }
    }
}

/// Execute one request against the catalog.
async fn dispatch(catalog: &dyn Catalog, request: CatalogRequest) -> CatalogResponse {
    use CatalogRequest::*;

    let result = match request {
        Ping => Ok(CatalogResponse::Unit),

        CreateDevice { device } => catalog
            .create_device(&device)
            .await
            .map(|_| CatalogResponse::Unit),
        GetDevice {
            cluster,
            device_name,
        } => catalog
            .get_device(&cluster, &device_name)
            .await
            .map(CatalogResponse::Device),
        DeleteDevice {
            cluster,
            device_name,
        } => catalog
            .delete_device(&cluster, &device_name)
            .await
            .map(|_| CatalogResponse::Unit),

        CreateService { service } => catalog
            .create_service(&service)
            .await
            .map(|_| CatalogResponse::Unit),
        GetService {
            cluster,
            service_name,
        } => catalog
            .get_service(&cluster, &service_name)
            .await
            .map(CatalogResponse::Service),
        ListServices => catalog.list_services().await.map(CatalogResponse::Services),
        DeleteService {
            cluster,
            service_name,
        } => catalog
            .delete_service(&cluster, &service_name)
            .await
            .map(|_| CatalogResponse::Unit),

        CreateServiceAttr { attr } => catalog
            .create_service_attr(&attr)
            .await
            .map(|_| CatalogResponse::Unit),
        GetServiceAttr { service_uuid } => catalog
            .get_service_attr(&service_uuid)
            .await
            .map(|attr| CatalogResponse::ServiceAttr(Box::new(attr))),
        UpdateServiceAttr { prior, new } => catalog
            .update_service_attr(&prior, &new)
            .await
            .map(|_| CatalogResponse::Unit),
        DeleteServiceAttr { service_uuid } => catalog
            .delete_service_attr(&service_uuid)
            .await
            .map(|_| CatalogResponse::Unit),

        CreateServiceMember { member } => catalog
            .create_service_member(&member)
            .await
            .map(|_| CatalogResponse::Unit),
        GetServiceMember {
            service_uuid,
            member_name,
        } => catalog
            .get_service_member(&service_uuid, &member_name)
            .await
            .map(|m| CatalogResponse::ServiceMember(Box::new(m))),
        UpdateServiceMember { prior, new } => catalog
            .update_service_member(&prior, &new)
            .await
            .map(|_| CatalogResponse::Unit),
        DeleteServiceMember {
            service_uuid,
            member_name,
        } => catalog
            .delete_service_member(&service_uuid, &member_name)
            .await
            .map(|_| CatalogResponse::Unit),
        ListServiceMembers { service_uuid } => catalog
            .list_service_members(&service_uuid)
            .await
            .map(CatalogResponse::ServiceMembers),

        CreateConfigFile { file } => catalog
            .create_config_file(&file)
            .await
            .map(|_| CatalogResponse::Unit),
        GetConfigFile {
            service_uuid,
            file_id,
        } => catalog
            .get_config_file(&service_uuid, &file_id)
            .await
            .map(|f| CatalogResponse::ConfigFile(Box::new(f))),
        DeleteConfigFile {
            service_uuid,
            file_id,
        } => catalog
            .delete_config_file(&service_uuid, &file_id)
            .await
            .map(|_| CatalogResponse::Unit),

        CreateServiceStaticIp { ip } => catalog
            .create_service_static_ip(&ip)
            .await
            .map(|_| CatalogResponse::Unit),
        GetServiceStaticIp { static_ip } => catalog
            .get_service_static_ip(&static_ip)
            .await
            .map(CatalogResponse::ServiceStaticIp),
        UpdateServiceStaticIp { prior, new } => catalog
            .update_service_static_ip(&prior, &new)
            .await
            .map(|_| CatalogResponse::Unit),
        DeleteServiceStaticIp { static_ip } => catalog
            .delete_service_static_ip(&static_ip)
            .await
            .map(|_| CatalogResponse::Unit),
    };

    result.unwrap_or_else(|e| CatalogResponse::from_err(&e))
}
