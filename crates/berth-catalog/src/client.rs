//! Remote catalog client.
//!
//! [`Catalog`] implementation that forwards every call to a catalog
//! daemon over the length-prefixed RPC. Each call opens a connection,
//! sends one request frame, and reads one response frame; a deadline
//! (10 s by default) covers the whole exchange. The daemon answers
//! errors in-band as stable `Err` strings, so a lost conditional update
//! surfaces here as `VersionMismatch`, exactly as with a local store.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use berth_core::{
    ConfigFile, CoreError, CoreResult, Device, Service, ServiceAttr, ServiceMember,
    ServiceStaticIP,
};

use crate::catalog::Catalog;
use crate::wire::{self, CatalogRequest, CatalogResponse};

/// Default per-call deadline for catalog RPCs.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for a networked catalog daemon.
pub struct RemoteCatalog {
    addr: String,
    call_timeout: Duration,
}

impl RemoteCatalog {
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(addr: &str, call_timeout: Duration) -> Self {
        Self {
            addr: addr.to_string(),
            call_timeout,
        }
    }

    /// One request/response exchange under the call deadline.
    async fn call(&self, request: CatalogRequest) -> CoreResult<CatalogResponse> {
        let exchange = async {
            let mut stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|e| CoreError::DbError(format!("connect {}: {e}", self.addr)))?;
            wire::write_frame(&mut stream, &request).await?;
            match wire::read_frame::<_, CatalogResponse>(&mut stream).await? {
                Some(CatalogResponse::Error(err)) => Err(CoreError::from_err_string(&err)),
                Some(response) => Ok(response),
                None => Err(CoreError::DbError(
                    "catalog daemon closed the connection mid-call".to_string(),
                )),
            }
        };
        match tokio::time::timeout(self.call_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!(addr = %self.addr, "catalog call deadline exceeded");
                Err(CoreError::Timeout(format!(
                    "catalog call to {} exceeded {:?}",
                    self.addr, self.call_timeout
                )))
            }
        }
    }

    async fn call_unit(&self, request: CatalogRequest) -> CoreResult<()> {
        match self.call(request).await? {
            CatalogResponse::Unit => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Liveness probe against the daemon.
    pub async fn ping(&self) -> CoreResult<()> {
        self.call_unit(CatalogRequest::Ping).await
    }
}

fn unexpected(resp: &CatalogResponse) -> CoreError {
    CoreError::DbError(format!("unexpected catalog response {resp:?}"))
}

#[async_trait]
impl Catalog for RemoteCatalog {
    async fn create_device(&self, device: &Device) -> CoreResult<()> {
        self.call_unit(CatalogRequest::CreateDevice {
            device: device.clone(),
        })
        .await
    }

    async fn get_device(&self, cluster: &str, device_name: &str) -> CoreResult<Device> {
        match self
            .call(CatalogRequest::GetDevice {
                cluster: cluster.to_string(),
                device_name: device_name.to_string(),
            })
            .await?
        {
            CatalogResponse::Device(d) => Ok(d),
            other => Err(unexpected(&other)),
        }
    }

    async fn delete_device(&self, cluster: &str, device_name: &str) -> CoreResult<()> {
        self.call_unit(CatalogRequest::DeleteDevice {
            cluster: cluster.to_string(),
            device_name: device_name.to_string(),
        })
        .await
    }

    async fn create_service(&self, service: &Service) -> CoreResult<()> {
        self.call_unit(CatalogRequest::CreateService {
            service: service.clone(),
        })
        .await
    }

    async fn get_service(&self, cluster: &str, service_name: &str) -> CoreResult<Service> {
        match self
            .call(CatalogRequest::GetService {
                cluster: cluster.to_string(),
                service_name: service_name.to_string(),
            })
            .await?
        {
            CatalogResponse::Service(s) => Ok(s),
            other => Err(unexpected(&other)),
        }
    }

    async fn list_services(&self) -> CoreResult<Vec<Service>> {
        match self.call(CatalogRequest::ListServices).await? {
            CatalogResponse::Services(s) => Ok(s),
            other => Err(unexpected(&other)),
        }
    }

    async fn delete_service(&self, cluster: &str, service_name: &str) -> CoreResult<()> {
        self.call_unit(CatalogRequest::DeleteService {
            cluster: cluster.to_string(),
            service_name: service_name.to_string(),
        })
        .await
    }

    async fn create_service_attr(&self, attr: &ServiceAttr) -> CoreResult<()> {
        self.call_unit(CatalogRequest::CreateServiceAttr {
            attr: Box::new(attr.clone()),
        })
        .await
    }

    async fn get_service_attr(&self, service_uuid: &str) -> CoreResult<ServiceAttr> {
        match self
            .call(CatalogRequest::GetServiceAttr {
                service_uuid: service_uuid.to_string(),
            })
            .await?
        {
            CatalogResponse::ServiceAttr(attr) => Ok(*attr),
            other => Err(unexpected(&other)),
        }
    }

    async fn update_service_attr(&self, prior: &ServiceAttr, new: &ServiceAttr) -> CoreResult<()> {
        self.call_unit(CatalogRequest::UpdateServiceAttr {
            prior: Box::new(prior.clone()),
            new: Box::new(new.clone()),
        })
        .await
    }

    async fn delete_service_attr(&self, service_uuid: &str) -> CoreResult<()> {
        self.call_unit(CatalogRequest::DeleteServiceAttr {
            service_uuid: service_uuid.to_string(),
        })
        .await
    }

    async fn create_service_member(&self, member: &ServiceMember) -> CoreResult<()> {
        self.call_unit(CatalogRequest::CreateServiceMember {
            member: Box::new(member.clone()),
        })
        .await
    }

    async fn get_service_member(
        &self,
        service_uuid: &str,
        member_name: &str,
    ) -> CoreResult<ServiceMember> {
        match self
            .call(CatalogRequest::GetServiceMember {
                service_uuid: service_uuid.to_string(),
                member_name: member_name.to_string(),
            })
            .await?
        {
            CatalogResponse::ServiceMember(m) => Ok(*m),
            other => Err(unexpected(&other)),
        }
    }

    async fn update_service_member(
        &self,
        prior: &ServiceMember,
        new: &ServiceMember,
    ) -> CoreResult<()> {
        self.call_unit(CatalogRequest::UpdateServiceMember {
            prior: Box::new(prior.clone()),
            new: Box::new(new.clone()),
        })
        .await
    }

    async fn delete_service_member(
        &self,
        service_uuid: &str,
        member_name: &str,
    ) -> CoreResult<()> {
        self.call_unit(CatalogRequest::DeleteServiceMember {
            service_uuid: service_uuid.to_string(),
            member_name: member_name.to_string(),
        })
        .await
    }

    async fn list_service_members(&self, service_uuid: &str) -> CoreResult<Vec<ServiceMember>> {
        match self
            .call(CatalogRequest::ListServiceMembers {
                service_uuid: service_uuid.to_string(),
            })
            .await?
        {
            CatalogResponse::ServiceMembers(m) => Ok(m),
            other => Err(unexpected(&other)),
        }
    }

    async fn create_config_file(&self, file: &ConfigFile) -> CoreResult<()> {
        self.call_unit(CatalogRequest::CreateConfigFile {
            file: Box::new(file.clone()),
        })
        .await
    }

    async fn get_config_file(&self, service_uuid: &str, file_id: &str) -> CoreResult<ConfigFile> {
        match self
            .call(CatalogRequest::GetConfigFile {
                service_uuid: service_uuid.to_string(),
                file_id: file_id.to_string(),
            })
            .await?
        {
            CatalogResponse::ConfigFile(f) => {
                // The daemon verified the checksum; verify again here so
                // a corrupted frame cannot slip through.
                f.verify()?;
                Ok(*f)
            }
            other => Err(unexpected(&other)),
        }
    }

    async fn delete_config_file(&self, service_uuid: &str, file_id: &str) -> CoreResult<()> {
        self.call_unit(CatalogRequest::DeleteConfigFile {
            service_uuid: service_uuid.to_string(),
            file_id: file_id.to_string(),
        })
        .await
    }

    async fn create_service_static_ip(&self, ip: &ServiceStaticIP) -> CoreResult<()> {
        self.call_unit(CatalogRequest::CreateServiceStaticIp { ip: ip.clone() })
            .await
    }

    async fn get_service_static_ip(&self, static_ip: &str) -> CoreResult<ServiceStaticIP> {
        match self
            .call(CatalogRequest::GetServiceStaticIp {
                static_ip: static_ip.to_string(),
            })
            .await?
        {
            CatalogResponse::ServiceStaticIp(ip) => Ok(ip),
            other => Err(unexpected(&other)),
        }
    }

    async fn update_service_static_ip(
        &self,
        prior: &ServiceStaticIP,
        new: &ServiceStaticIP,
    ) -> CoreResult<()> {
        self.call_unit(CatalogRequest::UpdateServiceStaticIp {
            prior: prior.clone(),
            new: new.clone(),
        })
        .await
    }

    async fn delete_service_static_ip(&self, static_ip: &str) -> CoreResult<()> {
        self.call_unit(CatalogRequest::DeleteServiceStaticIp {
            static_ip: static_ip.to_string(),
        })
        .await
    }
}
