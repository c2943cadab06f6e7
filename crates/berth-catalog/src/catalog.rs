//! The catalog contract.

use async_trait::async_trait;
use berth_core::{
    ConfigFile, CoreResult, Device, Service, ServiceAttr, ServiceMember, ServiceStaticIP,
};

/// Strongly-consistent CRUD over the catalog entities.
///
/// Semantics shared by every implementation:
///
/// - `create_*` fails with `AlreadyExists` when the key is present.
/// - `get_*` fails with `NotFound` when the key is absent.
/// - `update_*(prior, new)` fails with `VersionMismatch` when the
///   stored record differs from `prior` (all fields except
///   `last_modified` are compared), `NotFound` when absent, and
///   `InvalidArgs` when `prior` and `new` disagree on the key. The
///   compare and the write are atomic.
/// - `delete_*` fails with `NotFound` when the key is absent; callers
///   that want idempotent teardown ignore that error.
/// - List order is unspecified; callers sort when they need an order.
#[async_trait]
pub trait Catalog: Send + Sync {
    // ── Device reservations ───────────────────────────────────────
    async fn create_device(&self, device: &Device) -> CoreResult<()>;
    async fn get_device(&self, cluster: &str, device_name: &str) -> CoreResult<Device>;
    async fn delete_device(&self, cluster: &str, device_name: &str) -> CoreResult<()>;

    // ── Service directory ─────────────────────────────────────────
    async fn create_service(&self, service: &Service) -> CoreResult<()>;
    async fn get_service(&self, cluster: &str, service_name: &str) -> CoreResult<Service>;
    async fn list_services(&self) -> CoreResult<Vec<Service>>;
    async fn delete_service(&self, cluster: &str, service_name: &str) -> CoreResult<()>;

    // ── Service attributes ────────────────────────────────────────
    async fn create_service_attr(&self, attr: &ServiceAttr) -> CoreResult<()>;
    async fn get_service_attr(&self, service_uuid: &str) -> CoreResult<ServiceAttr>;
    async fn update_service_attr(&self, prior: &ServiceAttr, new: &ServiceAttr) -> CoreResult<()>;
    async fn delete_service_attr(&self, service_uuid: &str) -> CoreResult<()>;

    // ── Service members ───────────────────────────────────────────
    async fn create_service_member(&self, member: &ServiceMember) -> CoreResult<()>;
    async fn get_service_member(
        &self,
        service_uuid: &str,
        member_name: &str,
    ) -> CoreResult<ServiceMember>;
    async fn update_service_member(
        &self,
        prior: &ServiceMember,
        new: &ServiceMember,
    ) -> CoreResult<()>;
    async fn delete_service_member(&self, service_uuid: &str, member_name: &str)
        -> CoreResult<()>;
    async fn list_service_members(&self, service_uuid: &str) -> CoreResult<Vec<ServiceMember>>;

    // ── Config files ──────────────────────────────────────────────
    async fn create_config_file(&self, file: &ConfigFile) -> CoreResult<()>;
    async fn get_config_file(&self, service_uuid: &str, file_id: &str) -> CoreResult<ConfigFile>;
    async fn delete_config_file(&self, service_uuid: &str, file_id: &str) -> CoreResult<()>;

    // ── Static IPs ────────────────────────────────────────────────
    async fn create_service_static_ip(&self, ip: &ServiceStaticIP) -> CoreResult<()>;
    async fn get_service_static_ip(&self, static_ip: &str) -> CoreResult<ServiceStaticIP>;
    async fn update_service_static_ip(
        &self,
        prior: &ServiceStaticIP,
        new: &ServiceStaticIP,
    ) -> CoreResult<()>;
    async fn delete_service_static_ip(&self, static_ip: &str) -> CoreResult<()>;
}
