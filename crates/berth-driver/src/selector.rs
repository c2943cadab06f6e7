//! Member selection.
//!
//! Given a mount request on this host, choose which member of the
//! service to claim. The policy, in order:
//!
//! 1. A member already owned by this host wins outright; driver and
//!    container restarts land back on the same slot.
//! 2. Otherwise only members in this host's availability zone are
//!    candidates (the block volume cannot cross zones), and only if
//!    their recorded task is the sentinel or no longer in the
//!    runtime's live-task list; a live owner is never robbed.
//! 3. Ties break to the smallest member index.

use berth_catalog::Catalog;
use berth_core::{CoreError, CoreResult, ServiceAttr, ServiceMember, DEFAULT_TASK_ID};
use berth_infra::ContainerSvc;
use tracing::debug;

/// Identity of the host running the driver.
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub server_instance_id: String,
    pub container_instance_id: String,
    pub availability_zone: String,
}

/// Pick the member this host should claim, or fail with
/// `NoEligibleMember`.
pub async fn select_member(
    catalog: &dyn Catalog,
    containersvc: &dyn ContainerSvc,
    attr: &ServiceAttr,
    host: &HostInfo,
    requuid: &str,
) -> CoreResult<ServiceMember> {
    let mut members = catalog.list_service_members(&attr.service_uuid).await?;
    members.sort_by_key(|m| m.member_index);

    // Rule 1: the member this host already owns.
    if let Some(owned) = members.iter().find(|m| {
        m.server_instance_id == host.server_instance_id
            && m.container_instance_id == host.container_instance_id
    }) {
        debug!(%requuid, member = %owned.member_name, "reusing member owned by this host");
        return Ok(owned.clone());
    }

    // Rule 2: zonal, and the recorded task must be sentinel or dead.
    let live_tasks = containersvc
        .list_active_service_tasks(&attr.cluster, &attr.service_name)
        .await?;

    let eligible = members.iter().find(|m| {
        m.availability_zone == host.availability_zone
            && (m.task_id == DEFAULT_TASK_ID || !live_tasks.contains(&m.task_id))
    });

    match eligible {
        Some(member) => {
            debug!(%requuid, member = %member.member_name, "selected idle member");
            Ok(member.clone())
        }
        None => Err(CoreError::NoEligibleMember(format!(
            "service {} has no idle member in zone {}",
            attr.service_uuid, host.availability_zone
        ))),
    }
}
