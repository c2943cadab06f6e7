//! Catalog domain types.
//!
//! These are the persisted entities of the member catalog: the service
//! directory, per-service attributes, replica-slot members, config file
//! revisions, static IP records, and block-device reservations. All are
//! JSON-serializable for the catalog stores and the wire protocol.
//!
//! Members are provisioned before any task runs, so ownership fields
//! start at sentinel values; a host asserts ownership later through a
//! conditional update (the claim).

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Ownership sentinel: member not yet claimed by any task.
pub const DEFAULT_TASK_ID: &str = "defaultTaskID";
/// Ownership sentinel: member not yet claimed by any container instance.
pub const DEFAULT_CONTAINER_INSTANCE_ID: &str = "defaultContainerInstanceID";
/// Ownership sentinel: member not yet claimed by any server instance.
pub const DEFAULT_SERVER_INSTANCE_ID: &str = "defaultServerInstanceID";
/// Placeholder for members of services that do not use a static IP.
pub const DEFAULT_HOST_IP: &str = "defaultHostIP";

/// Hex MD5 digest of a byte slice.
pub fn md5_hex(content: &[u8]) -> String {
    hex::encode(Md5::digest(content))
}

/// Nanosecond wall-clock timestamp for `last_modified` fields.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

// ── Service directory ─────────────────────────────────────────────

/// Directory entry mapping `(cluster, service_name)` to a stable UUID.
/// The UUID is the primary handle for every other entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Service {
    pub cluster: String,
    pub service_name: String,
    pub service_uuid: String,
}

impl Service {
    pub fn table_key(&self) -> String {
        service_key(&self.cluster, &self.service_name)
    }
}

/// Composite key for the service directory.
pub fn service_key(cluster: &str, service_name: &str) -> String {
    format!("{cluster}/{service_name}")
}

// ── Service attributes ────────────────────────────────────────────

/// Lifecycle status of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Creating,
    Initializing,
    Active,
    Deleting,
    Deleted,
}

/// Block-volume class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeType {
    /// General-purpose SSD.
    Gp,
    /// Provisioned-IOPS SSD.
    Io,
    /// Throughput-optimized/standard.
    Std,
}

/// Specification of one block volume class for a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceVolume {
    pub volume_type: VolumeType,
    pub size_gb: u64,
    /// Provisioned IOPS; ignored for non-Io types.
    pub iops: u64,
}

/// The volume classes of a service: a primary data volume and an
/// optional journal volume for write-ahead logs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceVolumes {
    /// Device name the primary volume attaches at (e.g. `/dev/xvdf`).
    pub primary_device_name: String,
    pub primary: ServiceVolume,
    pub journal_device_name: Option<String>,
    pub journal: Option<ServiceVolume>,
}

/// Per-service configuration, keyed by service UUID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceAttr {
    pub service_uuid: String,
    pub status: ServiceStatus,
    /// Nanosecond wall clock of the last mutation.
    pub last_modified: i64,
    /// Number of replica slots (members).
    pub replicas: u64,
    pub cluster: String,
    pub service_name: String,
    pub volumes: ServiceVolumes,
    pub register_dns: bool,
    pub domain_name: String,
    pub hosted_zone_id: String,
    pub require_static_ip: bool,
    /// Opaque payload owned by the management layer.
    pub user_attr: Vec<u8>,
}

impl ServiceAttr {
    /// Initial attributes for a newly created service.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service_uuid: String,
        replicas: u64,
        cluster: String,
        service_name: String,
        volumes: ServiceVolumes,
        register_dns: bool,
        domain_name: String,
        hosted_zone_id: String,
        require_static_ip: bool,
        user_attr: Vec<u8>,
    ) -> Self {
        Self {
            service_uuid,
            status: ServiceStatus::Creating,
            last_modified: now_nanos(),
            replicas,
            cluster,
            service_name,
            volumes,
            register_dns,
            domain_name,
            hosted_zone_id,
            require_static_ip,
            user_attr,
        }
    }

    /// Copy with a new status and fresh mtime, for a conditional update.
    pub fn with_status(&self, status: ServiceStatus) -> Self {
        Self {
            status,
            last_modified: now_nanos(),
            ..self.clone()
        }
    }

    /// Field equality used by conditional updates. `last_modified` is
    /// excluded: the caller's prior copy is stale by construction.
    pub fn same_except_mtime(&self, other: &ServiceAttr) -> bool {
        self.service_uuid == other.service_uuid
            && self.status == other.status
            && self.replicas == other.replicas
            && self.cluster == other.cluster
            && self.service_name == other.service_name
            && self.volumes == other.volumes
            && self.register_dns == other.register_dns
            && self.domain_name == other.domain_name
            && self.hosted_zone_id == other.hosted_zone_id
            && self.require_static_ip == other.require_static_ip
            && self.user_attr == other.user_attr
    }
}

// ── Service members ───────────────────────────────────────────────

/// Volume IDs and device names bound to one member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MemberVolumes {
    pub primary_volume_id: String,
    pub primary_device_name: String,
    pub journal_volume_id: Option<String>,
    pub journal_device_name: Option<String>,
}

/// Reference from a member to one config file revision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberConfig {
    pub file_name: String,
    pub file_id: String,
    pub file_md5: String,
}

/// One replica slot of a service. A record exists iff a volume was
/// provisioned for the slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceMember {
    pub service_uuid: String,
    pub member_index: i64,
    /// `<serviceName>-<index>`.
    pub member_name: String,
    pub availability_zone: String,
    pub task_id: String,
    pub container_instance_id: String,
    pub server_instance_id: String,
    pub last_modified: i64,
    pub volumes: MemberVolumes,
    /// Static IP bound to this slot, or [`DEFAULT_HOST_IP`].
    pub static_ip: String,
    pub configs: Vec<MemberConfig>,
}

impl ServiceMember {
    /// A freshly provisioned member with sentinel ownership.
    pub fn new(
        service_uuid: String,
        member_index: i64,
        member_name: String,
        availability_zone: String,
        volumes: MemberVolumes,
        static_ip: String,
        configs: Vec<MemberConfig>,
    ) -> Self {
        Self {
            service_uuid,
            member_index,
            member_name,
            availability_zone,
            task_id: DEFAULT_TASK_ID.to_string(),
            container_instance_id: DEFAULT_CONTAINER_INSTANCE_ID.to_string(),
            server_instance_id: DEFAULT_SERVER_INSTANCE_ID.to_string(),
            last_modified: now_nanos(),
            volumes,
            static_ip,
            configs,
        }
    }

    pub fn table_key(&self) -> String {
        member_key(&self.service_uuid, &self.member_name)
    }

    /// True while ownership still holds the provisioning sentinels.
    pub fn is_unclaimed(&self) -> bool {
        self.task_id == DEFAULT_TASK_ID
            && self.container_instance_id == DEFAULT_CONTAINER_INSTANCE_ID
            && self.server_instance_id == DEFAULT_SERVER_INSTANCE_ID
    }

    /// Copy with a new ownership triple and fresh mtime (the claim).
    pub fn with_owner(
        &self,
        task_id: &str,
        container_instance_id: &str,
        server_instance_id: &str,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            container_instance_id: container_instance_id.to_string(),
            server_instance_id: server_instance_id.to_string(),
            last_modified: now_nanos(),
            ..self.clone()
        }
    }

    /// Copy with a replaced config reference list and fresh mtime.
    pub fn with_configs(&self, configs: Vec<MemberConfig>) -> Self {
        Self {
            configs,
            last_modified: now_nanos(),
            ..self.clone()
        }
    }

    /// Field equality used by conditional updates, mtime excluded.
    pub fn same_except_mtime(&self, other: &ServiceMember) -> bool {
        self.service_uuid == other.service_uuid
            && self.member_index == other.member_index
            && self.member_name == other.member_name
            && self.availability_zone == other.availability_zone
            && self.task_id == other.task_id
            && self.container_instance_id == other.container_instance_id
            && self.server_instance_id == other.server_instance_id
            && self.volumes == other.volumes
            && self.static_ip == other.static_ip
            && self.configs == other.configs
    }
}

/// Composite key for the member table.
pub fn member_key(service_uuid: &str, member_name: &str) -> String {
    format!("{service_uuid}/{member_name}")
}

// ── Config files ──────────────────────────────────────────────────

/// One immutable config file revision. Updates write a new record with
/// a new `file_id`; the member's reference is swapped atomically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigFile {
    pub service_uuid: String,
    pub file_id: String,
    /// Hex MD5 of `content`; enforced on both write and read.
    pub file_md5: String,
    pub file_name: String,
    /// Unix permission bits for the materialized file.
    pub file_mode: u32,
    pub last_modified: i64,
    pub content: Vec<u8>,
}

impl ConfigFile {
    /// Build a revision, computing the checksum from the content.
    pub fn new(
        service_uuid: String,
        file_id: String,
        file_name: String,
        file_mode: u32,
        content: Vec<u8>,
    ) -> Self {
        let file_md5 = md5_hex(&content);
        Self {
            service_uuid,
            file_id,
            file_md5,
            file_name,
            file_mode,
            last_modified: now_nanos(),
            content,
        }
    }

    pub fn table_key(&self) -> String {
        config_file_key(&self.service_uuid, &self.file_id)
    }

    /// Verify `content` against the recorded checksum.
    pub fn verify(&self) -> Result<(), crate::CoreError> {
        let actual = md5_hex(&self.content);
        if actual != self.file_md5 {
            return Err(crate::CoreError::CorruptConfig(format!(
                "config file {} expects md5 {} got {}",
                self.file_id, self.file_md5, actual
            )));
        }
        Ok(())
    }

    /// Next revision of this file with new content and a new file id.
    pub fn next_revision(&self, new_file_id: String, content: Vec<u8>) -> Self {
        let file_md5 = md5_hex(&content);
        Self {
            file_id: new_file_id,
            file_md5,
            last_modified: now_nanos(),
            content,
            ..self.clone()
        }
    }
}

/// Composite key for the config-file table.
pub fn config_file_key(service_uuid: &str, file_id: &str) -> String {
    format!("{service_uuid}/{file_id}")
}

// ── Static IPs ────────────────────────────────────────────────────

/// Catalog record of a static IP owned by a service. The record tracks
/// which server instance currently holds the IP on which network
/// interface; re-homing happens at mount time via conditional update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceStaticIP {
    pub static_ip: String,
    pub service_uuid: String,
    pub availability_zone: String,
    pub server_instance_id: String,
    pub network_interface_id: String,
}

impl ServiceStaticIP {
    /// Copy re-homed onto another server instance and interface.
    pub fn with_owner(&self, server_instance_id: &str, network_interface_id: &str) -> Self {
        Self {
            server_instance_id: server_instance_id.to_string(),
            network_interface_id: network_interface_id.to_string(),
            ..self.clone()
        }
    }
}

// ── Device reservations ───────────────────────────────────────────

/// Reservation of a block-device name within a cluster, so two services
/// on the same host cannot claim the same device letter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub cluster: String,
    pub device_name: String,
    pub service_name: String,
}

impl Device {
    pub fn table_key(&self) -> String {
        device_key(&self.cluster, &self.device_name)
    }
}

/// Composite key for the device table.
pub fn device_key(cluster: &str, device_name: &str) -> String {
    format!("{cluster}/{device_name}")
}
