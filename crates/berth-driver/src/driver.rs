//! The volume driver state machine.
//!
//! Implements the container runtime's volume contract: Create, Remove,
//! Get, Path, List, and the Mount/Unmount pair that does the real work.
//! Per path key the driver keeps an in-memory entry with a refcount;
//! mount and unmount calls on the same key are serialized by a per-key
//! async mutex, while different keys proceed independently. Cross-host
//! races are resolved by the catalog: only one host wins the
//! conditional update that claims a member.
//!
//! A mount that fails after the claim rolls back its host-local side
//! effects (kernel mount, volume attachments, assigned IP) but never
//! reverts the claim: ownership stays with this host so the runtime's
//! retry lands on the same member.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use berth_catalog::Catalog;
use berth_core::{
    gen_request_uuid, parse_volume_name, CoreError, CoreResult, ParsedName, ServiceAttr,
    ServiceMember, ServiceStatus, DEFAULT_HOST_IP, DEFAULT_SERVER_INSTANCE_ID, DEFAULT_TASK_ID,
};
use berth_infra::{member_dns_name, CloudServer, ContainerSvc, DnsProvider, IpManager};

use crate::fsops::FsOps;
use crate::materialize::materialize_configs;
use crate::selector::{select_member, HostInfo};

/// Claim attempts before giving up with `ClaimContested`.
const CLAIM_RETRIES: u32 = 3;

/// Driver tunables.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Root directory mount paths are derived under.
    pub mount_root: PathBuf,
    /// Network interface static IPs are assigned on.
    pub ifname: String,
    pub mount_timeout: Duration,
    pub unmount_timeout: Duration,
    /// Deadline for a single catalog call.
    pub catalog_call_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            mount_root: PathBuf::from("/mnt/berth"),
            ifname: "eth0".to_string(),
            mount_timeout: Duration::from_secs(120),
            unmount_timeout: Duration::from_secs(60),
            catalog_call_timeout: Duration::from_secs(10),
        }
    }
}

/// Remaining-time budget for one driver operation.
struct Deadline {
    end: Instant,
}

impl Deadline {
    fn new(budget: Duration) -> Self {
        Self {
            end: Instant::now() + budget,
        }
    }

    fn remaining(&self) -> Duration {
        self.end.saturating_duration_since(Instant::now())
    }
}

/// In-memory record of one mounted path key on this host.
#[derive(Clone)]
struct MountEntry {
    ref_count: u32,
    member: ServiceMember,
    mount_path: PathBuf,
    /// Volume IDs this entry attached and is responsible for.
    attached_volumes: Vec<String>,
    /// Static IP assigned to the local interface for this entry.
    assigned_ip: Option<String>,
}

/// The node-local volume driver.
pub struct VolumeDriver {
    catalog: Arc<dyn Catalog>,
    cloud: Arc<dyn CloudServer>,
    dns: Arc<dyn DnsProvider>,
    containersvc: Arc<dyn ContainerSvc>,
    fs: Arc<dyn FsOps>,
    ip_manager: IpManager,
    config: DriverConfig,
    host: HostInfo,
    mounts: StdMutex<HashMap<String, MountEntry>>,
    key_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl VolumeDriver {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        cloud: Arc<dyn CloudServer>,
        dns: Arc<dyn DnsProvider>,
        containersvc: Arc<dyn ContainerSvc>,
        fs: Arc<dyn FsOps>,
        ip_manager: IpManager,
        config: DriverConfig,
    ) -> Self {
        let host = HostInfo {
            server_instance_id: cloud.local_instance_id().to_string(),
            container_instance_id: containersvc.local_container_instance_id().to_string(),
            availability_zone: cloud.local_availability_zone().to_string(),
        };
        Self {
            catalog,
            cloud,
            dns,
            containersvc,
            fs,
            ip_manager,
            config,
            host,
            mounts: StdMutex::new(HashMap::new()),
            key_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Mount path for a path key under the driver root.
    pub fn mountpoint(&self, path_key: &str) -> PathBuf {
        self.config.mount_root.join(path_key)
    }

    /// Outstanding refcount for a path key. Test and ops hook.
    pub fn ref_count(&self, path_key: &str) -> Option<u32> {
        self.lock_mounts().get(path_key).map(|e| e.ref_count)
    }

    fn lock_mounts(&self) -> std::sync::MutexGuard<'_, HashMap<String, MountEntry>> {
        self.mounts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The per-key mutex serializing mount/unmount on one path key.
    fn key_lock(&self, path_key: &str) -> Arc<AsyncMutex<()>> {
        self.key_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(path_key.to_string())
            .or_default()
            .clone()
    }

    /// Run a fallible step under the operation deadline, capped at
    /// `cap` for calls with their own tighter budget.
    async fn timed<T, F>(
        &self,
        deadline: &Deadline,
        cap: Duration,
        what: &str,
        fut: F,
    ) -> CoreResult<T>
    where
        F: std::future::Future<Output = CoreResult<T>>,
    {
        let budget = deadline.remaining().min(cap);
        if budget.is_zero() {
            return Err(CoreError::Timeout(format!("{what}: deadline exhausted")));
        }
        match tokio::time::timeout(budget, fut).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Timeout(format!("{what}: deadline exceeded"))),
        }
    }

    // ── Volume contract: the cheap operations ─────────────────────

    /// Resolve a name to its mount path. The path is well-defined
    /// whether or not the volume is currently mounted.
    pub fn get(&self, name: &str) -> CoreResult<PathBuf> {
        let parsed = parse_volume_name(name)?;
        Ok(self.mountpoint(&parsed.path_key))
    }

    /// Same as [`get`](Self::get); the runtime calls it without
    /// existence checks.
    pub fn path(&self, name: &str) -> CoreResult<PathBuf> {
        self.get(name)
    }

    /// Every service UUID known to the catalog, with its mount path.
    pub async fn list(&self) -> CoreResult<Vec<(String, PathBuf)>> {
        let services = self.catalog.list_services().await?;
        let mut volumes = Vec::with_capacity(services.len());
        for service in services {
            if self
                .catalog
                .get_service_attr(&service.service_uuid)
                .await
                .is_ok()
            {
                let path = self.mountpoint(&service.service_uuid);
                volumes.push((service.service_uuid, path));
            }
        }
        Ok(volumes)
    }

    /// Volumes are provisioned at service-create time by the
    /// management layer; Create only confirms the service exists.
    pub async fn create(&self, name: &str) -> CoreResult<()> {
        let parsed = parse_volume_name(name)?;
        self.catalog
            .get_service_attr(&parsed.service_uuid)
            .await
            .map(|_| ())
    }

    /// Volumes outlive containers; Remove is deliberately a no-op so
    /// the runtime's teardown never wedges on a deleted service.
    pub fn remove(&self, name: &str) -> CoreResult<()> {
        parse_volume_name(name)?;
        Ok(())
    }

    // ── Mount ─────────────────────────────────────────────────────

    pub async fn mount(&self, name: &str) -> CoreResult<PathBuf> {
        let requuid = gen_request_uuid();
        let parsed = parse_volume_name(name)?;
        let lock = self.key_lock(&parsed.path_key);
        let _guard = lock.lock().await;

        // Idempotent repeat mount.
        {
            let mut mounts = self.lock_mounts();
            if let Some(entry) = mounts.get_mut(&parsed.path_key) {
                entry.ref_count += 1;
                info!(%requuid, name, ref_count = entry.ref_count, "repeat mount");
                return Ok(entry.mount_path.clone());
            }
        }

        let deadline = Deadline::new(self.config.mount_timeout);
        let result = self.mount_locked(&parsed, &deadline, &requuid).await;
        match &result {
            Ok(path) => info!(%requuid, name, path = %path.display(), "mounted"),
            Err(e) => error!(%requuid, name, error = %e, "mount failed"),
        }
        result
    }

    async fn mount_locked(
        &self,
        parsed: &ParsedName,
        deadline: &Deadline,
        requuid: &str,
    ) -> CoreResult<PathBuf> {
        let catalog_cap = self.config.catalog_call_timeout;

        let attr = self
            .timed(
                deadline,
                catalog_cap,
                "get service attr",
                self.catalog.get_service_attr(&parsed.service_uuid),
            )
            .await?;
        if !matches!(
            attr.status,
            ServiceStatus::Initializing | ServiceStatus::Active
        ) {
            return Err(CoreError::ServiceNotReady(format!(
                "service {} status {:?}",
                attr.service_uuid, attr.status
            )));
        }

        // The task this mount serves, as the runtime reports it. A
        // mount can race the runtime's own bookkeeping, so a missing
        // local task falls back to the sentinel instead of failing.
        let task_id = match self
            .containersvc
            .get_service_task(
                &attr.cluster,
                &attr.service_name,
                &self.host.container_instance_id,
            )
            .await
        {
            Ok(task_id) => task_id,
            Err(CoreError::NotFound(_)) => DEFAULT_TASK_ID.to_string(),
            Err(e) => return Err(e),
        };

        // Select and claim, retrying lost conditional updates with a
        // fresh member list each round.
        let mut claimed = None;
        for attempt in 1..=CLAIM_RETRIES {
            let candidate = self
                .timed(
                    deadline,
                    catalog_cap,
                    "select member",
                    select_member(
                        self.catalog.as_ref(),
                        self.containersvc.as_ref(),
                        &attr,
                        &self.host,
                        requuid,
                    ),
                )
                .await?;
            let prior_owner = candidate.server_instance_id.clone();
            let claim = candidate.with_owner(
                &task_id,
                &self.host.container_instance_id,
                &self.host.server_instance_id,
            );
            match self
                .timed(
                    deadline,
                    catalog_cap,
                    "claim member",
                    self.catalog.update_service_member(&candidate, &claim),
                )
                .await
            {
                Ok(()) => {
                    info!(%requuid, member = %claim.member_name, attempt, "member claimed");
                    claimed = Some((claim, prior_owner));
                    break;
                }
                Err(CoreError::VersionMismatch(_)) => {
                    debug!(%requuid, member = %candidate.member_name, attempt, "claim lost, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        let (member, prior_owner) = claimed.ok_or_else(|| {
            CoreError::ClaimContested(format!(
                "service {}: {CLAIM_RETRIES} claim attempts lost",
                attr.service_uuid
            ))
        })?;

        // Everything past the claim rolls back on failure; the claim
        // itself stays.
        let mount_path = self.mountpoint(&parsed.path_key);
        let mut attached = Vec::new();
        let mut assigned_ip = None;
        match self
            .provision(
                parsed,
                &attr,
                &member,
                &prior_owner,
                &mount_path,
                &mut attached,
                &mut assigned_ip,
                deadline,
                requuid,
            )
            .await
        {
            Ok(()) => {
                self.lock_mounts().insert(
                    parsed.path_key.clone(),
                    MountEntry {
                        ref_count: 1,
                        member,
                        mount_path: mount_path.clone(),
                        attached_volumes: attached,
                        assigned_ip,
                    },
                );
                Ok(mount_path)
            }
            Err(e) => {
                self.rollback(&parsed.path_key, &mount_path, &attached, &assigned_ip, requuid)
                    .await;
                Err(e)
            }
        }
    }

    /// Steps 6 through 11 of the mount sequence: volumes, static IP,
    /// DNS, filesystem, configs.
    #[allow(clippy::too_many_arguments)]
    async fn provision(
        &self,
        parsed: &ParsedName,
        attr: &ServiceAttr,
        member: &ServiceMember,
        prior_owner: &str,
        mount_path: &PathBuf,
        attached: &mut Vec<String>,
        assigned_ip: &mut Option<String>,
        deadline: &Deadline,
        requuid: &str,
    ) -> CoreResult<()> {
        // The device this path key mounts.
        let (device, volume_id) = if parsed.journal {
            let volume_id = member.volumes.journal_volume_id.clone().ok_or_else(|| {
                CoreError::Internal(format!(
                    "member {} has no journal volume",
                    member.member_name
                ))
            })?;
            let device = member.volumes.journal_device_name.clone().ok_or_else(|| {
                CoreError::Internal(format!(
                    "member {} has no journal device name",
                    member.member_name
                ))
            })?;
            (device, volume_id)
        } else {
            (
                member.volumes.primary_device_name.clone(),
                member.volumes.primary_volume_id.clone(),
            )
        };

        // Attach this path key's volume. On a primary mount, also
        // bring over the journal volume so a host migration moves the
        // member as a unit.
        self.attach_with_takeover(&volume_id, &device, prior_owner, deadline, requuid)
            .await?;
        attached.push(volume_id.clone());
        if !parsed.journal {
            if let (Some(journal_volume), Some(journal_device)) = (
                member.volumes.journal_volume_id.clone(),
                member.volumes.journal_device_name.clone(),
            ) {
                self.attach_with_takeover(
                    &journal_volume,
                    &journal_device,
                    prior_owner,
                    deadline,
                    requuid,
                )
                .await?;
                attached.push(journal_volume);
            }
        }

        if attr.require_static_ip {
            let ip = self
                .claim_static_ip(member, deadline, requuid)
                .await?;
            *assigned_ip = Some(ip);
        }

        if attr.register_dns {
            let target_ip = if attr.require_static_ip {
                member.static_ip.clone()
            } else {
                self.cloud.local_private_ip().to_string()
            };
            let dns_name = member_dns_name(&member.member_name, &attr.domain_name);
            self.timed(
                deadline,
                Duration::MAX,
                "dns upsert",
                self.dns.upsert_a(&attr.hosted_zone_id, &dns_name, &target_ip),
            )
            .await?;
            debug!(%requuid, %dns_name, %target_ip, "dns record updated");
        }

        if !self.fs.has_filesystem(&device).await? {
            self.timed(
                deadline,
                Duration::MAX,
                "format device",
                self.fs.format(&device),
            )
            .await?;
        }
        tokio::fs::create_dir_all(mount_path).await?;
        if !self.fs.is_mounted(mount_path).await? {
            self.timed(
                deadline,
                Duration::MAX,
                "mount device",
                self.fs.mount(&device, mount_path),
            )
            .await?;
        }

        materialize_configs(self.catalog.as_ref(), member, mount_path, requuid).await
    }

    /// Attach a volume to this host, force-detaching it from the
    /// member's previous owner when the provider still holds it there.
    /// The catalog is the source of truth, not the provider's
    /// attachment state.
    async fn attach_with_takeover(
        &self,
        volume_id: &str,
        device: &str,
        prior_owner: &str,
        deadline: &Deadline,
        requuid: &str,
    ) -> CoreResult<()> {
        let me = self.host.server_instance_id.as_str();
        let first = self
            .timed(
                deadline,
                Duration::MAX,
                "attach volume",
                self.cloud.attach_volume(volume_id, me, device),
            )
            .await;
        if let Err(e) = first {
            if prior_owner == me || prior_owner == DEFAULT_SERVER_INSTANCE_ID {
                return Err(e);
            }
            warn!(
                %requuid, %volume_id, %prior_owner,
                "volume held by previous owner, forcing detach"
            );
            self.timed(
                deadline,
                Duration::MAX,
                "detach from previous owner",
                self.cloud.detach_volume(volume_id, prior_owner),
            )
            .await?;
            self.timed(
                deadline,
                Duration::MAX,
                "attach volume",
                self.cloud.attach_volume(volume_id, me, device),
            )
            .await?;
        }
        self.timed(
            deadline,
            Duration::MAX,
            "wait volume attached",
            self.cloud.wait_volume_attached(volume_id),
        )
        .await
    }

    /// Re-home the member's static IP onto this host: update the
    /// catalog record, assign at the provider, then on the local
    /// interface. Idempotent when this host already owns the IP.
    async fn claim_static_ip(
        &self,
        member: &ServiceMember,
        deadline: &Deadline,
        requuid: &str,
    ) -> CoreResult<String> {
        let ip = member.static_ip.clone();
        if ip == DEFAULT_HOST_IP {
            return Err(CoreError::Internal(format!(
                "service requires a static ip but member {} has none",
                member.member_name
            )));
        }
        let catalog_cap = self.config.catalog_call_timeout;
        let local_eni = self.cloud.local_network_interface_id().to_string();

        // One retry on a lost record update; a second loss means
        // another host is actively claiming the same member and the
        // mount should fail upward.
        for _ in 0..2 {
            let record = self
                .timed(
                    deadline,
                    catalog_cap,
                    "get static ip",
                    self.catalog.get_service_static_ip(&ip),
                )
                .await?;
            if record.server_instance_id == self.host.server_instance_id {
                break;
            }
            // Remove the IP from the old interface at the provider
            // level before taking it over.
            self.timed(
                deadline,
                Duration::MAX,
                "unassign ip from previous host",
                self.cloud
                    .unassign_static_ip(&record.network_interface_id, &ip),
            )
            .await?;
            let rehomed = record.with_owner(&self.host.server_instance_id, &local_eni);
            match self
                .timed(
                    deadline,
                    catalog_cap,
                    "update static ip record",
                    self.catalog.update_service_static_ip(&record, &rehomed),
                )
                .await
            {
                Ok(()) => break,
                Err(CoreError::VersionMismatch(_)) => {
                    debug!(%requuid, %ip, "static ip record moved, re-reading");
                }
                Err(e) => return Err(e),
            }
        }

        self.timed(
            deadline,
            Duration::MAX,
            "assign ip at provider",
            self.cloud.assign_static_ip(&local_eni, &ip),
        )
        .await?;
        self.ip_manager
            .assign(&ip, self.cloud.cidr_prefix_len(), &self.config.ifname)
            .await?;
        info!(%requuid, %ip, ifname = %self.config.ifname, "static ip assigned");
        Ok(ip)
    }

    /// Undo host-local side effects of a failed mount. Best-effort;
    /// the claim is left in place.
    async fn rollback(
        &self,
        path_key: &str,
        mount_path: &PathBuf,
        attached: &[String],
        assigned_ip: &Option<String>,
        requuid: &str,
    ) {
        warn!(%requuid, %path_key, "rolling back failed mount");
        if let Ok(true) = self.fs.is_mounted(mount_path).await {
            if let Err(e) = self.fs.unmount(mount_path).await {
                warn!(%requuid, error = %e, "rollback unmount failed");
            }
        }
        let me = self.host.server_instance_id.as_str();
        for volume_id in attached {
            if self.volume_shared_elsewhere(path_key, volume_id) {
                continue;
            }
            if let Err(e) = self.cloud.detach_volume(volume_id, me).await {
                warn!(%requuid, %volume_id, error = %e, "rollback detach failed");
            }
        }
        if let Some(ip) = assigned_ip {
            if let Err(e) = self
                .ip_manager
                .unassign(ip, self.cloud.cidr_prefix_len(), &self.config.ifname)
                .await
            {
                warn!(%requuid, %ip, error = %e, "rollback ip unassign failed");
            }
        }
    }

    /// Is the volume also recorded by a live entry on another path
    /// key? (The journal volume is attached by both the primary and
    /// the journal entries.)
    fn volume_shared_elsewhere(&self, path_key: &str, volume_id: &str) -> bool {
        self.lock_mounts().iter().any(|(key, entry)| {
            key != path_key && entry.attached_volumes.iter().any(|v| v == volume_id)
        })
    }

    // ── Unmount ───────────────────────────────────────────────────

    pub async fn unmount(&self, name: &str) -> CoreResult<()> {
        let requuid = gen_request_uuid();
        let parsed = parse_volume_name(name)?;
        let lock = self.key_lock(&parsed.path_key);
        let _guard = lock.lock().await;

        let entry = {
            let mut mounts = self.lock_mounts();
            let entry = mounts
                .get_mut(&parsed.path_key)
                .ok_or_else(|| CoreError::NotFound(format!("volume {name} is not mounted")))?;
            if entry.ref_count > 1 {
                entry.ref_count -= 1;
                info!(%requuid, name, ref_count = entry.ref_count, "unmount deferred");
                return Ok(());
            }
            entry.clone()
        };

        let deadline = Deadline::new(self.config.unmount_timeout);

        // Kernel unmount first; Busy keeps the entry so a later retry
        // picks up where this one stopped.
        if self.fs.is_mounted(&entry.mount_path).await? {
            self.timed(
                &deadline,
                Duration::MAX,
                "kernel unmount",
                self.fs.unmount(&entry.mount_path),
            )
            .await?;
        }

        let me = self.host.server_instance_id.as_str();
        for volume_id in &entry.attached_volumes {
            if self.volume_shared_elsewhere(&parsed.path_key, volume_id) {
                debug!(%requuid, %volume_id, "volume still in use by another path key");
                continue;
            }
            self.timed(
                &deadline,
                Duration::MAX,
                "detach volume",
                self.cloud.detach_volume(volume_id, me),
            )
            .await?;
        }

        // OS-level unassign only. The catalog record keeps pointing at
        // this host; the next mount on a new host overwrites it, which
        // avoids a window where the IP looks free while still
        // configured here.
        if let Some(ip) = &entry.assigned_ip {
            self.ip_manager
                .unassign(ip, self.cloud.cidr_prefix_len(), &self.config.ifname)
                .await?;
        }

        self.lock_mounts().remove(&parsed.path_key);
        info!(%requuid, name, member = %entry.member.member_name, "unmounted");
        Ok(())
    }

    /// Detach a member's volumes from this host. Operator hook for
    /// cleaning up after a driver restart left attachments behind.
    pub async fn detach_volumes(&self, member: &ServiceMember, requuid: &str) -> CoreResult<()> {
        let me = self.host.server_instance_id.as_str();
        self.cloud
            .detach_volume(&member.volumes.primary_volume_id, me)
            .await?;
        if let Some(journal) = &member.volumes.journal_volume_id {
            self.cloud.detach_volume(journal, me).await?;
        }
        info!(%requuid, member = %member.member_name, "member volumes detached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_catalog::MemCatalog;
    use berth_core::{
        member_name, ConfigFile, MemberConfig, MemberVolumes, ServiceVolume, ServiceVolumes,
        VolumeType,
    };
    use berth_infra::{
        CommandRunner, LoopCloudServer, MemContainerSvc, MemDns,
    };
    use crate::fsops::MemFsOps;
    use async_trait::async_trait;

    /// Command runner that pretends every `ip` invocation succeeds.
    struct OkRunner;

    #[async_trait]
    impl CommandRunner for OkRunner {
        async fn run(&self, _program: &str, _args: &[&str]) -> CoreResult<(bool, String)> {
            Ok((true, String::new()))
        }
    }

    struct Fixture {
        catalog: Arc<MemCatalog>,
        cloud: Arc<LoopCloudServer>,
        dns: Arc<MemDns>,
        containersvc: Arc<MemContainerSvc>,
        fs: Arc<MemFsOps>,
        _tmp: tempfile::TempDir,
    }

    impl Fixture {
        fn new(instance: &str, az: &str) -> Self {
            Self {
                catalog: Arc::new(MemCatalog::new()),
                cloud: Arc::new(LoopCloudServer::new(instance, az, "10.0.0.1")),
                dns: Arc::new(MemDns::new()),
                containersvc: Arc::new(MemContainerSvc::new(&format!("ci-{instance}"))),
                fs: Arc::new(MemFsOps::new()),
                _tmp: tempfile::tempdir().unwrap(),
            }
        }

        fn driver(&self) -> VolumeDriver {
            let config = DriverConfig {
                mount_root: self._tmp.path().to_path_buf(),
                ifname: "lo".to_string(),
                ..DriverConfig::default()
            };
            VolumeDriver::new(
                self.catalog.clone(),
                self.cloud.clone(),
                self.dns.clone(),
                self.containersvc.clone(),
                self.fs.clone(),
                IpManager::new(Arc::new(OkRunner)),
                config,
            )
        }

        /// Seed a service the way the management layer would: attr,
        /// members with sentinel ownership, config files, and a task
        /// running on this host.
        async fn seed_service(
            &self,
            uuid: &str,
            service: &str,
            replicas: i64,
            az: &str,
            journal: bool,
        ) -> ServiceAttr {
            let attr = ServiceAttr::new(
                uuid.to_string(),
                replicas as u64,
                "c1".to_string(),
                service.to_string(),
                ServiceVolumes {
                    primary_device_name: "/dev/xvdf".to_string(),
                    primary: ServiceVolume {
                        volume_type: VolumeType::Gp,
                        size_gb: 1,
                        iops: 0,
                    },
                    journal_device_name: journal.then(|| "/dev/xvdg".to_string()),
                    journal: journal.then(|| ServiceVolume {
                        volume_type: VolumeType::Gp,
                        size_gb: 1,
                        iops: 0,
                    }),
                },
                true,
                "test.example.com".to_string(),
                "zone-1".to_string(),
                false,
                vec![],
            )
            .with_status(ServiceStatus::Active);
            self.catalog
                .create_service(&berth_core::Service {
                    cluster: "c1".to_string(),
                    service_name: service.to_string(),
                    service_uuid: uuid.to_string(),
                })
                .await
                .unwrap();
            self.catalog.create_service_attr(&attr).await.unwrap();

            let config_file = ConfigFile::new(
                uuid.to_string(),
                "f1".to_string(),
                "c.conf".to_string(),
                0o644,
                b"hello".to_vec(),
            );
            self.catalog.create_config_file(&config_file).await.unwrap();

            for index in 0..replicas {
                let member = ServiceMember::new(
                    uuid.to_string(),
                    index,
                    member_name(service, index),
                    az.to_string(),
                    MemberVolumes {
                        primary_volume_id: format!("vol-{uuid}-{index}"),
                        primary_device_name: "/dev/xvdf".to_string(),
                        journal_volume_id: journal.then(|| format!("volj-{uuid}-{index}")),
                        journal_device_name: journal.then(|| "/dev/xvdg".to_string()),
                    },
                    DEFAULT_HOST_IP.to_string(),
                    vec![MemberConfig {
                        file_name: config_file.file_name.clone(),
                        file_id: config_file.file_id.clone(),
                        file_md5: config_file.file_md5.clone(),
                    }],
                );
                self.catalog.create_service_member(&member).await.unwrap();
            }
            self.containersvc.add_service_task(
                "c1",
                service,
                "task-1",
                self.containersvc.local_container_instance_id(),
            );
            attr
        }
    }

    #[tokio::test]
    async fn mount_claims_member_for_this_host() {
        let fx = Fixture::new("i-1", "az-1");
        fx.seed_service("uuid1", "svc1", 1, "az-1", false).await;
        let driver = fx.driver();

        let path = driver.mount("uuid1").await.unwrap();
        assert_eq!(path, driver.mountpoint("uuid1"));

        let member = fx
            .catalog
            .get_service_member("uuid1", "svc1-0")
            .await
            .unwrap();
        assert_eq!(member.server_instance_id, "i-1");
        assert_eq!(member.task_id, "task-1");
        assert_eq!(fx.cloud.volume_holder("vol-uuid1-0").as_deref(), Some("i-1"));
        assert!(fx.fs.mounted_device(&path).is_some());

        // Config materialized under the mount.
        let conf = std::fs::read(path.join("conf").join("c.conf")).unwrap();
        assert_eq!(conf, b"hello");

        // DNS registered to the host's private IP.
        assert_eq!(
            fx.dns
                .lookup_a("zone-1", "svc1-0.test.example.com")
                .await
                .unwrap(),
            "10.0.0.1"
        );
    }

    #[tokio::test]
    async fn mount_is_refcounted() {
        let fx = Fixture::new("i-1", "az-1");
        fx.seed_service("uuid1", "svc1", 1, "az-1", false).await;
        let driver = fx.driver();

        let p1 = driver.mount("uuid1").await.unwrap();
        let p2 = driver.mount("uuid1").await.unwrap();
        assert_eq!(p1, p2);
        assert_eq!(driver.ref_count("uuid1"), Some(2));
        // Only one device attach and one format happened.
        assert_eq!(fx.cloud.attachment_count(), 1);
        assert_eq!(fx.fs.format_count(), 1);

        driver.unmount("uuid1").await.unwrap();
        assert_eq!(driver.ref_count("uuid1"), Some(1));
        assert_eq!(fx.cloud.attachment_count(), 1);

        driver.unmount("uuid1").await.unwrap();
        assert_eq!(driver.ref_count("uuid1"), None);
        assert_eq!(fx.cloud.attachment_count(), 0);

        // Balance exhausted: one more unmount reports NotFound.
        assert!(matches!(
            driver.unmount("uuid1").await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn slot_suffix_shares_the_path() {
        let fx = Fixture::new("i-1", "az-1");
        fx.seed_service("uuid1", "svc1", 1, "az-1", false).await;
        let driver = fx.driver();

        let p1 = driver.mount("uuid1-1").await.unwrap();
        assert_eq!(p1, driver.mountpoint("uuid1"));
        let p2 = driver.mount("uuid1").await.unwrap();
        assert_eq!(p1, p2);
        assert_eq!(driver.ref_count("uuid1"), Some(2));
        driver.unmount("uuid1-1").await.unwrap();
        driver.unmount("uuid1").await.unwrap();
    }

    #[tokio::test]
    async fn journal_volume_mounts_at_its_own_path() {
        let fx = Fixture::new("i-1", "az-1");
        fx.seed_service("uuid1", "svc1", 1, "az-1", true).await;
        let driver = fx.driver();

        let data_path = driver.mount("uuid1").await.unwrap();
        let journal_path = driver.mount("journal_uuid1").await.unwrap();
        assert_ne!(data_path, journal_path);
        assert_eq!(journal_path, driver.mountpoint("journal_uuid1"));
        assert_eq!(
            fx.fs.mounted_device(&journal_path).as_deref(),
            Some("/dev/xvdg")
        );

        // Unmounting the journal leaves the shared attachment in
        // place; unmounting the data volume releases both.
        driver.unmount("journal_uuid1").await.unwrap();
        assert_eq!(fx.cloud.volume_holder("volj-uuid1-0").as_deref(), Some("i-1"));
        driver.unmount("uuid1").await.unwrap();
        assert_eq!(fx.cloud.attachment_count(), 0);
    }

    #[tokio::test]
    async fn mount_fails_across_zones() {
        let fx = Fixture::new("i-1", "az-1");
        fx.seed_service("uuid1", "svc1", 1, "another-az", false).await;
        let driver = fx.driver();

        let err = driver.mount("uuid1").await.unwrap_err();
        assert!(matches!(err, CoreError::NoEligibleMember(_)));
        assert_eq!(fx.cloud.attachment_count(), 0);
    }

    #[tokio::test]
    async fn mount_requires_ready_service() {
        let fx = Fixture::new("i-1", "az-1");
        let attr = fx.seed_service("uuid1", "svc1", 1, "az-1", false).await;
        // Push the service into Deleting.
        let deleting = attr.with_status(ServiceStatus::Deleting);
        fx.catalog
            .update_service_attr(&attr, &deleting)
            .await
            .unwrap();
        let driver = fx.driver();

        assert!(matches!(
            driver.mount("uuid1").await,
            Err(CoreError::ServiceNotReady(_))
        ));
    }

    #[tokio::test]
    async fn busy_unmount_keeps_the_entry() {
        let fx = Fixture::new("i-1", "az-1");
        fx.seed_service("uuid1", "svc1", 1, "az-1", false).await;
        let driver = fx.driver();

        let path = driver.mount("uuid1").await.unwrap();
        fx.fs.set_busy(&path, true);
        assert!(matches!(
            driver.unmount("uuid1").await,
            Err(CoreError::Busy(_))
        ));
        assert_eq!(driver.ref_count("uuid1"), Some(1));

        fx.fs.set_busy(&path, false);
        driver.unmount("uuid1").await.unwrap();
        assert_eq!(driver.ref_count("uuid1"), None);
    }

    #[tokio::test]
    async fn failed_mount_rolls_back_but_keeps_claim() {
        let fx = Fixture::new("i-1", "az-1");
        fx.seed_service("uuid1", "svc1", 1, "az-1", false).await;
        // Corrupt the member's config reference so materialization
        // fails after attach.
        let member = fx
            .catalog
            .get_service_member("uuid1", "svc1-0")
            .await
            .unwrap();
        let mut configs = member.configs.clone();
        configs[0].file_md5 = "feedfacefeedface".to_string();
        let broken = member.with_configs(configs);
        fx.catalog
            .update_service_member(&member, &broken)
            .await
            .unwrap();

        let driver = fx.driver();
        let err = driver.mount("uuid1").await.unwrap_err();
        assert!(matches!(err, CoreError::CorruptConfig(_)));

        // Rolled back: no attachment, nothing mounted, no entry.
        assert_eq!(fx.cloud.attachment_count(), 0);
        assert_eq!(driver.ref_count("uuid1"), None);

        // The claim is sticky: the member still records this host.
        let after = fx
            .catalog
            .get_service_member("uuid1", "svc1-0")
            .await
            .unwrap();
        assert_eq!(after.server_instance_id, "i-1");
    }

    #[tokio::test]
    async fn create_checks_existence_and_remove_never_fails() {
        let fx = Fixture::new("i-1", "az-1");
        fx.seed_service("uuid1", "svc1", 1, "az-1", false).await;
        let driver = fx.driver();

        driver.create("uuid1").await.unwrap();
        driver.create("uuid1-2").await.unwrap();
        assert!(matches!(
            driver.create("unknown").await,
            Err(CoreError::NotFound(_))
        ));

        driver.remove("uuid1").unwrap();
        driver.remove("unknown").unwrap();
        assert!(matches!(
            driver.remove("bad-name-1-1"),
            Err(CoreError::InvalidArgs(_))
        ));
    }

    #[tokio::test]
    async fn get_and_list_report_paths() {
        let fx = Fixture::new("i-1", "az-1");
        fx.seed_service("uuid1", "svc1", 1, "az-1", false).await;
        fx.seed_service("uuid2", "svc2", 1, "az-1", false).await;
        let driver = fx.driver();

        assert_eq!(driver.get("uuid1").unwrap(), driver.mountpoint("uuid1"));
        assert_eq!(driver.get("uuid1-3").unwrap(), driver.mountpoint("uuid1"));
        assert_eq!(
            driver.get("journal_uuid1").unwrap(),
            driver.mountpoint("journal_uuid1")
        );

        let mut volumes = driver.list().await.unwrap();
        volumes.sort();
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].0, "uuid1");
        assert_eq!(volumes[1].0, "uuid2");
    }

    #[tokio::test]
    async fn takeover_detaches_from_previous_host() {
        let fx = Fixture::new("i-1", "az-1");
        fx.seed_service("uuid1", "svc1", 1, "az-1", false).await;

        // Simulate the volume still attached where the member's
        // previous owner ran, with a dead task.
        let member = fx
            .catalog
            .get_service_member("uuid1", "svc1-0")
            .await
            .unwrap();
        let previously_owned = member.with_owner("task-dead", "ci-old", "i-old");
        fx.catalog
            .update_service_member(&member, &previously_owned)
            .await
            .unwrap();
        fx.cloud
            .attach_volume("vol-uuid1-0", "i-old", "/dev/xvdf")
            .await
            .unwrap();

        let driver = fx.driver();
        driver.mount("uuid1").await.unwrap();
        assert_eq!(fx.cloud.volume_holder("vol-uuid1-0").as_deref(), Some("i-1"));
    }
}
