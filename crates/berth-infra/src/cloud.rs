//! Cloud provider adapter.
//!
//! The driver needs five things from the cloud: attach/detach of block
//! volumes, volume provisioning for the management layer, secondary-IP
//! assignment on network interfaces, and the identity of the host it
//! runs on. [`LoopCloudServer`] simulates all of it in-memory with the
//! same attachment rules a real provider enforces (a volume attaches
//! to one instance at a time).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use berth_core::{CoreError, CoreResult, ServiceVolume};

/// Options for provisioning a new block volume.
#[derive(Debug, Clone)]
pub struct CreateVolumeOptions {
    pub availability_zone: String,
    pub volume: ServiceVolume,
}

/// Block volumes, static IPs, and host identity.
#[async_trait]
pub trait CloudServer: Send + Sync {
    /// Attach a volume to an instance at the given device name. Fails
    /// with `CloudError` when another instance holds the volume.
    async fn attach_volume(
        &self,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> CoreResult<()>;

    /// Detach a volume from an instance. Detaching a volume that is
    /// not attached is not an error.
    async fn detach_volume(&self, volume_id: &str, instance_id: &str) -> CoreResult<()>;

    /// Block until the volume reports attached on this host.
    async fn wait_volume_attached(&self, volume_id: &str) -> CoreResult<()>;

    /// Provision a new block volume; returns its ID.
    async fn create_volume(&self, opts: &CreateVolumeOptions) -> CoreResult<String>;

    async fn delete_volume(&self, volume_id: &str) -> CoreResult<()>;

    /// Assign a secondary private IP to a network interface at the
    /// provider level.
    async fn assign_static_ip(&self, network_interface_id: &str, ip: &str) -> CoreResult<()>;

    async fn unassign_static_ip(&self, network_interface_id: &str, ip: &str) -> CoreResult<()>;

    fn local_instance_id(&self) -> &str;
    fn local_availability_zone(&self) -> &str;
    /// Primary private IP of this host; DNS target when the service
    /// has no static IP.
    fn local_private_ip(&self) -> &str;
    fn local_network_interface_id(&self) -> &str;
    /// Prefix length of the host subnet's CIDR block.
    fn cidr_prefix_len(&self) -> u32;
}

#[derive(Default)]
struct LoopState {
    /// volume id -> (instance id, device name)
    attachments: HashMap<String, (String, String)>,
    volumes: HashSet<String>,
    /// (network interface id, ip)
    assigned_ips: HashSet<(String, String)>,
}

/// In-memory cloud double: one host's view of a simulated region.
/// [`peer`](Self::peer) derives another host's view over the same
/// region state, for multi-host tests.
pub struct LoopCloudServer {
    instance_id: String,
    availability_zone: String,
    private_ip: String,
    network_interface_id: String,
    cidr_prefix_len: u32,
    state: Arc<Mutex<LoopState>>,
}

impl LoopCloudServer {
    pub fn new(instance_id: &str, availability_zone: &str, private_ip: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            availability_zone: availability_zone.to_string(),
            private_ip: private_ip.to_string(),
            network_interface_id: format!("eni-{instance_id}"),
            cidr_prefix_len: 24,
            state: Arc::new(Mutex::new(LoopState::default())),
        }
    }

    /// Another host in the same region: distinct identity, shared
    /// attachment and IP state.
    pub fn peer(&self, instance_id: &str, availability_zone: &str, private_ip: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            availability_zone: availability_zone.to_string(),
            private_ip: private_ip.to_string(),
            network_interface_id: format!("eni-{instance_id}"),
            cidr_prefix_len: self.cidr_prefix_len,
            state: self.state.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Which instance currently holds the volume, if any.
    pub fn volume_holder(&self, volume_id: &str) -> Option<String> {
        self.lock()
            .attachments
            .get(volume_id)
            .map(|(instance, _)| instance.clone())
    }

    /// Number of volumes currently attached anywhere. Test hook.
    pub fn attachment_count(&self) -> usize {
        self.lock().attachments.len()
    }

    /// Is the IP assigned to the interface at the provider level?
    pub fn ip_assigned(&self, network_interface_id: &str, ip: &str) -> bool {
        self.lock()
            .assigned_ips
            .contains(&(network_interface_id.to_string(), ip.to_string()))
    }
}

#[async_trait]
impl CloudServer for LoopCloudServer {
    async fn attach_volume(
        &self,
        volume_id: &str,
        instance_id: &str,
        device: &str,
    ) -> CoreResult<()> {
        let mut state = self.lock();
        match state.attachments.get(volume_id) {
            Some((holder, _)) if holder == instance_id => Ok(()),
            Some((holder, _)) => Err(CoreError::CloudError(format!(
                "volume {volume_id} is attached to {holder}"
            ))),
            None => {
                state.attachments.insert(
                    volume_id.to_string(),
                    (instance_id.to_string(), device.to_string()),
                );
                debug!(%volume_id, %instance_id, %device, "volume attached");
                Ok(())
            }
        }
    }

    async fn detach_volume(&self, volume_id: &str, instance_id: &str) -> CoreResult<()> {
        let mut state = self.lock();
        match state.attachments.get(volume_id) {
            None => Ok(()),
            Some((holder, _)) if holder == instance_id => {
                state.attachments.remove(volume_id);
                debug!(%volume_id, %instance_id, "volume detached");
                Ok(())
            }
            Some((holder, _)) => Err(CoreError::CloudError(format!(
                "volume {volume_id} is attached to {holder}, not {instance_id}"
            ))),
        }
    }

    async fn wait_volume_attached(&self, volume_id: &str) -> CoreResult<()> {
        let state = self.lock();
        match state.attachments.get(volume_id) {
            Some((holder, _)) if *holder == self.instance_id => Ok(()),
            _ => Err(CoreError::CloudError(format!(
                "volume {volume_id} did not reach attached state"
            ))),
        }
    }

    async fn create_volume(&self, opts: &CreateVolumeOptions) -> CoreResult<String> {
        let volume_id = format!("vol-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        self.lock().volumes.insert(volume_id.clone());
        debug!(%volume_id, az = %opts.availability_zone, "volume created");
        Ok(volume_id)
    }

    async fn delete_volume(&self, volume_id: &str) -> CoreResult<()> {
        let mut state = self.lock();
        if state.attachments.contains_key(volume_id) {
            return Err(CoreError::CloudError(format!(
                "volume {volume_id} is still attached"
            )));
        }
        state.volumes.remove(volume_id);
        Ok(())
    }

    async fn assign_static_ip(&self, network_interface_id: &str, ip: &str) -> CoreResult<()> {
        self.lock()
            .assigned_ips
            .insert((network_interface_id.to_string(), ip.to_string()));
        Ok(())
    }

    async fn unassign_static_ip(&self, network_interface_id: &str, ip: &str) -> CoreResult<()> {
        self.lock()
            .assigned_ips
            .remove(&(network_interface_id.to_string(), ip.to_string()));
        Ok(())
    }

    fn local_instance_id(&self) -> &str {
        &self.instance_id
    }

    fn local_availability_zone(&self) -> &str {
        &self.availability_zone
    }

    fn local_private_ip(&self) -> &str {
        &self.private_ip
    }

    fn local_network_interface_id(&self) -> &str {
        &self.network_interface_id
    }

    fn cidr_prefix_len(&self) -> u32 {
        self.cidr_prefix_len
    }
}
