//! Container-runtime control-plane adapter.
//!
//! The member selector needs two questions answered: which tasks of a
//! service are live anywhere in the cluster (a member whose recorded
//! task is absent from that list is dead and may be stolen), and which
//! task of the service runs on this host (the task a mount serves).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use berth_core::{CoreError, CoreResult};

/// View of the container runtime.
#[async_trait]
pub trait ContainerSvc: Send + Sync {
    /// The runtime's identifier for this host.
    fn local_container_instance_id(&self) -> &str;

    /// Task IDs of the service currently live anywhere in the cluster.
    async fn list_active_service_tasks(
        &self,
        cluster: &str,
        service: &str,
    ) -> CoreResult<Vec<String>>;

    /// The service task running on the given container instance,
    /// `NotFound` when the runtime placed none there.
    async fn get_service_task(
        &self,
        cluster: &str,
        service: &str,
        container_instance_id: &str,
    ) -> CoreResult<String>;
}

/// In-memory container runtime double: tests register and remove
/// tasks to simulate scheduling and container death. [`peer`]
/// derives another host's view over the same cluster-wide task list.
///
/// [`peer`]: Self::peer
pub struct MemContainerSvc {
    container_instance_id: String,
    /// (cluster, service) -> [(task id, container instance id)]
    tasks: Arc<Mutex<HashMap<(String, String), Vec<(String, String)>>>>,
}

impl MemContainerSvc {
    pub fn new(container_instance_id: &str) -> Self {
        Self {
            container_instance_id: container_instance_id.to_string(),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Another host's view: distinct container instance, shared tasks.
    pub fn peer(&self, container_instance_id: &str) -> Self {
        Self {
            container_instance_id: container_instance_id.to_string(),
            tasks: self.tasks.clone(),
        }
    }

    pub fn add_service_task(
        &self,
        cluster: &str,
        service: &str,
        task_id: &str,
        container_instance_id: &str,
    ) {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry((cluster.to_string(), service.to_string()))
            .or_default()
            .push((task_id.to_string(), container_instance_id.to_string()));
    }

    /// Simulate a container dying: its task disappears from the list.
    pub fn remove_service_task(&self, cluster: &str, service: &str, task_id: &str) {
        if let Some(tasks) = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&(cluster.to_string(), service.to_string()))
        {
            tasks.retain(|(t, _)| t != task_id);
        }
    }
}

#[async_trait]
impl ContainerSvc for MemContainerSvc {
    fn local_container_instance_id(&self) -> &str {
        &self.container_instance_id
    }

    async fn list_active_service_tasks(
        &self,
        cluster: &str,
        service: &str,
    ) -> CoreResult<Vec<String>> {
        Ok(self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(cluster.to_string(), service.to_string()))
            .map(|tasks| tasks.iter().map(|(t, _)| t.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_service_task(
        &self,
        cluster: &str,
        service: &str,
        container_instance_id: &str,
    ) -> CoreResult<String> {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(cluster.to_string(), service.to_string()))
            .and_then(|tasks| {
                tasks
                    .iter()
                    .find(|(_, ci)| ci == container_instance_id)
                    .map(|(t, _)| t.clone())
            })
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "no {service} task on container instance {container_instance_id}"
                ))
            })
    }
}
