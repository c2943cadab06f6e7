//! In-memory catalog.
//!
//! Reference implementation of [`Catalog`]: one map per entity behind a
//! process mutex. Single-node mode and every driver test run on it.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use berth_core::{
    config_file_key, device_key, member_key, service_key, ConfigFile, CoreError, CoreResult,
    Device, Service, ServiceAttr, ServiceMember, ServiceStaticIP,
};

use crate::catalog::Catalog;

#[derive(Default)]
struct Inner {
    devices: HashMap<String, Device>,
    services: HashMap<String, Service>,
    attrs: HashMap<String, ServiceAttr>,
    members: HashMap<String, ServiceMember>,
    config_files: HashMap<String, ConfigFile>,
    static_ips: HashMap<String, ServiceStaticIP>,
}

/// HashMap-per-entity catalog guarded by a mutex.
#[derive(Default)]
pub struct MemCatalog {
    inner: Mutex<Inner>,
}

impl MemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic mid-mutation; propagating the
        // poison would hide the original panic in tests.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn create<T: Clone>(map: &mut HashMap<String, T>, key: String, value: &T) -> CoreResult<()> {
    if map.contains_key(&key) {
        return Err(CoreError::AlreadyExists(key));
    }
    map.insert(key, value.clone());
    Ok(())
}

fn get<T: Clone>(map: &HashMap<String, T>, key: &str) -> CoreResult<T> {
    map.get(key)
        .cloned()
        .ok_or_else(|| CoreError::NotFound(key.to_string()))
}

fn delete<T>(map: &mut HashMap<String, T>, key: &str) -> CoreResult<()> {
    map.remove(key)
        .map(|_| ())
        .ok_or_else(|| CoreError::NotFound(key.to_string()))
}

#[async_trait]
impl Catalog for MemCatalog {
    // ── Device reservations ───────────────────────────────────────

    async fn create_device(&self, device: &Device) -> CoreResult<()> {
        create(&mut self.lock().devices, device.table_key(), device)
    }

    async fn get_device(&self, cluster: &str, device_name: &str) -> CoreResult<Device> {
        get(&self.lock().devices, &device_key(cluster, device_name))
    }

    async fn delete_device(&self, cluster: &str, device_name: &str) -> CoreResult<()> {
        delete(&mut self.lock().devices, &device_key(cluster, device_name))
    }

    // ── Service directory ─────────────────────────────────────────

    async fn create_service(&self, service: &Service) -> CoreResult<()> {
        create(&mut self.lock().services, service.table_key(), service)
    }

    async fn get_service(&self, cluster: &str, service_name: &str) -> CoreResult<Service> {
        get(&self.lock().services, &service_key(cluster, service_name))
    }

    async fn list_services(&self) -> CoreResult<Vec<Service>> {
        Ok(self.lock().services.values().cloned().collect())
    }

    async fn delete_service(&self, cluster: &str, service_name: &str) -> CoreResult<()> {
        delete(
            &mut self.lock().services,
            &service_key(cluster, service_name),
        )
    }

    // ── Service attributes ────────────────────────────────────────

    async fn create_service_attr(&self, attr: &ServiceAttr) -> CoreResult<()> {
        create(&mut self.lock().attrs, attr.service_uuid.clone(), attr)
    }

    async fn get_service_attr(&self, service_uuid: &str) -> CoreResult<ServiceAttr> {
        get(&self.lock().attrs, service_uuid)
    }

    async fn update_service_attr(&self, prior: &ServiceAttr, new: &ServiceAttr) -> CoreResult<()> {
        if prior.service_uuid != new.service_uuid {
            return Err(CoreError::InvalidArgs(
                "prior and new service attr disagree on uuid".to_string(),
            ));
        }
        let mut inner = self.lock();
        let current = inner
            .attrs
            .get(&prior.service_uuid)
            .ok_or_else(|| CoreError::NotFound(prior.service_uuid.clone()))?;
        if !current.same_except_mtime(prior) {
            return Err(CoreError::VersionMismatch(prior.service_uuid.clone()));
        }
        inner.attrs.insert(new.service_uuid.clone(), new.clone());
        Ok(())
    }

    async fn delete_service_attr(&self, service_uuid: &str) -> CoreResult<()> {
        delete(&mut self.lock().attrs, service_uuid)
    }

    // ── Service members ───────────────────────────────────────────

    async fn create_service_member(&self, member: &ServiceMember) -> CoreResult<()> {
        create(&mut self.lock().members, member.table_key(), member)
    }

    async fn get_service_member(
        &self,
        service_uuid: &str,
        member_name: &str,
    ) -> CoreResult<ServiceMember> {
        get(&self.lock().members, &member_key(service_uuid, member_name))
    }

    async fn update_service_member(
        &self,
        prior: &ServiceMember,
        new: &ServiceMember,
    ) -> CoreResult<()> {
        if prior.service_uuid != new.service_uuid || prior.member_name != new.member_name {
            return Err(CoreError::InvalidArgs(
                "prior and new member disagree on key".to_string(),
            ));
        }
        let key = prior.table_key();
        let mut inner = self.lock();
        let current = inner
            .members
            .get(&key)
            .ok_or_else(|| CoreError::NotFound(key.clone()))?;
        if !current.same_except_mtime(prior) {
            return Err(CoreError::VersionMismatch(key));
        }
        inner.members.insert(new.table_key(), new.clone());
        Ok(())
    }

    async fn delete_service_member(
        &self,
        service_uuid: &str,
        member_name: &str,
    ) -> CoreResult<()> {
        delete(
            &mut self.lock().members,
            &member_key(service_uuid, member_name),
        )
    }

    async fn list_service_members(&self, service_uuid: &str) -> CoreResult<Vec<ServiceMember>> {
        Ok(self
            .lock()
            .members
            .values()
            .filter(|m| m.service_uuid == service_uuid)
            .cloned()
            .collect())
    }

    // ── Config files ──────────────────────────────────────────────

    async fn create_config_file(&self, file: &ConfigFile) -> CoreResult<()> {
        file.verify()?;
        create(&mut self.lock().config_files, file.table_key(), file)
    }

    async fn get_config_file(&self, service_uuid: &str, file_id: &str) -> CoreResult<ConfigFile> {
        let file = get(
            &self.lock().config_files,
            &config_file_key(service_uuid, file_id),
        )?;
        file.verify()?;
        Ok(file)
    }

    async fn delete_config_file(&self, service_uuid: &str, file_id: &str) -> CoreResult<()> {
        delete(
            &mut self.lock().config_files,
            &config_file_key(service_uuid, file_id),
        )
    }

    // ── Static IPs ────────────────────────────────────────────────

    async fn create_service_static_ip(&self, ip: &ServiceStaticIP) -> CoreResult<()> {
        create(&mut self.lock().static_ips, ip.static_ip.clone(), ip)
    }

    async fn get_service_static_ip(&self, static_ip: &str) -> CoreResult<ServiceStaticIP> {
        get(&self.lock().static_ips, static_ip)
    }

    async fn update_service_static_ip(
        &self,
        prior: &ServiceStaticIP,
        new: &ServiceStaticIP,
    ) -> CoreResult<()> {
        if prior.static_ip != new.static_ip {
            return Err(CoreError::InvalidArgs(
                "prior and new static ip disagree on address".to_string(),
            ));
        }
        let mut inner = self.lock();
        let current = inner
            .static_ips
            .get(&prior.static_ip)
            .ok_or_else(|| CoreError::NotFound(prior.static_ip.clone()))?;
        if current != prior {
            return Err(CoreError::VersionMismatch(prior.static_ip.clone()));
        }
        inner.static_ips.insert(new.static_ip.clone(), new.clone());
        Ok(())
    }

    async fn delete_service_static_ip(&self, static_ip: &str) -> CoreResult<()> {
        delete(&mut self.lock().static_ips, static_ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::{
        md5_hex, MemberVolumes, ServiceStatus, ServiceVolume, ServiceVolumes, VolumeType,
        DEFAULT_HOST_IP,
    };

    fn test_attr(uuid: &str, replicas: u64) -> ServiceAttr {
        ServiceAttr::new(
            uuid.to_string(),
            replicas,
            "c1".to_string(),
            "svc1".to_string(),
            ServiceVolumes {
                primary_device_name: "/dev/xvdf".to_string(),
                primary: ServiceVolume {
                    volume_type: VolumeType::Gp,
                    size_gb: 1,
                    iops: 0,
                },
                journal_device_name: None,
                journal: None,
            },
            true,
            "example.com".to_string(),
            "zone-1".to_string(),
            false,
            vec![],
        )
    }

    fn test_member(uuid: &str, index: i64) -> ServiceMember {
        ServiceMember::new(
            uuid.to_string(),
            index,
            format!("svc1-{index}"),
            "az-1".to_string(),
            MemberVolumes {
                primary_volume_id: format!("vol-{index}"),
                primary_device_name: "/dev/xvdf".to_string(),
                journal_volume_id: None,
                journal_device_name: None,
            },
            DEFAULT_HOST_IP.to_string(),
            vec![],
        )
    }

    #[tokio::test]
    async fn create_get_delete_service() {
        let db = MemCatalog::new();
        let svc = Service {
            cluster: "c1".into(),
            service_name: "svc1".into(),
            service_uuid: "uuid1".into(),
        };
        db.create_service(&svc).await.unwrap();
        assert_eq!(db.get_service("c1", "svc1").await.unwrap(), svc);
        assert!(matches!(
            db.create_service(&svc).await,
            Err(CoreError::AlreadyExists(_))
        ));
        db.delete_service("c1", "svc1").await.unwrap();
        assert!(matches!(
            db.get_service("c1", "svc1").await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            db.delete_service("c1", "svc1").await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn conditional_attr_update() {
        let db = MemCatalog::new();
        let attr = test_attr("uuid1", 3);
        db.create_service_attr(&attr).await.unwrap();

        let active = attr.with_status(ServiceStatus::Active);
        db.update_service_attr(&attr, &active).await.unwrap();

        // The original prior is now stale.
        let another = attr.with_status(ServiceStatus::Deleting);
        assert!(matches!(
            db.update_service_attr(&attr, &another).await,
            Err(CoreError::VersionMismatch(_))
        ));

        let stored = db.get_service_attr("uuid1").await.unwrap();
        assert_eq!(stored.status, ServiceStatus::Active);
    }

    #[tokio::test]
    async fn conditional_update_ignores_mtime_drift() {
        let db = MemCatalog::new();
        let attr = test_attr("uuid1", 3);
        db.create_service_attr(&attr).await.unwrap();

        // A prior read with a different mtime but identical fields
        // must still match.
        let mut stale_read = attr.clone();
        stale_read.last_modified -= 42;
        let active = attr.with_status(ServiceStatus::Active);
        db.update_service_attr(&stale_read, &active).await.unwrap();
    }

    #[tokio::test]
    async fn member_claim_race_single_winner() {
        let db = MemCatalog::new();
        let member = test_member("uuid1", 0);
        db.create_service_member(&member).await.unwrap();

        let claim_a = member.with_owner("task-a", "ci-a", "i-a");
        let claim_b = member.with_owner("task-b", "ci-b", "i-b");

        db.update_service_member(&member, &claim_a).await.unwrap();
        assert!(matches!(
            db.update_service_member(&member, &claim_b).await,
            Err(CoreError::VersionMismatch(_))
        ));

        let stored = db.get_service_member("uuid1", "svc1-0").await.unwrap();
        assert_eq!(stored.server_instance_id, "i-a");
    }

    #[tokio::test]
    async fn list_members_filters_by_service() {
        let db = MemCatalog::new();
        for i in 0..3 {
            db.create_service_member(&test_member("uuid1", i))
                .await
                .unwrap();
        }
        db.create_service_member(&test_member("uuid2", 0))
            .await
            .unwrap();

        let members = db.list_service_members("uuid1").await.unwrap();
        assert_eq!(members.len(), 3);
        assert!(members.iter().all(|m| m.service_uuid == "uuid1"));
    }

    #[tokio::test]
    async fn config_file_md5_enforced_on_write_and_read() {
        let db = MemCatalog::new();
        let file = ConfigFile::new(
            "uuid1".into(),
            "f1".into(),
            "c.conf".into(),
            0o644,
            b"hello".to_vec(),
        );
        db.create_config_file(&file).await.unwrap();
        let read = db.get_config_file("uuid1", "f1").await.unwrap();
        assert_eq!(read.file_md5, md5_hex(b"hello"));

        let mut corrupt = file.clone();
        corrupt.file_id = "f2".into();
        corrupt.content = b"tampered".to_vec();
        assert!(matches!(
            db.create_config_file(&corrupt).await,
            Err(CoreError::CorruptConfig(_))
        ));
    }

    #[tokio::test]
    async fn static_ip_rehoming() {
        let db = MemCatalog::new();
        let ip = ServiceStaticIP {
            static_ip: "10.0.0.9".into(),
            service_uuid: "uuid1".into(),
            availability_zone: "az-1".into(),
            server_instance_id: "i-old".into(),
            network_interface_id: "eni-old".into(),
        };
        db.create_service_static_ip(&ip).await.unwrap();

        let moved = ip.with_owner("i-new", "eni-new");
        db.update_service_static_ip(&ip, &moved).await.unwrap();

        // The stale prior loses.
        let moved_again = ip.with_owner("i-other", "eni-other");
        assert!(matches!(
            db.update_service_static_ip(&ip, &moved_again).await,
            Err(CoreError::VersionMismatch(_))
        ));
        let stored = db.get_service_static_ip("10.0.0.9").await.unwrap();
        assert_eq!(stored.server_instance_id, "i-new");
    }

    #[tokio::test]
    async fn device_reservation() {
        let db = MemCatalog::new();
        let dev = Device {
            cluster: "c1".into(),
            device_name: "/dev/xvdf".into(),
            service_name: "svc1".into(),
        };
        db.create_device(&dev).await.unwrap();
        // Second service cannot reserve the same device letter.
        let other = Device {
            service_name: "svc2".into(),
            ..dev.clone()
        };
        assert!(matches!(
            db.create_device(&other).await,
            Err(CoreError::AlreadyExists(_))
        ));
        db.delete_device("c1", "/dev/xvdf").await.unwrap();
    }
}
