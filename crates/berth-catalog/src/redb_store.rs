//! redb-backed catalog.
//!
//! Persistent [`Catalog`] used by the catalog daemon and by single-node
//! deployments. Entities are JSON-serialized into redb's `&[u8]` value
//! columns; conditional updates read, compare, and write inside one
//! write transaction, so the compare-and-set is atomic under the
//! store's single writer.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use berth_core::{
    config_file_key, device_key, member_key, service_key, ConfigFile, CoreError, CoreResult,
    Device, Service, ServiceAttr, ServiceMember, ServiceStaticIP,
};

use crate::catalog::Catalog;
use crate::tables::*;

/// Convert any `Display` error into a `DbError`.
macro_rules! db_err {
    () => {
        |e| CoreError::DbError(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe persistent catalog backed by redb.
#[derive(Clone)]
pub struct RedbCatalog {
    db: Arc<Database>,
}

impl RedbCatalog {
    /// Open (or create) a catalog database at the given path.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let db = Database::create(path).map_err(db_err!())?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "catalog database opened");
        Ok(store)
    }

    /// Ephemeral in-memory catalog with the same transaction semantics.
    pub fn open_in_memory() -> CoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(db_err!())?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Opening a table in a write transaction creates it if absent.
    fn ensure_tables(&self) -> CoreResult<()> {
        let txn = self.db.begin_write().map_err(db_err!())?;
        for table in [
            DEVICES,
            SERVICES,
            SERVICE_ATTRS,
            SERVICE_MEMBERS,
            CONFIG_FILES,
            STATIC_IPS,
        ] {
            txn.open_table(table).map_err(db_err!())?;
        }
        txn.commit().map_err(db_err!())?;
        Ok(())
    }

    fn create<T: Serialize>(&self, table: Table, key: &str, value: &T) -> CoreResult<()> {
        let bytes = serde_json::to_vec(value).map_err(db_err!())?;
        let txn = self.db.begin_write().map_err(db_err!())?;
        {
            let mut t = txn.open_table(table).map_err(db_err!())?;
            let present = t.get(key).map_err(db_err!())?.is_some();
            if present {
                return Err(CoreError::AlreadyExists(key.to_string()));
            }
            t.insert(key, bytes.as_slice()).map_err(db_err!())?;
        }
        txn.commit().map_err(db_err!())?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> CoreResult<T> {
        let txn = self.db.begin_read().map_err(db_err!())?;
        let t = txn.open_table(table).map_err(db_err!())?;
        match t.get(key).map_err(db_err!())? {
            Some(guard) => serde_json::from_slice(guard.value()).map_err(db_err!()),
            None => Err(CoreError::NotFound(key.to_string())),
        }
    }

    /// Compare-and-set: replace the record at `key` with `new` iff the
    /// stored record matches `prior` under `same`.
    fn update<T>(
        &self,
        table: Table,
        key: &str,
        prior: &T,
        new: &T,
        same: impl Fn(&T, &T) -> bool,
    ) -> CoreResult<()>
    where
        T: Serialize + DeserializeOwned,
    {
        let bytes = serde_json::to_vec(new).map_err(db_err!())?;
        let txn = self.db.begin_write().map_err(db_err!())?;
        {
            let mut t = txn.open_table(table).map_err(db_err!())?;
            let current: T = match t.get(key).map_err(db_err!())? {
                Some(guard) => serde_json::from_slice(guard.value()).map_err(db_err!())?,
                None => return Err(CoreError::NotFound(key.to_string())),
            };
            if !same(&current, prior) {
                return Err(CoreError::VersionMismatch(key.to_string()));
            }
            t.insert(key, bytes.as_slice()).map_err(db_err!())?;
        }
        txn.commit().map_err(db_err!())?;
        Ok(())
    }

    fn delete(&self, table: Table, key: &str) -> CoreResult<()> {
        let txn = self.db.begin_write().map_err(db_err!())?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(db_err!())?;
            existed = t.remove(key).map_err(db_err!())?.is_some();
        }
        txn.commit().map_err(db_err!())?;
        if existed {
            Ok(())
        } else {
            Err(CoreError::NotFound(key.to_string()))
        }
    }

    fn scan<T: DeserializeOwned>(
        &self,
        table: Table,
        prefix: Option<&str>,
    ) -> CoreResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(db_err!())?;
        let t = txn.open_table(table).map_err(db_err!())?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(db_err!())? {
            let (key, value) = entry.map_err(db_err!())?;
            if let Some(prefix) = prefix {
                if !key.value().starts_with(prefix) {
                    continue;
                }
            }
            results.push(serde_json::from_slice(value.value()).map_err(db_err!())?);
        }
        Ok(results)
    }
}

#[async_trait]
impl Catalog for RedbCatalog {
    async fn create_device(&self, device: &Device) -> CoreResult<()> {
        self.create(DEVICES, &device.table_key(), device)
    }

    async fn get_device(&self, cluster: &str, device_name: &str) -> CoreResult<Device> {
        self.get(DEVICES, &device_key(cluster, device_name))
    }

    async fn delete_device(&self, cluster: &str, device_name: &str) -> CoreResult<()> {
        self.delete(DEVICES, &device_key(cluster, device_name))
    }

    async fn create_service(&self, service: &Service) -> CoreResult<()> {
        self.create(SERVICES, &service.table_key(), service)
    }

    async fn get_service(&self, cluster: &str, service_name: &str) -> CoreResult<Service> {
        self.get(SERVICES, &service_key(cluster, service_name))
    }

    async fn list_services(&self) -> CoreResult<Vec<Service>> {
        self.scan(SERVICES, None)
    }

    async fn delete_service(&self, cluster: &str, service_name: &str) -> CoreResult<()> {
        self.delete(SERVICES, &service_key(cluster, service_name))
    }

    async fn create_service_attr(&self, attr: &ServiceAttr) -> CoreResult<()> {
        self.create(SERVICE_ATTRS, &attr.service_uuid, attr)
    }

    async fn get_service_attr(&self, service_uuid: &str) -> CoreResult<ServiceAttr> {
        self.get(SERVICE_ATTRS, service_uuid)
    }

    async fn update_service_attr(&self, prior: &ServiceAttr, new: &ServiceAttr) -> CoreResult<()> {
        if prior.service_uuid != new.service_uuid {
            return Err(CoreError::InvalidArgs(
                "prior and new service attr disagree on uuid".to_string(),
            ));
        }
        self.update(
            SERVICE_ATTRS,
            &prior.service_uuid,
            prior,
            new,
            ServiceAttr::same_except_mtime,
        )
    }

    async fn delete_service_attr(&self, service_uuid: &str) -> CoreResult<()> {
        self.delete(SERVICE_ATTRS, service_uuid)
    }

    async fn create_service_member(&self, member: &ServiceMember) -> CoreResult<()> {
        self.create(SERVICE_MEMBERS, &member.table_key(), member)
    }

    async fn get_service_member(
        &self,
        service_uuid: &str,
        member_name: &str,
    ) -> CoreResult<ServiceMember> {
        self.get(SERVICE_MEMBERS, &member_key(service_uuid, member_name))
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
        self.update(
            SERVICE_MEMBERS,
            &prior.table_key(),
            prior,
            new,
            ServiceMember::same_except_mtime,
        )
    }

    async fn delete_service_member(
        &self,
        service_uuid: &str,
        member_name: &str,
    ) -> CoreResult<()> {
        self.delete(SERVICE_MEMBERS, &member_key(service_uuid, member_name))
    }

    async fn list_service_members(&self, service_uuid: &str) -> CoreResult<Vec<ServiceMember>> {
        self.scan(SERVICE_MEMBERS, Some(&format!("{service_uuid}/")))
    }

    async fn create_config_file(&self, file: &ConfigFile) -> CoreResult<()> {
        file.verify()?;
        self.create(CONFIG_FILES, &file.table_key(), file)
    }

    async fn get_config_file(&self, service_uuid: &str, file_id: &str) -> CoreResult<ConfigFile> {
        let file: ConfigFile = self.get(CONFIG_FILES, &config_file_key(service_uuid, file_id))?;
        file.verify()?;
        Ok(file)
    }

    async fn delete_config_file(&self, service_uuid: &str, file_id: &str) -> CoreResult<()> {
        self.delete(CONFIG_FILES, &config_file_key(service_uuid, file_id))
    }

    async fn create_service_static_ip(&self, ip: &ServiceStaticIP) -> CoreResult<()> {
        self.create(STATIC_IPS, &ip.static_ip, ip)
    }

    async fn get_service_static_ip(&self, static_ip: &str) -> CoreResult<ServiceStaticIP> {
        self.get(STATIC_IPS, static_ip)
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
        self.update(STATIC_IPS, &prior.static_ip, prior, new, |a, b| a == b)
    }

    async fn delete_service_static_ip(&self, static_ip: &str) -> CoreResult<()> {
        self.delete(STATIC_IPS, static_ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::{
        MemberVolumes, ServiceStatus, ServiceVolume, ServiceVolumes, VolumeType, DEFAULT_HOST_IP,
    };

    fn test_attr(uuid: &str) -> ServiceAttr {
        ServiceAttr::new(
            uuid.to_string(),
            3,
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
            false,
            String::new(),
            String::new(),
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
            MemberVolumes::default(),
            DEFAULT_HOST_IP.to_string(),
            vec![],
        )
    }

    #[tokio::test]
    async fn attr_round_trip_and_cas() {
        let db = RedbCatalog::open_in_memory().unwrap();
        let attr = test_attr("uuid1");
        db.create_service_attr(&attr).await.unwrap();

        let active = attr.with_status(ServiceStatus::Active);
        db.update_service_attr(&attr, &active).await.unwrap();
        assert!(matches!(
            db.update_service_attr(&attr, &active).await,
            Err(CoreError::VersionMismatch(_))
        ));
        assert_eq!(
            db.get_service_attr("uuid1").await.unwrap().status,
            ServiceStatus::Active
        );
    }

    #[tokio::test]
    async fn member_prefix_scan_does_not_leak_across_services() {
        let db = RedbCatalog::open_in_memory().unwrap();
        // "uuid1" is a key prefix of "uuid10"; the separator in the
        // composite key must keep their members apart.
        for uuid in ["uuid1", "uuid10"] {
            for i in 0..2 {
                db.create_service_member(&test_member(uuid, i)).await.unwrap();
            }
        }
        let members = db.list_service_members("uuid1").await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|m| m.service_uuid == "uuid1"));
    }

    #[tokio::test]
    async fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.redb");
        {
            let db = RedbCatalog::open(&path).unwrap();
            db.create_service_attr(&test_attr("uuid1")).await.unwrap();
        }
        let db = RedbCatalog::open(&path).unwrap();
        let attr = db.get_service_attr("uuid1").await.unwrap();
        assert_eq!(attr.service_name, "svc1");
    }

    #[tokio::test]
    async fn delete_reports_absence() {
        let db = RedbCatalog::open_in_memory().unwrap();
        assert!(matches!(
            db.delete_service_attr("nope").await,
            Err(CoreError::NotFound(_))
        ));
    }
}
