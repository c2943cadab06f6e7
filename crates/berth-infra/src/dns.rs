//! DNS provider adapter.
//!
//! Members get DNS names of the form `<memberName>.<domainName>` under
//! a hosted zone. The driver only ever needs A-record upsert and
//! delete; updates are not ordered with respect to volume attach, so
//! clients resolving a member name must tolerate a briefly stale
//! answer.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use berth_core::{CoreError, CoreResult};

/// A-record management for member hostnames.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Create or replace the A-record `name` -> `ip` in the zone.
    async fn upsert_a(&self, hosted_zone_id: &str, name: &str, ip: &str) -> CoreResult<()>;

    /// Delete the A-record. Deleting an absent record is not an error.
    async fn delete_a(&self, hosted_zone_id: &str, name: &str) -> CoreResult<()>;

    /// Resolve the record, `NotFound` when absent.
    async fn lookup_a(&self, hosted_zone_id: &str, name: &str) -> CoreResult<String>;
}

/// HashMap-backed DNS double.
#[derive(Default)]
pub struct MemDns {
    records: Mutex<HashMap<(String, String), String>>,
}

impl MemDns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in the zone. Test hook.
    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl DnsProvider for MemDns {
    async fn upsert_a(&self, hosted_zone_id: &str, name: &str, ip: &str) -> CoreResult<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                (hosted_zone_id.to_string(), name.to_string()),
                ip.to_string(),
            );
        Ok(())
    }

    async fn delete_a(&self, hosted_zone_id: &str, name: &str) -> CoreResult<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(hosted_zone_id.to_string(), name.to_string()));
        Ok(())
    }

    async fn lookup_a(&self, hosted_zone_id: &str, name: &str) -> CoreResult<String> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(hosted_zone_id.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("A record {name}")))
    }
}

/// DNS name for a member under a service domain.
pub fn member_dns_name(member_name: &str, domain_name: &str) -> String {
    format!("{member_name}.{domain_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_replaces_existing() {
        let dns = MemDns::new();
        dns.upsert_a("zone-1", "svc-0.example.com", "10.0.0.1")
            .await
            .unwrap();
        dns.upsert_a("zone-1", "svc-0.example.com", "10.0.0.2")
            .await
            .unwrap();
        assert_eq!(
            dns.lookup_a("zone-1", "svc-0.example.com").await.unwrap(),
            "10.0.0.2"
        );
        assert_eq!(dns.record_count(), 1);
    }

    #[tokio::test]
    async fn delete_absent_is_noop() {
        let dns = MemDns::new();
        dns.delete_a("zone-1", "nope.example.com").await.unwrap();
        assert!(matches!(
            dns.lookup_a("zone-1", "nope.example.com").await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn dns_names() {
        assert_eq!(
            member_dns_name("mysql-0", "db.example.com"),
            "mysql-0.db.example.com"
        );
    }
}
