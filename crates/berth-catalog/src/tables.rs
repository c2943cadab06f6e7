//! redb table definitions for the catalog.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized
//! entities). Composite keys follow `{cluster}/{name}` for the
//! directory tables and `{service_uuid}/{child}` for child tables, so
//! per-service records sit under a common prefix.

use redb::TableDefinition;

/// Device reservations keyed by `{cluster}/{device_name}`.
pub const DEVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("devices");

/// Service directory keyed by `{cluster}/{service_name}`.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");

/// Service attributes keyed by `{service_uuid}`.
pub const SERVICE_ATTRS: TableDefinition<&str, &[u8]> = TableDefinition::new("service_attrs");

/// Service members keyed by `{service_uuid}/{member_name}`.
pub const SERVICE_MEMBERS: TableDefinition<&str, &[u8]> = TableDefinition::new("service_members");

/// Config file revisions keyed by `{service_uuid}/{file_id}`.
pub const CONFIG_FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("config_files");

/// Static IP records keyed by the IP itself.
pub const STATIC_IPS: TableDefinition<&str, &[u8]> = TableDefinition::new("static_ips");
