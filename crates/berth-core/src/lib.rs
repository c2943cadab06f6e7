//! berth-core — shared domain model for the berth orchestration layer.
//!
//! Every other crate builds on the types here: the catalog entities
//! (services, members, config files, static IPs, device reservations),
//! the volume-name grammar the container runtime uses to address
//! members, and the error kinds that travel through the volume-plugin
//! protocol as `Err` strings.

pub mod error;
pub mod names;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use names::{member_name, parse_volume_name, ParsedName, JOURNAL_PREFIX, NAME_SEPARATOR};
pub use types::*;

/// Generate a request UUID for log correlation across one driver operation.
pub fn gen_request_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
