//! Volume-name grammar.
//!
//! The container runtime addresses a member's volume by name:
//!
//! ```text
//! name = <serviceUUID>                 primary volume, no slot hint
//!      | <serviceUUID>-<N>            primary volume, slot N (1-based)
//!      | journal_<serviceUUID>        journal volume, no slot hint
//!      | journal_<serviceUUID>-<N>    journal volume, slot N
//! ```
//!
//! The on-disk mount path is derived from the path key alone (the UUID,
//! or the journal-prefixed UUID); the `-N` suffix is a placement hint
//! for the scheduler and never changes the path. Service UUIDs contain
//! no `-`, so a single trailing `-<digits>` is unambiguous.

use crate::error::{CoreError, CoreResult};

/// Prefix marking a journal (write-ahead log) volume name.
pub const JOURNAL_PREFIX: &str = "journal";

/// Separator between the journal prefix and the service UUID.
pub const NAME_SEPARATOR: &str = "_";

const MEMBER_SEPARATOR: char = '-';

/// A parsed volume name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub service_uuid: String,
    /// Key the mount path is derived from: the UUID, or `journal_<UUID>`.
    pub path_key: String,
    /// Zero-based member index, or -1 when the name carries no slot.
    pub member_index: i64,
    pub journal: bool,
}

/// Parse a volume name from the container runtime.
pub fn parse_volume_name(name: &str) -> CoreResult<ParsedName> {
    let journal_prefix = format!("{JOURNAL_PREFIX}{NAME_SEPARATOR}");
    let (journal, rest) = match name.strip_prefix(&journal_prefix) {
        Some(rest) => (true, rest),
        None => (false, name),
    };

    let parts: Vec<&str> = rest.split(MEMBER_SEPARATOR).collect();
    let (uuid, member_index) = match parts.as_slice() {
        [uuid] => (*uuid, -1),
        [uuid, slot] => {
            let slot: i64 = slot
                .parse()
                .map_err(|_| CoreError::InvalidArgs(format!("bad slot in volume name {name}")))?;
            (*uuid, slot - 1)
        }
        _ => {
            return Err(CoreError::InvalidArgs(format!(
                "malformed volume name {name}"
            )))
        }
    };
    if uuid.is_empty() {
        return Err(CoreError::InvalidArgs(format!(
            "empty service uuid in volume name {name}"
        )));
    }

    let path_key = if journal {
        format!("{journal_prefix}{uuid}")
    } else {
        uuid.to_string()
    };

    Ok(ParsedName {
        service_uuid: uuid.to_string(),
        path_key,
        member_index,
        journal,
    })
}

/// Member name for a replica slot: `<serviceName>-<index>`.
pub fn member_name(service_name: &str, index: i64) -> String {
    format!("{service_name}{MEMBER_SEPARATOR}{index}")
}

/// Journal path key for a service UUID: `journal_<UUID>`.
pub fn journal_path_key(service_uuid: &str) -> String {
    format!("{JOURNAL_PREFIX}{NAME_SEPARATOR}{service_uuid}")
}
