//! berth-infra — the infrastructure seams of the volume driver.
//!
//! Three adapter traits wrap everything outside the process: the cloud
//! provider ([`CloudServer`]: block volumes, static IPs at the network
//! layer, host identity), the DNS provider ([`DnsProvider`]), and the
//! container runtime's control plane ([`ContainerSvc`]: which service
//! tasks run on this host). Each ships an in-memory double so the
//! driver is fully testable without cloud credentials.
//!
//! [`IpManager`] is the one OS-facing piece: idempotent add/remove of
//! a secondary address on a local network interface.

pub mod cloud;
pub mod containersvc;
pub mod dns;
pub mod ipmanager;

pub use cloud::{CloudServer, CreateVolumeOptions, LoopCloudServer};
pub use containersvc::{ContainerSvc, MemContainerSvc};
pub use dns::{member_dns_name, DnsProvider, MemDns};
pub use ipmanager::{CommandRunner, IpManager, SysCommandRunner};
