//! berth-driver — the node-local volume driver.
//!
//! When the container runtime asks to mount a named volume, the driver
//! turns that into a member identity: it picks the replica slot this
//! host should impersonate, claims it in the catalog through a
//! conditional update, attaches the backing block volume, re-homes the
//! member's static IP, updates DNS, formats and mounts the filesystem,
//! and materializes the member's config files. Unmount reverses the
//! host-local side; the catalog claim is sticky by design.
//!
//! The driver is polymorphic over the catalog and every infrastructure
//! adapter, so the whole state machine runs against in-memory doubles
//! in tests.

pub mod driver;
pub mod fsops;
pub mod materialize;
pub mod selector;

pub use driver::{DriverConfig, VolumeDriver};
pub use fsops::{FsOps, MemFsOps, SysFsOps};
pub use selector::{select_member, HostInfo};
