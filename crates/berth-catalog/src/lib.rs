//! berth-catalog — the persistent service-member catalog.
//!
//! The catalog is the single source of truth for services, members,
//! config files, static IPs, and device reservations. It is strongly
//! consistent and exposes one crucial primitive beyond CRUD: the
//! conditional update, which takes the prior value the caller read and
//! fails with `VersionMismatch` when the stored value differs. All
//! cross-host coordination (the claim protocol) rests on it.
//!
//! Three realizations of the [`Catalog`] trait ship here:
//!
//! - [`MemCatalog`] — HashMaps behind a mutex; tests and embedding.
//! - [`RedbCatalog`] — redb-backed persistent store; conditional
//!   updates run inside a single write transaction.
//! - [`RemoteCatalog`] — client for the catalog daemon, speaking a
//!   length-prefixed JSON RPC (see [`wire`]).
//!
//! The daemon side lives in [`server`], wrapping any `Catalog` behind
//! the same wire protocol under a single writer.

pub mod catalog;
pub mod client;
pub mod mem;
pub mod redb_store;
pub mod server;
pub mod tables;
pub mod wire;

pub use catalog::Catalog;
pub use client::RemoteCatalog;
pub use mem::MemCatalog;
pub use redb_store::RedbCatalog;
pub use server::CatalogServer;
