//! Principal store implementations
//!
//! - [`memory`] -- DashMap-backed store for tests and single-process use.
//! - [`principal`] -- Postgres store (feature `postgres`).

pub mod memory;
#[cfg(feature = "postgres")]
pub mod principal;

pub use memory::MemoryPrincipalStore;
#[cfg(feature = "postgres")]
pub use principal::PgPrincipalStore;
