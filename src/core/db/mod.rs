//! Identity store seam
//!
//! The session core reads and writes principals only through the
//! [`PrincipalStore`] trait. Two implementations ship with the crate: an
//! in-memory store and, behind the `postgres` feature, an SQLx store.

pub mod models;
#[cfg(feature = "postgres")]
pub mod pool;
pub mod repositories;
pub mod store;

pub use models::{CreatePrincipal, Principal, PrincipalView};
#[cfg(feature = "postgres")]
pub use pool::{DbConfig, DbError, create_pool, create_pool_with_migrations};
#[cfg(feature = "postgres")]
pub use repositories::PgPrincipalStore;
pub use repositories::MemoryPrincipalStore;
pub use store::{PrincipalStore, StoreError};
