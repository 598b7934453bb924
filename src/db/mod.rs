//! Persistence layer. Handlers reach the database only through a
//! [`Session`] handed to them by the lifecycle.

pub mod content;
pub mod error;
pub mod pool;
pub mod session;

pub use error::DbError;
pub use pool::{Lease, PoolError, PoolSettings, ResourcePool};
pub use session::Session;
