//! Persistence ports and adapters for the order fulfillment core.
//!
//! The core only sees the [`Store`] trait and the repository traits; the
//! in-memory and PostgreSQL adapters live here as well.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, MemoryState};
pub use postgres::PostgresStore;
pub use repository::{OrderRepository, OutboxRepository, PaymentRepository, ProductRepository};
pub use store::{Store, UnitOfWork};
