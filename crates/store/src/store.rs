use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::StoreError;
use crate::repository::{OrderRepository, OutboxRepository, PaymentRepository, ProductRepository};

/// Repository handles bound to one connection or transaction.
///
/// Every handle returned by the same unit of work observes the same
/// snapshot and commits or rolls back together.
pub trait UnitOfWork: Send {
    fn orders(&mut self) -> &mut dyn OrderRepository;
    fn payments(&mut self) -> &mut dyn PaymentRepository;
    fn products(&mut self) -> &mut dyn ProductRepository;
    fn outbox(&mut self) -> &mut dyn OutboxRepository;
}

/// Core trait for storage backends.
///
/// Both entry points take a closure receiving the unit of work and returning
/// a boxed future, in the same shape as `sqlx::Connection::transaction`:
///
/// ```ignore
/// store
///     .transaction(move |uow| Box::pin(async move {
///         let order = uow.orders().find_by_id(order_id).await?;
///         Ok::<_, StoreError>(order)
///     }))
///     .await
/// ```
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Runs `work` in a single SERIALIZABLE transaction.
    ///
    /// The transaction commits if `work` returns `Ok` and rolls back if it
    /// returns `Err`. A failed commit is reported as `E::from(StoreError)`.
    async fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: for<'u> FnOnce(&'u mut dyn UnitOfWork) -> BoxFuture<'u, Result<T, E>> + Send + 'static;

    /// Runs `work` against an autocommit connection.
    ///
    /// Each repository call is its own statement; nothing is rolled back on
    /// error. Meant for cheap pre-checks, listings and single-row updates.
    async fn query<T, E, F>(&self, work: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: for<'u> FnOnce(&'u mut dyn UnitOfWork) -> BoxFuture<'u, Result<T, E>> + Send + 'static;
}
