use std::ops::DerefMut;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, OutboxEventId, PaymentId, UserId};
use domain::{
    Money, Order, OrderItem, OrderRecord, OrderState, OutboxEvent, Payment, PaymentStatus,
    Product, ProductId,
};
use futures_util::future::BoxFuture;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::repository::{OrderRepository, OutboxRepository, PaymentRepository, ProductRepository};
use crate::store::{Store, UnitOfWork};
use crate::{Result, StoreError};

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn transaction<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: for<'u> FnOnce(&'u mut dyn UnitOfWork) -> BoxFuture<'u, std::result::Result<T, E>>
            + Send
            + 'static,
    {
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;

        let mut uow = PgUnitOfWork { conn: tx };
        let result = work(&mut uow).await;
        match result {
            Ok(value) => {
                uow.conn.commit().await.map_err(StoreError::from)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = uow.conn.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn query<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: for<'u> FnOnce(&'u mut dyn UnitOfWork) -> BoxFuture<'u, std::result::Result<T, E>>
            + Send
            + 'static,
    {
        let conn = self.pool.acquire().await.map_err(StoreError::from)?;
        let mut uow = PgUnitOfWork { conn };
        work(&mut uow).await
    }
}

/// Repositories over a single connection, either pooled or inside a
/// transaction.
struct PgUnitOfWork<C> {
    conn: C,
}

impl<C> UnitOfWork for PgUnitOfWork<C>
where
    C: DerefMut<Target = PgConnection> + Send,
{
    fn orders(&mut self) -> &mut dyn OrderRepository {
        self
    }

    fn payments(&mut self) -> &mut dyn PaymentRepository {
        self
    }

    fn products(&mut self) -> &mut dyn ProductRepository {
        self
    }

    fn outbox(&mut self) -> &mut dyn OutboxRepository {
        self
    }
}

const ORDER_COLUMNS: &str = "id, user_id, items, total, state, delivery_address, absence_strategy, created_at, updated_at";
const PAYMENT_COLUMNS: &str =
    "id, order_id, amount, status, external_id, confirmation_url, created_at";
const OUTBOX_COLUMNS: &str =
    "id, event_type, payload, created_at, processed_at, failed_at, error, retry_count";

fn row_to_order(row: PgRow) -> Result<Order> {
    let id = OrderId::from_uuid(row.try_get::<Uuid, _>("id")?);
    let items: Vec<OrderItem> = serde_json::from_value(row.try_get("items")?)?;
    let state: String = row.try_get("state")?;
    let absence: String = row.try_get("absence_strategy")?;

    let record = OrderRecord {
        id,
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        items,
        total: Money::from_minor(row.try_get("total")?),
        state: state
            .parse()
            .map_err(|e: String| StoreError::corrupt("order", id, e))?,
        delivery_address: row.try_get("delivery_address")?,
        absence_strategy: absence
            .parse()
            .map_err(|e: String| StoreError::corrupt("order", id, e))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    };
    Order::try_from(record).map_err(|e| StoreError::corrupt("order", id, e))
}

fn row_to_payment(row: PgRow) -> Result<Payment> {
    let id = PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?);
    let status: String = row.try_get("status")?;

    Ok(Payment {
        id,
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        amount: Money::from_minor(row.try_get("amount")?),
        status: status
            .parse::<PaymentStatus>()
            .map_err(|e| StoreError::corrupt("payment", id, e))?,
        external_id: row.try_get("external_id")?,
        confirmation_url: row.try_get("confirmation_url")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_product(row: PgRow) -> Result<Product> {
    let id: String = row.try_get("id")?;
    let available: i32 = row.try_get("available")?;
    let available =
        u32::try_from(available).map_err(|e| StoreError::corrupt("product", &id, e))?;

    Ok(Product {
        id: ProductId::new(id),
        name: row.try_get("name")?,
        article: row.try_get("article")?,
        price: Money::from_minor(row.try_get("price")?),
        available,
    })
}

fn row_to_outbox(row: PgRow) -> Result<OutboxEvent> {
    let id = OutboxEventId::from_uuid(row.try_get::<Uuid, _>("id")?);
    let retry_count: i32 = row.try_get("retry_count")?;

    Ok(OutboxEvent {
        id,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
        failed_at: row.try_get("failed_at")?,
        error: row.try_get("error")?,
        retry_count: u32::try_from(retry_count)
            .map_err(|e| StoreError::corrupt("outbox event", id, e))?,
    })
}

#[async_trait]
impl<C> OrderRepository for PgUnitOfWork<C>
where
    C: DerefMut<Target = PgConnection> + Send,
{
    async fn find_by_id(&mut self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.conn)
            .await?;

        row.map(row_to_order).transpose()
    }

    async fn save(&mut self, order: &Order) -> Result<()> {
        let items = serde_json::to_value(order.items())?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, items, total, state, delivery_address, absence_strategy, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                items = EXCLUDED.items,
                total = EXCLUDED.total,
                state = EXCLUDED.state,
                delivery_address = EXCLUDED.delivery_address,
                absence_strategy = EXCLUDED.absence_strategy,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.user_id().as_uuid())
        .bind(items)
        .bind(order.total().minor())
        .bind(order.state().as_str())
        .bind(order.delivery_address())
        .bind(order.absence_strategy().as_str())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    async fn find_by_state(
        &mut self,
        state: OrderState,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE state = $1 AND updated_at < $2 ORDER BY updated_at ASC"
        ))
        .bind(state.as_str())
        .bind(updated_before)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter().map(row_to_order).collect()
    }
}

#[async_trait]
impl<C> PaymentRepository for PgUnitOfWork<C>
where
    C: DerefMut<Target = PgConnection> + Send,
{
    async fn find_by_id(&mut self, id: PaymentId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(row_to_payment).transpose()
    }

    async fn find_by_external_id(&mut self, external_id: &str) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(row_to_payment).transpose()
    }

    async fn find_pending_by_order(&mut self, order_id: OrderId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 AND status = 'PENDING'"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(row_to_payment).transpose()
    }

    async fn find_pending_created_before(
        &mut self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE status = 'PENDING' AND created_at < $1 ORDER BY created_at ASC"
        ))
        .bind(created_before)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter().map(row_to_payment).collect()
    }

    async fn save(&mut self, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, amount, status, external_id, confirmation_url, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                external_id = EXCLUDED.external_id,
                confirmation_url = EXCLUDED.confirmation_url
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.amount.minor())
        .bind(payment.status.as_str())
        .bind(payment.external_id.as_deref())
        .bind(payment.confirmation_url.as_deref())
        .bind(payment.created_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl<C> ProductRepository for PgUnitOfWork<C>
where
    C: DerefMut<Target = PgConnection> + Send,
{
    async fn find_by_id(&mut self, id: &ProductId) -> Result<Option<Product>> {
        let row =
            sqlx::query("SELECT id, name, article, price, available FROM products WHERE id = $1")
                .bind(id.as_str())
                .fetch_optional(&mut *self.conn)
                .await?;

        row.map(row_to_product).transpose()
    }

    async fn find_for_update(&mut self, id: &ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            "SELECT id, name, article, price, available FROM products WHERE id = $1 FOR UPDATE",
        )
        .bind(id.as_str())
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(row_to_product).transpose()
    }

    async fn decrement_stock(&mut self, id: &ProductId, quantity: u32) -> Result<()> {
        let amount = i32::try_from(quantity).map_err(|_| StoreError::InsufficientStock {
            product_id: id.clone(),
            requested: quantity,
        })?;

        let result = sqlx::query(
            "UPDATE products SET available = available - $2 WHERE id = $1 AND available >= $2",
        )
        .bind(id.as_str())
        .bind(amount)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InsufficientStock {
                product_id: id.clone(),
                requested: quantity,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<C> OutboxRepository for PgUnitOfWork<C>
where
    C: DerefMut<Target = PgConnection> + Send,
{
    async fn find_by_id(&mut self, id: OutboxEventId) -> Result<Option<OutboxEvent>> {
        let row = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_events WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.conn)
        .await?;

        row.map(row_to_outbox).transpose()
    }

    async fn save(&mut self, event: &OutboxEvent) -> Result<()> {
        let retry_count = i32::try_from(event.retry_count)
            .map_err(|e| StoreError::corrupt("outbox event", event.id, e))?;

        sqlx::query(
            r#"
            INSERT INTO outbox_events (id, event_type, payload, created_at, processed_at, failed_at, error, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                processed_at = EXCLUDED.processed_at,
                failed_at = EXCLUDED.failed_at,
                error = EXCLUDED.error,
                retry_count = EXCLUDED.retry_count
            WHERE outbox_events.processed_at IS NULL AND outbox_events.failed_at IS NULL
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.created_at)
        .bind(event.processed_at)
        .bind(event.failed_at)
        .bind(event.error.as_deref())
        .bind(retry_count)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    async fn find_pending(&mut self, retry_budget: u32, limit: usize) -> Result<Vec<OutboxEvent>> {
        let budget = i32::try_from(retry_budget).unwrap_or(i32::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sqlx::query(&format!(
            r#"
            SELECT {OUTBOX_COLUMNS} FROM outbox_events
            WHERE processed_at IS NULL AND failed_at IS NULL AND retry_count < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#
        ))
        .bind(budget)
        .bind(limit)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter().map(row_to_outbox).collect()
    }

    async fn find_exhausted(
        &mut self,
        retry_budget: u32,
        limit: usize,
    ) -> Result<Vec<OutboxEvent>> {
        let budget = i32::try_from(retry_budget).unwrap_or(i32::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sqlx::query(&format!(
            r#"
            SELECT {OUTBOX_COLUMNS} FROM outbox_events
            WHERE processed_at IS NULL AND failed_at IS NULL AND retry_count >= $1
            ORDER BY created_at ASC
            LIMIT $2
            "#
        ))
        .bind(budget)
        .bind(limit)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.into_iter().map(row_to_outbox).collect()
    }
}
