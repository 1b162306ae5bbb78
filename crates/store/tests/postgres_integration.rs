//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container and need Docker.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::UserId;
use domain::{
    Money, NewOrder, Order, OrderItem, OrderState, OutboxEvent, Payment, PaymentStatus, ProductId,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{PostgresStore, Store, StoreError};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/001_create_tables.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE outbox_events, payments, orders, products")
        .execute(&pool)
        .await
        .unwrap();

    sqlx::query(
        "INSERT INTO products (id, name, article, price, available) VALUES ('P-1', 'Tea', 'T-1', 500, 5)",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresStore::new(pool)
}

fn sample_order() -> Order {
    Order::create(NewOrder::new(
        UserId::new(),
        vec![OrderItem::new("P-1", "Tea", "T-1", Money::from_minor(500), 2)],
        "1 Main St",
    ))
    .unwrap()
}

async fn save_order(store: &PostgresStore, order: &Order) {
    let order = order.clone();
    store
        .transaction(move |uow| Box::pin(async move { uow.orders().save(&order).await }))
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn order_roundtrips_through_jsonb_items() {
    let store = get_test_store().await;
    let order = sample_order().start_picking().unwrap();
    save_order(&store, &order).await;

    let id = order.id();
    let loaded = store
        .query(move |uow| Box::pin(async move { uow.orders().find_by_id(id).await }))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(loaded.id(), order.id());
    assert_eq!(loaded.state(), OrderState::Picking);
    assert_eq!(loaded.items(), order.items());
    assert_eq!(loaded.total(), Money::from_minor(1000));
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn find_by_state_honours_horizon() {
    let store = get_test_store().await;
    let waiting = sample_order()
        .start_picking()
        .unwrap()
        .complete_picking()
        .unwrap();
    save_order(&store, &waiting).await;
    save_order(&store, &sample_order()).await;

    let later = Utc::now() + Duration::minutes(1);
    let found = store
        .query(move |uow| {
            Box::pin(async move { uow.orders().find_by_state(OrderState::Payment, later).await })
        })
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), waiting.id());

    let earlier = Utc::now() - Duration::minutes(1);
    let found = store
        .query(move |uow| {
            Box::pin(async move { uow.orders().find_by_state(OrderState::Payment, earlier).await })
        })
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn decrement_never_goes_below_zero() {
    let store = get_test_store().await;

    store
        .transaction(|uow| {
            Box::pin(async move { uow.products().decrement_stock(&"P-1".into(), 3).await })
        })
        .await
        .unwrap();

    let result = store
        .transaction(|uow| {
            Box::pin(async move { uow.products().decrement_stock(&"P-1".into(), 3).await })
        })
        .await;
    assert!(matches!(
        result,
        Err(StoreError::InsufficientStock { requested: 3, .. })
    ));

    let product = store
        .query(|uow| {
            Box::pin(async move { uow.products().find_for_update(&ProductId::new("P-1")).await })
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product.available, 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn failed_transaction_rolls_back() {
    let store = get_test_store().await;
    let order = sample_order();
    let to_save = order.clone();

    let result = store
        .transaction(move |uow| {
            Box::pin(async move {
                uow.orders().save(&to_save).await?;
                uow.products().decrement_stock(&"P-1".into(), 2).await?;
                uow.products().decrement_stock(&"P-1".into(), 99).await?;
                Ok::<_, StoreError>(())
            })
        })
        .await;
    assert!(result.is_err());

    let id = order.id();
    let (loaded, product) = store
        .query(move |uow| {
            Box::pin(async move {
                let loaded = uow.orders().find_by_id(id).await?;
                let product = uow.products().find_by_id(&"P-1".into()).await?;
                Ok::<_, StoreError>((loaded, product))
            })
        })
        .await
        .unwrap();
    assert!(loaded.is_none());
    assert_eq!(product.unwrap().available, 5);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn second_pending_payment_is_a_conflict() {
    let store = get_test_store().await;
    let order = sample_order();
    save_order(&store, &order).await;

    let first = Payment::pending(order.id(), order.total()).with_external("ext-1", "https://pay/1");
    let second = Payment::pending(order.id(), order.total());

    let saved = first.clone();
    store
        .transaction(move |uow| Box::pin(async move { uow.payments().save(&saved).await }))
        .await
        .unwrap();

    let result = store
        .transaction(move |uow| Box::pin(async move { uow.payments().save(&second).await }))
        .await;
    assert!(matches!(result, Err(StoreError::Conflict(_))));

    let order_id = order.id();
    let pending = store
        .query(move |uow| {
            Box::pin(async move {
                let by_order = uow.payments().find_pending_by_order(order_id).await?;
                let by_external = uow.payments().find_by_external_id("ext-1").await?;
                Ok::<_, StoreError>((by_order, by_external))
            })
        })
        .await
        .unwrap();
    assert_eq!(pending.0.as_ref().map(|p| p.id), Some(first.id));
    assert_eq!(pending.1.map(|p| p.status), Some(PaymentStatus::Pending));
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn outbox_pending_excludes_processed_and_exhausted() {
    let store = get_test_store().await;
    let now = Utc::now();

    let pending = OutboxEvent::new("ORDER_DELIVERED", serde_json::json!({"n": 1}));
    let processed = OutboxEvent::new("ORDER_DELIVERED", serde_json::json!({"n": 2})).mark_processed(now);
    let mut exhausted = OutboxEvent::new("ORDER_DELIVERED", serde_json::json!({"n": 3}));
    exhausted.retry_count = 3;

    let expected = pending.id;
    let (processed_id, exhausted_id) = (processed.id, exhausted.id);
    let reopened = OutboxEvent {
        processed_at: None,
        retry_count: 1,
        ..processed.clone()
    };
    store
        .transaction(move |uow| {
            Box::pin(async move {
                for event in [pending, processed, exhausted] {
                    uow.outbox().save(&event).await?;
                }
                Ok::<_, StoreError>(())
            })
        })
        .await
        .unwrap();

    let found = store
        .query(|uow| Box::pin(async move { uow.outbox().find_pending(3, 50).await }))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, expected);

    let found = store
        .query(|uow| Box::pin(async move { uow.outbox().find_exhausted(3, 50).await }))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, exhausted_id);

    // A finished event is never reopened by a later save.
    store
        .transaction(move |uow| Box::pin(async move { uow.outbox().save(&reopened).await }))
        .await
        .unwrap();
    let stored = store
        .query(move |uow| Box::pin(async move { uow.outbox().find_by_id(processed_id).await }))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.is_processed());
    assert_eq!(stored.retry_count, 0);
}
