//! HTTP API server for the order fulfillment core.
//!
//! Provides staff order endpoints, payment initiation and confirmation, the
//! provider webhook and on-demand job runs, with structured logging (tracing)
//! and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod scheduler;

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use fulfillment::{
    InMemoryErpGateway, InMemoryPaymentGateway, Job, JobSettings, OrderPaymentTimeoutJob,
    OrderService, OutboxDispatcher, PaymentCoordinator, PaymentTimeoutJob,
};
use metrics_exporter_prometheus::PrometheusHandle;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::orders::AppState;
use scheduler::ScheduledJob;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + Clone>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/orders", post(routes::orders::create::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/picking", post(routes::orders::start_picking::<S>))
        .route("/orders/{id}/items", put(routes::orders::update_items::<S>))
        .route(
            "/orders/{id}/picking/complete",
            post(routes::orders::complete_picking::<S>),
        )
        .route("/orders/{id}/payment", post(routes::orders::initiate_payment::<S>))
        .route(
            "/orders/{id}/payment/confirm",
            post(routes::orders::confirm_payment::<S>),
        )
        .route("/orders/{id}/close", post(routes::orders::close::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route("/webhooks/payments", post(routes::webhooks::payments::<S>))
        .route("/jobs/{name}/run", post(routes::jobs::run::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state with in-memory provider and ERP gateways,
/// plus the background jobs with their intervals.
pub fn create_default_state<S: Store + Clone>(
    store: S,
    settings: &JobSettings,
    return_url: &str,
) -> (Arc<AppState<S>>, Vec<ScheduledJob>) {
    let gateway = InMemoryPaymentGateway::new();
    let erp = InMemoryErpGateway::new();

    let scheduled = vec![
        ScheduledJob {
            job: Arc::new(PaymentTimeoutJob::new(store.clone(), settings.payment_timeout)),
            interval: settings.payment_sweep_interval,
        },
        ScheduledJob {
            job: Arc::new(OrderPaymentTimeoutJob::new(
                store.clone(),
                settings.order_payment_timeout,
            )),
            interval: settings.order_sweep_interval,
        },
        ScheduledJob {
            job: Arc::new(OutboxDispatcher::new(
                store.clone(),
                erp.clone(),
                settings.outbox_retry_budget,
                settings.outbox_batch_size,
            )),
            interval: settings.outbox_interval,
        },
    ];
    let jobs: HashMap<&'static str, Arc<dyn Job>> = scheduled
        .iter()
        .map(|s| (s.job.name(), s.job.clone()))
        .collect();

    let state = Arc::new(AppState {
        order_service: OrderService::new(store.clone()),
        payments: PaymentCoordinator::new(store.clone(), gateway.clone(), return_url),
        jobs,
        gateway,
        erp,
        store,
    });

    (state, scheduled)
}
