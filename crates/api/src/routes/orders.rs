//! Staff order endpoints and payment triggers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{OrderId, UserId};
use domain::{AbsenceStrategy, ItemQuantity, NewOrder, OrderItem, OrderRecord};
use fulfillment::{
    ConfirmOutcome, InMemoryErpGateway, InMemoryPaymentGateway, Job, OrderService,
    PaymentCoordinator, PaymentInitiation,
};
use serde::{Deserialize, Serialize};
use store::Store;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub order_service: OrderService<S>,
    pub payments: PaymentCoordinator<S, InMemoryPaymentGateway>,
    /// Background jobs by name, for on-demand runs.
    pub jobs: HashMap<&'static str, Arc<dyn Job>>,
    pub gateway: InMemoryPaymentGateway,
    pub erp: InMemoryErpGateway,
    pub store: S,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub delivery_address: String,
    #[serde(default)]
    pub absence_strategy: AbsenceStrategy,
}

#[derive(Deserialize)]
pub struct UpdateItemsRequest {
    pub items: Vec<ItemQuantity>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub order_id: OrderId,
    pub state: String,
    pub total: i64,
}

#[derive(Serialize)]
pub struct ConfirmResponse {
    pub outcome: ConfirmOutcome,
}

// -- Handlers --

/// POST /orders: place a new order.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    let cmd = NewOrder::new(req.user_id, req.items, req.delivery_address)
        .with_absence_strategy(req.absence_strategy);
    let order = state.order_service.create_order(cmd).await?;

    let response = OrderCreatedResponse {
        order_id: order.id(),
        state: order.state().to_string(),
        total: order.total().minor(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /orders/{id}: load one order.
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderRecord>, ApiError> {
    let order = state.order_service.get_order(parse_order_id(&id)?).await?;
    Ok(Json(OrderRecord::from(&order)))
}

/// POST /orders/{id}/picking: start picking.
#[tracing::instrument(skip(state))]
pub async fn start_picking<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderRecord>, ApiError> {
    let order = state.order_service.start_picking(parse_order_id(&id)?).await?;
    Ok(Json(OrderRecord::from(&order)))
}

/// PUT /orders/{id}/items: replace lines with the picked list.
#[tracing::instrument(skip(state, req))]
pub async fn update_items<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateItemsRequest>,
) -> Result<Json<OrderRecord>, ApiError> {
    let order = state
        .order_service
        .update_items(parse_order_id(&id)?, req.items)
        .await?;
    Ok(Json(OrderRecord::from(&order)))
}

/// POST /orders/{id}/picking/complete: hand the order over to payment.
#[tracing::instrument(skip(state))]
pub async fn complete_picking<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderRecord>, ApiError> {
    let order = state
        .order_service
        .complete_picking(parse_order_id(&id)?)
        .await?;
    Ok(Json(OrderRecord::from(&order)))
}

/// POST /orders/{id}/close: delivered, done.
#[tracing::instrument(skip(state))]
pub async fn close<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderRecord>, ApiError> {
    let order = state.order_service.close_order(parse_order_id(&id)?).await?;
    Ok(Json(OrderRecord::from(&order)))
}

/// POST /orders/{id}/cancel
#[tracing::instrument(skip(state))]
pub async fn cancel<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderRecord>, ApiError> {
    let order = state.order_service.cancel_order(parse_order_id(&id)?).await?;
    Ok(Json(OrderRecord::from(&order)))
}

/// POST /orders/{id}/payment: create a charge at the provider.
#[tracing::instrument(skip(state))]
pub async fn initiate_payment<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<PaymentInitiation>), ApiError> {
    let initiation = state
        .payments
        .initiate_payment(parse_order_id(&id)?)
        .await?;
    Ok((StatusCode::CREATED, Json(initiation)))
}

/// POST /orders/{id}/payment/confirm: poll the provider instead of waiting
/// for the webhook.
#[tracing::instrument(skip(state))]
pub async fn confirm_payment<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    let outcome = state
        .payments
        .confirm_payment_manually(parse_order_id(&id)?)
        .await?;
    Ok(Json(ConfirmResponse { outcome }))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
