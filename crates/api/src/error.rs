//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::OrderError;
use fulfillment::FulfillmentError;
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Use case error.
    Fulfillment(FulfillmentError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::Map::new();
        let status = match self {
            ApiError::NotFound(msg) => {
                body.insert("error".into(), msg.into());
                StatusCode::NOT_FOUND
            }
            ApiError::BadRequest(msg) => {
                body.insert("error".into(), msg.into());
                StatusCode::BAD_REQUEST
            }
            ApiError::Fulfillment(err) => {
                let status = fulfillment_status(&err);
                if let FulfillmentError::PaymentInProgress {
                    confirmation_url: Some(url),
                    ..
                } = &err
                {
                    body.insert("confirmation_url".into(), url.clone().into());
                }
                if status.is_server_error() {
                    tracing::error!(error = %err, "internal server error");
                }
                body.insert("error".into(), err.to_string().into());
                status
            }
        };

        (status, axum::Json(serde_json::Value::Object(body))).into_response()
    }
}

fn fulfillment_status(err: &FulfillmentError) -> StatusCode {
    match err {
        FulfillmentError::Order(order_err) => match order_err {
            OrderError::InvalidState { .. } => StatusCode::CONFLICT,
            OrderError::NoItems
            | OrderError::InvalidQuantity { .. }
            | OrderError::InvalidPrice { .. }
            | OrderError::DuplicateProduct { .. }
            | OrderError::BlankAddress
            | OrderError::TotalOverflow { .. } => StatusCode::BAD_REQUEST,
            OrderError::ProductNotFound { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            OrderError::TotalMismatch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        },
        FulfillmentError::OrderNotFound(_) | FulfillmentError::PaymentNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        FulfillmentError::AlreadyProcessed(_)
        | FulfillmentError::PaymentInProgress { .. }
        | FulfillmentError::RefundRequired { .. }
        | FulfillmentError::Payment(_)
        | FulfillmentError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
        FulfillmentError::InsufficientStock { .. } | FulfillmentError::ProductNotFound(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        FulfillmentError::Gateway(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        ApiError::Fulfillment(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderId;
    use domain::OrderState;

    #[test]
    fn test_state_conflicts_map_to_409() {
        let err = FulfillmentError::Order(OrderError::InvalidState {
            actual: OrderState::Closed,
            attempted: OrderState::Cancelled,
        });
        assert_eq!(fulfillment_status(&err), StatusCode::CONFLICT);
        assert_eq!(
            fulfillment_status(&FulfillmentError::AlreadyProcessed(OrderId::new())),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_overflowing_total_is_bad_request() {
        let err = FulfillmentError::Order(OrderError::TotalOverflow {
            product_id: "P-1".into(),
        });
        assert_eq!(fulfillment_status(&err), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_missing_resources_map_to_404() {
        assert_eq!(
            fulfillment_status(&FulfillmentError::OrderNotFound(OrderId::new())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            fulfillment_status(&FulfillmentError::PaymentNotFound("ext-1".into())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_store_failures_are_internal() {
        let err = FulfillmentError::Store(StoreError::Corrupt {
            entity: "order",
            id: "x".into(),
            reason: "bad".into(),
        });
        assert_eq!(fulfillment_status(&err), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
