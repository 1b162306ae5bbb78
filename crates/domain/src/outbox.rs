//! Transactional outbox records.
//!
//! An outbox event is written in the same unit of work as the state change it
//! reports. A dispatcher later delivers it to the ERP at least once.

use chrono::{DateTime, Utc};
use common::{OrderId, OutboxEventId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::{Order, OrderItem};

/// Tag of the event emitted when a paid order moves to delivery.
pub const ORDER_DELIVERED: &str = "ORDER_DELIVERED";

/// Number of delivery attempts an event gets before it is failed for good.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// Errors raised while decoding an outbox event.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Unknown outbox event type: {0}")]
    UnknownEventType(String),

    #[error("Malformed outbox payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

/// Payload of an [`ORDER_DELIVERED`] event.
///
/// Carries the lines as they were when the order was paid so the export does
/// not depend on later reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDeliveredPayload {
    pub order_id: OrderId,
    pub items: Vec<OrderItem>,
}

/// A decoded outbox event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxMessage {
    OrderDelivered(OrderDeliveredPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: OutboxEventId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl OutboxEvent {
    /// Creates a fresh, undelivered event.
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: OutboxEventId::new(),
            event_type: event_type.into(),
            payload,
            created_at: Utc::now(),
            processed_at: None,
            failed_at: None,
            error: None,
            retry_count: 0,
        }
    }

    /// Builds the export event for an order that has just been paid.
    pub fn order_delivered(order: &Order) -> Result<Self, OutboxError> {
        let payload = OrderDeliveredPayload {
            order_id: order.id(),
            items: order.items().to_vec(),
        };
        Ok(Self::new(ORDER_DELIVERED, serde_json::to_value(payload)?))
    }

    /// Decodes the payload according to the event type.
    pub fn decode(&self) -> Result<OutboxMessage, OutboxError> {
        match self.event_type.as_str() {
            ORDER_DELIVERED => Ok(OutboxMessage::OrderDelivered(serde_json::from_value(
                self.payload.clone(),
            )?)),
            other => Err(OutboxError::UnknownEventType(other.to_string())),
        }
    }

    /// Returns true if the event still awaits delivery within `budget` attempts.
    pub fn is_pending(&self, budget: u32) -> bool {
        self.processed_at.is_none() && self.failed_at.is_none() && self.retry_count < budget
    }

    /// Returns true if the event is unresolved but already used up `budget`,
    /// which happens when the budget is lowered under queued events.
    pub fn is_exhausted(&self, budget: u32) -> bool {
        self.processed_at.is_none() && self.failed_at.is_none() && self.retry_count >= budget
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    pub fn is_failed(&self) -> bool {
        self.failed_at.is_some()
    }

    /// Marks the event delivered.
    pub fn mark_processed(&self, now: DateTime<Utc>) -> OutboxEvent {
        OutboxEvent {
            processed_at: Some(now),
            failed_at: None,
            error: None,
            ..self.clone()
        }
    }

    /// Marks the event permanently failed. The retry counter is left alone.
    pub fn mark_failed(&self, error: impl Into<String>, now: DateTime<Utc>) -> OutboxEvent {
        OutboxEvent {
            processed_at: None,
            failed_at: Some(now),
            error: Some(error.into()),
            ..self.clone()
        }
    }

    /// Applies a transient delivery failure.
    ///
    /// The counter is bumped while attempts remain; the attempt that would
    /// exhaust `budget` fails the event instead.
    pub fn after_transient_failure(
        &self,
        error: impl Into<String>,
        budget: u32,
        now: DateTime<Utc>,
    ) -> OutboxEvent {
        let next = self.retry_count.saturating_add(1);
        if next < budget {
            OutboxEvent {
                retry_count: next,
                error: Some(error.into()),
                ..self.clone()
            }
        } else {
            self.mark_failed(error, now)
        }
    }
}
