//! Payment provider webhook.
//!
//! The provider redelivers until it sees a 2xx, so every request is
//! acknowledged. Anything we cannot act on is logged and dropped.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use fulfillment::PaymentEvent;
use serde::{Deserialize, Serialize};
use store::Store;

use super::orders::AppState;

#[derive(Debug, Deserialize)]
pub struct PaymentNotification {
    pub event: String,
    #[serde(default)]
    pub object: Option<NotificationObject>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationObject {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
}

impl PaymentNotification {
    /// The event and provider payment id, if this is a notification we act on.
    fn actionable(&self) -> Option<(PaymentEvent, &str)> {
        let event = match self.event.as_str() {
            "payment.succeeded" => PaymentEvent::Succeeded,
            "payment.canceled" => PaymentEvent::Canceled,
            _ => return None,
        };
        let id = self.object.as_ref()?.id.as_deref()?;
        Some((event, id))
    }
}

/// POST /webhooks/payments: provider status notifications.
#[tracing::instrument(skip(state, body))]
pub async fn payments<S: Store + Clone>(
    State(state): State<Arc<AppState<S>>>,
    body: Bytes,
) -> Json<WebhookAck> {
    let notification: PaymentNotification = match serde_json::from_slice(&body) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring unparsable payment webhook");
            metrics::counter!("payment_webhooks_total", "outcome" => "ignored").increment(1);
            return Json(WebhookAck { status: "ignored" });
        }
    };

    let Some((event, external_id)) = notification.actionable() else {
        tracing::info!(event = %notification.event, "Ignoring payment webhook");
        metrics::counter!("payment_webhooks_total", "outcome" => "ignored").increment(1);
        return Json(WebhookAck { status: "ignored" });
    };

    let outcome = match state.payments.confirm_payment(external_id, event).await {
        Ok(outcome) => {
            tracing::info!(%external_id, ?outcome, "Payment webhook processed");
            "processed"
        }
        Err(e) => {
            tracing::error!(%external_id, error = %e, "Payment webhook processing failed");
            "error"
        }
    };
    metrics::counter!("payment_webhooks_total", "outcome" => outcome).increment(1);
    Json(WebhookAck { status: "ok" })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> PaymentNotification {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_known_events_are_actionable() {
        let n = parse(r#"{"event":"payment.succeeded","object":{"id":"ext-1"}}"#);
        assert_eq!(n.actionable(), Some((PaymentEvent::Succeeded, "ext-1")));

        let n = parse(r#"{"event":"payment.canceled","object":{"id":"ext-2"}}"#);
        assert_eq!(n.actionable(), Some((PaymentEvent::Canceled, "ext-2")));
    }

    #[test]
    fn test_other_events_and_missing_ids_are_ignored() {
        assert_eq!(
            parse(r#"{"event":"refund.succeeded","object":{"id":"ext-1"}}"#).actionable(),
            None
        );
        assert_eq!(parse(r#"{"event":"payment.succeeded","object":{}}"#).actionable(), None);
        assert_eq!(parse(r#"{"event":"payment.succeeded"}"#).actionable(), None);
    }
}
