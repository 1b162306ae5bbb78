//! Payment attempts against the external provider.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::Money;

/// Status of a payment attempt.
///
/// ```text
/// Pending ──┬──► Success
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    /// Returns true once the payment has been resolved either way.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "SUCCESS" => Ok(PaymentStatus::Success),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// Errors raised by payment status changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    /// The payment already left `PENDING`; it is never revived.
    #[error("Payment {payment_id} is already {status}")]
    AlreadyResolved {
        payment_id: PaymentId,
        status: PaymentStatus,
    },
}

/// One attempt to collect funds for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub amount: Money,
    pub status: PaymentStatus,
    /// Id assigned by the provider once the charge has been created there.
    pub external_id: Option<String>,
    /// Where the customer completes the payment.
    pub confirmation_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a new `PENDING` payment for an order.
    pub fn pending(order_id: OrderId, amount: Money) -> Self {
        Self {
            id: PaymentId::new(),
            order_id,
            amount,
            status: PaymentStatus::Pending,
            external_id: None,
            confirmation_url: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }

    /// Links the provider-side charge to this payment.
    pub fn with_external(
        &self,
        external_id: impl Into<String>,
        confirmation_url: impl Into<String>,
    ) -> Payment {
        Payment {
            external_id: Some(external_id.into()),
            confirmation_url: Some(confirmation_url.into()),
            ..self.clone()
        }
    }

    /// `PENDING → SUCCESS`
    pub fn succeed(&self) -> Result<Payment, PaymentError> {
        self.resolve(PaymentStatus::Success)
    }

    /// `PENDING → FAILED`
    pub fn fail(&self) -> Result<Payment, PaymentError> {
        self.resolve(PaymentStatus::Failed)
    }

    fn resolve(&self, status: PaymentStatus) -> Result<Payment, PaymentError> {
        if self.status.is_terminal() {
            return Err(PaymentError::AlreadyResolved {
                payment_id: self.id,
                status: self.status,
            });
        }
        Ok(Payment {
            status,
            ..self.clone()
        })
    }
}
