//! Payment initiation and confirmation.
//!
//! Initiation reserves a `PENDING` payment in one transaction and only then
//! talks to the provider. Confirmation arrives by webhook (or a manual status
//! check) and settles payment, order, stock and outbox together.

use common::{OrderId, PaymentId};
use domain::{Order, OrderError, OrderState, OutboxEvent, Payment, PaymentStatus};
use serde::{Deserialize, Serialize};
use store::{Store, UnitOfWork};

use crate::error::{FulfillmentError, Result};
use crate::orders::load_order;
use crate::services::{GatewayStatus, PaymentGateway};

/// What the client needs to send the customer to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInitiation {
    pub payment_id: PaymentId,
    pub external_id: String,
    pub confirmation_url: String,
}

/// Provider notification about a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEvent {
    Succeeded,
    Canceled,
}

/// Result of a confirmation attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmOutcome {
    /// Payment succeeded; the order moved to delivery.
    Confirmed,
    /// Payment was canceled; the order was cancelled.
    Cancelled,
    /// The payment had already been resolved. Nothing was written.
    AlreadyProcessed,
    /// The provider has not resolved the payment yet.
    StillPending,
}

/// Outcome of the initiation transaction. A cancellation is committed and
/// then reported as an error.
enum Reservation {
    Reserved { order: Order, payment: Payment },
    Cancelled(FulfillmentError),
}

/// Outcome of the confirmation transaction.
enum Settlement {
    Done(ConfirmOutcome),
    RefundRequired {
        order_id: OrderId,
        payment_id: PaymentId,
    },
}

/// Coordinates payments between the store and the payment provider.
#[derive(Clone)]
pub struct PaymentCoordinator<S, G> {
    store: S,
    gateway: G,
    return_url: String,
}

impl<S, G> PaymentCoordinator<S, G>
where
    S: Store,
    G: PaymentGateway,
{
    /// Creates a new coordinator. `return_url` is where the provider sends the
    /// customer after paying.
    pub fn new(store: S, gateway: G, return_url: impl Into<String>) -> Self {
        Self {
            store,
            gateway,
            return_url: return_url.into(),
        }
    }

    /// Starts paying for an order that finished picking.
    ///
    /// Fails without calling the provider if a payment is already pending.
    /// Missing or short stock cancels the order.
    #[tracing::instrument(skip(self))]
    pub async fn initiate_payment(&self, order_id: OrderId) -> Result<PaymentInitiation> {
        self.store
            .query(move |uow| Box::pin(check_payable(uow, order_id)))
            .await?;

        let reservation = self
            .store
            .transaction(move |uow| Box::pin(reserve_payment(uow, order_id)))
            .await?;
        let (order, payment) = match reservation {
            Reservation::Reserved { order, payment } => (order, payment),
            Reservation::Cancelled(reason) => {
                tracing::warn!(%order_id, error = %reason, "Order cancelled at payment initiation");
                return Err(reason);
            }
        };

        let description = format!("Order {}", order.id());
        let charge = match self
            .gateway
            .create_payment(
                payment.id,
                order.id(),
                payment.amount,
                &description,
                &self.return_url,
            )
            .await
        {
            Ok(charge) => charge,
            Err(e) => {
                tracing::warn!(%order_id, payment_id = %payment.id, error = %e, "Payment provider call failed");
                return Err(e.into());
            }
        };

        let payment_id = payment.id;
        let external_id = charge.external_id.clone();
        let confirmation_url = charge.confirmation_url.clone();
        self.store
            .transaction(move |uow| {
                Box::pin(link_external(
                    uow,
                    payment_id,
                    charge.external_id,
                    charge.confirmation_url,
                ))
            })
            .await?;

        metrics::counter!("payments_initiated_total").increment(1);
        tracing::info!(%order_id, %payment_id, %external_id, amount = %payment.amount, "Payment initiated");

        Ok(PaymentInitiation {
            payment_id,
            external_id,
            confirmation_url,
        })
    }

    /// Applies a provider notification.
    ///
    /// Safe to call any number of times for the same payment: once resolved,
    /// further calls return [`ConfirmOutcome::AlreadyProcessed`].
    #[tracing::instrument(skip(self))]
    pub async fn confirm_payment(
        &self,
        external_id: &str,
        event: PaymentEvent,
    ) -> Result<ConfirmOutcome> {
        let lookup = external_id.to_string();
        let payment = self
            .store
            .query(move |uow| Box::pin(find_by_external(uow, lookup)))
            .await?;
        if payment.status.is_terminal() {
            tracing::info!(payment_id = %payment.id, status = %payment.status, "Payment already resolved");
            return Ok(ConfirmOutcome::AlreadyProcessed);
        }

        let payment_id = payment.id;
        let settlement = self
            .store
            .transaction(move |uow| Box::pin(settle_payment(uow, payment_id, event)))
            .await?;

        match settlement {
            Settlement::Done(outcome) => {
                match outcome {
                    ConfirmOutcome::Confirmed => {
                        metrics::counter!("payments_confirmed_total").increment(1);
                        tracing::info!(%payment_id, order_id = %payment.order_id, "Payment confirmed");
                    }
                    ConfirmOutcome::Cancelled => {
                        tracing::info!(%payment_id, order_id = %payment.order_id, "Payment canceled by provider");
                    }
                    _ => {}
                }
                Ok(outcome)
            }
            Settlement::RefundRequired {
                order_id,
                payment_id,
            } => {
                tracing::error!(%order_id, %payment_id, "Payment succeeded but stock is gone; refund required");
                Err(FulfillmentError::RefundRequired {
                    order_id,
                    payment_id,
                })
            }
        }
    }

    /// Asks the provider for the status of the order's pending payment and
    /// applies it.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_payment_manually(&self, order_id: OrderId) -> Result<ConfirmOutcome> {
        let payment = self
            .store
            .query(move |uow| Box::pin(find_pending(uow, order_id)))
            .await?;

        let Some(external_id) = payment.external_id else {
            return Ok(ConfirmOutcome::StillPending);
        };

        match self.gateway.payment_status(&external_id).await? {
            GatewayStatus::Pending => Ok(ConfirmOutcome::StillPending),
            GatewayStatus::Succeeded => {
                self.confirm_payment(&external_id, PaymentEvent::Succeeded)
                    .await
            }
            GatewayStatus::Canceled => {
                self.confirm_payment(&external_id, PaymentEvent::Canceled)
                    .await
            }
        }
    }
}

/// Cheap pre-checks before any lock is taken.
async fn check_payable(uow: &mut dyn UnitOfWork, order_id: OrderId) -> Result<()> {
    let order = load_order(uow, order_id).await?;
    ensure_awaiting_payment(&order)?;

    if let Some(pending) = uow.payments().find_pending_by_order(order_id).await? {
        return Err(FulfillmentError::PaymentInProgress {
            order_id,
            confirmation_url: pending.confirmation_url,
        });
    }
    Ok(())
}

fn ensure_awaiting_payment(order: &Order) -> Result<()> {
    if order.state().is_paid() {
        return Err(FulfillmentError::AlreadyProcessed(order.id()));
    }
    if order.state() != OrderState::Payment {
        return Err(OrderError::InvalidState {
            actual: order.state(),
            attempted: OrderState::Delivery,
        }
        .into());
    }
    Ok(())
}

/// Returns the first line that cannot be served from stock.
async fn find_shortage(
    uow: &mut dyn UnitOfWork,
    order: &Order,
) -> Result<Option<FulfillmentError>> {
    for item in order.items() {
        match uow.products().find_for_update(&item.product_id).await? {
            None => return Ok(Some(FulfillmentError::ProductNotFound(item.product_id.clone()))),
            Some(product) if !product.has_stock_for(item.quantity) => {
                return Ok(Some(FulfillmentError::InsufficientStock {
                    product_id: item.product_id.clone(),
                    requested: item.quantity,
                    available: product.available,
                }));
            }
            Some(_) => {}
        }
    }
    Ok(None)
}

async fn reserve_payment(uow: &mut dyn UnitOfWork, order_id: OrderId) -> Result<Reservation> {
    let order = load_order(uow, order_id).await?;
    ensure_awaiting_payment(&order)?;
    if let Some(pending) = uow.payments().find_pending_by_order(order_id).await? {
        return Err(FulfillmentError::PaymentInProgress {
            order_id,
            confirmation_url: pending.confirmation_url,
        });
    }

    if let Some(shortage) = find_shortage(uow, &order).await? {
        let cancelled = order.cancel()?;
        uow.orders().save(&cancelled).await?;
        return Ok(Reservation::Cancelled(shortage));
    }

    let payment = Payment::pending(order.id(), order.total());
    uow.payments().save(&payment).await?;
    Ok(Reservation::Reserved { order, payment })
}

async fn link_external(
    uow: &mut dyn UnitOfWork,
    payment_id: PaymentId,
    external_id: String,
    confirmation_url: String,
) -> Result<()> {
    let payment = uow
        .payments()
        .find_by_id(payment_id)
        .await?
        .ok_or_else(|| FulfillmentError::PaymentNotFound(payment_id.to_string()))?;
    // Recorded even if a sweep already failed the payment, so a late
    // webhook still finds it.
    uow.payments()
        .save(&payment.with_external(external_id, confirmation_url))
        .await?;
    Ok(())
}

async fn find_pending(uow: &mut dyn UnitOfWork, order_id: OrderId) -> Result<Payment> {
    uow.payments()
        .find_pending_by_order(order_id)
        .await?
        .ok_or_else(|| {
            FulfillmentError::PaymentNotFound(format!("no pending payment for order {order_id}"))
        })
}

async fn find_by_external(uow: &mut dyn UnitOfWork, external_id: String) -> Result<Payment> {
    uow.payments()
        .find_by_external_id(&external_id)
        .await?
        .ok_or(FulfillmentError::PaymentNotFound(external_id))
}

async fn settle_payment(
    uow: &mut dyn UnitOfWork,
    payment_id: PaymentId,
    event: PaymentEvent,
) -> Result<Settlement> {
    let payment = uow
        .payments()
        .find_by_id(payment_id)
        .await?
        .ok_or_else(|| FulfillmentError::PaymentNotFound(payment_id.to_string()))?;
    if payment.status != PaymentStatus::Pending {
        return Ok(Settlement::Done(ConfirmOutcome::AlreadyProcessed));
    }
    let order = load_order(uow, payment.order_id).await?;

    match event {
        PaymentEvent::Canceled => {
            uow.payments().save(&payment.fail()?).await?;
            cancel_if_possible(uow, &order).await?;
            Ok(Settlement::Done(ConfirmOutcome::Cancelled))
        }
        PaymentEvent::Succeeded => {
            let shortage = if order.state() == OrderState::Payment {
                find_shortage(uow, &order).await?
            } else {
                Some(FulfillmentError::Order(OrderError::InvalidState {
                    actual: order.state(),
                    attempted: OrderState::Delivery,
                }))
            };
            if let Some(reason) = shortage {
                tracing::warn!(order_id = %order.id(), %payment_id, error = %reason, "Cannot deliver paid order");
                uow.payments().save(&payment.fail()?).await?;
                cancel_if_possible(uow, &order).await?;
                return Ok(Settlement::RefundRequired {
                    order_id: order.id(),
                    payment_id,
                });
            }

            for item in order.items() {
                uow.products()
                    .decrement_stock(&item.product_id, item.quantity)
                    .await?;
            }
            let paid = order.mark_paid()?;
            uow.payments().save(&payment.succeed()?).await?;
            uow.orders().save(&paid).await?;
            uow.outbox().save(&OutboxEvent::order_delivered(&paid)?).await?;
            Ok(Settlement::Done(ConfirmOutcome::Confirmed))
        }
    }
}

pub(crate) async fn cancel_if_possible(uow: &mut dyn UnitOfWork, order: &Order) -> Result<bool> {
    if !order.state().can_cancel() {
        return Ok(false);
    }
    uow.orders().save(&order.cancel()?).await?;
    Ok(true)
}
