//! DeliveryWorker processor.
//!
//! Drains both event queues and turns them into chat messages: delivery
//! events go to the user they belong to, operator alerts go to the
//! configured operator chat (or the log when none is configured).
//! Delivery is best-effort with no retry; the authoritative outcome of
//! a payment lives in the registry, not in the chat transcript.

use crate::entities::UserId;
use crate::events::{DeliveryEvent, DeliveryEventReceiver, OperatorAlert, OperatorAlertReceiver};
use crate::notify::ChatNotifier;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

pub struct DeliveryWorker {
    notifier: Arc<dyn ChatNotifier>,
    delivery_rx: DeliveryEventReceiver,
    alert_rx: OperatorAlertReceiver,
    operator_chat_id: Option<UserId>,
    shutdown_rx: watch::Receiver<bool>,
}

impl DeliveryWorker {
    pub fn new(
        notifier: Arc<dyn ChatNotifier>,
        delivery_rx: DeliveryEventReceiver,
        alert_rx: OperatorAlertReceiver,
        operator_chat_id: Option<UserId>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            notifier,
            delivery_rx,
            alert_rx,
            operator_chat_id,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!("DeliveryWorker started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("DeliveryWorker received shutdown signal");
                        break;
                    }
                }

                Some(event) = self.delivery_rx.recv() => {
                    debug!(event = ?event, "Received DeliveryEvent");
                    let user_id = event.user_id();
                    let text = render_delivery(&event);
                    if let Err(e) = self.notifier.deliver(user_id, &text).await {
                        error!(user_id, error = %e, "failed to deliver chat message");
                    }
                }

                Some(alert) = self.alert_rx.recv() => {
                    debug!(alert = ?alert, "Received OperatorAlert");
                    self.handle_alert(alert).await;
                }

                else => {
                    info!("event channels closed");
                    break;
                }
            }
        }

        info!("DeliveryWorker shutdown complete");
    }

    async fn handle_alert(&self, alert: OperatorAlert) {
        let text = render_alert(&alert);
        match self.operator_chat_id {
            Some(chat_id) => {
                if let Err(e) = self.notifier.deliver(chat_id, &text).await {
                    // The alert must not be lost silently; the log is
                    // the fallback channel.
                    error!(error = %e, alert = %text, "failed to deliver operator alert");
                }
            }
            None => error!(alert = %text, "operator alert (no operator chat configured)"),
        }
    }
}

fn render_delivery(event: &DeliveryEvent) -> String {
    match event {
        DeliveryEvent::DepositCredited {
            amount,
            new_balance,
            ..
        } => format!(
            "Deposit received. Rp {amount} has been credited.\nYour balance is now Rp {new_balance}."
        ),
        DeliveryEvent::PurchaseDelivered {
            request_id,
            product_name,
            units,
            ..
        } => {
            let mut text = format!(
                "Payment confirmed for order {request_id}.\n\
                 Here are your {count}x {product_name}:\n",
                count = units.len()
            );
            for unit in units {
                let _ = writeln!(text, "- {}", unit.detail);
            }
            text
        }
        DeliveryEvent::PaymentExpired {
            request_id,
            payable_total,
            ..
        } => format!(
            "Payment window for order {request_id} (Rp {payable_total}) has expired.\n\
             No money was received. Start over to get a new QR code."
        ),
    }
}

fn render_alert(alert: &OperatorAlert) -> String {
    match alert {
        OperatorAlert::FulfillmentFailed {
            request_id,
            user_id,
            reason,
        } => format!(
            "FULFILLMENT FAILED for order {request_id} (user {user_id}).\n\
             Payment was received but could not be fulfilled: {reason}.\n\
             Manual resolution required."
        ),
        OperatorAlert::UnmatchedNotification {
            amount,
            reference,
            raw,
        } => {
            let mut text = format!(
                "UNMATCHED PAYMENT: Rp {amount} (ref {reference}) matched no open order."
            );
            if let Some(raw) = raw {
                let _ = write!(text, "\nProvider payload: {raw}");
            }
            text
        }
        OperatorAlert::QrAmountMismatch {
            request_id,
            expected,
            encoded,
        } => format!(
            "QR AMOUNT MISMATCH for order {request_id}: expected Rp {expected}, \
             the issued code embeds Rp {encoded}."
        ),
    }
}
