//! Fulfillment dispatcher.
//!
//! Executes the domain action for a settled payment request: credit the
//! balance for deposits, reserve-and-remove stock for purchases. Runs
//! synchronously inside notification handling so the provider's
//! acknowledgement covers the whole side effect — but the delivery
//! message itself is fire-and-forget.

use crate::entities::payment_request::{PaymentKind, PaymentRequest};
use crate::events::{DeliveryEvent, DeliveryEventSender};
use crate::stores::{AccountStore, InventoryStore};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// Stock ran out between request-open and settlement (a concurrent
    /// balance purchase can consume it in the interim). Money has been
    /// received; this is an operator problem, not a bot reply.
    #[error("insufficient stock for {code}: wanted {wanted}, have {available}")]
    InsufficientStock {
        code: crate::entities::ItemCode,
        wanted: u32,
        available: usize,
    },

    /// The settled request carries no purchase detail. Registry
    /// invariants make this unreachable; kept explicit rather than
    /// panicking.
    #[error("purchase request {0} has no purchase detail")]
    MissingPurchaseDetail(crate::entities::RequestId),
}

pub struct FulfillmentDispatcher {
    accounts: Arc<AccountStore>,
    inventory: Arc<InventoryStore>,
    delivery_tx: DeliveryEventSender,
}

impl FulfillmentDispatcher {
    pub fn new(
        accounts: Arc<AccountStore>,
        inventory: Arc<InventoryStore>,
        delivery_tx: DeliveryEventSender,
    ) -> Self {
        Self {
            accounts,
            inventory,
            delivery_tx,
        }
    }

    /// Perform the domain action for a settled request, exactly once.
    ///
    /// The caller owns the Open->Settled transition; by the time this
    /// runs the request is already Settled and no second notification
    /// can reach it.
    pub async fn dispatch(&self, request: &PaymentRequest) -> Result<(), FulfillmentError> {
        match request.kind {
            PaymentKind::Deposit => self.fulfill_deposit(request).await,
            PaymentKind::Purchase => self.fulfill_purchase(request).await,
        }
    }

    async fn fulfill_deposit(&self, request: &PaymentRequest) -> Result<(), FulfillmentError> {
        // The base amount, never the disambiguated total: the unique
        // code is the cost of matching, not part of the deposit.
        let new_balance = self
            .accounts
            .credit(request.user_id, request.base_amount)
            .await;

        tracing::info!(
            request_id = %request.id,
            user_id = request.user_id,
            amount = request.base_amount,
            new_balance,
            "deposit credited"
        );

        self.send_delivery(DeliveryEvent::DepositCredited {
            user_id: request.user_id,
            amount: request.base_amount,
            new_balance,
        })
        .await;
        Ok(())
    }

    async fn fulfill_purchase(&self, request: &PaymentRequest) -> Result<(), FulfillmentError> {
        let Some(detail) = &request.purchase else {
            return Err(FulfillmentError::MissingPurchaseDetail(request.id.clone()));
        };

        // Stock is re-verified at settlement time: balance purchases may
        // have consumed units since the open-time check. The QR path
        // never debits balance.
        let units = match self
            .inventory
            .reserve(&detail.code, detail.quantity as usize)
            .await
        {
            Some(units) => units,
            None => {
                let available = self.inventory.count(&detail.code).await;
                return Err(FulfillmentError::InsufficientStock {
                    code: detail.code.clone(),
                    wanted: detail.quantity,
                    available,
                });
            }
        };

        tracing::info!(
            request_id = %request.id,
            user_id = request.user_id,
            code = %detail.code,
            quantity = detail.quantity,
            "purchase fulfilled"
        );

        self.send_delivery(DeliveryEvent::PurchaseDelivered {
            user_id: request.user_id,
            request_id: request.id.clone(),
            product_name: detail.product_name.clone(),
            units,
        })
        .await;
        Ok(())
    }

    async fn send_delivery(&self, event: DeliveryEvent) {
        // A failed delivery message never rolls back settlement.
        if let Err(e) = self.delivery_tx.send(event).await {
            tracing::warn!(error = %e, "delivery channel closed; settlement outcome not delivered");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::entities::catalog::StockUnit;
    use crate::entities::payment_request::{PurchaseDetail, RequestStatus};
    use crate::entities::{ItemCode, RequestId};
    use crate::events::delivery_event_channel;
    use time::OffsetDateTime;

    fn settled_purchase(code: &str, qty: u32) -> PaymentRequest {
        let now = OffsetDateTime::now_utc();
        PaymentRequest {
            id: RequestId::from("QRIS-7-1"),
            kind: PaymentKind::Purchase,
            user_id: 7,
            base_amount: 5_000 * qty as i64,
            disambiguator: 123,
            purchase: Some(PurchaseDetail {
                code: ItemCode::from(code),
                product_name: "Test Product".to_string(),
                quantity: qty,
                unit_price: 5_000,
            }),
            status: RequestStatus::Settled,
            created_at: now,
            expires_at: now + time::Duration::minutes(15),
            notification_ref: Some("TX-1".into()),
        }
    }

    fn settled_deposit(amount: i64) -> PaymentRequest {
        PaymentRequest {
            kind: PaymentKind::Deposit,
            base_amount: amount,
            purchase: None,
            ..settled_purchase("X", 1)
        }
    }

    #[tokio::test]
    async fn deposit_credits_base_amount_not_payable_total() {
        let accounts = Arc::new(AccountStore::new());
        let inventory = Arc::new(InventoryStore::new());
        let (tx, mut rx) = delivery_event_channel();
        let dispatcher = FulfillmentDispatcher::new(accounts.clone(), inventory, tx);

        dispatcher.dispatch(&settled_deposit(10_000)).await.unwrap();

        assert_eq!(accounts.balance(7).await, 10_000);
        match rx.recv().await.unwrap() {
            DeliveryEvent::DepositCredited { amount, new_balance, .. } => {
                assert_eq!(amount, 10_000);
                assert_eq!(new_balance, 10_000);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn purchase_reserves_units_and_reports_shortfall() {
        let accounts = Arc::new(AccountStore::new());
        let inventory = Arc::new(InventoryStore::new());
        let code = ItemCode::from("CP001");
        inventory
            .add_units(&code, vec![StockUnit::new("CP001", "a:1")])
            .await;
        let (tx, mut rx) = delivery_event_channel();
        let dispatcher = FulfillmentDispatcher::new(accounts, inventory.clone(), tx);

        dispatcher
            .dispatch(&settled_purchase("CP001", 1))
            .await
            .unwrap();
        assert_eq!(inventory.count(&code).await, 0);
        assert!(matches!(
            rx.recv().await.unwrap(),
            DeliveryEvent::PurchaseDelivered { .. }
        ));

        // A second settlement for the same code finds nothing left.
        let err = dispatcher
            .dispatch(&settled_purchase("CP001", 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FulfillmentError::InsufficientStock { available: 0, .. }
        ));
    }
}
