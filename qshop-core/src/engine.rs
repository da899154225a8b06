//! Reconciliation engine.
//!
//! Owns the payment request registry and drives the per-notification
//! state machine: `Received -> Matched -> Applied`, or `Unmatched`
//! (dropped and logged), or `DuplicateIgnored`. All registry transitions
//! go through one async mutex, so settlement is linearizable per payable
//! total and the expiry sweep can never race a concurrent settlement.

use crate::entities::catalog::Product;
use crate::entities::notification::PaymentNotification;
use crate::entities::payment_request::{PaymentKind, PaymentRequest, PurchaseDetail};
use crate::entities::{RequestId, Rupiah, UserId};
use crate::events::{OperatorAlert, OperatorAlertSender};
use crate::fulfillment::FulfillmentDispatcher;
use crate::qr::{QrArtifact, QrIssueError, QrIssuer};
use crate::registry::{OpenRequest, PaymentRequestRegistry, RegistryError, SettleOutcome};
use crate::stores::InventoryStore;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;

/// Errors during request-open. Recovered locally by the calling flow:
/// the requester is informed and may retry; no money has moved.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    QrIssuance(#[from] QrIssueError),

    /// Open-time stock check failed; the purchase never opens.
    #[error("insufficient stock for {code}: wanted {wanted}, have {available}")]
    InsufficientStock {
        code: crate::entities::ItemCode,
        wanted: u32,
        available: usize,
    },
}

/// A successfully opened payment request, ready to display.
#[derive(Debug, Clone)]
pub struct OpenedPayment {
    pub id: RequestId,
    pub base_amount: Rupiah,
    pub disambiguator: Rupiah,
    pub payable_total: Rupiah,
    pub expires_at: OffsetDateTime,
    pub qr_image: Bytes,
}

/// Terminal state of one inbound notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Matched and settled; fulfillment ran (or was recorded as Failed).
    Applied { request_id: RequestId },
    /// The reference was applied before; the provider may stop retrying.
    DuplicateIgnored,
    /// No open request holds the observed amount. Logged, never guessed.
    Unmatched,
}

pub struct ReconciliationEngine {
    registry: Mutex<PaymentRequestRegistry>,
    qr: Arc<dyn QrIssuer>,
    fulfillment: FulfillmentDispatcher,
    inventory: Arc<InventoryStore>,
    alert_tx: OperatorAlertSender,
    request_ttl: time::Duration,
}

impl ReconciliationEngine {
    pub fn new(
        registry: PaymentRequestRegistry,
        qr: Arc<dyn QrIssuer>,
        fulfillment: FulfillmentDispatcher,
        inventory: Arc<InventoryStore>,
        alert_tx: OperatorAlertSender,
        request_ttl: time::Duration,
    ) -> Self {
        Self {
            registry: Mutex::new(registry),
            qr,
            fulfillment,
            inventory,
            alert_tx,
            request_ttl,
        }
    }

    /// Open a deposit request: claim a unique payable total and issue
    /// the QR artifact for it.
    pub async fn open_deposit(
        &self,
        id: RequestId,
        user_id: UserId,
        amount: Rupiah,
    ) -> Result<OpenedPayment, OpenError> {
        self.open(OpenRequest {
            id,
            kind: PaymentKind::Deposit,
            user_id,
            base_amount: amount,
            purchase: None,
            ttl: self.request_ttl,
        })
        .await
    }

    /// Open a purchase request. Stock is pre-checked here and re-checked
    /// at settlement time; the pre-check only spares the buyer a QR for
    /// an order that cannot currently be filled.
    pub async fn open_purchase(
        &self,
        id: RequestId,
        user_id: UserId,
        product: &Product,
        quantity: u32,
    ) -> Result<OpenedPayment, OpenError> {
        let available = self.inventory.count(&product.code).await;
        if available < quantity as usize {
            return Err(OpenError::InsufficientStock {
                code: product.code.clone(),
                wanted: quantity,
                available,
            });
        }

        self.open(OpenRequest {
            id,
            kind: PaymentKind::Purchase,
            user_id,
            base_amount: product.price * Rupiah::from(quantity),
            purchase: Some(PurchaseDetail {
                code: product.code.clone(),
                product_name: product.name.clone(),
                quantity,
                unit_price: product.price,
            }),
            ttl: self.request_ttl,
        })
        .await
    }

    async fn open(&self, req: OpenRequest) -> Result<OpenedPayment, OpenError> {
        let now = OffsetDateTime::now_utc();

        // Claim the payable total before the QR round trip, so no
        // concurrent open can pick the same total while we wait.
        let request = {
            let mut registry = self.registry.lock().await;
            registry.open(req, now)?
        };
        let payable_total = request.payable_total();

        let artifact = match self.qr.issue(payable_total).await {
            Ok(artifact) => artifact,
            Err(e) => {
                // Release the claim: a failed open leaves no partial
                // registry entry behind.
                self.registry.lock().await.abort(&request.id);
                tracing::warn!(
                    request_id = %request.id,
                    payable_total,
                    error = %e,
                    "QR issuance failed; request aborted"
                );
                return Err(OpenError::QrIssuance(e));
            }
        };

        self.verify_artifact(&request, payable_total, &artifact).await;

        tracing::info!(
            request_id = %request.id,
            kind = ?request.kind,
            user_id = request.user_id,
            base_amount = request.base_amount,
            payable_total,
            "payment request opened"
        );

        Ok(OpenedPayment {
            id: request.id,
            base_amount: request.base_amount,
            disambiguator: request.disambiguator,
            payable_total,
            expires_at: request.expires_at,
            qr_image: artifact.image,
        })
    }

    /// Cross-check the amount embedded in the issued artifact against
    /// the intended total. The notifier's reported amount stays
    /// authoritative, so a mismatch is alerting-only.
    async fn verify_artifact(
        &self,
        request: &PaymentRequest,
        payable_total: Rupiah,
        artifact: &QrArtifact,
    ) {
        match artifact.encoded_amount {
            Some(encoded) if encoded != payable_total => {
                tracing::warn!(
                    request_id = %request.id,
                    expected = payable_total,
                    encoded,
                    "QR artifact embeds a different amount than intended"
                );
                self.alert(OperatorAlert::QrAmountMismatch {
                    request_id: request.id.clone(),
                    expected: payable_total,
                    encoded,
                })
                .await;
            }
            Some(_) => {}
            None => {
                tracing::debug!(
                    request_id = %request.id,
                    "QR artifact amount not decodable; skipping self-check"
                );
            }
        }
    }

    /// Apply one inbound payment notification.
    ///
    /// Fulfillment runs synchronously before the notification is
    /// acknowledged. A fulfillment failure after settlement moves the
    /// request to Failed and raises an operator alert, but the
    /// notification is still acknowledged: re-delivery would re-attempt
    /// fulfillment against state that already consumed its decisions.
    pub async fn apply_notification(&self, notification: PaymentNotification) -> NotificationOutcome {
        let now = OffsetDateTime::now_utc();
        let settled = {
            let mut registry = self.registry.lock().await;

            if let Some(request_id) = registry.seen_reference(&notification.reference) {
                tracing::info!(
                    reference = %notification.reference,
                    request_id = %request_id,
                    "duplicate notification ignored"
                );
                return NotificationOutcome::DuplicateIgnored;
            }

            let Some(request_id) = registry.find_by_payable_total(notification.amount) else {
                tracing::warn!(
                    amount = notification.amount,
                    reference = %notification.reference,
                    "notification matched no open request"
                );
                // Release the registry before waiting on the alert
                // channel; a slow alert consumer must not stall opens
                // and settlements.
                drop(registry);
                self.alert(OperatorAlert::UnmatchedNotification {
                    amount: notification.amount,
                    reference: notification.reference.clone(),
                    raw: notification.raw.clone(),
                })
                .await;
                return NotificationOutcome::Unmatched;
            };

            match registry.mark_settled(&request_id, &notification.reference, now) {
                SettleOutcome::Settled(request) => request,
                SettleOutcome::AlreadyApplied => {
                    return NotificationOutcome::DuplicateIgnored;
                }
                SettleOutcome::Rejected => {
                    // The index only holds Open entries, so losing the
                    // transition means another caller won the race.
                    tracing::warn!(
                        request_id = %request_id,
                        reference = %notification.reference,
                        "settlement refused; treating as duplicate"
                    );
                    return NotificationOutcome::DuplicateIgnored;
                }
            }
        };

        tracing::info!(
            request_id = %settled.id,
            payable_total = settled.payable_total(),
            reference = %notification.reference,
            "notification matched and settled"
        );

        match self.fulfillment.dispatch(&settled).await {
            Ok(()) => {
                // Done with this entry; the applied reference alone
                // keeps guarding against replays.
                self.registry.lock().await.evict_settled(&settled.id);
            }
            Err(e) => {
                self.registry.lock().await.mark_failed(&settled.id);
                tracing::error!(
                    request_id = %settled.id,
                    user_id = settled.user_id,
                    error = %e,
                    "fulfillment failed after settlement; manual resolution required"
                );
                self.alert(OperatorAlert::FulfillmentFailed {
                    request_id: settled.id.clone(),
                    user_id: settled.user_id,
                    reason: e.to_string(),
                })
                .await;
            }
        }

        NotificationOutcome::Applied {
            request_id: settled.id,
        }
    }

    /// Expire overdue open requests. Called by the expiry sweeper.
    pub async fn sweep_expired(&self, now: OffsetDateTime) -> Vec<PaymentRequest> {
        self.registry.lock().await.sweep_expired(now)
    }

    /// Number of currently open requests (health/inspection).
    pub async fn open_count(&self) -> usize {
        self.registry.lock().await.open_count()
    }

    async fn alert(&self, alert: OperatorAlert) {
        if let Err(e) = self.alert_tx.send(alert).await {
            tracing::warn!(error = %e, "operator alert channel closed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::entities::ItemCode;
    use crate::entities::catalog::StockUnit;
    use crate::events::{DeliveryEvent, delivery_event_channel, operator_alert_channel};
    use crate::stores::AccountStore;
    use async_trait::async_trait;
    use compact_str::CompactString;

    /// Issues a deterministic artifact whose embedded amount can be
    /// forced to disagree with the requested one.
    struct FakeIssuer {
        skew: Rupiah,
        fail: bool,
    }

    #[async_trait]
    impl QrIssuer for FakeIssuer {
        async fn issue(&self, amount: Rupiah) -> Result<QrArtifact, QrIssueError> {
            if self.fail {
                return Err(QrIssueError::MissingArtifact);
            }
            Ok(QrArtifact {
                image: Bytes::from_static(b"qr"),
                encoded_amount: Some(amount + self.skew),
            })
        }
    }

    struct Harness {
        engine: ReconciliationEngine,
        accounts: Arc<AccountStore>,
        inventory: Arc<InventoryStore>,
        delivery_rx: crate::events::DeliveryEventReceiver,
        alert_rx: crate::events::OperatorAlertReceiver,
    }

    fn harness(issuer: FakeIssuer) -> Harness {
        let accounts = Arc::new(AccountStore::new());
        let inventory = Arc::new(InventoryStore::new());
        let (delivery_tx, delivery_rx) = delivery_event_channel();
        let (alert_tx, alert_rx) = operator_alert_channel();
        let fulfillment =
            FulfillmentDispatcher::new(accounts.clone(), inventory.clone(), delivery_tx);
        let engine = ReconciliationEngine::new(
            PaymentRequestRegistry::default(),
            Arc::new(issuer),
            fulfillment,
            inventory.clone(),
            alert_tx,
            time::Duration::minutes(15),
        );
        Harness {
            engine,
            accounts,
            inventory,
            delivery_rx,
            alert_rx,
        }
    }

    fn notification(amount: Rupiah, reference: &str) -> PaymentNotification {
        PaymentNotification {
            amount,
            reference: CompactString::from(reference),
            raw: None,
        }
    }

    fn product(code: &str, price: Rupiah) -> Product {
        Product {
            code: ItemCode::from(code),
            category: CompactString::from("Apps"),
            name: format!("{code} premium"),
            price,
            detail: String::new(),
        }
    }

    #[tokio::test]
    async fn deposit_settles_exactly_once_across_replays() {
        let mut h = harness(FakeIssuer { skew: 0, fail: false });

        let opened = h
            .engine
            .open_deposit("D-7-1".into(), 7, 10_000)
            .await
            .unwrap();
        assert!(opened.payable_total >= 10_100 && opened.payable_total <= 10_999);

        // Exact total settles it.
        let outcome = h
            .engine
            .apply_notification(notification(opened.payable_total, "TX-1"))
            .await;
        assert_eq!(
            outcome,
            NotificationOutcome::Applied { request_id: "D-7-1".into() }
        );
        assert_eq!(h.accounts.balance(7).await, 10_000);

        // Replays with the same reference are no-ops.
        for _ in 0..3 {
            let outcome = h
                .engine
                .apply_notification(notification(opened.payable_total, "TX-1"))
                .await;
            assert_eq!(outcome, NotificationOutcome::DuplicateIgnored);
        }
        assert_eq!(h.accounts.balance(7).await, 10_000);

        // The undisambiguated base amount never matches.
        let outcome = h.engine.apply_notification(notification(10_000, "TX-2")).await;
        assert_eq!(outcome, NotificationOutcome::Unmatched);

        // The settled entry was evicted after fulfillment, so the id is
        // free again while replays above still resolved as duplicates.
        let reopened = h.engine.open_deposit("D-7-1".into(), 7, 4_000).await.unwrap();
        assert!(reopened.payable_total >= 4_100 && reopened.payable_total <= 4_999);
    }

    #[tokio::test]
    async fn unmatched_alert_backpressure_does_not_stall_the_registry() {
        let accounts = Arc::new(AccountStore::new());
        let inventory = Arc::new(InventoryStore::new());
        let (delivery_tx, _delivery_rx) = delivery_event_channel();
        let (alert_tx, mut alert_rx) = tokio::sync::mpsc::channel(1);
        // Fill the only alert slot so the next send has to wait.
        alert_tx
            .send(OperatorAlert::UnmatchedNotification {
                amount: 1,
                reference: "TX-0".into(),
                raw: None,
            })
            .await
            .unwrap();

        let fulfillment = FulfillmentDispatcher::new(accounts, inventory.clone(), delivery_tx);
        let engine = Arc::new(ReconciliationEngine::new(
            PaymentRequestRegistry::default(),
            Arc::new(FakeIssuer { skew: 0, fail: false }),
            fulfillment,
            inventory,
            alert_tx,
            time::Duration::minutes(15),
        ));

        // Matches nothing, so its alert send parks on the full channel.
        let blocked = tokio::spawn({
            let engine = engine.clone();
            async move { engine.apply_notification(notification(42, "TX-1")).await }
        });
        tokio::task::yield_now().await;

        // The registry stays available while that alert is stuck.
        let opened = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            engine.open_deposit("D-1".into(), 7, 10_000),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(opened.payable_total >= 10_100);

        // Draining the channel lets the parked notification finish.
        let _ = alert_rx.recv().await;
        assert_eq!(blocked.await.unwrap(), NotificationOutcome::Unmatched);
    }

    #[tokio::test]
    async fn same_base_amount_requests_get_distinct_totals_and_settle_independently() {
        let h = harness(FakeIssuer { skew: 0, fail: false });

        let a = h.engine.open_deposit("D-1".into(), 1, 10_000).await.unwrap();
        let b = h.engine.open_deposit("D-2".into(), 2, 10_000).await.unwrap();
        assert_ne!(a.payable_total, b.payable_total);

        let outcome = h
            .engine
            .apply_notification(notification(b.payable_total, "TX-b"))
            .await;
        assert_eq!(
            outcome,
            NotificationOutcome::Applied { request_id: "D-2".into() }
        );

        // The other stays open until its own total is reported.
        assert_eq!(h.engine.open_count().await, 1);
        let outcome = h
            .engine
            .apply_notification(notification(a.payable_total, "TX-a"))
            .await;
        assert_eq!(
            outcome,
            NotificationOutcome::Applied { request_id: "D-1".into() }
        );
    }

    #[tokio::test]
    async fn qr_failure_leaves_no_partial_request() {
        let h = harness(FakeIssuer { skew: 0, fail: true });

        let err = h
            .engine
            .open_deposit("D-7-1".into(), 7, 10_000)
            .await
            .unwrap_err();
        assert!(matches!(err, OpenError::QrIssuance(_)));
        assert_eq!(h.engine.open_count().await, 0);

        // The id is free to reuse after the failed open.
        let h2 = harness(FakeIssuer { skew: 0, fail: false });
        let _ = h2.engine.open_deposit("D-7-1".into(), 7, 10_000).await.unwrap();
    }

    #[tokio::test]
    async fn artifact_amount_mismatch_alerts_but_does_not_block_matching() {
        let mut h = harness(FakeIssuer { skew: 50, fail: false });

        let opened = h
            .engine
            .open_deposit("D-7-1".into(), 7, 10_000)
            .await
            .unwrap();

        match h.alert_rx.recv().await.unwrap() {
            OperatorAlert::QrAmountMismatch { expected, encoded, .. } => {
                assert_eq!(expected, opened.payable_total);
                assert_eq!(encoded, opened.payable_total + 50);
            }
            other => panic!("unexpected alert {other:?}"),
        }

        // Matching still runs on the provider-reported amount.
        let outcome = h
            .engine
            .apply_notification(notification(opened.payable_total, "TX-1"))
            .await;
        assert!(matches!(outcome, NotificationOutcome::Applied { .. }));
    }

    #[tokio::test]
    async fn post_payment_stock_shortfall_marks_failed_and_alerts() {
        let mut h = harness(FakeIssuer { skew: 0, fail: false });
        let item = product("CP001", 5_000);
        h.inventory
            .add_units(&item.code, vec![StockUnit::new("CP001", "a:1")])
            .await;

        let opened = h
            .engine
            .open_purchase("Q-7-1".into(), 7, &item, 1)
            .await
            .unwrap();

        // A concurrent balance purchase drains the stock in the interim.
        h.inventory.reserve(&item.code, 1).await.unwrap();

        let outcome = h
            .engine
            .apply_notification(notification(opened.payable_total, "TX-1"))
            .await;
        // Acknowledged anyway; re-delivery cannot help.
        assert!(matches!(outcome, NotificationOutcome::Applied { .. }));

        match h.alert_rx.recv().await.unwrap() {
            OperatorAlert::FulfillmentFailed { request_id, user_id, .. } => {
                assert_eq!(request_id, RequestId::from("Q-7-1"));
                assert_eq!(user_id, 7);
            }
            other => panic!("unexpected alert {other:?}"),
        }
        // No delivery message was produced.
        assert!(h.delivery_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn purchase_open_refuses_when_stock_is_short() {
        let h = harness(FakeIssuer { skew: 0, fail: false });
        let item = product("CP001", 5_000);

        let err = h
            .engine
            .open_purchase("Q-7-1".into(), 7, &item, 2)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OpenError::InsufficientStock { wanted: 2, available: 0, .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_settlements_cannot_oversell() {
        let mut h = harness(FakeIssuer { skew: 0, fail: false });
        let item = product("NF001", 25_000);
        h.inventory
            .add_units(
                &item.code,
                vec![
                    StockUnit::new("NF001", "a:1"),
                    StockUnit::new("NF001", "a:2"),
                ],
            )
            .await;

        // Three buyers open QR purchases against two units. Each wants
        // one unit, so every open-time pre-check passes; only the
        // settlement-time re-check can catch the oversell.
        let o1 = h.engine.open_purchase("Q-1".into(), 1, &item, 1).await.unwrap();
        let o2 = h.engine.open_purchase("Q-2".into(), 2, &item, 1).await.unwrap();
        let o3 = h.engine.open_purchase("Q-3".into(), 3, &item, 1).await.unwrap();

        for (opened, reference) in [(o1, "TX-1"), (o2, "TX-2"), (o3, "TX-3")] {
            let outcome = h
                .engine
                .apply_notification(notification(opened.payable_total, reference))
                .await;
            assert!(matches!(outcome, NotificationOutcome::Applied { .. }));
        }

        // With two units in stock, exactly two settlements fulfilled.
        let mut delivered = 0;
        while let Ok(event) = h.delivery_rx.try_recv() {
            assert!(matches!(event, DeliveryEvent::PurchaseDelivered { .. }));
            delivered += 1;
        }
        assert_eq!(delivered, 2);
        let mut failed = 0;
        while let Ok(alert) = h.alert_rx.try_recv() {
            assert!(matches!(alert, OperatorAlert::FulfillmentFailed { .. }));
            failed += 1;
        }
        assert_eq!(failed, 1);
        assert_eq!(h.inventory.count(&item.code).await, 0);
    }
}
