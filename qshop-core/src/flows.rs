//! Storefront flows: the callable components behind the chat dispatch
//! boundary.
//!
//! The chat layer parses commands and renders replies; these flows hold
//! the semantics — deposit opening, QR purchases, balance purchases and
//! the session handshakes around free-text input. Handlers call them
//! directly; there is no re-entrant event replay.

use crate::engine::{OpenError, OpenedPayment, ReconciliationEngine};
use crate::entities::catalog::StockUnit;
use crate::entities::{ItemCode, RequestId, Rupiah, UserId};
use crate::session::{SessionStore, UserSession};
use crate::stores::{AccountStore, CatalogStore, InventoryStore};
use compact_str::format_compact;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use time::OffsetDateTime;

/// Minimum deposit the original storefront accepts (Rp 1.000).
pub const DEFAULT_MIN_DEPOSIT: Rupiah = 1_000;

#[derive(Debug, Error)]
pub enum DepositError {
    #[error("deposit amount {amount} is below the minimum of {minimum}")]
    BelowMinimum { amount: Rupiah, minimum: Rupiah },

    #[error(transparent)]
    Open(#[from] OpenError),
}

#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("unknown product: {0}")]
    UnknownProduct(ItemCode),

    #[error("quantity must be at least 1")]
    ZeroQuantity,

    #[error("insufficient stock for {code}: wanted {wanted}, have {available}")]
    InsufficientStock {
        code: ItemCode,
        wanted: u32,
        available: usize,
    },

    #[error("insufficient balance: have {balance}, need {total}")]
    InsufficientBalance { balance: Rupiah, total: Rupiah },

    #[error(transparent)]
    Open(#[from] OpenError),
}

/// Outcome of a completed balance purchase.
#[derive(Debug)]
pub struct PurchaseReceipt {
    pub product_name: String,
    pub quantity: u32,
    pub total: Rupiah,
    pub new_balance: Rupiah,
    pub units: Vec<StockUnit>,
}

pub struct Storefront {
    engine: Arc<ReconciliationEngine>,
    accounts: Arc<AccountStore>,
    inventory: Arc<InventoryStore>,
    catalog: Arc<CatalogStore>,
    sessions: SessionStore,
    min_deposit: Rupiah,
}

impl Storefront {
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        accounts: Arc<AccountStore>,
        inventory: Arc<InventoryStore>,
        catalog: Arc<CatalogStore>,
        min_deposit: Rupiah,
    ) -> Self {
        Self {
            engine,
            accounts,
            inventory,
            catalog,
            sessions: SessionStore::new(),
            min_deposit,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// The user tapped "deposit": the next number they send is the
    /// amount.
    pub async fn begin_deposit(&self, user: UserId) {
        self.sessions.set(user, UserSession::AwaitingDepositAmount).await;
    }

    /// The user sent a deposit amount; open a QR payment request for it.
    pub async fn submit_deposit_amount(
        &self,
        user: UserId,
        amount: Rupiah,
    ) -> Result<OpenedPayment, DepositError> {
        if amount < self.min_deposit {
            return Err(DepositError::BelowMinimum {
                amount,
                minimum: self.min_deposit,
            });
        }
        let id = request_id("DEPOSIT", user);
        Ok(self.engine.open_deposit(id, user, amount).await?)
    }

    /// The user tapped the quantity editor for a product.
    pub async fn begin_qty_edit(&self, user: UserId, product: ItemCode) {
        self.sessions
            .set(user, UserSession::AwaitingQtyEdit { product })
            .await;
    }

    /// Pay by QR: open a purchase payment request. Nothing is debited;
    /// stock is reserved only at settlement.
    pub async fn purchase_with_qr(
        &self,
        user: UserId,
        code: &ItemCode,
        quantity: u32,
    ) -> Result<OpenedPayment, PurchaseError> {
        if quantity == 0 {
            return Err(PurchaseError::ZeroQuantity);
        }
        let product = self
            .catalog
            .get(code)
            .await
            .ok_or_else(|| PurchaseError::UnknownProduct(code.clone()))?;
        let id = request_id("QRIS", user);
        Ok(self.engine.open_purchase(id, user, &product, quantity).await?)
    }

    /// Pay from the internal balance: debit, then reserve. A stock
    /// shortfall after the debit refunds it, so money and goods move
    /// together or not at all.
    pub async fn purchase_with_balance(
        &self,
        user: UserId,
        code: &ItemCode,
        quantity: u32,
    ) -> Result<PurchaseReceipt, PurchaseError> {
        if quantity == 0 {
            return Err(PurchaseError::ZeroQuantity);
        }
        let product = self
            .catalog
            .get(code)
            .await
            .ok_or_else(|| PurchaseError::UnknownProduct(code.clone()))?;
        let total = product.price * Rupiah::from(quantity);

        let Some(new_balance) = self.accounts.debit_if_sufficient(user, total).await else {
            let balance = self.accounts.balance(user).await;
            return Err(PurchaseError::InsufficientBalance { balance, total });
        };

        let Some(units) = self.inventory.reserve(code, quantity as usize).await else {
            // Compensate: the debit is refunded before reporting the
            // shortfall, so the balance invariant holds at rest.
            self.accounts.credit(user, total).await;
            let available = self.inventory.count(code).await;
            return Err(PurchaseError::InsufficientStock {
                code: code.clone(),
                wanted: quantity,
                available,
            });
        };

        tracing::info!(
            user_id = user,
            code = %code,
            quantity,
            total,
            new_balance,
            "balance purchase completed"
        );

        Ok(PurchaseReceipt {
            product_name: product.name,
            quantity,
            total,
            new_balance,
            units,
        })
    }

    pub async fn balance(&self, user: UserId) -> Rupiah {
        self.accounts.balance(user).await
    }
}

/// Request ids are derived from the requester and the wall clock, plus a
/// process-wide sequence so two taps inside the same millisecond still
/// get distinct ids.
fn request_id(prefix: &str, user: UserId) -> RequestId {
    static REQUEST_SEQ: AtomicU32 = AtomicU32::new(0);
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
    format_compact!("{prefix}-{user}-{millis}-{seq}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::entities::catalog::Product;
    use crate::events::{delivery_event_channel, operator_alert_channel};
    use crate::fulfillment::FulfillmentDispatcher;
    use crate::qr::{QrArtifact, QrIssueError, QrIssuer};
    use crate::registry::PaymentRequestRegistry;
    use async_trait::async_trait;
    use bytes::Bytes;
    use compact_str::CompactString;

    struct OkIssuer;

    #[async_trait]
    impl QrIssuer for OkIssuer {
        async fn issue(&self, amount: Rupiah) -> Result<QrArtifact, QrIssueError> {
            Ok(QrArtifact {
                image: Bytes::from_static(b"qr"),
                encoded_amount: Some(amount),
            })
        }
    }

    fn storefront() -> (Storefront, Arc<AccountStore>, Arc<InventoryStore>, Arc<CatalogStore>) {
        let accounts = Arc::new(AccountStore::new());
        let inventory = Arc::new(InventoryStore::new());
        let catalog = Arc::new(CatalogStore::new());
        let (delivery_tx, _delivery_rx) = delivery_event_channel();
        let (alert_tx, _alert_rx) = operator_alert_channel();
        let fulfillment =
            FulfillmentDispatcher::new(accounts.clone(), inventory.clone(), delivery_tx);
        let engine = Arc::new(ReconciliationEngine::new(
            PaymentRequestRegistry::default(),
            Arc::new(OkIssuer),
            fulfillment,
            inventory.clone(),
            alert_tx,
            time::Duration::minutes(15),
        ));
        let storefront = Storefront::new(
            engine,
            accounts.clone(),
            inventory.clone(),
            catalog.clone(),
            DEFAULT_MIN_DEPOSIT,
        );
        (storefront, accounts, inventory, catalog)
    }

    async fn seed_product(
        catalog: &CatalogStore,
        inventory: &InventoryStore,
        code: &str,
        price: Rupiah,
        stock: usize,
    ) -> ItemCode {
        let item = ItemCode::from(code);
        catalog
            .upsert(Product {
                code: item.clone(),
                category: CompactString::from("Apps"),
                name: format!("{code} premium"),
                price,
                detail: String::new(),
            })
            .await;
        let units = (0..stock)
            .map(|i| StockUnit::new(code, format!("acct-{i}")))
            .collect();
        inventory.add_units(&item, units).await;
        item
    }

    #[tokio::test]
    async fn deposits_below_the_minimum_are_refused() {
        let (storefront, ..) = storefront();
        let err = storefront.submit_deposit_amount(7, 500).await.unwrap_err();
        assert!(matches!(
            err,
            DepositError::BelowMinimum { amount: 500, minimum: 1_000 }
        ));

        let opened = storefront.submit_deposit_amount(7, 1_000).await.unwrap();
        assert!(opened.payable_total > 1_000);
    }

    #[tokio::test]
    async fn balance_purchase_debits_and_reserves_together() {
        let (storefront, accounts, inventory, catalog) = storefront();
        let code = seed_product(&catalog, &inventory, "CP001", 5_000, 2).await;
        accounts.credit(7, 12_000).await;

        let receipt = storefront.purchase_with_balance(7, &code, 2).await.unwrap();
        assert_eq!(receipt.total, 10_000);
        assert_eq!(receipt.new_balance, 2_000);
        assert_eq!(receipt.units.len(), 2);
        assert_eq!(inventory.count(&code).await, 0);
    }

    #[tokio::test]
    async fn balance_purchase_refunds_on_stock_shortfall() {
        let (storefront, accounts, inventory, catalog) = storefront();
        let code = seed_product(&catalog, &inventory, "CP001", 5_000, 1).await;
        accounts.credit(7, 20_000).await;

        let err = storefront.purchase_with_balance(7, &code, 2).await.unwrap_err();
        assert!(matches!(err, PurchaseError::InsufficientStock { .. }));
        // The debit was compensated.
        assert_eq!(accounts.balance(7).await, 20_000);
        assert_eq!(inventory.count(&code).await, 1);
    }

    #[tokio::test]
    async fn balance_purchase_refuses_insufficient_balance_before_touching_stock() {
        let (storefront, accounts, inventory, catalog) = storefront();
        let code = seed_product(&catalog, &inventory, "CP001", 5_000, 3).await;
        accounts.credit(7, 4_000).await;

        let err = storefront.purchase_with_balance(7, &code, 1).await.unwrap_err();
        assert!(matches!(
            err,
            PurchaseError::InsufficientBalance { balance: 4_000, total: 5_000 }
        ));
        assert_eq!(inventory.count(&code).await, 3);
    }

    #[tokio::test]
    async fn concurrent_balance_purchases_for_the_last_unit_pick_one_winner() {
        let (storefront, accounts, inventory, catalog) = storefront();
        let code = seed_product(&catalog, &inventory, "NF001", 5_000, 1).await;
        accounts.credit(1, 5_000).await;
        accounts.credit(2, 5_000).await;

        let storefront = Arc::new(storefront);
        let a = {
            let s = storefront.clone();
            let code = code.clone();
            tokio::spawn(async move { s.purchase_with_balance(1, &code, 1).await })
        };
        let b = {
            let s = storefront.clone();
            let code = code.clone();
            tokio::spawn(async move { s.purchase_with_balance(2, &code, 1).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert_eq!(inventory.count(&code).await, 0);
        // The loser kept their money.
        assert_eq!(
            accounts.balance(1).await + accounts.balance(2).await,
            5_000
        );
    }

    #[tokio::test]
    async fn qr_purchase_opens_without_debiting() {
        let (storefront, accounts, inventory, catalog) = storefront();
        let code = seed_product(&catalog, &inventory, "CP001", 5_000, 1).await;
        accounts.credit(7, 50_000).await;

        let opened = storefront.purchase_with_qr(7, &code, 1).await.unwrap();
        assert!(opened.payable_total >= 5_100);
        assert_eq!(accounts.balance(7).await, 50_000);
        assert_eq!(inventory.count(&code).await, 1);
    }

    #[tokio::test]
    async fn session_handshakes_route_the_next_free_text_message() {
        use crate::session::UserSession;

        let (storefront, _, inventory, catalog) = storefront();
        let code = seed_product(&catalog, &inventory, "CP001", 5_000, 1).await;

        storefront.begin_deposit(7).await;
        assert_eq!(
            storefront.sessions().take(7).await,
            UserSession::AwaitingDepositAmount
        );

        storefront.begin_qty_edit(7, code.clone()).await;
        assert_eq!(
            storefront.sessions().take(7).await,
            UserSession::AwaitingQtyEdit { product: code }
        );
        // Consumed: a second message falls through to Idle.
        assert_eq!(storefront.sessions().take(7).await, UserSession::Idle);
    }

    #[tokio::test]
    async fn rapid_deposits_from_one_user_get_distinct_request_ids() {
        let (storefront, ..) = storefront();

        // Back-to-back opens land in the same millisecond; both must
        // get their own request id and payable total.
        let first = storefront.submit_deposit_amount(7, 1_000).await.unwrap();
        let second = storefront.submit_deposit_amount(7, 1_000).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_ne!(first.payable_total, second.payable_total);
    }

    #[tokio::test]
    async fn unknown_products_are_refused() {
        let (storefront, ..) = storefront();
        let code = ItemCode::from("NOPE");
        assert!(matches!(
            storefront.purchase_with_qr(7, &code, 1).await,
            Err(PurchaseError::UnknownProduct(_))
        ));
        assert!(matches!(
            storefront.purchase_with_balance(7, &code, 1).await,
            Err(PurchaseError::UnknownProduct(_))
        ));
    }
}
