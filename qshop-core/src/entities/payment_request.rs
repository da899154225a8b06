use super::{ItemCode, RequestId, Rupiah, UserId};
use compact_str::CompactString;
use time::OffsetDateTime;

/// What a payment request buys once it settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentKind {
    /// Credit the base amount to the requester's balance.
    Deposit,
    /// Reserve and release stock units for the purchased item.
    Purchase,
}

/// Lifecycle state of a payment request. `Settled`, `Expired` and
/// `Failed` are terminal; every request leaves `Open` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    Open,
    Settled,
    Expired,
    Failed,
}

/// Purchase-specific detail, snapshotted at open time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseDetail {
    pub code: ItemCode,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Rupiah,
}

/// An outstanding (or settled) payment request owned by the registry.
///
/// `payable_total = base_amount + disambiguator`. The disambiguator is a
/// small random increment that keeps concurrent same-priced requests
/// individually identifiable to a payment notifier that only reports a
/// total amount.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub id: RequestId,
    pub kind: PaymentKind,
    pub user_id: UserId,
    pub base_amount: Rupiah,
    pub disambiguator: Rupiah,
    pub purchase: Option<PurchaseDetail>,
    pub status: RequestStatus,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    /// Provider transaction reference of the notification that settled
    /// this request. Set exactly once; the idempotency key for replays.
    pub notification_ref: Option<CompactString>,
}

impl PaymentRequest {
    pub fn payable_total(&self) -> Rupiah {
        self.base_amount + self.disambiguator
    }

    pub fn is_open(&self) -> bool {
        self.status == RequestStatus::Open
    }
}
