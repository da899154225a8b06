//! Event type definitions.
//!
//! Delivery events are fire-and-forget with respect to settlement: a
//! failed delivery never rolls back a settled payment. Operator alerts
//! carry everything needed for manual reconciliation, because the
//! conditions they report never self-correct.

use crate::entities::catalog::StockUnit;
use crate::entities::{RequestId, Rupiah, UserId};
use compact_str::CompactString;

/// A settlement (or expiry) outcome to deliver to a user's chat session.
#[derive(Debug, Clone)]
pub enum DeliveryEvent {
    /// A deposit settled; the base amount was credited.
    DepositCredited {
        user_id: UserId,
        amount: Rupiah,
        new_balance: Rupiah,
    },
    /// A purchase settled; the reserved units are released to the buyer.
    PurchaseDelivered {
        user_id: UserId,
        request_id: RequestId,
        product_name: String,
        units: Vec<StockUnit>,
    },
    /// An open request passed its deadline and was swept.
    PaymentExpired {
        user_id: UserId,
        request_id: RequestId,
        payable_total: Rupiah,
    },
}

impl DeliveryEvent {
    pub fn user_id(&self) -> UserId {
        match self {
            DeliveryEvent::DepositCredited { user_id, .. }
            | DeliveryEvent::PurchaseDelivered { user_id, .. }
            | DeliveryEvent::PaymentExpired { user_id, .. } => *user_id,
        }
    }
}

/// Conditions that require an operator, not a bot reply.
#[derive(Debug, Clone)]
pub enum OperatorAlert {
    /// Money was confirmed paid but fulfillment failed; the request is
    /// Failed and owes the user a manual resolution.
    FulfillmentFailed {
        request_id: RequestId,
        user_id: UserId,
        reason: String,
    },
    /// A notification matched no open request. Never retried, never
    /// guessed; kept with its raw payload for manual reconciliation.
    UnmatchedNotification {
        amount: Rupiah,
        reference: CompactString,
        raw: Option<serde_json::Value>,
    },
    /// The issued artifact embeds a different amount than intended.
    /// Matching still runs on what the provider reports as paid.
    QrAmountMismatch {
        request_id: RequestId,
        expected: Rupiah,
        encoded: Rupiah,
    },
}
