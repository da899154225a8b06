use super::{ItemCode, Rupiah};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// A sellable product. The unit price is snapshotted into purchase
/// requests at open time, so later catalog edits never reprice an
/// outstanding payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub code: ItemCode,
    pub category: CompactString,
    pub name: String,
    pub price: Rupiah,
    pub detail: String,
}

/// One unit of stock: an opaque fulfillment payload (account/license
/// string) owned by an item code. Reservation and removal are the same
/// atomic act; there is no separate "reserved" state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUnit {
    pub code: ItemCode,
    pub detail: String,
}

impl StockUnit {
    pub fn new(code: impl Into<ItemCode>, detail: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            detail: detail.into(),
        }
    }
}
