pub mod catalog;
pub mod notification;
pub mod payment_request;

use compact_str::CompactString;

/// Integer rupiah. Amounts are never fractional.
pub type Rupiah = i64;

/// Chat platform user identifier.
pub type UserId = i64;

/// Caller-supplied opaque payment request identifier
/// (e.g. `DEPOSIT-{user}-{unix_millis}`).
pub type RequestId = CompactString;

/// Product / stock item code (e.g. `CP001`).
pub type ItemCode = CompactString;
