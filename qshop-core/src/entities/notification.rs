use super::Rupiah;
use compact_str::CompactString;

/// An inbound payment notification as reported by the QR payment
/// provider. The observed amount is authoritative; the raw payload is
/// kept only for logging and manual reconciliation of unmatched
/// notifications.
#[derive(Debug, Clone)]
pub struct PaymentNotification {
    /// The total amount the provider reports as paid.
    pub amount: Rupiah,
    /// Provider-assigned unique transaction reference.
    pub reference: CompactString,
    /// Raw provider payload, if the boundary captured it.
    pub raw: Option<serde_json::Value>,
}
