//! Event channel factories and handles.

use super::types::{DeliveryEvent, OperatorAlert};
use tokio::sync::mpsc;

/// Default buffer size for event channels. Enough to absorb bursts
/// while keeping memory bounded.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for DeliveryEvent events.
pub type DeliveryEventSender = mpsc::Sender<DeliveryEvent>;
/// Receiver handle for DeliveryEvent events.
pub type DeliveryEventReceiver = mpsc::Receiver<DeliveryEvent>;

/// Sender handle for OperatorAlert events.
pub type OperatorAlertSender = mpsc::Sender<OperatorAlert>;
/// Receiver handle for OperatorAlert events.
pub type OperatorAlertReceiver = mpsc::Receiver<OperatorAlert>;

/// Create a new DeliveryEvent channel.
pub fn delivery_event_channel() -> (DeliveryEventSender, DeliveryEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Create a new OperatorAlert channel.
pub fn operator_alert_channel() -> (OperatorAlertSender, OperatorAlertReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}
