pub mod channels;
pub mod types;

pub use channels::{
    DeliveryEventReceiver, DeliveryEventSender, OperatorAlertReceiver, OperatorAlertSender,
    delivery_event_channel, operator_alert_channel,
};
pub use types::{DeliveryEvent, OperatorAlert};
