#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod engine;
pub mod entities;
pub mod events;
pub mod flows;
pub mod fulfillment;
pub mod notify;
pub mod processors;
pub mod qr;
pub mod registry;
pub mod session;
pub mod stores;
