//! Background processors.
//!
//! Each processor owns a run loop driven by `tokio::select!` and stops
//! when the shared shutdown watch flips to `true`:
//!
//! - `ExpirySweeper`: periodically expires overdue payment requests
//! - `DeliveryWorker`: renders `DeliveryEvent`/`OperatorAlert` into chat messages
//! - `SnapshotFlusher`: periodically persists the in-process stores

pub mod delivery_worker;
pub mod expiry_sweeper;
pub mod snapshot_flusher;

pub use delivery_worker::DeliveryWorker;
pub use expiry_sweeper::ExpirySweeper;
pub use snapshot_flusher::SnapshotFlusher;
