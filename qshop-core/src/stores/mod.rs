pub mod accounts;
pub mod catalog;
pub mod inventory;
pub mod snapshot;

pub use accounts::AccountStore;
pub use catalog::CatalogStore;
pub use inventory::InventoryStore;
pub use snapshot::{SnapshotError, flush_stores, load_stores};
