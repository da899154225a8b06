//! Flat-file JSON snapshots of the in-process stores.
//!
//! One file per store under the data directory, written atomically
//! (write to a temp file, then rename). This is the mandated durability
//! scope: process-local state with periodic flush, nothing more.

use super::{AccountStore, CatalogStore, InventoryStore};
use crate::entities::catalog::{Product, StockUnit};
use crate::entities::{ItemCode, Rupiah, UserId};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

const ACCOUNTS_FILE: &str = "users.json";
const INVENTORY_FILE: &str = "stocks.json";
const CATALOG_FILE: &str = "products.json";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

async fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, SnapshotError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SnapshotError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Load all stores from the data directory. Missing files yield empty
/// stores, so first boot needs no seeding step.
pub async fn load_stores(
    dir: &Path,
) -> Result<(AccountStore, InventoryStore, CatalogStore), SnapshotError> {
    let balances: HashMap<UserId, Rupiah> = read_json(&dir.join(ACCOUNTS_FILE)).await?;
    let units: HashMap<ItemCode, Vec<StockUnit>> = read_json(&dir.join(INVENTORY_FILE)).await?;
    let products: HashMap<ItemCode, Product> = read_json(&dir.join(CATALOG_FILE)).await?;

    Ok((
        AccountStore::from_balances(balances),
        InventoryStore::from_units(units),
        CatalogStore::from_products(products),
    ))
}

/// Flush all stores to the data directory.
pub async fn flush_stores(
    dir: &Path,
    accounts: &AccountStore,
    inventory: &InventoryStore,
    catalog: &CatalogStore,
) -> Result<(), SnapshotError> {
    tokio::fs::create_dir_all(dir).await?;
    write_json(&dir.join(ACCOUNTS_FILE), &accounts.dump().await).await?;
    write_json(&dir.join(INVENTORY_FILE), &inventory.dump().await).await?;
    write_json(&dir.join(CATALOG_FILE), &catalog.dump().await).await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_the_data_directory() {
        let dir = tempfile::tempdir().unwrap();

        let accounts = AccountStore::new();
        accounts.credit(7, 12_000).await;
        let inventory = InventoryStore::new();
        let code = ItemCode::from("CP001");
        inventory
            .add_units(&code, vec![StockUnit::new("CP001", "acct:pass")])
            .await;
        let catalog = CatalogStore::new();

        flush_stores(dir.path(), &accounts, &inventory, &catalog)
            .await
            .unwrap();

        let (accounts2, inventory2, _catalog2) = load_stores(dir.path()).await.unwrap();
        assert_eq!(accounts2.balance(7).await, 12_000);
        assert_eq!(inventory2.count(&code).await, 1);
    }

    #[tokio::test]
    async fn missing_files_load_as_empty_stores() {
        let dir = tempfile::tempdir().unwrap();
        let (accounts, inventory, catalog) = load_stores(dir.path()).await.unwrap();
        assert_eq!(accounts.balance(1).await, 0);
        assert_eq!(inventory.count(&ItemCode::from("X")).await, 0);
        assert!(catalog.get(&ItemCode::from("X")).await.is_none());
    }
}
