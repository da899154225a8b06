//! In-process inventory store.
//!
//! Stock mutations serialize per item code: each code owns its own async
//! mutex, so two purchases of the same code can never both take the last
//! unit, while unrelated codes proceed concurrently. Reservation and
//! removal are one atomic act inside the per-key critical section.

use crate::entities::ItemCode;
use crate::entities::catalog::StockUnit;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
pub struct InventoryStore {
    shelves: RwLock<HashMap<ItemCode, Arc<Mutex<Vec<StockUnit>>>>>,
}

impl InventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_units(units: HashMap<ItemCode, Vec<StockUnit>>) -> Self {
        let shelves = units
            .into_iter()
            .map(|(code, list)| (code, Arc::new(Mutex::new(list))))
            .collect();
        Self {
            shelves: RwLock::new(shelves),
        }
    }

    async fn shelf(&self, code: &ItemCode) -> Option<Arc<Mutex<Vec<StockUnit>>>> {
        self.shelves.read().await.get(code).cloned()
    }

    async fn shelf_or_insert(&self, code: &ItemCode) -> Arc<Mutex<Vec<StockUnit>>> {
        let mut shelves = self.shelves.write().await;
        shelves.entry(code.clone()).or_default().clone()
    }

    /// Remaining units for an item code.
    pub async fn count(&self, code: &ItemCode) -> usize {
        match self.shelf(code).await {
            Some(shelf) => shelf.lock().await.len(),
            None => 0,
        }
    }

    /// Atomically reserve-and-remove `quantity` units. Returns `None`
    /// without removing anything if fewer than `quantity` remain.
    pub async fn reserve(&self, code: &ItemCode, quantity: usize) -> Option<Vec<StockUnit>> {
        let shelf = self.shelf(code).await?;
        let mut units = shelf.lock().await;
        if units.len() < quantity {
            return None;
        }
        Some(units.drain(..quantity).collect())
    }

    /// Restock: append units for an item code (admin `/addstok` path).
    pub async fn add_units(&self, code: &ItemCode, new_units: Vec<StockUnit>) -> usize {
        let shelf = self.shelf_or_insert(code).await;
        let mut units = shelf.lock().await;
        units.extend(new_units);
        units.len()
    }

    /// Remove a single unit by position (admin `/delstok` path).
    pub async fn remove_unit(&self, code: &ItemCode, index: usize) -> Option<StockUnit> {
        let shelf = self.shelf(code).await?;
        let mut units = shelf.lock().await;
        if index < units.len() {
            Some(units.remove(index))
        } else {
            None
        }
    }

    /// Snapshot the full inventory for persistence.
    pub async fn dump(&self) -> HashMap<ItemCode, Vec<StockUnit>> {
        let shelves = self.shelves.read().await;
        let mut out = HashMap::with_capacity(shelves.len());
        for (code, shelf) in shelves.iter() {
            out.insert(code.clone(), shelf.lock().await.clone());
        }
        out
    }
}
