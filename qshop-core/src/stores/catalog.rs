//! Product catalog records.
//!
//! Lookup by item code plus the upsert needed by the admin restock path.
//! Catalog CRUD UI lives outside this crate; purchase flows only read.

use crate::entities::ItemCode;
use crate::entities::catalog::Product;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct CatalogStore {
    products: RwLock<HashMap<ItemCode, Product>>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_products(products: HashMap<ItemCode, Product>) -> Self {
        Self {
            products: RwLock::new(products),
        }
    }

    pub async fn get(&self, code: &ItemCode) -> Option<Product> {
        self.products.read().await.get(code).cloned()
    }

    pub async fn upsert(&self, product: Product) {
        self.products
            .write()
            .await
            .insert(product.code.clone(), product);
    }

    pub async fn remove(&self, code: &ItemCode) -> Option<Product> {
        self.products.write().await.remove(code)
    }

    /// All products in a category, for stock listings.
    pub async fn by_category(&self, category: &str) -> Vec<Product> {
        self.products
            .read()
            .await
            .values()
            .filter(|p| p.category.eq_ignore_ascii_case(category))
            .cloned()
            .collect()
    }

    pub async fn dump(&self) -> HashMap<ItemCode, Product> {
        self.products.read().await.clone()
    }
}
