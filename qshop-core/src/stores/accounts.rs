//! In-process account balances.
//!
//! Per-user mutation serializes on a per-key mutex; balances are never
//! observed negative at rest because a debit is checked and applied
//! inside the same critical section.

use crate::entities::{Rupiah, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
pub struct AccountStore {
    balances: RwLock<HashMap<UserId, Arc<Mutex<Rupiah>>>>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_balances(balances: HashMap<UserId, Rupiah>) -> Self {
        let balances = balances
            .into_iter()
            .map(|(user, amount)| (user, Arc::new(Mutex::new(amount))))
            .collect();
        Self {
            balances: RwLock::new(balances),
        }
    }

    async fn account(&self, user: UserId) -> Arc<Mutex<Rupiah>> {
        if let Some(existing) = self.balances.read().await.get(&user) {
            return existing.clone();
        }
        let mut balances = self.balances.write().await;
        balances.entry(user).or_default().clone()
    }

    pub async fn balance(&self, user: UserId) -> Rupiah {
        match self.balances.read().await.get(&user) {
            Some(account) => *account.lock().await,
            None => 0,
        }
    }

    /// Credit an amount, returning the new balance.
    pub async fn credit(&self, user: UserId, amount: Rupiah) -> Rupiah {
        let account = self.account(user).await;
        let mut balance = account.lock().await;
        *balance += amount;
        *balance
    }

    /// Debit only if the balance covers the amount. Returns the new
    /// balance, or `None` leaving the balance untouched.
    pub async fn debit_if_sufficient(&self, user: UserId, amount: Rupiah) -> Option<Rupiah> {
        let account = self.account(user).await;
        let mut balance = account.lock().await;
        if *balance < amount {
            return None;
        }
        *balance -= amount;
        Some(*balance)
    }

    /// Snapshot all balances for persistence.
    pub async fn dump(&self) -> HashMap<UserId, Rupiah> {
        let balances = self.balances.read().await;
        let mut out = HashMap::with_capacity(balances.len());
        for (user, account) in balances.iter() {
            out.insert(*user, *account.lock().await);
        }
        out
    }
}
