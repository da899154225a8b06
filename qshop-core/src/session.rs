//! Per-user chat session state.
//!
//! Replaces the scattered "waiting for deposit amount" / "editing
//! quantity" flags with one tagged variant per user, owned here and
//! consumed by the message-dispatch boundary. The reconciliation core
//! never depends on this representation.

use crate::entities::{ItemCode, UserId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// What the next free-text message from a user means.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum UserSession {
    #[default]
    Idle,
    /// The user tapped "deposit"; the next number is the amount.
    AwaitingDepositAmount,
    /// The user tapped the quantity editor; the next number is the
    /// quantity for this product.
    AwaitingQtyEdit { product: ItemCode },
}

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<UserId, UserSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, user: UserId, session: UserSession) {
        let mut sessions = self.sessions.write().await;
        if session == UserSession::Idle {
            sessions.remove(&user);
        } else {
            sessions.insert(user, session);
        }
    }

    /// Consume the user's pending state, resetting it to Idle. The
    /// boundary calls this once per free-text message, so a stale state
    /// can never apply twice.
    pub async fn take(&self, user: UserId) -> UserSession {
        self.sessions.write().await.remove(&user).unwrap_or_default()
    }

    pub async fn get(&self, user: UserId) -> UserSession {
        self.sessions
            .read()
            .await
            .get(&user)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn take_consumes_the_state() {
        let store = SessionStore::new();
        store.set(7, UserSession::AwaitingDepositAmount).await;

        assert_eq!(store.take(7).await, UserSession::AwaitingDepositAmount);
        assert_eq!(store.take(7).await, UserSession::Idle);
    }

    #[tokio::test]
    async fn setting_idle_clears_the_entry() {
        let store = SessionStore::new();
        let code = ItemCode::from("CP001");
        store
            .set(7, UserSession::AwaitingQtyEdit { product: code.clone() })
            .await;
        assert_eq!(store.get(7).await, UserSession::AwaitingQtyEdit { product: code });

        store.set(7, UserSession::Idle).await;
        assert_eq!(store.get(7).await, UserSession::Idle);
    }
}
