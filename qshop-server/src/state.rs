//! Application state shared across all request handlers.

use qshop_core::engine::ReconciliationEngine;
use ring::hmac;
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    /// The payment reconciliation engine.
    pub engine: Arc<ReconciliationEngine>,
    /// HMAC key for verifying callback signatures. `None` disables
    /// verification.
    pub callback_key: Option<Arc<hmac::Key>>,
}

impl AppState {
    pub fn new(engine: Arc<ReconciliationEngine>, callback_secret: Option<&str>) -> Self {
        let callback_key = callback_secret
            .map(|secret| Arc::new(hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes())));
        Self {
            engine,
            callback_key,
        }
    }
}
