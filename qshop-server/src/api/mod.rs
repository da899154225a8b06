//! Provider-facing API handlers.
//!
//! # Endpoints
//!
//! - `POST /qris/callback` – inbound payment notification from the
//!   QRIS provider

use crate::state::AppState;
use axum::{Router, routing::post};

mod callback;

/// Build the API router, mounted under `/api`.
pub fn router() -> Router<AppState> {
    Router::new().route("/qris/callback", post(callback::qris_callback))
}
