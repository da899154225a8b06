//! `POST /api/qris/callback` — inbound payment notification.
//!
//! The provider reports a settled payment as JSON carrying at least the
//! paid `amount` and a unique `reference_id`. The raw body is kept for
//! signature verification and for the unmatched-payment audit trail.
//! Every well-formed notification is answered 200 regardless of match
//! outcome; anything else would make the provider retry notifications
//! the engine has already decided on.

use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use base64::Engine as _;
use bytes::Bytes;
use compact_str::{CompactString, ToCompactString};
use qshop_core::engine::NotificationOutcome;
use qshop_core::entities::Rupiah;
use qshop_core::entities::notification::PaymentNotification;
use serde::Serialize;
use thiserror::Error;

const SIGNATURE_HEADER: &str = "x-callback-signature";

#[derive(Debug, Error)]
pub enum CallbackApiError {
    #[error("missing {SIGNATURE_HEADER} header")]
    MissingSignature,

    #[error("callback signature verification failed")]
    InvalidSignature,

    #[error("callback body is not valid JSON")]
    MalformedBody,

    #[error("callback body is missing field {0}")]
    MissingField(&'static str),
}

impl IntoResponse for CallbackApiError {
    fn into_response(self) -> Response {
        let status = match self {
            CallbackApiError::MissingSignature | CallbackApiError::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
            CallbackApiError::MalformedBody | CallbackApiError::MissingField(_) => {
                StatusCode::BAD_REQUEST
            }
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
struct CallbackResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<CompactString>,
}

pub(super) async fn qris_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, CallbackApiError> {
    if let Some(key) = &state.callback_key {
        verify_signature(key, &headers, &body)?;
    }

    let payload: serde_json::Value =
        serde_json::from_slice(&body).map_err(|_| CallbackApiError::MalformedBody)?;

    let amount = extract_amount(&payload).ok_or(CallbackApiError::MissingField("amount"))?;
    let reference = extract_reference(&payload)
        .ok_or(CallbackApiError::MissingField("reference_id"))?;

    let outcome = state
        .engine
        .apply_notification(PaymentNotification {
            amount,
            reference,
            raw: Some(payload),
        })
        .await;

    let response = match outcome {
        NotificationOutcome::Applied { request_id } => CallbackResponse {
            status: "applied",
            request_id: Some(request_id),
        },
        NotificationOutcome::DuplicateIgnored => CallbackResponse {
            status: "duplicate_ignored",
            request_id: None,
        },
        NotificationOutcome::Unmatched => CallbackResponse {
            status: "unmatched",
            request_id: None,
        },
    };

    Ok((StatusCode::OK, Json(response)))
}

fn verify_signature(
    key: &ring::hmac::Key,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), CallbackApiError> {
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(CallbackApiError::MissingSignature)?;

    let signature = base64::engine::general_purpose::STANDARD
        .decode(header)
        .map_err(|_| CallbackApiError::InvalidSignature)?;

    ring::hmac::verify(key, body, &signature).map_err(|_| CallbackApiError::InvalidSignature)
}

/// Providers are inconsistent about numeric types; accept an integer or
/// a numeric string (with or without a ".00" suffix).
fn extract_amount(payload: &serde_json::Value) -> Option<Rupiah> {
    let value = payload.get("amount")?;
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    let s = value.as_str()?.trim();
    if let Ok(n) = s.parse::<i64>() {
        return Some(n);
    }
    let f = s.parse::<f64>().ok()?;
    (f.fract() == 0.0).then_some(f as i64)
}

fn extract_reference(payload: &serde_json::Value) -> Option<CompactString> {
    for field in ["reference_id", "ref_id", "id"] {
        if let Some(s) = payload.get(field).and_then(|v| v.as_str()) {
            return Some(s.to_compact_string());
        }
    }
    None
}
