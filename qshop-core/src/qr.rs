//! QR issuance adapter.
//!
//! The generator service turns the merchant's static QRIS code into a
//! dynamic one carrying an exact payable amount. It is an opaque
//! collaborator: amount in, scannable image out. The adapter also tries
//! to recover the amount embedded in the issued artifact (EMV tag 54)
//! so the engine can cross-check it against the intended total.

use crate::entities::Rupiah;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// The displayable artifact for one payment request.
#[derive(Debug, Clone)]
pub struct QrArtifact {
    /// Scannable payment image, ready to send to the chat session.
    pub image: Bytes,
    /// Amount recovered from the artifact itself, if decodable.
    /// Best-effort; `None` is tolerated.
    pub encoded_amount: Option<Rupiah>,
}

#[derive(Debug, Error)]
pub enum QrIssueError {
    #[error("QR generator request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("QR generator returned no artifact")]
    MissingArtifact,
    #[error("QR generator response was malformed: {0}")]
    MalformedResponse(String),
}

/// External QR payment artifact issuer.
#[async_trait]
pub trait QrIssuer: Send + Sync {
    async fn issue(&self, amount: Rupiah) -> Result<QrArtifact, QrIssueError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    #[serde(rename = "qrisCode")]
    qris_code: &'a str,
    nominal: String,
    #[serde(rename = "feeType")]
    fee_type: &'static str,
    fee: &'static str,
    #[serde(rename = "includeFee")]
    include_fee: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(rename = "qrCode")]
    qr_code: Option<String>,
}

/// HTTP adapter for the static-to-dynamic QRIS generator service.
pub struct HttpQrIssuer {
    client: reqwest::Client,
    endpoint: String,
    qris_code: String,
}

impl HttpQrIssuer {
    /// The timeout bounds the only external suspension point of the
    /// open path; on timeout the caller never leaves a partial request
    /// behind.
    pub fn new(endpoint: String, qris_code: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint,
            qris_code,
        }
    }
}

#[async_trait]
impl QrIssuer for HttpQrIssuer {
    async fn issue(&self, amount: Rupiah) -> Result<QrArtifact, QrIssueError> {
        let body = GenerateRequest {
            qris_code: &self.qris_code,
            nominal: amount.to_string(),
            fee_type: "r",
            fee: "0",
            include_fee: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<GenerateResponse>()
            .await?;

        let data_url = response.qr_code.ok_or(QrIssueError::MissingArtifact)?;

        // The generator returns a data URL; the payload after the comma
        // is base64.
        let payload = data_url
            .rsplit_once(',')
            .map_or(data_url.as_str(), |(_, payload)| payload);
        let decoded = BASE64
            .decode(payload.trim())
            .map_err(|e| QrIssueError::MalformedResponse(e.to_string()))?;

        // If the payload decodes as text it is the QRIS string itself;
        // recover the transaction amount from it for self-verification.
        let encoded_amount = std::str::from_utf8(&decoded)
            .ok()
            .and_then(embedded_amount);

        Ok(QrArtifact {
            image: Bytes::from(decoded),
            encoded_amount,
        })
    }
}

/// Parse the transaction amount (EMV tag 54) out of a QRIS payload.
///
/// QRIS is a sequence of TLV fields: two-digit id, two-digit length,
/// value. A static code has no tag 54 at all, which callers treat as
/// "amount unknown".
pub fn embedded_amount(payload: &str) -> Option<Rupiah> {
    let bytes = payload.as_bytes();
    let mut pos = 0;
    while pos + 4 <= bytes.len() {
        let id = payload.get(pos..pos + 2)?;
        let len: usize = payload.get(pos + 2..pos + 4)?.parse().ok()?;
        let value = payload.get(pos + 4..pos + 4 + len)?;
        if id == "54" {
            // Amounts may carry a decimal part ("5123.00"); rupiah are
            // integral, so the fraction is dropped.
            let integral = value.split('.').next()?;
            return integral.parse().ok();
        }
        pos += 4 + len;
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // Minimal but structurally valid QRIS-like TLV strings.
    fn tlv(fields: &[(&str, &str)]) -> String {
        fields
            .iter()
            .map(|(id, value)| format!("{id}{:02}{value}", value.len()))
            .collect()
    }

    #[test]
    fn recovers_tag_54_amount() {
        let payload = tlv(&[
            ("00", "01"),
            ("26", "0016ID.CO.EXAMPLE.WW"),
            ("54", "5123"),
            ("58", "ID"),
        ]);
        assert_eq!(embedded_amount(&payload), Some(5123));
    }

    #[test]
    fn tolerates_decimal_amounts() {
        let payload = tlv(&[("54", "10250.00")]);
        assert_eq!(embedded_amount(&payload), Some(10_250));
    }

    #[test]
    fn static_codes_have_no_amount() {
        let payload = tlv(&[("00", "01"), ("58", "ID")]);
        assert_eq!(embedded_amount(&payload), None);
    }

    #[test]
    fn garbage_is_not_an_amount() {
        assert_eq!(embedded_amount("not a qris payload"), None);
        assert_eq!(embedded_amount(""), None);
        // Truncated value: the declared length exceeds the payload.
        assert_eq!(embedded_amount("5404"), None);
    }
}
