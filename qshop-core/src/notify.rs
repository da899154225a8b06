//! Chat session delivery boundary.
//!
//! The core only needs a "deliver message to user X" capability; how the
//! message is rendered into the chat platform is someone else's problem.
//! Delivery is not retried here.

use crate::entities::UserId;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("chat relay request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("chat relay rejected the message with status {status}")]
    Rejected { status: u16 },
}

/// Abstract downstream chat session.
#[async_trait]
pub trait ChatNotifier: Send + Sync {
    async fn deliver(&self, user_id: UserId, text: &str) -> Result<(), NotifyError>;
}

/// Notifier that only logs. Used when no chat relay is configured and
/// in tests.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl ChatNotifier for LogNotifier {
    async fn deliver(&self, user_id: UserId, text: &str) -> Result<(), NotifyError> {
        tracing::info!(user_id, text, "chat delivery (log only)");
        Ok(())
    }
}

#[derive(serde::Serialize)]
struct RelayMessage<'a> {
    user_id: UserId,
    text: &'a str,
}

/// Notifier that POSTs messages to an HTTP chat relay (the bot process).
pub struct HttpChatNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpChatNotifier {
    pub fn new(endpoint: String, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, endpoint }
    }
}

#[async_trait]
impl ChatNotifier for HttpChatNotifier {
    async fn deliver(&self, user_id: UserId, text: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RelayMessage { user_id, text })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}
