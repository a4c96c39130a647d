//! Testing helpers.
//!
//! A reply sender that records instead of calling Telegram, and builders for
//! the update payloads Telegram posts to the webhook.

use crate::bot::handlers::Reply;
use crate::bot::resilient::ReplySender;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use teloxide::types::{ChatId, Update};
use tokio::sync::Mutex;

/// Records every reply instead of sending it.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(ChatId, Reply)>>,
}

impl RecordingSender {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies recorded so far, in order
    pub async fn sent(&self) -> Vec<(ChatId, Reply)> {
        self.sent.lock().await.clone()
    }

    /// Drain the recorded replies
    pub async fn take(&self) -> Vec<(ChatId, Reply)> {
        std::mem::take(&mut *self.sent.lock().await)
    }
}

#[async_trait]
impl ReplySender for RecordingSender {
    async fn send_reply(&self, chat_id: ChatId, reply: Reply) -> Result<()> {
        self.sent.lock().await.push((chat_id, reply));
        Ok(())
    }
}

/// Webhook payload for a private text message from `user_id`.
///
/// # Example
///
/// ```
/// use linkgate_bot::testing::text_update;
///
/// let update = text_update(1, 42, "/video");
/// assert_eq!(update["message"]["from"]["id"], 42);
/// ```
#[must_use]
pub fn text_update(update_id: u32, user_id: i64, text: &str) -> Value {
    json!({
        "update_id": update_id,
        "message": {
            "message_id": update_id,
            "date": 1_760_868_000,
            "chat": {"id": user_id, "type": "private", "first_name": "Test"},
            "from": {"id": user_id, "is_bot": false, "first_name": "Test"},
            "text": text
        }
    })
}

/// Decode a payload the way the webhook route does, from its serialized bytes.
///
/// Going through `serde_json::from_value` instead yields `UpdateKind::Error`
/// for every payload.
///
/// # Errors
///
/// Returns an error if the payload is not an update at all.
pub fn parse_update(payload: &Value) -> serde_json::Result<Update> {
    serde_json::from_str(&payload.to_string())
}

/// Webhook payload for a callback query, which the bot does not handle.
#[must_use]
pub fn callback_query_update(update_id: u32, user_id: i64) -> Value {
    json!({
        "update_id": update_id,
        "callback_query": {
            "id": "cbq-1",
            "from": {"id": user_id, "is_bot": false, "first_name": "Test"},
            "chat_instance": "ci-1",
            "data": "noop"
        }
    })
}
