//! Resilient messaging utilities with automatic retry for Telegram API operations.
//!
//! Handlers produce a [`Reply`]; a [`ReplySender`] delivers it. The Telegram
//! implementation retries transient failures using exponential backoff with jitter.

use crate::bot::handlers::Reply;
use crate::utils::retry_telegram_operation;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile, Message};
use tracing::debug;
use url::Url;

/// Delivers handler replies to a chat
#[async_trait]
pub trait ReplySender: Send + Sync {
    /// Send `reply` to `chat_id`
    async fn send_reply(&self, chat_id: ChatId, reply: Reply) -> Result<()>;
}

/// Sends replies through the Telegram Bot API
#[derive(Clone)]
pub struct TelegramSender {
    bot: Bot,
}

impl TelegramSender {
    /// Wrap a bot client
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ReplySender for TelegramSender {
    async fn send_reply(&self, chat_id: ChatId, reply: Reply) -> Result<()> {
        match reply {
            Reply::Text(text) => {
                send_message_resilient(&self.bot, chat_id, text).await?;
            }
            Reply::Video { url, caption } => {
                send_video_resilient(&self.bot, chat_id, &url, caption).await?;
            }
        }
        debug!("Reply delivered to chat {}", chat_id.0);
        Ok(())
    }
}

/// Send a message with automatic retry on network failures.
///
/// # Errors
///
/// Returns an error after all retries are exhausted.
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
) -> Result<Message> {
    let text = text.into();
    retry_telegram_operation(|| async {
        bot.send_message(chat_id, text.clone())
            .await
            .map_err(|e| anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Send a video by URL with a caption, retrying on network failures.
///
/// # Errors
///
/// Returns an error if `video_url` is not a URL, or after all retries are exhausted.
pub async fn send_video_resilient(
    bot: &Bot,
    chat_id: ChatId,
    video_url: &str,
    caption: impl Into<String>,
) -> Result<Message> {
    let url = Url::parse(video_url).with_context(|| format!("invalid video URL: {video_url}"))?;
    let caption = caption.into();
    retry_telegram_operation(|| async {
        bot.send_video(chat_id, InputFile::url(url.clone()))
            .caption(caption.clone())
            .await
            .map_err(|e| anyhow!("Telegram send video error: {e}"))
    })
    .await
}
