//! Routing of inbound Telegram updates to command handlers.

use crate::bot::handlers::{self, Command, CommandDeps};
use crate::bot::resilient::ReplySender;
use crate::utils::truncate_str;
use anyhow::{Context, Result};
use std::sync::Arc;
use teloxide::types::{Message, Update, UpdateKind};
use tracing::{debug, info, warn};

/// Safe extraction of user ID from a message.
/// Returns 0 if the user information is missing.
#[must_use]
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

/// Maps updates to commands and delivers the replies.
#[derive(Clone)]
pub struct UpdateDispatcher {
    deps: CommandDeps,
    sender: Arc<dyn ReplySender>,
    bot_username: Arc<str>,
}

impl UpdateDispatcher {
    /// Create a dispatcher.
    ///
    /// `bot_username` filters `/cmd@other_bot` mentions; pass an empty string
    /// when unknown to accept any mention.
    #[must_use]
    pub fn new(
        deps: CommandDeps,
        sender: Arc<dyn ReplySender>,
        bot_username: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            deps,
            sender,
            bot_username: bot_username.into(),
        }
    }

    /// Handler dependencies
    #[must_use]
    pub const fn deps(&self) -> &CommandDeps {
        &self.deps
    }

    /// Handle one update. Anything that is not a known command in a text
    /// message is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply could not be delivered.
    pub async fn dispatch(&self, update: Update) -> Result<()> {
        let update_id = update.id.0;
        match update.kind {
            UpdateKind::Message(msg) => self.handle_message(&msg).await,
            UpdateKind::Error(payload) => {
                warn!(
                    "Unparseable update {update_id}: {}",
                    truncate_str(&payload.to_string(), 200)
                );
                Ok(())
            }
            _ => {
                debug!("Ignoring non-message update.");
                Ok(())
            }
        }
    }

    /// Handle one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply could not be delivered.
    pub async fn handle_message(&self, msg: &Message) -> Result<()> {
        let Some(text) = msg.text() else {
            debug!("Ignoring non-text message in chat {}.", msg.chat.id.0);
            return Ok(());
        };

        let Some(cmd) = Command::from_text(text, &self.bot_username) else {
            debug!("Ignoring message '{}'.", truncate_str(text, 50));
            return Ok(());
        };

        let user_id = get_user_id_safe(msg);
        if user_id == 0 {
            debug!("Ignoring {cmd:?} without a sender in chat {}.", msg.chat.id.0);
            return Ok(());
        }

        info!("Dispatching {cmd:?} from user {user_id}.");
        let Some(reply) = handlers::execute(&self.deps, cmd, user_id).await else {
            return Ok(());
        };

        self.sender
            .send_reply(msg.chat.id, reply)
            .await
            .with_context(|| format!("failed to reply to user {user_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::handlers::{Reply, VERIFY_FIRST_TEXT, WELCOME_TEXT};
    use crate::config::Settings;
    use crate::shortener::MockLinkShortener;
    use crate::storage::{InMemoryStorage, StorageProvider};
    use crate::testing::{callback_query_update, parse_update, text_update, RecordingSender};
    use crate::verification::VerificationService;
    use chrono::Utc;
    use serde_json::json;
    use teloxide::types::ChatId;

    const ADMIN: i64 = 7;

    fn dispatcher(
        sender: Arc<RecordingSender>,
        storage: Arc<InMemoryStorage>,
    ) -> UpdateDispatcher {
        let deps = CommandDeps {
            verification: VerificationService::new(storage),
            shortener: Arc::new(MockLinkShortener::new()),
            settings: Arc::new(Settings::with_defaults(
                "123456:ABC",
                ADMIN,
                "https://bot.example.com",
            )),
        };
        UpdateDispatcher::new(deps, sender, "gate_bot")
    }

    fn message_update(update_id: u32, user_id: i64, text: &str) -> anyhow::Result<Update> {
        let update = parse_update(&text_update(update_id, user_id, text))?;
        assert!(
            matches!(update.kind, UpdateKind::Message(_)),
            "payload did not decode as a message: {:?}",
            update.kind
        );
        Ok(update)
    }

    #[tokio::test]
    async fn test_dispatches_command_to_sender() -> anyhow::Result<()> {
        let sender = Arc::new(RecordingSender::new());
        let dispatcher = dispatcher(sender.clone(), Arc::new(InMemoryStorage::new()));

        dispatcher.dispatch(message_update(1, 42, "/start")?).await?;
        dispatcher
            .dispatch(message_update(2, 42, "/video@gate_bot")?)
            .await?;

        assert_eq!(
            sender.sent().await,
            vec![
                (ChatId(42), Reply::Text(WELCOME_TEXT.to_string())),
                (ChatId(42), Reply::Text(VERIFY_FIRST_TEXT.to_string())),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_ignores_non_commands() -> anyhow::Result<()> {
        let sender = Arc::new(RecordingSender::new());
        let dispatcher = dispatcher(sender.clone(), Arc::new(InMemoryStorage::new()));

        for (id, text) in [(1, "hello"), (2, "/help"), (3, "/video@other_bot")] {
            dispatcher.dispatch(message_update(id, 42, text)?).await?;
        }
        dispatcher
            .dispatch(parse_update(&callback_query_update(4, 42))?)
            .await?;
        assert!(sender.sent().await.is_empty());

        // The same sender still gets a reply for a real command
        dispatcher.dispatch(message_update(5, 42, "/video")?).await?;
        assert_eq!(sender.sent().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_only_for_admin() -> anyhow::Result<()> {
        let sender = Arc::new(RecordingSender::new());
        let storage = Arc::new(InMemoryStorage::new());
        storage.upsert_verification(42, Utc::now()).await?;
        let dispatcher = dispatcher(sender.clone(), storage);

        dispatcher
            .dispatch(message_update(1, 8, "/deletevideos")?)
            .await?;
        assert!(sender.sent().await.is_empty());
        assert!(dispatcher.deps().verification.is_verified(42).await?);

        dispatcher
            .dispatch(message_update(2, ADMIN, "/deletevideos")?)
            .await?;
        assert_eq!(sender.sent().await.len(), 1);
        assert!(!dispatcher.deps().verification.is_verified(42).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_unparseable_message_is_dropped() -> anyhow::Result<()> {
        let sender = Arc::new(RecordingSender::new());
        let dispatcher = dispatcher(sender.clone(), Arc::new(InMemoryStorage::new()));

        let update = parse_update(&json!({"update_id": 1, "message": {"bogus": 1}}))?;
        assert!(matches!(update.kind, UpdateKind::Error(_)));

        dispatcher.dispatch(update).await?;
        assert!(sender.sent().await.is_empty());
        Ok(())
    }
}
