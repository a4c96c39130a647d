use crate::config::Settings;
use crate::shortener::{self, LinkShortener};
use crate::verification::VerificationService;
use std::sync::Arc;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};

/// Welcome text for `/start`
pub const WELCOME_TEXT: &str = "👋 স্বাগতম! ভিডিও দেখতে চাইলে আগে ভেরিফাই করুন /verify";
/// Prefix of the `/verify` reply; the link follows on the next line
pub const VERIFY_LINK_TEXT: &str = "✅ ভেরিফাই করতে এখানে ক্লিক করুন:";
/// Reply to `/video` for users without a valid verification
pub const VERIFY_FIRST_TEXT: &str = "⚠️ আগে ভেরিফাই করুন! /verify ব্যবহার করুন।";
/// Confirmation sent to the admin after a reset
pub const RESET_DONE_TEXT: &str = "🗑️ সব ইউজারের ভেরিফাই ডেটা রিসেট করা হয়েছে।";
/// Sent to the admin when the reset could not be stored
pub const RESET_FAILED_TEXT: &str = "❌ রিসেট ব্যর্থ হয়েছে, পরে আবার চেষ্টা করুন।";

/// Supported commands for the bot
#[derive(BotCommands, Clone, Copy, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Show the welcome message
    #[command(description = "Start the bot.")]
    Start,
    /// Get a verification link
    #[command(description = "Get a verification link.")]
    Verify,
    /// Receive the gated video
    #[command(description = "Watch the video.")]
    Video,
    /// Reset every user's verification (admin only)
    #[command(hide)]
    DeleteVideos,
}

impl Command {
    /// Map the leading token of a message to a command.
    ///
    /// Accepts `/name` and `/name@bot`; the mention must match `bot_username`
    /// when it is known. Trailing arguments are ignored. Returns `None` for
    /// anything that is not one of the four commands.
    ///
    /// # Examples
    ///
    /// ```
    /// use linkgate_bot::bot::handlers::Command;
    ///
    /// assert_eq!(Command::from_text("/video", "gate_bot"), Some(Command::Video));
    /// assert_eq!(Command::from_text("/Verify@gate_bot now", "gate_bot"), Some(Command::Verify));
    /// assert_eq!(Command::from_text("/video@other_bot", "gate_bot"), None);
    /// assert_eq!(Command::from_text("video", "gate_bot"), None);
    /// ```
    #[must_use]
    pub fn from_text(text: &str, bot_username: &str) -> Option<Self> {
        let token = text.split_whitespace().next()?.strip_prefix('/')?;
        let name = match token.split_once('@') {
            Some((name, mention)) => {
                if !bot_username.is_empty() && !mention.eq_ignore_ascii_case(bot_username) {
                    return None;
                }
                name
            }
            None => token,
        };

        match name.to_ascii_lowercase().as_str() {
            "start" => Some(Self::Start),
            "verify" => Some(Self::Verify),
            "video" => Some(Self::Video),
            "deletevideos" => Some(Self::DeleteVideos),
            _ => None,
        }
    }
}

/// What a handler wants sent back to the chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Plain text message
    Text(String),
    /// Video by URL with a caption
    Video {
        /// Video URL
        url: String,
        /// Caption shown under the video
        caption: String,
    },
}

/// Dependencies shared by every command handler
#[derive(Clone)]
pub struct CommandDeps {
    /// Verification lifecycle
    pub verification: VerificationService,
    /// Link shortening provider
    pub shortener: Arc<dyn LinkShortener>,
    /// Application settings
    pub settings: Arc<Settings>,
}

/// Start handler
#[must_use]
pub fn start(user_id: i64) -> Reply {
    info!("User {user_id} initiated /start command.");
    Reply::Text(WELCOME_TEXT.to_string())
}

/// Verify handler: replies with a (possibly shortened) link to the redirect route
pub async fn verify(deps: &CommandDeps, user_id: i64) -> Reply {
    let callback_url = deps.settings.verify_callback_url(user_id);
    let link = shortener::shorten(deps.shortener.as_ref(), &callback_url).await;
    info!("Issued verification link to user {user_id}.");
    Reply::Text(format!("{VERIFY_LINK_TEXT}\n{link}"))
}

/// Video handler: sends the gated video only to verified users.
///
/// A storage failure is treated as "not verified" for the user and logged
/// as an error.
pub async fn video(deps: &CommandDeps, user_id: i64) -> Reply {
    let verified = match deps.verification.is_verified(user_id).await {
        Ok(verified) => verified,
        Err(e) => {
            error!("Verification check failed for user {user_id}: {e}");
            false
        }
    };

    if !verified {
        info!("User {user_id} requested video without valid verification.");
        return Reply::Text(VERIFY_FIRST_TEXT.to_string());
    }

    info!("Sending video to verified user {user_id}.");
    Reply::Video {
        url: deps.settings.video_url.clone(),
        caption: deps.settings.video_caption.clone(),
    }
}

/// Delete-videos handler: admin-only reset of every verification.
///
/// Non-admin callers get no reply at all.
pub async fn delete_videos(deps: &CommandDeps, user_id: i64) -> Option<Reply> {
    if user_id != deps.settings.admin_id {
        warn!("User {user_id} tried /deletevideos without admin rights.");
        return None;
    }

    match deps.verification.reset_all().await {
        Ok(cleared) => {
            info!("Admin {user_id} reset verification for {cleared} users.");
            Some(Reply::Text(RESET_DONE_TEXT.to_string()))
        }
        Err(e) => {
            error!("Admin {user_id} reset failed: {e}");
            Some(Reply::Text(RESET_FAILED_TEXT.to_string()))
        }
    }
}

/// Run `cmd` for `user_id`, returning the reply to send, if any.
pub async fn execute(deps: &CommandDeps, cmd: Command, user_id: i64) -> Option<Reply> {
    match cmd {
        Command::Start => Some(start(user_id)),
        Command::Verify => Some(verify(deps, user_id).await),
        Command::Video => Some(video(deps, user_id).await),
        Command::DeleteVideos => delete_videos(deps, user_id).await,
    }
}
