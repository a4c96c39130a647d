use crate::bot::handlers::{Command, CommandDeps};
use crate::bot::{TelegramSender, UpdateDispatcher};
use crate::config::{Settings, StorageBackend};
use crate::server::{self, AppState};
use crate::shortener::{GpLinksClient, LinkShortener};
use crate::storage::{InMemoryStorage, R2Storage, StorageProvider};
use crate::verification::VerificationService;
use anyhow::{Context, Result};
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};
use url::Url;

/// Wire every component and serve HTTP until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the storage backend or the shortener cannot be built,
/// or if the listener cannot be bound.
pub async fn run(settings: Arc<Settings>) -> Result<()> {
    let storage = init_storage(&settings).await?;
    let verification = VerificationService::with_window(storage, settings.verification_window());
    let shortener: Arc<dyn LinkShortener> = Arc::new(
        GpLinksClient::from_settings(&settings).context("failed to build link shortener")?,
    );

    let bot = Bot::new(settings.bot_token.clone());
    let bot_username = init_bot_username(&bot).await;
    if settings.register_webhook {
        register_webhook(&bot, &settings).await;
    }

    let deps = CommandDeps {
        verification,
        shortener,
        settings: settings.clone(),
    };
    let dispatcher = UpdateDispatcher::new(
        deps,
        Arc::new(TelegramSender::new(bot)),
        bot_username,
    );
    let app = server::router(AppState::new(dispatcher, settings.bot_token.clone()));

    let addr = settings.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("Bot is running on {addr}...");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Shutdown complete.");
    Ok(())
}

async fn init_storage(settings: &Settings) -> Result<Arc<dyn StorageProvider>> {
    match settings.storage_backend {
        StorageBackend::R2 => {
            let storage = R2Storage::new(settings)
                .await
                .context("failed to initialize R2 storage")?;
            info!("R2 Storage initialized.");
            if storage.check_connection().await.is_err() {
                // Details are logged by check_connection
                error!("R2 Storage connection check returned error.");
            }
            Ok(Arc::new(storage))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage, verifications are lost on restart.");
            Ok(Arc::new(InMemoryStorage::new()))
        }
    }
}

async fn init_bot_username(bot: &Bot) -> String {
    match bot.get_me().await {
        Ok(me) => {
            let username = me.user.username.clone().unwrap_or_default();
            info!("Authorized as @{username}.");
            username
        }
        Err(e) => {
            warn!("getMe failed, accepting commands addressed to any bot: {e}");
            String::new()
        }
    }
}

async fn register_webhook(bot: &Bot, settings: &Settings) {
    match Url::parse(&settings.webhook_url()) {
        Ok(url) => match bot.set_webhook(url).await {
            Ok(_) => info!("Webhook registered."),
            Err(e) => error!("Failed to register webhook: {e}"),
        },
        Err(e) => error!("Invalid webhook URL: {e}"),
    }

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        error!("Failed to register bot commands: {e}");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received.");
}
