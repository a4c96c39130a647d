//! Inbound HTTP routes.
//!
//! - `GET /` liveness probe
//! - `GET /verify/{user_id}` redirect target that records a verification
//! - `POST /{bot_token}` Telegram webhook

use crate::bot::UpdateDispatcher;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use teloxide::types::Update;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Liveness reply for `GET /`
pub const RUNNING_TEXT: &str = "🤖 Bot is running...";
/// Reply for a recorded verification
pub const VERIFIED_TEXT: &str = "✅ ভেরিফিকেশন সফল! এখন বটে গিয়ে /video লিখুন।";
/// Reply when the verification could not be stored
pub const VERIFY_FAILED_TEXT: &str = "❌ ভেরিফিকেশন ব্যর্থ হয়েছে, পরে আবার চেষ্টা করুন।";
/// Webhook acknowledgment
pub const WEBHOOK_ACK: &str = "ok";

/// Shared state of the HTTP routes
#[derive(Clone)]
pub struct AppState {
    /// Update routing and handler dependencies
    pub dispatcher: UpdateDispatcher,
    /// Path segment Telegram posts updates to
    pub webhook_secret: Arc<str>,
}

impl AppState {
    /// Build the route state
    #[must_use]
    pub fn new(dispatcher: UpdateDispatcher, webhook_secret: impl Into<Arc<str>>) -> Self {
        Self {
            dispatcher,
            webhook_secret: webhook_secret.into(),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/verify/:user_id", get(verify_redirect))
        .route("/:secret", post(webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn liveness() -> &'static str {
    RUNNING_TEXT
}

/// Non-integer ids are rejected by the `Path` extractor with `400`.
async fn verify_redirect(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> (StatusCode, &'static str) {
    let verification = &state.dispatcher.deps().verification;
    match verification.record_verification(user_id).await {
        Ok(()) => {
            info!("User {user_id} completed verification redirect.");
            (StatusCode::OK, VERIFIED_TEXT)
        }
        Err(e) => {
            error!("Failed to record verification for user {user_id}: {e}");
            (StatusCode::SERVICE_UNAVAILABLE, VERIFY_FAILED_TEXT)
        }
    }
}

async fn webhook(
    State(state): State<AppState>,
    Path(secret): Path<String>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if secret != *state.webhook_secret {
        warn!("Rejected webhook call on an unknown path.");
        return (StatusCode::NOT_FOUND, "");
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!("Malformed webhook payload ({} bytes): {e}", body.len());
            return (StatusCode::OK, WEBHOOK_ACK);
        }
    };

    if let Err(e) = state.dispatcher.dispatch(update).await {
        error!("Update handling failed: {e:#}");
    }
    (StatusCode::OK, WEBHOOK_ACK)
}
