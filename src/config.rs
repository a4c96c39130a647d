//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! tuning constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use url::Url;

/// Default shortening provider endpoint
pub const DEFAULT_SHORTENER_ENDPOINT: &str = "https://gplinks.in/api";
/// Default gated video
pub const DEFAULT_VIDEO_URL: &str = "https://file-examples.com/storage/fe5e1a2b3b9/video.mp4";
/// Default caption sent with the gated video
pub const DEFAULT_VIDEO_CAPTION: &str = "🎬 এখানে আপনার ভিডিও";
/// Verification window in seconds (3 hours)
pub const VERIFICATION_WINDOW_SECS: i64 = 3 * 60 * 60;

/// Maximum retries for Telegram API send operations
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
/// Initial backoff for Telegram API retries in milliseconds
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 200;
/// Backoff cap for Telegram API retries in milliseconds
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 5_000;

/// Selects where verification records live
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Cloudflare R2 / S3-compatible bucket
    #[default]
    R2,
    /// Process-local map, lost on restart
    Memory,
}

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token, also used as the webhook path segment
    pub bot_token: String,
    /// The only user allowed to run `/deletevideos`
    pub admin_id: i64,
    /// Public base URL the bot is reachable at
    pub base_url: String,

    /// Shortening provider API key; shortening is disabled without it
    #[serde(rename = "gplinks_api")]
    pub shortener_api_key: Option<String>,
    /// Shortening provider endpoint
    #[serde(default = "default_shortener_endpoint")]
    pub shortener_endpoint: String,
    /// Timeout for a single shortening request
    #[serde(default = "default_shortener_timeout_secs")]
    pub shortener_timeout_secs: u64,

    /// HTTP listen port
    #[serde(default = "default_port")]
    pub port: u16,
    /// HTTP listen address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Storage backend selector
    #[serde(default)]
    pub storage_backend: StorageBackend,
    /// R2 Storage access key ID
    pub r2_access_key_id: Option<String>,
    /// R2 Storage secret access key
    pub r2_secret_access_key: Option<String>,
    /// R2 Storage endpoint URL
    pub r2_endpoint_url: Option<String>,
    /// R2 Storage bucket name
    pub r2_bucket_name: Option<String>,

    /// Gated video URL
    #[serde(default = "default_video_url")]
    pub video_url: String,
    /// Caption sent with the gated video
    #[serde(default = "default_video_caption")]
    pub video_caption: String,

    /// How long a verification stays valid
    #[serde(default = "default_verification_window_secs")]
    pub verification_window_secs: i64,

    /// Register the webhook and command list with Telegram on startup
    #[serde(default = "default_register_webhook")]
    pub register_webhook: bool,
}

fn default_shortener_endpoint() -> String {
    DEFAULT_SHORTENER_ENDPOINT.to_string()
}

const fn default_shortener_timeout_secs() -> u64 {
    10
}

const fn default_port() -> u16 {
    10000
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_video_url() -> String {
    DEFAULT_VIDEO_URL.to_string()
}

fn default_video_caption() -> String {
    DEFAULT_VIDEO_CAPTION.to_string()
}

const fn default_verification_window_secs() -> i64 {
    VERIFICATION_WINDOW_SECS
}

const fn default_register_webhook() -> bool {
    true
}

/// Build the layered configuration source.
///
/// # Errors
///
/// Returns a `ConfigError` if a source cannot be read.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Not checked into git
        .add_source(File::with_name("config/local").required(false))
        // Eg.. `APP__PORT=8080 ./target/app` would set the `port` key
        .add_source(Environment::with_prefix("APP").separator("__"))
        // UPPER_SNAKE_CASE maps to snake_case, empty values count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use linkgate_bot::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or a value is invalid.
    pub fn new() -> Result<Self, ConfigError> {
        let settings: Self = build_config()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Settings with every optional value at its default and the in-memory
    /// storage backend. Webhook registration is off.
    #[must_use]
    pub fn with_defaults(
        bot_token: impl Into<String>,
        admin_id: i64,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            bot_token: bot_token.into(),
            admin_id,
            base_url: base_url.into(),
            shortener_api_key: None,
            shortener_endpoint: default_shortener_endpoint(),
            shortener_timeout_secs: default_shortener_timeout_secs(),
            port: default_port(),
            bind_address: default_bind_address(),
            storage_backend: StorageBackend::Memory,
            r2_access_key_id: None,
            r2_secret_access_key: None,
            r2_endpoint_url: None,
            r2_bucket_name: None,
            video_url: default_video_url(),
            video_caption: default_video_caption(),
            verification_window_secs: default_verification_window_secs(),
            register_webhook: false,
        }
    }

    /// Check values that deserialize fine but cannot work at runtime.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` describing the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot_token.trim().is_empty() {
            return Err(ConfigError::Message("BOT_TOKEN is empty".into()));
        }
        Url::parse(self.public_base_url())
            .map_err(|e| ConfigError::Message(format!("BASE_URL is not a valid URL: {e}")))?;
        Url::parse(&self.video_url)
            .map_err(|e| ConfigError::Message(format!("VIDEO_URL is not a valid URL: {e}")))?;
        if self.verification_window_secs <= 0 {
            return Err(ConfigError::Message(
                "VERIFICATION_WINDOW_SECS must be positive".into(),
            ));
        }
        if self.storage_backend == StorageBackend::R2 {
            let missing: Vec<&str> = [
                ("R2_ENDPOINT_URL", &self.r2_endpoint_url),
                ("R2_ACCESS_KEY_ID", &self.r2_access_key_id),
                ("R2_SECRET_ACCESS_KEY", &self.r2_secret_access_key),
                ("R2_BUCKET_NAME", &self.r2_bucket_name),
            ]
            .iter()
            .filter(|(_, value)| value.as_deref().is_none_or(str::is_empty))
            .map(|(name, _)| *name)
            .collect();
            if !missing.is_empty() {
                return Err(ConfigError::Message(format!(
                    "R2 storage selected but missing: {}",
                    missing.join(", ")
                )));
            }
        }
        self.listen_addr()?;
        Ok(())
    }

    /// Base URL without a trailing slash
    #[must_use]
    pub fn public_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Redirect target for a user: `{base}/verify/{user_id}`
    #[must_use]
    pub fn verify_callback_url(&self, user_id: i64) -> String {
        format!("{}/verify/{user_id}", self.public_base_url())
    }

    /// Webhook URL registered with Telegram: `{base}/{token}`
    #[must_use]
    pub fn webhook_url(&self) -> String {
        format!("{}/{}", self.public_base_url(), self.bot_token)
    }

    /// Socket address the HTTP server binds to
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` if `BIND_ADDRESS` is not an IP address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .map_err(|e| ConfigError::Message(format!("BIND_ADDRESS is invalid: {e}")))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Verification window as a duration
    #[must_use]
    pub fn verification_window(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::seconds(self.verification_window_secs)
    }
}
