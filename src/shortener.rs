//! Link shortening client
//!
//! Turns a verification callback URL into a shortened redirect link through
//! the GPLinks API. Shortening is optional: callers use [`shorten`], which
//! falls back to the original URL on any failure.

use crate::config::Settings;
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while shortening a link
#[derive(Error, Debug)]
pub enum ShortenerError {
    /// No API key configured
    #[error("shortener disabled: no API key configured")]
    Disabled,
    /// Request could not be sent or timed out
    #[error("network error: {0}")]
    Network(String),
    /// Provider answered with a non-success status code
    #[error("provider returned HTTP {0}")]
    Status(u16),
    /// Body was not valid JSON
    #[error("invalid JSON response: {0}")]
    InvalidJson(String),
    /// Provider reported an error in the body
    #[error("provider error: {0}")]
    Provider(String),
    /// JSON body had no usable `shortenedUrl`
    #[error("response is missing `shortenedUrl`")]
    MissingField,
    /// HTTP client could not be built with the configured timeout
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Interface for link shortening providers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkShortener: Send + Sync {
    /// Shorten `url`, reporting why it failed if it did
    async fn try_shorten(&self, url: &str) -> Result<String, ShortenerError>;
}

/// Shorten `url`, returning it unchanged if the provider fails.
pub async fn shorten(shortener: &dyn LinkShortener, url: &str) -> String {
    match shortener.try_shorten(url).await {
        Ok(short) => short,
        Err(ShortenerError::Disabled) => {
            debug!("Shortener disabled, using original link");
            url.to_string()
        }
        Err(e) => {
            warn!("Link shortening failed, using original link: {e}");
            url.to_string()
        }
    }
}

/// GPLinks API client
pub struct GpLinksClient {
    http: HttpClient,
    endpoint: String,
    api_key: Option<String>,
}

impl GpLinksClient {
    /// Create a client against `endpoint` with a per-request timeout
    ///
    /// # Errors
    ///
    /// Returns `ShortenerError::Client` if the HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ShortenerError> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ShortenerError::Client(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.filter(|key| !key.is_empty()),
        })
    }

    /// Create a client from application settings
    ///
    /// # Errors
    ///
    /// Returns `ShortenerError::Client` if the HTTP client cannot be built.
    pub fn from_settings(settings: &Settings) -> Result<Self, ShortenerError> {
        let client = Self::new(
            settings.shortener_endpoint.clone(),
            settings.shortener_api_key.clone(),
            Duration::from_secs(settings.shortener_timeout_secs),
        )?;
        if client.api_key.is_some() {
            info!("Link shortener enabled ({}).", client.endpoint);
        } else {
            info!("GPLINKS_API not set, verification links will not be shortened.");
        }
        Ok(client)
    }
}

#[async_trait]
impl LinkShortener for GpLinksClient {
    async fn try_shorten(&self, url: &str) -> Result<String, ShortenerError> {
        let api_key = self.api_key.as_deref().ok_or(ShortenerError::Disabled)?;

        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("api", api_key), ("url", url)])
            .send()
            .await
            .map_err(|e| ShortenerError::Network(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ShortenerError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ShortenerError::Network(e.without_url().to_string()))?;
        let json: Value =
            serde_json::from_str(&body).map_err(|e| ShortenerError::InvalidJson(e.to_string()))?;

        parse_shorten_response(&json)
    }
}

/// Extract the shortened link from a GPLinks response body.
///
/// # Errors
///
/// Returns `ShortenerError::Provider` for `"status": "error"` bodies and
/// `ShortenerError::MissingField` when no non-empty `shortenedUrl` is present.
pub fn parse_shorten_response(body: &Value) -> Result<String, ShortenerError> {
    if body.get("status").and_then(Value::as_str) == Some("error") {
        let message = match body.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "unknown error".to_string(),
        };
        return Err(ShortenerError::Provider(message));
    }

    body.get("shortenedUrl")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(ShortenerError::MissingField)
}
