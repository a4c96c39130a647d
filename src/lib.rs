#![deny(missing_docs)]
//! Verification-gated video bot for Telegram.
//!
//! Users unlock the video by completing a shortened-link redirect; the
//! unlock lasts for a fixed window.

/// Telegram command handling and reply delivery.
pub mod bot;
/// Configuration management.
pub mod config;
/// Runtime entrypoint.
pub mod runner;
/// Inbound HTTP routes.
pub mod server;
/// Link shortening client.
pub mod shortener;
/// Storage layer (R2/S3 and in-memory).
pub mod storage;
/// Helpers for unit and integration tests.
pub mod testing;
/// Utility functions.
pub mod utils;
/// Time-limited user verification.
pub mod verification;
