/// Update routing from the webhook to command handlers
pub mod dispatch;
/// Command set and command handlers
pub mod handlers;
/// Resilient reply delivery with automatic retry
pub mod resilient;

pub use dispatch::UpdateDispatcher;
pub use resilient::{ReplySender, TelegramSender};
