//! Notification channel for question delivery.
//!
//! This crate provides:
//! - `Notifier` trait: `deliver(recipient, text, affordances)`
//! - Telegram Bot API channel (reply keyboards for answer options)
//! - Console channel for dry runs
//! - Minijinja rendering of question and reminder messages
//! - Telegram `getUpdates` long polling for inbound replies

pub mod console;
pub mod telegram;
pub mod templating;
pub mod traits;
pub mod updates;

pub use console::ConsoleNotifier;
pub use telegram::TelegramNotifier;
pub use templating::MessageRenderer;
pub use traits::{Notifier, NotifyError};
pub use updates::{IncomingMessage, UpdatePoller};
