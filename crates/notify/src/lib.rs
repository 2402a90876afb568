//! Delivery channels for finished exports.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable delivery channels
//! - SMTP email (with the export attached) and signed chat-webhook notifiers
//! - Minijinja template rendering for channel messages

pub mod chat;
pub mod email;
pub mod templating;
pub mod traits;

pub use chat::ChatNotifier;
pub use email::EmailNotifier;
pub use templating::{MessageContext, TemplateRenderer};
pub use traits::{Notifier, NotifyError, RunSummary};
