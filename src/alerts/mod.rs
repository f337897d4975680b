//! Debounced alerting and external notification.

mod engine;
mod notifier;

pub use engine::{AlertEngine, AlertSettings, AlertStats};
pub use notifier::{
    NotificationFuture, NotificationPayload, NotificationSender, Notifier, WebhookSender,
};
