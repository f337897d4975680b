//! External notification dispatch for fired alerts.
//!
//! The channel is validated once at startup. A missing or invalid channel
//! disables dispatch only; alerts are still fired and persisted.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::config::NotificationConfig;
use crate::db::AlertEvent;
use crate::error::{ConfigError, DispatchError};

/// Body posted to the notification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub payload: serde_json::Value,
}

impl NotificationPayload {
    pub fn from_alert(alert: &AlertEvent) -> Self {
        let subject = format!(
            "[{}] {}: {}",
            alert.severity.as_str().to_uppercase(),
            alert.kind.title(),
            alert.category
        );

        let mut body = format!(
            "{}\n\nCategory: {}\nSeverity: {}\nTime: {}\n",
            alert.message,
            alert.category,
            alert.severity.as_str(),
            alert.display_time
        );
        if let Some(details) = alert.metadata.as_object() {
            body.push_str("\nDetails:\n");
            for (key, value) in details {
                body.push_str(&format!("  {key}: {value}\n"));
            }
        }

        Self {
            id: alert.uid.to_string(),
            subject,
            body,
            payload: serde_json::to_value(alert).unwrap_or(serde_json::Value::Null),
        }
    }
}

pub type NotificationFuture<'a> =
    Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + 'a>>;

/// Async notification sender interface.
pub trait NotificationSender: Send + Sync {
    /// Sender identifier used in logs.
    fn name(&self) -> &'static str;

    fn send<'a>(&'a self, payload: &'a NotificationPayload) -> NotificationFuture<'a>;
}

/// Posts the payload as JSON to an HTTP(S) endpoint.
pub struct WebhookSender {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl WebhookSender {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let url = reqwest::Url::parse(url)
            .map_err(|err| ConfigError::invalid("notification.webhook_url", format!("{url}: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "notification.webhook_url",
                format!("unsupported scheme {}", url.scheme()),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ConfigError::invalid("notification", err.to_string()))?;

        Ok(Self { client, url })
    }
}

impl NotificationSender for WebhookSender {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn send<'a>(&'a self, payload: &'a NotificationPayload) -> NotificationFuture<'a> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.url.clone())
                .json(payload)
                .send()
                .await
                .map_err(|err| DispatchError::Transport(err.to_string()))?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(DispatchError::Status(status.as_u16()))
            }
        })
    }
}

/// Dispatch front-end used by the cadence pipeline.
#[derive(Clone)]
pub struct Notifier {
    sender: Option<Arc<dyn NotificationSender>>,
    timeout: Duration,
}

impl Notifier {
    pub fn disabled() -> Self {
        Self {
            sender: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_sender(sender: Arc<dyn NotificationSender>, timeout: Duration) -> Self {
        Self {
            sender: Some(sender),
            timeout,
        }
    }

    /// Validates the configured channel. Problems are logged once and leave
    /// dispatch disabled.
    pub fn from_config(config: &NotificationConfig) -> Self {
        let timeout = Duration::try_from_secs_f64(config.timeout_seconds)
            .unwrap_or_else(|_| Duration::from_secs(10));

        let Some(url) = config.webhook_url.as_deref().filter(|url| !url.trim().is_empty()) else {
            info!("Notification channel not configured; alerts will only be persisted");
            return Self::disabled();
        };

        match WebhookSender::new(url.trim(), timeout) {
            Ok(sender) => {
                info!("Notification channel ready: webhook");
                Self::with_sender(Arc::new(sender), timeout)
            }
            Err(err) => {
                warn!("Notification channel disabled: {err}");
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Sends one alert. A disabled notifier succeeds without doing anything.
    pub async fn dispatch(&self, alert: &AlertEvent) -> Result<(), DispatchError> {
        let Some(sender) = self.sender.as_ref() else {
            return Ok(());
        };

        let payload = NotificationPayload::from_alert(alert);
        tokio::time::timeout(self.timeout, sender.send(&payload))
            .await
            .map_err(|_| DispatchError::Timeout(self.timeout))?
    }

    /// Dispatches on a detached task so the tick is never held up by the
    /// channel. Failures are logged, not retried.
    pub fn spawn_dispatch(&self, alert: AlertEvent) -> Option<JoinHandle<()>> {
        let sender_name = self.sender.as_ref()?.name();
        let notifier = self.clone();
        Some(tokio::spawn(async move {
            if let Err(err) = notifier.dispatch(&alert).await {
                warn!(
                    "{sender_name} notification for {} alert on {} failed: {err}",
                    alert.kind.as_str(),
                    alert.category
                );
            }
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{AlertKind, AlertSeverity};
    use crate::models::CategoryKey;
    use chrono::Utc;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    pub(crate) struct MockSender {
        pub(crate) sent: Mutex<Vec<NotificationPayload>>,
        pub(crate) fail: bool,
    }

    impl NotificationSender for MockSender {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn send<'a>(&'a self, payload: &'a NotificationPayload) -> NotificationFuture<'a> {
            Box::pin(async move {
                if self.fail {
                    return Err(DispatchError::Status(503));
                }
                let mut guard = self.sent.lock().unwrap_or_else(|e| e.into_inner());
                guard.push(payload.clone());
                Ok(())
            })
        }
    }

    fn alert() -> AlertEvent {
        AlertEvent {
            id: None,
            uid: Uuid::new_v4(),
            raised_at: Utc::now(),
            display_time: "2024-01-15 12:30:05 PM EST".into(),
            kind: AlertKind::LowStock,
            category: CategoryKey::normalize("mango").unwrap(),
            severity: AlertSeverity::Critical,
            message: "mango is out of stock (threshold 3)".into(),
            metadata: serde_json::json!({"current_count": 0, "threshold": 3}),
            acknowledged: false,
        }
    }

    #[test]
    fn payload_subject_and_body() {
        let alert = alert();
        let payload = NotificationPayload::from_alert(&alert);
        assert_eq!(payload.subject, "[CRITICAL] Low Stock: mango");
        assert!(payload.body.contains("threshold: 3"));
        assert_eq!(payload.id, alert.uid.to_string());
    }

    #[test]
    fn unconfigured_channel_is_disabled() {
        assert!(!Notifier::from_config(&NotificationConfig::default()).is_enabled());
    }

    #[test]
    fn invalid_url_is_disabled() {
        for url in ["not a url", "ftp://example.com/hook"] {
            let config = NotificationConfig {
                webhook_url: Some(url.into()),
                ..NotificationConfig::default()
            };
            assert!(!Notifier::from_config(&config).is_enabled(), "{url}");
        }
    }

    #[tokio::test]
    async fn valid_url_enables_webhook() {
        let config = NotificationConfig {
            webhook_url: Some("https://hooks.example.com/shelf".into()),
            ..NotificationConfig::default()
        };
        assert!(Notifier::from_config(&config).is_enabled());
    }

    #[tokio::test]
    async fn dispatch_reaches_sender() {
        let sender = Arc::new(MockSender::default());
        let notifier = Notifier::with_sender(sender.clone(), Duration::from_secs(1));
        notifier.dispatch(&alert()).await.unwrap();
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_dispatch_is_contained() {
        let sender = Arc::new(MockSender {
            fail: true,
            ..MockSender::default()
        });
        let notifier = Notifier::with_sender(sender, Duration::from_secs(1));
        assert!(matches!(
            notifier.dispatch(&alert()).await,
            Err(DispatchError::Status(503))
        ));

        let handle = notifier.spawn_dispatch(alert()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn disabled_notifier_skips_dispatch() {
        let notifier = Notifier::disabled();
        assert!(notifier.dispatch(&alert()).await.is_ok());
        assert!(notifier.spawn_dispatch(alert()).is_none());
    }
}
