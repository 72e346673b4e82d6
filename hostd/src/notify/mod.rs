//! Failure notifications
//!
//! Rendering for each channel lives outside hostd; this module only builds
//! the payload and hands it to the configured channels, either inline or
//! through the event bus on the `high` queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::errors::HostError;
use crate::events::bus::{EventBus, Subscriber};
use crate::events::Event;

pub const HIGH_PRIORITY_QUEUE: &str = "high";

/// Payload describing a failure that needs a human
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNotification {
    pub server_id: Uuid,
    pub title: String,
    pub message: String,
}

impl FailureNotification {
    pub fn new(server_id: Uuid, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            server_id,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// How a notification reaches its channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Delivery {
    /// Deliver before returning to the caller
    Immediate,
    /// Hand off to the bus and deliver from the notification subscriber
    Queued { queue: String },
}

impl Delivery {
    pub fn high_priority() -> Self {
        Delivery::Queued {
            queue: HIGH_PRIORITY_QUEUE.to_string(),
        }
    }
}

impl Default for Delivery {
    fn default() -> Self {
        Delivery::high_priority()
    }
}

/// A delivery channel (chat webhook, email relay, push gateway...)
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, notification: &FailureNotification) -> Result<(), HostError>;
}

/// Writes notifications to the log
pub struct LogChannel;

#[async_trait]
impl Channel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, notification: &FailureNotification) -> Result<(), HostError> {
        error!(
            server_id = %notification.server_id,
            "{}: {}",
            notification.title,
            notification.message
        );
        Ok(())
    }
}

/// Posts notifications as JSON to a webhook
pub struct WebhookChannel {
    client: Client,
    url: Url,
    token: Option<SecretString>,
}

impl WebhookChannel {
    pub fn new(url: Url, token: Option<SecretString>) -> Result<Self, HostError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, url, token })
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, notification: &FailureNotification) -> Result<(), HostError> {
        let mut request = self.client.post(self.url.clone()).json(notification);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(HostError::NotificationError(format!("{}: {}", status, body)));
        }
        Ok(())
    }
}

/// Fans a notification out to every channel
#[derive(Clone)]
pub struct Notifier {
    channels: Arc<Vec<Arc<dyn Channel>>>,
    bus: EventBus,
    delivery: Delivery,
}

impl Notifier {
    pub fn new(channels: Vec<Arc<dyn Channel>>, bus: EventBus, delivery: Delivery) -> Self {
        Self {
            channels: Arc::new(channels),
            bus,
            delivery,
        }
    }

    /// Send using the configured delivery mode
    pub async fn notify(&self, notification: FailureNotification) {
        match &self.delivery {
            Delivery::Immediate => self.deliver(&notification).await,
            Delivery::Queued { queue } => {
                info!(queue = %queue, server_id = %notification.server_id, "Queueing failure notification");
                self.bus.publish(Event::NotificationRequested(notification));
            }
        }
    }

    /// Deliver to every channel now. A failing channel does not stop the others.
    pub async fn deliver(&self, notification: &FailureNotification) {
        for channel in self.channels.iter() {
            if let Err(e) = channel.send(notification).await {
                warn!(channel = channel.name(), "Failed to deliver notification: {}", e);
            }
        }
    }
}

/// Delivers queued notifications
pub struct NotificationSubscriber {
    notifier: Notifier,
}

impl NotificationSubscriber {
    pub fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl Subscriber for NotificationSubscriber {
    fn name(&self) -> &'static str {
        "notifications"
    }

    async fn handle(&self, event: &Event) -> Result<(), HostError> {
        if let Event::NotificationRequested(notification) = event {
            self.notifier.deliver(notification).await;
        }
        Ok(())
    }
}
