use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::NotifyError;
use crate::model::signal::Alert;

/// Outbound channel for alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Fan-out subscription. Publishing with nobody subscribed still succeeds.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Alert>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn publish(&self, alert: &Alert) -> Result<(), NotifyError> {
        if self.tx.send(alert.clone()).is_err() {
            tracing::debug!(symbol = %alert.symbol, "No alert subscribers attached");
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: String,
    message: String,
    alert: &'a Alert,
}

/// POSTs each alert as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn publish(&self, alert: &Alert) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            subject: alert.subject(),
            message: alert.message(),
            alert,
        };
        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to decode error response".to_string());
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(&self, alert: &Alert) -> Result<(), NotifyError> {
        tracing::info!(
            symbol = %alert.symbol,
            direction = %alert.direction,
            sma5 = %alert.sma5,
            sma20 = %alert.sma20,
            timestamp = %alert.timestamp,
            "{}",
            alert.message()
        );
        Ok(())
    }
}

/// Publishes to every inner notifier; fails if any of them fails.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, target: Arc<dyn Notifier>) -> Self {
        self.targets.push(target);
        self
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn publish(&self, alert: &Alert) -> Result<(), NotifyError> {
        let mut first_err = None;
        for target in &self.targets {
            if let Err(e) = target.publish(alert).await {
                tracing::warn!(symbol = %alert.symbol, error = %e, "Notifier target failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
