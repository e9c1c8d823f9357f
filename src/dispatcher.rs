use std::sync::Arc;
use std::time::Duration;

use crate::backoff::ExponentialBackoff;
use crate::config::DispatchConfig;
use crate::error::{EngineError, NotifyError};
use crate::model::signal::Alert;
use crate::model::state::DeliveryLog;
use crate::notifier::Notifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchAck {
    Delivered { attempts: u32 },
    /// The key was already in the delivery log; nothing was sent.
    AlreadyDelivered,
}

/// Sends alerts at most once per `(symbol, timestamp, direction)`, retrying
/// transient failures with exponential backoff.
pub struct AlertDispatcher {
    notifier: Arc<dyn Notifier>,
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, config: &DispatchConfig) -> Self {
        Self {
            notifier,
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    pub async fn dispatch(
        &self,
        alert: &Alert,
        log: &mut DeliveryLog,
    ) -> Result<DispatchAck, EngineError> {
        let key = alert.key();
        if log.contains(&key) {
            tracing::debug!(key = %key, "Alert already delivered, skipping");
            return Ok(DispatchAck::AlreadyDelivered);
        }

        match self.deliver(alert).await {
            Ok(attempts) => {
                tracing::info!(key = %key, attempts, "Alert delivered");
                log.record_delivered(key);
                Ok(DispatchAck::Delivered { attempts })
            }
            Err((attempts, source)) => {
                log.record_failed(alert.clone());
                Err(EngineError::Notification {
                    key,
                    attempts,
                    source,
                })
            }
        }
    }

    /// Try each undelivered alert once, oldest first. Stops at the first
    /// failure since the channel is most likely still down.
    pub async fn redeliver_pending(&self, log: &mut DeliveryLog) -> usize {
        let pending: Vec<Alert> = log.pending().cloned().collect();
        let mut delivered = 0;
        for alert in pending {
            match self.publish_once(&alert).await {
                Ok(()) => {
                    tracing::info!(key = %alert.key(), "Pending alert redelivered");
                    log.record_delivered(alert.key());
                    delivered += 1;
                }
                Err(e) => {
                    tracing::debug!(key = %alert.key(), error = %e, "Pending alert still undeliverable");
                    break;
                }
            }
        }
        delivered
    }

    async fn publish_once(&self, alert: &Alert) -> Result<(), NotifyError> {
        match tokio::time::timeout(self.timeout, self.notifier.publish(alert)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout),
        }
    }

    async fn deliver(&self, alert: &Alert) -> Result<u32, (u32, NotifyError)> {
        let mut backoff = ExponentialBackoff::new(self.initial_backoff, self.max_backoff, 2.0);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.publish_once(alert).await {
                Ok(()) => return Ok(attempt),
                Err(e) if attempt >= self.max_attempts => {
                    tracing::warn!(
                        key = %alert.key(),
                        attempts = attempt,
                        error = %e,
                        "Alert delivery failed, recording as pending"
                    );
                    return Err((attempt, e));
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        key = %alert.key(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Alert delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
