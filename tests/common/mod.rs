#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use trendcross::config::DispatchConfig;
use trendcross::dispatcher::AlertDispatcher;
use trendcross::error::NotifyError;
use trendcross::model::signal::Alert;
use trendcross::model::tick::Tick;
use trendcross::notifier::Notifier;
use trendcross::pipeline::{WorkerContext, WorkerSettings};
use trendcross::store::StateStore;

pub fn ts(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap() + chrono::Duration::minutes(n)
}

pub fn tick(symbol: &str, n: i64, price: Decimal) -> Tick {
    Tick::from_price(symbol, price, ts(n))
}

/// Ticks 1-20 fall from 120 to 101, then 130..190 rally, then 50, 40, 30.
pub fn scenario_prices() -> Vec<Decimal> {
    let mut prices: Vec<Decimal> = (0..20).map(|i| Decimal::from(120 - i)).collect();
    prices.extend([130, 145, 160, 175, 190, 50, 40, 30].map(Decimal::from));
    prices
}

/// Records published alerts; can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    pub calls: AtomicU32,
    pub fail_next: AtomicU32,
    pub always_fail: AtomicBool,
    pub delay: Option<Duration>,
    pub published: Mutex<Vec<Alert>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_times(n: u32) -> Self {
        let notifier = Self::default();
        notifier.fail_next.store(n, Ordering::SeqCst);
        notifier
    }

    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<Alert> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Unavailable("always failing".to_string()));
        }
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(NotifyError::Unavailable("transient".to_string()));
        }
        self.published.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

pub fn fast_dispatch(max_attempts: u32) -> DispatchConfig {
    DispatchConfig {
        max_attempts,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
        timeout_ms: 500,
    }
}

pub fn settings(fast: usize, slow: usize) -> WorkerSettings {
    WorkerSettings {
        fast_period: fast,
        slow_period: slow,
        delivery_log_retention: 16,
        store_timeout: Duration::from_secs(2),
        store_max_attempts: 1,
    }
}

pub fn context(
    store: Arc<dyn StateStore>,
    notifier: Arc<RecordingNotifier>,
    settings: WorkerSettings,
) -> Arc<WorkerContext> {
    Arc::new(WorkerContext {
        store,
        dispatcher: Arc::new(AlertDispatcher::new(notifier, &fast_dispatch(2))),
        settings,
    })
}

pub fn temp_path(label: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "trendcross-{}-{}-{}",
        label,
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ))
}
