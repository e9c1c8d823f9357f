use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::indicator::rolling_window::RollingWindow;
use crate::model::signal::{Alert, AlertKey, Relation};

pub const DEFAULT_DELIVERY_LOG_RETENTION: usize = 64;

/// Last comparison seen by the cross detector for one symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendState {
    pub last_relation: Relation,
    pub last_sma5: Option<Decimal>,
    pub last_sma20: Option<Decimal>,
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// Recently delivered alert keys plus alerts still waiting for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryLog {
    retention: usize,
    delivered: VecDeque<AlertKey>,
    #[serde(default)]
    failed: VecDeque<Alert>,
}

impl Default for DeliveryLog {
    fn default() -> Self {
        Self::with_retention(DEFAULT_DELIVERY_LOG_RETENTION)
    }
}

impl DeliveryLog {
    pub fn with_retention(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            delivered: VecDeque::new(),
            failed: VecDeque::new(),
        }
    }

    pub fn contains(&self, key: &AlertKey) -> bool {
        self.delivered.iter().any(|k| k == key)
    }

    pub fn record_delivered(&mut self, key: AlertKey) {
        self.failed.retain(|a| a.key() != key);
        if self.contains(&key) {
            return;
        }
        self.delivered.push_back(key);
        while self.delivered.len() > self.retention {
            self.delivered.pop_front();
        }
    }

    pub fn record_failed(&mut self, alert: Alert) {
        let key = alert.key();
        if self.contains(&key) || self.failed.iter().any(|a| a.key() == key) {
            return;
        }
        self.failed.push_back(alert);
        while self.failed.len() > self.retention {
            if let Some(dropped) = self.failed.pop_front() {
                tracing::warn!(key = %dropped.key(), "Dropping undelivered alert past retention");
            }
        }
    }

    pub fn pending(&self) -> impl Iterator<Item = &Alert> {
        self.failed.iter()
    }

    pub fn has_pending(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn delivered_len(&self) -> usize {
        self.delivered.len()
    }
}

/// Everything persisted per symbol, read and written as one record.
///
/// `version` goes up by one with every write the worker issues. Stores
/// refuse a write that does not advance it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolState {
    #[serde(default)]
    pub version: u64,
    pub window: RollingWindow,
    pub trend: TrendState,
    pub delivery_log: DeliveryLog,
}

impl SymbolState {
    pub fn new(fast: usize, slow: usize, retention: usize) -> Self {
        Self {
            version: 0,
            window: RollingWindow::new(fast, slow),
            trend: TrendState::default(),
            delivery_log: DeliveryLog::with_retention(retention),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::signal::Direction;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn alert(secs: i64) -> Alert {
        Alert {
            symbol: "TST".to_string(),
            direction: Direction::Buy,
            sma5: dec!(2),
            sma20: dec!(1),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs),
        }
    }

    #[test]
    fn delivered_keys_are_bounded() {
        let mut log = DeliveryLog::with_retention(2);
        for i in 0..3 {
            log.record_delivered(alert(i).key());
        }
        assert_eq!(log.delivered_len(), 2);
        assert!(!log.contains(&alert(0).key()));
        assert!(log.contains(&alert(2).key()));
    }

    #[test]
    fn delivering_clears_pending() {
        let mut log = DeliveryLog::default();
        log.record_failed(alert(1));
        log.record_failed(alert(1));
        assert_eq!(log.pending().count(), 1);
        log.record_delivered(alert(1).key());
        assert!(!log.has_pending());
        assert!(log.contains(&alert(1).key()));
    }
}
