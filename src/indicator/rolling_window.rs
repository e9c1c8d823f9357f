use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::model::tick::Tick;

pub const DEFAULT_FAST_PERIOD: usize = 5;
pub const DEFAULT_SLOW_PERIOD: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowEntry {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The price was absorbed. Either average is `None` while its sub-window warms up.
    Updated {
        sma_fast: Option<Decimal>,
        sma_slow: Option<Decimal>,
    },
    /// An entry with the same timestamp is already present.
    Duplicate,
    /// Older than everything a full window retains.
    Stale,
    /// The price is too large for `slow` of them to be summed.
    OutOfRange,
}

#[derive(Debug, Serialize, Deserialize)]
struct WindowRecord {
    fast: usize,
    slow: usize,
    entries: Vec<WindowEntry>,
}

/// Timestamp-ordered window of the most recent prices for one symbol, with
/// running sums for the fast and slow sub-windows.
///
/// Appends at the newest end update both sums in O(1). Inserts that land
/// anywhere else change sub-window membership and rebuild the sums from the
/// window contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WindowRecord", into = "WindowRecord")]
pub struct RollingWindow {
    fast: usize,
    slow: usize,
    entries: VecDeque<WindowEntry>,
    sum_fast: Decimal,
    sum_slow: Decimal,
}

impl From<WindowRecord> for RollingWindow {
    fn from(record: WindowRecord) -> Self {
        let mut window = Self {
            fast: record.fast,
            slow: record.slow,
            entries: record.entries.into_iter().collect(),
            sum_fast: Decimal::ZERO,
            sum_slow: Decimal::ZERO,
        };
        window
            .entries
            .make_contiguous()
            .sort_by_key(|e| e.timestamp);
        let max_price = window.max_price();
        window.entries.retain(|e| e.price <= max_price);
        while window.entries.len() > window.slow {
            window.entries.pop_front();
        }
        window.recompute();
        window
    }
}

impl From<RollingWindow> for WindowRecord {
    fn from(window: RollingWindow) -> Self {
        Self {
            fast: window.fast,
            slow: window.slow,
            entries: window.entries.into_iter().collect(),
        }
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_FAST_PERIOD, DEFAULT_SLOW_PERIOD)
    }
}

impl RollingWindow {
    pub fn new(fast: usize, slow: usize) -> Self {
        assert!(fast > 0, "fast period must be > 0");
        assert!(fast < slow, "fast period must be less than slow period");
        Self {
            fast,
            slow,
            entries: VecDeque::with_capacity(slow + 1),
            sum_fast: Decimal::ZERO,
            sum_slow: Decimal::ZERO,
        }
    }

    pub fn ingest_tick(&mut self, tick: &Tick) -> IngestOutcome {
        self.ingest(tick.timestamp, tick.price)
    }

    /// Largest price the window accepts. A full window of these still sums
    /// without overflow.
    pub fn max_price(&self) -> Decimal {
        (Decimal::MAX / Decimal::from(self.slow)).floor() - Decimal::ONE
    }

    pub fn ingest(&mut self, timestamp: DateTime<Utc>, price: Decimal) -> IngestOutcome {
        if price > self.max_price() {
            return IngestOutcome::OutOfRange;
        }
        let pos = match self
            .entries
            .binary_search_by(|e| e.timestamp.cmp(&timestamp))
        {
            Ok(_) => return IngestOutcome::Duplicate,
            Err(pos) => pos,
        };
        if pos == 0 && self.is_full() {
            return IngestOutcome::Stale;
        }

        let entry = WindowEntry { timestamp, price };
        if pos == self.entries.len() {
            // subtract before adding so neither sum passes slow * max_price
            if self.is_full() {
                if let Some(evicted) = self.entries.pop_front() {
                    self.sum_slow -= evicted.price;
                }
            }
            self.entries.push_back(entry);
            self.sum_slow += price;
            let len = self.entries.len();
            if len > self.fast {
                self.sum_fast -= self.entries[len - 1 - self.fast].price;
            }
            self.sum_fast += price;
        } else {
            self.entries.insert(pos, entry);
            while self.entries.len() > self.slow {
                self.entries.pop_front();
            }
            self.recompute();
        }

        IngestOutcome::Updated {
            sma_fast: self.sma_fast(),
            sma_slow: self.sma_slow(),
        }
    }

    /// Rebuild both running sums from the window contents.
    pub fn recompute(&mut self) {
        self.sum_slow = self.entries.iter().map(|e| e.price).sum();
        self.sum_fast = self
            .entries
            .iter()
            .rev()
            .take(self.fast)
            .map(|e| e.price)
            .sum();
    }

    pub fn sma_fast(&self) -> Option<Decimal> {
        if self.entries.len() >= self.fast {
            Some(self.sum_fast / Decimal::from(self.fast))
        } else {
            None
        }
    }

    pub fn sma_slow(&self) -> Option<Decimal> {
        if self.is_full() {
            Some(self.sum_slow / Decimal::from(self.slow))
        } else {
            None
        }
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.slow
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &WindowEntry> {
        self.entries.iter()
    }

    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.back().map(|e| e.timestamp)
    }

    pub fn fast_period(&self) -> usize {
        self.fast
    }

    pub fn slow_period(&self) -> usize {
        self.slow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap() + Duration::seconds(secs)
    }

    fn updated(outcome: IngestOutcome) -> (Option<Decimal>, Option<Decimal>) {
        match outcome {
            IngestOutcome::Updated { sma_fast, sma_slow } => (sma_fast, sma_slow),
            other => panic!("expected Updated, got {:?}", other),
        }
    }

    #[test]
    fn warm_up_then_both_defined() {
        let mut w = RollingWindow::new(2, 3);
        assert_eq!(updated(w.ingest(ts(1), dec!(1))), (None, None));
        assert_eq!(updated(w.ingest(ts(2), dec!(2))), (Some(dec!(1.5)), None));
        assert_eq!(
            updated(w.ingest(ts(3), dec!(3))),
            (Some(dec!(2.5)), Some(dec!(2)))
        );
        assert_eq!(
            updated(w.ingest(ts(4), dec!(4))),
            (Some(dec!(3.5)), Some(dec!(3)))
        );
        assert_eq!(w.len(), 3);
    }

    #[test]
    fn duplicate_timestamp_is_noop() {
        let mut w = RollingWindow::new(2, 3);
        w.ingest(ts(1), dec!(10));
        w.ingest(ts(2), dec!(20));
        let before = w.clone();
        assert_eq!(w.ingest(ts(2), dec!(99)), IngestOutcome::Duplicate);
        assert_eq!(w, before);
    }

    #[test]
    fn out_of_order_insert_lands_in_timestamp_position() {
        let mut w = RollingWindow::new(2, 4);
        w.ingest(ts(1), dec!(10));
        w.ingest(ts(3), dec!(30));
        w.ingest(ts(4), dec!(40));
        let (fast, slow) = updated(w.ingest(ts(2), dec!(20)));
        assert_eq!(fast, Some(dec!(35)));
        assert_eq!(slow, Some(dec!(25)));
        let order: Vec<_> = w.entries().map(|e| e.price).collect();
        assert_eq!(order, vec![dec!(10), dec!(20), dec!(30), dec!(40)]);
    }

    #[test]
    fn late_tick_inside_full_window_evicts_oldest() {
        let mut w = RollingWindow::new(2, 3);
        w.ingest(ts(1), dec!(10));
        w.ingest(ts(3), dec!(30));
        w.ingest(ts(4), dec!(40));
        let (fast, slow) = updated(w.ingest(ts(2), dec!(20)));
        assert_eq!(fast, Some(dec!(35)));
        assert_eq!(slow, Some(dec!(30)));
        assert_eq!(w.entries().next().map(|e| e.timestamp), Some(ts(2)));
    }

    #[test]
    fn older_than_full_window_is_stale() {
        let mut w = RollingWindow::new(2, 3);
        for i in 5..8 {
            w.ingest(ts(i), Decimal::from(i));
        }
        let before = w.clone();
        assert_eq!(w.ingest(ts(1), dec!(1)), IngestOutcome::Stale);
        assert_eq!(w, before);
    }

    #[test]
    fn older_tick_accepted_while_warming_up() {
        let mut w = RollingWindow::new(2, 3);
        w.ingest(ts(5), dec!(5));
        assert!(matches!(w.ingest(ts(1), dec!(1)), IngestOutcome::Updated { .. }));
        assert_eq!(w.entries().next().map(|e| e.timestamp), Some(ts(1)));
    }

    #[test]
    fn running_sums_match_naive_mean() {
        let mut w = RollingWindow::new(5, 20);
        let mut naive: Vec<(i64, Decimal)> = Vec::new();

        for i in 0..500i64 {
            // every seventh tick arrives three slots late
            let t = if i % 7 == 6 { i * 10 - 25 } else { i * 10 };
            let price = Decimal::from(100 + (i * 37) % 41) / dec!(4);
            if !matches!(w.ingest(ts(t), price), IngestOutcome::Updated { .. }) {
                continue;
            }
            naive.push((t, price));
            naive.sort_by_key(|(t, _)| *t);
            if naive.len() > 20 {
                naive.remove(0);
            }

            let mean = |n: usize| -> Decimal {
                naive.iter().rev().take(n).map(|(_, p)| *p).sum::<Decimal>() / Decimal::from(n)
            };
            if naive.len() >= 5 {
                assert_eq!(w.sma_fast(), Some(mean(5)), "fast drift at i={}", i);
            }
            if naive.len() == 20 {
                assert_eq!(w.sma_slow(), Some(mean(20)), "slow drift at i={}", i);
            }
        }
    }

    #[test]
    fn serde_rebuilds_sums() {
        let mut w = RollingWindow::new(2, 3);
        for i in 1..=4 {
            w.ingest(ts(i), Decimal::from(i * 10));
        }
        let json = serde_json::to_string(&w).unwrap();
        let back: RollingWindow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, w);
        assert_eq!(back.sma_fast(), Some(dec!(35)));
        assert_eq!(back.sma_slow(), Some(dec!(30)));
    }

    #[test]
    fn oversized_prices_are_refused_without_touching_sums() {
        let mut w = RollingWindow::new(2, 3);
        w.ingest(ts(1), dec!(10));
        assert_eq!(w.ingest(ts(2), Decimal::MAX), IngestOutcome::OutOfRange);
        assert_eq!(w.ingest(ts(3), Decimal::MAX), IngestOutcome::OutOfRange);
        assert_eq!(updated(w.ingest(ts(4), dec!(20))), (Some(dec!(15)), None));
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn full_window_of_max_prices_does_not_overflow() {
        let mut w = RollingWindow::new(2, 3);
        let max = w.max_price();
        for i in 1..=6 {
            assert!(matches!(w.ingest(ts(i), max), IngestOutcome::Updated { .. }));
        }
        assert_eq!(w.sma_fast(), Some(max));
        assert_eq!(w.sma_slow(), Some(max));
    }

    #[test]
    #[should_panic(expected = "fast period must be less than slow period")]
    fn fast_not_below_slow_panics() {
        RollingWindow::new(20, 5);
    }
}
