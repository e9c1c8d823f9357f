use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// A validated price observation for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: Decimal,
    pub previous_close: Decimal,
    pub volume: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<Decimal>,
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

impl Tick {
    /// Create a tick carrying only the fields the trend engine needs.
    pub fn from_price(symbol: &str, price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            price,
            previous_close: price,
            volume: 0,
            timestamp,
            open: None,
            high: None,
            low: None,
        }
    }

    /// Absolute move against the previous close, rounded to cents.
    pub fn change(&self) -> Decimal {
        round2(self.price - self.previous_close)
    }

    /// Percent move against the previous close. `None` when there is no
    /// previous close to compare to, or the ratio does not fit a `Decimal`.
    pub fn change_percent(&self) -> Option<Decimal> {
        if self.previous_close.is_zero() {
            return None;
        }
        self.change()
            .checked_div(self.previous_close)
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .map(round2)
    }

    pub fn is_anomaly(&self, threshold_pct: Decimal) -> bool {
        self.change_percent()
            .map(|pct| pct.abs() > threshold_pct)
            .unwrap_or(false)
    }

    /// OHLC midpoint `(open + high + low + price) / 4`, if the bar fields were supplied.
    pub fn moving_average(&self) -> Option<Decimal> {
        match (self.open, self.high, self.low) {
            (Some(o), Some(h), Some(l)) => Some((o + h + l + self.price) / Decimal::from(4)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tick(price: Decimal, previous_close: Decimal) -> Tick {
        Tick {
            previous_close,
            ..Tick::from_price("AAPL", price, Utc::now())
        }
    }

    #[test]
    fn change_metrics() {
        let t = tick(dec!(105.5), dec!(100));
        assert_eq!(t.change(), dec!(5.5));
        assert_eq!(t.change_percent(), Some(dec!(5.5)));
        assert!(t.is_anomaly(dec!(5)));
        assert!(!t.is_anomaly(dec!(6)));
    }

    #[test]
    fn zero_previous_close_has_no_percent() {
        let t = tick(dec!(10), Decimal::ZERO);
        assert_eq!(t.change_percent(), None);
        assert!(!t.is_anomaly(Decimal::ZERO));
    }

    #[test]
    fn tiny_previous_close_does_not_overflow() {
        let t = tick(dec!(1000000000000), dec!(0.0000000000000000000000000001));
        assert_eq!(t.change_percent(), None);
        assert!(!t.is_anomaly(dec!(5)));
    }

    #[test]
    fn moving_average_needs_all_bar_fields() {
        let mut t = tick(dec!(104), dec!(100));
        assert_eq!(t.moving_average(), None);
        t.open = Some(dec!(100));
        t.high = Some(dec!(106));
        t.low = Some(dec!(98));
        assert_eq!(t.moving_average(), Some(dec!(102)));
    }
}
