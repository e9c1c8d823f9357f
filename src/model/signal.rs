use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Ordering of the fast average against the slow one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relation {
    Above,
    Below,
    Equal,
    #[default]
    Unknown,
}

impl Relation {
    pub fn classify(fast: Decimal, slow: Decimal) -> Self {
        match fast.cmp(&slow) {
            Ordering::Greater => Relation::Above,
            Ordering::Less => Relation::Below,
            Ordering::Equal => Relation::Equal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Buy,
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => f.write_str("BUY"),
            Direction::Sell => f.write_str("SELL"),
        }
    }
}

/// Identity of an alert for duplicate suppression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertKey {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}",
            self.symbol,
            self.timestamp.to_rfc3339(),
            self.direction
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub symbol: String,
    pub direction: Direction,
    pub sma5: Decimal,
    pub sma20: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn key(&self) -> AlertKey {
        AlertKey {
            symbol: self.symbol.clone(),
            timestamp: self.timestamp,
            direction: self.direction,
        }
    }

    pub fn subject(&self) -> String {
        format!("Stock Alert: {}", self.symbol)
    }

    pub fn message(&self) -> String {
        match self.direction {
            Direction::Buy => format!(
                "{} is in an Uptrend! Consider a buy opportunity.",
                self.symbol
            ),
            Direction::Sell => format!("{} is in a Downtrend! Consider selling.", self.symbol),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn classify_relation() {
        assert_eq!(Relation::classify(dec!(2), dec!(1)), Relation::Above);
        assert_eq!(Relation::classify(dec!(1), dec!(2)), Relation::Below);
        assert_eq!(Relation::classify(dec!(1.50), dec!(1.5)), Relation::Equal);
    }

    #[test]
    fn alert_text() {
        let alert = Alert {
            symbol: "AAPL".to_string(),
            direction: Direction::Sell,
            sma5: dec!(1),
            sma20: dec!(2),
            timestamp: Utc::now(),
        };
        assert_eq!(alert.subject(), "Stock Alert: AAPL");
        assert_eq!(alert.message(), "AAPL is in a Downtrend! Consider selling.");
        assert_eq!(alert.key().direction, Direction::Sell);
    }
}
