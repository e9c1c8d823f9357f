use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::model::signal::{Alert, Direction, Relation};
use crate::model::state::TrendState;

/// Fires on a direct reversal of the fast/slow relation.
///
/// `Equal` is a neutral pause: it is recorded but never fires and never
/// counts as the side a cross starts from.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossDetector;

impl CrossDetector {
    pub fn new() -> Self {
        Self
    }

    /// Compare both averages against the stored relation and advance `state`.
    /// Only call once both averages are defined.
    pub fn evaluate(
        &self,
        state: &mut TrendState,
        symbol: &str,
        sma5: Decimal,
        sma20: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Option<Alert> {
        let relation = Relation::classify(sma5, sma20);

        let direction = match (state.last_relation, relation) {
            (Relation::Below, Relation::Above) => Some(Direction::Buy),
            (Relation::Above, Relation::Below) => Some(Direction::Sell),
            _ => None,
        };

        if state.last_relation == Relation::Unknown {
            tracing::debug!(symbol, ?relation, "Baseline relation recorded");
        }

        state.last_relation = relation;
        state.last_sma5 = Some(sma5);
        state.last_sma20 = Some(sma20);
        state.last_timestamp = Some(timestamp);

        direction.map(|direction| Alert {
            symbol: symbol.to_string(),
            direction,
            sma5,
            sma20,
            timestamp,
        })
    }
}
