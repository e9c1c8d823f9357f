use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use thiserror::Error;

use crate::model::tick::Tick;

/// Why a raw record was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rejected tick: {field} {reason}")]
pub struct Rejection {
    pub field: &'static str,
    pub reason: String,
}

impl Rejection {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Upper bound for any price-like field.
pub const MAX_PRICE: Decimal = dec!(1000000000000);

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

fn decimal_field(raw: &Value, field: &'static str) -> Result<Decimal, Rejection> {
    let value = match raw.get(field) {
        None | Some(Value::Null) => return Err(Rejection::new(field, "is missing")),
        Some(v) => v,
    };
    let parsed = match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else if let Some(u) = n.as_u64() {
                Some(Decimal::from(u))
            } else {
                n.as_f64().and_then(Decimal::from_f64)
            }
        }
        Value::String(s) => Decimal::from_str(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .ok(),
        _ => None,
    };
    let decimal = parsed.ok_or_else(|| Rejection::new(field, format!("is not numeric: {}", value)))?;
    if decimal.is_sign_negative() && !decimal.is_zero() {
        return Err(Rejection::new(field, format!("is negative: {}", decimal)));
    }
    Ok(decimal)
}

fn price_field(raw: &Value, field: &'static str) -> Result<Decimal, Rejection> {
    let price = decimal_field(raw, field)?;
    if price > MAX_PRICE {
        return Err(Rejection::new(field, format!("exceeds {}: {}", MAX_PRICE, price)));
    }
    Ok(price)
}

fn optional_price_field(raw: &Value, field: &'static str) -> Result<Option<Decimal>, Rejection> {
    match raw.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => price_field(raw, field).map(Some),
    }
}

fn volume_field(raw: &Value) -> Result<u64, Rejection> {
    let volume = decimal_field(raw, "volume")?;
    if !volume.fract().is_zero() {
        return Err(Rejection::new("volume", format!("is not an integer: {}", volume)));
    }
    volume
        .to_u64()
        .ok_or_else(|| Rejection::new("volume", format!("is out of range: {}", volume)))
}

/// Parse the timestamp forms the producer is known to emit.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc())
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

pub fn validate(raw: &Value) -> Result<Tick, Rejection> {
    if !raw.is_object() {
        return Err(Rejection::new("record", "is not a JSON object"));
    }

    let symbol = match raw.get("symbol") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_ascii_uppercase(),
        Some(Value::String(_)) => return Err(Rejection::new("symbol", "is empty")),
        Some(_) => return Err(Rejection::new("symbol", "is not a string")),
        None => return Err(Rejection::new("symbol", "is missing")),
    };

    let price = price_field(raw, "price")?;
    let previous_close = price_field(raw, "previous_close")?;
    let volume = volume_field(raw)?;

    let timestamp = match raw.get("timestamp") {
        None | Some(Value::Null) => return Err(Rejection::new("timestamp", "is missing")),
        Some(v) => parse_timestamp(v)
            .ok_or_else(|| Rejection::new("timestamp", format!("is unparsable: {}", v)))?,
    };

    Ok(Tick {
        symbol,
        price: price.normalize(),
        previous_close: previous_close.normalize(),
        volume,
        timestamp,
        open: optional_price_field(raw, "open")?,
        high: optional_price_field(raw, "high")?,
        low: optional_price_field(raw, "low")?,
    })
}

/// Parse one ingress line and validate it.
pub fn validate_line(line: &str) -> Result<Tick, Rejection> {
    let raw: Value = serde_json::from_str(line)
        .map_err(|e| Rejection::new("record", format!("is not valid JSON: {}", e)))?;
    validate(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn good() -> Value {
        json!({
            "symbol": "aapl",
            "price": 187.25,
            "previous_close": "185.10",
            "volume": 1200,
            "timestamp": "2024-01-02 09:30:00",
        })
    }

    #[test]
    fn accepts_producer_record() {
        let tick = validate(&good()).unwrap();
        assert_eq!(tick.symbol, "AAPL");
        assert_eq!(tick.price, dec!(187.25));
        assert_eq!(tick.previous_close, dec!(185.1));
        assert_eq!(tick.volume, 1200);
        assert_eq!(
            tick.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap()
        );
    }

    #[test]
    fn timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        for v in [
            json!("2024-01-02T09:30:00Z"),
            json!("2024-01-02T11:30:00+02:00"),
            json!("2024-01-02T09:30:00"),
            json!(expected.timestamp_millis()),
        ] {
            assert_eq!(parse_timestamp(&v), Some(expected), "form {}", v);
        }
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!(true)), None);
    }

    #[test]
    fn rejects_bad_fields() {
        let cases: [(&str, Value, &str); 7] = [
            ("symbol", json!("  "), "symbol"),
            ("symbol", json!(7), "symbol"),
            ("price", json!("abc"), "price"),
            ("price", json!(-1.0), "price"),
            ("previous_close", json!([1]), "previous_close"),
            ("volume", json!(1.5), "volume"),
            ("timestamp", json!("02/01/2024"), "timestamp"),
        ];
        for (field, value, expected) in cases {
            let mut raw = good();
            raw[field] = value;
            let err = validate(&raw).unwrap_err();
            assert_eq!(err.field, expected, "case {}", raw);
        }
    }

    #[test]
    fn rejects_prices_past_bound() {
        let mut raw = good();
        raw["price"] = json!("79228162514264337593543950335");
        let err = validate(&raw).unwrap_err();
        assert_eq!(err.field, "price");
        assert!(err.reason.starts_with("exceeds"), "{}", err.reason);

        let mut raw = good();
        raw["high"] = json!(1e13);
        assert_eq!(validate(&raw).unwrap_err().field, "high");

        let mut raw = good();
        raw["price"] = json!(MAX_PRICE.to_string());
        assert_eq!(validate(&raw).unwrap().price, MAX_PRICE);
    }

    #[test]
    fn rejects_missing_fields() {
        for field in ["symbol", "price", "previous_close", "volume", "timestamp"] {
            let mut raw = good();
            raw.as_object_mut().unwrap().remove(field);
            assert_eq!(validate(&raw).unwrap_err().field, field);
        }
    }

    #[test]
    fn optional_bar_fields_checked_when_present() {
        let mut raw = good();
        raw["open"] = json!(186);
        raw["high"] = json!("188.5");
        raw["low"] = json!(185);
        let tick = validate(&raw).unwrap();
        assert_eq!(tick.high, Some(dec!(188.5)));

        raw["low"] = json!("n/a");
        assert_eq!(validate(&raw).unwrap_err().field, "low");
    }

    #[test]
    fn invalid_json_line() {
        assert_eq!(validate_line("{not json").unwrap_err().field, "record");
        assert_eq!(validate_line("[1,2]").unwrap_err().field, "record");
    }
}
