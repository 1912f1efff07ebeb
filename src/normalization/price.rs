use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use crate::model::PricePair;

/// Currency marks the storefront prints next to amounts.
const CURRENCY_MARKS: [char; 2] = ['원', '₩'];

/// Parse a displayed price ("12,000원", " 9 900 ") into integer minor units.
///
/// Thousands separators, currency marks and whitespace are dropped. Fractional
/// text is rounded. Returns `None` when nothing numeric remains.
pub fn parse_price_text(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace() && !CURRENCY_MARKS.contains(c))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    if let Ok(v) = cleaned.parse::<i64>() {
        return Some(v);
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(|f| f.round() as i64)
}

/// Price values as extracted from a page, before reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawPrices {
    pub original: Option<i64>,
    pub selling: Option<i64>,
}

impl RawPrices {
    /// A missing price is filled from the present one; when neither was
    /// found both become zero.
    pub fn reconcile(self, product_id: &str) -> PricePair {
        match (self.original, self.selling) {
            (Some(original), Some(selling)) => PricePair { original, selling },
            (Some(p), None) | (None, Some(p)) => PricePair {
                original: p,
                selling: p,
            },
            (None, None) => {
                warn!(product_id = %product_id, "no price found on page; defaulting to 0");
                PricePair {
                    original: 0,
                    selling: 0,
                }
            }
        }
    }
}

/// Serde adapter: accepts numbers, numeric strings and null (as 0).
pub fn de_price<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    match &v {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .ok_or_else(|| serde::de::Error::custom(format!("price out of range: {n}"))),
        Value::String(s) => parse_price_text(s)
            .ok_or_else(|| serde::de::Error::custom(format!("unparseable price '{s}'"))),
        other => Err(serde::de::Error::custom(format!(
            "unexpected price value: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_separators_and_currency() {
        assert_eq!(parse_price_text("12,000원"), Some(12000));
        assert_eq!(parse_price_text(" 1,234,500 "), Some(1234500));
        assert_eq!(parse_price_text("₩990"), Some(990));
        assert_eq!(parse_price_text("12000.0"), Some(12000));
    }

    #[test]
    fn empty_or_textual_prices_are_absent() {
        assert_eq!(parse_price_text(""), None);
        assert_eq!(parse_price_text("원"), None);
        assert_eq!(parse_price_text("품절"), None);
    }

    #[test]
    fn missing_original_is_filled_from_selling() {
        let raw = RawPrices {
            original: None,
            selling: parse_price_text("12000"),
        };
        assert_eq!(
            raw.reconcile("A1"),
            PricePair {
                original: 12000,
                selling: 12000
            }
        );
    }

    #[test]
    fn missing_selling_is_filled_from_original() {
        let raw = RawPrices {
            original: Some(5000),
            selling: None,
        };
        assert_eq!(raw.reconcile("A1").selling, 5000);
    }

    #[test]
    fn no_prices_default_to_zero() {
        let pair = RawPrices::default().reconcile("A1");
        assert_eq!(pair, PricePair { original: 0, selling: 0 });
    }
}
