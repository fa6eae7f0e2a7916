use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Column names of a kline row, in wire order. Also the CSV header.
pub const KLINE_HEADERS: [&str; 12] = [
    "open_time",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "close_time",
    "quote_asset_volume",
    "number_of_trades",
    "taker_buy_base",
    "taker_buy_quote",
    "ignore",
];

/// One candlestick, matching the twelve positional fields of the venue's
/// kline array. `open_time` (epoch ms) is the primary identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
    pub quote_asset_volume: Decimal,
    pub number_of_trades: i64,
    pub taker_buy_base: Decimal,
    pub taker_buy_quote: Decimal,
    #[serde(rename = "ignore")]
    pub ignore_field: Decimal,
}

impl Candle {
    /// Parse one inner array of the venue's kline response.
    ///
    /// Integer fields arrive as JSON numbers, decimals as strings; both are
    /// rejected (not defaulted) when malformed so the caller can skip the row.
    pub fn from_kline_row(row: &[serde_json::Value]) -> Result<Self> {
        if row.len() != KLINE_HEADERS.len() {
            return Err(anyhow!("kline row has {} fields, expected 12", row.len()));
        }

        let int_at = |i: usize| -> Result<i64> {
            row[i]
                .as_i64()
                .ok_or_else(|| anyhow!("field {} ({}) is not an integer", i, KLINE_HEADERS[i]))
        };
        let decimal_at = |i: usize| -> Result<Decimal> {
            let s = row[i]
                .as_str()
                .ok_or_else(|| anyhow!("field {} ({}) is not a string", i, KLINE_HEADERS[i]))?;
            Decimal::from_str(s).map_err(|e| anyhow!("field {} ({}): {}", i, KLINE_HEADERS[i], e))
        };

        Ok(Self {
            open_time: int_at(0)?,
            open: decimal_at(1)?,
            high: decimal_at(2)?,
            low: decimal_at(3)?,
            close: decimal_at(4)?,
            volume: decimal_at(5)?,
            close_time: int_at(6)?,
            quote_asset_volume: decimal_at(7)?,
            number_of_trades: int_at(8)?,
            taker_buy_base: decimal_at(9)?,
            taker_buy_quote: decimal_at(10)?,
            ignore_field: decimal_at(11)?,
        })
    }

    /// OHLC sanity: low ≤ min(open, close) ≤ max(open, close) ≤ high,
    /// non-negative volume, open before close.
    pub fn is_well_formed(&self) -> bool {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        self.low <= body_low
            && body_high <= self.high
            && self.volume >= Decimal::ZERO
            && self.open_time < self.close_time
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn sample_row() -> Vec<serde_json::Value> {
        vec![
            json!(1700000000000i64),
            json!("42000.50000000"),
            json!("42100.00000000"),
            json!("41950.25000000"),
            json!("42050.75000000"),
            json!("123.45600000"),
            json!(1700000059999i64),
            json!("5190000.12345678"),
            json!(3210),
            json!("60.00000000"),
            json!("2520000.00000000"),
            json!("0"),
        ]
    }

    #[test]
    fn test_parse_kline_row() {
        let candle = Candle::from_kline_row(&sample_row()).unwrap();
        assert_eq!(candle.open_time, 1700000000000);
        assert_eq!(candle.open, dec!(42000.5));
        assert_eq!(candle.close, dec!(42050.75));
        assert_eq!(candle.number_of_trades, 3210);
        assert!(candle.is_well_formed());
    }

    #[test]
    fn test_reject_short_row() {
        let mut row = sample_row();
        row.pop();
        assert!(Candle::from_kline_row(&row).is_err());
    }

    #[test]
    fn test_reject_bad_decimal() {
        let mut row = sample_row();
        row[1] = json!("not-a-number");
        assert!(Candle::from_kline_row(&row).is_err());
    }

    #[test]
    fn test_well_formed_rejects_inverted_range() {
        let mut candle = Candle::from_kline_row(&sample_row()).unwrap();
        candle.high = dec!(1);
        assert!(!candle.is_well_formed());
    }
}
