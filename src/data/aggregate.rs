use rust_decimal::Decimal;

use crate::types::{Candle, Interval};

/// Roll a chronologically ordered slice of 1m candles up to `target`.
///
/// Consecutive input rows sharing a bucket start belong to the same output
/// candle; a new bucket is emitted on boundary change and at the end of the
/// input. Missing minutes do not synthesize gaps, the bucket reduces over
/// whatever minutes are present. For the 1m target this is the identity.
pub fn aggregate_to_interval(candles_1m: &[Candle], target: Interval) -> Vec<Candle> {
    if target == Interval::M1 {
        return candles_1m.to_vec();
    }

    let mut aggregated = Vec::new();
    let mut group: Vec<&Candle> = Vec::new();
    let mut current_start: Option<i64> = None;

    for candle in candles_1m {
        let start = target.bucket_start(candle.open_time);
        if current_start != Some(start) {
            if let Some(bucket_start) = current_start {
                aggregated.push(reduce_group(bucket_start, &group));
            }
            group.clear();
            current_start = Some(start);
        }
        group.push(candle);
    }

    if let Some(bucket_start) = current_start {
        aggregated.push(reduce_group(bucket_start, &group));
    }

    aggregated
}

/// Reduce one bucket of ascending 1m candles into a single candle: first
/// open, last close, max high, min low, sums for the volume fields.
///
/// The output `open_time` is the bucket start, which keeps every stored row
/// epoch-aligned even when the bucket's leading minutes are missing, and
/// makes a recomputed boundary bucket collide with (and lose to) the row
/// already stored for that bucket.
fn reduce_group(bucket_start: i64, group: &[&Candle]) -> Candle {
    let first = group[0];
    let last = group[group.len() - 1];

    let mut high = first.high;
    let mut low = first.low;
    let mut volume = Decimal::ZERO;
    let mut quote_asset_volume = Decimal::ZERO;
    let mut number_of_trades = 0i64;
    let mut taker_buy_base = Decimal::ZERO;
    let mut taker_buy_quote = Decimal::ZERO;
    let mut ignore_field = Decimal::ZERO;

    for candle in group {
        high = high.max(candle.high);
        low = low.min(candle.low);
        volume += candle.volume;
        quote_asset_volume += candle.quote_asset_volume;
        number_of_trades += candle.number_of_trades;
        taker_buy_base += candle.taker_buy_base;
        taker_buy_quote += candle.taker_buy_quote;
        ignore_field += candle.ignore_field;
    }

    Candle {
        open_time: bucket_start,
        open: first.open,
        high,
        low,
        close: last.close,
        volume,
        close_time: last.close_time,
        quote_asset_volume,
        number_of_trades,
        taker_buy_base,
        taker_buy_quote,
        ignore_field,
    }
}
