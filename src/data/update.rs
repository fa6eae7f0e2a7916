use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::aggregate::aggregate_to_interval;
use crate::database::CandleStore;
use crate::exchange::KlineFetcher;
use crate::types::{Candle, Interval};

/// Incremental updater: resumes each symbol from its last persisted 1m
/// bucket, fetches only new candles, re-aggregates every coarser interval
/// over the fresh slice, and upserts with conflict-ignore.
///
/// A coarser bucket whose first minute predates this update is recomputed
/// from the fresh slice only; because conflicts are ignored, the previously
/// stored bucket wins and stays as-is.
pub struct Updater {
    fetcher: Arc<dyn KlineFetcher>,
    store: Arc<CandleStore>,
    sleep: Duration,
    api_limit: i64,
}

impl Updater {
    pub fn new(
        fetcher: Arc<dyn KlineFetcher>,
        store: Arc<CandleStore>,
        sleep_seconds: f64,
        api_limit: u32,
    ) -> Self {
        Self {
            fetcher,
            store,
            sleep: Duration::from_secs_f64(sleep_seconds),
            api_limit: api_limit as i64,
        }
    }

    pub async fn update_symbol(&self, symbol: &str) -> Result<bool> {
        self.update_symbol_until(symbol, Utc::now().timestamp_millis())
            .await
    }

    /// Update one symbol with candles up to `now_ms`. Returns false when any
    /// interval failed to persist; a symbol without existing 1m data is
    /// skipped (the updater refuses to bootstrap).
    pub async fn update_symbol_until(&self, symbol: &str, now_ms: i64) -> Result<bool> {
        info!("Updating {}...", symbol);

        let Some(last_1m) = self.store.latest_open_time(symbol, Interval::M1).await? else {
            warn!("No existing data found for {}, skipping update", symbol);
            return Ok(true);
        };

        let new_1m = self.fetch_new_1m(symbol, last_1m + 1, now_ms).await;
        if new_1m.is_empty() {
            info!("No new data available for {}", symbol);
            return Ok(true);
        }

        let mut success = true;
        for interval in Interval::ALL {
            let aggregated = aggregate_to_interval(&new_1m, interval);
            if aggregated.is_empty() {
                continue;
            }

            match self
                .store
                .insert_candles(symbol, interval, &aggregated)
                .await
            {
                Ok(inserted) => {
                    info!(
                        "Updated {} {}: {} of {} records new",
                        symbol,
                        interval,
                        inserted,
                        aggregated.len()
                    );
                }
                Err(e) => {
                    error!("Failed to update {} {}: {}", symbol, interval, e);
                    success = false;
                }
            }
        }

        Ok(success)
    }

    /// Slide a forward window of `api_limit` minutes from `cursor` to
    /// `now_ms`, keeping only rows past the cursor. Stops on an empty batch,
    /// an empty filtered batch, or when the cursor reaches now.
    async fn fetch_new_1m(&self, symbol: &str, mut cursor: i64, now_ms: i64) -> Vec<Candle> {
        let mut all_new = Vec::new();
        let window_ms = self.api_limit * Interval::M1.width_ms();

        while cursor < now_ms {
            let batch_end = (cursor + window_ms).min(now_ms);
            let batch = self
                .fetcher
                .fetch_batch(symbol, Interval::M1, batch_end)
                .await;
            if batch.is_empty() {
                warn!("No more data available for {} 1m", symbol);
                break;
            }

            let last_open = batch[batch.len() - 1].open_time;
            let fresh: Vec<Candle> = batch
                .into_iter()
                .filter(|c| c.open_time > cursor)
                .collect();
            if fresh.is_empty() {
                info!("No new data in this batch for {} 1m", symbol);
                break;
            }

            info!("Fetched {} new records for {} 1m", fresh.len(), symbol);
            all_new.extend(fresh);
            cursor = last_open + 1;

            tokio::time::sleep(self.sleep).await;
        }

        info!(
            "Total new data fetched for {} 1m: {} records",
            symbol,
            all_new.len()
        );
        all_new
    }

    /// Update every symbol, or those discovered from existing `*_1m` tables
    /// when none are given. A failed symbol does not abort the rest.
    pub async fn update_all(&self, symbols: Option<Vec<String>>) -> Result<bool> {
        let symbols = match symbols {
            Some(symbols) if !symbols.is_empty() => symbols,
            _ => self.store.symbols_with_base_tables().await?,
        };

        if symbols.is_empty() {
            warn!("No symbols found to update");
            return Ok(true);
        }
        info!("Found {} symbols to update: {:?}", symbols.len(), symbols);

        let mut successful = 0;
        let mut failed = 0;
        for symbol in &symbols {
            match self.update_symbol(symbol).await {
                Ok(true) => successful += 1,
                Ok(false) => failed += 1,
                Err(e) => {
                    error!("Update failed for {}: {}", symbol, e);
                    failed += 1;
                }
            }
        }

        info!(
            "Update completed: {} symbols successful, {} failed",
            successful, failed
        );
        Ok(failed == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::KlineFetcher;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn venue_candle(open_time: i64) -> Candle {
        Candle {
            open_time,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100.5),
            volume: dec!(1),
            close_time: open_time + 59_999,
            quote_asset_volume: dec!(100),
            number_of_trades: 3,
            taker_buy_base: dec!(0.5),
            taker_buy_quote: dec!(50),
            ignore_field: Decimal::ZERO,
        }
    }

    struct ScriptedVenue {
        earliest_ms: i64,
        latest_ms: i64,
        limit: i64,
    }

    #[async_trait]
    impl KlineFetcher for ScriptedVenue {
        async fn fetch_batch(
            &self,
            _symbol: &str,
            _interval: Interval,
            end_time_ms: i64,
        ) -> Vec<Candle> {
            let end = end_time_ms.min(self.latest_ms);
            if end < self.earliest_ms {
                return Vec::new();
            }
            let last = (end / 60_000) * 60_000;
            let first = (last - (self.limit - 1) * 60_000).max(self.earliest_ms);
            (first..=last).step_by(60_000).map(venue_candle).collect()
        }
    }

    async fn seeded_store(minutes: i64) -> Arc<CandleStore> {
        let store = Arc::new(CandleStore::new("sqlite::memory:", 1000).await.unwrap());
        store.create_tables_for_symbol("BTCUSDT").await.unwrap();
        let seed: Vec<Candle> = (0..minutes).map(|i| venue_candle(i * 60_000)).collect();
        for interval in Interval::ALL {
            let aggregated = aggregate_to_interval(&seed, interval);
            store
                .insert_candles("BTCUSDT", interval, &aggregated)
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_incremental_update_is_idempotent() {
        // Store holds minutes 0..9, venue has two more
        let store = seeded_store(10).await;
        let venue = Arc::new(ScriptedVenue {
            earliest_ms: 0,
            latest_ms: 11 * 60_000,
            limit: 499,
        });
        let updater = Updater::new(venue, store.clone(), 0.0, 499);

        let now_ms = 12 * 60_000;
        assert!(updater.update_symbol_until("BTCUSDT", now_ms).await.unwrap());
        assert_eq!(store.count("BTCUSDT", Interval::M1).await.unwrap(), 12);

        // Invoked again immediately: zero new rows, no error
        assert!(updater.update_symbol_until("BTCUSDT", now_ms).await.unwrap());
        assert_eq!(store.count("BTCUSDT", Interval::M1).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_update_skips_unseeded_symbol() {
        let store = Arc::new(CandleStore::new("sqlite::memory:", 1000).await.unwrap());
        let venue = Arc::new(ScriptedVenue {
            earliest_ms: 0,
            latest_ms: 60_000,
            limit: 499,
        });
        let updater = Updater::new(venue, store.clone(), 0.0, 499);

        // The updater refuses to bootstrap a symbol with no 1m history
        assert!(updater.update_symbol_until("BTCUSDT", 120_000).await.unwrap());
        assert_eq!(store.count("BTCUSDT", Interval::M1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stored_partial_bucket_is_preserved() {
        // Minutes 0..6 stored: the 5m bucket at 300000 covers minutes 5-6 only
        let store = seeded_store(7).await;
        let before = store
            .load_all("BTCUSDT", Interval::M5)
            .await
            .unwrap();
        let partial = before.last().unwrap().clone();
        assert_eq!(partial.open_time, 300_000);
        assert_eq!(partial.volume, dec!(2));

        // Update brings minutes 7..9; the recomputed bucket at 300000 loses
        // to the stored row under conflict-ignore
        let venue = Arc::new(ScriptedVenue {
            earliest_ms: 0,
            latest_ms: 9 * 60_000,
            limit: 499,
        });
        let updater = Updater::new(venue, store.clone(), 0.0, 499);
        assert!(updater
            .update_symbol_until("BTCUSDT", 10 * 60_000)
            .await
            .unwrap());

        let after = store.load_all("BTCUSDT", Interval::M5).await.unwrap();
        let bucket = after.iter().find(|c| c.open_time == 300_000).unwrap();
        assert_eq!(bucket, &partial);
    }
}
