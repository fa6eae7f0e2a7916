use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::database::CandleStore;
use crate::types::{Candle, Interval};

/// Persistence backend for fetched candles. Selected at pipeline start;
/// the fetch pipeline calls `prepare` once per `(symbol, interval)` stream
/// and `write_batch` for every batch it pulls.
#[async_trait]
pub trait CandleSink: Send {
    async fn prepare(&mut self, symbol: &str, interval: Interval) -> Result<()>;

    /// Persist one batch. Batches arrive ascending by open_time.
    async fn write_batch(
        &mut self,
        symbol: &str,
        interval: Interval,
        candles: &[Candle],
    ) -> Result<()>;
}

/// Append-only CSV sink: one `{symbol_lowercase}_{interval}.csv` file per
/// stream under the data directory, truncated with a header row on prepare.
///
/// Each batch is written reversed. The historical fetcher walks backward
/// through time, so reversing every (ascending) batch makes the file
/// descending overall, though non-monotonic at batch seams.
pub struct CsvSink {
    data_dir: PathBuf,
    writers: HashMap<(String, Interval), csv::Writer<File>>,
}

impl CsvSink {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            writers: HashMap::new(),
        }
    }

    pub fn file_path(&self, symbol: &str, interval: Interval) -> PathBuf {
        self.data_dir
            .join(format!("{}_{}.csv", symbol.to_lowercase(), interval))
    }
}

#[async_trait]
impl CandleSink for CsvSink {
    async fn prepare(&mut self, symbol: &str, interval: Interval) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("creating {}", self.data_dir.display()))?;

        let path = self.file_path(symbol, interval);
        let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;

        // csv::Writer emits the header from the struct's field names on the
        // first serialize call
        let writer = csv::Writer::from_writer(file);
        self.writers.insert((symbol.to_string(), interval), writer);

        info!("CSV sink ready: {}", path.display());
        Ok(())
    }

    async fn write_batch(
        &mut self,
        symbol: &str,
        interval: Interval,
        candles: &[Candle],
    ) -> Result<()> {
        let writer = self
            .writers
            .get_mut(&(symbol.to_string(), interval))
            .with_context(|| format!("CSV sink not prepared for {} {}", symbol, interval))?;

        for candle in candles.iter().rev() {
            writer.serialize(candle)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Table sink: upserts batches into the per-`(symbol, interval)` tables of
/// a [`CandleStore`] with insert-or-ignore conflict semantics.
pub struct TableSink {
    store: Arc<CandleStore>,
}

impl TableSink {
    pub fn new(store: Arc<CandleStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CandleSink for TableSink {
    async fn prepare(&mut self, symbol: &str, _interval: Interval) -> Result<()> {
        self.store.create_tables_for_symbol(symbol).await
    }

    async fn write_batch(
        &mut self,
        symbol: &str,
        interval: Interval,
        candles: &[Candle],
    ) -> Result<()> {
        self.store.insert_candles(symbol, interval, candles).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KLINE_HEADERS;
    use rust_decimal_macros::dec;

    fn minute_candle(index: i64) -> Candle {
        let open_time = index * 60_000;
        Candle {
            open_time,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100.5),
            volume: dec!(1),
            close_time: open_time + 59_999,
            quote_asset_volume: dec!(100),
            number_of_trades: 7,
            taker_buy_base: dec!(0.5),
            taker_buy_quote: dec!(50),
            ignore_field: dec!(0),
        }
    }

    #[tokio::test]
    async fn test_csv_sink_writes_header_and_reversed_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path().to_path_buf());

        sink.prepare("BTCUSDT", Interval::M1).await.unwrap();
        // Two backward-pagination batches: newer batch first, each ascending
        sink.write_batch("BTCUSDT", Interval::M1, &[minute_candle(2), minute_candle(3)])
            .await
            .unwrap();
        sink.write_batch("BTCUSDT", Interval::M1, &[minute_candle(0), minute_candle(1)])
            .await
            .unwrap();

        let contents =
            std::fs::read_to_string(sink.file_path("BTCUSDT", Interval::M1)).unwrap();
        let lines: Vec<&str> = contents.lines().collect();

        assert_eq!(lines[0], KLINE_HEADERS.join(","));
        let open_times: Vec<&str> = lines[1..]
            .iter()
            .map(|l| l.split(',').next().unwrap())
            .collect();
        assert_eq!(open_times, vec!["180000", "120000", "60000", "0"]);
    }

    #[tokio::test]
    async fn test_csv_sink_requires_prepare() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path().to_path_buf());
        let result = sink
            .write_batch("BTCUSDT", Interval::M1, &[minute_candle(0)])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_table_sink_round_trip() {
        let store = Arc::new(CandleStore::new("sqlite::memory:", 1000).await.unwrap());
        let mut sink = TableSink::new(store.clone());

        sink.prepare("BTCUSDT", Interval::M1).await.unwrap();
        sink.write_batch("BTCUSDT", Interval::M1, &[minute_candle(0), minute_candle(1)])
            .await
            .unwrap();

        assert_eq!(store.count("BTCUSDT", Interval::M1).await.unwrap(), 2);
    }
}
