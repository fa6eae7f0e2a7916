use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::str::FromStr;
use tracing::info;

use crate::types::{Candle, Interval};

/// Candle storage: one table per `(symbol, interval)` named
/// `{symbol_lower}_{interval}`, with `open_time` UNIQUE and
/// insert-or-ignore conflict semantics so the first writer wins.
pub struct CandleStore {
    pool: SqlitePool,
    batch_size: usize,
}

/// Table name for a symbol and interval, e.g. `btcusdt_1m`.
///
/// The symbol is interpolated into SQL, so anything beyond ASCII
/// alphanumerics is rejected here.
pub fn table_name(symbol: &str, interval: Interval) -> Result<String> {
    if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(anyhow!("invalid symbol: {:?}", symbol));
    }
    Ok(format!("{}_{}", symbol.to_lowercase(), interval))
}

impl CandleStore {
    /// Open (creating if missing) the database at `database_url`.
    ///
    /// A single connection per store instance keeps writes to any one table
    /// serialized and makes `sqlite::memory:` behave in tests.
    pub async fn new(database_url: &str, batch_size: usize) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self { pool, batch_size })
    }

    /// Create the fifteen interval tables for a symbol, with indexes on
    /// open_time, close_time, and the (open_time, close_time) range.
    pub async fn create_tables_for_symbol(&self, symbol: &str) -> Result<()> {
        for interval in Interval::ALL {
            let table = table_name(symbol, interval)?;

            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    open_time INTEGER NOT NULL UNIQUE,
                    open TEXT NOT NULL,
                    high TEXT NOT NULL,
                    low TEXT NOT NULL,
                    close TEXT NOT NULL,
                    volume TEXT NOT NULL,
                    close_time INTEGER NOT NULL,
                    quote_asset_volume TEXT NOT NULL,
                    number_of_trades INTEGER NOT NULL,
                    taker_buy_base TEXT NOT NULL,
                    taker_buy_quote TEXT NOT NULL,
                    ignore_field TEXT NOT NULL,
                    created_at TEXT DEFAULT (datetime('now'))
                )
                "#
            ))
            .execute(&self.pool)
            .await?;

            for index_sql in [
                format!("CREATE INDEX IF NOT EXISTS idx_{table}_open_time ON {table}(open_time)"),
                format!("CREATE INDEX IF NOT EXISTS idx_{table}_close_time ON {table}(close_time)"),
                format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_time_range ON {table}(open_time, close_time)"
                ),
            ] {
                sqlx::query(&index_sql).execute(&self.pool).await?;
            }
        }

        info!("Created {} tables for {}", Interval::ALL.len(), symbol);
        Ok(())
    }

    /// Insert a batch of candles, ignoring rows whose open_time already
    /// exists. All chunks run inside one transaction; any failure rolls the
    /// whole batch back. Returns the number of rows actually inserted.
    pub async fn insert_candles(
        &self,
        symbol: &str,
        interval: Interval,
        candles: &[Candle],
    ) -> Result<u64> {
        if candles.is_empty() {
            return Ok(0);
        }

        let table = table_name(symbol, interval)?;
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for chunk in candles.chunks(self.batch_size) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
                "INSERT OR IGNORE INTO {table} (open_time, open, high, low, close, volume, \
                 close_time, quote_asset_volume, number_of_trades, taker_buy_base, \
                 taker_buy_quote, ignore_field) "
            ));

            builder.push_values(chunk, |mut row, candle| {
                row.push_bind(candle.open_time)
                    .push_bind(candle.open.to_string())
                    .push_bind(candle.high.to_string())
                    .push_bind(candle.low.to_string())
                    .push_bind(candle.close.to_string())
                    .push_bind(candle.volume.to_string())
                    .push_bind(candle.close_time)
                    .push_bind(candle.quote_asset_volume.to_string())
                    .push_bind(candle.number_of_trades)
                    .push_bind(candle.taker_buy_base.to_string())
                    .push_bind(candle.taker_buy_quote.to_string())
                    .push_bind(candle.ignore_field.to_string());
            });

            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Latest stored open_time for a symbol and interval, None when the
    /// table is empty or absent.
    pub async fn latest_open_time(&self, symbol: &str, interval: Interval) -> Result<Option<i64>> {
        let table = table_name(symbol, interval)?;
        if !self.table_exists(&table).await? {
            return Ok(None);
        }

        let row = sqlx::query(&format!("SELECT MAX(open_time) AS latest FROM {table}"))
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("latest"))
    }

    pub async fn count(&self, symbol: &str, interval: Interval) -> Result<i64> {
        let table = table_name(symbol, interval)?;
        if !self.table_exists(&table).await? {
            return Ok(0);
        }

        let row = sqlx::query(&format!("SELECT COUNT(*) AS count FROM {table}"))
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("count"))
    }

    /// Load candles in `[start_ms, end_ms]` ordered ascending by open_time.
    pub async fn load_range(
        &self,
        symbol: &str,
        interval: Interval,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>> {
        let table = table_name(symbol, interval)?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT open_time, open, high, low, close, volume, close_time,
                   quote_asset_volume, number_of_trades, taker_buy_base,
                   taker_buy_quote, ignore_field
            FROM {table}
            WHERE open_time >= ? AND open_time <= ?
            ORDER BY open_time ASC
            "#
        ))
        .bind(start_ms)
        .bind(end_ms)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(candle_from_row).collect()
    }

    pub async fn load_all(&self, symbol: &str, interval: Interval) -> Result<Vec<Candle>> {
        self.load_range(symbol, interval, i64::MIN, i64::MAX).await
    }

    /// Symbols that have a base 1m table, discovered from the schema.
    pub async fn symbols_with_base_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table' AND name LIKE '%_1m'
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("name");
                name.trim_end_matches("_1m").to_uppercase()
            })
            .collect())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.get("count");
        Ok(count > 0)
    }
}

fn candle_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Candle> {
    let decimal_col = |name: &str| -> Result<Decimal> {
        let s: String = row.get(name);
        Decimal::from_str(&s).map_err(|e| anyhow!("column {}: {}", name, e))
    };

    Ok(Candle {
        open_time: row.get("open_time"),
        open: decimal_col("open")?,
        high: decimal_col("high")?,
        low: decimal_col("low")?,
        close: decimal_col("close")?,
        volume: decimal_col("volume")?,
        close_time: row.get("close_time"),
        quote_asset_volume: decimal_col("quote_asset_volume")?,
        number_of_trades: row.get("number_of_trades"),
        taker_buy_base: decimal_col("taker_buy_base")?,
        taker_buy_quote: decimal_col("taker_buy_quote")?,
        ignore_field: decimal_col("ignore_field")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn minute_candle(index: i64) -> Candle {
        let open_time = index * 60_000;
        Candle {
            open_time,
            open: dec!(100) + Decimal::from(index),
            high: dec!(101) + Decimal::from(index),
            low: dec!(99) + Decimal::from(index),
            close: dec!(100.5) + Decimal::from(index),
            volume: dec!(1),
            close_time: open_time + 59_999,
            quote_asset_volume: dec!(100),
            number_of_trades: 10,
            taker_buy_base: dec!(0.5),
            taker_buy_quote: dec!(50),
            ignore_field: dec!(0),
        }
    }

    #[tokio::test]
    async fn test_insert_and_load_round_trip() {
        let store = CandleStore::new("sqlite::memory:", 1000).await.unwrap();
        store.create_tables_for_symbol("BTCUSDT").await.unwrap();

        let candles: Vec<Candle> = (0..5).map(minute_candle).collect();
        let inserted = store
            .insert_candles("BTCUSDT", Interval::M1, &candles)
            .await
            .unwrap();
        assert_eq!(inserted, 5);

        let loaded = store.load_all("BTCUSDT", Interval::M1).await.unwrap();
        assert_eq!(loaded, candles);
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = CandleStore::new("sqlite::memory:", 2).await.unwrap();
        store.create_tables_for_symbol("BTCUSDT").await.unwrap();

        let candles: Vec<Candle> = (0..5).map(minute_candle).collect();
        store
            .insert_candles("BTCUSDT", Interval::M1, &candles)
            .await
            .unwrap();
        let second = store
            .insert_candles("BTCUSDT", Interval::M1, &candles)
            .await
            .unwrap();

        assert_eq!(second, 0);
        assert_eq!(store.count("BTCUSDT", Interval::M1).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_latest_open_time() {
        let store = CandleStore::new("sqlite::memory:", 1000).await.unwrap();
        assert_eq!(
            store.latest_open_time("BTCUSDT", Interval::M1).await.unwrap(),
            None
        );

        store.create_tables_for_symbol("BTCUSDT").await.unwrap();
        assert_eq!(
            store.latest_open_time("BTCUSDT", Interval::M1).await.unwrap(),
            None
        );

        let candles: Vec<Candle> = (0..3).map(minute_candle).collect();
        store
            .insert_candles("BTCUSDT", Interval::M1, &candles)
            .await
            .unwrap();
        assert_eq!(
            store.latest_open_time("BTCUSDT", Interval::M1).await.unwrap(),
            Some(120_000)
        );
    }

    #[tokio::test]
    async fn test_symbol_discovery() {
        let store = CandleStore::new("sqlite::memory:", 1000).await.unwrap();
        store.create_tables_for_symbol("BTCUSDT").await.unwrap();
        store.create_tables_for_symbol("ETHUSDT").await.unwrap();

        let symbols = store.symbols_with_base_tables().await.unwrap();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn test_table_name_rejects_injection() {
        assert!(table_name("BTCUSDT", Interval::M1).is_ok());
        assert!(table_name("btc; DROP TABLE x", Interval::M1).is_err());
        assert!(table_name("", Interval::M1).is_err());
    }
}
