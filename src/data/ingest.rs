use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::aggregate::aggregate_to_interval;
use crate::database::CandleStore;
use crate::types::{Candle, Interval};

/// Bootstraps the database from fetched CSV files: every `{symbol}_1m.csv`
/// under the data directory is parsed, aggregated to all fifteen intervals,
/// and inserted batch-wise with conflict-ignore.
pub struct CsvIngestor {
    store: Arc<CandleStore>,
    data_dir: PathBuf,
}

impl CsvIngestor {
    pub fn new(store: Arc<CandleStore>, data_dir: PathBuf) -> Self {
        Self { store, data_dir }
    }

    pub async fn ingest_all(&self) -> Result<bool> {
        let csv_files = self.csv_files()?;
        if csv_files.is_empty() {
            warn!("No CSV files found in {}", self.data_dir.display());
            return Ok(true);
        }
        info!("Found {} CSV files to process", csv_files.len());

        let mut successful = 0;
        let mut failed = 0;
        for path in &csv_files {
            match self.ingest_file(path).await {
                Ok(()) => successful += 1,
                Err(e) => {
                    error!("Failed to process {}: {}", path.display(), e);
                    failed += 1;
                }
            }
        }

        info!(
            "Database initialization completed: {} files processed successfully, {} failed",
            successful, failed
        );
        Ok(failed == 0)
    }

    async fn ingest_file(&self, path: &Path) -> Result<()> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("unreadable file name")?;
        let Some((symbol, interval)) = parse_file_name(file_name) else {
            warn!("Could not parse symbol and interval from {}", file_name);
            return Ok(());
        };

        // Only 1m files are ingested; coarser intervals are derived
        if interval != Interval::M1 {
            warn!("Skipping {} - only 1m data is processed for aggregation", file_name);
            return Ok(());
        }

        let mut candles = read_candles(path)?;
        if candles.is_empty() {
            warn!("No data found in {}", file_name);
            return Ok(());
        }
        // Fetched files are chronologically descending; the aggregator
        // expects ascending input
        candles.sort_by_key(|c| c.open_time);
        info!("Loaded {} 1m records for {}", candles.len(), symbol);

        self.store.create_tables_for_symbol(&symbol).await?;

        let mut total_inserted = 0u64;
        for target in Interval::ALL {
            let aggregated = aggregate_to_interval(&candles, target);
            if aggregated.is_empty() {
                continue;
            }
            let inserted = self
                .store
                .insert_candles(&symbol, target, &aggregated)
                .await?;
            total_inserted += inserted;
            info!(
                "Inserted {} {} records for {}",
                inserted, target, symbol
            );
        }

        info!(
            "Successfully processed {}: {} total records across all intervals",
            symbol, total_inserted
        );
        Ok(())
    }

    fn csv_files(&self) -> Result<Vec<PathBuf>> {
        if !self.data_dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.data_dir)
            .with_context(|| format!("reading {}", self.data_dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|e| e == "csv").unwrap_or(false))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Print per-table row counts for the given symbols (all known symbols
    /// when none are given).
    pub async fn print_stats(&self, symbols: Option<Vec<String>>) -> Result<()> {
        let symbols = match symbols {
            Some(symbols) if !symbols.is_empty() => symbols,
            _ => self.store.symbols_with_base_tables().await?,
        };

        println!("{}", "=".repeat(60));
        println!("DATABASE STATISTICS");
        println!("{}", "=".repeat(60));

        let mut total_rows = 0i64;
        for symbol in &symbols {
            println!("\n{} Tables:", symbol);
            for interval in Interval::ALL {
                let count = self.store.count(symbol, interval).await?;
                total_rows += count;
                println!("  {:4}: {:>10} records", interval.as_str(), count);
            }
        }

        println!(
            "\nTotal: {} tables, {} records",
            symbols.len() * Interval::ALL.len(),
            total_rows
        );
        println!("{}", "=".repeat(60));
        Ok(())
    }
}

/// Extract `(symbol, interval)` from a `{symbol}_{interval}.csv` name.
fn parse_file_name(file_name: &str) -> Option<(String, Interval)> {
    let stem = file_name.strip_suffix(".csv")?;
    let (symbol, interval) = stem.rsplit_once('_')?;
    Some((symbol.to_uppercase(), Interval::from_str(interval)?))
}

/// Read candles from a CSV file, skipping rows that fail to parse.
fn read_candles(path: &Path) -> Result<Vec<Candle>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut candles = Vec::new();
    for record in reader.deserialize::<Candle>() {
        match record {
            Ok(candle) => candles.push(candle),
            Err(e) => warn!("Skipping malformed CSV row in {}: {}", path.display(), e),
        }
    }
    Ok(candles)
}
