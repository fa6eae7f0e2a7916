mod config;
mod data;
mod database;
mod engine;
mod exchange;
mod strategies;
mod types;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::Settings;
use data::{CandleSink, CsvIngestor, CsvSink, HistoricalFetcher, TableSink, Updater};
use database::CandleStore;
use engine::BacktestEngine;
use exchange::KlineClient;
use strategies::SmaCrossStrategy;
use types::{FeeConfig, Interval};

#[derive(Parser)]
#[command(name = "kline-engine")]
#[command(version = "0.1.0")]
#[command(about = "Historical candlestick pipeline and deterministic backtester", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the full 1m history for symbols, walking backward to exhaustion
    Fetch {
        /// Symbols to fetch (defaults to the configured coin set)
        symbols: Vec<String>,

        /// Persistence backend: csv or table
        #[arg(long, default_value = "csv")]
        sink: String,

        /// Parallel symbol workers
        #[arg(long, default_value = "4")]
        workers: usize,
    },
    /// Ingest fetched CSV files into the database, aggregating all intervals
    InitDb,
    /// Incrementally update stored symbols with new candles
    Update {
        /// Symbols to update (defaults to every symbol with a 1m table)
        symbols: Vec<String>,
    },
    /// Run a moving-average-cross backtest over stored candles
    Backtest {
        /// Symbol to test
        #[arg(short, long)]
        symbol: String,

        /// Candle interval, e.g. 1m, 15m, 1h, 1D
        #[arg(short, long, default_value = "1h")]
        interval: String,

        /// Initial balance in quote currency
        #[arg(long, default_value = "10000")]
        balance: f64,

        /// Start date (YYYY-MM-DD), inclusive
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD), inclusive
        #[arg(long)]
        end: Option<String>,

        /// Fast moving-average period
        #[arg(long, default_value = "9")]
        fast: usize,

        /// Slow moving-average period
        #[arg(long, default_value = "21")]
        slow: usize,

        /// Order quantity in base currency
        #[arg(long, default_value = "1")]
        quantity: f64,
    },
    /// Print per-table row counts
    Stats {
        /// Symbols to report (defaults to every known symbol)
        symbols: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = Settings::from_env()?;

    match cli.command {
        Commands::Fetch {
            symbols,
            sink,
            workers,
        } => run_fetch(&settings, symbols, &sink, workers).await?,
        Commands::InitDb => run_init_db(&settings).await?,
        Commands::Update { symbols } => run_update(&settings, symbols).await?,
        Commands::Backtest {
            symbol,
            interval,
            balance,
            start,
            end,
            fast,
            slow,
            quantity,
        } => {
            run_backtest(
                &settings, &symbol, &interval, balance, start, end, fast, slow, quantity,
            )
            .await?
        }
        Commands::Stats { symbols } => run_stats(&settings, symbols).await?,
    }

    Ok(())
}

async fn run_fetch(
    settings: &Settings,
    symbols: Vec<String>,
    sink: &str,
    workers: usize,
) -> Result<()> {
    let symbols = if symbols.is_empty() {
        settings.default_coins.clone()
    } else {
        symbols.iter().map(|s| s.to_uppercase()).collect()
    };
    info!("Starting batch fetch for {} symbols", symbols.len());

    let client = Arc::new(KlineClient::new(settings, settings.retry_delay_secs)?);
    let fetcher = HistoricalFetcher::new(client, settings.sleep_seconds);

    // Ctrl-C requests a cooperative stop: in-flight batches persist first
    let stop = fetcher.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after in-flight batches");
            stop.store(true, Ordering::Relaxed);
        }
    });

    let results = match sink {
        "csv" => {
            let data_dir = settings.data_dir.clone();
            fetcher
                .fetch_all(&symbols, workers, move || {
                    Ok(Box::new(CsvSink::new(data_dir.clone())) as Box<dyn CandleSink>)
                })
                .await
        }
        "table" => {
            let store =
                Arc::new(CandleStore::new(&settings.database_url, settings.db_batch_size).await?);
            fetcher
                .fetch_all(&symbols, workers, move || {
                    Ok(Box::new(TableSink::new(store.clone())) as Box<dyn CandleSink>)
                })
                .await
        }
        other => return Err(anyhow!("unknown sink {:?}, expected csv or table", other)),
    };

    HistoricalFetcher::print_summary(&results);
    Ok(())
}

async fn run_init_db(settings: &Settings) -> Result<()> {
    let store = Arc::new(CandleStore::new(&settings.database_url, settings.db_batch_size).await?);
    let ingestor = CsvIngestor::new(store, settings.data_dir.clone());

    let success = ingestor.ingest_all().await?;
    println!("\n{}", "=".repeat(60));
    if success {
        println!("DATABASE INITIALIZATION SUCCESSFUL");
        println!("{}", "=".repeat(60));
        println!("All CSV files have been ingested");
        println!("All intervals aggregated from 1m data");
    } else {
        println!("DATABASE INITIALIZATION FAILED");
        println!("{}", "=".repeat(60));
        println!("Some files failed to ingest, check the logs");
    }
    println!("{}", "=".repeat(60));

    ingestor.print_stats(None).await?;
    Ok(())
}

async fn run_update(settings: &Settings, symbols: Vec<String>) -> Result<()> {
    let store = Arc::new(CandleStore::new(&settings.database_url, settings.db_batch_size).await?);
    let client = Arc::new(KlineClient::new(settings, settings.update_retry_delay_secs)?);
    let updater = Updater::new(client, store, settings.sleep_seconds, settings.api_limit);

    let symbols = if symbols.is_empty() {
        None
    } else {
        Some(symbols.iter().map(|s| s.to_uppercase()).collect())
    };

    let success = updater.update_all(symbols).await?;
    println!("\n{}", "=".repeat(60));
    if success {
        println!("DATABASE UPDATE SUCCESSFUL");
        println!("{}", "=".repeat(60));
        println!("All symbols updated with latest data");
    } else {
        println!("DATABASE UPDATE FAILED");
        println!("{}", "=".repeat(60));
        println!("Some symbols failed to update, check the logs");
    }
    println!("{}", "=".repeat(60));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_backtest(
    settings: &Settings,
    symbol: &str,
    interval: &str,
    balance: f64,
    start: Option<String>,
    end: Option<String>,
    fast: usize,
    slow: usize,
    quantity: f64,
) -> Result<()> {
    let interval =
        Interval::from_str(interval).ok_or_else(|| anyhow!("unknown interval {:?}", interval))?;
    let symbol = symbol.to_uppercase();

    let start_ms = match start {
        Some(date) => date_to_ms(&date)?,
        None => i64::MIN,
    };
    let end_ms = match end {
        Some(date) => date_to_ms(&date)? + Interval::D1.width_ms() - 1,
        None => i64::MAX,
    };

    let store = CandleStore::new(&settings.database_url, settings.db_batch_size).await?;
    let candles = store.load_range(&symbol, interval, start_ms, end_ms).await?;
    info!("Loaded {} {} candles for {}", candles.len(), interval, symbol);

    let mut strategy = SmaCrossStrategy::new(fast, slow, Decimal::try_from(quantity)?);
    let mut engine =
        BacktestEngine::new(Decimal::try_from(balance)?, "USDT", FeeConfig::default());

    let result = engine.run(&mut strategy, &candles, &symbol)?;
    result.metrics.print_summary();
    Ok(())
}

async fn run_stats(settings: &Settings, symbols: Vec<String>) -> Result<()> {
    let store = Arc::new(CandleStore::new(&settings.database_url, settings.db_batch_size).await?);
    let ingestor = CsvIngestor::new(store, settings.data_dir.clone());

    let symbols = if symbols.is_empty() {
        None
    } else {
        Some(symbols.iter().map(|s| s.to_uppercase()).collect())
    };
    ingestor.print_stats(symbols).await
}

fn date_to_ms(date: &str) -> Result<i64> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| anyhow!("invalid date {:?}: {}", date, e))?;
    Ok(date
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
        .timestamp_millis())
}
