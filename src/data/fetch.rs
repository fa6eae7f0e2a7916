use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

use super::sink::CandleSink;
use crate::exchange::KlineFetcher;
use crate::types::Interval;

/// Pulls the complete 1m history of each symbol by paginating backward
/// from now until the venue runs out of data.
///
/// Within one symbol the request sequence is strictly serial: the next
/// `endTime` is derived from the previous batch. Parallelism is per-symbol
/// only, so every `(symbol, interval)` stream is written by one worker.
#[derive(Clone)]
pub struct HistoricalFetcher {
    fetcher: Arc<dyn KlineFetcher>,
    sleep: Duration,
    stop: Arc<AtomicBool>,
}

impl HistoricalFetcher {
    pub fn new(fetcher: Arc<dyn KlineFetcher>, sleep_seconds: f64) -> Self {
        Self {
            fetcher,
            sleep: Duration::from_secs_f64(sleep_seconds),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative stop: the in-flight batch finishes and persists, then the
    /// symbol exits; queued symbols are not started.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub async fn fetch_symbol(&self, symbol: &str, sink: &mut dyn CandleSink) -> Result<u64> {
        self.fetch_symbol_from(symbol, Utc::now().timestamp_millis(), sink)
            .await
    }

    /// Backward pagination from `end_time`: persist each batch, then move
    /// `end_time` to just before the earliest row seen. An empty batch marks
    /// the venue's earliest record.
    pub async fn fetch_symbol_from(
        &self,
        symbol: &str,
        mut end_time: i64,
        sink: &mut dyn CandleSink,
    ) -> Result<u64> {
        info!("Starting historical fetch for {} 1m", symbol);
        sink.prepare(symbol, Interval::M1).await?;

        let mut total = 0u64;
        loop {
            if self.stop.load(Ordering::Relaxed) {
                info!("Stop requested, halting {} after {} rows", symbol, total);
                break;
            }

            let batch = self
                .fetcher
                .fetch_batch(symbol, Interval::M1, end_time)
                .await;
            if batch.is_empty() {
                info!("No more data available for {}", symbol);
                break;
            }

            sink.write_batch(symbol, Interval::M1, &batch).await?;
            total += batch.len() as u64;

            // Batches arrive ascending, so the first row is the earliest
            end_time = batch[0].open_time - 1;

            tokio::time::sleep(self.sleep).await;
        }

        info!("Fetched {} rows for {}", total, symbol);
        Ok(total)
    }

    /// Fetch many symbols on a bounded worker pool fed by a symbol channel.
    /// A failed symbol does not abort the rest. Results come back in the
    /// input symbol order.
    pub async fn fetch_all<M>(
        &self,
        symbols: &[String],
        workers: usize,
        make_sink: M,
    ) -> Vec<(String, bool)>
    where
        M: Fn() -> Result<Box<dyn CandleSink>> + Send + Sync + Clone + 'static,
    {
        let (tx, rx) = mpsc::channel::<String>(symbols.len().max(1));
        for symbol in symbols {
            // Channel is sized to hold the full symbol list
            let _ = tx.send(symbol.clone()).await;
        }
        drop(tx);

        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::new();

        for _ in 0..workers.max(1) {
            let rx = rx.clone();
            let fetcher = self.clone();
            let make_sink = make_sink.clone();

            handles.push(tokio::spawn(async move {
                let mut results = Vec::new();
                loop {
                    let symbol = { rx.lock().await.recv().await };
                    let Some(symbol) = symbol else { break };
                    if fetcher.stop.load(Ordering::Relaxed) {
                        break;
                    }

                    let outcome = match make_sink() {
                        Ok(mut sink) => fetcher.fetch_symbol(&symbol, sink.as_mut()).await,
                        Err(e) => Err(e),
                    };

                    match outcome {
                        Ok(_) => results.push((symbol, true)),
                        Err(e) => {
                            error!("Failed to fetch {}: {}", symbol, e);
                            results.push((symbol, false));
                        }
                    }
                }
                results
            }));
        }

        let mut all: Vec<(String, bool)> = Vec::new();
        for handle in handles {
            if let Ok(results) = handle.await {
                all.extend(results);
            }
        }

        all.sort_by_key(|(symbol, _)| symbols.iter().position(|s| s == symbol));
        all
    }

    pub fn print_summary(results: &[(String, bool)]) {
        println!("\n{}", "=".repeat(50));
        println!("FETCH SUMMARY");
        println!("{}", "=".repeat(50));
        for (symbol, success) in results {
            let status = if *success { "SUCCESS" } else { "FAILED" };
            println!("{:12} | {}", symbol, status);
        }
    }
}
