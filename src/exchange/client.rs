use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::Settings;
use crate::types::{Candle, Interval};

/// Source of kline batches. The production implementation talks to the
/// venue over HTTPS; tests substitute scripted fetchers.
#[async_trait]
pub trait KlineFetcher: Send + Sync {
    /// Fetch up to `limit` candles ending at `end_time_ms`, sorted ascending
    /// by open_time as the venue returns them.
    ///
    /// Transport and parse failures are retried internally; after the last
    /// attempt the batch is empty, never an error. Callers treat an empty
    /// batch as the pagination boundary.
    async fn fetch_batch(&self, symbol: &str, interval: Interval, end_time_ms: i64) -> Vec<Candle>;
}

#[derive(Debug, Clone)]
pub struct KlineClient {
    client: Client,
    base_url: String,
    limit: u32,
    max_retries: u32,
    retry_delay: Duration,
}

impl KlineClient {
    pub fn new(settings: &Settings, retry_delay_secs: f64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            limit: settings.api_limit,
            max_retries: settings.max_retries,
            retry_delay: Duration::from_secs_f64(retry_delay_secs),
        })
    }

    async fn request_klines(
        &self,
        symbol: &str,
        interval: Interval,
        end_time_ms: i64,
    ) -> Result<Vec<Vec<serde_json::Value>>> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("symbol", symbol.to_string()),
                ("interval", interval.as_str().to_string()),
                ("limit", self.limit.to_string()),
                ("endTime", end_time_ms.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}

#[async_trait]
impl KlineFetcher for KlineClient {
    async fn fetch_batch(&self, symbol: &str, interval: Interval, end_time_ms: i64) -> Vec<Candle> {
        for attempt in 1..=self.max_retries {
            match self.request_klines(symbol, interval, end_time_ms).await {
                Ok(rows) => {
                    let mut candles = Vec::with_capacity(rows.len());
                    for row in &rows {
                        match Candle::from_kline_row(row) {
                            Ok(candle) => candles.push(candle),
                            Err(e) => {
                                warn!("Skipping malformed kline row for {}: {}", symbol, e);
                            }
                        }
                    }
                    debug!(
                        "Fetched {} klines for {} {} ending at {}",
                        candles.len(),
                        symbol,
                        interval,
                        end_time_ms
                    );
                    return candles;
                }
                Err(e) => {
                    warn!(
                        "Attempt {}/{} failed for {} {}: {}",
                        attempt, self.max_retries, symbol, interval, e
                    );
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        error!(
            "Failed to fetch klines for {} {} after {} attempts",
            symbol, interval, self.max_retries
        );
        Vec::new()
    }
}
