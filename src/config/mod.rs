use anyhow::{anyhow, Result};
use std::env;
use std::path::PathBuf;

/// Default futures kline endpoint.
const DEFAULT_BASE_URL: &str = "https://fapi.binance.com/fapi/v1/klines";

/// Seed symbol set used when no symbols are given on the command line.
const DEFAULT_COINS: [&str; 20] = [
    "BTCUSDT", "ETHUSDT", "XRPUSDT", "BNBUSDT", "SOLUSDT", "DOGEUSDT", "TRXUSDT", "ADAUSDT",
    "HYPEUSDT", "LINKUSDT", "SUIUSDT", "AVAXUSDT", "XLMUSDT", "BCHUSDT", "HBARUSDT", "LEOUSDT",
    "LTCUSDT", "TONUSDT", "CROUSDT", "SHIBUSDT",
];

/// Runtime configuration, read from the environment with compiled defaults.
///
/// A `.env` file is honored via dotenvy before these are read.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Kline endpoint (`BINANCE_BASE_URL`).
    pub base_url: String,
    /// Per-request transport deadline in seconds (`REQUEST_TIMEOUT`).
    pub request_timeout_secs: u64,
    /// Maximum candles per request (`API_LIMIT`).
    pub api_limit: u32,
    /// Inter-request pause per worker in seconds (`SLEEP_SECONDS`).
    pub sleep_seconds: f64,
    /// Attempts per failing request (`MAX_RETRIES`).
    pub max_retries: u32,
    /// Seconds between retries for the historical fetcher (`RETRY_DELAY`).
    pub retry_delay_secs: f64,
    /// Seconds between retries for the incremental updater (`UPDATE_RETRY_DELAY`).
    pub update_retry_delay_secs: f64,
    /// Root directory for the CSV sink (`DATA_DIR`).
    pub data_dir: PathBuf,
    /// Character encoding for CSV I/O (`CSV_ENCODING`); only utf-8 is supported.
    pub csv_encoding: String,
    /// Database connection string for the table sink (`DATABASE_URL`).
    pub database_url: String,
    /// Rows per insert batch (`DB_BATCH_SIZE`).
    pub db_batch_size: usize,
    /// Seed symbol set if none provided (`DEFAULT_COINS`, comma separated).
    pub default_coins: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 10,
            api_limit: 499,
            sleep_seconds: 0.2,
            max_retries: 5,
            retry_delay_secs: 3.0,
            update_retry_delay_secs: 1.0,
            data_dir: PathBuf::from("raw_data"),
            csv_encoding: "utf-8".to_string(),
            database_url: "sqlite:./klines.db".to_string(),
            db_batch_size: 1000,
            default_coins: DEFAULT_COINS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let defaults = Settings::default();

        let settings = Self {
            base_url: env_or("BINANCE_BASE_URL", defaults.base_url),
            request_timeout_secs: parse_env("REQUEST_TIMEOUT", defaults.request_timeout_secs)?,
            api_limit: parse_env("API_LIMIT", defaults.api_limit)?,
            sleep_seconds: parse_env("SLEEP_SECONDS", defaults.sleep_seconds)?,
            max_retries: parse_env("MAX_RETRIES", defaults.max_retries)?,
            retry_delay_secs: parse_env("RETRY_DELAY", defaults.retry_delay_secs)?,
            update_retry_delay_secs: parse_env(
                "UPDATE_RETRY_DELAY",
                defaults.update_retry_delay_secs,
            )?,
            data_dir: env_or("DATA_DIR", defaults.data_dir.display().to_string()).into(),
            csv_encoding: env_or("CSV_ENCODING", defaults.csv_encoding),
            database_url: env_or("DATABASE_URL", defaults.database_url),
            db_batch_size: parse_env("DB_BATCH_SIZE", defaults.db_batch_size)?,
            default_coins: match env::var("DEFAULT_COINS") {
                Ok(v) => v
                    .split(',')
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect(),
                Err(_) => defaults.default_coins,
            },
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.api_limit == 0 {
            return Err(anyhow!("API_LIMIT must be > 0"));
        }
        if self.max_retries == 0 {
            return Err(anyhow!("MAX_RETRIES must be > 0"));
        }
        if self.db_batch_size == 0 {
            return Err(anyhow!("DB_BATCH_SIZE must be > 0"));
        }
        if !self.csv_encoding.eq_ignore_ascii_case("utf-8") {
            return Err(anyhow!(
                "CSV_ENCODING {} is not supported, only utf-8",
                self.csv_encoding
            ));
        }
        Ok(())
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|e| anyhow!("invalid {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}
