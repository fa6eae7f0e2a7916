pub mod aggregate;
pub mod fetch;
pub mod ingest;
pub mod sink;
pub mod update;

pub use aggregate::aggregate_to_interval;
pub use fetch::HistoricalFetcher;
pub use ingest::CsvIngestor;
pub use sink::{CandleSink, CsvSink, TableSink};
pub use update::Updater;
