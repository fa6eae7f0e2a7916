pub mod client;

pub use client::{KlineClient, KlineFetcher};
