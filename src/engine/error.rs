use thiserror::Error;

/// Typed failures inside the backtest engine.
///
/// Order validation failures are reported back as rejected orders and never
/// abort a run; position invariant violations are fatal to the event loop.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no candle data provided")]
    EmptyCandleSet,

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("position invariant violated: {0}")]
    PositionInvariant(String),
}
