use anyhow::Result;
use std::collections::HashMap;

use super::orders::OrderRequest;
use crate::types::{Account, Candle, Order, Position};

/// A trading strategy driven by the backtest event loop.
///
/// `on_candle` runs once per candle and returns the orders to queue; the
/// remaining hooks are notifications with no-op defaults. Callbacks must be
/// synchronous: the loop has no suspension points inside a candle step.
/// Errors returned from `on_candle` are logged and the candle skipped; they
/// never halt the run.
pub trait Strategy {
    fn name(&self) -> &str;

    fn parameters(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    fn on_candle(&mut self, candle: &Candle, account: &Account) -> Result<Vec<OrderRequest>>;

    fn on_order_filled(&mut self, _order: &Order, _account: &Account) {}

    fn on_position_opened(&mut self, _position: &Position, _account: &Account) {}

    fn on_position_closed(&mut self, _position: &Position, _account: &Account) {}
}
