use anyhow::Result;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::engine::{OrderRequest, Strategy};
use crate::types::{Account, Candle, OrderSide, Position};

/// Moving-average crossover: market-buys a fixed quantity when the fast
/// average crosses above the slow one, market-sells it back on the cross
/// down. One position at a time, tracked through the engine's hooks.
pub struct SmaCrossStrategy {
    fast_period: usize,
    slow_period: usize,
    quantity: Decimal,
    closes: Vec<Decimal>,
    previous_delta: Option<Decimal>,
    in_position: bool,
}

impl SmaCrossStrategy {
    pub fn new(fast_period: usize, slow_period: usize, quantity: Decimal) -> Self {
        assert!(fast_period > 0 && fast_period < slow_period);
        Self {
            fast_period,
            slow_period,
            quantity,
            closes: Vec::new(),
            previous_delta: None,
            in_position: false,
        }
    }

    fn average(&self, period: usize) -> Decimal {
        let window = &self.closes[self.closes.len() - period..];
        window.iter().copied().sum::<Decimal>() / Decimal::from(period as u64)
    }
}

impl Strategy for SmaCrossStrategy {
    fn name(&self) -> &str {
        "sma_cross"
    }

    fn parameters(&self) -> HashMap<String, String> {
        HashMap::from([
            ("fast_period".to_string(), self.fast_period.to_string()),
            ("slow_period".to_string(), self.slow_period.to_string()),
            ("quantity".to_string(), self.quantity.to_string()),
        ])
    }

    fn on_candle(&mut self, candle: &Candle, _account: &Account) -> Result<Vec<OrderRequest>> {
        self.closes.push(candle.close);
        if self.closes.len() < self.slow_period {
            return Ok(Vec::new());
        }

        let delta = self.average(self.fast_period) - self.average(self.slow_period);
        let previous = self.previous_delta.replace(delta);

        let Some(previous) = previous else {
            return Ok(Vec::new());
        };

        let crossed_up = previous <= Decimal::ZERO && delta > Decimal::ZERO;
        let crossed_down = previous >= Decimal::ZERO && delta < Decimal::ZERO;

        if crossed_up && !self.in_position {
            return Ok(vec![OrderRequest::market(OrderSide::Buy, self.quantity)]);
        }
        if crossed_down && self.in_position {
            return Ok(vec![OrderRequest::market(OrderSide::Sell, self.quantity)]);
        }
        Ok(Vec::new())
    }

    fn on_position_opened(&mut self, _position: &Position, _account: &Account) {
        self.in_position = true;
    }

    fn on_position_closed(&mut self, _position: &Position, _account: &Account) {
        self.in_position = false;
    }
}
