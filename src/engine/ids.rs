use std::collections::HashMap;
use uuid::Uuid;

/// Sequential `prefix_N` identifiers for orders, trades, and positions.
///
/// Sequential ids keep backtest output reproducible run-to-run; only the
/// account id, which never appears in trade or metric fields, is random.
#[derive(Debug, Default)]
pub struct IdGenerator {
    counters: HashMap<&'static str, u64>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self, prefix: &'static str) -> String {
        let counter = self.counters.entry(prefix).or_insert(0);
        *counter += 1;
        format!("{}_{}", prefix, counter)
    }

    pub fn next_order_id(&mut self) -> String {
        self.next("order")
    }

    pub fn next_trade_id(&mut self) -> String {
        self.next("trade")
    }

    pub fn next_position_id(&mut self) -> String {
        self.next("position")
    }

    pub fn new_account_id(&mut self) -> String {
        Uuid::new_v4().to_string()
    }

    pub fn reset(&mut self) {
        self.counters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids_per_prefix() {
        let mut ids = IdGenerator::new();
        assert_eq!(ids.next_order_id(), "order_1");
        assert_eq!(ids.next_order_id(), "order_2");
        assert_eq!(ids.next_trade_id(), "trade_1");
        assert_eq!(ids.next_position_id(), "position_1");

        ids.reset();
        assert_eq!(ids.next_order_id(), "order_1");
    }
}
