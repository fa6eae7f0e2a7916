use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{OrderSide, OrderType, PositionSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    Closed,
    Cancelled,
}

/// The completed life of one position, as a report record.
///
/// Running extremes (`max_price`, `min_price`, `max_unrealized_pnl`,
/// `min_unrealized_pnl`) are updated on every mark-to-market while the
/// position is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub symbol: String,

    pub entry_order_type: OrderType,
    pub entry_side: OrderSide,
    pub entry_quantity: Decimal,
    pub entry_price: Decimal,
    pub entry_time: i64,
    pub entry_order_id: String,

    pub position_side: PositionSide,
    pub leverage: u32,
    pub position_id: String,

    pub exit_order_type: Option<OrderType>,
    pub exit_price: Option<Decimal>,
    pub exit_time: Option<i64>,
    pub exit_order_id: Option<String>,

    pub status: TradeStatus,
    pub realized_pnl: Decimal,
    pub total_fees: Decimal,

    pub max_price: Decimal,
    pub min_price: Decimal,
    pub max_unrealized_pnl: Decimal,
    pub min_unrealized_pnl: Decimal,
}

impl Trade {
    pub fn is_closed(&self) -> bool {
        self.status == TradeStatus::Closed
    }

    pub fn is_winning(&self) -> bool {
        self.realized_pnl > Decimal::ZERO
    }

    /// Minutes between entry and exit, None while the trade is open.
    pub fn duration_minutes(&self) -> Option<f64> {
        let exit = self.exit_time?;
        Some((exit - self.entry_time) as f64 / 60_000.0)
    }

    /// Realized PnL as a percentage of the entry notional.
    pub fn pnl_percentage(&self) -> Decimal {
        let entry_value = self.entry_price * self.entry_quantity;
        if entry_value.is_zero() {
            return Decimal::ZERO;
        }
        self.realized_pnl / entry_value * Decimal::from(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade() -> Trade {
        Trade {
            trade_id: "trade_1".to_string(),
            symbol: "BTCUSDT".to_string(),
            entry_order_type: OrderType::Market,
            entry_side: OrderSide::Buy,
            entry_quantity: dec!(2),
            entry_price: dec!(100),
            entry_time: 0,
            entry_order_id: "order_1".to_string(),
            position_side: PositionSide::Long,
            leverage: 1,
            position_id: "position_1".to_string(),
            exit_order_type: None,
            exit_price: None,
            exit_time: None,
            exit_order_id: None,
            status: TradeStatus::Open,
            realized_pnl: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            max_price: dec!(100),
            min_price: dec!(100),
            max_unrealized_pnl: Decimal::ZERO,
            min_unrealized_pnl: Decimal::ZERO,
        }
    }

    #[test]
    fn test_duration_requires_exit() {
        let mut t = trade();
        assert_eq!(t.duration_minutes(), None);
        t.exit_time = Some(180_000);
        assert_eq!(t.duration_minutes(), Some(3.0));
    }

    #[test]
    fn test_pnl_percentage() {
        let mut t = trade();
        t.realized_pnl = dec!(20);
        // 20 on a 200 notional entry
        assert_eq!(t.pnl_percentage(), dec!(10));
    }
}
