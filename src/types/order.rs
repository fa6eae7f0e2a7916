use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        }
    }
}

/// Order type tag without payload, used for fee dispatch and trade records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    StopLimit,
    TakeProfit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::StopLimit => "STOP_LIMIT",
            OrderType::TakeProfit => "TAKE_PROFIT",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-kind order payload. The shared header lives on [`Order`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit { price: Decimal },
    StopMarket { stop_price: Decimal },
    StopLimit { stop_price: Decimal, limit_price: Decimal },
    TakeProfit { target_price: Decimal },
}

impl OrderKind {
    pub fn order_type(&self) -> OrderType {
        match self {
            OrderKind::Market => OrderType::Market,
            OrderKind::Limit { .. } => OrderType::Limit,
            OrderKind::StopMarket { .. } => OrderType::StopMarket,
            OrderKind::StopLimit { .. } => OrderType::StopLimit,
            OrderKind::TakeProfit { .. } => OrderType::TakeProfit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub kind: OrderKind,
    pub status: OrderStatus,
    /// Epoch ms, derived from the candle being processed when placed.
    pub created_at: i64,
    pub filled_at: Option<i64>,
}

impl Order {
    pub fn new(
        order_id: String,
        symbol: String,
        side: OrderSide,
        quantity: Decimal,
        kind: OrderKind,
        created_at: i64,
    ) -> Self {
        Self {
            order_id,
            symbol,
            side,
            quantity,
            kind,
            status: OrderStatus::New,
            created_at,
            filled_at: None,
        }
    }

    pub fn order_type(&self) -> OrderType {
        self.kind.order_type()
    }

    /// Triggering predicate against the current price (the candle close).
    ///
    /// Market orders fire unconditionally. Limit orders fire when the price
    /// crosses to the favorable side; stop and take-profit orders when it
    /// crosses their trigger level in the adverse or target direction.
    pub fn can_fire(&self, price: Decimal) -> bool {
        match (&self.kind, self.side) {
            (OrderKind::Market, _) => true,
            (OrderKind::Limit { price: limit }, OrderSide::Buy) => price <= *limit,
            (OrderKind::Limit { price: limit }, OrderSide::Sell) => price >= *limit,
            (OrderKind::StopMarket { stop_price }, OrderSide::Buy)
            | (OrderKind::StopLimit { stop_price, .. }, OrderSide::Buy) => price >= *stop_price,
            (OrderKind::StopMarket { stop_price }, OrderSide::Sell)
            | (OrderKind::StopLimit { stop_price, .. }, OrderSide::Sell) => price <= *stop_price,
            (OrderKind::TakeProfit { target_price }, OrderSide::Buy) => price >= *target_price,
            (OrderKind::TakeProfit { target_price }, OrderSide::Sell) => price <= *target_price,
        }
    }
}
