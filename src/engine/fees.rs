use rust_decimal::Decimal;

use crate::types::{Fee, FeeConfig, FeeType, OrderType};

/// Computes fees at fill time: taker rate for market orders, maker rate
/// for everything that rested on the queue. Funding and commission are
/// policy hooks the event loop does not currently apply.
#[derive(Debug, Clone)]
pub struct FeeCalculator {
    config: FeeConfig,
}

impl FeeCalculator {
    pub fn new(config: FeeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    pub fn calculate_order_fee(
        &self,
        order_type: OrderType,
        quantity: Decimal,
        fill_price: Decimal,
        currency: &str,
        timestamp: i64,
        order_id: String,
    ) -> Fee {
        let (fee_type, rate) = match order_type {
            OrderType::Market => (FeeType::Taker, self.config.taker_fee_rate),
            _ => (FeeType::Maker, self.config.maker_fee_rate),
        };

        Fee {
            fee_type,
            amount: quantity * fill_price * rate,
            currency: currency.to_string(),
            timestamp,
            order_id,
        }
    }

    pub fn calculate_funding_fee(
        &self,
        position_value: Decimal,
        currency: &str,
        timestamp: i64,
    ) -> Fee {
        Fee {
            fee_type: FeeType::Funding,
            amount: position_value * self.config.funding_fee_rate,
            currency: currency.to_string(),
            timestamp,
            order_id: String::new(),
        }
    }

    pub fn calculate_commission_fee(&self, amount: Decimal, currency: &str, timestamp: i64) -> Fee {
        Fee {
            fee_type: FeeType::Commission,
            amount: amount * self.config.commission_rate,
            currency: currency.to_string(),
            timestamp,
            order_id: String::new(),
        }
    }
}
