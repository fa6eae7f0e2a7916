use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeType {
    Maker,
    Taker,
    Funding,
    Commission,
}

impl FeeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeType::Maker => "MAKER",
            FeeType::Taker => "TAKER",
            FeeType::Funding => "FUNDING",
            FeeType::Commission => "COMMISSION",
        }
    }
}

/// One computed fee, tied back to the order that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    pub fee_type: FeeType,
    pub amount: Decimal,
    pub currency: String,
    pub timestamp: i64,
    pub order_id: String,
}

/// Fee rates applied at fill time. Maker applies to resting order types,
/// taker to market orders; funding and commission are policy hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeConfig {
    pub maker_fee_rate: Decimal,
    pub taker_fee_rate: Decimal,
    pub funding_fee_rate: Decimal,
    pub commission_rate: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            maker_fee_rate: dec!(0.0002),
            taker_fee_rate: dec!(0.0004),
            funding_fee_rate: dec!(0.0001),
            commission_rate: dec!(0.001),
        }
    }
}
