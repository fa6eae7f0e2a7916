use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Balance for one asset, split into free and locked portions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// A trading account: balances per asset plus running fee and PnL totals.
/// Positions are owned by the engine's position service, keyed by account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub balances: HashMap<String, Balance>,
    pub total_fees_paid: Decimal,
    pub total_pnl: Decimal,
    pub created_at: i64,
}

impl Account {
    pub fn new(account_id: String, created_at: i64) -> Self {
        Self {
            account_id,
            balances: HashMap::new(),
            total_fees_paid: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            created_at,
        }
    }

    /// Free balance for an asset, zero when the asset is unknown.
    pub fn free_balance(&self, asset: &str) -> Decimal {
        self.balances
            .get(asset)
            .map(|b| b.free)
            .unwrap_or(Decimal::ZERO)
    }

    /// Total (free + locked) balance for an asset.
    pub fn total_balance(&self, asset: &str) -> Decimal {
        self.balances
            .get(asset)
            .map(|b| b.total())
            .unwrap_or(Decimal::ZERO)
    }
}
