use rust_decimal::Decimal;

use super::error::EngineError;
use crate::types::{Account, Balance, Position};

/// Balance and equity operations on an [`Account`].
///
/// Accounting is futures-style: opening a position does not move the quote
/// balance; fees are debited at fill time and gross realized PnL credited
/// at close, so the balance total tracks trading results.
#[derive(Debug, Default)]
pub struct AccountService;

impl AccountService {
    pub fn new() -> Self {
        Self
    }

    pub fn create_account(
        &self,
        account_id: String,
        initial_balance: Decimal,
        currency: &str,
        created_at: i64,
    ) -> Account {
        let mut account = Account::new(account_id, created_at);
        self.deposit(&mut account, currency, initial_balance);
        account
    }

    pub fn deposit(&self, account: &mut Account, asset: &str, amount: Decimal) {
        account
            .balances
            .entry(asset.to_string())
            .and_modify(|b| b.free += amount)
            .or_insert_with(|| Balance {
                asset: asset.to_string(),
                free: amount,
                locked: Decimal::ZERO,
            });
    }

    pub fn has_sufficient_balance(&self, account: &Account, asset: &str, amount: Decimal) -> bool {
        account.free_balance(asset) >= amount
    }

    pub fn lock_balance(
        &self,
        account: &mut Account,
        asset: &str,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        let balance = account.balances.get_mut(asset).ok_or_else(|| {
            EngineError::OrderRejected(format!("no balance for asset {}", asset))
        })?;
        if balance.free < amount {
            return Err(EngineError::OrderRejected(
                "insufficient free balance to lock".to_string(),
            ));
        }
        balance.free -= amount;
        balance.locked += amount;
        Ok(())
    }

    pub fn unlock_balance(
        &self,
        account: &mut Account,
        asset: &str,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        let balance = account.balances.get_mut(asset).ok_or_else(|| {
            EngineError::OrderRejected(format!("no balance for asset {}", asset))
        })?;
        if balance.locked < amount {
            return Err(EngineError::OrderRejected(
                "insufficient locked balance to unlock".to_string(),
            ));
        }
        balance.locked -= amount;
        balance.free += amount;
        Ok(())
    }

    /// Debit a fee from the free balance (which may go negative under
    /// margin accounting) and track it on the account.
    pub fn charge_fee(&self, account: &mut Account, asset: &str, amount: Decimal) {
        self.deposit(account, asset, -amount);
        account.total_fees_paid += amount;
    }

    /// Credit gross realized PnL into the quote balance.
    pub fn settle_realized_pnl(&self, account: &mut Account, asset: &str, amount: Decimal) {
        self.deposit(account, asset, amount);
        account.total_pnl += amount;
    }

    /// Total equity: balance total plus unrealized PnL of open positions.
    pub fn total_equity(
        &self,
        account: &Account,
        currency: &str,
        positions: &[Position],
    ) -> Decimal {
        let unrealized: Decimal = positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.unrealized_pnl)
            .sum();
        account.total_balance(currency) + unrealized
    }
}
