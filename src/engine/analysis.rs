use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::{Trade, TradeStatus};

/// Profit factor reported when there are gross profits but no losses.
const PROFIT_FACTOR_CAP: Decimal = dec!(999999);

/// Performance metrics for one backtest run. Identification and balances
/// are set by the engine; the analyzer fills in everything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub strategy_name: String,
    pub symbol: String,
    pub start_time: i64,
    pub end_time: i64,
    pub initial_balance: Decimal,
    pub final_balance: Decimal,

    pub total_trades: u64,
    pub closed_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,

    pub total_pnl: Decimal,
    pub total_fees: Decimal,
    pub net_pnl: Decimal,
    pub total_return: Decimal,
    pub win_rate: Decimal,
    pub profit_factor: Decimal,
    pub max_drawdown: Decimal,
    pub average_win: Decimal,
    pub average_loss: Decimal,
    pub average_trade_duration: Option<f64>,
}

impl BacktestMetrics {
    pub fn new(
        strategy_name: String,
        symbol: String,
        start_time: i64,
        end_time: i64,
        initial_balance: Decimal,
        final_balance: Decimal,
    ) -> Self {
        Self {
            strategy_name,
            symbol,
            start_time,
            end_time,
            initial_balance,
            final_balance,
            total_trades: 0,
            closed_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            total_pnl: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            net_pnl: Decimal::ZERO,
            total_return: Decimal::ZERO,
            win_rate: Decimal::ZERO,
            profit_factor: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            average_win: Decimal::ZERO,
            average_loss: Decimal::ZERO,
            average_trade_duration: None,
        }
    }

    pub fn print_summary(&self) {
        let fmt_time = |ms: i64| {
            Utc.timestamp_millis_opt(ms)
                .single()
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| ms.to_string())
        };

        println!("\n{}", "=".repeat(60));
        println!("                  BACKTEST RESULTS");
        println!("{}", "=".repeat(60));
        println!("Strategy:           {}", self.strategy_name);
        println!("Symbol:             {}", self.symbol);
        println!(
            "Period:             {} to {}",
            fmt_time(self.start_time),
            fmt_time(self.end_time)
        );
        println!("Initial Balance:    {:.2}", self.initial_balance);
        println!("Final Balance:      {:.2}", self.final_balance);
        println!("{}", "-".repeat(60));
        println!("Total Return:       {:.2}%", self.total_return);
        println!("Net PnL:            {:.2}", self.net_pnl);
        println!("Total Fees:         {:.2}", self.total_fees);
        println!("{}", "-".repeat(60));
        println!(
            "Trades:             {} total, {} closed",
            self.total_trades, self.closed_trades
        );
        println!(
            "Win Rate:           {:.2}% ({} wins / {} losses)",
            self.win_rate, self.winning_trades, self.losing_trades
        );
        println!("Profit Factor:      {:.2}", self.profit_factor);
        println!("Max Drawdown:       {:.2}%", self.max_drawdown);
        println!("Average Win:        {:.2}", self.average_win);
        println!("Average Loss:       {:.2}", self.average_loss);
        if let Some(duration) = self.average_trade_duration {
            println!("Avg Duration:       {:.1} min", duration);
        }
        println!("{}", "=".repeat(60));
    }
}

/// Backtest output: the filled metrics plus every trade the run produced,
/// in the order their positions closed.
#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub metrics: BacktestMetrics,
    pub trades: Vec<Trade>,
}

/// Fills a [`BacktestMetrics`] from the closed-trade set.
#[derive(Debug, Default)]
pub struct BacktestAnalyzer;

impl BacktestAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, mut metrics: BacktestMetrics, trades: &[Trade]) -> BacktestMetrics {
        let closed: Vec<&Trade> = trades.iter().filter(|t| t.is_closed()).collect();
        let winning: Vec<&&Trade> = closed.iter().filter(|t| t.is_winning()).collect();

        metrics.total_trades = trades.len() as u64;
        metrics.closed_trades = closed.len() as u64;
        metrics.winning_trades = winning.len() as u64;
        metrics.losing_trades = metrics.closed_trades - metrics.winning_trades;

        metrics.total_pnl = closed.iter().map(|t| t.realized_pnl).sum();
        metrics.total_fees = trades.iter().map(|t| t.total_fees).sum();
        metrics.net_pnl = metrics.total_pnl - metrics.total_fees;

        if metrics.initial_balance > Decimal::ZERO {
            metrics.total_return = (metrics.final_balance - metrics.initial_balance)
                / metrics.initial_balance
                * dec!(100);
        }

        metrics.win_rate = self.win_rate(&closed);
        metrics.profit_factor = self.profit_factor(&closed);
        metrics.max_drawdown = self.max_drawdown(&closed, metrics.initial_balance);

        if !winning.is_empty() {
            let gross: Decimal = winning.iter().map(|t| t.realized_pnl).sum();
            metrics.average_win = gross / Decimal::from(winning.len() as u64);
        }
        let losing: Vec<&&Trade> = closed.iter().filter(|t| !t.is_winning()).collect();
        if !losing.is_empty() {
            let gross: Decimal = losing.iter().map(|t| t.realized_pnl).sum();
            metrics.average_loss = gross / Decimal::from(losing.len() as u64);
        }

        let durations: Vec<f64> = closed.iter().filter_map(|t| t.duration_minutes()).collect();
        if !durations.is_empty() {
            metrics.average_trade_duration =
                Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }

        metrics
    }

    fn win_rate(&self, closed: &[&Trade]) -> Decimal {
        if closed.is_empty() {
            return Decimal::ZERO;
        }
        let winning = closed.iter().filter(|t| t.is_winning()).count();
        Decimal::from(winning as u64) / Decimal::from(closed.len() as u64) * dec!(100)
    }

    /// Gross profits over gross losses, capped when there are no losses.
    fn profit_factor(&self, closed: &[&Trade]) -> Decimal {
        let gross_profit: Decimal = closed
            .iter()
            .filter(|t| t.realized_pnl > Decimal::ZERO)
            .map(|t| t.realized_pnl)
            .sum();
        let gross_loss: Decimal = closed
            .iter()
            .filter(|t| t.realized_pnl < Decimal::ZERO)
            .map(|t| t.realized_pnl)
            .sum::<Decimal>()
            .abs();

        if gross_loss.is_zero() {
            if gross_profit > Decimal::ZERO {
                PROFIT_FACTOR_CAP
            } else {
                Decimal::ZERO
            }
        } else {
            gross_profit / gross_loss
        }
    }

    /// Walk closed trades in order, tracking the running balance against its
    /// running maximum; the result is the deepest peak-to-trough decline as
    /// a percentage of the peak.
    fn max_drawdown(&self, closed: &[&Trade], initial_balance: Decimal) -> Decimal {
        if closed.is_empty() {
            return Decimal::ZERO;
        }

        let mut current = initial_balance;
        let mut peak = initial_balance;
        let mut max_dd = Decimal::ZERO;

        for trade in closed {
            current += trade.realized_pnl;
            peak = peak.max(current);
            if peak > Decimal::ZERO {
                let drawdown = (peak - current) / peak * dec!(100);
                max_dd = max_dd.max(drawdown);
            }
        }

        max_dd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderSide, OrderType, PositionSide};
    use rust_decimal_macros::dec;

    fn closed_trade(index: u64, realized_pnl: Decimal) -> Trade {
        Trade {
            trade_id: format!("trade_{}", index),
            symbol: "BTCUSDT".to_string(),
            entry_order_type: OrderType::Market,
            entry_side: OrderSide::Buy,
            entry_quantity: dec!(1),
            entry_price: dec!(100),
            entry_time: index as i64 * 60_000,
            entry_order_id: format!("order_{}", index),
            position_side: PositionSide::Long,
            leverage: 1,
            position_id: format!("position_{}", index),
            exit_order_type: Some(OrderType::Market),
            exit_price: Some(dec!(110)),
            exit_time: Some(index as i64 * 60_000 + 120_000),
            exit_order_id: Some(format!("order_{}x", index)),
            status: TradeStatus::Closed,
            realized_pnl,
            total_fees: dec!(0.1),
            max_price: dec!(110),
            min_price: dec!(100),
            max_unrealized_pnl: realized_pnl.max(Decimal::ZERO),
            min_unrealized_pnl: realized_pnl.min(Decimal::ZERO),
        }
    }

    fn seed_metrics(initial: Decimal, final_balance: Decimal) -> BacktestMetrics {
        BacktestMetrics::new(
            "test".to_string(),
            "BTCUSDT".to_string(),
            0,
            1_000_000,
            initial,
            final_balance,
        )
    }

    #[test]
    fn test_drawdown_walk() {
        let trades = vec![
            closed_trade(1, dec!(100)),
            closed_trade(2, dec!(-60)),
            closed_trade(3, dec!(10)),
            closed_trade(4, dec!(-80)),
        ];
        let metrics = BacktestAnalyzer::new().analyze(seed_metrics(dec!(1000), dec!(970)), &trades);

        // Balances: 1100, 1040, 1050, 970 against a 1100 peak
        let expected = dec!(130) / dec!(1100) * dec!(100);
        assert_eq!(metrics.max_drawdown, expected);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 2);
        assert_eq!(metrics.win_rate, dec!(50));
    }

    #[test]
    fn test_profit_factor_caps_without_losses() {
        let trades = vec![closed_trade(1, dec!(50))];
        let metrics =
            BacktestAnalyzer::new().analyze(seed_metrics(dec!(1000), dec!(1050)), &trades);
        assert_eq!(metrics.profit_factor, dec!(999999));

        let trades = vec![closed_trade(1, Decimal::ZERO)];
        let metrics =
            BacktestAnalyzer::new().analyze(seed_metrics(dec!(1000), dec!(1000)), &trades);
        assert_eq!(metrics.profit_factor, Decimal::ZERO);
        // Zero-PnL trades count as losing, not winning
        assert_eq!(metrics.winning_trades, 0);
        assert_eq!(metrics.losing_trades, 1);
    }

    #[test]
    fn test_empty_trade_set() {
        let metrics = BacktestAnalyzer::new().analyze(seed_metrics(dec!(1000), dec!(1000)), &[]);
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.win_rate, Decimal::ZERO);
        assert_eq!(metrics.max_drawdown, Decimal::ZERO);
        assert_eq!(metrics.average_trade_duration, None);
    }

    #[test]
    fn test_win_rate_bounds_and_averages() {
        let trades = vec![
            closed_trade(1, dec!(30)),
            closed_trade(2, dec!(10)),
            closed_trade(3, dec!(-20)),
        ];
        let metrics =
            BacktestAnalyzer::new().analyze(seed_metrics(dec!(1000), dec!(1020)), &trades);

        assert!(metrics.win_rate >= Decimal::ZERO && metrics.win_rate <= dec!(100));
        assert_eq!(metrics.average_win, dec!(20));
        assert_eq!(metrics.average_loss, dec!(-20));
        assert_eq!(metrics.total_return, dec!(2));
        assert_eq!(metrics.average_trade_duration, Some(2.0));
    }
}
