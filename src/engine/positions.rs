use rust_decimal::Decimal;

use super::error::EngineError;
use crate::types::{Position, PositionSide, PositionStatus};

/// Position lifecycle and PnL arithmetic.
///
/// PnL per unit: LONG earns `(price − entry) · |size|`, SHORT earns
/// `(entry − price) · |size|`. Margin used is `|size| · price / leverage`.
#[derive(Debug, Default)]
pub struct PositionService;

impl PositionService {
    pub fn new() -> Self {
        Self
    }

    pub fn create_position(
        &self,
        position_id: String,
        symbol: String,
        side: PositionSide,
        size: Decimal,
        entry_price: Decimal,
        leverage: u32,
        entry_time: i64,
    ) -> Position {
        let mut position = Position {
            position_id,
            symbol,
            side,
            size,
            entry_price,
            current_price: entry_price,
            leverage,
            entry_time,
            status: PositionStatus::Open,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        };
        position.unrealized_pnl = self.unrealized_pnl(&position, entry_price);
        position
    }

    pub fn unrealized_pnl(&self, position: &Position, current_price: Decimal) -> Decimal {
        match position.side {
            PositionSide::Long => (current_price - position.entry_price) * position.size,
            PositionSide::Short => (position.entry_price - current_price) * position.size.abs(),
        }
    }

    fn realized_pnl(&self, position: &Position, close_price: Decimal, quantity: Decimal) -> Decimal {
        match position.side {
            PositionSide::Long => (close_price - position.entry_price) * quantity.abs(),
            PositionSide::Short => (position.entry_price - close_price) * quantity.abs(),
        }
    }

    pub fn margin_used(&self, position: &Position) -> Decimal {
        position.size.abs() * position.current_price / Decimal::from(position.leverage)
    }

    pub fn update_price(&self, position: &mut Position, current_price: Decimal) {
        position.current_price = current_price;
        position.unrealized_pnl = self.unrealized_pnl(position, current_price);
    }

    /// Extend an open position. `additional_size` is signed and must agree
    /// with the position's direction; the entry price becomes the weighted
    /// average of old and new.
    pub fn add_to_position(
        &self,
        position: &mut Position,
        additional_size: Decimal,
        additional_price: Decimal,
    ) -> Result<(), EngineError> {
        if !position.is_open() {
            return Err(EngineError::PositionInvariant(
                "cannot add to closed position".to_string(),
            ));
        }
        match position.side {
            PositionSide::Long if additional_size < Decimal::ZERO => {
                return Err(EngineError::PositionInvariant(
                    "cannot add negative size to long position".to_string(),
                ));
            }
            PositionSide::Short if additional_size > Decimal::ZERO => {
                return Err(EngineError::PositionInvariant(
                    "cannot add positive size to short position".to_string(),
                ));
            }
            _ => {}
        }

        let total_value =
            position.entry_price * position.size + additional_price * additional_size.abs();
        position.size += additional_size;
        position.entry_price = total_value / position.size;
        position.unrealized_pnl = self.unrealized_pnl(position, position.current_price);
        Ok(())
    }

    /// Close part of an open position. `close_size` is signed with the
    /// position's direction and bounded by the current size. Returns the
    /// gross realized PnL of the closed portion.
    pub fn close_partial(
        &self,
        position: &mut Position,
        close_size: Decimal,
        close_price: Decimal,
    ) -> Result<Decimal, EngineError> {
        if !position.is_open() {
            return Err(EngineError::PositionInvariant(
                "cannot close closed position".to_string(),
            ));
        }
        if close_size.abs() > position.size.abs() {
            return Err(EngineError::PositionInvariant(
                "cannot close more than current position size".to_string(),
            ));
        }

        let realized = self.realized_pnl(position, close_price, close_size);
        position.size -= close_size;
        position.realized_pnl += realized;

        if position.size.is_zero() {
            position.status = PositionStatus::Closed;
        }
        position.unrealized_pnl = self.unrealized_pnl(position, position.current_price);
        Ok(realized)
    }

    /// Close the entire position at `close_price`, returning gross realized
    /// PnL for the remaining size.
    pub fn close_full(
        &self,
        position: &mut Position,
        close_price: Decimal,
    ) -> Result<Decimal, EngineError> {
        if !position.is_open() {
            return Err(EngineError::PositionInvariant(
                "cannot close closed position".to_string(),
            ));
        }

        let realized = self.realized_pnl(position, close_price, position.size);
        position.realized_pnl = realized;
        position.size = Decimal::ZERO;
        position.status = PositionStatus::Closed;
        position.unrealized_pnl = Decimal::ZERO;
        Ok(realized)
    }
}
