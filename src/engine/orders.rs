use rust_decimal::Decimal;

use super::error::EngineError;
use super::ids::IdGenerator;
use crate::types::{Account, Order, OrderKind, OrderSide, OrderStatus};

/// What a strategy asks for: an order without identity. The order service
/// validates the request and mints the queued [`Order`].
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub side: OrderSide,
    pub quantity: Decimal,
    pub kind: OrderKind,
}

impl OrderRequest {
    pub fn market(side: OrderSide, quantity: Decimal) -> Self {
        Self {
            side,
            quantity,
            kind: OrderKind::Market,
        }
    }

    pub fn limit(side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        Self {
            side,
            quantity,
            kind: OrderKind::Limit { price },
        }
    }

    pub fn stop_market(side: OrderSide, quantity: Decimal, stop_price: Decimal) -> Self {
        Self {
            side,
            quantity,
            kind: OrderKind::StopMarket { stop_price },
        }
    }

    pub fn stop_limit(
        side: OrderSide,
        quantity: Decimal,
        stop_price: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self {
            side,
            quantity,
            kind: OrderKind::StopLimit {
                stop_price,
                limit_price,
            },
        }
    }

    pub fn take_profit(side: OrderSide, quantity: Decimal, target_price: Decimal) -> Self {
        Self {
            side,
            quantity,
            kind: OrderKind::TakeProfit { target_price },
        }
    }
}

/// Pending-order queue: validates, queues, cancels, and matches orders
/// against the current price in arrival order.
#[derive(Debug)]
pub struct OrderService {
    quote_currency: String,
    pending: Vec<Order>,
    ids: IdGenerator,
}

impl OrderService {
    pub fn new(quote_currency: &str) -> Self {
        Self {
            quote_currency: quote_currency.to_string(),
            pending: Vec::new(),
            ids: IdGenerator::new(),
        }
    }

    /// Validate and queue an order. A rejected request never enters the
    /// queue; the typed reason goes back to the caller.
    pub fn place_order(
        &mut self,
        symbol: &str,
        request: OrderRequest,
        account: &Account,
        current_price: Option<Decimal>,
        created_at: i64,
    ) -> Result<String, EngineError> {
        self.validate(&request, account, current_price)?;

        let order = Order::new(
            self.ids.next_order_id(),
            symbol.to_string(),
            request.side,
            request.quantity,
            request.kind,
            created_at,
        );
        let order_id = order.order_id.clone();
        self.pending.push(order);
        Ok(order_id)
    }

    fn validate(
        &self,
        request: &OrderRequest,
        account: &Account,
        current_price: Option<Decimal>,
    ) -> Result<(), EngineError> {
        if request.quantity <= Decimal::ZERO {
            return Err(EngineError::OrderRejected(
                "order quantity must be positive".to_string(),
            ));
        }

        match request.kind {
            OrderKind::Market => {}
            OrderKind::Limit { price } => {
                if price <= Decimal::ZERO {
                    return Err(EngineError::OrderRejected(
                        "limit order price must be positive".to_string(),
                    ));
                }
            }
            OrderKind::StopMarket { stop_price } => {
                if stop_price <= Decimal::ZERO {
                    return Err(EngineError::OrderRejected(
                        "stop price must be positive".to_string(),
                    ));
                }
            }
            OrderKind::StopLimit {
                stop_price,
                limit_price,
            } => {
                if stop_price <= Decimal::ZERO {
                    return Err(EngineError::OrderRejected(
                        "stop price must be positive".to_string(),
                    ));
                }
                if limit_price <= Decimal::ZERO {
                    return Err(EngineError::OrderRejected(
                        "limit price must be positive".to_string(),
                    ));
                }
            }
            OrderKind::TakeProfit { target_price } => {
                if target_price <= Decimal::ZERO {
                    return Err(EngineError::OrderRejected(
                        "target price must be positive".to_string(),
                    ));
                }
            }
        }

        // Buys reserve quote currency against a reference price: the limit
        // price when there is one, otherwise the current price supplied by
        // the event loop. Bare quantity is the price-less fallback.
        if request.side == OrderSide::Buy {
            let required = match request.kind {
                OrderKind::Limit { price } => request.quantity * price,
                _ => match current_price {
                    Some(price) => request.quantity * price,
                    None => request.quantity,
                },
            };
            if account.free_balance(&self.quote_currency) < required {
                return Err(EngineError::OrderRejected(
                    "insufficient balance".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Cancel a pending order. Only NEW orders can be canceled; the order
    /// leaves the queue with status CANCELED.
    pub fn cancel_order(&mut self, order_id: &str) -> bool {
        if let Some(index) = self
            .pending
            .iter()
            .position(|o| o.order_id == order_id && o.status == OrderStatus::New)
        {
            let mut order = self.pending.remove(index);
            order.status = OrderStatus::Canceled;
            true
        } else {
            false
        }
    }

    pub fn pending_orders(&self) -> &[Order] {
        &self.pending
    }

    /// Fire every pending order whose predicate holds at `current_price`,
    /// in arrival order. Fired orders leave the queue as FILLED with
    /// `filled_at` set.
    pub fn match_orders(&mut self, current_price: Decimal, filled_at: i64) -> Vec<Order> {
        let mut filled = Vec::new();
        let mut remaining = Vec::with_capacity(self.pending.len());

        for mut order in self.pending.drain(..) {
            if order.can_fire(current_price) {
                order.status = OrderStatus::Filled;
                order.filled_at = Some(filled_at);
                filled.push(order);
            } else {
                remaining.push(order);
            }
        }

        self.pending = remaining;
        filled
    }
}
