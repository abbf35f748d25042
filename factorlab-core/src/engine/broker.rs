//! Cash/position account used by the replay engine.
//!
//! Long-only, one position per feed. Market orders fill immediately at the
//! price the engine passes in (the step's close). Realized PnL and commission
//! are tracked per round trip so trade analyzers can be built afterwards.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{BrokerConfig, CommissionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub feed: usize,
    pub side: OrderSide,
    pub size: f64,
    pub price: f64,
    pub commission: f64,
    pub time: NaiveDateTime,
}

/// A completed round trip (flat → long → flat).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub feed: usize,
    pub opened: NaiveDateTime,
    pub closed: NaiveDateTime,
    pub bars_held: usize,
    pub pnl: f64,
    pub pnl_net: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Position {
    size: f64,
    avg_price: f64,
}

#[derive(Debug, Clone)]
struct OpenTrade {
    opened: NaiveDateTime,
    opened_step: usize,
    pnl: f64,
    commission: f64,
}

#[derive(Debug)]
pub(crate) struct Broker {
    config: BrokerConfig,
    cash: f64,
    positions: Vec<Position>,
    open_trades: Vec<Option<OpenTrade>>,
    fills: Vec<Fill>,
    trades: Vec<ClosedTrade>,
}

impl Broker {
    pub(crate) fn new(config: BrokerConfig, feeds: usize) -> Self {
        Self {
            cash: config.initial_capital,
            config,
            positions: vec![Position::default(); feeds],
            open_trades: vec![None; feeds],
            fills: Vec::new(),
            trades: Vec::new(),
        }
    }

    pub(crate) fn cash(&self) -> f64 {
        self.cash
    }

    pub(crate) fn position(&self, feed: usize) -> f64 {
        self.positions.get(feed).map_or(0.0, |p| p.size)
    }

    /// Cash plus every position marked at `prices` (one per feed; `None` marks at cost).
    pub(crate) fn value(&self, prices: &[Option<f64>]) -> f64 {
        let marked: f64 = self
            .positions
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let px = prices
                    .get(i)
                    .copied()
                    .flatten()
                    .filter(|v| v.is_finite())
                    .unwrap_or(p.avg_price);
                p.size * px
            })
            .sum();
        self.cash + marked
    }

    pub(crate) fn commission(&self, size: f64, price: f64) -> f64 {
        let raw = match self.config.commission_type {
            CommissionType::Percent => size * price * self.config.commission,
            CommissionType::Fixed => size * self.config.commission,
        };
        raw.max(self.config.commission_min)
    }

    /// Whole units affordable with the current buying power.
    fn affordable(&self, price: f64) -> f64 {
        let power = self.cash.max(0.0) * self.config.leverage;
        let per_unit = match self.config.commission_type {
            CommissionType::Percent => price * (1.0 + self.config.commission),
            CommissionType::Fixed => price + self.config.commission,
        };
        let mut size = (power / per_unit).floor();
        if size > 0.0 && size * price + self.commission(size, price) > power {
            size = ((power - self.config.commission_min) / per_unit).floor();
        }
        size.max(0.0)
    }

    /// Market buy. `None` buys as many whole units as buying power allows.
    /// Returns the filled size (0 when nothing could be bought).
    pub(crate) fn buy(
        &mut self,
        feed: usize,
        price: f64,
        size: Option<f64>,
        time: NaiveDateTime,
        step: usize,
    ) -> f64 {
        if feed >= self.positions.len() || !(price.is_finite() && price > 0.0) {
            return 0.0;
        }
        let size = match size {
            Some(s) if s > 0.0 => s,
            Some(_) => return 0.0,
            None => self.affordable(price),
        };
        if size <= 0.0 {
            return 0.0;
        }
        let commission = self.commission(size, price);
        if size * price + commission > self.cash.max(0.0) * self.config.leverage {
            tracing::debug!(feed, size, price, cash = self.cash, "buy rejected: insufficient buying power");
            return 0.0;
        }

        let pos = &mut self.positions[feed];
        let new_size = pos.size + size;
        pos.avg_price = (pos.avg_price * pos.size + price * size) / new_size;
        pos.size = new_size;
        self.cash -= size * price + commission;

        let trade = self.open_trades[feed].get_or_insert(OpenTrade {
            opened: time,
            opened_step: step,
            pnl: 0.0,
            commission: 0.0,
        });
        trade.commission += commission;

        self.fills.push(Fill {
            feed,
            side: OrderSide::Buy,
            size,
            price,
            commission,
            time,
        });
        size
    }

    /// Market sell, capped at the open position. `None` sells everything.
    pub(crate) fn sell(
        &mut self,
        feed: usize,
        price: f64,
        size: Option<f64>,
        time: NaiveDateTime,
        step: usize,
    ) -> f64 {
        if feed >= self.positions.len() || !(price.is_finite() && price > 0.0) {
            return 0.0;
        }
        let held = self.positions[feed].size;
        let size = size.unwrap_or(held).min(held);
        if size <= 0.0 {
            return 0.0;
        }
        let commission = self.commission(size, price);
        let avg = self.positions[feed].avg_price;
        self.cash += size * price - commission;

        let pos = &mut self.positions[feed];
        pos.size -= size;
        let flat = pos.size <= f64::EPSILON;
        if flat {
            *pos = Position::default();
        }

        if let Some(trade) = self.open_trades[feed].as_mut() {
            trade.pnl += (price - avg) * size;
            trade.commission += commission;
        }
        if flat {
            if let Some(trade) = self.open_trades[feed].take() {
                self.trades.push(ClosedTrade {
                    feed,
                    opened: trade.opened,
                    closed: time,
                    bars_held: step.saturating_sub(trade.opened_step),
                    pnl: trade.pnl,
                    pnl_net: trade.pnl - trade.commission,
                });
            }
        }

        self.fills.push(Fill {
            feed,
            side: OrderSide::Sell,
            size,
            price,
            commission,
            time,
        });
        size
    }

    pub(crate) fn open_trade_count(&self) -> usize {
        self.open_trades.iter().filter(|t| t.is_some()).count()
    }

    pub(crate) fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub(crate) fn trades(&self) -> &[ClosedTrade] {
        &self.trades
    }
}
