//! Simulation engine contract and the reference replay engine.
//!
//! The engine is a synchronous, step-driven loop:
//!
//! 1. Align every feed on the union of its timestamps (strictly increasing)
//! 2. Call `Strategy::next` once per timestamp through a `StepContext`
//! 3. Fill market orders placed in the step at that bar's close
//! 4. Mark the account to market and record equity
//!
//! After the loop it reports raw analyzers (`RawEngineOutput`) shaped the way a
//! third-party engine would, for the normalizer to reduce.
//!
//! Nothing in here is async. The orchestrator runs an engine on a blocking
//! worker; every callback completes its own side effects before returning.

pub mod analyzers;
pub mod broker;
pub mod context;
pub mod feed;
pub mod raw;
pub mod replay;

pub use broker::{ClosedTrade, Fill, OrderSide};
pub use context::StepContext;
pub use feed::{EngineFeed, FeedError, FeedRow};
pub use raw::{RawEngineOutput, RawKey, RawValue};
pub use replay::ReplayEngine;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Errors ──────────────────────────────────────────────────────────

/// Error raised by strategy logic inside a callback.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct StrategyError(pub String);

impl From<String> for StrategyError {
    fn from(s: String) -> Self {
        StrategyError(s)
    }
}

impl From<&str> for StrategyError {
    fn from(s: &str) -> Self {
        StrategyError(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("no data: every feed is empty")]
    NoData,

    #[error("feed '{feed}' is not in strictly increasing time order at row {row}")]
    Unordered { feed: String, row: usize },

    #[error("invalid broker configuration: {0}")]
    InvalidBroker(String),

    #[error("strategy failed at step {step}: {reason}")]
    Strategy { step: usize, reason: String },

    #[error("engine panicked: {0}")]
    Panicked(String),
}

// ─── Broker configuration ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionType {
    /// `commission` is a fraction of traded notional.
    #[default]
    Percent,
    /// `commission` is a flat amount per unit traded.
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub initial_capital: f64,
    pub commission: f64,
    pub commission_type: CommissionType,
    /// Floor applied to every fill's commission.
    pub commission_min: f64,
    pub leverage: f64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            initial_capital: 1_000_000.0,
            commission: 0.0003,
            commission_type: CommissionType::Percent,
            commission_min: 5.0,
            leverage: 1.0,
        }
    }
}

impl BrokerConfig {
    pub fn frictionless(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            commission: 0.0,
            commission_min: 0.0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            return Err(EngineError::InvalidBroker(format!(
                "initial_capital must be positive, got {}",
                self.initial_capital
            )));
        }
        if !(self.commission >= 0.0 && self.commission_min >= 0.0) {
            return Err(EngineError::InvalidBroker("commission must be non-negative".into()));
        }
        if !(self.leverage.is_finite() && self.leverage >= 1.0) {
            return Err(EngineError::InvalidBroker(format!(
                "leverage must be >= 1, got {}",
                self.leverage
            )));
        }
        Ok(())
    }
}

// ─── Traits ──────────────────────────────────────────────────────────

/// Strategy logic driven by an engine, one callback per aligned timestamp.
pub trait Strategy: Send {
    /// Called once before the first step with every feed the run will see.
    fn on_start(&mut self, _feeds: &[EngineFeed]) -> Result<(), StrategyError> {
        Ok(())
    }

    fn next(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError>;

    fn on_stop(&mut self) -> Result<(), StrategyError> {
        Ok(())
    }
}

impl<S: Strategy + ?Sized> Strategy for Box<S> {
    fn on_start(&mut self, feeds: &[EngineFeed]) -> Result<(), StrategyError> {
        (**self).on_start(feeds)
    }

    fn next(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        (**self).next(ctx)
    }

    fn on_stop(&mut self) -> Result<(), StrategyError> {
        (**self).on_stop()
    }
}

/// A synchronous simulation engine.
pub trait SimulationEngine: Send + Sync {
    fn name(&self) -> &str;

    fn run(
        &self,
        feeds: Vec<EngineFeed>,
        strategy: &mut dyn Strategy,
        broker: &BrokerConfig,
    ) -> Result<RawEngineOutput, EngineError>;
}
