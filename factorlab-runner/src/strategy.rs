//! Strategy registry and the built-in strategies.
//!
//! A strategy class declares its data needs (`DataGroupConfig`s) statically,
//! so the orchestrator can read them without instantiating anything, and
//! builds a fresh `Strategy` per run.

use std::collections::BTreeMap;

use factorlab_core::domain::{DataKind, SignalAction, SignalDraft};
use factorlab_core::engine::{EngineFeed, StepContext, Strategy, StrategyError};
use factorlab_core::factors::{ParamValue, Params};
use factorlab_core::group::{DataGroupConfig, FactorConfig};
use serde::Serialize;
use tracing::warn;

/// A strategy type that can be registered by name.
pub trait StrategyClass: Strategy + Sized + 'static {
    const CLASS_NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn data_groups() -> Vec<DataGroupConfig>;

    fn build() -> Self;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyDefinition {
    pub class_name: String,
    pub description: String,
    pub data_groups: Vec<DataGroupConfig>,
}

struct Entry {
    definition: StrategyDefinition,
    ctor: fn() -> Box<dyn Strategy>,
}

fn construct<T: StrategyClass>() -> Box<dyn Strategy> {
    Box::new(T::build())
}

/// Explicit class-name → strategy table.
#[derive(Default)]
pub struct StrategyRegistry {
    entries: BTreeMap<String, Entry>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register::<DualMovingAverageStrategy>();
        registry
    }

    pub fn register<T: StrategyClass>(&mut self) -> &mut Self {
        let definition = StrategyDefinition {
            class_name: T::CLASS_NAME.to_string(),
            description: T::DESCRIPTION.to_string(),
            data_groups: T::data_groups(),
        };
        self.entries.insert(
            T::CLASS_NAME.to_string(),
            Entry {
                definition,
                ctor: construct::<T>,
            },
        );
        self
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.entries.contains_key(class_name)
    }

    pub fn definition(&self, class_name: &str) -> Option<&StrategyDefinition> {
        self.entries.get(class_name).map(|e| &e.definition)
    }

    pub fn definitions(&self) -> Vec<&StrategyDefinition> {
        self.entries.values().map(|e| &e.definition).collect()
    }

    /// A fresh strategy instance for one run.
    pub fn create(&self, class_name: &str) -> Option<Box<dyn Strategy>> {
        self.entries.get(class_name).map(|e| (e.ctor)())
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("classes", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ─── Dual moving average ─────────────────────────────────────────────

pub const DUAL_MA_GROUP: &str = "daily_ma5_ma20";

fn sma(name: &str, period: i64) -> FactorConfig {
    let mut params = Params::new();
    params.insert("period".into(), ParamValue::Int(period));
    params.insert("ma_type".into(), ParamValue::Text("SMA".into()));
    FactorConfig::new(name, "MovingAverageFactor", params)
}

/// Long-only 5/20 SMA crossover.
///
/// Emits one signal per crossover: `buy` when the fast average crosses above
/// the slow one, `sell` when it crosses below. Strength is the gap between the
/// averages relative to the slow one. A buy goes all-in when flat; a sell
/// closes the open position.
#[derive(Debug, Default)]
pub struct DualMovingAverageStrategy {
    feed: usize,
    fast: Option<usize>,
    slow: Option<usize>,
    prev_above: Option<bool>,
}

impl StrategyClass for DualMovingAverageStrategy {
    const CLASS_NAME: &'static str = "DualMovingAverageStrategy";
    const DESCRIPTION: &'static str = "5/20-day simple moving average crossover, long only";

    fn data_groups() -> Vec<DataGroupConfig> {
        vec![DataGroupConfig {
            name: DUAL_MA_GROUP.to_string(),
            data_kind: DataKind::Daily,
            weight: 1.0,
            factors: vec![sma("ma_5", 5), sma("ma_20", 20)],
        }]
    }

    fn build() -> Self {
        Self::default()
    }
}

impl Strategy for DualMovingAverageStrategy {
    fn on_start(&mut self, feeds: &[EngineFeed]) -> Result<(), StrategyError> {
        self.feed = feeds.iter().position(|f| f.name() == DUAL_MA_GROUP).unwrap_or(0);
        let feed = feeds
            .get(self.feed)
            .ok_or_else(|| StrategyError::from("no feed to trade"))?;
        self.fast = feed.slot_of("ma_5");
        self.slow = feed.slot_of("ma_20");
        if self.fast.is_none() || self.slow.is_none() {
            warn!(feed = feed.name(), "moving average fields missing, strategy will stay flat");
        }
        Ok(())
    }

    fn next(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        let (Some(fast), Some(slow)) = (self.fast, self.slow) else {
            return Ok(());
        };
        if !ctx.is_fresh(self.feed) {
            return Ok(());
        }
        let (Some(ma5), Some(ma20)) = (ctx.slot_value(self.feed, fast), ctx.slot_value(self.feed, slow)) else {
            return Ok(());
        };
        if !(ma5.is_finite() && ma20.is_finite()) {
            return Ok(());
        }

        // equal averages keep the previous side
        let above = match ma5.partial_cmp(&ma20) {
            Some(std::cmp::Ordering::Greater) => true,
            Some(std::cmp::Ordering::Less) => false,
            _ => return Ok(()),
        };
        let crossed = self.prev_above.is_some_and(|prev| prev != above);
        self.prev_above = Some(above);
        if !crossed {
            return Ok(());
        }

        let price = ctx.close(self.feed).unwrap_or(f64::NAN);
        let symbol = ctx.symbol(self.feed).unwrap_or_default().to_string();
        let (action, message, gap) = if above {
            (SignalAction::Buy, "ma_5 crossed above ma_20", ma5 - ma20)
        } else {
            (SignalAction::Sell, "ma_5 crossed below ma_20", ma20 - ma5)
        };
        ctx.emit(SignalDraft {
            symbol,
            action,
            price,
            strength: if ma20 != 0.0 { gap / ma20 } else { 0.0 },
            message: message.to_string(),
            time: ctx.time(),
        });

        match action {
            SignalAction::Buy if ctx.position(self.feed) == 0.0 => {
                ctx.buy(self.feed, None);
            }
            SignalAction::Sell if ctx.position(self.feed) > 0.0 => {
                ctx.close_position(self.feed);
            }
            _ => {}
        }
        Ok(())
    }
}
