//! ReplayEngine — reference `SimulationEngine` that replays prepared feeds.
//!
//! Not an order-matching engine: market orders fill at the step's close,
//! there is no intrabar path, no slippage model and no shorting. It exists so
//! the bridge, the signal capture and the normalizer can be exercised end to
//! end against something with the same step/analyzer contract.

use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use tracing::{debug, info};

use super::analyzers;
use super::broker::Broker;
use super::context::StepContext;
use super::feed::EngineFeed;
use super::{BrokerConfig, EngineError, RawEngineOutput, SimulationEngine, Strategy};

#[derive(Debug, Clone, Default)]
pub struct ReplayEngine;

impl ReplayEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Union of every feed's timestamps, strictly increasing.
fn timeline(feeds: &[EngineFeed]) -> Result<Vec<NaiveDateTime>, EngineError> {
    let mut all = BTreeSet::new();
    for feed in feeds {
        let mut prev: Option<NaiveDateTime> = None;
        for (row, r) in feed.rows().iter().enumerate() {
            if prev.is_some_and(|p| r.bar.time <= p) {
                return Err(EngineError::Unordered {
                    feed: feed.name().to_string(),
                    row,
                });
            }
            prev = Some(r.bar.time);
            all.insert(r.bar.time);
        }
    }
    Ok(all.into_iter().collect())
}

impl SimulationEngine for ReplayEngine {
    fn name(&self) -> &str {
        "replay"
    }

    fn run(
        &self,
        feeds: Vec<EngineFeed>,
        strategy: &mut dyn Strategy,
        broker: &BrokerConfig,
    ) -> Result<RawEngineOutput, EngineError> {
        broker.validate()?;
        if feeds.iter().all(|f| f.is_empty()) {
            return Err(EngineError::NoData);
        }
        let times = timeline(&feeds)?;
        let initial = broker.initial_capital;
        let mut account = Broker::new(broker.clone(), feeds.len());

        strategy.on_start(&feeds).map_err(|e| EngineError::Strategy {
            step: 0,
            reason: e.to_string(),
        })?;

        let mut next_row = vec![0usize; feeds.len()];
        let mut cursors: Vec<Option<usize>> = vec![None; feeds.len()];
        let mut equity = Vec::with_capacity(times.len());

        for (step, &time) in times.iter().enumerate() {
            for (i, feed) in feeds.iter().enumerate() {
                if feed.time(next_row[i]) == Some(time) {
                    cursors[i] = Some(next_row[i]);
                    next_row[i] += 1;
                }
            }

            let mut ctx = StepContext::new(time, step, &feeds, &cursors, &mut account);
            strategy.next(&mut ctx).map_err(|e| EngineError::Strategy {
                step,
                reason: e.to_string(),
            })?;
            let undrained = ctx.pending_signals();
            if undrained > 0 {
                debug!(step, undrained, "signals emitted but not collected");
            }

            let closes: Vec<Option<f64>> = feeds
                .iter()
                .zip(&cursors)
                .map(|(f, c)| c.and_then(|row| f.bar(row)).map(|b| b.close))
                .collect();
            equity.push(account.value(&closes));
        }

        strategy.on_stop().map_err(|e| EngineError::Strategy {
            step: times.len(),
            reason: e.to_string(),
        })?;

        let final_value = equity.last().copied().unwrap_or(initial);
        info!(
            steps = times.len(),
            fills = account.fills().len(),
            trades = account.trades().len(),
            final_value,
            "replay finished"
        );

        Ok(RawEngineOutput {
            analyzers: analyzers::build_all(
                initial,
                &times,
                &equity,
                account.trades(),
                account.open_trade_count(),
            ),
            initial_value: initial,
            final_value,
        })
    }
}
