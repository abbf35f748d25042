//! BacktestOrchestrator — owns a run's lifecycle from request to report.
//!
//! Phases:
//! 1. Resolve the strategy and bind its declared DataGroups (no row yet)
//! 2. Write the `running` row
//! 3. Prepare every DataGroup concurrently (async I/O, CPU-bound factors)
//! 4. Persist the first group's price series, build engine feeds
//! 5. Run the engine on a blocking worker; signals are stored inside each step
//! 6. Normalize the raw output and close the run as `completed` or `failed`
//!
//! Unknown strategies and malformed group declarations are rejected before a
//! row exists. Once the row exists, every failure ends in `failed`.

use std::sync::Arc;

use chrono::NaiveDate;
use factorlab_core::data::DataCache;
use factorlab_core::domain::FrameError;
use factorlab_core::engine::{BrokerConfig, EngineError, ReplayEngine, SimulationEngine, Strategy};
use factorlab_core::factors::FactorRegistry;
use factorlab_core::group::{DataGroup, GroupError, PreparedGroup};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::bridge::{EngineBridge, SignalRecorder};
use crate::config::AppConfig;
use crate::normalizer::{MetricsNormalizer, PerformanceReport};
use crate::store::{BacktestRun, NewRun, PricePoint, RunStore, StoreError};
use crate::strategy::StrategyRegistry;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A caller-side contract violation; raised after the run was marked failed
    /// when it surfaced during preparation.
    #[error("contract violation: {source}")]
    Contract {
        run_id: Option<String>,
        #[source]
        source: GroupError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a run that already has a row ended as `failed`.
#[derive(Debug, Error)]
enum RunFailure {
    #[error("no data for any data group")]
    NoData,

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error("price series: {0}")]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRequest {
    pub strategy: String,
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Overrides the configured starting capital.
    pub initial_capital: Option<f64>,
    pub use_cache: bool,
}

impl BacktestRequest {
    pub fn new(strategy: &str, symbol: &str, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            strategy: strategy.to_string(),
            symbol: symbol.to_string(),
            start,
            end,
            initial_capital: None,
            use_cache: true,
        }
    }
}

/// A factor a group dropped during preparation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupOmission {
    pub group: String,
    pub factor: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run: BacktestRun,
    pub signal_count: usize,
    pub omitted_factors: Vec<GroupOmission>,
    pub error: Option<String>,
}

impl RunReport {
    pub fn performance(&self) -> Option<&PerformanceReport> {
        self.run.performance.as_ref()
    }
}

pub struct BacktestOrchestrator {
    cache: Arc<DataCache>,
    factors: Arc<FactorRegistry>,
    strategies: Arc<StrategyRegistry>,
    store: Arc<RunStore>,
    bridge: EngineBridge,
    normalizer: MetricsNormalizer,
    broker: BrokerConfig,
}

impl std::fmt::Debug for BacktestOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacktestOrchestrator")
            .field("bridge", &self.bridge)
            .field("broker", &self.broker)
            .finish_non_exhaustive()
    }
}

impl BacktestOrchestrator {
    pub fn new(
        cache: Arc<DataCache>,
        factors: Arc<FactorRegistry>,
        strategies: Arc<StrategyRegistry>,
        store: Arc<RunStore>,
        engine: Arc<dyn SimulationEngine>,
    ) -> Self {
        Self {
            cache,
            factors,
            strategies,
            store,
            bridge: EngineBridge::new(engine),
            normalizer: MetricsNormalizer::new(),
            broker: BrokerConfig::default(),
        }
    }

    /// Wire every collaborator from configuration: providers, cache, store,
    /// built-in factors and strategies, and the replay engine.
    pub fn from_config(config: &AppConfig) -> Result<Self, OrchestratorError> {
        let store = Arc::new(RunStore::open(&config.store.path)?);
        let cache = DataCache::new(config.series_store(), Arc::new(config.provider_registry()))
            .with_policy(config.cache.policy);
        Ok(Self::new(
            Arc::new(cache),
            Arc::new(FactorRegistry::with_builtin()),
            Arc::new(StrategyRegistry::with_builtin()),
            store,
            Arc::new(ReplayEngine::new()),
        )
        .with_broker(config.backtest.clone()))
    }

    pub fn with_broker(mut self, broker: BrokerConfig) -> Self {
        self.broker = broker;
        self
    }

    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<DataCache> {
        &self.cache
    }

    pub fn factors(&self) -> &FactorRegistry {
        &self.factors
    }

    pub fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }

    pub async fn run(&self, req: &BacktestRequest) -> Result<RunReport, OrchestratorError> {
        // ── 1. Resolve ──
        let definition = self
            .strategies
            .definition(&req.strategy)
            .ok_or_else(|| OrchestratorError::UnknownStrategy(req.strategy.clone()))?;
        if req.start > req.end {
            return Err(OrchestratorError::InvalidRequest(format!(
                "start {} is after end {}",
                req.start, req.end
            )));
        }
        let mut broker = self.broker.clone();
        if let Some(capital) = req.initial_capital {
            broker.initial_capital = capital;
        }
        broker
            .validate()
            .map_err(|e| OrchestratorError::InvalidRequest(e.to_string()))?;

        let mut groups = definition
            .data_groups
            .iter()
            .cloned()
            .map(|config| DataGroup::new(config, &self.factors))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| OrchestratorError::Contract { run_id: None, source })?;
        let strategy = self
            .strategies
            .create(&req.strategy)
            .ok_or_else(|| OrchestratorError::UnknownStrategy(req.strategy.clone()))?;

        // ── 2. Running row ──
        let run = self.store.create_run(&NewRun {
            strategy_name: req.strategy.clone(),
            symbol: req.symbol.clone(),
            start: req.start,
            end: req.end,
            initial_capital: broker.initial_capital,
        })?;
        info!(run_id = %run.id, strategy = %req.strategy, symbol = %req.symbol, "run started");

        // ── 3-6. Execute and close ──
        let outcome = self.execute(&run, req, &mut groups, strategy, broker).await;
        let omitted = omissions(&groups);

        let error = match outcome {
            Ok(report) => {
                self.store.mark_completed(&run.id, &report)?;
                info!(run_id = %run.id, metrics = report.metrics.len(), "run completed");
                None
            }
            Err(failure) => {
                let reason = failure.to_string();
                self.store.mark_failed(&run.id, &reason)?;
                warn!(run_id = %run.id, %reason, "run failed");
                if let RunFailure::Group(source @ GroupError::ContractViolation { .. }) = failure {
                    return Err(OrchestratorError::Contract {
                        run_id: Some(run.id),
                        source,
                    });
                }
                Some(reason)
            }
        };

        let run = self
            .store
            .get_run(&run.id)?
            .ok_or_else(|| StoreError::NotFound(run.id.clone()))?;
        Ok(RunReport {
            signal_count: self.store.signal_count(&run.id)?,
            run,
            omitted_factors: omitted,
            error,
        })
    }

    async fn execute(
        &self,
        run: &BacktestRun,
        req: &BacktestRequest,
        groups: &mut [DataGroup],
        strategy: Box<dyn Strategy>,
        broker: BrokerConfig,
    ) -> Result<PerformanceReport, RunFailure> {
        let cache = self.cache.as_ref();
        let prepared = join_all(
            groups
                .iter_mut()
                .map(|g| g.prepare(cache, &req.symbol, req.start, req.end, req.use_cache)),
        )
        .await;
        for result in prepared {
            result?;
        }

        if groups.iter().all(|g| g.prepared().map_or(true, PreparedGroup::is_empty)) {
            return Err(RunFailure::NoData);
        }
        let feeds = groups
            .iter()
            .map(DataGroup::to_engine_feed)
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(first) = groups.first().and_then(DataGroup::prepared) {
            self.store.record_price_series(&run.id, &price_points(first)?)?;
        }

        let recorder = SignalRecorder::new(Arc::clone(&self.store), run.id.clone());
        let engine_run = self.bridge.execute(feeds, strategy, recorder, broker).await?;
        info!(
            run_id = %run.id,
            engine = self.bridge.engine_name(),
            signals = engine_run.signals_recorded,
            final_value = engine_run.output.final_value,
            "engine finished"
        );
        Ok(self.normalizer.normalize(&engine_run.output))
    }
}

fn omissions(groups: &[DataGroup]) -> Vec<GroupOmission> {
    groups
        .iter()
        .filter_map(|g| g.prepared().map(|p| (g.name(), p)))
        .flat_map(|(group, p)| {
            p.omitted_factors().iter().map(move |o| GroupOmission {
                group: group.to_string(),
                factor: o.name.clone(),
                reason: o.reason.clone(),
            })
        })
        .collect()
}

/// Bars plus factor fields of one prepared group, row by row.
pub fn price_points(prepared: &PreparedGroup) -> Result<Vec<PricePoint>, FrameError> {
    if prepared.is_empty() {
        return Ok(Vec::new());
    }
    let frame = prepared.frame();
    let bars = frame.to_bars()?;
    let columns: Vec<(&str, &[f64])> = prepared
        .dynamic_fields()
        .iter()
        .filter_map(|f| frame.column(f).map(|c| (f.as_str(), c)))
        .collect();
    Ok(bars
        .into_iter()
        .enumerate()
        .map(|(i, bar)| PricePoint {
            time: bar.time,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            fields: columns
                .iter()
                .map(|(name, col)| (name.to_string(), Some(col[i]).filter(|v| v.is_finite())))
                .collect(),
        })
        .collect())
}
