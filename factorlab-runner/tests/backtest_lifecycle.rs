//! End-to-end backtests through the orchestrator: data, factors, engine,
//! signal persistence and the run lifecycle.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use factorlab_core::data::{
    DataCache, MarketDataProvider, MemoryStore, ProviderError, ProviderRegistry, SyntheticProvider,
};
use factorlab_core::domain::{Bar, DataKind, Frame, SignalAction, SignalDraft};
use factorlab_core::engine::{BrokerConfig, ReplayEngine, StepContext, Strategy, StrategyError};
use factorlab_core::factors::{FactorRegistry, ParamValue, Params};
use factorlab_core::group::{DataGroupConfig, FactorConfig};
use factorlab_runner::{
    BacktestOrchestrator, BacktestRequest, OrchestratorError, RunFilter, RunStatus, RunStore, StoreError,
    StrategyClass, StrategyRegistry,
};

// ─── Fixtures ────────────────────────────────────────────────────────

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

struct Down;

#[async_trait]
impl MarketDataProvider for Down {
    fn name(&self) -> &str {
        "down"
    }

    async fn fetch(&self, _: &str, _: DataKind, _: NaiveDate, _: NaiveDate) -> Result<Frame, ProviderError> {
        Err(ProviderError::Unreachable {
            provider: "down".into(),
            reason: "connection refused".into(),
        })
    }

    async fn health_check(&self) -> bool {
        false
    }
}

/// Weekday closes on a 40-row triangle wave, with a little jitter so the
/// averages never tie exactly.
struct Wave;

#[async_trait]
impl MarketDataProvider for Wave {
    fn name(&self) -> &str {
        "wave"
    }

    async fn fetch(&self, _: &str, _: DataKind, start: NaiveDate, end: NaiveDate) -> Result<Frame, ProviderError> {
        let bars: Vec<Bar> = start
            .iter_days()
            .take_while(|day| *day <= end)
            .filter(|day| !matches!(day.weekday(), Weekday::Sat | Weekday::Sun))
            .enumerate()
            .map(|(i, day)| {
                let phase = (i % 40) as f64;
                let tri = if phase < 20.0 { phase } else { 40.0 - phase };
                let close = 100.0 + tri + (i as f64 * 0.7).sin() * 0.3;
                Bar {
                    time: day.and_hms_opt(0, 0, 0).unwrap(),
                    open: close,
                    high: close + 0.5,
                    low: close - 0.5,
                    close,
                    volume: 1000.0,
                }
            })
            .collect();
        Ok(Frame::from_bars(&bars))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

fn ma(period: i64) -> Params {
    let mut params = Params::new();
    params.insert("period".into(), ParamValue::Int(period));
    params
}

/// Emits a signal every step and fails on the third.
#[derive(Default)]
struct Exploding {
    steps: usize,
}

impl StrategyClass for Exploding {
    const CLASS_NAME: &'static str = "Exploding";
    const DESCRIPTION: &'static str = "fails mid-run";

    fn data_groups() -> Vec<DataGroupConfig> {
        vec![DataGroupConfig {
            name: "daily".into(),
            data_kind: DataKind::Daily,
            weight: 1.0,
            factors: vec![FactorConfig::new("ma_3", "MovingAverageFactor", ma(3))],
        }]
    }

    fn build() -> Self {
        Self::default()
    }
}

impl Strategy for Exploding {
    fn next(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        ctx.emit(SignalDraft {
            symbol: "X".into(),
            action: SignalAction::Buy,
            price: ctx.close(0).unwrap_or_default(),
            strength: 0.0,
            message: "tick".into(),
            time: ctx.time(),
        });
        self.steps += 1;
        if self.steps == 3 {
            return Err("exploded".into());
        }
        Ok(())
    }
}

/// One good factor, one that needs a column price data never has.
#[derive(Default)]
struct Degraded;

impl StrategyClass for Degraded {
    const CLASS_NAME: &'static str = "Degraded";
    const DESCRIPTION: &'static str = "partially degraded factor set";

    fn data_groups() -> Vec<DataGroupConfig> {
        vec![DataGroupConfig {
            name: "daily".into(),
            data_kind: DataKind::Daily,
            weight: 1.0,
            factors: vec![
                FactorConfig::new("ma_3", "MovingAverageFactor", ma(3)),
                FactorConfig::new("pe", "FinancialRatioFactor", Params::new()),
            ],
        }]
    }

    fn build() -> Self {
        Self
    }
}

impl Strategy for Degraded {
    fn next(&mut self, _ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        Ok(())
    }
}

fn orchestrator(providers: ProviderRegistry) -> BacktestOrchestrator {
    let mut strategies = StrategyRegistry::with_builtin();
    strategies.register::<Exploding>().register::<Degraded>();
    let cache = DataCache::new(Arc::new(MemoryStore::new()), Arc::new(providers));
    BacktestOrchestrator::new(
        Arc::new(cache),
        Arc::new(FactorRegistry::with_builtin()),
        Arc::new(strategies),
        Arc::new(RunStore::in_memory().unwrap()),
        Arc::new(ReplayEngine::new()),
    )
    .with_broker(BrokerConfig::default())
}

fn synthetic() -> ProviderRegistry {
    ProviderRegistry::new().with_provider(Arc::new(SyntheticProvider::new("synthetic", 7)), 1)
}

// ─── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn dual_moving_average_signals_every_crossover() {
    let orch = orchestrator(ProviderRegistry::new().with_provider(Arc::new(Wave), 1));
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2024, 4, 30).unwrap();
    let req = BacktestRequest::new("DualMovingAverageStrategy", "X", start, end);
    let report = orch.run(&req).await.unwrap();

    assert_eq!(report.run.status, RunStatus::Completed);
    assert!(report.error.is_none());
    assert!(report.omitted_factors.is_empty());

    let perf = report.performance().unwrap();
    assert!(perf.metric("total_return").is_some_and(f64::is_finite));
    assert!(perf.metric("max_drawdown").is_some_and(f64::is_finite));

    // Crossovers visible in the stored series, with equal averages keeping the side.
    let store = orch.store();
    let series = store.price_series(&report.run.id).unwrap();
    assert_eq!(series.len(), 87); // weekdays from January through April 2024
    let mut prev: Option<bool> = None;
    let mut expected = Vec::new();
    for p in &series {
        let (Some(Some(fast)), Some(Some(slow))) = (p.fields.get("ma_5"), p.fields.get("ma_20")) else {
            continue;
        };
        let above = if fast > slow {
            true
        } else if fast < slow {
            false
        } else {
            continue;
        };
        if prev.is_some_and(|was| was != above) {
            let action = if above { SignalAction::Buy } else { SignalAction::Sell };
            expected.push((p.time, action));
        }
        prev = Some(above);
    }
    assert!(expected.len() >= 2, "wave should cross at least twice, got {}", expected.len());
    assert!(expected.iter().any(|(_, a)| *a == SignalAction::Buy));
    assert!(expected.iter().any(|(_, a)| *a == SignalAction::Sell));

    let signals = store.list_signals(&report.run.id).unwrap();
    let recorded: Vec<_> = signals.iter().map(|s| (s.time, s.action)).collect();
    assert_eq!(recorded, expected);
    assert_eq!(report.signal_count, expected.len());
    assert!(signals.iter().all(|s| s.run_id == report.run.id && s.strength > 0.0));
}

#[tokio::test]
async fn unknown_strategy_creates_no_run() {
    let orch = orchestrator(synthetic());
    let req = BacktestRequest::new("NoSuchStrategy", "X", d(1), d(31));
    assert!(matches!(orch.run(&req).await, Err(OrchestratorError::UnknownStrategy(_))));
    assert!(orch.store().list_runs(&RunFilter::default(), 10, 0).unwrap().is_empty());
}

#[tokio::test]
async fn no_data_fails_the_run_without_report() {
    let orch = orchestrator(ProviderRegistry::new().with_provider(Arc::new(Down), 1));
    let req = BacktestRequest::new("DualMovingAverageStrategy", "X", d(1), d(31));
    let report = orch.run(&req).await.unwrap();

    assert_eq!(report.run.status, RunStatus::Failed);
    assert!(report.performance().is_none());
    assert!(report.error.as_deref().is_some_and(|e| e.contains("no data")));
    assert_eq!(report.signal_count, 0);
}

#[tokio::test]
async fn engine_failure_keeps_signals_attached_to_failed_run() {
    let orch = orchestrator(synthetic());
    let req = BacktestRequest::new("Exploding", "X", d(1), d(31));
    let report = orch.run(&req).await.unwrap();

    assert_eq!(report.run.status, RunStatus::Failed);
    assert!(report.performance().is_none());
    assert!(report.error.as_deref().is_some_and(|e| e.contains("exploded")));

    let signals = orch.store().list_signals(&report.run.id).unwrap();
    assert_eq!(signals.len(), 3);
    assert!(signals.iter().all(|s| s.run_id == report.run.id));
}

#[tokio::test]
async fn partial_degradation_still_completes() {
    let orch = orchestrator(synthetic());
    let req = BacktestRequest::new("Degraded", "X", d(1), d(31));
    let report = orch.run(&req).await.unwrap();

    assert_eq!(report.run.status, RunStatus::Completed);
    assert_eq!(report.omitted_factors.len(), 1);
    assert_eq!(report.omitted_factors[0].factor, "pe");

    let series = orch.store().price_series(&report.run.id).unwrap();
    assert!(series[0].fields.contains_key("ma_3"));
    assert!(!series[0].fields.contains_key("pe"));
}

#[tokio::test]
async fn runs_close_exactly_once() {
    let orch = orchestrator(synthetic());
    let req = BacktestRequest::new("DualMovingAverageStrategy", "X", d(1), d(31));
    let report = orch.run(&req).await.unwrap();
    assert!(matches!(
        orch.store().mark_failed(&report.run.id, "again"),
        Err(StoreError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn rejects_inverted_range_and_bad_capital() {
    let orch = orchestrator(synthetic());
    let inverted = BacktestRequest::new("DualMovingAverageStrategy", "X", d(31), d(1));
    assert!(matches!(orch.run(&inverted).await, Err(OrchestratorError::InvalidRequest(_))));

    let mut broke = BacktestRequest::new("DualMovingAverageStrategy", "X", d(1), d(31));
    broke.initial_capital = Some(0.0);
    assert!(matches!(orch.run(&broke).await, Err(OrchestratorError::InvalidRequest(_))));
    assert!(orch.store().list_runs(&RunFilter::default(), 10, 0).unwrap().is_empty());
}

#[tokio::test]
async fn second_run_is_served_from_cache() {
    let orch = orchestrator(synthetic());
    let req = BacktestRequest::new("DualMovingAverageStrategy", "X", d(1), d(31));
    let first = orch.run(&req).await.unwrap();
    let second = orch.run(&req).await.unwrap();

    let a = orch.store().price_series(&first.run.id).unwrap();
    let b = orch.store().price_series(&second.run.id).unwrap();
    assert_eq!(a, b);
    assert_eq!(first.signal_count, second.signal_count);
    assert!(orch.cache().store().get("X", DataKind::Daily).unwrap().is_some());
}
