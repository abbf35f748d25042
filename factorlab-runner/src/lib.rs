//! FactorLab Runner — backtest orchestration on top of `factorlab-core`.
//!
//! This crate provides:
//! - TOML application configuration (providers, cache, store, broker)
//! - The SQLite run store: runs, signals, price series, comparisons
//! - Metric normalization of raw engine output
//! - The strategy registry and built-in strategies
//! - The engine bridge (blocking worker, in-step signal persistence)
//! - The orchestrator that owns a run's `running → completed | failed` lifecycle

pub mod bridge;
pub mod config;
pub mod normalizer;
pub mod orchestrator;
pub mod store;
pub mod strategy;

pub use bridge::{EngineBridge, EngineRun, SignalRecorder, StrategyAdapter};
pub use config::{AppConfig, CacheBackend, ConfigError, ProviderConfig, ProviderSource};
pub use normalizer::{MetricsNormalizer, PerformanceReport};
pub use orchestrator::{BacktestOrchestrator, BacktestRequest, GroupOmission, OrchestratorError, RunReport};
pub use store::{
    BacktestRun, MetricSummary, NewRun, PricePoint, RunComparison, RunFilter, RunStatus, RunStore, StoreError,
};
pub use strategy::{DualMovingAverageStrategy, StrategyClass, StrategyDefinition, StrategyRegistry};
