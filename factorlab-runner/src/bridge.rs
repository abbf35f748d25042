//! Engine bridge — hands prepared feeds to a synchronous engine on a blocking
//! worker and persists signals from inside each step.
//!
//! The engine is the only driver of step progress, so every signal a step
//! emits is written to the store before that step's callback returns. Nothing
//! here schedules async work from inside the engine loop.

use std::sync::Arc;

use factorlab_core::domain::{Signal, SignalDraft};
use factorlab_core::engine::{
    BrokerConfig, EngineError, EngineFeed, RawEngineOutput, SimulationEngine, StepContext, Strategy,
    StrategyError,
};
use tracing::{debug, error};

use crate::store::{RunStore, StoreError};

/// Writes signals for one run.
#[derive(Debug, Clone)]
pub struct SignalRecorder {
    store: Arc<RunStore>,
    run_id: String,
    recorded: usize,
}

impl SignalRecorder {
    pub fn new(store: Arc<RunStore>, run_id: impl Into<String>) -> Self {
        Self {
            store,
            run_id: run_id.into(),
            recorded: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn recorded(&self) -> usize {
        self.recorded
    }

    pub fn record(&mut self, draft: &SignalDraft) -> Result<Signal, StoreError> {
        let signal = self.store.insert_signal(&self.run_id, draft)?;
        self.recorded += 1;
        debug!(run_id = %self.run_id, action = %signal.action, price = signal.price, "signal recorded");
        Ok(signal)
    }
}

/// Wraps strategy logic so each step's signals are persisted before the step ends.
pub struct StrategyAdapter<S> {
    inner: S,
    recorder: SignalRecorder,
}

impl<S: Strategy> StrategyAdapter<S> {
    pub fn new(inner: S, recorder: SignalRecorder) -> Self {
        Self { inner, recorder }
    }

    pub fn recorder(&self) -> &SignalRecorder {
        &self.recorder
    }

    fn flush(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        for draft in ctx.drain_signals() {
            self.recorder
                .record(&draft)
                .map_err(|e| StrategyError(format!("signal persistence failed: {e}")))?;
        }
        Ok(())
    }
}

impl<S: Strategy> Strategy for StrategyAdapter<S> {
    fn on_start(&mut self, feeds: &[EngineFeed]) -> Result<(), StrategyError> {
        self.inner.on_start(feeds)
    }

    fn next(&mut self, ctx: &mut StepContext<'_>) -> Result<(), StrategyError> {
        let result = self.inner.next(ctx);
        // signals emitted before a failure are still decisions the run made
        self.flush(ctx)?;
        result
    }

    fn on_stop(&mut self) -> Result<(), StrategyError> {
        self.inner.on_stop()
    }
}

/// What an engine run hands back to the orchestrator.
#[derive(Debug, Clone)]
pub struct EngineRun {
    pub output: RawEngineOutput,
    pub signals_recorded: usize,
}

#[derive(Clone)]
pub struct EngineBridge {
    engine: Arc<dyn SimulationEngine>,
}

impl std::fmt::Debug for EngineBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBridge").field("engine", &self.engine.name()).finish()
    }
}

impl EngineBridge {
    pub fn new(engine: Arc<dyn SimulationEngine>) -> Self {
        Self { engine }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Run the engine on the current thread.
    pub fn run_sync(
        engine: &dyn SimulationEngine,
        feeds: Vec<EngineFeed>,
        strategy: Box<dyn Strategy>,
        recorder: SignalRecorder,
        broker: &BrokerConfig,
    ) -> Result<EngineRun, EngineError> {
        let mut adapter = StrategyAdapter::new(strategy, recorder);
        let output = engine.run(feeds, &mut adapter, broker)?;
        Ok(EngineRun {
            output,
            signals_recorded: adapter.recorder().recorded(),
        })
    }

    /// Run the engine on a blocking worker. A panic inside the engine or the
    /// strategy comes back as `EngineError::Panicked`.
    pub async fn execute(
        &self,
        feeds: Vec<EngineFeed>,
        strategy: Box<dyn Strategy>,
        recorder: SignalRecorder,
        broker: BrokerConfig,
    ) -> Result<EngineRun, EngineError> {
        let engine = Arc::clone(&self.engine);
        let handle = tokio::task::spawn_blocking(move || {
            Self::run_sync(engine.as_ref(), feeds, strategy, recorder, &broker)
        });
        match handle.await {
            Ok(result) => result,
            Err(join) => {
                let reason = if join.is_panic() {
                    panic_message(join.into_panic())
                } else {
                    "engine task cancelled".to_string()
                };
                error!(engine = self.engine.name(), %reason, "engine worker aborted");
                Err(EngineError::Panicked(reason))
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
