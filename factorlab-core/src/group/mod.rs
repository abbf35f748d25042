//! DataGroup — one data series plus its bound factor instances.
//!
//! Lifecycle: declared (`DataGroupConfig`) → prepared (`prepare`, bars and
//! factor columns computed once, immutable afterwards) → converted
//! (`to_engine_feed`). A group is never re-prepared; callers build a new one
//! per run.
//!
//! Degradation rules:
//! - provider exhaustion yields an empty prepared frame, not an error
//! - a failing factor is logged and its columns omitted; the rest survive
//! - a frame without a time index, a duplicate instance name, an unknown
//!   factor class and a feed requested before preparation are contract
//!   violations and are returned as errors immediately

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::data::{DataCache, FrameSource};
use crate::domain::{DataKind, Frame, CANONICAL_FIELDS};
use crate::engine::{EngineFeed, FeedRow};
use crate::factors::{BoundFactor, FactorError, FactorInstance, FactorRegistry, Params};

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("group '{group}': {reason}")]
    ContractViolation { group: String, reason: String },

    #[error("group '{group}': {source}")]
    Factor {
        group: String,
        #[source]
        source: FactorError,
    },
}

impl GroupError {
    fn contract(group: &str, reason: impl Into<String>) -> Self {
        GroupError::ContractViolation {
            group: group.to_string(),
            reason: reason.into(),
        }
    }
}

// ─── Declarations ────────────────────────────────────────────────────

/// One factor instance as a strategy declares it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorConfig {
    pub name: String,
    pub class: String,
    #[serde(default)]
    pub params: Params,
}

impl FactorConfig {
    pub fn new(name: &str, class: &str, params: Params) -> Self {
        Self {
            name: name.to_string(),
            class: class.to_string(),
            params,
        }
    }
}

fn default_weight() -> f64 {
    1.0
}

/// Declarative description of one DataGroup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataGroupConfig {
    pub name: String,
    #[serde(default)]
    pub data_kind: DataKind,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub factors: Vec<FactorConfig>,
}

// ─── Prepared state ──────────────────────────────────────────────────

/// A factor dropped during preparation and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmittedFactor {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct PreparedGroup {
    symbol: String,
    frame: Frame,
    source: FrameSource,
    dynamic_fields: Vec<String>,
    omitted: Vec<OmittedFactor>,
}

impl PreparedGroup {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Base columns followed by every surviving factor column.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    /// Every non-canonical column: base extras first, then factor outputs in merge order.
    pub fn dynamic_fields(&self) -> &[String] {
        &self.dynamic_fields
    }

    pub fn omitted_factors(&self) -> &[OmittedFactor] {
        &self.omitted
    }

    /// True when no provider had data for the window.
    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }
}

// ─── DataGroup ───────────────────────────────────────────────────────

pub struct DataGroup {
    config: DataGroupConfig,
    factors: Vec<BoundFactor>,
    prepared: Option<PreparedGroup>,
}

impl std::fmt::Debug for DataGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataGroup")
            .field("config", &self.config)
            .field("prepared", &self.prepared.is_some())
            .finish_non_exhaustive()
    }
}

impl DataGroup {
    /// Bind every declared factor through the registry.
    pub fn new(config: DataGroupConfig, registry: &FactorRegistry) -> Result<Self, GroupError> {
        let mut factors: Vec<BoundFactor> = Vec::with_capacity(config.factors.len());
        for fc in &config.factors {
            if factors.iter().any(|b| b.instance.instance_name == fc.name) {
                return Err(GroupError::contract(
                    &config.name,
                    format!("duplicate factor instance '{}'", fc.name),
                ));
            }
            if CANONICAL_FIELDS.contains(&fc.name.as_str()) {
                return Err(GroupError::contract(
                    &config.name,
                    format!("factor instance '{}' shadows a canonical field", fc.name),
                ));
            }
            let bound = registry
                .create(&fc.class, &fc.name, &fc.params)
                .map_err(|source| GroupError::Factor {
                    group: config.name.clone(),
                    source,
                })?;
            factors.push(bound);
        }
        Ok(Self {
            config,
            factors,
            prepared: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DataGroupConfig {
        &self.config
    }

    pub fn factor_instances(&self) -> Vec<&FactorInstance> {
        self.factors.iter().map(|b| &b.instance).collect()
    }

    pub fn prepared(&self) -> Option<&PreparedGroup> {
        self.prepared.as_ref()
    }

    /// Fetch the base series and compute every factor over the full window.
    pub async fn prepare(
        &mut self,
        cache: &DataCache,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        use_cache: bool,
    ) -> Result<&PreparedGroup, GroupError> {
        if self.prepared.is_some() {
            return Err(GroupError::contract(&self.config.name, "already prepared"));
        }

        let fetched = cache
            .fetch_detailed(symbol, self.config.data_kind, start, end, use_cache)
            .await;
        let base = fetched.frame;
        if !base.is_empty() && !base.has_index() {
            return Err(GroupError::contract(
                &self.config.name,
                format!("series for {symbol} has no time index"),
            ));
        }

        let prepared = if base.is_empty() {
            info!(group = %self.config.name, symbol, "no data for window");
            PreparedGroup {
                symbol: symbol.to_string(),
                frame: base,
                source: fetched.source,
                dynamic_fields: Vec::new(),
                omitted: Vec::new(),
            }
        } else {
            let (frame, dynamic_fields, omitted) = self.compute_factors(base);
            PreparedGroup {
                symbol: symbol.to_string(),
                frame,
                source: fetched.source,
                dynamic_fields,
                omitted,
            }
        };
        debug!(
            group = %self.config.name,
            rows = prepared.frame.len(),
            fields = prepared.dynamic_fields.len(),
            omitted = prepared.omitted.len(),
            "group prepared"
        );
        Ok(self.prepared.insert(prepared))
    }

    /// Compute factors in parallel, merge survivors by row position in declared order.
    /// Returns the merged frame, its dynamic fields and the omitted factors.
    fn compute_factors(&self, mut frame: Frame) -> (Frame, Vec<String>, Vec<OmittedFactor>) {
        let base = &frame;
        let results: Vec<Result<Vec<(String, Vec<f64>)>, FactorError>> = self
            .factors
            .par_iter()
            .map(|b| run_factor(b, base))
            .collect();

        // base columns beyond OHLCV (amount, ratios, ...) come first
        let mut dynamic_fields: Vec<String> = frame
            .column_names()
            .filter(|c| !CANONICAL_FIELDS.contains(c))
            .map(str::to_string)
            .collect();
        let mut omitted = Vec::new();
        for (bound, result) in self.factors.iter().zip(results) {
            let name = &bound.instance.instance_name;
            let columns = result.and_then(|cols| check_outputs(name, &frame, &dynamic_fields, cols));
            match columns {
                Ok(cols) => {
                    for (col, values) in cols {
                        // lengths were checked against the frame above
                        if frame.push_column(col.clone(), values).is_ok() {
                            dynamic_fields.push(col);
                        }
                    }
                }
                Err(e) => {
                    warn!(group = %self.config.name, factor = %name, error = %e, "factor omitted");
                    omitted.push(OmittedFactor {
                        name: name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        (frame, dynamic_fields, omitted)
    }

    /// Engine-ready feed: canonical bars plus the dynamic-field slot map.
    pub fn to_engine_feed(&self) -> Result<EngineFeed, GroupError> {
        let prepared = self
            .prepared
            .as_ref()
            .ok_or_else(|| GroupError::contract(&self.config.name, "feed requested before prepare"))?;

        if prepared.frame.is_empty() {
            return EngineFeed::new(
                self.config.name.clone(),
                prepared.symbol.clone(),
                self.config.weight,
                prepared.dynamic_fields.clone(),
                Vec::new(),
            )
            .map_err(|e| GroupError::contract(&self.config.name, e.to_string()));
        }
        if !prepared.frame.has_ohlcv() {
            let missing: Vec<&str> = CANONICAL_FIELDS
                .iter()
                .copied()
                .filter(|f| !prepared.frame.has_column(f))
                .collect();
            return Err(GroupError::contract(
                &self.config.name,
                format!("missing canonical fields: {}", missing.join(", ")),
            ));
        }

        let bars = prepared
            .frame
            .to_bars()
            .map_err(|e| GroupError::contract(&self.config.name, e.to_string()))?;
        let dynamic: Vec<&[f64]> = prepared
            .dynamic_fields
            .iter()
            .filter_map(|f| prepared.frame.column(f))
            .collect();
        let rows = bars
            .into_iter()
            .enumerate()
            .map(|(i, bar)| FeedRow {
                bar,
                dynamic: dynamic.iter().map(|col| col[i]).collect(),
            })
            .collect();

        EngineFeed::new(
            self.config.name.clone(),
            prepared.symbol.clone(),
            self.config.weight,
            prepared.dynamic_fields.clone(),
            rows,
        )
        .map_err(|e| GroupError::contract(&self.config.name, e.to_string()))
    }
}

fn run_factor(bound: &BoundFactor, frame: &Frame) -> Result<Vec<(String, Vec<f64>)>, FactorError> {
    let name = &bound.instance.instance_name;
    for field in bound.factor.required_fields() {
        if !frame.has_column(&field) {
            return Err(FactorError::MissingField {
                factor: name.clone(),
                field,
            });
        }
    }
    bound.factor.compute(frame)
}

fn check_outputs(
    factor: &str,
    frame: &Frame,
    taken: &[String],
    columns: Vec<(String, Vec<f64>)>,
) -> Result<Vec<(String, Vec<f64>)>, FactorError> {
    for (col, values) in &columns {
        if values.len() != frame.len() {
            return Err(FactorError::LengthMismatch {
                factor: factor.to_string(),
                expected: frame.len(),
                actual: values.len(),
            });
        }
        if frame.has_column(col) || taken.contains(col) {
            return Err(FactorError::Computation {
                factor: factor.to_string(),
                reason: format!("output column '{col}' already exists"),
            });
        }
    }
    Ok(columns)
}

#[cfg(test)]
mod tests;
