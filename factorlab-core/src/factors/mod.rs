//! Factors — named, parameterized computations over a time-indexed frame.
//!
//! A factor class (`FactorClass`) declares its parameter schema and how to
//! build an instance from bound parameters. A built instance (`Factor`) reads
//! the base frame and returns one or more output columns, each exactly as long
//! as the frame. Warmup rows are `f64::NAN`.
//!
//! Classes are listed explicitly in `FactorRegistry::with_builtin()`; there is
//! no runtime discovery.

pub mod atr;
pub mod bollinger;
pub mod financial_ratio;
pub mod macd;
pub mod math;
pub mod momentum;
pub mod moving_average;
pub mod registry;
pub mod rsi;
pub mod volatility;

pub use atr::AtrFactor;
pub use bollinger::BollingerFactor;
pub use financial_ratio::FinancialRatioFactor;
pub use macd::MacdFactor;
pub use momentum::MomentumFactor;
pub use moving_average::{MaType, MovingAverageFactor};
pub use registry::{BoundFactor, FactorRegistry};
pub use rsi::RsiFactor;
pub use volatility::VolatilityFactor;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::Frame;

// ─── Error type ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FactorError {
    #[error("no such factor: {0}")]
    NoSuchFactor(String),

    #[error("invalid parameter '{param}' for {class}: {reason}")]
    InvalidParameter {
        class: String,
        param: String,
        reason: String,
    },

    #[error("factor '{factor}' requires field '{field}'")]
    MissingField { factor: String, field: String },

    #[error("factor '{factor}' produced {actual} rows for a frame of {expected}")]
    LengthMismatch {
        factor: String,
        expected: usize,
        actual: usize,
    },

    #[error("factor '{factor}' failed: {reason}")]
    Computation { factor: String, reason: String },
}

// ─── Parameters ──────────────────────────────────────────────────────

/// A bound parameter value. Integers are accepted where floats are expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Int,
    Float,
    Text,
    Bool,
}

impl ParamKind {
    pub fn accepts(&self, value: &ParamValue) -> bool {
        matches!(
            (self, value),
            (ParamKind::Int, ParamValue::Int(_))
                | (ParamKind::Float, ParamValue::Int(_))
                | (ParamKind::Float, ParamValue::Float(_))
                | (ParamKind::Text, ParamValue::Text(_))
                | (ParamKind::Bool, ParamValue::Bool(_))
        )
    }
}

/// One constructor parameter of a factor class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamKind,
    pub default: ParamValue,
}

impl ParamSpec {
    pub fn int(name: &str, default: i64) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Int,
            default: ParamValue::Int(default),
        }
    }

    pub fn float(name: &str, default: f64) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Float,
            default: ParamValue::Float(default),
        }
    }

    pub fn text(name: &str, default: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Text,
            default: ParamValue::Text(default.to_string()),
        }
    }

    pub fn boolean(name: &str, default: bool) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Bool,
            default: ParamValue::Bool(default),
        }
    }
}

pub type Params = BTreeMap<String, ParamValue>;

fn invalid(class: &str, param: &str, reason: impl Into<String>) -> FactorError {
    FactorError::InvalidParameter {
        class: class.to_string(),
        param: param.to_string(),
        reason: reason.into(),
    }
}

/// Extract a positive integer parameter, falling back to `default`.
pub fn param_period(class: &str, params: &Params, name: &str, default: usize) -> Result<usize, FactorError> {
    match params.get(name) {
        None => Ok(default),
        Some(ParamValue::Int(v)) if *v >= 1 => Ok(*v as usize),
        Some(other) => Err(invalid(class, name, format!("expected integer >= 1, got {other}"))),
    }
}

/// Extract a float parameter, falling back to `default`.
pub fn param_f64(class: &str, params: &Params, name: &str, default: f64) -> Result<f64, FactorError> {
    match params.get(name) {
        None => Ok(default),
        Some(v) => v
            .as_f64()
            .filter(|f| f.is_finite())
            .ok_or_else(|| invalid(class, name, format!("expected number, got {v}"))),
    }
}

pub fn param_text(class: &str, params: &Params, name: &str, default: &str) -> Result<String, FactorError> {
    match params.get(name) {
        None => Ok(default.to_string()),
        Some(ParamValue::Text(s)) => Ok(s.clone()),
        Some(other) => Err(invalid(class, name, format!("expected text, got {other}"))),
    }
}

pub fn param_bool(class: &str, params: &Params, name: &str, default: bool) -> Result<bool, FactorError> {
    match params.get(name) {
        None => Ok(default),
        Some(ParamValue::Bool(b)) => Ok(*b),
        Some(other) => Err(invalid(class, name, format!("expected bool, got {other}"))),
    }
}

// ─── Definitions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactorCategory {
    Technical,
    Fundamental,
    Custom,
    Macro,
    Sentiment,
}

/// Class-level metadata, built once at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorDefinition {
    pub class_name: String,
    pub category: FactorCategory,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
    pub required_fields: Vec<String>,
}

/// One named factor with concrete parameter values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorInstance {
    pub instance_name: String,
    pub class_name: String,
    pub bound_parameters: Params,
}

// ─── Traits ──────────────────────────────────────────────────────────

/// A configured factor ready to compute.
pub trait Factor: Send + Sync {
    fn instance_name(&self) -> &str;

    /// Input columns this instance reads.
    fn required_fields(&self) -> Vec<String>;

    /// Compute every output column over the whole frame.
    fn compute(&self, frame: &Frame) -> Result<Vec<(String, Vec<f64>)>, FactorError>;
}

/// Class-level side of a factor: schema plus constructor.
///
/// `build` must be free of side effects: the registry calls it with an empty
/// parameter map purely to learn `required_fields`.
pub trait FactorClass: Factor + Sized + 'static {
    const CLASS_NAME: &'static str;
    const CATEGORY: FactorCategory;
    const DESCRIPTION: &'static str;

    fn parameters() -> Vec<ParamSpec>;

    fn build(instance_name: &str, params: &Params) -> Result<Self, FactorError>;
}

/// Look up a required input column.
pub(crate) fn require<'a>(frame: &'a Frame, factor: &str, field: &str) -> Result<&'a [f64], FactorError> {
    frame.column(field).ok_or_else(|| FactorError::MissingField {
        factor: factor.to_string(),
        field: field.to_string(),
    })
}

/// Build an indexed frame from close prices for testing.
///
/// open = prev close, high/low = max/min(open, close) ± 1.0, volume = 1000.
#[cfg(test)]
pub fn make_frame(closes: &[f64]) -> Frame {
    use crate::domain::Bar;
    let base = chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    let bars: Vec<Bar> = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar {
                time: (base + chrono::Duration::days(i as i64))
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
                open,
                high: open.max(close) + 1.0,
                low: open.min(close) - 1.0,
                close,
                volume: 1000.0,
            }
        })
        .collect();
    Frame::from_bars(&bars)
}

#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_kind_acceptance() {
        assert!(ParamKind::Float.accepts(&ParamValue::Int(3)));
        assert!(!ParamKind::Int.accepts(&ParamValue::Float(3.0)));
        assert!(ParamKind::Text.accepts(&ParamValue::Text("SMA".into())));
        assert!(!ParamKind::Bool.accepts(&ParamValue::Text("true".into())));
    }

    #[test]
    fn params_deserialize_from_toml() {
        let params: Params = toml::from_str("period = 5\nma_type = \"EMA\"\nstd_dev = 2.5\nannualize = false").unwrap();
        assert_eq!(params["period"], ParamValue::Int(5));
        assert_eq!(params["ma_type"], ParamValue::Text("EMA".into()));
        assert_eq!(params["std_dev"], ParamValue::Float(2.5));
        assert_eq!(params["annualize"], ParamValue::Bool(false));
    }

    #[test]
    fn period_helper_rejects_non_positive() {
        let mut params = Params::new();
        params.insert("period".into(), ParamValue::Int(0));
        assert!(param_period("X", &params, "period", 20).is_err());
        params.insert("period".into(), ParamValue::Int(7));
        assert_eq!(param_period("X", &params, "period", 20).unwrap(), 7);
        assert_eq!(param_period("X", &Params::new(), "period", 20).unwrap(), 20);
    }
}
