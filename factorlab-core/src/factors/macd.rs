//! MACD — difference of a fast and a slow EMA of close, with a signal line.
//!
//! Outputs `{name}_line`, `{name}_signal`, `{name}_hist`.

use super::math;
use super::{param_period, require, Factor, FactorCategory, FactorClass, FactorError, ParamSpec, Params};
use crate::domain::Frame;

#[derive(Debug, Clone)]
pub struct MacdFactor {
    name: String,
    fast: usize,
    slow: usize,
    signal: usize,
}

impl Factor for MacdFactor {
    fn instance_name(&self) -> &str {
        &self.name
    }

    fn required_fields(&self) -> Vec<String> {
        vec!["close".into()]
    }

    fn compute(&self, frame: &Frame) -> Result<Vec<(String, Vec<f64>)>, FactorError> {
        let close = require(frame, &self.name, "close")?;
        let fast = math::ema(close, self.fast);
        let slow = math::ema(close, self.slow);
        let line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
        let signal = math::after_warmup(&line, self.signal, math::ema);
        let hist: Vec<f64> = line.iter().zip(&signal).map(|(l, s)| l - s).collect();
        Ok(vec![
            (format!("{}_line", self.name), line),
            (format!("{}_signal", self.name), signal),
            (format!("{}_hist", self.name), hist),
        ])
    }
}

impl FactorClass for MacdFactor {
    const CLASS_NAME: &'static str = "MacdFactor";
    const CATEGORY: FactorCategory = FactorCategory::Technical;
    const DESCRIPTION: &'static str = "Moving average convergence/divergence";

    fn parameters() -> Vec<ParamSpec> {
        vec![
            ParamSpec::int("fast", 12),
            ParamSpec::int("slow", 26),
            ParamSpec::int("signal", 9),
        ]
    }

    fn build(instance_name: &str, params: &Params) -> Result<Self, FactorError> {
        let fast = param_period(Self::CLASS_NAME, params, "fast", 12)?;
        let slow = param_period(Self::CLASS_NAME, params, "slow", 26)?;
        if fast >= slow {
            return Err(FactorError::InvalidParameter {
                class: Self::CLASS_NAME.into(),
                param: "fast".into(),
                reason: format!("fast ({fast}) must be shorter than slow ({slow})"),
            });
        }
        Ok(Self {
            name: instance_name.to_string(),
            fast,
            slow,
            signal: param_period(Self::CLASS_NAME, params, "signal", 9)?,
        })
    }
}
