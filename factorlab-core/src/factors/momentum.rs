//! Momentum as a lookback return fraction.
//!
//! momentum[t] = close[t] / close[t - n] - 1
//! Lookback: n.

use super::math;
use super::{param_period, require, Factor, FactorCategory, FactorClass, FactorError, ParamSpec, Params};
use crate::domain::Frame;

#[derive(Debug, Clone)]
pub struct MomentumFactor {
    name: String,
    lookback: usize,
}

impl Factor for MomentumFactor {
    fn instance_name(&self) -> &str {
        &self.name
    }

    fn required_fields(&self) -> Vec<String> {
        vec!["close".into()]
    }

    fn compute(&self, frame: &Frame) -> Result<Vec<(String, Vec<f64>)>, FactorError> {
        let close = require(frame, &self.name, "close")?;
        Ok(vec![(self.name.clone(), math::pct_change(close, self.lookback))])
    }
}

impl FactorClass for MomentumFactor {
    const CLASS_NAME: &'static str = "MomentumFactor";
    const CATEGORY: FactorCategory = FactorCategory::Technical;
    const DESCRIPTION: &'static str = "Return over the lookback period";

    fn parameters() -> Vec<ParamSpec> {
        vec![ParamSpec::int("lookback_period", 20)]
    }

    fn build(instance_name: &str, params: &Params) -> Result<Self, FactorError> {
        Ok(Self {
            name: instance_name.to_string(),
            lookback: param_period(Self::CLASS_NAME, params, "lookback_period", 20)?,
        })
    }
}
