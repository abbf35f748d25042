//! Rolling volatility of close-to-close returns, optionally annualized (×√252).

use super::math;
use super::{
    param_bool, param_period, require, Factor, FactorCategory, FactorClass, FactorError, ParamSpec,
    Params,
};
use crate::domain::Frame;

const TRADING_DAYS: f64 = 252.0;

#[derive(Debug, Clone)]
pub struct VolatilityFactor {
    name: String,
    period: usize,
    annualize: bool,
}

impl Factor for VolatilityFactor {
    fn instance_name(&self) -> &str {
        &self.name
    }

    fn required_fields(&self) -> Vec<String> {
        vec!["close".into()]
    }

    fn compute(&self, frame: &Frame) -> Result<Vec<(String, Vec<f64>)>, FactorError> {
        let close = require(frame, &self.name, "close")?;
        let returns = math::pct_change(close, 1);
        let scale = if self.annualize { TRADING_DAYS.sqrt() } else { 1.0 };
        let vol = math::after_warmup(&returns, self.period, math::rolling_std)
            .into_iter()
            .map(|v| v * scale)
            .collect();
        Ok(vec![(self.name.clone(), vol)])
    }
}

impl FactorClass for VolatilityFactor {
    const CLASS_NAME: &'static str = "VolatilityFactor";
    const CATEGORY: FactorCategory = FactorCategory::Technical;
    const DESCRIPTION: &'static str = "Rolling standard deviation of daily returns";

    fn parameters() -> Vec<ParamSpec> {
        vec![ParamSpec::int("period", 20), ParamSpec::boolean("annualize", true)]
    }

    fn build(instance_name: &str, params: &Params) -> Result<Self, FactorError> {
        Ok(Self {
            name: instance_name.to_string(),
            period: param_period(Self::CLASS_NAME, params, "period", 20)?,
            annualize: param_bool(Self::CLASS_NAME, params, "annualize", true)?,
        })
    }
}
