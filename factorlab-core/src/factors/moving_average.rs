//! Moving average of close prices, simple or exponential.
//!
//! Output column is named after the instance (e.g. `ma_5`).
//! Lookback: period - 1.

use super::math;
use super::{
    param_period, param_text, require, Factor, FactorCategory, FactorClass, FactorError,
    ParamSpec, Params,
};
use crate::domain::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaType {
    Sma,
    Ema,
}

#[derive(Debug, Clone)]
pub struct MovingAverageFactor {
    name: String,
    period: usize,
    ma_type: MaType,
}

impl MovingAverageFactor {
    pub fn period(&self) -> usize {
        self.period
    }

    pub fn ma_type(&self) -> MaType {
        self.ma_type
    }
}

impl Factor for MovingAverageFactor {
    fn instance_name(&self) -> &str {
        &self.name
    }

    fn required_fields(&self) -> Vec<String> {
        vec!["close".into()]
    }

    fn compute(&self, frame: &Frame) -> Result<Vec<(String, Vec<f64>)>, FactorError> {
        let close = require(frame, &self.name, "close")?;
        let values = match self.ma_type {
            MaType::Sma => math::sma(close, self.period),
            MaType::Ema => math::ema(close, self.period),
        };
        Ok(vec![(self.name.clone(), values)])
    }
}

impl FactorClass for MovingAverageFactor {
    const CLASS_NAME: &'static str = "MovingAverageFactor";
    const CATEGORY: FactorCategory = FactorCategory::Technical;
    const DESCRIPTION: &'static str = "Simple or exponential moving average of close";

    fn parameters() -> Vec<ParamSpec> {
        vec![ParamSpec::int("period", 20), ParamSpec::text("ma_type", "SMA")]
    }

    fn build(instance_name: &str, params: &Params) -> Result<Self, FactorError> {
        let period = param_period(Self::CLASS_NAME, params, "period", 20)?;
        let ma_type = match param_text(Self::CLASS_NAME, params, "ma_type", "SMA")?
            .to_ascii_uppercase()
            .as_str()
        {
            "SMA" => MaType::Sma,
            "EMA" => MaType::Ema,
            other => {
                return Err(FactorError::InvalidParameter {
                    class: Self::CLASS_NAME.into(),
                    param: "ma_type".into(),
                    reason: format!("expected SMA or EMA, got {other}"),
                })
            }
        };
        Ok(Self {
            name: instance_name.to_string(),
            period,
            ma_type,
        })
    }
}
