//! Financial ratio passthrough for fundamental series.
//!
//! Reads the column named by `ratio_type` (e.g. `pe_ratio`) and republishes it
//! under the instance name. Price-only frames do not carry these columns, so
//! this factor fails in isolation when bound to a price group.

use super::{param_text, require, Factor, FactorCategory, FactorClass, FactorError, ParamSpec, Params};
use crate::domain::Frame;

const RATIO_TYPES: [&str; 5] = ["pe_ratio", "pb_ratio", "ps_ratio", "roe", "debt_to_equity"];

#[derive(Debug, Clone)]
pub struct FinancialRatioFactor {
    name: String,
    ratio_type: String,
}

impl Factor for FinancialRatioFactor {
    fn instance_name(&self) -> &str {
        &self.name
    }

    fn required_fields(&self) -> Vec<String> {
        vec![self.ratio_type.clone()]
    }

    fn compute(&self, frame: &Frame) -> Result<Vec<(String, Vec<f64>)>, FactorError> {
        let values = require(frame, &self.name, &self.ratio_type)?;
        Ok(vec![(self.name.clone(), values.to_vec())])
    }
}

impl FactorClass for FinancialRatioFactor {
    const CLASS_NAME: &'static str = "FinancialRatioFactor";
    const CATEGORY: FactorCategory = FactorCategory::Fundamental;
    const DESCRIPTION: &'static str = "Reported valuation or balance-sheet ratio";

    fn parameters() -> Vec<ParamSpec> {
        vec![ParamSpec::text("ratio_type", "pe_ratio")]
    }

    fn build(instance_name: &str, params: &Params) -> Result<Self, FactorError> {
        let ratio_type = param_text(Self::CLASS_NAME, params, "ratio_type", "pe_ratio")?;
        if !RATIO_TYPES.contains(&ratio_type.as_str()) {
            return Err(FactorError::InvalidParameter {
                class: Self::CLASS_NAME.into(),
                param: "ratio_type".into(),
                reason: format!("unsupported ratio '{ratio_type}'"),
            });
        }
        Ok(Self {
            name: instance_name.to_string(),
            ratio_type,
        })
    }
}
