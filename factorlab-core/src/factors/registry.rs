//! Maps factor class names to definitions and constructors.
//!
//! Classes are registered explicitly; `with_builtin()` lists the shipped set.
//! Definitions are produced at registration time, so listing is cheap and
//! never instantiates a factor.

use std::collections::BTreeMap;
use std::fmt;

use super::{
    AtrFactor, BollingerFactor, Factor, FactorClass, FactorDefinition, FactorError,
    FactorInstance, FinancialRatioFactor, MacdFactor, MomentumFactor, MovingAverageFactor,
    Params, RsiFactor, VolatilityFactor,
};

type Ctor = fn(&str, &Params) -> Result<Box<dyn Factor>, FactorError>;

struct Entry {
    definition: FactorDefinition,
    ctor: Ctor,
}

fn construct<T: FactorClass>(instance_name: &str, params: &Params) -> Result<Box<dyn Factor>, FactorError> {
    Ok(Box::new(T::build(instance_name, params)?))
}

/// A built factor together with the instance record that produced it.
pub struct BoundFactor {
    pub instance: FactorInstance,
    pub factor: Box<dyn Factor>,
}

impl fmt::Debug for BoundFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundFactor")
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct FactorRegistry {
    entries: BTreeMap<String, Entry>,
}

impl FactorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in factor class.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register::<MovingAverageFactor>()
            .register::<MomentumFactor>()
            .register::<RsiFactor>()
            .register::<MacdFactor>()
            .register::<BollingerFactor>()
            .register::<AtrFactor>()
            .register::<VolatilityFactor>()
            .register::<FinancialRatioFactor>();
        registry
    }

    /// Register a class. Re-registering a name replaces the earlier entry.
    pub fn register<T: FactorClass>(&mut self) -> &mut Self {
        let required_fields = match T::build("__defaults__", &Params::new()) {
            Ok(sample) => sample.required_fields(),
            Err(e) => {
                tracing::warn!(class = T::CLASS_NAME, error = %e, "default construction failed; required fields unknown");
                Vec::new()
            }
        };
        let definition = FactorDefinition {
            class_name: T::CLASS_NAME.to_string(),
            category: T::CATEGORY,
            description: T::DESCRIPTION.to_string(),
            parameters: T::parameters(),
            required_fields,
        };
        self.entries.insert(
            T::CLASS_NAME.to_string(),
            Entry {
                definition,
                ctor: construct::<T>,
            },
        );
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.entries.contains_key(class_name)
    }

    /// Every registered definition, ordered by class name.
    pub fn list_factor_definitions(&self) -> Vec<FactorDefinition> {
        self.entries.values().map(|e| e.definition.clone()).collect()
    }

    pub fn definition(&self, class_name: &str) -> Option<&FactorDefinition> {
        self.entries.get(class_name).map(|e| &e.definition)
    }

    /// Check parameter names and types against the class schema.
    pub fn validate(&self, class_name: &str, params: &Params) -> Result<(), FactorError> {
        let definition = self
            .definition(class_name)
            .ok_or_else(|| FactorError::NoSuchFactor(class_name.to_string()))?;
        for (name, value) in params {
            let spec = definition
                .parameters
                .iter()
                .find(|p| &p.name == name)
                .ok_or_else(|| FactorError::InvalidParameter {
                    class: class_name.to_string(),
                    param: name.clone(),
                    reason: "unknown parameter".into(),
                })?;
            if !spec.kind.accepts(value) {
                return Err(FactorError::InvalidParameter {
                    class: class_name.to_string(),
                    param: name.clone(),
                    reason: format!("expected {:?}, got {value}", spec.kind).to_lowercase(),
                });
            }
        }
        Ok(())
    }

    /// Validate, construct, and record the fully bound parameter set.
    pub fn create(&self, class_name: &str, instance_name: &str, params: &Params) -> Result<BoundFactor, FactorError> {
        let entry = self
            .entries
            .get(class_name)
            .ok_or_else(|| FactorError::NoSuchFactor(class_name.to_string()))?;
        self.validate(class_name, params)?;
        let factor = (entry.ctor)(instance_name, params)?;

        let mut bound_parameters: Params = entry
            .definition
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.default.clone()))
            .collect();
        bound_parameters.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));

        Ok(BoundFactor {
            instance: FactorInstance {
                instance_name: instance_name.to_string(),
                class_name: class_name.to_string(),
                bound_parameters,
            },
            factor,
        })
    }
}
