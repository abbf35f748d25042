//! Loosely typed analyzer values, as an engine reports them.
//!
//! Third-party simulation engines hand back nested dictionaries of numbers,
//! strings, time markers and time-keyed series. `RawValue` models exactly
//! that shape so the normalizer can work on it without knowing the engine.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

/// Key of a raw analyzer map: plain text or a time marker.
#[derive(Debug, Clone, PartialEq)]
pub enum RawKey {
    Text(String),
    Time(NaiveDateTime),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
    Time(NaiveDateTime),
    List(Vec<RawValue>),
    /// Ordered entries; keys may repeat in principle, lookups take the first.
    Map(Vec<(RawKey, RawValue)>),
}

impl RawValue {
    /// Build a text-keyed map.
    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, RawValue)>,
        K: Into<String>,
    {
        RawValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (RawKey::Text(k.into()), v))
                .collect(),
        )
    }

    /// `Number` for finite values, `Null` otherwise.
    pub fn number(value: f64) -> Self {
        if value.is_finite() {
            RawValue::Number(value)
        } else {
            RawValue::Null
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Value stored under a text key.
    pub fn get(&self, key: &str) -> Option<&RawValue> {
        match self {
            RawValue::Map(entries) => entries.iter().find_map(|(k, v)| match k {
                RawKey::Text(t) if t == key => Some(v),
                _ => None,
            }),
            _ => None,
        }
    }

    /// Walk a dotted path of text keys, e.g. `"max.drawdown"`.
    pub fn path(&self, dotted: &str) -> Option<&RawValue> {
        dotted.split('.').try_fold(self, |node, key| node.get(key))
    }

    /// True for a non-empty map whose keys are all time markers.
    pub fn is_time_keyed(&self) -> bool {
        match self {
            RawValue::Map(entries) => {
                !entries.is_empty() && entries.iter().all(|(k, _)| matches!(k, RawKey::Time(_)))
            }
            _ => false,
        }
    }
}

/// Everything a simulation run hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEngineOutput {
    pub analyzers: BTreeMap<String, RawValue>,
    pub initial_value: f64,
    pub final_value: f64,
}

impl RawEngineOutput {
    pub fn analyzer(&self, name: &str) -> Option<&RawValue> {
        self.analyzers.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn dotted_path_lookup() {
        let dd = RawValue::map([
            ("len", RawValue::Number(3.0)),
            ("max", RawValue::map([("drawdown", RawValue::Number(12.5))])),
        ]);
        assert_eq!(dd.path("max.drawdown").and_then(RawValue::as_f64), Some(12.5));
        assert!(dd.path("max.missing").is_none());
        assert!(dd.path("len.deeper").is_none());
    }

    #[test]
    fn time_keyed_detection() {
        let t = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let series = RawValue::Map(vec![(RawKey::Time(t), RawValue::Number(0.01))]);
        assert!(series.is_time_keyed());
        assert!(!RawValue::map([("a", RawValue::Null)]).is_time_keyed());
        assert!(!RawValue::Map(vec![]).is_time_keyed());
    }

    #[test]
    fn non_finite_numbers_become_null() {
        assert_eq!(RawValue::number(f64::NAN), RawValue::Null);
        assert_eq!(RawValue::number(1.5), RawValue::Number(1.5));
    }
}
