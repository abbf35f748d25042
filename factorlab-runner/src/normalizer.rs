//! Metrics normalization: raw engine analyzers → stable `PerformanceReport`.
//!
//! Rules:
//! - a time-keyed series is reduced to its arithmetic mean before it reaches
//!   the report; no time-keyed data survives as-is
//! - a reported ratio counts only when finite and `|v| > 0.001`
//! - an unavailable ratio is recomputed as `return / risk` when both inputs are
//!   present and the risk is non-zero; otherwise it stays absent
//! - every time marker, at any depth, is rendered as a fixed-format string
//!
//! The normalizer is a pure function of its input.

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, Timelike};
use factorlab_core::domain::TIME_FORMAT;
use factorlab_core::engine::analyzers::{mean, std_dev, PERIODS_PER_YEAR};
use factorlab_core::engine::{RawEngineOutput, RawKey, RawValue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Smallest magnitude at which a reported ratio is trusted.
pub const RATIO_EPSILON: f64 = 0.001;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Normalized run metrics plus the serializable analyzer tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub metrics: BTreeMap<String, f64>,
    pub analyzers: Value,
}

impl PerformanceReport {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsNormalizer;

impl MetricsNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, raw: &RawEngineOutput) -> PerformanceReport {
        let mut metrics = BTreeMap::new();
        let mut put = |name: &str, value: Option<f64>| {
            if let Some(v) = value.filter(|v| v.is_finite()) {
                metrics.insert(name.to_string(), v);
            }
        };

        let num = |analyzer: &str, path: &str| -> Option<f64> {
            raw.analyzer(analyzer)?.path(path)?.as_f64()
        };
        let series_mean = |analyzer: &str| -> Option<f64> { raw.analyzer(analyzer).and_then(time_keyed_mean) };

        // Returns
        let total_return = num("returns", "rtot")
            .map(|rtot| rtot.exp() - 1.0)
            .or_else(|| (raw.initial_value > 0.0).then(|| raw.final_value / raw.initial_value - 1.0));
        put("total_return", total_return);
        put("total_return_pct", total_return.map(|r| r * 100.0));

        let avg_annual_return = series_mean("annual_return").or_else(|| num("returns", "rnorm"));
        put("avg_annual_return", avg_annual_return);

        let annual_volatility = raw
            .analyzer("time_return")
            .map(time_keyed_values)
            .filter(|v| v.len() >= 2)
            .map(|v| std_dev(&v) * PERIODS_PER_YEAR.sqrt());
        put("annual_volatility", annual_volatility);

        // Drawdown is reported in percent by the engine; the report holds a fraction.
        let max_drawdown = num("drawdown", "max.drawdown").map(|d| d.abs() / 100.0);
        put("max_drawdown", max_drawdown);
        put("max_drawdown_money", num("drawdown", "max.moneydown"));

        // Ratios
        let sharpe = accepted_ratio(num("sharpe", "sharperatio"))
            .or_else(|| ratio_fallback(avg_annual_return, annual_volatility));
        put("sharpe_ratio", sharpe);
        put(
            "calmar_ratio",
            ratio_fallback(avg_annual_return, max_drawdown.map(f64::abs)),
        );
        put("sqn", accepted_ratio(num("sqn", "sqn")));
        put("vwr", accepted_ratio(num("vwr", "vwr")));

        // Trades
        let total_trades = num("trades", "total.total");
        let won = num("trades", "won.total");
        put("total_trades", total_trades);
        put("winning_trades", won);
        put("losing_trades", num("trades", "lost.total"));
        put(
            "win_rate",
            match (won, total_trades) {
                (Some(w), Some(t)) if t > 0.0 => Some(w / t),
                _ => None,
            },
        );
        put("avg_win", num("trades", "won.pnl.average"));
        put("avg_loss", num("trades", "lost.pnl.average"));

        put("final_value", Some(raw.final_value));
        put("time_return", series_mean("time_return"));
        put("time_drawdown", num("time_drawdown", "maxdrawdown"));

        let analyzers = Value::Object(
            raw.analyzers
                .iter()
                .map(|(name, value)| (name.clone(), to_json(value)))
                .collect(),
        );
        PerformanceReport { metrics, analyzers }
    }
}

/// A ratio the engine reported, if it is usable.
pub fn accepted_ratio(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && v.abs() > RATIO_EPSILON)
}

/// `ret / risk` when both are present and the risk is non-zero.
pub fn ratio_fallback(ret: Option<f64>, risk: Option<f64>) -> Option<f64> {
    match (ret, risk) {
        (Some(r), Some(k)) if k != 0.0 && r.is_finite() && k.is_finite() => Some(r / k),
        _ => None,
    }
}

fn time_keyed_values(value: &RawValue) -> Vec<f64> {
    match value {
        RawValue::Map(entries) if value.is_time_keyed() => entries
            .iter()
            .filter_map(|(_, v)| v.as_f64())
            .filter(|v| v.is_finite())
            .collect(),
        _ => Vec::new(),
    }
}

fn time_keyed_mean(value: &RawValue) -> Option<f64> {
    let values = time_keyed_values(value);
    (!values.is_empty()).then(|| mean(&values))
}

pub fn format_time(t: &NaiveDateTime) -> String {
    if t.hour() == 0 && t.minute() == 0 && t.second() == 0 {
        t.format(DATE_FORMAT).to_string()
    } else {
        t.format(TIME_FORMAT).to_string()
    }
}

/// Recursive conversion to JSON. Time-keyed maps collapse to their mean.
fn to_json(value: &RawValue) -> Value {
    match value {
        RawValue::Number(v) => serde_json::Number::from_f64(*v).map_or(Value::Null, Value::Number),
        RawValue::Text(s) => Value::String(s.clone()),
        RawValue::Bool(b) => Value::Bool(*b),
        RawValue::Null => Value::Null,
        RawValue::Time(t) => Value::String(format_time(t)),
        RawValue::List(items) => Value::Array(items.iter().map(to_json).collect()),
        RawValue::Map(_) if value.is_time_keyed() => {
            time_keyed_mean(value).map_or(Value::Null, |m| json!(m))
        }
        RawValue::Map(entries) => {
            let mut out = Map::new();
            for (k, v) in entries {
                let key = match k {
                    RawKey::Text(s) => s.clone(),
                    RawKey::Time(t) => format_time(t),
                };
                out.entry(key).or_insert_with(|| to_json(v));
            }
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn time_map(points: &[(NaiveDateTime, f64)]) -> RawValue {
        RawValue::Map(
            points
                .iter()
                .map(|(t, v)| (RawKey::Time(*t), RawValue::Number(*v)))
                .collect(),
        )
    }

    fn raw(analyzers: Vec<(&str, RawValue)>) -> RawEngineOutput {
        RawEngineOutput {
            analyzers: analyzers
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            initial_value: 100_000.0,
            final_value: 110_000.0,
        }
    }

    #[test]
    fn time_keyed_series_reduce_to_mean() {
        let out = raw(vec![(
            "time_return",
            time_map(&[(at(2024, 1, 2, 0), 0.25), (at(2024, 1, 3, 0), 0.75)]),
        )]);
        let report = MetricsNormalizer::new().normalize(&out);
        assert_eq!(report.metric("time_return"), Some(0.5));
        assert_eq!(report.analyzers["time_return"], json!(0.5));
    }

    #[test]
    fn zero_ratio_falls_back_to_return_over_risk() {
        let returns = [(at(2024, 1, 2, 0), 0.01), (at(2024, 1, 3, 0), -0.01), (at(2024, 1, 4, 0), 0.02)];
        let out = raw(vec![
            ("sharpe", RawValue::map([("sharperatio", RawValue::Number(0.0))])),
            ("annual_return", time_map(&[(at(2024, 1, 1, 0), 0.12)])),
            ("time_return", time_map(&returns)),
        ]);
        let report = MetricsNormalizer::new().normalize(&out);

        let values: Vec<f64> = returns.iter().map(|(_, v)| *v).collect();
        let vol = std_dev(&values) * PERIODS_PER_YEAR.sqrt();
        assert!((report.metric("sharpe_ratio").unwrap() - 0.12 / vol).abs() < 1e-12);
    }

    #[test]
    fn small_or_nan_ratio_without_inputs_stays_absent() {
        let out = raw(vec![
            ("sharpe", RawValue::map([("sharperatio", RawValue::Number(0.0005))])),
            ("sqn", RawValue::map([("sqn", RawValue::Number(f64::NAN))])),
            ("vwr", RawValue::map([("vwr", RawValue::Number(1.5))])),
        ]);
        let report = MetricsNormalizer::new().normalize(&out);
        assert_eq!(report.metric("sharpe_ratio"), None);
        assert_eq!(report.metric("sqn"), None);
        assert_eq!(report.metric("vwr"), Some(1.5));
        assert_eq!(report.analyzers["sqn"]["sqn"], Value::Null);
    }

    #[test]
    fn zero_risk_leaves_ratio_absent() {
        assert_eq!(ratio_fallback(Some(0.1), Some(0.0)), None);
        assert_eq!(ratio_fallback(None, Some(0.2)), None);
        assert_eq!(ratio_fallback(Some(0.1), Some(0.2)), Some(0.5));
    }

    #[test]
    fn total_return_and_drawdown() {
        let out = raw(vec![
            ("returns", RawValue::map([("rtot", RawValue::Number(0.1f64.ln_1p()))])),
            (
                "drawdown",
                RawValue::map([(
                    "max",
                    RawValue::map([
                        ("drawdown", RawValue::Number(12.5)),
                        ("moneydown", RawValue::Number(1500.0)),
                    ]),
                )]),
            ),
        ]);
        let report = MetricsNormalizer::new().normalize(&out);
        assert!((report.metric("total_return").unwrap() - 0.1).abs() < 1e-12);
        assert!((report.metric("total_return_pct").unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(report.metric("max_drawdown"), Some(0.125));
        assert_eq!(report.metric("max_drawdown_money"), Some(1500.0));
        assert_eq!(report.metric("final_value"), Some(110_000.0));
    }

    #[test]
    fn total_return_recomputed_without_returns_analyzer() {
        let report = MetricsNormalizer::new().normalize(&raw(vec![]));
        assert!((report.metric("total_return").unwrap() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn trade_counts_and_win_rate() {
        let out = raw(vec![(
            "trades",
            RawValue::map([
                ("total", RawValue::map([("total", RawValue::Number(4.0))])),
                (
                    "won",
                    RawValue::map([
                        ("total", RawValue::Number(3.0)),
                        ("pnl", RawValue::map([("average", RawValue::Number(200.0))])),
                    ]),
                ),
                (
                    "lost",
                    RawValue::map([
                        ("total", RawValue::Number(1.0)),
                        ("pnl", RawValue::map([("average", RawValue::Number(-50.0))])),
                    ]),
                ),
            ]),
        )]);
        let report = MetricsNormalizer::new().normalize(&out);
        assert_eq!(report.metric("total_trades"), Some(4.0));
        assert_eq!(report.metric("win_rate"), Some(0.75));
        assert_eq!(report.metric("avg_win"), Some(200.0));
        assert_eq!(report.metric("avg_loss"), Some(-50.0));
    }

    #[test]
    fn nested_time_markers_become_strings() {
        let out = raw(vec![(
            "custom",
            RawValue::map([
                ("opened", RawValue::Time(at(2024, 3, 1, 0))),
                (
                    "events",
                    RawValue::List(vec![RawValue::map([("at", RawValue::Time(at(2024, 3, 1, 15)))])]),
                ),
            ]),
        )]);
        let report = MetricsNormalizer::new().normalize(&out);
        assert_eq!(report.analyzers["custom"]["opened"], json!("2024-03-01"));
        assert_eq!(
            report.analyzers["custom"]["events"][0]["at"],
            json!("2024-03-01 15:00:00")
        );
    }

    proptest! {
        #[test]
        fn engine_output_normalizes_to_finite_plain_values(
            equity in proptest::collection::vec(50_000.0f64..200_000.0, 2..120),
        ) {
            use factorlab_core::engine::analyzers::build_all;

            let start = NaiveDate::from_ymd_opt(2023, 12, 1).unwrap();
            let times: Vec<NaiveDateTime> = (0..equity.len())
                .map(|i| (start + chrono::Duration::days(i as i64)).and_hms_opt(0, 0, 0).unwrap())
                .collect();
            let out = RawEngineOutput {
                analyzers: build_all(100_000.0, &times, &equity, &[], 0),
                initial_value: 100_000.0,
                final_value: *equity.last().unwrap(),
            };
            let n = MetricsNormalizer::new();
            let report = n.normalize(&out);

            prop_assert!(report.metrics.values().all(|v| v.is_finite()));
            prop_assert!(report.metric("total_return").is_some());
            prop_assert!(report.metric("max_drawdown").is_some_and(|d| (0.0..=1.0).contains(&d)));
            prop_assert!(report.analyzers["time_return"].is_number());
            prop_assert_eq!(report, n.normalize(&out));
        }
    }

    #[test]
    fn normalize_is_idempotent() {
        let out = raw(vec![
            ("sharpe", RawValue::map([("sharperatio", RawValue::Number(1.2))])),
            ("time_return", time_map(&[(at(2024, 1, 2, 0), 0.01), (at(2024, 1, 3, 0), 0.02)])),
        ]);
        let n = MetricsNormalizer::new();
        let first = n.normalize(&out);
        let second = n.normalize(&out);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
