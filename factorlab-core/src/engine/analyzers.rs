//! Pure post-run analyzers over the equity curve and closed trades.
//!
//! The values are reported the way common event-driven engines report them
//! (log total return, drawdown in percent, time-keyed return series), then
//! wrapped into `RawValue` trees. Reducing them to a stable report is the
//! normalizer's job, not this module's.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime};

use super::broker::ClosedTrade;
use super::raw::{RawKey, RawValue};

pub const PERIODS_PER_YEAR: f64 = 252.0;

const VWR_SDEV_MAX: f64 = 0.20;
const VWR_TAU: f64 = 2.0;

// ─── Helpers ────────────────────────────────────────────────────────

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (N - 1).
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Per-step returns; the first step is measured against the starting value.
pub fn period_returns(initial: f64, equity: &[f64]) -> Vec<f64> {
    let mut prev = initial;
    equity
        .iter()
        .map(|&v| {
            let r = if prev > 0.0 { v / prev - 1.0 } else { 0.0 };
            prev = v;
            r
        })
        .collect()
}

// ─── Individual analyzers ───────────────────────────────────────────

/// Annualized Sharpe ratio (zero risk-free rate). `None` if undefined.
pub fn sharpe_ratio(returns: &[f64]) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let sd = std_dev(returns);
    if sd < 1e-15 {
        return None;
    }
    Some(mean(returns) / sd * PERIODS_PER_YEAR.sqrt())
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DrawdownStats {
    /// Percent below the running peak at the last step.
    pub drawdown: f64,
    pub moneydown: f64,
    pub len: usize,
    pub max_drawdown: f64,
    pub max_moneydown: f64,
    pub max_len: usize,
}

/// Drawdown against the running peak, starting from `initial`. Percent values.
pub fn drawdown(initial: f64, equity: &[f64]) -> DrawdownStats {
    let mut stats = DrawdownStats::default();
    let mut peak = initial;
    for &v in equity {
        if v >= peak {
            peak = v;
            stats.len = 0;
        } else {
            stats.len += 1;
        }
        stats.moneydown = peak - v;
        stats.drawdown = if peak > 0.0 { 100.0 * stats.moneydown / peak } else { 0.0 };
        stats.max_drawdown = stats.max_drawdown.max(stats.drawdown);
        stats.max_moneydown = stats.max_moneydown.max(stats.moneydown);
        stats.max_len = stats.max_len.max(stats.len);
    }
    stats
}

/// System quality number: sqrt(n) * mean(pnl) / std(pnl) over closed trades.
pub fn sqn(trades: &[ClosedTrade]) -> Option<f64> {
    let pnl: Vec<f64> = trades.iter().map(|t| t.pnl_net).collect();
    if pnl.len() < 2 {
        return None;
    }
    let sd = std_dev(&pnl);
    if sd < 1e-15 {
        return None;
    }
    Some((pnl.len() as f64).sqrt() * mean(&pnl) / sd)
}

/// Variability-weighted return: annualized return penalized by the deviation
/// of the equity curve from a constant-growth path.
pub fn vwr(initial: f64, equity: &[f64]) -> Option<f64> {
    let last = *equity.last()?;
    if equity.len() < 2 || initial <= 0.0 || last <= 0.0 {
        return None;
    }
    let n = equity.len() as f64;
    let ravg = (last / initial).ln() / n;
    let rnorm100 = ((ravg * PERIODS_PER_YEAR).exp() - 1.0) * 100.0;
    let deviations: Vec<f64> = equity
        .iter()
        .enumerate()
        .map(|(i, &v)| v / (initial * (ravg * (i + 1) as f64).exp()) - 1.0)
        .collect();
    let sdev = std_dev(&deviations);
    Some(rnorm100 * (1.0 - (sdev / VWR_SDEV_MAX).powf(VWR_TAU)))
}

/// Return per calendar year, measured from the previous year's last value.
pub fn annual_returns(initial: f64, times: &[NaiveDateTime], equity: &[f64]) -> Vec<(i32, f64)> {
    let mut out: Vec<(i32, f64)> = Vec::new();
    let mut base = initial;
    let mut year_end: Option<(i32, f64)> = None;
    for (t, &v) in times.iter().zip(equity) {
        match year_end {
            Some((y, last)) if y != t.year() => {
                out.push((y, if base > 0.0 { last / base - 1.0 } else { 0.0 }));
                base = last;
            }
            _ => {}
        }
        year_end = Some((t.year(), v));
    }
    if let Some((y, last)) = year_end {
        out.push((y, if base > 0.0 { last / base - 1.0 } else { 0.0 }));
    }
    out
}

// ─── Raw analyzer trees ─────────────────────────────────────────────

fn opt(v: Option<f64>) -> RawValue {
    v.map_or(RawValue::Null, RawValue::number)
}

fn pnl_block(pnls: &[f64]) -> RawValue {
    let total: f64 = pnls.iter().sum();
    RawValue::map([
        ("total", RawValue::number(total)),
        (
            "average",
            if pnls.is_empty() {
                RawValue::Null
            } else {
                RawValue::number(total / pnls.len() as f64)
            },
        ),
        ("max", opt(pnls.iter().copied().reduce(f64::max))),
    ])
}

fn trades_tree(trades: &[ClosedTrade], open: usize) -> RawValue {
    let won: Vec<f64> = trades.iter().filter(|t| t.pnl_net > 0.0).map(|t| t.pnl_net).collect();
    let lost: Vec<f64> = trades.iter().filter(|t| t.pnl_net <= 0.0).map(|t| t.pnl_net).collect();
    let net: Vec<f64> = trades.iter().map(|t| t.pnl_net).collect();
    let gross: Vec<f64> = trades.iter().map(|t| t.pnl).collect();
    let lens: Vec<f64> = trades.iter().map(|t| t.bars_held as f64).collect();

    RawValue::map([
        (
            "total",
            RawValue::map([
                ("total", RawValue::Number((trades.len() + open) as f64)),
                ("open", RawValue::Number(open as f64)),
                ("closed", RawValue::Number(trades.len() as f64)),
            ]),
        ),
        (
            "won",
            RawValue::map([
                ("total", RawValue::Number(won.len() as f64)),
                ("pnl", pnl_block(&won)),
            ]),
        ),
        (
            "lost",
            RawValue::map([
                ("total", RawValue::Number(lost.len() as f64)),
                ("pnl", pnl_block(&lost)),
            ]),
        ),
        (
            "pnl",
            RawValue::map([("gross", pnl_block(&gross)), ("net", pnl_block(&net))]),
        ),
        (
            "len",
            RawValue::map([(
                "average",
                if lens.is_empty() {
                    RawValue::Null
                } else {
                    RawValue::number(mean(&lens))
                },
            )]),
        ),
    ])
}

fn year_marker(year: i32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Build every analyzer for one finished run.
pub fn build_all(
    initial: f64,
    times: &[NaiveDateTime],
    equity: &[f64],
    trades: &[ClosedTrade],
    open_trades: usize,
) -> BTreeMap<String, RawValue> {
    let returns = period_returns(initial, equity);
    let final_value = equity.last().copied().unwrap_or(initial);
    let n = equity.len().max(1) as f64;
    let rtot = if initial > 0.0 && final_value > 0.0 {
        Some((final_value / initial).ln())
    } else {
        None
    };
    let ravg = rtot.map(|r| r / n);
    let rnorm = ravg.map(|r| (r * PERIODS_PER_YEAR).exp() - 1.0);
    let dd = drawdown(initial, equity);

    let mut out = BTreeMap::new();
    out.insert(
        "returns".to_string(),
        RawValue::map([
            ("rtot", opt(rtot)),
            ("ravg", opt(ravg)),
            ("rnorm", opt(rnorm)),
            ("rnorm100", opt(rnorm.map(|r| r * 100.0))),
        ]),
    );
    out.insert(
        "sharpe".to_string(),
        RawValue::map([("sharperatio", opt(sharpe_ratio(&returns)))]),
    );
    out.insert(
        "drawdown".to_string(),
        RawValue::map([
            ("len", RawValue::Number(dd.len as f64)),
            ("drawdown", RawValue::number(dd.drawdown)),
            ("moneydown", RawValue::number(dd.moneydown)),
            (
                "max",
                RawValue::map([
                    ("len", RawValue::Number(dd.max_len as f64)),
                    ("drawdown", RawValue::number(dd.max_drawdown)),
                    ("moneydown", RawValue::number(dd.max_moneydown)),
                ]),
            ),
        ]),
    );
    out.insert(
        "time_drawdown".to_string(),
        RawValue::map([
            ("drawdown", RawValue::number(dd.drawdown)),
            ("maxdrawdown", RawValue::number(dd.max_drawdown)),
            ("maxdrawdownperiod", RawValue::Number(dd.max_len as f64)),
        ]),
    );
    out.insert("trades".to_string(), trades_tree(trades, open_trades));
    out.insert(
        "sqn".to_string(),
        RawValue::map([
            ("sqn", opt(sqn(trades))),
            ("trades", RawValue::Number(trades.len() as f64)),
        ]),
    );
    out.insert(
        "vwr".to_string(),
        RawValue::map([("vwr", opt(vwr(initial, equity)))]),
    );
    out.insert(
        "time_return".to_string(),
        RawValue::Map(
            times
                .iter()
                .zip(&returns)
                .map(|(t, r)| (RawKey::Time(*t), RawValue::number(*r)))
                .collect(),
        ),
    );
    out.insert(
        "annual_return".to_string(),
        RawValue::Map(
            annual_returns(initial, times, equity)
                .into_iter()
                .filter_map(|(y, r)| Some((RawKey::Time(year_marker(y)?), RawValue::number(r))))
                .collect(),
        ),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::{assert_approx, DEFAULT_EPSILON};

    fn day(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn trade(pnl_net: f64) -> ClosedTrade {
        ClosedTrade {
            feed: 0,
            opened: day(2024, 1, 2),
            closed: day(2024, 1, 5),
            bars_held: 3,
            pnl: pnl_net,
            pnl_net,
        }
    }

    #[test]
    fn drawdown_tracks_peak() {
        let dd = drawdown(100.0, &[110.0, 99.0, 104.5, 120.0]);
        assert_approx(dd.max_drawdown, 10.0, 1e-9);
        assert_approx(dd.max_moneydown, 11.0, 1e-9);
        assert_eq!(dd.max_len, 2);
        assert_eq!(dd.len, 0);
        assert_approx(dd.drawdown, 0.0, DEFAULT_EPSILON);
    }

    #[test]
    fn sharpe_undefined_for_flat_curve() {
        assert_eq!(sharpe_ratio(&[0.0, 0.0, 0.0]), None);
        assert!(sharpe_ratio(&[0.01, 0.02, 0.0]).unwrap() > 0.0);
    }

    #[test]
    fn sqn_needs_two_trades() {
        assert_eq!(sqn(&[trade(5.0)]), None);
        let s = sqn(&[trade(10.0), trade(-5.0), trade(20.0)]).unwrap();
        assert!(s > 0.0);
    }

    #[test]
    fn annual_returns_chain_year_ends() {
        let times = [day(2023, 12, 29), day(2024, 1, 2), day(2024, 6, 3)];
        let out = annual_returns(100.0, &times, &[110.0, 110.0, 121.0]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].0, 2023);
        assert_approx(out[0].1, 0.10, 1e-12);
        assert_eq!(out[1].0, 2024);
        assert_approx(out[1].1, 0.10, 1e-12);
    }

    #[test]
    fn vwr_equals_normalized_return_on_constant_growth() {
        let equity: Vec<f64> = (1..=10).map(|i| 100.0 * 1.001f64.powi(i)).collect();
        let v = vwr(100.0, &equity).unwrap();
        let expected = ((1.001f64.ln() * PERIODS_PER_YEAR).exp() - 1.0) * 100.0;
        assert_approx(v, expected, 1e-6);
    }

    #[test]
    fn analyzer_tree_shape() {
        let times = [day(2024, 1, 2), day(2024, 1, 3)];
        let all = build_all(100.0, &times, &[101.0, 102.0], &[trade(2.0)], 0);
        assert!(all["time_return"].is_time_keyed());
        assert!(all["annual_return"].is_time_keyed());
        assert_eq!(all["trades"].path("total.closed").and_then(RawValue::as_f64), Some(1.0));
        assert_eq!(all["trades"].path("won.total").and_then(RawValue::as_f64), Some(1.0));
        assert_eq!(all["drawdown"].path("max.drawdown").and_then(RawValue::as_f64), Some(0.0));
        assert_eq!(all["sqn"].get("sqn"), Some(&RawValue::Null));
    }
}
