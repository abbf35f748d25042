//! Rolling-window kernels shared by the factor classes.
//!
//! All kernels take a slice and return a vector of the same length, with
//! `f64::NAN` during warmup and wherever the window touches a NaN input.

/// Simple moving average. First valid value at index `period - 1`.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }

    let mut sum = 0.0;
    let mut nan_count = 0usize;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            nan_count += 1;
        } else {
            sum += v;
        }
        if i >= period {
            let leaving = values[i - period];
            if leaving.is_nan() {
                nan_count -= 1;
            } else {
                sum -= leaving;
            }
        }
        if i + 1 >= period && nan_count == 0 {
            result[i] = sum / period as f64;
        }
    }
    result
}

/// Exponential moving average, alpha = 2 / (period + 1), seeded with the SMA
/// of the first `period` values. A NaN after the seed taints the rest.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    smoothed(values, period, 2.0 / (period as f64 + 1.0))
}

/// Wilder smoothing, alpha = 1 / period, seeded like `ema`.
pub fn wilder(values: &[f64], period: usize) -> Vec<f64> {
    smoothed(values, period, 1.0 / period.max(1) as f64)
}

fn smoothed(values: &[f64], period: usize, alpha: f64) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }

    let seed_window = &values[..period];
    if seed_window.iter().any(|v| v.is_nan()) {
        return result;
    }
    let seed = seed_window.iter().sum::<f64>() / period as f64;
    result[period - 1] = seed;

    let mut prev = seed;
    for i in period..n {
        if values[i].is_nan() {
            return result;
        }
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = prev;
    }
    result
}

/// Apply `kernel` to the series after skipping its leading NaNs.
///
/// Used for second-order series (e.g. the MACD signal line) whose input has a
/// NaN warmup prefix of its own.
pub fn after_warmup(values: &[f64], period: usize, kernel: fn(&[f64], usize) -> Vec<f64>) -> Vec<f64> {
    let n = values.len();
    let Some(first) = values.iter().position(|v| !v.is_nan()) else {
        return vec![f64::NAN; n];
    };
    let mut result = vec![f64::NAN; first];
    result.extend(kernel(&values[first..], period));
    result
}

/// Population standard deviation over a rolling window.
pub fn rolling_std(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }
    for i in (period - 1)..n {
        let window = &values[i + 1 - period..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        let mean = window.iter().sum::<f64>() / period as f64;
        let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
        result[i] = var.sqrt();
    }
    result
}

/// Simple returns: r[t] = x[t] / x[t-1] - 1. r[0] is NaN.
pub fn pct_change(values: &[f64], lag: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    for i in lag.max(1)..n {
        let prev = values[i - lag.max(1)];
        let curr = values[i];
        if prev.is_nan() || curr.is_nan() || prev == 0.0 {
            continue;
        }
        result[i] = curr / prev - 1.0;
    }
    result
}

/// True range. TR[0] is NaN (no previous close).
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let n = close.len().min(high.len()).min(low.len());
    let mut tr = vec![f64::NAN; close.len()];
    for i in 1..n {
        let (h, l, pc) = (high[i], low[i], close[i - 1]);
        if h.is_nan() || l.is_nan() || pc.is_nan() {
            continue;
        }
        tr[i] = (h - l).max((h - pc).abs()).max((l - pc).abs());
    }
    tr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::{assert_approx, DEFAULT_EPSILON};
    use proptest::prelude::*;

    #[test]
    fn sma_known_values() {
        let r = sma(&[10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0], 5);
        assert!(r[..4].iter().all(|v| v.is_nan()));
        assert_approx(r[4], 12.0, DEFAULT_EPSILON);
        assert_approx(r[6], 14.0, DEFAULT_EPSILON);
    }

    #[test]
    fn sma_nan_window_recovers() {
        let r = sma(&[10.0, 11.0, f64::NAN, 13.0, 14.0, 15.0], 3);
        assert!(r[2].is_nan() && r[3].is_nan() && r[4].is_nan());
        assert_approx(r[5], 14.0, DEFAULT_EPSILON);
    }

    #[test]
    fn ema_known_values() {
        // alpha = 0.5, seed = mean(10, 11, 12) = 11
        let r = ema(&[10.0, 11.0, 12.0, 13.0, 14.0], 3);
        assert_approx(r[2], 11.0, DEFAULT_EPSILON);
        assert_approx(r[3], 12.0, DEFAULT_EPSILON);
        assert_approx(r[4], 13.0, DEFAULT_EPSILON);
    }

    #[test]
    fn ema_nan_after_seed_taints_rest() {
        let r = ema(&[10.0, 11.0, 12.0, f64::NAN, 14.0], 3);
        assert_approx(r[2], 11.0, DEFAULT_EPSILON);
        assert!(r[3].is_nan() && r[4].is_nan());
    }

    #[test]
    fn after_warmup_skips_prefix() {
        let r = after_warmup(&[f64::NAN, f64::NAN, 1.0, 2.0, 3.0], 2, sma);
        assert!(r[..3].iter().all(|v| v.is_nan()));
        assert_approx(r[3], 1.5, DEFAULT_EPSILON);
        assert_approx(r[4], 2.5, DEFAULT_EPSILON);
    }

    #[test]
    fn rolling_std_is_population() {
        let r = rolling_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 8);
        assert_approx(r[7], 2.0, DEFAULT_EPSILON);
    }

    #[test]
    fn true_range_uses_previous_close() {
        let tr = true_range(&[10.0, 12.0], &[9.0, 11.5], &[9.5, 11.8]);
        assert!(tr[0].is_nan());
        // max(0.5, |12 - 9.5|, |11.5 - 9.5|) = 2.5
        assert_approx(tr[1], 2.5, DEFAULT_EPSILON);
    }

    proptest! {
        #[test]
        fn kernels_preserve_length(values in proptest::collection::vec(1.0f64..1000.0, 0..80), period in 1usize..30) {
            prop_assert_eq!(sma(&values, period).len(), values.len());
            prop_assert_eq!(ema(&values, period).len(), values.len());
            prop_assert_eq!(wilder(&values, period).len(), values.len());
            prop_assert_eq!(rolling_std(&values, period).len(), values.len());
        }

        #[test]
        fn sma_has_no_lookahead(values in proptest::collection::vec(1.0f64..1000.0, 2..80), period in 1usize..20, cut in 1usize..80) {
            let cut = cut.min(values.len());
            let full = sma(&values, period);
            let truncated = sma(&values[..cut], period);
            for i in 0..cut {
                prop_assert!(
                    (full[i].is_nan() && truncated[i].is_nan()) || (full[i] - truncated[i]).abs() < 1e-9
                );
            }
        }
    }
}
