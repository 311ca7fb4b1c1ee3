//! Numeric kernels shared by range functions and vector aggregations.

use std::time::Duration;

use crate::model::Point;
use crate::syntax::RangeOp;

/// Kahan summation increment with Neumaier improvement (1974).
///
/// Returns (new_sum, new_compensation).
#[inline(never)]
// Do NOT inline: compiler reordering of the float operations loses the
// compensation term.
pub(crate) fn kahan_inc(inc: f64, sum: f64, c: f64) -> (f64, f64) {
    let t = sum + inc;

    let new_c = if t.is_infinite() {
        0.0
    } else if sum.abs() >= inc.abs() {
        c + ((sum - t) + inc)
    } else {
        c + ((inc - t) + sum)
    };

    (t, new_c)
}

pub(crate) fn sum_kahan(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut c = 0.0;
    for &v in values {
        (sum, c) = kahan_inc(v, sum, c);
    }
    if sum.is_infinite() { sum } else { sum + c }
}

/// Mean with Kahan summation, switching to an incremental mean once the
/// running sum overflows.
pub(crate) fn avg_kahan(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    if values.len() == 1 {
        return values[0];
    }

    let mut sum = values[0];
    let mut c = 0.0;
    let mut mean = 0.0;
    let mut incremental = false;

    for (i, &v) in values.iter().enumerate().skip(1) {
        let count = (i + 1) as f64;

        if !incremental {
            let (new_sum, new_c) = kahan_inc(v, sum, c);
            if !new_sum.is_infinite() {
                sum = new_sum;
                c = new_c;
                continue;
            }

            incremental = true;
            mean = sum / (count - 1.0);
            c /= count - 1.0;
        }

        let q = (count - 1.0) / count;
        (mean, c) = kahan_inc(v / count, q * mean, q * c);
    }

    if incremental {
        mean + c
    } else {
        let count = values.len() as f64;
        sum / count + c / count
    }
}

/// Population variance using Welford's algorithm with compensated updates
/// of both the running mean and M2.
///
/// Empty input is NaN, a single value is 0, and NaN inputs propagate.
pub(crate) fn variance_kahan(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }

    let mut count = 0.0;
    let mut mean = 0.0;
    let mut c_mean = 0.0;
    let mut m2 = 0.0;
    let mut c_m2 = 0.0;

    for &v in values {
        count += 1.0;
        let delta = v - (mean + c_mean);
        (mean, c_mean) = kahan_inc(delta / count, mean, c_mean);
        let new_delta = v - (mean + c_mean);
        (m2, c_m2) = kahan_inc(delta * new_delta, m2, c_m2);
    }

    (m2 + c_m2) / count
}

// min/max: a real value replaces NaN, all-NaN input stays NaN. A fold from
// ±inf would turn all-NaN input into ±inf.

pub(crate) fn min_value(values: &[f64]) -> f64 {
    let mut min = values.first().copied().unwrap_or(f64::NAN);
    for &v in values.iter().skip(1) {
        if v < min || min.is_nan() {
            min = v;
        }
    }
    min
}

pub(crate) fn max_value(values: &[f64]) -> f64 {
    let mut max = values.first().copied().unwrap_or(f64::NAN);
    for &v in values.iter().skip(1) {
        if v > max || max.is_nan() {
            max = v;
        }
    }
    max
}

/// φ-quantile with linear interpolation between closest ranks.
pub(crate) fn quantile(q: f64, values: &[f64]) -> f64 {
    if values.is_empty() || q.is_nan() {
        return f64::NAN;
    }
    if q < 0.0 {
        return f64::NEG_INFINITY;
    }
    if q > 1.0 {
        return f64::INFINITY;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len() as f64;
    let rank = q * (n - 1.0);
    let lower = rank.floor().max(0.0) as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let weight = rank - rank.floor();
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Counter increase across the window. A decrease is a reset and the value
/// before it is added back.
pub(crate) fn counter_increase(points: &[Point]) -> f64 {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return 0.0;
    };
    let mut increase = last.value - first.value;
    for pair in points.windows(2) {
        if pair[1].value < pair[0].value {
            increase += pair[0].value;
        }
    }
    increase
}

/// Reduces the samples of one series inside one window to a single value.
pub(crate) trait RangeFunction: Send + Sync {
    /// `points` is never empty and is ordered by timestamp.
    fn apply(&self, points: &[Point]) -> f64;
}

struct CountOverTime;

impl RangeFunction for CountOverTime {
    fn apply(&self, points: &[Point]) -> f64 {
        points.len() as f64
    }
}

/// Sum of the extracted values, optionally divided by the window length.
/// Covers bytes_over_time, bytes_rate, sum_over_time and rate over
/// unwrapped values.
struct SumOverTime {
    per_second: Option<f64>,
}

impl RangeFunction for SumOverTime {
    fn apply(&self, points: &[Point]) -> f64 {
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let sum = sum_kahan(&values);
        match self.per_second {
            Some(secs) => sum / secs,
            None => sum,
        }
    }
}

/// Log lines per second.
struct RateLogs {
    secs: f64,
}

impl RangeFunction for RateLogs {
    fn apply(&self, points: &[Point]) -> f64 {
        points.len() as f64 / self.secs
    }
}

struct RateCounter {
    secs: f64,
}

impl RangeFunction for RateCounter {
    fn apply(&self, points: &[Point]) -> f64 {
        counter_increase(points) / self.secs
    }
}

struct FirstOverTime;

impl RangeFunction for FirstOverTime {
    fn apply(&self, points: &[Point]) -> f64 {
        points.first().map_or(f64::NAN, |p| p.value)
    }
}

struct LastOverTime;

impl RangeFunction for LastOverTime {
    fn apply(&self, points: &[Point]) -> f64 {
        points.last().map_or(f64::NAN, |p| p.value)
    }
}

/// Functions that only look at the values, not their timestamps.
struct ValuesOverTime(fn(&[f64]) -> f64);

impl RangeFunction for ValuesOverTime {
    fn apply(&self, points: &[Point]) -> f64 {
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        (self.0)(&values)
    }
}

struct QuantileOverTime {
    q: f64,
}

impl RangeFunction for QuantileOverTime {
    fn apply(&self, points: &[Point]) -> f64 {
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        quantile(self.q, &values)
    }
}

/// Picks the reducer for a range aggregation.
///
/// Returns `None` for `absent_over_time`, which has no per-series value.
pub(crate) fn range_function(
    op: RangeOp,
    range: Duration,
    unwrapped: bool,
    param: Option<f64>,
) -> Option<Box<dyn RangeFunction>> {
    let secs = range.as_secs_f64();
    let f: Box<dyn RangeFunction> = match op {
        RangeOp::CountOverTime => Box::new(CountOverTime),
        RangeOp::Rate if unwrapped => Box::new(SumOverTime {
            per_second: Some(secs),
        }),
        RangeOp::Rate => Box::new(RateLogs { secs }),
        RangeOp::RateCounter => Box::new(RateCounter { secs }),
        RangeOp::BytesOverTime | RangeOp::SumOverTime => {
            Box::new(SumOverTime { per_second: None })
        }
        RangeOp::BytesRate => Box::new(SumOverTime {
            per_second: Some(secs),
        }),
        RangeOp::FirstOverTime => Box::new(FirstOverTime),
        RangeOp::LastOverTime => Box::new(LastOverTime),
        RangeOp::AvgOverTime => Box::new(ValuesOverTime(avg_kahan)),
        RangeOp::MinOverTime => Box::new(ValuesOverTime(min_value)),
        RangeOp::MaxOverTime => Box::new(ValuesOverTime(max_value)),
        RangeOp::StddevOverTime => Box::new(ValuesOverTime(|v| variance_kahan(v).sqrt())),
        RangeOp::StdvarOverTime => Box::new(ValuesOverTime(variance_kahan)),
        RangeOp::QuantileOverTime => Box::new(QuantileOverTime {
            q: param.unwrap_or(f64::NAN),
        }),
        RangeOp::AbsentOverTime => return None,
    };
    Some(f)
}
