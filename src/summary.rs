//! Summaries of pooled attribute values.
//!
//! Values gathered for one attribute across a cluster are either continuous
//! measurements (numbers or previously summarized `mean ± std` records) or
//! categorical labels. [`summarize`] picks the continuous path when every
//! present value loads as [`Continuous`], otherwise it tallies the values with
//! [`Categorical`].

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value, json};

use crate::constants::aggregate::{
    CONTINUOUS_MEAN_KEY, CONTINUOUS_N_MISSING_KEY, CONTINUOUS_N_OBSERVATIONS_KEY,
    CONTINUOUS_STD_KEY, TALLY_COUNT_KEY, TALLY_VALUE_KEY,
};

static CONTINUOUS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+) ± (\S+) \(n = (\d+), (\d+) missing\)$")
        .expect("continuous summary pattern is valid")
});

/// Summary statistics of a continuous measurement.
#[derive(Clone, Copy, Debug)]
pub struct Continuous {
    /// Mean, NaN when every value is missing.
    pub mean: f64,
    /// Standard deviation, NaN for a single observation.
    pub std: f64,
    /// Number of values pooled, missing ones included.
    pub n_observations: u64,
    /// Number of missing values.
    pub n_missing: u64,
}

impl Continuous {
    /// Interpret `value` as a continuous measurement.
    ///
    /// Accepts plain numbers, objects with `mean`, `std`, `n_observations`
    /// and `n_missing` (a null `std` reads as NaN) and the rendered string
    /// form. Booleans and everything else return `None`.
    pub fn load(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_f64().map(Self::observation),
            Value::Object(fields) => Self::from_fields(fields),
            Value::String(text) => Self::parse(text),
            _ => None,
        }
    }

    fn observation(value: f64) -> Self {
        if value.is_finite() {
            Self {
                mean: value,
                std: f64::NAN,
                n_observations: 1,
                n_missing: 0,
            }
        } else {
            Self {
                mean: f64::NAN,
                std: f64::NAN,
                n_observations: 0,
                n_missing: 1,
            }
        }
    }

    fn from_fields(fields: &Map<String, Value>) -> Option<Self> {
        let mean = fields.get(CONTINUOUS_MEAN_KEY)?.as_f64()?;
        let std = match fields.get(CONTINUOUS_STD_KEY)? {
            Value::Null => f64::NAN,
            other => other.as_f64()?,
        };
        Some(Self {
            mean,
            std,
            n_observations: fields.get(CONTINUOUS_N_OBSERVATIONS_KEY)?.as_u64()?,
            n_missing: fields.get(CONTINUOUS_N_MISSING_KEY)?.as_u64()?,
        })
    }

    fn parse(text: &str) -> Option<Self> {
        let captures = CONTINUOUS_PATTERN.captures(text)?;
        Some(Self {
            mean: captures[1].parse().ok()?,
            std: captures[2].parse().ok()?,
            n_observations: captures[3].parse().ok()?,
            n_missing: captures[4].parse().ok()?,
        })
    }

    /// JSON object form; a NaN `std` becomes null.
    pub fn to_value(&self) -> Value {
        json!({
            CONTINUOUS_MEAN_KEY: self.mean,
            CONTINUOUS_STD_KEY: self.std,
            CONTINUOUS_N_OBSERVATIONS_KEY: self.n_observations,
            CONTINUOUS_N_MISSING_KEY: self.n_missing,
        })
    }

    /// Pool loaded measurements; `None` entries count as missing.
    ///
    /// Returns null when no finite mean is left and the shared mean when all
    /// means are close. Otherwise the mean and sample standard deviation of
    /// the means.
    pub fn summarize(measurements: &[Option<Continuous>], tolerance: f64) -> Value {
        let means: Vec<f64> = measurements
            .iter()
            .flatten()
            .map(|measurement| measurement.mean)
            .filter(|mean| mean.is_finite())
            .collect();
        let Some(&first) = means.first() else {
            return Value::Null;
        };
        if means.iter().all(|mean| is_close(first, *mean, tolerance)) {
            return json!(first);
        }

        let count = means.len() as f64;
        let mean = means.iter().sum::<f64>() / count;
        let variance = means.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (count - 1.0);
        let total = measurements.len() as u64;
        Continuous {
            mean,
            std: variance.sqrt(),
            n_observations: total,
            n_missing: total - means.len() as u64,
        }
        .to_value()
    }
}

impl fmt::Display for Continuous {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ± {} (n = {}, {} missing)",
            format_scientific(self.mean),
            format_scientific(self.std),
            self.n_observations,
            self.n_missing
        )
    }
}

/// Counts of categorical values, in first-seen order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Categorical {
    counts: Vec<(Value, u64)>,
}

impl Categorical {
    /// Interpret `value` as a tally.
    ///
    /// A non-empty list of `{value, count}` objects is read as an existing
    /// tally; any other value counts once.
    pub fn load(value: &Value) -> Self {
        if let Some(counts) = Self::tally_entries(value) {
            return Self { counts };
        }
        Self {
            counts: vec![(value.clone(), 1)],
        }
    }

    fn tally_entries(value: &Value) -> Option<Vec<(Value, u64)>> {
        let items = value.as_array().filter(|items| !items.is_empty())?;
        items
            .iter()
            .map(|item| {
                let entry = item.as_object()?;
                let value = entry.get(TALLY_VALUE_KEY)?.clone();
                let count = entry.get(TALLY_COUNT_KEY)?.as_u64()?;
                Some((value, count))
            })
            .collect()
    }

    /// Add `count` occurrences of `value`.
    pub fn add(&mut self, value: Value, count: u64) {
        match self.counts.iter_mut().find(|(existing, _)| *existing == value) {
            Some((_, total)) => *total += count,
            None => self.counts.push((value, count)),
        }
    }

    /// Values with their counts.
    pub fn counts(&self) -> &[(Value, u64)] {
        &self.counts
    }

    /// Merge tallies, folding near-equal values into the first one seen.
    ///
    /// A single remaining value is returned bare; otherwise a list of
    /// `{value, count}` objects.
    pub fn summarize(tallies: &[Categorical], tolerance: f64) -> Value {
        let mut merged = Categorical::default();
        for tally in tallies {
            for (value, count) in &tally.counts {
                merged.add(value.clone(), *count);
            }
        }

        let mut seen = vec![false; merged.counts.len()];
        let mut entries: Vec<(Value, u64)> = Vec::new();
        for (i, (value, _)) in merged.counts.iter().enumerate() {
            if seen[i] {
                continue;
            }
            let mut count = 0;
            for (j, (other, other_count)) in merged.counts.iter().enumerate() {
                if !seen[j] && almost_equal(value, other, tolerance) {
                    seen[j] = true;
                    count += other_count;
                }
            }
            entries.push((value.clone(), count));
        }

        if entries.len() == 1 {
            return entries.remove(0).0;
        }
        Value::Array(
            entries
                .into_iter()
                .map(|(value, count)| json!({TALLY_VALUE_KEY: value, TALLY_COUNT_KEY: count}))
                .collect(),
        )
    }
}

/// Summarize values gathered for one attribute; null marks a missing value.
pub fn summarize(values: &[Value], tolerance: f64) -> Value {
    let loaded: Vec<Option<Continuous>> = values.iter().map(Continuous::load).collect();
    let continuous = values
        .iter()
        .zip(&loaded)
        .all(|(value, measurement)| value.is_null() || measurement.is_some());
    if continuous {
        Continuous::summarize(&loaded, tolerance)
    } else {
        let tallies: Vec<Categorical> = values.iter().map(Categorical::load).collect();
        Categorical::summarize(&tallies, tolerance)
    }
}

/// Relative closeness of two floats, like Python's `math.isclose` with no
/// absolute tolerance.
pub fn is_close(a: f64, b: f64, tolerance: f64) -> bool {
    a == b || (a - b).abs() <= tolerance * a.abs().max(b.abs())
}

/// Structural equality with numbers compared by [`is_close`].
pub fn almost_equal(a: &Value, b: &Value, tolerance: f64) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => is_close(x, y, tolerance),
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len()
                && xs.iter().zip(ys).all(|(x, y)| almost_equal(x, y, tolerance))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs.iter().all(|(key, x)| {
                    ys.get(key)
                        .is_some_and(|y| almost_equal(x, y, tolerance))
                })
        }
        _ => a == b,
    }
}

/// Render `value` like Python's `{:e}`: six fraction digits and a signed,
/// two-digit exponent (`1.500000e+00`).
pub fn format_scientific(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let rendered = format!("{value:.6e}");
    let Some((mantissa, exponent)) = rendered.split_once('e') else {
        return rendered;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exponent.abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    #[test]
    fn formats_like_python_scientific() {
        assert_eq!(format_scientific(1.5), "1.500000e+00");
        assert_eq!(format_scientific(0.000123), "1.230000e-04");
        assert_eq!(format_scientific(-2500.0), "-2.500000e+03");
        assert_eq!(format_scientific(f64::NAN), "nan");
    }

    #[test]
    fn continuous_string_form_loads_back() {
        let summary = Continuous {
            mean: 1.5,
            std: 0.5,
            n_observations: 3,
            n_missing: 1,
        };
        let text = summary.to_string();
        assert_eq!(text, "1.500000e+00 ± 5.000000e-01 (n = 3, 1 missing)");
        let loaded = Continuous::load(&Value::String(text)).unwrap();
        assert_eq!(loaded.mean, 1.5);
        assert_eq!(loaded.n_observations, 3);
        assert_eq!(loaded.n_missing, 1);
    }

    #[test]
    fn loads_objects_with_null_std() {
        let loaded = Continuous::load(&json!({
            "mean": 2.0, "std": null, "n_observations": 1, "n_missing": 0
        }))
        .unwrap();
        assert!(loaded.std.is_nan());
        assert!(Continuous::load(&json!({"mean": 2.0})).is_none());
        assert!(Continuous::load(&json!(true)).is_none());
    }

    #[test]
    fn summarizes_numbers_to_mean_and_sample_std() {
        let summary = summarize(&[json!(1.0), json!(2.0), Value::Null], TOLERANCE);
        let loaded = Continuous::load(&summary).unwrap();
        assert_eq!(loaded.mean, 1.5);
        assert!((loaded.std - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
        assert_eq!(loaded.n_observations, 3);
        assert_eq!(loaded.n_missing, 1);
    }

    #[test]
    fn equal_numbers_collapse_to_value() {
        assert_eq!(summarize(&[json!(0.3), json!(0.3)], TOLERANCE), json!(0.3));
        assert_eq!(summarize(&[Value::Null, Value::Null], TOLERANCE), Value::Null);
    }

    #[test]
    fn mixed_values_are_tallied() {
        let summary = summarize(&[json!("a"), json!(1), json!("a")], TOLERANCE);
        assert_eq!(
            summary,
            json!([{"value": "a", "count": 2}, {"value": 1, "count": 1}])
        );
        assert_eq!(summarize(&[json!("x"), json!("x")], TOLERANCE), json!("x"));
    }

    #[test]
    fn tallies_merge_existing_counts() {
        let previous = json!([{"value": "a", "count": 2}, {"value": "b", "count": 1}]);
        let summary = summarize(&[previous, json!("b")], TOLERANCE);
        assert_eq!(
            summary,
            json!([{"value": "a", "count": 2}, {"value": "b", "count": 2}])
        );
    }

    #[test]
    fn near_equal_values_share_a_count() {
        let a = json!({"tr": 2.0});
        let b = json!({"tr": 2.0 + 1e-12});
        assert!(almost_equal(&a, &b, TOLERANCE));
        let summary = Categorical::summarize(
            &[Categorical::load(&a), Categorical::load(&b), Categorical::load(&json!(true))],
            TOLERANCE,
        );
        assert_eq!(
            summary,
            json!([{"value": {"tr": 2.0}, "count": 2}, {"value": true, "count": 1}])
        );
    }
}
