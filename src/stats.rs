//! Dispersion and location statistics over a slice of samples.

use log::warn;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance (divides by n).
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / values.len() as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Middle value; the two middle values are averaged for an even count.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sorted = sorted_copy(values);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Gini coefficient through the area under the Lorenz curve.
///
/// Returns 0 for fewer than two samples or an all-zero slice. Negative
/// samples are replaced by their absolute value before the computation.
pub fn gini(values: &[f64]) -> f64 {
    if values.len() <= 1 || values.iter().all(|&x| x == 0.0) {
        return 0.0;
    }

    let mut sorted: Vec<f64> = if values.iter().any(|&x| x < 0.0) {
        warn!("negative values in gini input, using absolute values: {values:?}");
        values.iter().map(|x| x.abs()).collect()
    } else {
        values.to_vec()
    };
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len() as f64;
    let total: f64 = sorted.iter().sum();
    let mut running = 0.0;
    let cum_sum: f64 = sorted
        .iter()
        .map(|x| {
            running += x;
            running
        })
        .sum();

    (n + 1.0 - 2.0 * cum_sum / total) / n
}

/// Coefficient of variation: population std / mean, 0 when the mean is 0.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    if m == 0.0 {
        return 0.0;
    }
    std_dev(values) / m
}

/// Mean absolute deviation around the median. `None` for an empty slice.
pub fn mean_abs_deviation(values: &[f64]) -> Option<f64> {
    let med = median(values)?;
    Some(values.iter().map(|x| (x - med).abs()).sum::<f64>() / values.len() as f64)
}

/// The full set of per-field statistics reported for one group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldStats {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub var: f64,
    pub min: f64,
    pub max: f64,
    pub range: f64,
    pub gini: f64,
    pub cv: f64,
    pub mad: f64,
}

/// Column suffixes, in report order.
pub const FIELD_STAT_NAMES: [&str; 10] = [
    "mean", "median", "std", "var", "min", "max", "range", "gini", "cv", "mad",
];

impl FieldStats {
    /// `None` when `values` is empty.
    pub fn compute(values: &[f64]) -> Option<Self> {
        let median = median(values)?;
        let mad = mean_abs_deviation(values)?;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            mean: mean(values),
            median,
            std: std_dev(values),
            var: variance(values),
            min,
            max,
            range: max - min,
            gini: gini(values),
            cv: coefficient_of_variation(values),
            mad,
        })
    }

    /// Values in the order of [`FIELD_STAT_NAMES`].
    pub fn as_array(&self) -> [f64; 10] {
        [
            self.mean, self.median, self.std, self.var, self.min, self.max, self.range,
            self.gini, self.cv, self.mad,
        ]
    }
}

fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(f64::total_cmp);
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn gini_degenerate_inputs_are_zero() {
        assert_eq!(gini(&[]), 0.0);
        assert_eq!(gini(&[5.0]), 0.0);
        assert_eq!(gini(&[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn gini_of_equal_values_is_zero() {
        assert!(gini(&[3.0, 3.0, 3.0, 3.0]).abs() < EPS);
    }

    #[test]
    fn gini_of_concentrated_values() {
        // one holder of everything among four: (n-1)/n
        assert!((gini(&[0.0, 0.0, 0.0, 8.0]) - 0.75).abs() < EPS);
        // [1,2,3]: cum = 1,3,6 -> (4 - 2*10/6)/3
        assert!((gini(&[3.0, 1.0, 2.0]) - (4.0 - 20.0 / 6.0) / 3.0).abs() < EPS);
    }

    #[test]
    fn gini_uses_absolute_values_for_negatives() {
        assert!((gini(&[-1.0, 2.0, -3.0]) - gini(&[1.0, 2.0, 3.0])).abs() < EPS);
    }

    #[test]
    fn cv_edge_cases() {
        assert_eq!(coefficient_of_variation(&[]), 0.0);
        assert_eq!(coefficient_of_variation(&[7.0, 7.0, 7.0]), 0.0);
        assert_eq!(coefficient_of_variation(&[-1.0, 1.0]), 0.0);
        // std of [2,4] is 1, mean 3
        assert!((coefficient_of_variation(&[2.0, 4.0]) - 1.0 / 3.0).abs() < EPS);
    }

    #[test]
    fn median_and_mad() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(mean_abs_deviation(&[]), None);
        assert_eq!(mean_abs_deviation(&[9.0]), Some(0.0));
        // median 2 -> |1-2| + |2-2| + |6-2| = 5
        assert!((mean_abs_deviation(&[1.0, 2.0, 6.0]).unwrap() - 5.0 / 3.0).abs() < EPS);
    }

    #[test]
    fn field_stats_single_value() {
        let s = FieldStats::compute(&[30.0]).unwrap();
        assert_eq!(s.mean, 30.0);
        assert_eq!(s.std, 0.0);
        assert_eq!(s.mad, 0.0);
        assert_eq!(s.range, 0.0);
        assert_eq!(s.gini, 0.0);
        assert!(FieldStats::compute(&[]).is_none());
    }

    #[test]
    fn field_stats_population_moments() {
        let s = FieldStats::compute(&[10.0, 20.0]).unwrap();
        assert_eq!(s.mean, 15.0);
        assert_eq!(s.var, 25.0);
        assert_eq!(s.std, 5.0);
        assert_eq!(s.min, 10.0);
        assert_eq!(s.max, 20.0);
        assert_eq!(s.range, 10.0);
        assert_eq!(s.as_array()[0], 15.0);
    }

    proptest! {
        #[test]
        fn gini_is_bounded(values in prop::collection::vec(0.0f64..1e6, 0..64)) {
            let g = gini(&values);
            prop_assert!(g >= -EPS && g <= 1.0 + EPS, "gini out of range: {}", g);
        }

        #[test]
        fn gini_is_scale_invariant(
            values in prop::collection::vec(0.0f64..1e4, 2..32),
            k in 0.01f64..100.0,
        ) {
            let scaled: Vec<f64> = values.iter().map(|x| x * k).collect();
            prop_assert!((gini(&values) - gini(&scaled)).abs() < 1e-6);
        }

        #[test]
        fn cv_of_constant_sequence_is_zero(c in 0.1f64..1e6, n in 1usize..32) {
            prop_assert!(coefficient_of_variation(&vec![c; n]).abs() < 1e-9);
        }
    }
}
