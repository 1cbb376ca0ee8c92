//! Percentile confidence bars over sample vectors.

use cb_types::{CbResult, SearchError};
use serde::{Deserialize, Serialize};

use crate::sorted;

/// A (lower, upper) percentile pair cut from a sample vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBar {
    pub lower: f64,
    pub upper: f64,
}

/// Percentile confidence bar: `error` is the total percentage outside the
/// bar, split evenly between the two tails.  For sample counts of 1000 and
/// above the bounds interpolate linearly between adjacent order statistics;
/// below that the nearest order statistic is used.  `error = 0` yields the
/// sample extremes, `error = 100` collapses both bounds onto the median.
pub fn confidence_bar(samples: &[f64], error: f64) -> CbResult<ConfidenceBar> {
    if samples.is_empty() {
        return Err(SearchError::EmptySample("confidence_bar"));
    }
    let sorted = sorted(samples);
    let tail = (error / 2.0 / 100.0).clamp(0.0, 0.5);
    Ok(ConfidenceBar {
        lower: order_statistic(&sorted, tail),
        upper: order_statistic(&sorted, 1.0 - tail),
    })
}

fn order_statistic(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = (n - 1) as f64 * p;
    if n >= 1000 {
        let low = rank.floor() as usize;
        let high = rank.ceil() as usize;
        let fraction = rank - low as f64;
        sorted[low] + fraction * (sorted[high] - sorted[low])
    } else {
        sorted[rank.round() as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_to_thousand() -> Vec<f64> {
        (1..=1000).map(|v| v as f64).collect()
    }

    #[test]
    fn zero_error_yields_extremes() {
        let bar = confidence_bar(&one_to_thousand(), 0.0).unwrap();
        assert_eq!(bar.lower, 1.0);
        assert_eq!(bar.upper, 1000.0);
    }

    #[test]
    fn full_error_collapses_to_median() {
        let bar = confidence_bar(&one_to_thousand(), 100.0).unwrap();
        assert_eq!(bar.lower, bar.upper);
        assert!((bar.lower - 500.5).abs() < 1e-9);
    }

    #[test]
    fn ten_percent_error_approximates_outer_percentiles() {
        let bar = confidence_bar(&one_to_thousand(), 10.0).unwrap();
        // 5th/95th percentile of 1..=1000.
        assert!((bar.lower - 50.0).abs() < 2.0, "lower = {}", bar.lower);
        assert!((bar.upper - 950.0).abs() < 2.0, "upper = {}", bar.upper);
        assert!(bar.lower < bar.upper);
    }

    #[test]
    fn small_samples_use_nearest_order_statistic() {
        let samples: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        let bar = confidence_bar(&samples, 20.0).unwrap();
        // Rank 0.9 rounds to the second order statistic.
        assert_eq!(bar.lower, 2.0);
        assert_eq!(bar.upper, 9.0);
    }

    #[test]
    fn input_order_does_not_matter() {
        let mut shuffled = one_to_thousand();
        shuffled.reverse();
        shuffled.swap(10, 700);
        let bar = confidence_bar(&shuffled, 10.0).unwrap();
        let reference = confidence_bar(&one_to_thousand(), 10.0).unwrap();
        assert_eq!(bar, reference);
    }

    #[test]
    fn empty_sample_is_an_error() {
        assert!(confidence_bar(&[], 10.0).is_err());
    }
}
