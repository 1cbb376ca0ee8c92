//! Box-whisker summaries of sample vectors.

use cb_types::{CbResult, SearchError};
use serde::{Deserialize, Serialize};

use crate::{quantile, sorted};

/// Immutable five-number summary with outlier classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxWhisker {
    pub median: f64,
    pub lower_quartile: f64,
    pub upper_quartile: f64,
    /// Lowest sample within 1.5×IQR below the lower quartile.
    pub lower_whisker: f64,
    /// Highest sample within 1.5×IQR above the upper quartile.
    pub upper_whisker: f64,
    /// Samples between 1.5×IQR and 3×IQR beyond a quartile.
    pub mild_outliers: Vec<f64>,
    /// Samples more than 3×IQR beyond a quartile.
    pub extreme_outliers: Vec<f64>,
    pub mean: f64,
    pub stddev: f64,
    pub count: usize,
}

impl BoxWhisker {
    pub fn iqr(&self) -> f64 {
        self.upper_quartile - self.lower_quartile
    }
}

/// Box-whisker summary by order statistics; invariant to input ordering.
pub fn box_whisker(samples: &[f64]) -> CbResult<BoxWhisker> {
    if samples.is_empty() {
        return Err(SearchError::EmptySample("box_whisker"));
    }
    let sorted = sorted(samples);
    let count = sorted.len();

    let lower_quartile = quantile(&sorted, 0.25);
    let median = quantile(&sorted, 0.5);
    let upper_quartile = quantile(&sorted, 0.75);
    let iqr = upper_quartile - lower_quartile;

    let lower_fence = lower_quartile - 1.5 * iqr;
    let upper_fence = upper_quartile + 1.5 * iqr;
    let lower_extreme_fence = lower_quartile - 3.0 * iqr;
    let upper_extreme_fence = upper_quartile + 3.0 * iqr;

    let lower_whisker = sorted
        .iter()
        .copied()
        .find(|v| *v >= lower_fence)
        .unwrap_or(lower_quartile);
    let upper_whisker = sorted
        .iter()
        .rev()
        .copied()
        .find(|v| *v <= upper_fence)
        .unwrap_or(upper_quartile);

    let mut mild_outliers = Vec::new();
    let mut extreme_outliers = Vec::new();
    for value in &sorted {
        if *value < lower_extreme_fence || *value > upper_extreme_fence {
            extreme_outliers.push(*value);
        } else if *value < lower_fence || *value > upper_fence {
            mild_outliers.push(*value);
        }
    }

    let mean = sorted.iter().sum::<f64>() / count as f64;
    let stddev = if count > 1 {
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
        variance.sqrt()
    } else {
        0.0
    };

    Ok(BoxWhisker {
        median,
        lower_quartile,
        upper_quartile,
        lower_whisker,
        upper_whisker,
        mild_outliers,
        extreme_outliers,
        mean,
        stddev,
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    #[test]
    fn five_number_summary_of_a_simple_sample() {
        let samples: Vec<f64> = (1..=9).map(|v| v as f64).collect();
        let plot = box_whisker(&samples).unwrap();
        assert_eq!(plot.median, 5.0);
        assert_eq!(plot.lower_quartile, 3.0);
        assert_eq!(plot.upper_quartile, 7.0);
        assert_eq!(plot.lower_whisker, 1.0);
        assert_eq!(plot.upper_whisker, 9.0);
        assert!(plot.mild_outliers.is_empty());
        assert!(plot.extreme_outliers.is_empty());
        assert_eq!(plot.mean, 5.0);
        assert_eq!(plot.count, 9);
    }

    #[test]
    fn shuffling_does_not_change_the_summary() {
        let samples: Vec<f64> = (0..500).map(|v| (v as f64).sin() * 10.0).collect();
        let reference = box_whisker(&samples).unwrap();

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut shuffled = samples.clone();
        shuffled.shuffle(&mut rng);
        let plot = box_whisker(&shuffled).unwrap();

        assert_eq!(plot.median, reference.median);
        assert_eq!(plot.lower_quartile, reference.lower_quartile);
        assert_eq!(plot.upper_quartile, reference.upper_quartile);
        assert_eq!(plot.stddev, reference.stddev);
        assert_eq!(plot.mild_outliers, reference.mild_outliers);
    }

    #[test]
    fn outliers_split_mild_and_extreme() {
        // Core 1..=9, one mild outlier and one extreme outlier above.
        // With the two extra points q3 = 8.5 and IQR = 5, so the fences sit
        // at 16 and 23.5.
        let mut samples: Vec<f64> = (1..=9).map(|v| v as f64).collect();
        samples.push(20.0);
        samples.push(40.0);
        let plot = box_whisker(&samples).unwrap();
        assert!(plot.mild_outliers.contains(&20.0));
        assert!(plot.extreme_outliers.contains(&40.0));
        assert!(plot.upper_whisker <= plot.upper_quartile + 1.5 * plot.iqr());
    }

    #[test]
    fn single_sample_degenerates_cleanly() {
        let plot = box_whisker(&[3.0]).unwrap();
        assert_eq!(plot.median, 3.0);
        assert_eq!(plot.lower_whisker, 3.0);
        assert_eq!(plot.upper_whisker, 3.0);
        assert_eq!(plot.stddev, 0.0);
        assert_eq!(plot.count, 1);
    }

    #[test]
    fn empty_sample_is_an_error() {
        assert!(box_whisker(&[]).is_err());
    }
}
