//! Histograms and histogram entropy.

use cb_types::{CbResult, SearchError};
use serde::{Deserialize, Serialize};

/// One histogram bin, addressed by its center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub center: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub bins: Vec<HistogramBin>,
    pub bin_width: f64,
    pub min: f64,
    pub max: f64,
}

impl Histogram {
    pub fn total(&self) -> usize {
        self.bins.iter().map(|bin| bin.count).sum()
    }
}

/// Histogram over the fixed range `[min, max]` of the sample.  When `bins`
/// is unspecified the bin count adapts to the sample size.  Non-finite
/// samples are skipped.
pub fn histogram(samples: &[f64], bins: Option<usize>) -> CbResult<Histogram> {
    let finite: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return Err(SearchError::EmptySample("histogram"));
    }

    let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let bins = bins.unwrap_or_else(|| adaptive_bins(finite.len())).max(1);

    let span = max - min;
    let width = if span > 0.0 { span / bins as f64 } else { 1.0 };

    let mut counts = vec![0usize; bins];
    for value in &finite {
        let mut index = ((value - min) / width).floor() as usize;
        // The maximum lands exactly on the upper edge; fold it into the last bin.
        if index >= bins {
            index = bins - 1;
        }
        counts[index] += 1;
    }

    let bins = counts
        .into_iter()
        .enumerate()
        .map(|(index, count)| HistogramBin {
            center: min + width / 2.0 + index as f64 * width,
            count,
        })
        .collect();

    Ok(Histogram {
        bins,
        bin_width: width,
        min,
        max,
    })
}

/// Bin count scaled by sample size: `n/10⁴` for very large samples, `√n`
/// for small ones, otherwise 10.
fn adaptive_bins(n: usize) -> usize {
    let bins = if n > 100_000 {
        n / 10_000
    } else if n < 100 {
        (n as f64).sqrt().ceil() as usize
    } else {
        10
    };
    bins.max(1)
}

/// Shannon entropy (bits) of the normalized histogram.  Flat distributions
/// score high, peaked ones low; Monte-Carlo uses this as a peakedness
/// diagnostic for parameter distributions.
pub fn shannon_entropy(histogram: &Histogram) -> f64 {
    let total = histogram.total();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    -histogram
        .bins
        .iter()
        .filter(|bin| bin.count > 0)
        .map(|bin| {
            let p = bin.count as f64 / total;
            p * p.log2()
        })
        .sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_cover_the_sample_range() {
        let samples: Vec<f64> = (0..100).map(|v| v as f64 / 10.0).collect();
        let histogram = histogram(&samples, Some(10)).unwrap();
        assert_eq!(histogram.bins.len(), 10);
        assert_eq!(histogram.total(), 100);
        assert_eq!(histogram.min, 0.0);
        assert_eq!(histogram.max, 9.9);
        // Uniform input: every bin populated.
        assert!(histogram.bins.iter().all(|bin| bin.count == 10));
    }

    #[test]
    fn maximum_falls_into_last_bin() {
        let histogram = histogram(&[0.0, 0.5, 1.0], Some(2)).unwrap();
        assert_eq!(histogram.bins.last().unwrap().count, 1);
        assert_eq!(histogram.total(), 3);
    }

    #[test]
    fn adaptive_bin_count_scales() {
        assert_eq!(adaptive_bins(9), 3);
        assert_eq!(adaptive_bins(1_000), 10);
        assert_eq!(adaptive_bins(200_000), 20);
        assert_eq!(adaptive_bins(1), 1);
    }

    #[test]
    fn degenerate_sample_gets_one_populated_bin() {
        let histogram = histogram(&[4.2; 50], None).unwrap();
        assert_eq!(histogram.total(), 50);
        assert_eq!(histogram.bins.iter().filter(|b| b.count > 0).count(), 1);
    }

    #[test]
    fn non_finite_samples_are_skipped() {
        let histogram = histogram(&[1.0, f64::NAN, 2.0, f64::INFINITY], Some(2)).unwrap();
        assert_eq!(histogram.total(), 2);
    }

    #[test]
    fn entropy_is_maximal_for_flat_and_zero_for_peaked() {
        let flat: Vec<f64> = (0..1000).map(|v| v as f64).collect();
        let flat_hist = histogram(&flat, Some(10)).unwrap();
        assert!((shannon_entropy(&flat_hist) - 10f64.log2()).abs() < 1e-9);

        let peaked = histogram(&[1.0; 100], Some(10)).unwrap();
        assert_eq!(shannon_entropy(&peaked), 0.0);
    }
}
