//! Pure functions turning raw sample vectors into reportable summaries:
//! percentile confidence bars, histograms, box-whisker plots and Shannon
//! entropy.  Nothing in here touches a model or a thread.

pub mod boxwhisker;
pub mod confidence;
pub mod histogram;

pub use boxwhisker::*;
pub use confidence::*;
pub use histogram::*;

/// Sorted copy of a sample vector; NaNs sort last and are the caller's
/// problem.
pub(crate) fn sorted(samples: &[f64]) -> Vec<f64> {
    let mut out = samples.to_vec();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

/// Order statistic at quantile `p` over a sorted slice, rank `(n-1)·p` with
/// linear interpolation.
pub(crate) fn quantile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = (n - 1) as f64 * p.clamp(0.0, 1.0);
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    let fraction = rank - low as f64;
    sorted[low] + fraction * (sorted[high] - sorted[low])
}
