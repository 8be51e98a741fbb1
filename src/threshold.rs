//! Automatic thresholding
//!
//! Provides Otsu's method for separating the two classes of a bimodal
//! intensity histogram.

use ndarray::{ArrayBase, Data, Dimension};
use thiserror::Error;

pub const DEFAULT_NUM_BINS: usize = 256;

/// Largest intensity range binned one bin per integer value
pub const MAX_INTEGER_BINS: usize = 1 << 20;

#[derive(Debug, Error, PartialEq)]
pub enum ThresholdError {
    #[error("Cannot threshold an empty array")]
    Empty,

    #[error("Intensities contain non-finite values")]
    NonFinite,

    #[error("All intensities equal {value}, histogram has a single class")]
    Constant { value: f64 },
}

/// Otsu's method for automatic threshold selection
///
/// Builds a histogram spanning the data range and returns the centre of the
/// bin that ends the lower class when the between-class variance is maximal.
/// Ties resolve to the lowest bin.
///
/// When every sample is an integer (stored CT values after rescaling, for
/// instance) and the range spans at most [`MAX_INTEGER_BINS`] values, each
/// integer gets its own bin centred on the value and `num_bins` is ignored.
/// Otherwise `num_bins` equal bins are used.
///
/// # Errors
///
/// Degenerate input has no defined threshold: empty arrays, arrays with NaN
/// or infinite values and constant arrays are rejected.
pub fn otsu_threshold<S, D>(
    data: &ArrayBase<S, D>,
    num_bins: usize,
) -> Result<f64, ThresholdError>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    if data.is_empty() {
        return Err(ThresholdError::Empty);
    }
    if data.iter().any(|v| !v.is_finite()) {
        return Err(ThresholdError::NonFinite);
    }

    let (min_val, max_val) = data.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &v| {
        let v = f64::from(v);
        (lo.min(v), hi.max(v))
    });
    if min_val == max_val {
        return Err(ThresholdError::Constant { value: min_val });
    }

    let span = max_val - min_val;
    let integral = data.iter().all(|v| v.fract() == 0.0);
    let (num_bins, bin_width, center_offset) = if integral && span < MAX_INTEGER_BINS as f64 {
        (span as usize + 1, 1.0, 0.0)
    } else {
        let num_bins = num_bins.max(2);
        (num_bins, span / num_bins as f64, 0.5)
    };
    let mut histogram = vec![0u64; num_bins];
    for &v in data.iter() {
        let bin = ((f64::from(v) - min_val) / bin_width).floor() as usize;
        histogram[bin.min(num_bins - 1)] += 1;
    }

    let center = |bin: usize| min_val + (bin as f64 + center_offset) * bin_width;
    let total = data.len() as f64;
    let sum_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(bin, &count)| count as f64 * center(bin))
        .sum();

    let mut weight_low = 0.0;
    let mut sum_low = 0.0;
    let mut max_variance = f64::NEG_INFINITY;
    let mut best_bin = 0;

    // The upper class must keep at least the last bin.
    for (bin, &count) in histogram.iter().enumerate().take(num_bins - 1) {
        weight_low += count as f64;
        sum_low += count as f64 * center(bin);

        let weight_high = total - weight_low;
        if weight_low == 0.0 || weight_high == 0.0 {
            continue;
        }

        let mean_low = sum_low / weight_low;
        let mean_high = (sum_total - sum_low) / weight_high;
        let variance = weight_low * weight_high * (mean_low - mean_high).powi(2);

        if variance > max_variance {
            max_variance = variance;
            best_bin = bin;
        }
    }

    Ok(center(best_bin))
}
