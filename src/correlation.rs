//! Pearson correlation between a reference signal (a membrane potential) and the activity of model units.
//!
//! Degenerate scores are never reported: a NaN coefficient (no variance in one of the signals) or a
//! coefficient at or beyond ±1 is replaced by 0.
//!
//! # Examples
//!
//! ```rust
//! use ndarray::array;
//! use retina_intr::correlation::correlate;
//!
//! let mem_pot = array![0.0, 1.0, 0.5, 2.0, 1.5, 3.0];
//! let unit = array![0.1, 0.9, 0.6, 2.2, 1.4, 2.9];
//!
//! let r = correlate(mem_pot.view(), unit.view(), false).unwrap();
//! assert!(r > 0.9 && r < 1.0);
//!
//! // A unit identical to the reference is a spurious match and scores 0.
//! let r = correlate(mem_pot.view(), mem_pot.view(), false).unwrap();
//! assert_eq!(r, 0.0);
//! ```
use itertools::Itertools;
use ndarray::{s, Array2, ArrayView1, ArrayView3};

use crate::error::IntrError;

/// Calculates the Pearson correlation coefficient of two signals of the same length.
/// The coefficient is NaN if either signal has zero variance.
pub fn pearsonr(x: ArrayView1<f64>, y: ArrayView1<f64>) -> Result<f64, IntrError> {
    if x.len() != y.len() {
        return Err(IntrError::LengthMismatch {
            reference: x.len(),
            candidate: y.len(),
        });
    }

    let n = x.len() as f64;
    let x_mean = x.sum() / n;
    let y_mean = y.sum() / n;

    let (numerator, x_ss, y_ss) = x.iter().zip_eq(y.iter()).fold(
        (0.0, 0.0, 0.0),
        |(num, x_ss, y_ss), (xi, yi)| {
            let dx = xi - x_mean;
            let dy = yi - y_mean;
            (num + dx * dy, x_ss + dx * dx, y_ss + dy * dy)
        },
    );

    Ok(numerator / (x_ss * y_ss).sqrt())
}

/// Replace a NaN score, or a score outside the open interval (-1, 1), by 0.
pub fn normalize_score(r: f64) -> f64 {
    if r.is_nan() || r >= 1.0 || r <= -1.0 {
        0.0
    } else {
        r
    }
}

/// The normalized correlation of a candidate signal with the reference signal.
/// With `abs_val`, the sign is dropped after normalization.
/// Returns an error if the two signals do not have the same length.
pub fn correlate(
    reference: ArrayView1<f64>,
    candidate: ArrayView1<f64>,
    abs_val: bool,
) -> Result<f64, IntrError> {
    let r = normalize_score(pearsonr(reference, candidate)?);
    if abs_val {
        Ok(r.abs())
    } else {
        Ok(r)
    }
}

/// Correlates the reference with every spatial unit of a single channel of shape (time, height, width).
/// The returned map has shape (height, width).
pub fn correlation_map(
    reference: ArrayView1<f64>,
    channel_response: ArrayView3<f64>,
) -> Result<Array2<f64>, IntrError> {
    let (_, height, width) = channel_response.dim();
    let mut correlations = Array2::zeros((height, width));
    for ((y, x), cor) in correlations.indexed_iter_mut() {
        *cor = correlate(reference, channel_response.slice(s![.., y, x]), false)?;
    }
    Ok(correlations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array1, Array3};

    #[test]
    fn test_pearsonr() {
        let x = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let y = array![2.0, 1.0, 4.0, 3.0, 5.0];
        assert_relative_eq!(pearsonr(x.view(), y.view()).unwrap(), 0.8, epsilon = 1e-12);

        let y = array![1.0, 1.0, 1.0, 1.0, 1.0];
        assert!(pearsonr(x.view(), y.view()).unwrap().is_nan());

        let y = array![1.0, 2.0, 3.0];
        assert_eq!(
            pearsonr(x.view(), y.view()),
            Err(IntrError::LengthMismatch {
                reference: 5,
                candidate: 3
            })
        );
    }

    #[test]
    fn test_normalize_score() {
        assert_eq!(normalize_score(f64::NAN), 0.0);
        assert_eq!(normalize_score(1.0), 0.0);
        assert_eq!(normalize_score(-1.0), 0.0);
        assert_eq!(normalize_score(1.5), 0.0);
        assert_eq!(normalize_score(0.25), 0.25);
        assert_eq!(normalize_score(-0.999), -0.999);
    }

    #[test]
    fn test_correlate_boundaries() {
        let reference = array![0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        let anti = array![1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        let flat = Array1::<f64>::ones(6);

        assert_eq!(correlate(reference.view(), reference.view(), false).unwrap(), 0.0);
        assert_eq!(correlate(reference.view(), anti.view(), false).unwrap(), 0.0);
        assert_eq!(correlate(reference.view(), flat.view(), false).unwrap(), 0.0);
        assert_eq!(correlate(reference.view(), flat.view(), true).unwrap(), 0.0);
    }

    #[test]
    fn test_correlate_abs_val() {
        let x = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let pos = array![2.0, 1.0, 4.0, 3.0, 5.0];
        let neg = pos.mapv(|v| -v);

        assert_relative_eq!(correlate(x.view(), neg.view(), false).unwrap(), -0.8, epsilon = 1e-12);
        assert_relative_eq!(correlate(x.view(), neg.view(), true).unwrap(), 0.8, epsilon = 1e-12);
        assert_relative_eq!(correlate(x.view(), pos.view(), true).unwrap(), 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_correlation_map() {
        let reference = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let mut layer = Array3::<f64>::zeros((5, 2, 3));
        layer.slice_mut(s![.., 0, 1]).assign(&array![2.0, 1.0, 4.0, 3.0, 5.0]);
        layer.slice_mut(s![.., 1, 2]).assign(&array![-2.0, -1.0, -4.0, -3.0, -5.0]);
        layer.slice_mut(s![.., 1, 0]).assign(&reference);

        let map = correlation_map(reference.view(), layer.view()).unwrap();
        assert_eq!(map.dim(), (2, 3));
        assert_relative_eq!(map[[0, 1]], 0.8, epsilon = 1e-12);
        assert_relative_eq!(map[[1, 2]], -0.8, epsilon = 1e-12);
        // constant units and the exact copy of the reference are normalized
        assert_eq!(map[[0, 0]], 0.0);
        assert_eq!(map[[1, 0]], 0.0);
    }

    #[test]
    fn test_correlation_map_length_mismatch() {
        let reference = array![1.0, 2.0, 3.0];
        let layer = Array3::<f64>::zeros((4, 2, 2));
        assert!(correlation_map(reference.view(), layer.view()).is_err());
    }
}
