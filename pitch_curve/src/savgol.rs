//! Savitzky–Golay smoothing with polynomial edge fitting.

use nalgebra::DMatrix;

use crate::PcError;

/// Check that `window` is a usable odd window for a fit of degree `polyorder`.
pub fn check_window(window: usize, polyorder: usize) -> Result<(), PcError> {
    if window < 3 || window % 2 == 0 {
        return Err(PcError::InvalidParameter(format!(
            "savgol window must be odd and >= 3, got {window}"
        )));
    }
    if polyorder >= window {
        return Err(PcError::InvalidParameter(format!(
            "savgol polyorder {polyorder} must be below window {window}"
        )));
    }
    Ok(())
}

/// Least-squares projection matrix for a centered window: row `i` holds the weights that
/// evaluate the fitted polynomial at window position `i`.
fn projection(window: usize, polyorder: usize) -> Result<DMatrix<f64>, PcError> {
    let half = (window / 2) as f64;
    let design = DMatrix::from_fn(window, polyorder + 1, |i, j| (i as f64 - half).powi(j as i32));
    let normal = design.transpose() * &design;
    let inverse = normal.try_inverse().ok_or_else(|| {
        PcError::Singular(format!("window {window}, polyorder {polyorder}"))
    })?;
    Ok(&design * inverse * design.transpose())
}

/// Smooth `data` with a `window`-point, degree-`polyorder` Savitzky–Golay filter.
///
/// Interior samples use the centered fit. The first and last `window / 2` samples take their
/// values from a polynomial fitted to the first and last full window respectively.
pub fn savgol_filter(data: &[f64], window: usize, polyorder: usize) -> Result<Vec<f64>, PcError> {
    check_window(window, polyorder)?;
    if data.len() < window {
        return Err(PcError::InsufficientData(format!(
            "savgol window {window} exceeds {} samples",
            data.len()
        )));
    }

    let h = projection(window, polyorder)?;
    let half = window / 2;
    let n = data.len();
    let apply = |row: usize, start: usize| -> f64 {
        (0..window).map(|k| h[(row, k)] * data[start + k]).sum()
    };

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let value = if i < half {
            apply(i, 0)
        } else if i + half >= n {
            let start = n - window;
            apply(i - start, start)
        } else {
            apply(half, i - half)
        };
        out.push(value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_check_window() {
        assert!(check_window(7, 3).is_ok());
        assert!(check_window(11, 3).is_ok());
        assert!(check_window(8, 3).is_err());
        assert!(check_window(1, 0).is_err());
        assert!(check_window(5, 5).is_err());
    }

    #[test]
    fn test_constant_input_is_unchanged() {
        let data = vec![2.5; 15];
        let out = savgol_filter(&data, 7, 3).unwrap();
        for v in out {
            assert_relative_eq!(v, 2.5, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_cubic_is_reproduced_including_edges() {
        let data: Vec<f64> = (0..20)
            .map(|i| {
                let x = i as f64;
                0.01 * x * x * x - 0.3 * x * x + 2.0 * x - 5.0
            })
            .collect();
        let out = savgol_filter(&data, 11, 3).unwrap();
        for (a, b) in out.iter().zip(data.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_reduces_alternating_noise() {
        let data: Vec<f64> = (0..21)
            .map(|i| if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        let out = savgol_filter(&data, 7, 3).unwrap();
        let raw_energy: f64 = data[3..18].iter().map(|v| v * v).sum();
        let smooth_energy: f64 = out[3..18].iter().map(|v| v * v).sum();
        assert!(smooth_energy < raw_energy);
    }

    #[test]
    fn test_short_input_is_rejected() {
        let err = savgol_filter(&[1.0, 2.0, 3.0], 7, 3).unwrap_err();
        assert!(matches!(err, PcError::InsufficientData(_)));
    }
}
