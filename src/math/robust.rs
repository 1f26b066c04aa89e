//! Robust statistics used by the IRLS fitter.
//!
//! Residual scale comes from the MAD (median absolute deviation), which keeps
//! the weighting deterministic and insensitive to the outliers it is meant to
//! suppress.

/// Tukey bisquare tuning constant (95% efficiency under Gaussian noise).
pub const BISQUARE_C: f64 = 4.685;

/// MAD of a standard normal; dividing by this turns a MAD into a sigma.
const MAD_TO_SIGMA: f64 = 0.6745;

/// Smallest weight factor a point can receive, relative to its prior weight.
///
/// Keeps every row in the system so a fit never becomes underdetermined
/// because too many points were rejected.
pub const MIN_WEIGHT_FACTOR: f64 = 1e-3;

/// Median of the finite values in `values`.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    median_mut(&mut finite)
}

fn median_mut(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// Robust sigma estimate of `residuals`: `MAD / 0.6745`.
///
/// Returns `0.0` when there are no finite residuals.
pub fn robust_scale(residuals: &[f64]) -> f64 {
    let Some(center) = median(residuals) else {
        return 0.0;
    };
    let mut abs_dev: Vec<f64> = residuals
        .iter()
        .filter(|r| r.is_finite())
        .map(|r| (r - center).abs())
        .collect();
    median_mut(&mut abs_dev).unwrap_or(0.0) / MAD_TO_SIGMA
}

/// Tukey bisquare weight for a scaled residual `u = r / (c * s)`.
pub fn bisquare(u: f64) -> f64 {
    if !u.is_finite() || u.abs() >= 1.0 {
        return 0.0;
    }
    let t = 1.0 - u * u;
    t * t
}

/// Combine prior weights with bisquare factors derived from `residuals`.
pub fn bisquare_reweight(w_base: &[f64], residuals: &[f64], scale: f64) -> Vec<f64> {
    let cutoff = BISQUARE_C * scale.max(1e-300);
    w_base
        .iter()
        .zip(residuals.iter())
        .map(|(&w0, &r)| {
            let factor = bisquare(r / cutoff).max(MIN_WEIGHT_FACTOR);
            w0 * factor
        })
        .collect()
}
