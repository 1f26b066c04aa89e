//! Linear regression of basis vectors onto flux.
//!
//! Given:
//! - a design matrix `X` (rows = aligned cadences, columns = basis vectors)
//! - the aligned flux `y`
//! - optional per-row prior weights `w0`
//!
//! we solve
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T β - c)^2 + λ Σ β_j^2
//! ```
//!
//! where `c` is the optional constant offset (never penalized) and `λ` the
//! ridge strength. Ridge is implemented by appending `sqrt(λ)` rows to the
//! system, which is the same as adding `λ` to the normal-equations diagonal but
//! keeps the SVD path.
//!
//! Robust mode wraps this in iteratively reweighted least squares:
//!
//! - fit with the prior weights
//! - compute residuals and their MAD scale
//! - reweight with Tukey's bisquare and refit
//! - stop when the relative change of the basis coefficients (offset
//!   excluded) drops below the tolerance
//!
//! Hitting `max_iterations` is not an error: the result carries
//! `converged = false` and the caller decides.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CbvError, CbvResult};
use crate::math::{bisquare_reweight, condition_number, robust_scale, solve_least_squares};

/// Condition number above which basis columns are centered/scaled before solving.
pub const ILL_CONDITIONED: f64 = 1e8;

/// Options controlling a single regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    /// Append a constant column (fitted, never penalized).
    pub add_constant_offset: bool,
    /// Use bisquare IRLS instead of a single least squares solve.
    pub robust: bool,
    /// Maximum number of solves in robust mode (including the initial fit).
    pub max_iterations: usize,
    /// Relative change of the basis coefficients (offset excluded) below which
    /// robust iteration stops.
    pub convergence_tolerance: f64,
    /// Ridge strength `λ >= 0`.
    pub l2_penalty: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            add_constant_offset: true,
            robust: false,
            max_iterations: 50,
            convergence_tolerance: 1e-6,
            l2_penalty: 0.0,
        }
    }
}

impl FitOptions {
    pub fn validate(&self) -> CbvResult<()> {
        if !(self.l2_penalty.is_finite() && self.l2_penalty >= 0.0) {
            return Err(CbvError::InvalidInput(format!(
                "l2 penalty must be finite and >= 0, got {}",
                self.l2_penalty
            )));
        }
        if !(self.convergence_tolerance.is_finite() && self.convergence_tolerance > 0.0) {
            return Err(CbvError::InvalidInput(format!(
                "convergence tolerance must be finite and > 0, got {}",
                self.convergence_tolerance
            )));
        }
        if self.robust && self.max_iterations == 0 {
            return Err(CbvError::InvalidInput("max iterations must be >= 1".to_string()));
        }
        Ok(())
    }

    /// Number of fitted parameters for a design with `columns` basis vectors.
    pub fn param_count(&self, columns: usize) -> usize {
        columns + usize::from(self.add_constant_offset)
    }
}

/// Residual diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitQuality {
    /// Unweighted sum of squared residuals.
    pub sse: f64,
    pub rmse: f64,
    /// `n ln(SSE/n) + k ln(n)`.
    pub bic: f64,
    pub n: usize,
    /// Fitted parameters (basis columns plus offset).
    pub k: usize,
}

/// Output of a regression.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// One coefficient per design column, in column order.
    pub coefficients: Vec<f64>,
    /// Fitted constant, when requested.
    pub offset: Option<f64>,
    /// `X β` (basis contribution only, no offset).
    pub systematic: Vec<f64>,
    /// `y - X β - c`.
    pub residuals: Vec<f64>,
    /// Final row weights (prior weights times robust factors).
    pub weights: Vec<f64>,
    pub converged: bool,
    /// Least squares solves performed.
    pub iterations: usize,
    /// Condition number of the last system solved.
    pub condition_number: f64,
    /// Whether basis columns were centered/scaled before solving.
    pub rescaled: bool,
    pub quality: FitQuality,
    last_change: f64,
}

impl FitResult {
    /// Turn a non-converged robust fit into a `NonConvergence` error.
    pub fn require_converged(self) -> CbvResult<Self> {
        if self.converged {
            Ok(self)
        } else {
            Err(CbvError::NonConvergence {
                iterations: self.iterations,
                last_change: self.last_change,
            })
        }
    }

    /// Fitted values including the offset.
    pub fn fitted(&self) -> Vec<f64> {
        let c = self.offset.unwrap_or(0.0);
        self.systematic.iter().map(|s| s + c).collect()
    }
}

/// Fit with unit prior weights.
pub fn fit(design: &DMatrix<f64>, flux: &DVector<f64>, options: &FitOptions) -> CbvResult<FitResult> {
    fit_weighted(design, flux, None, options)
}

/// Fit with optional per-row prior weights (e.g. inverse variances).
pub fn fit_weighted(
    design: &DMatrix<f64>,
    flux: &DVector<f64>,
    weights: Option<&DVector<f64>>,
    options: &FitOptions,
) -> CbvResult<FitResult> {
    options.validate()?;

    let n = design.nrows();
    let p = design.ncols();
    if flux.len() != n {
        return Err(CbvError::InvalidInput(format!(
            "design matrix has {n} rows but flux has {} values",
            flux.len()
        )));
    }
    let k = options.param_count(p);
    // An offset-only fit is a weighted mean and needs no spare row.
    let required = if p == 0 { k.max(1) } else { k + 1 };
    if n < required {
        return Err(CbvError::UnderdeterminedSystem { rows: n, columns: k });
    }
    if !flux.iter().all(|v| v.is_finite()) || !design.iter().all(|v| v.is_finite()) {
        return Err(CbvError::InvalidInput(
            "design matrix and flux must be finite".to_string(),
        ));
    }

    let w_base: Vec<f64> = match weights {
        Some(w) if w.len() != n => {
            return Err(CbvError::InvalidInput(format!(
                "{} weights for {n} rows",
                w.len()
            )));
        }
        Some(w) => w.iter().copied().collect(),
        None => vec![1.0; n],
    };
    if w_base.iter().any(|w| !(w.is_finite() && *w > 0.0)) {
        return Err(CbvError::InvalidInput("weights must be finite and > 0".to_string()));
    }

    let x = with_offset_column(design, options.add_constant_offset);
    let scaling = ColumnScaling::analyze(&x, p, options.add_constant_offset);
    let xs = scaling.apply(&x);

    let mut w = w_base.clone();
    let mut sol = solve_weighted(&xs, flux, &w, options.l2_penalty, &scaling)?;
    let mut iterations = 1;
    let mut converged = true;
    let mut last_change = 0.0;

    if options.robust && p > 0 {
        converged = false;
        last_change = f64::INFINITY;
        let y_scale = flux.amax().max(1.0);

        while iterations < options.max_iterations {
            let residuals = flux - &xs * &sol.beta;
            let scale = robust_scale(residuals.as_slice());
            if scale <= 1e-12 * y_scale {
                // Exact fit: nothing left to downweight.
                converged = true;
                break;
            }
            w = bisquare_reweight(&w_base, residuals.as_slice(), scale);

            let next = solve_weighted(&xs, flux, &w, options.l2_penalty, &scaling)?;
            iterations += 1;

            let (prev_coefficients, _) = scaling.unscale(&sol.beta, p);
            let (next_coefficients, _) = scaling.unscale(&next.beta, p);
            last_change = relative_change(&prev_coefficients, &next_coefficients);
            sol = next;

            if last_change < options.convergence_tolerance {
                converged = true;
                break;
            }
        }

        if !converged {
            debug!(
                iterations,
                last_change, "robust fit stopped at the iteration cap without converging"
            );
        }
    }

    let (coefficients, offset) = scaling.unscale(&sol.beta, p);

    let systematic: Vec<f64> = (0..n)
        .map(|i| (0..p).map(|j| design[(i, j)] * coefficients[j]).sum::<f64>())
        .collect();
    let c = offset.unwrap_or(0.0);
    let residuals: Vec<f64> = systematic
        .iter()
        .zip(flux.iter())
        .map(|(s, y)| y - s - c)
        .collect();

    let sse: f64 = residuals.iter().map(|r| r * r).sum();
    let quality = FitQuality {
        sse,
        rmse: (sse / n as f64).sqrt(),
        bic: bic(n, sse, k),
        n,
        k,
    };

    debug!(
        rows = n,
        params = k,
        iterations,
        converged,
        condition_number = sol.condition_number,
        rescaled = scaling.enabled,
        sse,
        "fitted basis vectors"
    );

    Ok(FitResult {
        coefficients,
        offset,
        systematic,
        residuals,
        weights: w,
        converged,
        iterations,
        condition_number: sol.condition_number,
        rescaled: scaling.enabled,
        quality,
        last_change,
    })
}

/// `‖next - prev‖ / ‖prev‖`, guarded against a zero `prev`.
fn relative_change(prev: &[f64], next: &[f64]) -> f64 {
    let diff: f64 = prev.iter().zip(next).map(|(a, b)| (b - a).powi(2)).sum::<f64>().sqrt();
    let size: f64 = prev.iter().map(|a| a * a).sum::<f64>().sqrt();
    diff / size.max(f64::MIN_POSITIVE)
}

/// Bayesian information criterion for a Gaussian least squares fit.
pub fn bic(n: usize, sse: f64, k: usize) -> f64 {
    let n_f = n as f64;
    let sse_per = (sse / n_f).max(1e-300);
    n_f * sse_per.ln() + (k as f64) * n_f.ln()
}

fn with_offset_column(design: &DMatrix<f64>, add_offset: bool) -> DMatrix<f64> {
    if !add_offset {
        return design.clone();
    }
    design.clone().insert_column(design.ncols(), 1.0)
}

/// Column centering/scaling applied to basis columns of an ill-conditioned design.
///
/// The offset column (if any) is always last and left untouched.
#[derive(Debug, Clone)]
struct ColumnScaling {
    enabled: bool,
    center: Vec<f64>,
    scale: Vec<f64>,
    has_offset: bool,
}

impl ColumnScaling {
    fn analyze(x: &DMatrix<f64>, p: usize, has_offset: bool) -> Self {
        let identity = Self {
            enabled: false,
            center: vec![0.0; p],
            scale: vec![1.0; p],
            has_offset,
        };
        if p == 0 {
            return identity;
        }

        let cond = condition_number(x);
        if cond <= ILL_CONDITIONED {
            return identity;
        }

        let n = x.nrows() as f64;
        let mut center = vec![0.0; p];
        let mut scale = vec![1.0; p];
        for j in 0..p {
            let col = x.column(j);
            // Centering is only a reparametrisation when the offset can absorb it.
            let c = if has_offset { col.sum() / n } else { 0.0 };
            let rms = (col.iter().map(|v| (v - c) * (v - c)).sum::<f64>() / n).sqrt();
            center[j] = c;
            scale[j] = if rms.is_finite() && rms > 0.0 { rms } else { 1.0 };
        }
        debug!(condition_number = cond, "rescaling ill-conditioned basis columns");

        Self {
            enabled: true,
            center,
            scale,
            has_offset,
        }
    }

    fn apply(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        if !self.enabled {
            return x.clone();
        }
        let mut xs = x.clone();
        for j in 0..self.scale.len() {
            let (c, s) = (self.center[j], self.scale[j]);
            xs.column_mut(j).apply(|v| *v = (*v - c) / s);
        }
        xs
    }

    /// Map coefficients of the scaled system back to the original columns.
    fn unscale(&self, beta: &DVector<f64>, p: usize) -> (Vec<f64>, Option<f64>) {
        let coefficients: Vec<f64> = (0..p).map(|j| beta[j] / self.scale[j]).collect();
        let offset = self.has_offset.then(|| {
            let shift: f64 = (0..p).map(|j| coefficients[j] * self.center[j]).sum();
            beta[p] - shift
        });
        (coefficients, offset)
    }
}

/// Solve the row-weighted, optionally ridge-augmented system.
fn solve_weighted(
    xs: &DMatrix<f64>,
    y: &DVector<f64>,
    w: &[f64],
    l2_penalty: f64,
    scaling: &ColumnScaling,
) -> CbvResult<crate::math::LeastSquares> {
    let n = xs.nrows();
    let k = xs.ncols();
    let p = scaling.scale.len();
    let ridge_rows = if l2_penalty > 0.0 { p } else { 0 };

    let mut a = DMatrix::<f64>::zeros(n + ridge_rows, k);
    let mut b = DVector::<f64>::zeros(n + ridge_rows);
    for i in 0..n {
        let sw = w[i].sqrt();
        for j in 0..k {
            a[(i, j)] = xs[(i, j)] * sw;
        }
        b[i] = y[i] * sw;
    }
    // Penalise the original-unit coefficient β_j = β'_j / s_j.
    let sl = l2_penalty.sqrt();
    for j in 0..ridge_rows {
        a[(n + j, j)] = sl / scaling.scale[j];
    }

    solve_least_squares(&a, &b)
}
