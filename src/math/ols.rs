//! Least squares solver.
//!
//! Every fit in this crate reduces to
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T β)^2
//! ```
//!
//! Implementation choices:
//! - Row weights are applied by the caller (scale rows by `sqrt(w_i)`), so this
//!   module only solves an ordinary least squares problem.
//! - We use SVD rather than normal equations: it works for tall matrices and
//!   gives the condition number for free.
//!   (Nalgebra's `QR::solve` is intended for square systems and will panic for
//!   non-square matrices.)

use nalgebra::{DMatrix, DVector};

use crate::error::{CbvError, CbvResult};

/// Above this condition number the system is treated as singular.
pub const SINGULAR_CONDITION: f64 = 1e14;

/// Solution of a least squares problem plus the conditioning of its matrix.
#[derive(Debug, Clone)]
pub struct LeastSquares {
    pub beta: DVector<f64>,
    pub condition_number: f64,
}

/// Ratio of the largest to the smallest singular value.
///
/// Returns `1.0` for a matrix without columns and `INFINITY` when rank deficient.
pub fn condition_number(x: &DMatrix<f64>) -> f64 {
    if x.ncols() == 0 || x.nrows() == 0 {
        return 1.0;
    }
    condition_from_singular_values(&x.singular_values())
}

fn condition_from_singular_values(sv: &DVector<f64>) -> f64 {
    if sv.is_empty() {
        return 1.0;
    }
    let max = sv.max();
    let min = sv.min();
    if !(min > 0.0) || !max.is_finite() {
        return f64::INFINITY;
    }
    max / min
}

/// Solve a least squares problem using SVD.
///
/// Fails with `SingularMatrix` when the matrix is too ill-conditioned to give a
/// meaningful solution.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> CbvResult<LeastSquares> {
    if x.nrows() != y.len() {
        return Err(CbvError::InvalidInput(format!(
            "design matrix has {} rows but target has {} values",
            x.nrows(),
            y.len()
        )));
    }
    if x.ncols() == 0 {
        return Ok(LeastSquares {
            beta: DVector::zeros(0),
            condition_number: 1.0,
        });
    }

    let svd = x.clone().svd(true, true);
    let condition_number = condition_from_singular_values(&svd.singular_values);
    if !condition_number.is_finite() || condition_number > SINGULAR_CONDITION {
        return Err(CbvError::SingularMatrix { condition_number });
    }

    // Singular values below this are numerical noise relative to the largest one.
    let tol = svd.singular_values.max() * f64::EPSILON * x.nrows().max(x.ncols()) as f64;
    let beta = svd
        .solve(y, tol)
        .map_err(|_| CbvError::SingularMatrix { condition_number })?;

    if !beta.iter().all(|v| v.is_finite()) {
        return Err(CbvError::SingularMatrix { condition_number });
    }

    Ok(LeastSquares {
        beta,
        condition_number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let sol = solve_least_squares(&x, &y).unwrap();
        assert!((sol.beta[0] - 2.0).abs() < 1e-10);
        assert!((sol.beta[1] - 3.0).abs() < 1e-10);
        assert!(sol.condition_number.is_finite() && sol.condition_number >= 1.0);
    }

    #[test]
    fn duplicate_columns_are_singular() {
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        let y = DVector::from_row_slice(&[1.0, 2.0, 3.0]);

        let err = solve_least_squares(&x, &y).unwrap_err();
        assert!(matches!(err, CbvError::SingularMatrix { .. }));
    }

    #[test]
    fn condition_number_of_orthogonal_columns_is_one() {
        let x = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        assert!((condition_number(&x) - 1.0).abs() < 1e-12);
        assert_eq!(condition_number(&DMatrix::zeros(3, 0)), 1.0);
    }
}
