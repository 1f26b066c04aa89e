//! Error types.
//!
//! - `CbvError`: typed failures of the correction core (alignment, selection, numerics)
//! - `AppError`: what the `cbv` binary reports, with a process exit code

use thiserror::Error;

/// Failures raised by the correction core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CbvError {
    /// No usable overlap between the light curve and the basis vectors.
    #[error("alignment failed: {reason}")]
    Alignment { reason: String },

    /// The caller's basis-vector selection is malformed (e.g. duplicates).
    #[error("invalid basis vector selection: {0}")]
    InvalidSelection(String),

    /// A requested basis-vector ID does not exist in the set.
    #[error("unknown basis vector id {id} (available: {available:?})")]
    UnknownBasisVector { id: u32, available: Vec<u32> },

    #[error("underdetermined system: {rows} rows for {columns} columns (need at least columns + 1)")]
    UnderdeterminedSystem { rows: usize, columns: usize },

    #[error("singular design matrix (condition number {condition_number:e})")]
    SingularMatrix { condition_number: f64 },

    /// Robust iteration hit the iteration cap before meeting the tolerance.
    #[error("robust fit did not converge after {iterations} iterations (last relative change {last_change:e})")]
    NonConvergence { iterations: usize, last_change: f64 },

    /// Malformed inputs or options (length mismatches, negative penalties, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type CbvResult<T> = Result<T, CbvError>;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<CbvError> for AppError {
    fn from(err: CbvError) -> Self {
        // 2 = bad input/config, 3 = data problems, 4 = numerical failures.
        let exit_code = match &err {
            CbvError::InvalidInput(_) => 2,
            CbvError::Alignment { .. }
            | CbvError::InvalidSelection(_)
            | CbvError::UnknownBasisVector { .. } => 3,
            CbvError::UnderdeterminedSystem { .. }
            | CbvError::SingularMatrix { .. }
            | CbvError::NonConvergence { .. } => 4,
        };
        AppError::new(exit_code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_exit_codes() {
        let err: AppError = CbvError::InvalidSelection("dup".into()).into();
        assert_eq!(err.exit_code(), 3);

        let err: AppError = CbvError::SingularMatrix { condition_number: 1e20 }.into();
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("singular"));

        let err: AppError = CbvError::InvalidInput("bad".into()).into();
        assert_eq!(err.exit_code(), 2);
    }
}
