//! Runtime error types. Numerical failures are recovered locally by the
//! Newton solver where possible; setup errors pass through unchanged.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("singular matrix: zero pivot in row {row}")]
    SingularMatrix { row: usize },

    #[error("no convergence after {iterations} iterations")]
    NoConvergence { iterations: usize },

    #[error("timestep too small: dt = {delta:.3e} s at t = {time:.6e} s")]
    TimestepTooSmall { time: f64, delta: f64 },

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Setup(#[from] ferrite_core::Error),
}

impl Error {
    /// True for failures the solver may recover from by stepping
    /// strategies or timestep reduction.
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            Error::SingularMatrix { .. } | Error::NoConvergence { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
