//! Error taxonomy shared by the finder and the fitters.

use crate::solver::SolverError;

/// Errors surfaced to callers of the ring finder and the Airy fitter.
///
/// Geometric and numerical failures inside one plane are recovered by the
/// finder itself; they only reach the caller through the explicit fit APIs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FpError {
    /// Input array does not have the expected dimensionality or is empty.
    #[error("expected a non-empty {expected}-D array, got shape {got:?}")]
    Shape {
        /// Required number of axes.
        expected: usize,
        /// Shape that was supplied.
        got: Vec<usize>,
    },
    /// Requested plane index is outside the cube.
    #[error("plane index {index} out of range for a cube with {planes} planes")]
    PlaneOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of planes in the cube.
        planes: usize,
    },
    /// Circle fit solver failed; carries the parameters it started from.
    #[error("circle fit from (col={:.3}, row={:.3}, r={:.3}, t={:.3}) failed: {source}", .initial[0], .initial[1], .initial[2], .initial[3])]
    CircleFit {
        /// Initial `[center_col, center_row, radius, thickness]`.
        initial: [f64; 4],
        /// Underlying solver failure.
        source: SolverError,
    },
    /// Airy fit solver failed.
    #[error("Airy fit failed: {source}")]
    AiryFit {
        /// Underlying solver failure.
        source: SolverError,
    },
    /// Fit input is malformed.
    #[error("invalid fit input: {0}")]
    InvalidInput(String),
    /// The worker thread for a fit task could not be started.
    #[error("could not start fit task '{name}': {reason}")]
    TaskSpawn { name: String, reason: String },
    /// A fit task panicked before producing a result.
    #[error("fit task '{0}' panicked")]
    TaskPanicked(String),
    /// A fit task did not finish within its budget and was abandoned.
    #[error("fit task '{0}' exceeded its budget and was abandoned")]
    TaskTimedOut(String),
}

/// Result alias used across the crate.
pub type FpResult<T> = Result<T, FpError>;
