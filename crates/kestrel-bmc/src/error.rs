//! Checker error types.
//!
//! The closed error set of the verification core. The checker recovers
//! locally only from [`SolverError`](crate::solver::SolverError) (it skips
//! the failing error block and continues); everything else surfaces to the
//! driver.

use thiserror::Error;

use kestrel_core::CoreError;
use kestrel_ir::IrError;

use crate::solver::SolverError;

/// Errors surfaced by the verification pipeline.
#[derive(Debug, Error)]
pub enum BmcError {
    /// Ill-typed expression construction. Fatal to the current run.
    #[error(transparent)]
    Type(#[from] CoreError),

    /// An IR construct no configured model supports. Fatal to the current
    /// run; choose a different memory model or reject the input.
    #[error("unsupported instruction: {reason}")]
    UnsupportedInstruction { reason: String },

    /// Propagated from the solver backend.
    #[error(transparent)]
    Solver(#[from] SolverError),

    /// Cooperative cancellation; no result was produced.
    #[error("verification cancelled")]
    Cancelled,

    /// Malformed input function.
    #[error(transparent)]
    Ir(#[from] IrError),
}
