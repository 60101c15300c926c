//! The kestrel bounded model checker.
//!
//! Decides whether any execution of a function, with loops unwound up to
//! a bound, can reach a call to the error sentinel. The pipeline:
//!
//! 1. [`unroll`](unroll::unroll) removes back edges by duplicating loop
//!    bodies up to the bound.
//! 2. [`BmcEncoder`](encode::BmcEncoder) runs a dynamic program over the
//!    topological order, producing one reachability formula per error
//!    block (with per-block formula caching and temporary-variable
//!    elimination).
//! 3. A [`Solver`](solver::Solver) decides each formula; the bundled
//!    [`PropagationSolver`](propagate::PropagationSolver) covers the
//!    emitted fragment.
//! 4. [`BmcTraceBuilder`](trace::BmcTraceBuilder) lifts a satisfying
//!    model back into an event trace.
//!
//! [`BoundedModelChecker`](checker::BoundedModelChecker) ties the stages
//! together and returns a [`SafetyResult`](result::SafetyResult).

pub mod automaton;
pub mod checker;
pub mod encode;
pub mod error;
pub mod lower;
pub mod memory;
pub mod options;
pub mod propagate;
pub mod result;
pub mod solver;
pub mod trace;
pub mod unroll;

pub use automaton::translate_function;
pub use checker::BoundedModelChecker;
pub use encode::{is_error_block, BmcEncoder, CancellationFlag, PredSource, ERROR_INTRINSIC};
pub use error::BmcError;
pub use lower::Lowering;
pub use memory::{HavocMemoryModel, MemoryModel};
pub use options::{BmcOptions, IntRepresentation};
pub use propagate::{PropagationSolver, PropagationSolverFactory};
pub use result::SafetyResult;
pub use solver::{Model, Solver, SolverError, SolverFactory, SolverResult};
pub use trace::{BmcTraceBuilder, Trace, TraceError, TraceEvent};
pub use unroll::{topological_order, unroll};
