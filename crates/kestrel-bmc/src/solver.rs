//! The solver boundary.
//!
//! The encoder hands one root formula per error location to a solver
//! obtained from a [`SolverFactory`]; the solver decides satisfiability
//! and, for SAT, produces a [`Model`] mapping variables to literals. Real
//! SMT backends implement these traits; the bundled
//! [`PropagationSolver`](crate::propagate::PropagationSolver) covers the
//! fragment the encoder emits.

use std::collections::HashMap;

use thiserror::Error;

use kestrel_core::{Context, ExprId, Literal, VarId};

/// Verdict of one solver run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverResult {
    Sat,
    Unsat,
    Unknown,
}

/// Errors reported by solver backends.
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    /// The backend cannot decide this class of formula.
    #[error("solver cannot decide this formula: {reason}")]
    Unsupported { reason: String },

    /// The backend ran out of time.
    #[error("solver timed out")]
    Timeout,

    /// Backend-specific failure.
    #[error("solver backend error: {message}")]
    Backend { message: String },
}

/// A satisfying assignment. Variables the solver left unconstrained are
/// simply absent.
#[derive(Debug, Clone, Default)]
pub struct Model {
    entries: HashMap<VarId, Literal>,
}

impl Model {
    pub fn new() -> Self {
        Model::default()
    }

    pub fn from_env(entries: HashMap<VarId, Literal>) -> Self {
        Model { entries }
    }

    pub fn get(&self, var: VarId) -> Option<Literal> {
        self.entries.get(&var).copied()
    }

    pub fn insert(&mut self, var: VarId, value: Literal) {
        self.entries.insert(var, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The raw assignment, in the shape the evaluator consumes.
    pub fn env(&self) -> &HashMap<VarId, Literal> {
        &self.entries
    }

    /// Renders the model for diagnostics, sorted by variable id.
    pub fn dump(&self, ctx: &Context) -> String {
        let mut entries: Vec<(VarId, Literal)> =
            self.entries.iter().map(|(&v, &l)| (v, l)).collect();
        entries.sort_by_key(|(v, _)| v.0);
        entries
            .iter()
            .map(|(v, l)| format!("{} = {}", ctx.var(*v).name(), l))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One satisfiability query. Formulas added before `run` are conjoined.
pub trait Solver {
    fn add(&mut self, formula: ExprId) -> Result<(), SolverError>;

    fn run(&mut self, ctx: &Context) -> Result<SolverResult, SolverError>;

    /// The model of the last `Sat` verdict.
    fn model(&self) -> Option<&Model>;

    /// The asserted formulas in the backend's own syntax, for the
    /// `dump-solver-formula` diagnostic.
    fn dump(&self, _ctx: &Context) -> String {
        String::new()
    }
}

/// Creates fresh solver instances over the symbols of a context.
pub trait SolverFactory {
    fn create(&self, ctx: &Context) -> Box<dyn Solver>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::TypeId;

    #[test]
    fn model_lookup_and_dump() {
        let mut ctx = Context::new();
        let x = ctx.declare_var("main/x", TypeId::INT).unwrap();
        let y = ctx.declare_var("main/y", TypeId::BOOL).unwrap();

        let mut model = Model::new();
        model.insert(x, Literal::Int(3));
        model.insert(y, Literal::Bool(true));

        assert_eq!(model.get(x), Some(Literal::Int(3)));
        assert_eq!(model.get(y), Some(Literal::Bool(true)));
        assert_eq!(model.len(), 2);

        let dump = model.dump(&ctx);
        assert_eq!(dump, "main/x = 3\nmain/y = true");
    }

    #[test]
    fn missing_entries_are_absent() {
        let model = Model::new();
        assert!(model.is_empty());
        assert_eq!(model.get(VarId(0)), None);
    }
}
