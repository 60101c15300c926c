//! Built-in baseline solver: DFS over disjunctions with equality
//! propagation.
//!
//! The encoder emits formulas of a narrow shape: disjunctions of
//! conjunctions whose conjuncts are either defining equalities
//! (`var == rhs`) or boolean guards over already-defined values. Within
//! that fragment a model can be found by propagating equalities to a
//! fixpoint and backtracking over disjuncts; no general SMT reasoning is
//! needed. Anything outside the fragment yields `Unknown`, and a real SMT
//! backend can be plugged in through [`SolverFactory`] instead.
//!
//! `Undef` terms satisfy any (dis)equality they appear in: the unknown
//! value is chosen by the adversary, which is exactly the havoc semantics
//! the lowering gives them.

use std::collections::HashMap;

use kestrel_core::{eval, Context, ExprId, ExprKind, Literal, VarId};

use crate::solver::{Model, Solver, SolverError, SolverFactory, SolverResult};

/// Factory producing [`PropagationSolver`] instances.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropagationSolverFactory;

impl SolverFactory for PropagationSolverFactory {
    fn create(&self, _ctx: &Context) -> Box<dyn Solver> {
        Box::new(PropagationSolver::new())
    }
}

/// See the module docs.
#[derive(Default)]
pub struct PropagationSolver {
    formulas: Vec<ExprId>,
    model: Option<Model>,
}

/// A proof obligation: the expression must evaluate to the given polarity.
type Goal = (ExprId, bool);

enum Outcome {
    Sat(HashMap<VarId, Literal>),
    Unsat,
    Unknown,
}

/// Result of attempting one goal against the current environment.
enum Step {
    /// Satisfied without touching the environment.
    Resolved,
    /// Satisfied and the environment grew; stalled goals may now resolve.
    Bound,
    /// Replaced by subgoals that must all hold.
    Expanded(Vec<Goal>),
    /// Disjunction: exactly one alternative must hold.
    Branch(Vec<Goal>),
    /// Cannot make progress with the current bindings.
    Stall,
    /// Contradicts the current environment.
    Conflict,
}

impl PropagationSolver {
    pub fn new() -> Self {
        PropagationSolver::default()
    }
}

impl Solver for PropagationSolver {
    fn add(&mut self, formula: ExprId) -> Result<(), SolverError> {
        self.formulas.push(formula);
        Ok(())
    }

    fn run(&mut self, ctx: &Context) -> Result<SolverResult, SolverError> {
        self.model = None;
        let goals: Vec<Goal> = self.formulas.iter().map(|&f| (f, true)).collect();
        match solve(ctx, goals, HashMap::new()) {
            Outcome::Sat(env) => {
                self.model = Some(Model::from_env(env));
                Ok(SolverResult::Sat)
            }
            Outcome::Unsat => Ok(SolverResult::Unsat),
            Outcome::Unknown => Ok(SolverResult::Unknown),
        }
    }

    fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    fn dump(&self, ctx: &Context) -> String {
        self.formulas
            .iter()
            .map(|&f| format!("(assert {})", ctx.display_expr(f)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn solve(ctx: &Context, mut pending: Vec<Goal>, mut env: HashMap<VarId, Literal>) -> Outcome {
    let mut stalled: Vec<Goal> = Vec::new();

    while let Some(goal) = pending.pop() {
        match step(ctx, goal, &mut env) {
            Step::Resolved => {}
            Step::Bound => {
                // New binding: every stalled goal gets another chance.
                pending.append(&mut stalled);
            }
            Step::Expanded(subgoals) => pending.extend(subgoals),
            Step::Branch(alternatives) => {
                // The rest of the obligations hold along whichever
                // alternative we commit to; try them in order.
                let mut rest = pending;
                rest.append(&mut stalled);
                let mut saw_unknown = false;
                for alt in alternatives {
                    let mut sub = rest.clone();
                    sub.push(alt);
                    match solve(ctx, sub, env.clone()) {
                        Outcome::Sat(model) => return Outcome::Sat(model),
                        Outcome::Unknown => saw_unknown = true,
                        Outcome::Unsat => {}
                    }
                }
                return if saw_unknown {
                    Outcome::Unknown
                } else {
                    Outcome::Unsat
                };
            }
            Step::Stall => stalled.push(goal),
            Step::Conflict => return Outcome::Unsat,
        }
    }

    if stalled.is_empty() {
        Outcome::Sat(env)
    } else {
        Outcome::Unknown
    }
}

fn step(ctx: &Context, (goal, pol): Goal, env: &mut HashMap<VarId, Literal>) -> Step {
    let node = ctx.expr(goal);
    match node.kind() {
        ExprKind::BoolLit(value) => {
            if value == pol {
                Step::Resolved
            } else {
                Step::Conflict
            }
        }

        ExprKind::Not => Step::Expanded(vec![(node.operands()[0], !pol)]),

        ExprKind::And if pol => {
            Step::Expanded(node.operands().iter().map(|&op| (op, true)).collect())
        }
        ExprKind::And => Step::Branch(node.operands().iter().map(|&op| (op, false)).collect()),

        ExprKind::Or if pol => {
            Step::Branch(node.operands().iter().map(|&op| (op, true)).collect())
        }
        ExprKind::Or => Step::Expanded(node.operands().iter().map(|&op| (op, false)).collect()),

        ExprKind::VarRef(var) => match env.get(&var) {
            Some(Literal::Bool(value)) => {
                if *value == pol {
                    Step::Resolved
                } else {
                    Step::Conflict
                }
            }
            Some(_) => Step::Stall,
            None => {
                env.insert(var, Literal::Bool(pol));
                Step::Bound
            }
        },

        // An unknown value can be chosen to satisfy either polarity.
        ExprKind::Undef => Step::Resolved,

        ExprKind::Eq | ExprKind::FEq => {
            equality_step(ctx, node.operands()[0], node.operands()[1], pol, env)
        }
        ExprKind::NotEq => {
            equality_step(ctx, node.operands()[0], node.operands()[1], !pol, env)
        }

        // Any other boolean-typed node: decided by evaluation only.
        _ => match eval(ctx, goal, env) {
            Some(Literal::Bool(value)) => {
                if value == pol {
                    Step::Resolved
                } else {
                    Step::Conflict
                }
            }
            _ => Step::Stall,
        },
    }
}

/// Handles `lhs == rhs` (or `!=` when `want_equal` is false), binding a
/// free variable on one side when the other side is known.
fn equality_step(
    ctx: &Context,
    lhs: ExprId,
    rhs: ExprId,
    want_equal: bool,
    env: &mut HashMap<VarId, Literal>,
) -> Step {
    // Undef on either side is satisfiable regardless of polarity.
    if matches!(ctx.expr(lhs).kind(), ExprKind::Undef)
        || matches!(ctx.expr(rhs).kind(), ExprKind::Undef)
    {
        return Step::Resolved;
    }

    let lhs_val = eval(ctx, lhs, env);
    let rhs_val = eval(ctx, rhs, env);

    match (lhs_val, rhs_val) {
        (Some(a), Some(b)) => {
            if (a == b) == want_equal {
                Step::Resolved
            } else {
                Step::Conflict
            }
        }
        (Some(known), None) => half_known(ctx, rhs, known, want_equal, env),
        (None, Some(known)) => half_known(ctx, lhs, known, want_equal, env),
        (None, None) => Step::Stall,
    }
}

/// One side evaluated to `known`, the other (`open`) did not.
fn half_known(
    ctx: &Context,
    open: ExprId,
    known: Literal,
    want_equal: bool,
    env: &mut HashMap<VarId, Literal>,
) -> Step {
    match ctx.expr(open).kind() {
        // A free variable: equality determines it; disequality determines
        // it only for booleans.
        ExprKind::VarRef(var) => {
            if want_equal {
                env.insert(var, known);
                Step::Bound
            } else if let Literal::Bool(value) = known {
                env.insert(var, Literal::Bool(!value));
                Step::Bound
            } else {
                Step::Stall
            }
        }
        // Boolean equality is bi-implication: push the polarity inwards.
        _ => match known {
            Literal::Bool(value) => Step::Expanded(vec![(open, value == want_equal)]),
            _ => Step::Stall,
        },
    }
}
