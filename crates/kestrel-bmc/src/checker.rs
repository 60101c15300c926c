//! The checker driver: unwind, encode, solve, reconstruct.
//!
//! Orchestrates one verification run. Error blocks are checked
//! independently, in topological order; a solver failure on one block is
//! logged and the next block is still checked (if a later block yields a
//! counterexample, the run fails concretely). When no counterexample is
//! found and some block could not be decided, the stashed solver report
//! surfaces instead of an unsound "safe" claim.

use tracing::{debug, info, warn};

use kestrel_core::Context;
use kestrel_ir::{BlockId, Function, IrConst, Operand, Rhs};

use crate::encode::{BmcEncoder, CancellationFlag, ERROR_INTRINSIC};
use crate::error::BmcError;
use crate::lower::Lowering;
use crate::memory::MemoryModel;
use crate::options::BmcOptions;
use crate::result::SafetyResult;
use crate::solver::{Model, SolverError, SolverFactory, SolverResult};
use crate::trace::{BmcTraceBuilder, TraceError};
use crate::unroll::unroll;

/// One-function bounded model checker.
pub struct BoundedModelChecker<'a> {
    options: BmcOptions,
    solver_factory: &'a dyn SolverFactory,
    cancel: CancellationFlag,
}

impl<'a> BoundedModelChecker<'a> {
    pub fn new(options: BmcOptions, solver_factory: &'a dyn SolverFactory) -> Self {
        BoundedModelChecker {
            options,
            solver_factory,
            cancel: CancellationFlag::new(),
        }
    }

    /// Installs a shared cancellation flag checked between blocks.
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs the full pipeline on `function`.
    pub fn run(
        &self,
        ctx: &mut Context,
        function: &Function,
        memory: Box<dyn MemoryModel>,
    ) -> Result<SafetyResult, BmcError> {
        info!(
            function = function.name(),
            blocks = function.block_count(),
            bound = self.options.bound,
            "encoding program into a reachability formula"
        );

        let unrolled = unroll(function, self.options.bound)?;
        let lowering = Lowering::new(&unrolled, &self.options, memory);
        let mut encoder =
            BmcEncoder::new(&unrolled, lowering, &self.options, self.cancel.clone())?;
        let encoded = encoder.encode(ctx)?;

        // Detach the reconstruction inputs from the encoder.
        let topo = encoder.topo().to_vec();
        let block_index = encoder.block_index().clone();
        let preds = encoder.preds().clone();
        let lowering = encoder.into_lowering();

        let mut stashed: Option<SolverError> = None;

        for (&error_block, &formula) in &encoded {
            if self.cancel.is_cancelled() {
                return Err(BmcError::Cancelled);
            }
            let block_name = unrolled
                .block(error_block)
                .map(|b| b.name.clone())
                .unwrap_or_else(|| error_block.to_string());
            debug!(block = %block_name, "checking error block");

            if self.options.dump_formula {
                eprintln!("; formula for {}", block_name);
                eprintln!("{}", ctx.display_expr(formula));
            }

            let mut solver = self.solver_factory.create(ctx);
            if let Err(error) = solver.add(formula) {
                warn!(block = %block_name, %error, "solver rejected the formula");
                stashed.get_or_insert(error);
                continue;
            }
            if self.options.dump_solver_formula {
                eprintln!("{}", solver.dump(ctx));
            }

            match solver.run(ctx) {
                Ok(SolverResult::Sat) => {
                    debug!(block = %block_name, "formula is satisfiable");
                    let model = solver.model().cloned().unwrap_or_else(Model::new);
                    if self.options.dump_model {
                        eprintln!("{}", model.dump(ctx));
                    }

                    let builder = BmcTraceBuilder::new(
                        &unrolled,
                        &topo,
                        &block_index,
                        &preds,
                        &lowering,
                        error_block,
                    );
                    let trace = match builder.build(ctx, &model) {
                        Ok(trace) => trace,
                        Err(TraceError::Incomplete { block, partial }) => {
                            warn!(block = %block, "counterexample trace is incomplete");
                            partial
                        }
                    };
                    let error_code =
                        extract_error_code(&unrolled, error_block, &lowering, ctx, &model);
                    return Ok(SafetyResult::Fail { error_code, trace });
                }
                Ok(SolverResult::Unsat) => {
                    debug!(block = %block_name, "formula is unsatisfiable");
                }
                Ok(SolverResult::Unknown) => {
                    warn!(block = %block_name, "solver could not decide the formula");
                    stashed.get_or_insert(SolverError::Unsupported {
                        reason: format!("solver returned unknown for block {}", block_name),
                    });
                }
                Err(error) => {
                    warn!(block = %block_name, %error, "solver failed; continuing");
                    stashed.get_or_insert(error);
                }
            }
        }

        match stashed {
            // Every decided block was unsatisfiable, but at least one
            // block remains open; surface the solver's report rather than
            // claim safety.
            Some(error) => Err(BmcError::Solver(error)),
            None => Ok(SafetyResult::Success),
        }
    }
}

/// Reads the error code of an error block: a literal intrinsic argument
/// directly, a symbolic one through the model.
fn extract_error_code(
    function: &Function,
    error_block: BlockId,
    lowering: &Lowering,
    ctx: &Context,
    model: &Model,
) -> u32 {
    let Some(block) = function.block(error_block) else {
        return 0;
    };
    for instr in &block.instrs {
        let Rhs::Call { callee, args } = &instr.rhs else {
            continue;
        };
        if callee != ERROR_INTRINSIC {
            continue;
        }
        return match args.first() {
            Some(Operand::Const(IrConst::Int { value, .. })) => *value as u32,
            Some(Operand::Value(value)) => {
                // Retrieve the symbolic code from the model.
                let from_model = lowering
                    .value_var(*value)
                    .and_then(|var| model.get(var))
                    .and_then(|lit| lit.as_u64());
                let from_elim = lowering
                    .eliminated()
                    .get(value)
                    .and_then(|&e| kestrel_core::eval(ctx, e, model.env()))
                    .and_then(|lit| lit.as_u64());
                from_model.or(from_elim).unwrap_or(0) as u32
            }
            _ => 0,
        };
    }
    0
}
