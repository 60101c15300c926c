//! The reachability encoder: a dynamic program over the topological order.
//!
//! For an acyclic CFG `b0..bn-1` (entry first), `reach[i]` is the formula
//! "execution reaches the entry of block i":
//!
//! ```text
//! reach[0] = true
//! reach[i] = Or over j in pred(i) of (reach[j] And edge(j, i))
//! ```
//!
//! `edge(j, i)` conjoins the cached body formula of `j`, the guard of the
//! branch selecting `i`, the predecessor-variable binding of `i` (when `i`
//! joins several edges), and one equality per phi of `i`. Because every
//! block contributes one formula and hash-consing collapses shared
//! subterms across paths, the whole encoding stays linear in the DAG
//! where a path enumeration would be exponential.
//!
//! The encoder also performs on-the-fly temporary elimination: a
//! single-use `v == rhs` binding is dropped and `rhs` substituted at the
//! use, unless the use is a float comparison and NaN has not been assumed
//! away (the NaN guards would otherwise duplicate the operand).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use kestrel_core::{Context, ExprBuilder, ExprId, ExprKind, VarId};
use kestrel_ir::{BlockId, Function, Operand, Rhs, Terminator, ValueId};

use crate::error::BmcError;
use crate::lower::Lowering;
use crate::options::BmcOptions;
use crate::unroll::topological_order;

/// Name of the sentinel intrinsic whose call sites are error locations.
pub const ERROR_INTRINSIC: &str = "kestrel.error_code";

/// Cooperative cancellation flag, checked between blocks of the DP.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        CancellationFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// How the trace builder recovers the predecessor of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredSource {
    /// Multi-join block: the model value of this variable names the
    /// topological index of the chosen predecessor.
    Variable(VarId),
    /// Single-predecessor block: the predecessor's topological index.
    Single(usize),
}

/// Use statistics driving temporary-variable elimination.
struct UseCounts {
    counts: HashMap<ValueId, u32>,
    fcmp_users: HashSet<ValueId>,
}

impl UseCounts {
    fn compute(function: &Function) -> Self {
        let mut counts: HashMap<ValueId, u32> = HashMap::new();
        let mut fcmp_users: HashSet<ValueId> = HashSet::new();
        let mut record = |op: &Operand, in_fcmp: bool| {
            if let Operand::Value(v) = op {
                *counts.entry(*v).or_insert(0) += 1;
                if in_fcmp {
                    fcmp_users.insert(*v);
                }
            }
        };

        for block_id in function.blocks() {
            let block = match function.block(block_id) {
                Some(b) => b,
                None => continue,
            };
            for phi in &block.phis {
                for (_, op) in &phi.incoming {
                    record(op, false);
                }
            }
            for instr in &block.instrs {
                let fcmp = matches!(instr.rhs, Rhs::FCmp { .. });
                match &instr.rhs {
                    Rhs::Const(_) | Rhs::Alloc | Rhs::Undef => {}
                    Rhs::Arith { lhs, rhs, .. }
                    | Rhs::Bit { lhs, rhs, .. }
                    | Rhs::Shift { lhs, rhs, .. }
                    | Rhs::Cmp { lhs, rhs, .. }
                    | Rhs::FCmp { lhs, rhs, .. }
                    | Rhs::FArith { lhs, rhs, .. } => {
                        record(lhs, fcmp);
                        record(rhs, fcmp);
                    }
                    Rhs::Un { operand, .. } | Rhs::Cast { operand, .. } => record(operand, false),
                    Rhs::Select {
                        cond,
                        then_value,
                        else_value,
                    } => {
                        record(cond, false);
                        record(then_value, false);
                        record(else_value, false);
                    }
                    Rhs::Call { args, .. } => {
                        for arg in args {
                            record(arg, false);
                        }
                    }
                    Rhs::Load { ptr } => record(ptr, false),
                    Rhs::Store { ptr, value } => {
                        record(ptr, false);
                        record(value, false);
                    }
                }
            }
            match &block.terminator {
                Terminator::CondBr { cond, .. } => record(cond, false),
                Terminator::Return { value: Some(v) } => record(v, false),
                _ => {}
            }
        }
        UseCounts { counts, fcmp_users }
    }

    fn count(&self, value: ValueId) -> u32 {
        self.counts.get(&value).copied().unwrap_or(0)
    }

    fn used_by_fcmp(&self, value: ValueId) -> bool {
        self.fcmp_users.contains(&value)
    }
}

/// Per-run encoder state. Encoding is deterministic: identical input and
/// options produce handle-identical formulas.
pub struct BmcEncoder<'f> {
    function: &'f Function,
    topo: Vec<BlockId>,
    block_index: HashMap<BlockId, usize>,
    lowering: Lowering,
    options: BmcOptions,
    cancel: CancellationFlag,
    formula_cache: HashMap<BlockId, ExprId>,
    preds: HashMap<BlockId, PredSource>,
    uses: UseCounts,
}

impl<'f> BmcEncoder<'f> {
    /// Prepares an encoder over an acyclic function.
    pub fn new(
        function: &'f Function,
        lowering: Lowering,
        options: &BmcOptions,
        cancel: CancellationFlag,
    ) -> Result<Self, BmcError> {
        let topo = topological_order(function)?;
        let block_index: HashMap<BlockId, usize> =
            topo.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        let uses = UseCounts::compute(function);
        Ok(BmcEncoder {
            function,
            topo,
            block_index,
            lowering,
            options: options.clone(),
            cancel,
            formula_cache: HashMap::new(),
            preds: HashMap::new(),
            uses,
        })
    }

    pub fn topo(&self) -> &[BlockId] {
        &self.topo
    }

    pub fn block_index(&self) -> &HashMap<BlockId, usize> {
        &self.block_index
    }

    pub fn preds(&self) -> &HashMap<BlockId, PredSource> {
        &self.preds
    }

    pub fn lowering(&self) -> &Lowering {
        &self.lowering
    }

    /// Consumes the encoder, releasing the lowering state (value map and
    /// eliminated bindings) for trace reconstruction.
    pub fn into_lowering(self) -> Lowering {
        self.lowering
    }

    /// Runs the DP and returns one formula per error block, in topological
    /// order. Satisfiability of an entry is equivalent to reachability of
    /// that error location within the bound.
    pub fn encode(&mut self, ctx: &mut Context) -> Result<IndexMap<BlockId, ExprId>, BmcError> {
        self.init_pred_sources(ctx)?;

        let n = self.topo.len();
        let (true_lit, false_lit) = {
            let mut b = ExprBuilder::new(ctx);
            (b.true_(), b.false_())
        };

        let mut reach: Vec<ExprId> = vec![false_lit; n];
        reach[0] = true_lit;

        for i in 1..n {
            if self.cancel.is_cancelled() {
                return Err(BmcError::Cancelled);
            }
            let block = self.topo[i];
            let mut disjuncts: Vec<ExprId> = Vec::new();
            for pred in self.function.predecessors(block) {
                let j = self.block_index[&pred];
                debug_assert!(j < i, "predecessors precede their block in a topological sort");
                if reach[j] == false_lit {
                    continue;
                }
                let edge = self.encode_edge(ctx, pred, block)?;
                let mut b = ExprBuilder::new(ctx);
                disjuncts.push(b.and2(reach[j], edge)?);
            }
            if !disjuncts.is_empty() {
                let mut b = ExprBuilder::new(ctx);
                reach[i] = b.or(&disjuncts)?;
            }
        }

        let mut result: IndexMap<BlockId, ExprId> = IndexMap::new();
        for (i, &block) in self.topo.iter().enumerate() {
            if !is_error_block(self.function, block) {
                continue;
            }
            let mut formula = reach[i];
            if self.options.assume_no_nan {
                formula = conjoin_no_nan(ctx, formula)?;
            }
            debug!(block = %block, "encoded error block");
            result.insert(block, formula);
        }
        Ok(result)
    }

    /// The encoding of leaving `from` towards `to`: cached body of `from`,
    /// branch selection, predecessor binding, phi resolution.
    fn encode_edge(
        &mut self,
        ctx: &mut Context,
        from: BlockId,
        to: BlockId,
    ) -> Result<ExprId, BmcError> {
        let mut parts: Vec<ExprId> = Vec::new();

        // Body of `from`, computed once and memoized.
        if !self.formula_cache.contains_key(&from) {
            let body = self.encode_body(ctx, from)?;
            self.formula_cache.insert(from, body);
        }
        parts.push(self.formula_cache[&from]);

        // Branch selection: the disjunction of the guards of every
        // successor position targeting `to` (one, almost always).
        let successors = self.function.successors(from);
        let terminator = self
            .function
            .block(from)
            .map(|b| b.terminator.clone())
            .unwrap_or(Terminator::Abort);
        let mut guards: Vec<ExprId> = Vec::new();
        for (position, succ) in successors.iter().enumerate() {
            if *succ == to {
                guards.push(
                    self.lowering
                        .branch_guard(ctx, self.function, &terminator, position)?,
                );
            }
        }
        if guards.is_empty() {
            return Err(BmcError::UnsupportedInstruction {
                reason: format!("{} is not a successor of {}", to, from),
            });
        }
        let mut b = ExprBuilder::new(ctx);
        parts.push(b.or(&guards)?);

        // Predecessor identification for join blocks.
        if let Some(PredSource::Variable(pred_var)) = self.preds.get(&to) {
            let var_ref = ctx.var_ref(*pred_var);
            let j = self.block_index[&from] as u64;
            let mut b = ExprBuilder::new(ctx);
            let j_lit = b.bv_lit(j, 32);
            parts.push(b.eq(var_ref, j_lit)?);
        }

        // Phi resolution for this edge.
        let phis = self
            .function
            .block(to)
            .map(|b| b.phis.clone())
            .unwrap_or_default();
        for phi in &phis {
            parts.push(self.lowering.phi_binding(ctx, self.function, phi, from)?);
        }

        let mut b = ExprBuilder::new(ctx);
        Ok(b.and(&parts)?)
    }

    /// Conjunction of the non-phi, non-terminator instructions of a block,
    /// with temporary-variable elimination applied.
    fn encode_body(&mut self, ctx: &mut Context, block: BlockId) -> Result<ExprId, BmcError> {
        let instrs = self
            .function
            .block(block)
            .map(|b| b.instrs.clone())
            .unwrap_or_default();
        let mut parts: Vec<ExprId> = Vec::new();
        for instr in &instrs {
            let Some(expr) = self.lowering.transform_instr(ctx, self.function, instr)? else {
                continue;
            };
            if !self.options.no_elim_vars {
                if let Some(dest) = instr.dest {
                    if let Some(rhs) = self.try_to_eliminate(ctx, dest, expr) {
                        self.lowering.eliminate(dest, rhs);
                        continue;
                    }
                }
            }
            parts.push(expr);
        }
        let mut b = ExprBuilder::new(ctx);
        Ok(b.and(&parts)?)
    }

    /// A binding `v == rhs` is elided when `v` has exactly one use and
    /// that use is not a float comparison (unless NaN is assumed away).
    fn try_to_eliminate(&self, ctx: &Context, dest: ValueId, expr: ExprId) -> Option<ExprId> {
        if self.uses.count(dest) != 1 {
            return None;
        }
        // A float compare reads its operand several times through the NaN
        // guards; substitution would duplicate it.
        if self.uses.used_by_fcmp(dest) && !self.options.assume_no_nan {
            return None;
        }
        let node = ctx.expr(expr);
        if !matches!(node.kind(), ExprKind::Eq | ExprKind::FEq) || node.operands().len() != 2 {
            return None;
        }
        let lhs = ctx.expr(node.operands()[0]);
        match lhs.kind() {
            ExprKind::VarRef(var) if Some(var) == self.lowering.value_var(dest) => {
                Some(node.operands()[1])
            }
            _ => None,
        }
    }

    /// Introduces `pred<i> : Bv(32)` for every block joining more than one
    /// incoming edge; single-predecessor blocks record the predecessor's
    /// index directly; the entry records nothing.
    fn init_pred_sources(&mut self, ctx: &mut Context) -> Result<(), BmcError> {
        let bv32 = ctx.bv_type(32);
        for (i, &block) in self.topo.iter().enumerate() {
            let preds = self.function.predecessors(block);
            if preds.len() > 1 {
                let name = format!("{}/pred{}", self.function.name(), i);
                let var = ctx.declare_var(&name, bv32).map_err(BmcError::Type)?;
                self.preds.insert(block, PredSource::Variable(var));
            } else if let [only] = preds.as_slice() {
                let j = self.block_index[only];
                self.preds.insert(block, PredSource::Single(j));
            }
        }
        Ok(())
    }
}

/// A block is an error block when it calls the error sentinel.
pub fn is_error_block(function: &Function, block: BlockId) -> bool {
    function
        .block(block)
        .map(|b| {
            b.instrs.iter().any(|instr| {
                matches!(&instr.rhs, Rhs::Call { callee, .. } if callee == ERROR_INTRINSIC)
            })
        })
        .unwrap_or(false)
}

/// Conjoins `not isnan(v)` for every float-typed symbol.
fn conjoin_no_nan(ctx: &mut Context, formula: ExprId) -> Result<ExprId, BmcError> {
    let float_refs: Vec<ExprId> = ctx
        .variables()
        .filter(|(_, var)| ctx.ty(var.ty()).is_float())
        .map(|(_, var)| var.ref_expr())
        .collect();
    let mut b = ExprBuilder::new(ctx);
    let mut parts = vec![formula];
    for var_ref in float_refs {
        let isnan = b.fisnan(var_ref)?;
        parts.push(b.not(isnan)?);
    }
    Ok(b.and(&parts)?)
}
