//! CFG-to-automaton translation.
//!
//! Builds the control-flow automaton of an unrolled function: one
//! location per basic block (plus the automaton's exit), and one guarded
//! assignment transition per CFG edge carrying the block's bindings and
//! the phi resolutions of that edge. Return terminators transition to the
//! automaton's exit; abort terminators leave their location as a sink.

use std::collections::HashMap;

use kestrel_cfa::{CfaId, CfaSystem, LocId, VariableAssignment};
use kestrel_core::{Context, ExprBuilder, ExprId};
use kestrel_ir::{BlockId, Function, Rhs, Terminator};

use crate::error::BmcError;
use crate::lower::Lowering;
use crate::memory::MemoryModel;
use crate::options::BmcOptions;

/// Translates an acyclic function into a fresh automaton of `system`.
pub fn translate_function(
    ctx: &mut Context,
    function: &Function,
    options: &BmcOptions,
    memory: Box<dyn MemoryModel>,
    system: &mut CfaSystem,
) -> Result<CfaId, BmcError> {
    let cfa_id = system.create_cfa(function.name());
    let mut lowering = Lowering::new(function, options, memory);
    let cfa = system
        .get_mut(cfa_id)
        .ok_or_else(|| BmcError::UnsupportedInstruction {
            reason: "automaton registration failed".to_string(),
        })?;

    // Locations: the IR entry reuses the automaton's entry location.
    let mut locations: HashMap<BlockId, LocId> = HashMap::new();
    locations.insert(function.entry(), cfa.entry());
    for block in function.blocks() {
        if block != function.entry() {
            locations.insert(block, cfa.create_location());
        }
    }

    for block_id in function.blocks() {
        let block = match function.block(block_id) {
            Some(b) => b,
            None => continue,
        };

        // The block's own bindings, shared by each outgoing transition.
        let mut assignments: Vec<VariableAssignment> = Vec::new();
        for instr in &block.instrs {
            match &instr.rhs {
                Rhs::Call { .. } | Rhs::Alloc | Rhs::Load { .. } | Rhs::Store { .. } => {
                    // Havoc results: the variable exists, unconstrained.
                    if let Some(dest) = instr.dest {
                        lowering.var_for(ctx, function, dest)?;
                    }
                }
                _ => {
                    let Some(dest) = instr.dest else { continue };
                    let value = lowering.rhs_expr(ctx, function, instr)?;
                    let variable = lowering.var_for(ctx, function, dest)?;
                    assignments.push(VariableAssignment { variable, value });
                }
            }
        }

        let source = locations[&block_id];
        match &block.terminator {
            Terminator::Return { .. } => {
                let guard = true_guard(ctx);
                let exit = cfa.exit();
                cfa.create_assign_transition(source, exit, guard, assignments.clone())
                    .map_err(|e| BmcError::UnsupportedInstruction {
                        reason: e.to_string(),
                    })?;
            }
            Terminator::Abort => {}
            terminator => {
                for (position, succ) in function.successors(block_id).iter().enumerate() {
                    let guard = lowering.branch_guard(ctx, function, terminator, position)?;

                    // Joins resolve per edge: append the phi bindings of
                    // the target for this specific predecessor.
                    let mut edge_assignments = assignments.clone();
                    if let Some(succ_block) = function.block(*succ) {
                        for phi in &succ_block.phis {
                            let (_, op) = phi
                                .incoming
                                .iter()
                                .find(|(pred, _)| *pred == block_id)
                                .ok_or_else(|| BmcError::UnsupportedInstruction {
                                    reason: format!(
                                        "phi {} has no incoming value from {}",
                                        phi.dest, block_id
                                    ),
                                })?;
                            let value = lowering.operand_expr(ctx, function, op)?;
                            let variable = lowering.var_for(ctx, function, phi.dest)?;
                            edge_assignments.push(VariableAssignment { variable, value });
                        }
                    }

                    let target = locations[succ];
                    cfa.create_assign_transition(source, target, guard, edge_assignments)
                        .map_err(|e| BmcError::UnsupportedInstruction {
                            reason: e.to_string(),
                        })?;
                }
            }
        }
    }

    // Every lowered value is a local of the automaton.
    let locals: Vec<_> = function
        .blocks()
        .filter_map(|b| function.block(b))
        .flat_map(|b| {
            b.phis
                .iter()
                .map(|p| p.dest)
                .chain(b.instrs.iter().filter_map(|i| i.dest))
        })
        .filter_map(|v| lowering.value_var(v))
        .collect();
    for var in locals {
        cfa.adopt_local(var);
    }

    Ok(cfa_id)
}

fn true_guard(ctx: &mut Context) -> ExprId {
    let mut b = ExprBuilder::new(ctx);
    b.true_()
}
