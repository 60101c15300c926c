//! Bounded loop unwinding.
//!
//! Turns a reducible CFG with back edges into an acyclic CFG. Natural
//! loops are found through dominators; each loop body is physically
//! duplicated so that the header can be entered at most `bound` times, and
//! the edge that would enter it once more is retargeted to a fresh abort
//! block. Executions needing more iterations are therefore cut off, never
//! accepted. With `bound = 0` the entry edges themselves are cut, so the
//! loop is never entered at all.
//!
//! Inner loops are unrolled first; the outer unroll then duplicates the
//! already-acyclic inner copies, which keeps nesting faithful. Unreachable
//! blocks are pruned after each loop, so the result is a DAG with a
//! well-defined topological order.

use std::collections::{HashMap, HashSet};

use petgraph::algo::dominators::{self, Dominators};
use petgraph::graph::NodeIndex;

use kestrel_ir::{BlockId, Function, Instr, IrError, Operand, Phi, Rhs, Terminator, ValueId};

/// One natural loop: its header, the back-edge sources, and the body
/// (header included), sorted for determinism.
struct NaturalLoop {
    header: BlockId,
    latches: Vec<BlockId>,
    body: Vec<BlockId>,
}

/// Unrolls every loop of `function` up to `bound` header entries.
pub fn unroll(function: &Function, bound: u32) -> Result<Function, IrError> {
    let mut f = function.clone();
    remove_unreachable(&mut f)?;

    loop {
        let loops = find_loops(&f);
        if loops.is_empty() {
            break;
        }
        let headers: HashSet<BlockId> = loops.iter().map(|l| l.header).collect();
        // An innermost loop contains no header but its own.
        let target = loops
            .iter()
            .find(|l| {
                l.body
                    .iter()
                    .all(|b| *b == l.header || !headers.contains(b))
            })
            .ok_or_else(|| IrError::MalformedCfg {
                reason: "irreducible loop nest".to_string(),
            })?;
        unroll_loop(&mut f, target, bound)?;
        remove_unreachable(&mut f)?;
    }
    Ok(f)
}

/// Topological order of an acyclic CFG, entry first.
pub fn topological_order(function: &Function) -> Result<Vec<BlockId>, IrError> {
    let order = petgraph::algo::toposort(function.graph(), None).map_err(|_| {
        IrError::MalformedCfg {
            reason: "control flow contains a cycle".to_string(),
        }
    })?;
    let order: Vec<BlockId> = order.into_iter().map(BlockId::from).collect();
    if order.first() != Some(&function.entry()) {
        return Err(IrError::MalformedCfg {
            reason: "entry block is not the unique source".to_string(),
        });
    }
    Ok(order)
}

// ---------------------------------------------------------------------------
// Loop discovery
// ---------------------------------------------------------------------------

fn dominates(doms: &Dominators<NodeIndex<u32>>, dominator: BlockId, node: BlockId) -> bool {
    match doms.dominators(node.into()) {
        Some(mut iter) => iter.any(|d| d == dominator.into()),
        None => false,
    }
}

fn find_loops(f: &Function) -> Vec<NaturalLoop> {
    let doms = dominators::simple_fast(f.graph(), f.entry().into());

    // Back edges grouped by header, in block-creation order.
    let mut headers: Vec<BlockId> = Vec::new();
    let mut latches_of: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for u in f.blocks() {
        let mut seen: Vec<BlockId> = Vec::new();
        for v in f.successors(u) {
            if seen.contains(&v) {
                continue;
            }
            seen.push(v);
            if dominates(&doms, v, u) {
                if !latches_of.contains_key(&v) {
                    headers.push(v);
                }
                latches_of.entry(v).or_default().push(u);
            }
        }
    }

    headers
        .into_iter()
        .map(|header| {
            let latches = latches_of.remove(&header).unwrap_or_default();
            let body = natural_loop_body(f, header, &latches);
            NaturalLoop {
                header,
                latches,
                body,
            }
        })
        .collect()
}

/// The body of a natural loop: all blocks that reach a latch without
/// passing through the header, plus the header itself.
fn natural_loop_body(f: &Function, header: BlockId, latches: &[BlockId]) -> Vec<BlockId> {
    let mut visited: HashSet<BlockId> = HashSet::new();
    visited.insert(header);
    let mut worklist: Vec<BlockId> = Vec::new();
    for &latch in latches {
        if visited.insert(latch) {
            worklist.push(latch);
        }
    }
    while let Some(b) = worklist.pop() {
        for pred in f.predecessors(b) {
            if visited.insert(pred) {
                worklist.push(pred);
            }
        }
    }
    let mut body: Vec<BlockId> = visited.into_iter().collect();
    body.sort();
    body
}

// ---------------------------------------------------------------------------
// Single-loop unrolling
// ---------------------------------------------------------------------------

fn add_abort(f: &mut Function) -> Result<BlockId, IrError> {
    let abort = f.add_block("unwind.abort");
    f.set_terminator(abort, Terminator::Abort)?;
    Ok(abort)
}

fn unroll_loop(f: &mut Function, lp: &NaturalLoop, bound: u32) -> Result<(), IrError> {
    let header = lp.header;
    let body: HashSet<BlockId> = lp.body.iter().copied().collect();

    if bound == 0 {
        // The first header entry is already one too many.
        if header == f.entry() {
            // The virtual program-entry edge cannot be retargeted; empty
            // the entry block and cut there.
            if let Some(phis) = f.phis_mut(header) {
                phis.clear();
            }
            if let Some(instrs) = f.instrs_mut(header) {
                instrs.clear();
            }
            f.set_terminator(header, Terminator::Abort)?;
            return Ok(());
        }
        let abort = add_abort(f)?;
        for pred in f.predecessors(header) {
            if body.contains(&pred) {
                continue;
            }
            let mut term = block_terminator(f, pred)?;
            term.retarget(header, abort);
            f.set_terminator(pred, term)?;
        }
        return Ok(());
    }

    // Values defined inside the loop, in body order.
    let mut defs: Vec<ValueId> = Vec::new();
    for &b in &lp.body {
        let block = f.block(b).ok_or(IrError::UnknownBlock { id: b })?;
        defs.extend(block.phis.iter().map(|p| p.dest));
        defs.extend(block.instrs.iter().filter_map(|i| i.dest));
    }

    // maps[i] translates original blocks/values into copy i+1 (maps[0] is
    // the identity: the original body is iteration one).
    let identity_blocks: HashMap<BlockId, BlockId> = lp.body.iter().map(|&b| (b, b)).collect();
    let identity_values: HashMap<ValueId, ValueId> = defs.iter().map(|&v| (v, v)).collect();
    let mut maps: Vec<(HashMap<BlockId, BlockId>, HashMap<ValueId, ValueId>)> =
        vec![(identity_blocks, identity_values)];

    for i in 2..=bound {
        let mut bmap: HashMap<BlockId, BlockId> = HashMap::new();
        for &b in &lp.body {
            let name = {
                let block = f.block(b).ok_or(IrError::UnknownBlock { id: b })?;
                format!("{}.{}", block.name, i)
            };
            bmap.insert(b, f.add_block(&name));
        }
        let mut vmap: HashMap<ValueId, ValueId> = HashMap::new();
        for &v in &defs {
            let def = f
                .value(v)
                .ok_or(IrError::UnknownValue { id: v })?
                .clone();
            let copy_name = def.name.as_ref().map(|n| format!("{}.{}", n, i));
            vmap.insert(v, f.add_value(copy_name.as_deref(), def.ty));
        }

        let (prev_bmap, prev_vmap) = maps[maps.len() - 1].clone();

        for &b in &lp.body {
            let src = f.block(b).ok_or(IrError::UnknownBlock { id: b })?.clone();
            let new_b = bmap[&b];

            // Phis: the header copy is fed only by the previous
            // iteration's back edges; inner blocks remap within the copy.
            let new_phis: Result<Vec<Phi>, IrError> = src
                .phis
                .iter()
                .map(|phi| {
                    let incoming = if b == header {
                        phi.incoming
                            .iter()
                            .filter(|(p, _)| lp.latches.contains(p))
                            .map(|(p, op)| (prev_bmap[p], remap_operand(op, &prev_vmap)))
                            .collect()
                    } else {
                        phi.incoming
                            .iter()
                            .map(|(p, op)| {
                                let mapped = bmap.get(p).copied().ok_or_else(|| {
                                    IrError::MalformedCfg {
                                        reason: format!(
                                            "loop body block {} has an entry edge from {}",
                                            b, p
                                        ),
                                    }
                                })?;
                                Ok((mapped, remap_operand(op, &vmap)))
                            })
                            .collect::<Result<Vec<_>, IrError>>()?
                    };
                    Ok(Phi {
                        dest: vmap[&phi.dest],
                        incoming,
                        loc: phi.loc.clone(),
                    })
                })
                .collect();
            if let Some(phis) = f.phis_mut(new_b) {
                *phis = new_phis?;
            }

            let new_instrs: Vec<Instr> = src.instrs.iter().map(|x| remap_instr(x, &vmap)).collect();
            if let Some(instrs) = f.instrs_mut(new_b) {
                *instrs = new_instrs;
            }

            // Terminator: in-body targets point into this copy; exits keep
            // their targets. Back edges are fixed up afterwards.
            let mut term = src.terminator.clone();
            remap_terminator_operand(&mut term, &vmap);
            for (&old, &new) in &bmap {
                term.retarget(old, new);
            }
            f.set_terminator(new_b, term)?;

            // Exit blocks gain one phi entry per copy.
            let mut exits: Vec<BlockId> = Vec::new();
            for t in src.terminator.targets() {
                if !body.contains(&t) && !exits.contains(&t) {
                    exits.push(t);
                }
            }
            for exit in exits {
                if let Some(phis) = f.phis_mut(exit) {
                    for phi in phis.iter_mut() {
                        let extra: Vec<(BlockId, Operand)> = phi
                            .incoming
                            .iter()
                            .filter(|(p, _)| *p == b)
                            .map(|(_, op)| (new_b, remap_operand(op, &vmap)))
                            .collect();
                        phi.incoming.extend(extra);
                    }
                }
            }
        }

        maps.push((bmap, vmap));
    }

    // Chain the back edges: copy i re-enters at copy i+1, the last copy
    // aborts.
    let mut abort: Option<BlockId> = None;
    for i in 1..=bound {
        let (bmap_i, _) = maps[(i - 1) as usize].clone();
        let next_target = if (i as usize) < maps.len() {
            maps[i as usize].0[&header]
        } else {
            match abort {
                Some(a) => a,
                None => {
                    let a = add_abort(f)?;
                    abort = Some(a);
                    a
                }
            }
        };
        let copy_header = bmap_i[&header];
        for &latch in &lp.latches {
            let l = bmap_i[&latch];
            let mut term = block_terminator(f, l)?;
            term.retarget(copy_header, next_target);
            f.set_terminator(l, term)?;
        }
    }

    // The original header now receives only entry edges.
    if let Some(phis) = f.phis_mut(header) {
        for phi in phis.iter_mut() {
            phi.incoming.retain(|(p, _)| !lp.latches.contains(p));
        }
    }

    Ok(())
}

fn block_terminator(f: &Function, b: BlockId) -> Result<Terminator, IrError> {
    Ok(f.block(b)
        .ok_or(IrError::UnknownBlock { id: b })?
        .terminator
        .clone())
}

// ---------------------------------------------------------------------------
// Remapping helpers
// ---------------------------------------------------------------------------

fn remap_operand(op: &Operand, vmap: &HashMap<ValueId, ValueId>) -> Operand {
    match op {
        Operand::Value(v) => Operand::Value(*vmap.get(v).unwrap_or(v)),
        constant => *constant,
    }
}

fn remap_instr(instr: &Instr, vmap: &HashMap<ValueId, ValueId>) -> Instr {
    let dest = instr.dest.map(|d| *vmap.get(&d).unwrap_or(&d));
    let rhs = remap_rhs(&instr.rhs, vmap);
    Instr {
        dest,
        rhs,
        loc: instr.loc.clone(),
    }
}

fn remap_rhs(rhs: &Rhs, vmap: &HashMap<ValueId, ValueId>) -> Rhs {
    let m = |op: &Operand| remap_operand(op, vmap);
    match rhs {
        Rhs::Const(c) => Rhs::Const(*c),
        Rhs::Arith { op, lhs, rhs } => Rhs::Arith {
            op: *op,
            lhs: m(lhs),
            rhs: m(rhs),
        },
        Rhs::Bit { op, lhs, rhs } => Rhs::Bit {
            op: *op,
            lhs: m(lhs),
            rhs: m(rhs),
        },
        Rhs::Shift { op, lhs, rhs } => Rhs::Shift {
            op: *op,
            lhs: m(lhs),
            rhs: m(rhs),
        },
        Rhs::Cmp { op, lhs, rhs } => Rhs::Cmp {
            op: *op,
            lhs: m(lhs),
            rhs: m(rhs),
        },
        Rhs::FCmp { op, lhs, rhs } => Rhs::FCmp {
            op: *op,
            lhs: m(lhs),
            rhs: m(rhs),
        },
        Rhs::FArith { op, lhs, rhs } => Rhs::FArith {
            op: *op,
            lhs: m(lhs),
            rhs: m(rhs),
        },
        Rhs::Un { op, operand } => Rhs::Un {
            op: *op,
            operand: m(operand),
        },
        Rhs::Cast {
            op,
            operand,
            target,
        } => Rhs::Cast {
            op: *op,
            operand: m(operand),
            target: *target,
        },
        Rhs::Select {
            cond,
            then_value,
            else_value,
        } => Rhs::Select {
            cond: m(cond),
            then_value: m(then_value),
            else_value: m(else_value),
        },
        Rhs::Call { callee, args } => Rhs::Call {
            callee: callee.clone(),
            args: args.iter().map(m).collect(),
        },
        Rhs::Alloc => Rhs::Alloc,
        Rhs::Load { ptr } => Rhs::Load { ptr: m(ptr) },
        Rhs::Store { ptr, value } => Rhs::Store {
            ptr: m(ptr),
            value: m(value),
        },
        Rhs::Undef => Rhs::Undef,
    }
}

fn remap_terminator_operand(term: &mut Terminator, vmap: &HashMap<ValueId, ValueId>) {
    match term {
        Terminator::CondBr { cond, .. } => *cond = remap_operand(cond, vmap),
        Terminator::Return { value: Some(v) } => *v = remap_operand(v, vmap),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

/// Drops blocks unreachable from the entry and prunes phi entries whose
/// predecessor edge no longer exists.
fn remove_unreachable(f: &mut Function) -> Result<(), IrError> {
    let mut reachable: HashSet<BlockId> = HashSet::new();
    let mut worklist = vec![f.entry()];
    reachable.insert(f.entry());
    while let Some(b) = worklist.pop() {
        for succ in f.successors(b) {
            if reachable.insert(succ) {
                worklist.push(succ);
            }
        }
    }

    let doomed: Vec<BlockId> = f.blocks().filter(|b| !reachable.contains(b)).collect();
    if !doomed.is_empty() {
        f.remove_blocks(&doomed)?;
    }

    let survivors: Vec<BlockId> = f.blocks().collect();
    for b in survivors {
        let preds = f.predecessors(b);
        if let Some(phis) = f.phis_mut(b) {
            for phi in phis.iter_mut() {
                phi.incoming.retain(|(p, _)| preds.contains(p));
            }
        }
    }
    Ok(())
}
