//! Function bodies: basic blocks on a petgraph CFG.
//!
//! The graph's edges are derived from block terminators and are never
//! mutated directly: [`Function::set_terminator`] is the only edge writer,
//! so the adjacency lists and the terminators cannot drift apart. Phi and
//! instruction lists are reachable through checked accessors.

use petgraph::stable_graph::StableGraph;
use petgraph::Directed;
use serde::{Deserialize, Serialize};

use crate::error::IrError;
use crate::id::{BlockId, ValueId};
use crate::instr::{Instr, IrType, Phi, Terminator};

/// A basic block: phis first, then straight-line instructions, then one
/// terminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicBlock {
    pub name: String,
    pub phis: Vec<Phi>,
    pub instrs: Vec<Instr>,
    pub terminator: Terminator,
}

impl BasicBlock {
    fn new(name: &str) -> Self {
        BasicBlock {
            name: name.to_string(),
            phis: Vec::new(),
            instrs: Vec::new(),
            // Fresh blocks return nothing until a real terminator is set.
            terminator: Terminator::Return { value: None },
        }
    }
}

/// Definition site metadata of an SSA value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueDef {
    pub name: Option<String>,
    pub ty: IrType,
}

/// A function: its CFG, entry block, and value table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    name: String,
    cfg: StableGraph<BasicBlock, (), Directed, u32>,
    entry: BlockId,
    values: Vec<ValueDef>,
}

impl Function {
    /// Creates a function with its entry block already present.
    pub fn new(name: &str) -> Self {
        let mut cfg = StableGraph::new();
        let entry = BlockId::from(cfg.add_node(BasicBlock::new("entry")));
        Function {
            name: name.to_string(),
            cfg,
            entry,
            values: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    /// Adds an empty block (value-less return terminator, no edges).
    pub fn add_block(&mut self, name: &str) -> BlockId {
        BlockId::from(self.cfg.add_node(BasicBlock::new(name)))
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.cfg.node_weight(id.into())
    }

    /// Iterates block handles in creation order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.cfg.node_indices().map(BlockId::from)
    }

    pub fn block_count(&self) -> usize {
        self.cfg.node_count()
    }

    pub fn contains_block(&self, id: BlockId) -> bool {
        self.cfg.node_weight(id.into()).is_some()
    }

    /// Removes a block. The entry block cannot be removed, and neither can
    /// a block some other block still jumps to; use
    /// [`remove_blocks`](Self::remove_blocks) to drop a mutually-referencing
    /// group.
    pub fn remove_block(&mut self, id: BlockId) -> Result<(), IrError> {
        self.remove_blocks(&[id])
    }

    /// Removes a set of blocks at once.
    ///
    /// The set must be closed under incoming references: no surviving block
    /// may target a removed one (otherwise a terminator would dangle).
    pub fn remove_blocks(&mut self, ids: &[BlockId]) -> Result<(), IrError> {
        for &id in ids {
            if id == self.entry {
                return Err(IrError::MalformedCfg {
                    reason: "cannot remove the entry block".to_string(),
                });
            }
            if !self.contains_block(id) {
                return Err(IrError::UnknownBlock { id });
            }
            for pred in self.predecessors(id) {
                if !ids.contains(&pred) {
                    return Err(IrError::MalformedCfg {
                        reason: format!("block {} is still targeted by {}", id, pred),
                    });
                }
            }
        }
        for &id in ids {
            self.cfg.remove_node(id.into());
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Block contents
    // -----------------------------------------------------------------------

    pub fn push_instr(&mut self, block: BlockId, instr: Instr) -> Result<(), IrError> {
        self.cfg
            .node_weight_mut(block.into())
            .ok_or(IrError::UnknownBlock { id: block })?
            .instrs
            .push(instr);
        Ok(())
    }

    pub fn push_phi(&mut self, block: BlockId, phi: Phi) -> Result<(), IrError> {
        self.cfg
            .node_weight_mut(block.into())
            .ok_or(IrError::UnknownBlock { id: block })?
            .phis
            .push(phi);
        Ok(())
    }

    /// Mutable access to a block's phi list (for join patching during
    /// transforms). Terminators are not reachable this way.
    pub fn phis_mut(&mut self, block: BlockId) -> Option<&mut Vec<Phi>> {
        self.cfg.node_weight_mut(block.into()).map(|b| &mut b.phis)
    }

    /// Mutable access to a block's instruction list.
    pub fn instrs_mut(&mut self, block: BlockId) -> Option<&mut Vec<Instr>> {
        self.cfg
            .node_weight_mut(block.into())
            .map(|b| &mut b.instrs)
    }

    /// Installs a terminator and re-derives the block's outgoing edges.
    ///
    /// This is the only place CFG edges change, which keeps the adjacency
    /// lists and the terminators consistent by construction.
    pub fn set_terminator(&mut self, block: BlockId, term: Terminator) -> Result<(), IrError> {
        if !self.contains_block(block) {
            return Err(IrError::UnknownBlock { id: block });
        }
        for target in term.targets() {
            if !self.contains_block(target) {
                return Err(IrError::UnknownBlock { id: target });
            }
        }

        // Drop the old outgoing edges, then add one edge per unique target.
        let old: Vec<_> = self
            .cfg
            .edges_directed(block.into(), petgraph::Direction::Outgoing)
            .map(|e| petgraph::visit::EdgeRef::id(&e))
            .collect();
        for edge in old {
            self.cfg.remove_edge(edge);
        }
        let mut seen: Vec<BlockId> = Vec::new();
        for target in term.targets() {
            if !seen.contains(&target) {
                self.cfg.add_edge(block.into(), target.into(), ());
                seen.push(target);
            }
        }

        self.cfg
            .node_weight_mut(block.into())
            .ok_or(IrError::UnknownBlock { id: block })?
            .terminator = term;

        #[cfg(debug_assertions)]
        self.assert_consistency();

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Adjacency
    // -----------------------------------------------------------------------

    /// Successor blocks in branch-position order (duplicates preserved).
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.block(block)
            .map(|b| b.terminator.targets())
            .unwrap_or_default()
    }

    /// Unique predecessor blocks.
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.cfg
            .neighbors_directed(block.into(), petgraph::Direction::Incoming)
            .map(BlockId::from)
            .collect()
    }

    /// Read-only view of the underlying graph for algorithms
    /// (dominators, topological sort).
    pub fn graph(&self) -> &StableGraph<BasicBlock, (), Directed, u32> {
        &self.cfg
    }

    /// Checks that every block's outgoing edges match its terminator's
    /// unique targets exactly.
    pub fn assert_consistency(&self) {
        for id in self.cfg.node_indices() {
            let block = &self.cfg[id];
            let mut targets: Vec<BlockId> = block.terminator.targets();
            targets.sort();
            targets.dedup();
            let mut edges: Vec<BlockId> = self
                .cfg
                .neighbors_directed(id, petgraph::Direction::Outgoing)
                .map(BlockId::from)
                .collect();
            edges.sort();
            assert_eq!(
                targets, edges,
                "block {} edges diverge from its terminator",
                block.name
            );
        }
    }

    // -----------------------------------------------------------------------
    // Values
    // -----------------------------------------------------------------------

    pub fn add_value(&mut self, name: Option<&str>, ty: IrType) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueDef {
            name: name.map(str::to_string),
            ty,
        });
        id
    }

    pub fn value(&self, id: ValueId) -> Option<&ValueDef> {
        self.values.get(id.0 as usize)
    }

    pub fn value_ty(&self, id: ValueId) -> Option<IrType> {
        self.value(id).map(|v| v.ty)
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::{IrConst, Operand, Rhs};

    fn diamond() -> (Function, BlockId, BlockId, BlockId, BlockId) {
        let mut f = Function::new("main");
        let entry = f.entry();
        let then_bb = f.add_block("then");
        let else_bb = f.add_block("else");
        let join = f.add_block("join");
        let cond = f.add_value(Some("c"), IrType::I1);
        f.push_instr(entry, Instr::new(Some(cond), Rhs::Const(IrConst::bool_(true))))
            .unwrap();
        f.set_terminator(
            entry,
            Terminator::CondBr {
                cond: Operand::Value(cond),
                then_target: then_bb,
                else_target: else_bb,
            },
        )
        .unwrap();
        f.set_terminator(then_bb, Terminator::Jump { target: join })
            .unwrap();
        f.set_terminator(else_bb, Terminator::Jump { target: join })
            .unwrap();
        f.set_terminator(join, Terminator::Return { value: None })
            .unwrap();
        (f, entry, then_bb, else_bb, join)
    }

    #[test]
    fn new_function_has_entry_block() {
        let f = Function::new("main");
        assert_eq!(f.block_count(), 1);
        assert_eq!(f.block(f.entry()).unwrap().name, "entry");
    }

    #[test]
    fn edges_follow_terminators() {
        let (f, entry, then_bb, else_bb, join) = diamond();
        assert_eq!(f.successors(entry), vec![then_bb, else_bb]);
        assert_eq!(f.successors(then_bb), vec![join]);
        let mut preds = f.predecessors(join);
        preds.sort();
        assert_eq!(preds, vec![then_bb, else_bb]);
        f.assert_consistency();
    }

    #[test]
    fn retargeting_terminator_rewrites_edges() {
        let (mut f, entry, then_bb, else_bb, join) = diamond();
        // Point the else edge at join directly from entry instead.
        f.set_terminator(
            entry,
            Terminator::CondBr {
                cond: Operand::Const(IrConst::bool_(true)),
                then_target: then_bb,
                else_target: join,
            },
        )
        .unwrap();
        let mut preds = f.predecessors(join);
        preds.sort();
        assert_eq!(preds, vec![entry, then_bb, else_bb]);
        f.assert_consistency();
    }

    #[test]
    fn duplicate_targets_create_one_edge() {
        let mut f = Function::new("main");
        let next = f.add_block("next");
        f.set_terminator(
            f.entry(),
            Terminator::CondBr {
                cond: Operand::Const(IrConst::bool_(true)),
                then_target: next,
                else_target: next,
            },
        )
        .unwrap();
        assert_eq!(f.predecessors(next).len(), 1);
        // Successor positions keep both occurrences.
        assert_eq!(f.successors(f.entry()), vec![next, next]);
    }

    #[test]
    fn set_terminator_rejects_unknown_target() {
        let mut f = Function::new("main");
        let bogus = BlockId(99);
        let result = f.set_terminator(f.entry(), Terminator::Jump { target: bogus });
        assert!(matches!(result, Err(IrError::UnknownBlock { .. })));
    }

    #[test]
    fn remove_block_refuses_while_referenced() {
        let (mut f, _, then_bb, else_bb, join) = diamond();
        assert!(matches!(
            f.remove_block(join),
            Err(IrError::MalformedCfg { .. })
        ));
        // Detach both jumps, then removal succeeds.
        f.set_terminator(then_bb, Terminator::Abort).unwrap();
        f.set_terminator(else_bb, Terminator::Abort).unwrap();
        f.remove_block(join).unwrap();
        assert!(!f.contains_block(join));
        f.assert_consistency();
    }

    #[test]
    fn remove_blocks_accepts_mutually_referencing_group() {
        let mut f = Function::new("main");
        let a = f.add_block("a");
        let b = f.add_block("b");
        // entry aborts; a and b form an unreachable cycle.
        f.set_terminator(f.entry(), Terminator::Abort).unwrap();
        f.set_terminator(a, Terminator::Jump { target: b }).unwrap();
        f.set_terminator(b, Terminator::Jump { target: a }).unwrap();
        f.remove_blocks(&[a, b]).unwrap();
        assert_eq!(f.block_count(), 1);
    }

    #[test]
    fn entry_block_cannot_be_removed() {
        let mut f = Function::new("main");
        assert!(matches!(
            f.remove_block(f.entry()),
            Err(IrError::MalformedCfg { .. })
        ));
    }

    #[test]
    fn values_are_typed() {
        let mut f = Function::new("main");
        let x = f.add_value(Some("x"), IrType::I32);
        assert_eq!(f.value_ty(x), Some(IrType::I32));
        assert_eq!(f.value(x).unwrap().name.as_deref(), Some("x"));
        assert_eq!(f.value_ty(ValueId(42)), None);
    }

    #[test]
    fn serde_roundtrip() {
        let (f, ..) = diamond();
        let json = serde_json::to_string(&f).unwrap();
        let back: Function = serde_json::from_str(&json).unwrap();
        assert_eq!(back.block_count(), f.block_count());
        assert_eq!(back.entry(), f.entry());
        assert_eq!(back.value_count(), f.value_count());
        back.assert_consistency();
    }
}
