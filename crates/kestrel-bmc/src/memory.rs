//! The memory-model boundary.
//!
//! Pointer-typed IR values and memory instructions are opaque to the
//! encoder; a [`MemoryModel`] decides how they become expression terms.
//! The bundled [`HavocMemoryModel`] constrains nothing: every load
//! produces an arbitrary value, which over-approximates any real memory
//! and is what uninitialized-read checking wants.

use kestrel_core::{Context, ExprId, TypeId, VarId};
use kestrel_ir::Instr;

use crate::error::BmcError;

/// Lowers pointer-typed values and memory instructions.
pub trait MemoryModel {
    /// The expression type pointer-typed IR values lower to.
    fn pointer_type(&self, ctx: &mut Context) -> TypeId;

    /// Lowers one memory instruction (`Alloc`, `Load`, `Store`).
    ///
    /// `dest` is the destination variable when the instruction defines a
    /// value; `operands` are the already-lowered operand expressions in
    /// instruction order. `Ok(None)` asserts nothing about the
    /// instruction.
    fn lower(
        &mut self,
        ctx: &mut Context,
        instr: &Instr,
        dest: Option<VarId>,
        operands: &[ExprId],
    ) -> Result<Option<ExprId>, BmcError>;
}

/// Memory model that havocs every load: loaded values are unconstrained,
/// stores are dropped, pointers are opaque 64-bit words.
#[derive(Debug, Clone, Copy, Default)]
pub struct HavocMemoryModel;

impl MemoryModel for HavocMemoryModel {
    fn pointer_type(&self, ctx: &mut Context) -> TypeId {
        ctx.bv_type(64)
    }

    fn lower(
        &mut self,
        _ctx: &mut Context,
        _instr: &Instr,
        _dest: Option<VarId>,
        _operands: &[ExprId],
    ) -> Result<Option<ExprId>, BmcError> {
        Ok(None)
    }
}
