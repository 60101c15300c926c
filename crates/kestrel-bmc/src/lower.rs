//! IR-to-expression lowering.
//!
//! Each value-defining instruction lowers to a binding `dest == rhs`
//! (`FEq` for float-typed destinations); the lowering keeps the
//! value-to-variable map, the map of eliminated bindings, and the chosen
//! integer representation for the whole run. Operand resolution goes
//! literal first, then the eliminated map, then the canonical variable
//! reference, which is what makes on-the-fly temporary elimination a pure
//! substitution.
//!
//! Branch terminators and phi instructions are lowered on demand by the
//! encoder (they are per-edge, not per-instruction); memory instructions
//! are delegated to the configured [`MemoryModel`].

use std::collections::HashMap;

use kestrel_core::{CoreError, Context, ExprBuilder, ExprId, Literal, TypeId, VarId};
use kestrel_ir::{
    ArithOp, BitOp, BlockId, CastOp, CmpOp, FArithOp, FCmpOp, Function, Instr, IrConst, IrType,
    Operand, Phi, Rhs, ShiftOp, Terminator, UnOp, ValueId,
};

use crate::error::BmcError;
use crate::memory::MemoryModel;
use crate::options::{BmcOptions, IntRepresentation};

/// Interprets a masked integer constant as signed, for math-int mode.
fn signed_value(value: u64, width: u32) -> i64 {
    if width >= 64 || value & (1u64 << (width - 1)) == 0 {
        value as i64
    } else {
        (value | !((1u64 << width) - 1)) as i64
    }
}

/// Per-run lowering state.
pub struct Lowering {
    function_name: String,
    int_repr: IntRepresentation,
    assume_no_nan: bool,
    memory: Box<dyn MemoryModel>,
    value_vars: HashMap<ValueId, VarId>,
    eliminated: HashMap<ValueId, ExprId>,
}

impl Lowering {
    pub fn new(function: &Function, options: &BmcOptions, memory: Box<dyn MemoryModel>) -> Self {
        Lowering {
            function_name: function.name().to_string(),
            int_repr: options.int_representation,
            assume_no_nan: options.assume_no_nan,
            memory,
            value_vars: HashMap::new(),
            eliminated: HashMap::new(),
        }
    }

    pub fn int_representation(&self) -> IntRepresentation {
        self.int_repr
    }

    /// The variable backing an IR value, if one was created.
    pub fn value_var(&self, value: ValueId) -> Option<VarId> {
        self.value_vars.get(&value).copied()
    }

    /// Bindings elided by temporary-variable elimination.
    pub fn eliminated(&self) -> &HashMap<ValueId, ExprId> {
        &self.eliminated
    }

    /// Records an eliminated binding `value := rhs`.
    pub fn eliminate(&mut self, value: ValueId, rhs: ExprId) {
        self.eliminated.insert(value, rhs);
    }

    /// The expression type of an IR type under the run's configuration.
    pub fn type_of(&mut self, ctx: &mut Context, ty: IrType) -> TypeId {
        match ty {
            IrType::Int { width: 1 } => TypeId::BOOL,
            IrType::Int { width } => match self.int_repr {
                IntRepresentation::BitVector => ctx.bv_type(width),
                IntRepresentation::MathInt => TypeId::INT,
            },
            IrType::Float(format) => ctx.float_type(format),
            IrType::Ptr => self.memory.pointer_type(ctx),
        }
    }

    /// The zero-like literal of an IR type under the run's configuration.
    pub fn zero_literal(&self, ty: IrType) -> Literal {
        match ty {
            IrType::Int { width: 1 } => Literal::Bool(false),
            IrType::Int { width } => match self.int_repr {
                IntRepresentation::BitVector => Literal::Bv { value: 0, width },
                IntRepresentation::MathInt => Literal::Int(0),
            },
            IrType::Float(format) => Literal::Float { bits: 0, format },
            IrType::Ptr => Literal::Bv { value: 0, width: 64 },
        }
    }

    /// Fetches or creates the variable of a value, registered in the
    /// context as `"<function>/<value-name>"`.
    pub fn var_for(
        &mut self,
        ctx: &mut Context,
        function: &Function,
        value: ValueId,
    ) -> Result<VarId, BmcError> {
        if let Some(&var) = self.value_vars.get(&value) {
            return Ok(var);
        }
        let def = function
            .value(value)
            .ok_or_else(|| BmcError::UnsupportedInstruction {
                reason: format!("operand references unknown value {}", value),
            })?;
        let base = match &def.name {
            Some(name) => name.clone(),
            None => format!("t{}", value.0),
        };
        let ty = self.type_of(ctx, def.ty);
        let full = format!("{}/{}", self.function_name, base);
        let var = match ctx.declare_var(&full, ty) {
            Ok(var) => var,
            // Front-end reused a name; disambiguate with the value id.
            Err(CoreError::DuplicateVariable { .. }) => {
                let fallback = format!("{}/{}.{}", self.function_name, base, value.0);
                ctx.declare_var(&fallback, ty).map_err(BmcError::Type)?
            }
            Err(other) => return Err(BmcError::Type(other)),
        };
        self.value_vars.insert(value, var);
        Ok(var)
    }

    /// Lowers an operand: literal, eliminated binding, or variable ref.
    pub fn operand_expr(
        &mut self,
        ctx: &mut Context,
        function: &Function,
        operand: &Operand,
    ) -> Result<ExprId, BmcError> {
        match operand {
            Operand::Const(c) => Ok(self.const_expr(ctx, c)),
            Operand::Value(value) => {
                if let Some(&expr) = self.eliminated.get(value) {
                    return Ok(expr);
                }
                let var = self.var_for(ctx, function, *value)?;
                Ok(ctx.var_ref(var))
            }
        }
    }

    fn const_expr(&mut self, ctx: &mut Context, constant: &IrConst) -> ExprId {
        let mut b = ExprBuilder::new(ctx);
        match *constant {
            IrConst::Int { value, width: 1 } => b.bool_lit(value != 0),
            IrConst::Int { value, width } => match self.int_repr {
                IntRepresentation::BitVector => b.bv_lit(value, width),
                IntRepresentation::MathInt => b.int_lit(signed_value(value, width)),
            },
            IrConst::Float { bits, format } => b.float_lit(bits, format),
        }
    }

    /// Binds `dest == rhs`, using float equality for float destinations.
    fn bind(
        &mut self,
        ctx: &mut Context,
        function: &Function,
        dest: ValueId,
        rhs: ExprId,
    ) -> Result<ExprId, BmcError> {
        let var = self.var_for(ctx, function, dest)?;
        let var_ref = ctx.var_ref(var);
        let is_float = ctx.ty(ctx.expr_ty(var_ref)).is_float();
        let mut b = ExprBuilder::new(ctx);
        let bound = if is_float {
            b.feq(var_ref, rhs)?
        } else {
            b.eq(var_ref, rhs)?
        };
        Ok(bound)
    }

    /// Lowers one straight-line instruction to its formula contribution.
    ///
    /// `Ok(None)` means the instruction asserts nothing (calls, dropped
    /// stores, havocked memory).
    pub fn transform_instr(
        &mut self,
        ctx: &mut Context,
        function: &Function,
        instr: &Instr,
    ) -> Result<Option<ExprId>, BmcError> {
        match &instr.rhs {
            Rhs::Call { .. } => {
                // The result of a call is havoc; the variable exists so the
                // model and the trace can name it.
                if let Some(dest) = instr.dest {
                    self.var_for(ctx, function, dest)?;
                }
                Ok(None)
            }
            Rhs::Alloc | Rhs::Load { .. } | Rhs::Store { .. } => {
                let operands = self.memory_operands(ctx, function, &instr.rhs)?;
                let dest = match instr.dest {
                    Some(dest) => Some(self.var_for(ctx, function, dest)?),
                    None => None,
                };
                // Split the borrow: the model is owned by the lowering.
                let mut memory = std::mem::replace(&mut self.memory, Box::new(NullMemory));
                let result = memory.lower(ctx, instr, dest, &operands);
                self.memory = memory;
                result
            }
            _ => {
                let Some(dest) = instr.dest else {
                    // A value-producing instruction nobody names asserts
                    // nothing.
                    return Ok(None);
                };
                let rhs = self.rhs_expr(ctx, function, instr)?;
                Ok(Some(self.bind(ctx, function, dest, rhs)?))
            }
        }
    }

    fn memory_operands(
        &mut self,
        ctx: &mut Context,
        function: &Function,
        rhs: &Rhs,
    ) -> Result<Vec<ExprId>, BmcError> {
        match rhs {
            Rhs::Alloc => Ok(Vec::new()),
            Rhs::Load { ptr } => Ok(vec![self.operand_expr(ctx, function, ptr)?]),
            Rhs::Store { ptr, value } => Ok(vec![
                self.operand_expr(ctx, function, ptr)?,
                self.operand_expr(ctx, function, value)?,
            ]),
            _ => Ok(Vec::new()),
        }
    }

    /// Lowers the right-hand side of a value-defining instruction to the
    /// expression for its value.
    pub fn rhs_expr(
        &mut self,
        ctx: &mut Context,
        function: &Function,
        instr: &Instr,
    ) -> Result<ExprId, BmcError> {
        match &instr.rhs {
            Rhs::Const(c) => Ok(self.const_expr(ctx, c)),

            Rhs::Arith { op, lhs, rhs } => {
                let l = self.operand_expr(ctx, function, lhs)?;
                let r = self.operand_expr(ctx, function, rhs)?;
                let math = ctx.ty(ctx.expr_ty(l)).is_int();
                let mut b = ExprBuilder::new(ctx);
                let expr = match op {
                    ArithOp::Add => b.add(l, r)?,
                    ArithOp::Sub => b.sub(l, r)?,
                    ArithOp::Mul => b.mul(l, r)?,
                    ArithOp::SDiv => b.sdiv(l, r)?,
                    ArithOp::UDiv if math => b.sdiv(l, r)?,
                    ArithOp::UDiv => b.udiv(l, r)?,
                    ArithOp::SRem => b.smod(l, r)?,
                    ArithOp::URem if math => b.smod(l, r)?,
                    ArithOp::URem => b.urem(l, r)?,
                };
                Ok(expr)
            }

            Rhs::Bit { op, lhs, rhs } => {
                let l = self.operand_expr(ctx, function, lhs)?;
                let r = self.operand_expr(ctx, function, rhs)?;
                let ty = *ctx.ty(ctx.expr_ty(l));
                let mut b = ExprBuilder::new(ctx);
                if ty.is_bool() {
                    Ok(match op {
                        BitOp::And => b.and2(l, r)?,
                        BitOp::Or => b.or2(l, r)?,
                        BitOp::Xor => b.xor(l, r)?,
                    })
                } else if ty.is_bv() {
                    Ok(match op {
                        BitOp::And => b.band(l, r)?,
                        BitOp::Or => b.bor(l, r)?,
                        BitOp::Xor => b.bxor(l, r)?,
                    })
                } else {
                    Err(BmcError::UnsupportedInstruction {
                        reason: "bitwise operation on mathematical integers".to_string(),
                    })
                }
            }

            Rhs::Shift { op, lhs, rhs } => {
                let l = self.operand_expr(ctx, function, lhs)?;
                let r = self.operand_expr(ctx, function, rhs)?;
                if !ctx.ty(ctx.expr_ty(l)).is_bv() {
                    return Err(BmcError::UnsupportedInstruction {
                        reason: "shift on mathematical integers".to_string(),
                    });
                }
                let mut b = ExprBuilder::new(ctx);
                Ok(match op {
                    ShiftOp::Shl => b.shl(l, r)?,
                    ShiftOp::LShr => b.lshr(l, r)?,
                    ShiftOp::AShr => b.ashr(l, r)?,
                })
            }

            Rhs::Cmp { op, lhs, rhs } => {
                let l = self.operand_expr(ctx, function, lhs)?;
                let r = self.operand_expr(ctx, function, rhs)?;
                let math = ctx.ty(ctx.expr_ty(l)).is_int();
                let mut b = ExprBuilder::new(ctx);
                Ok(match op {
                    CmpOp::Eq => b.eq(l, r)?,
                    CmpOp::Ne => b.noteq(l, r)?,
                    CmpOp::Slt => b.slt(l, r)?,
                    CmpOp::Sle => b.slteq(l, r)?,
                    CmpOp::Ult if math => b.slt(l, r)?,
                    CmpOp::Ult => b.ult(l, r)?,
                    CmpOp::Ule if math => b.slteq(l, r)?,
                    CmpOp::Ule => b.ulteq(l, r)?,
                })
            }

            Rhs::FCmp { op, lhs, rhs } => {
                let l = self.operand_expr(ctx, function, lhs)?;
                let r = self.operand_expr(ctx, function, rhs)?;
                let mut b = ExprBuilder::new(ctx);
                let base = match op {
                    FCmpOp::Oeq => b.feq(l, r)?,
                    FCmpOp::Olt => b.flt(l, r)?,
                    FCmpOp::Ole => b.flteq(l, r)?,
                };
                if self.assume_no_nan {
                    Ok(base)
                } else {
                    // Ordered comparison: neither side is NaN.
                    let l_nan = b.fisnan(l)?;
                    let l_ok = b.not(l_nan)?;
                    let r_nan = b.fisnan(r)?;
                    let r_ok = b.not(r_nan)?;
                    Ok(b.and(&[l_ok, r_ok, base])?)
                }
            }

            Rhs::FArith { op, lhs, rhs } => {
                let l = self.operand_expr(ctx, function, lhs)?;
                let r = self.operand_expr(ctx, function, rhs)?;
                let mut b = ExprBuilder::new(ctx);
                Ok(match op {
                    FArithOp::FAdd => b.fadd(l, r)?,
                    FArithOp::FSub => b.fsub(l, r)?,
                    FArithOp::FMul => b.fmul(l, r)?,
                    FArithOp::FDiv => b.fdiv(l, r)?,
                })
            }

            Rhs::Un { op, operand } => {
                let e = self.operand_expr(ctx, function, operand)?;
                let ty = *ctx.ty(ctx.expr_ty(e));
                let mut b = ExprBuilder::new(ctx);
                match op {
                    UnOp::Neg if ty.is_float() => Err(BmcError::UnsupportedInstruction {
                        reason: "negate on float operand; lower as FSub".to_string(),
                    }),
                    UnOp::Neg => Ok(b.neg(e)?),
                    UnOp::Not if ty.is_bool() => Ok(b.not(e)?),
                    UnOp::Not => match ty.bv_width() {
                        Some(width) => {
                            let ones = b.bv_lit(u64::MAX, width);
                            Ok(b.bxor(e, ones)?)
                        }
                        None => Err(BmcError::UnsupportedInstruction {
                            reason: "bitwise not on mathematical integers".to_string(),
                        }),
                    },
                }
            }

            Rhs::Cast {
                op,
                operand,
                target,
            } => self.lower_cast(ctx, function, *op, operand, *target),

            Rhs::Select {
                cond,
                then_value,
                else_value,
            } => {
                let c = self.operand_expr(ctx, function, cond)?;
                let t = self.operand_expr(ctx, function, then_value)?;
                let e = self.operand_expr(ctx, function, else_value)?;
                let mut b = ExprBuilder::new(ctx);
                Ok(b.select(c, t, e)?)
            }

            Rhs::Undef => {
                let dest = instr.dest.ok_or_else(|| BmcError::UnsupportedInstruction {
                    reason: "undef without a destination".to_string(),
                })?;
                let ir_ty =
                    function
                        .value_ty(dest)
                        .ok_or_else(|| BmcError::UnsupportedInstruction {
                            reason: format!("undef destination {} has no type", dest),
                        })?;
                let ty = self.type_of(ctx, ir_ty);
                let mut b = ExprBuilder::new(ctx);
                Ok(b.undef(ty))
            }

            Rhs::Call { .. } | Rhs::Alloc | Rhs::Load { .. } | Rhs::Store { .. } => {
                Err(BmcError::UnsupportedInstruction {
                    reason: "instruction has no value expression".to_string(),
                })
            }
        }
    }

    fn lower_cast(
        &mut self,
        ctx: &mut Context,
        function: &Function,
        op: CastOp,
        operand: &Operand,
        target: IrType,
    ) -> Result<ExprId, BmcError> {
        let e = self.operand_expr(ctx, function, operand)?;
        let source_ty = *ctx.ty(ctx.expr_ty(e));

        match op {
            CastOp::ZExt | CastOp::SExt => {
                let signed = matches!(op, CastOp::SExt);
                if source_ty.is_bool() {
                    // i1 widening: select a constant per truth value.
                    let (one, zero) = self.bool_extension_constants(ctx, target, signed)?;
                    let mut b = ExprBuilder::new(ctx);
                    return Ok(b.select(e, one, zero)?);
                }
                match (self.int_repr, source_ty.bv_width(), target) {
                    (IntRepresentation::MathInt, _, IrType::Int { .. }) => Ok(e),
                    (IntRepresentation::BitVector, Some(_), IrType::Int { width }) => {
                        let mut b = ExprBuilder::new(ctx);
                        if signed {
                            Ok(b.sext(e, width)?)
                        } else {
                            Ok(b.zext(e, width)?)
                        }
                    }
                    _ => Err(BmcError::UnsupportedInstruction {
                        reason: "integer extension on non-integer operand".to_string(),
                    }),
                }
            }
            CastOp::Trunc => match (self.int_repr, target) {
                (IntRepresentation::BitVector, IrType::Int { width: 1 }) => {
                    // Truncation to i1 keeps the low bit.
                    let source_width = source_ty.bv_width().ok_or_else(|| {
                        BmcError::UnsupportedInstruction {
                            reason: "truncation of non-bit-vector operand".to_string(),
                        }
                    })?;
                    let mut b = ExprBuilder::new(ctx);
                    let one = b.bv_lit(1, source_width);
                    let low = b.band(e, one)?;
                    Ok(b.eq(low, one)?)
                }
                (IntRepresentation::BitVector, IrType::Int { width }) => {
                    let mut b = ExprBuilder::new(ctx);
                    Ok(b.trunc(e, width)?)
                }
                (IntRepresentation::MathInt, IrType::Int { width: 1 }) => {
                    Err(BmcError::UnsupportedInstruction {
                        reason: "truncation to i1 under mathematical integers".to_string(),
                    })
                }
                (IntRepresentation::MathInt, IrType::Int { .. }) => Ok(e),
                _ => Err(BmcError::UnsupportedInstruction {
                    reason: "truncation to non-integer type".to_string(),
                }),
            },
            CastOp::FCast => match target {
                IrType::Float(format) => {
                    let mut b = ExprBuilder::new(ctx);
                    Ok(b.fcast(e, format)?)
                }
                _ => Err(BmcError::UnsupportedInstruction {
                    reason: "float cast to non-float type".to_string(),
                }),
            },
        }
    }

    /// The `(extended-true, zero)` constants for widening an `i1`.
    fn bool_extension_constants(
        &mut self,
        ctx: &mut Context,
        target: IrType,
        signed: bool,
    ) -> Result<(ExprId, ExprId), BmcError> {
        match target {
            IrType::Int { width } if width > 1 => {
                let mut b = ExprBuilder::new(ctx);
                match self.int_repr {
                    IntRepresentation::BitVector => {
                        let one = if signed {
                            b.bv_lit(u64::MAX, width)
                        } else {
                            b.bv_lit(1, width)
                        };
                        let zero = b.bv_lit(0, width);
                        Ok((one, zero))
                    }
                    IntRepresentation::MathInt => {
                        let one = if signed { b.int_lit(-1) } else { b.int_lit(1) };
                        let zero = b.int_lit(0);
                        Ok((one, zero))
                    }
                }
            }
            _ => Err(BmcError::UnsupportedInstruction {
                reason: "boolean extension to non-integer type".to_string(),
            }),
        }
    }

    /// The guard for leaving a block through successor position
    /// `succ_idx` of its terminator.
    pub fn branch_guard(
        &mut self,
        ctx: &mut Context,
        function: &Function,
        term: &Terminator,
        succ_idx: usize,
    ) -> Result<ExprId, BmcError> {
        match (term, succ_idx) {
            (Terminator::Jump { .. }, 0) => {
                let mut b = ExprBuilder::new(ctx);
                Ok(b.true_())
            }
            (Terminator::CondBr { cond, .. }, 0) => self.operand_expr(ctx, function, cond),
            (Terminator::CondBr { cond, .. }, 1) => {
                let c = self.operand_expr(ctx, function, cond)?;
                let mut b = ExprBuilder::new(ctx);
                Ok(b.not(c)?)
            }
            _ => Err(BmcError::UnsupportedInstruction {
                reason: format!("terminator has no successor position {}", succ_idx),
            }),
        }
    }

    /// The equality binding a phi's result to the value incoming along the
    /// edge from `from`.
    pub fn phi_binding(
        &mut self,
        ctx: &mut Context,
        function: &Function,
        phi: &Phi,
        from: BlockId,
    ) -> Result<ExprId, BmcError> {
        let (_, operand) = phi
            .incoming
            .iter()
            .find(|(pred, _)| *pred == from)
            .ok_or_else(|| BmcError::UnsupportedInstruction {
                reason: format!("phi {} has no incoming value from {}", phi.dest, from),
            })?;
        let value = self.operand_expr(ctx, function, operand)?;
        self.bind(ctx, function, phi.dest, value)
    }
}

/// Placeholder used to split the memory-model borrow during delegation.
struct NullMemory;

impl MemoryModel for NullMemory {
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
        Err(BmcError::UnsupportedInstruction {
            reason: "re-entrant memory lowering".to_string(),
        })
    }
}
