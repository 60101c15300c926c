//! The simplifying expression builder.
//!
//! One checked constructor per expression kind. Every constructor verifies
//! the kind's well-typedness rule (returning
//! [`CoreError::TypeMismatch`] otherwise), applies a fixed catalogue of
//! local simplifications, and interns the canonical node:
//!
//! - boolean identities: `And(x, true) -> x`, `And(_, false) -> false`
//!   (dually for `Or`), `Not(Not(x)) -> x`, `Not` of a literal;
//! - identity constants: `Add(x, 0) -> x`, `Mul(x, 1) -> x`,
//!   `Select(true, a, _) -> a`, `Select(false, _, b) -> b`;
//! - variadic flattening: `And(And(a, b), c) -> And(a, b, c)` (and `Or`);
//! - constant folding whenever all operands are literals;
//! - n-ary `And`/`Or`: empty input yields `true`/`false`, a single
//!   operand yields that operand.
//!
//! No rewrites that depend on absence of overflow are performed;
//! bit-vector operators preserve their width; mixing `Int` and `Bv`
//! operands is a type mismatch.

use smallvec::{smallvec, SmallVec};

use crate::context::Context;
use crate::error::CoreError;
use crate::eval::{fold_binary, fold_unary};
use crate::expr::{ExprId, ExprKind, Literal};
use crate::types::{FloatFormat, Type, TypeId};

/// Builder over a mutable context. Cheap to create; borrow it for the
/// duration of a construction burst.
pub struct ExprBuilder<'ctx> {
    ctx: &'ctx mut Context,
}

impl<'ctx> ExprBuilder<'ctx> {
    pub fn new(ctx: &'ctx mut Context) -> Self {
        ExprBuilder { ctx }
    }

    pub fn context(&mut self) -> &mut Context {
        self.ctx
    }

    // -----------------------------------------------------------------------
    // Leaves
    // -----------------------------------------------------------------------

    pub fn bool_lit(&mut self, value: bool) -> ExprId {
        self.ctx
            .intern_node(ExprKind::BoolLit(value), TypeId::BOOL, SmallVec::new())
    }

    pub fn true_(&mut self) -> ExprId {
        self.bool_lit(true)
    }

    pub fn false_(&mut self) -> ExprId {
        self.bool_lit(false)
    }

    pub fn bv_lit(&mut self, value: u64, width: u32) -> ExprId {
        let masked = if width >= 64 {
            value
        } else {
            value & ((1u64 << width) - 1)
        };
        let ty = self.ctx.bv_type(width);
        self.ctx.intern_node(
            ExprKind::BvLit {
                value: masked,
                width,
            },
            ty,
            SmallVec::new(),
        )
    }

    pub fn int_lit(&mut self, value: i64) -> ExprId {
        self.ctx
            .intern_node(ExprKind::IntLit(value), TypeId::INT, SmallVec::new())
    }

    pub fn float_lit(&mut self, bits: u64, format: FloatFormat) -> ExprId {
        let ty = self.ctx.float_type(format);
        self.ctx
            .intern_node(ExprKind::FloatLit { bits, format }, ty, SmallVec::new())
    }

    /// Convenience constructor for `Single`/`Double` literals from an `f64`.
    pub fn float_from_f64(&mut self, value: f64, format: FloatFormat) -> ExprId {
        let bits = match format {
            FloatFormat::Single => (value as f32).to_bits() as u64,
            _ => value.to_bits(),
        };
        self.float_lit(bits, format)
    }

    /// The unique `Undef` node of a type.
    pub fn undef(&mut self, ty: TypeId) -> ExprId {
        self.ctx.intern_node(ExprKind::Undef, ty, SmallVec::new())
    }

    /// Interns the leaf corresponding to a concrete [`Literal`].
    pub fn literal(&mut self, lit: Literal) -> ExprId {
        match lit {
            Literal::Bool(value) => self.bool_lit(value),
            Literal::Bv { value, width } => self.bv_lit(value, width),
            Literal::Int(value) => self.int_lit(value),
            Literal::Float { bits, format } => self.float_lit(bits, format),
        }
    }

    // -----------------------------------------------------------------------
    // Boolean connectives
    // -----------------------------------------------------------------------

    pub fn not(&mut self, operand: ExprId) -> Result<ExprId, CoreError> {
        self.expect_bool("Not", operand)?;
        match self.ctx.expr(operand).kind() {
            ExprKind::BoolLit(value) => Ok(self.bool_lit(!value)),
            ExprKind::Not => Ok(self.ctx.expr(operand).operands()[0]),
            _ => Ok(self
                .ctx
                .intern_node(ExprKind::Not, TypeId::BOOL, smallvec![operand])),
        }
    }

    pub fn and(&mut self, operands: &[ExprId]) -> Result<ExprId, CoreError> {
        self.nary_connective(ExprKind::And, operands)
    }

    pub fn and2(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        self.and(&[lhs, rhs])
    }

    pub fn or(&mut self, operands: &[ExprId]) -> Result<ExprId, CoreError> {
        self.nary_connective(ExprKind::Or, operands)
    }

    pub fn or2(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        self.or(&[lhs, rhs])
    }

    /// Shared n-ary And/Or construction: flattening, unit/absorbing
    /// literals, empty/singleton rules.
    fn nary_connective(
        &mut self,
        kind: ExprKind,
        operands: &[ExprId],
    ) -> Result<ExprId, CoreError> {
        let unit = matches!(kind, ExprKind::And);
        let mut flat: SmallVec<[ExprId; 2]> = SmallVec::new();
        let mut worklist: Vec<ExprId> = operands.to_vec();
        let mut i = 0;
        while i < worklist.len() {
            let op = worklist[i];
            i += 1;
            self.expect_bool(if unit { "And" } else { "Or" }, op)?;
            match self.ctx.expr(op).kind() {
                k if k == kind => {
                    let children = self.ctx.expr(op).operands().to_vec();
                    worklist.splice(i..i, children);
                }
                ExprKind::BoolLit(value) if value == unit => {}
                ExprKind::BoolLit(value) => return Ok(self.bool_lit(value)),
                _ => flat.push(op),
            }
        }
        match flat.len() {
            0 => Ok(self.bool_lit(unit)),
            1 => Ok(flat[0]),
            _ => Ok(self.ctx.intern_node(kind, TypeId::BOOL, flat)),
        }
    }

    pub fn xor(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        self.expect_bool("Xor", lhs)?;
        self.expect_bool("Xor", rhs)?;
        self.binary_node(ExprKind::Xor, TypeId::BOOL, lhs, rhs)
    }

    // -----------------------------------------------------------------------
    // Comparison
    // -----------------------------------------------------------------------

    pub fn eq(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        self.expect_same("Eq", lhs, rhs)?;
        if self.ctx.ty(self.ctx.expr_ty(lhs)).is_float() {
            return Err(self.mismatch("Eq", lhs, "float operands use FEq"));
        }
        self.binary_node(ExprKind::Eq, TypeId::BOOL, lhs, rhs)
    }

    pub fn noteq(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        self.expect_same("NotEq", lhs, rhs)?;
        if self.ctx.ty(self.ctx.expr_ty(lhs)).is_float() {
            return Err(self.mismatch("NotEq", lhs, "float operands use FEq"));
        }
        self.binary_node(ExprKind::NotEq, TypeId::BOOL, lhs, rhs)
    }

    pub fn slt(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        self.signed_compare(ExprKind::SLt, "SLt", lhs, rhs)
    }

    pub fn slteq(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        self.signed_compare(ExprKind::SLtEq, "SLtEq", lhs, rhs)
    }

    pub fn ult(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        self.expect_bv_pair("ULt", lhs, rhs)?;
        self.binary_node(ExprKind::ULt, TypeId::BOOL, lhs, rhs)
    }

    pub fn ulteq(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        self.expect_bv_pair("ULtEq", lhs, rhs)?;
        self.binary_node(ExprKind::ULtEq, TypeId::BOOL, lhs, rhs)
    }

    fn signed_compare(
        &mut self,
        kind: ExprKind,
        op: &'static str,
        lhs: ExprId,
        rhs: ExprId,
    ) -> Result<ExprId, CoreError> {
        self.expect_same(op, lhs, rhs)?;
        let ty = self.ctx.ty(self.ctx.expr_ty(lhs));
        if !ty.is_bv() && !ty.is_int() {
            return Err(self.mismatch(op, lhs, "expects bit-vector or integer operands"));
        }
        self.binary_node(kind, TypeId::BOOL, lhs, rhs)
    }

    // -----------------------------------------------------------------------
    // Arithmetic
    // -----------------------------------------------------------------------

    pub fn add(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        let ty = self.numeric_pair("Add", lhs, rhs)?;
        // Identity constant: x + 0 -> x.
        if self.is_zero(rhs) {
            return Ok(lhs);
        }
        if self.is_zero(lhs) {
            return Ok(rhs);
        }
        self.binary_node(ExprKind::Add, ty, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        let ty = self.numeric_pair("Sub", lhs, rhs)?;
        self.binary_node(ExprKind::Sub, ty, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        let ty = self.numeric_pair("Mul", lhs, rhs)?;
        // Identity constant: x * 1 -> x.
        if self.is_one(rhs) {
            return Ok(lhs);
        }
        if self.is_one(lhs) {
            return Ok(rhs);
        }
        self.binary_node(ExprKind::Mul, ty, lhs, rhs)
    }

    pub fn sdiv(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        let ty = self.numeric_pair("SDiv", lhs, rhs)?;
        self.binary_node(ExprKind::SDiv, ty, lhs, rhs)
    }

    pub fn udiv(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        let ty = self.expect_bv_pair("UDiv", lhs, rhs)?;
        self.binary_node(ExprKind::UDiv, ty, lhs, rhs)
    }

    pub fn smod(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        let ty = self.numeric_pair("SMod", lhs, rhs)?;
        self.binary_node(ExprKind::SMod, ty, lhs, rhs)
    }

    pub fn urem(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        let ty = self.expect_bv_pair("URem", lhs, rhs)?;
        self.binary_node(ExprKind::URem, ty, lhs, rhs)
    }

    pub fn neg(&mut self, operand: ExprId) -> Result<ExprId, CoreError> {
        let ty_id = self.ctx.expr_ty(operand);
        let ty = *self.ctx.ty(ty_id);
        if !ty.is_bv() && !ty.is_int() {
            return Err(self.mismatch("Neg", operand, "expects bit-vector or integer operand"));
        }
        self.unary_node(ExprKind::Neg, ty_id, operand)
    }

    // -----------------------------------------------------------------------
    // Bit operations
    // -----------------------------------------------------------------------

    pub fn band(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        let ty = self.expect_bv_pair("BAnd", lhs, rhs)?;
        self.binary_node(ExprKind::BAnd, ty, lhs, rhs)
    }

    pub fn bor(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        let ty = self.expect_bv_pair("BOr", lhs, rhs)?;
        self.binary_node(ExprKind::BOr, ty, lhs, rhs)
    }

    pub fn bxor(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        let ty = self.expect_bv_pair("BXor", lhs, rhs)?;
        self.binary_node(ExprKind::BXor, ty, lhs, rhs)
    }

    pub fn shl(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        let ty = self.expect_bv_pair("Shl", lhs, rhs)?;
        self.binary_node(ExprKind::Shl, ty, lhs, rhs)
    }

    pub fn lshr(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        let ty = self.expect_bv_pair("LShr", lhs, rhs)?;
        self.binary_node(ExprKind::LShr, ty, lhs, rhs)
    }

    pub fn ashr(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        let ty = self.expect_bv_pair("AShr", lhs, rhs)?;
        self.binary_node(ExprKind::AShr, ty, lhs, rhs)
    }

    // -----------------------------------------------------------------------
    // Width and format conversions
    // -----------------------------------------------------------------------

    pub fn zext(&mut self, operand: ExprId, width: u32) -> Result<ExprId, CoreError> {
        self.extend("ZExt", ExprKind::ZExt, operand, width)
    }

    pub fn sext(&mut self, operand: ExprId, width: u32) -> Result<ExprId, CoreError> {
        self.extend("SExt", ExprKind::SExt, operand, width)
    }

    fn extend(
        &mut self,
        op: &'static str,
        kind: ExprKind,
        operand: ExprId,
        width: u32,
    ) -> Result<ExprId, CoreError> {
        let source = self
            .ctx
            .ty(self.ctx.expr_ty(operand))
            .bv_width()
            .ok_or_else(|| self.mismatch(op, operand, "expects a bit-vector operand"))?;
        if width <= source {
            return Err(self.mismatch(op, operand, "target width must be larger"));
        }
        let ty = self.ctx.bv_type(width);
        self.unary_node(kind, ty, operand)
    }

    pub fn trunc(&mut self, operand: ExprId, width: u32) -> Result<ExprId, CoreError> {
        let source = self
            .ctx
            .ty(self.ctx.expr_ty(operand))
            .bv_width()
            .ok_or_else(|| self.mismatch("Trunc", operand, "expects a bit-vector operand"))?;
        if width >= source {
            return Err(self.mismatch("Trunc", operand, "target width must be smaller"));
        }
        let ty = self.ctx.bv_type(width);
        self.unary_node(ExprKind::Trunc, ty, operand)
    }

    pub fn fcast(&mut self, operand: ExprId, format: FloatFormat) -> Result<ExprId, CoreError> {
        if !self.ctx.ty(self.ctx.expr_ty(operand)).is_float() {
            return Err(self.mismatch("FCast", operand, "expects a float operand"));
        }
        let ty = self.ctx.float_type(format);
        self.unary_node(ExprKind::FCast, ty, operand)
    }

    // -----------------------------------------------------------------------
    // Floating point
    // -----------------------------------------------------------------------

    pub fn fisnan(&mut self, operand: ExprId) -> Result<ExprId, CoreError> {
        if !self.ctx.ty(self.ctx.expr_ty(operand)).is_float() {
            return Err(self.mismatch("FIsNan", operand, "expects a float operand"));
        }
        self.unary_node(ExprKind::FIsNan, TypeId::BOOL, operand)
    }

    pub fn feq(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        self.expect_float_pair("FEq", lhs, rhs)?;
        self.binary_node(ExprKind::FEq, TypeId::BOOL, lhs, rhs)
    }

    pub fn flt(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        self.expect_float_pair("FLt", lhs, rhs)?;
        self.binary_node(ExprKind::FLt, TypeId::BOOL, lhs, rhs)
    }

    pub fn flteq(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        self.expect_float_pair("FLtEq", lhs, rhs)?;
        self.binary_node(ExprKind::FLtEq, TypeId::BOOL, lhs, rhs)
    }

    pub fn fadd(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        let ty = self.expect_float_pair("FAdd", lhs, rhs)?;
        self.binary_node(ExprKind::FAdd, ty, lhs, rhs)
    }

    pub fn fsub(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        let ty = self.expect_float_pair("FSub", lhs, rhs)?;
        self.binary_node(ExprKind::FSub, ty, lhs, rhs)
    }

    pub fn fmul(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        let ty = self.expect_float_pair("FMul", lhs, rhs)?;
        self.binary_node(ExprKind::FMul, ty, lhs, rhs)
    }

    pub fn fdiv(&mut self, lhs: ExprId, rhs: ExprId) -> Result<ExprId, CoreError> {
        let ty = self.expect_float_pair("FDiv", lhs, rhs)?;
        self.binary_node(ExprKind::FDiv, ty, lhs, rhs)
    }

    // -----------------------------------------------------------------------
    // Select and arrays
    // -----------------------------------------------------------------------

    pub fn select(
        &mut self,
        cond: ExprId,
        then_value: ExprId,
        else_value: ExprId,
    ) -> Result<ExprId, CoreError> {
        self.expect_bool("Select", cond)?;
        self.expect_same("Select", then_value, else_value)?;
        match self.ctx.expr(cond).kind() {
            ExprKind::BoolLit(true) => Ok(then_value),
            ExprKind::BoolLit(false) => Ok(else_value),
            _ => {
                let ty = self.ctx.expr_ty(then_value);
                Ok(self.ctx.intern_node(
                    ExprKind::Select,
                    ty,
                    smallvec![cond, then_value, else_value],
                ))
            }
        }
    }

    pub fn array_read(&mut self, array: ExprId, index: ExprId) -> Result<ExprId, CoreError> {
        let (index_ty, element_ty) = self.array_member_types("ArrayRead", array)?;
        if self.ctx.expr_ty(index) != index_ty {
            return Err(self.mismatch("ArrayRead", index, "index type does not match"));
        }
        Ok(self
            .ctx
            .intern_node(ExprKind::ArrayRead, element_ty, smallvec![array, index]))
    }

    pub fn array_write(
        &mut self,
        array: ExprId,
        index: ExprId,
        value: ExprId,
    ) -> Result<ExprId, CoreError> {
        let (index_ty, element_ty) = self.array_member_types("ArrayWrite", array)?;
        if self.ctx.expr_ty(index) != index_ty {
            return Err(self.mismatch("ArrayWrite", index, "index type does not match"));
        }
        if self.ctx.expr_ty(value) != element_ty {
            return Err(self.mismatch("ArrayWrite", value, "element type does not match"));
        }
        let ty = self.ctx.expr_ty(array);
        Ok(self
            .ctx
            .intern_node(ExprKind::ArrayWrite, ty, smallvec![array, index, value]))
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Interns a unary node, constant-folding a literal operand first.
    fn unary_node(
        &mut self,
        kind: ExprKind,
        ty: TypeId,
        operand: ExprId,
    ) -> Result<ExprId, CoreError> {
        if let Some(lit) = self.ctx.expr(operand).as_literal() {
            let result_ty = *self.ctx.ty(ty);
            if let Some(folded) = fold_unary(kind, &lit, &result_ty) {
                return Ok(self.literal(folded));
            }
        }
        Ok(self.ctx.intern_node(kind, ty, smallvec![operand]))
    }

    /// Interns a binary node, constant-folding literal operands first.
    fn binary_node(
        &mut self,
        kind: ExprKind,
        ty: TypeId,
        lhs: ExprId,
        rhs: ExprId,
    ) -> Result<ExprId, CoreError> {
        let lhs_lit = self.ctx.expr(lhs).as_literal();
        let rhs_lit = self.ctx.expr(rhs).as_literal();
        if let (Some(a), Some(b)) = (lhs_lit, rhs_lit) {
            if let Some(folded) = fold_binary(kind, &a, &b) {
                return Ok(self.literal(folded));
            }
        }
        Ok(self.ctx.intern_node(kind, ty, smallvec![lhs, rhs]))
    }

    fn is_zero(&self, id: ExprId) -> bool {
        matches!(
            self.ctx.expr(id).kind(),
            ExprKind::BvLit { value: 0, .. } | ExprKind::IntLit(0)
        )
    }

    fn is_one(&self, id: ExprId) -> bool {
        matches!(
            self.ctx.expr(id).kind(),
            ExprKind::BvLit { value: 1, .. } | ExprKind::IntLit(1)
        )
    }

    fn mismatch(&self, op: &'static str, id: ExprId, details: &str) -> CoreError {
        let ty = self.ctx.ty(self.ctx.expr_ty(id));
        CoreError::TypeMismatch {
            op,
            details: format!("{} (operand has type {})", details, ty),
        }
    }

    fn expect_bool(&self, op: &'static str, id: ExprId) -> Result<(), CoreError> {
        if self.ctx.ty(self.ctx.expr_ty(id)).is_bool() {
            Ok(())
        } else {
            Err(self.mismatch(op, id, "expects boolean operands"))
        }
    }

    fn expect_same(&self, op: &'static str, lhs: ExprId, rhs: ExprId) -> Result<(), CoreError> {
        if self.ctx.expr_ty(lhs) == self.ctx.expr_ty(rhs) {
            Ok(())
        } else {
            let lt = self.ctx.ty(self.ctx.expr_ty(lhs));
            let rt = self.ctx.ty(self.ctx.expr_ty(rhs));
            Err(CoreError::TypeMismatch {
                op,
                details: format!("operand types differ: {} vs {}", lt, rt),
            })
        }
    }

    /// Both operands bit-vectors of the same width; returns the operand type.
    fn expect_bv_pair(
        &self,
        op: &'static str,
        lhs: ExprId,
        rhs: ExprId,
    ) -> Result<TypeId, CoreError> {
        self.expect_same(op, lhs, rhs)?;
        let ty = self.ctx.expr_ty(lhs);
        if self.ctx.ty(ty).is_bv() {
            Ok(ty)
        } else {
            Err(self.mismatch(op, lhs, "expects bit-vector operands"))
        }
    }

    /// Both operands `Bv(w)` or both `Int`; returns the operand type.
    fn numeric_pair(
        &self,
        op: &'static str,
        lhs: ExprId,
        rhs: ExprId,
    ) -> Result<TypeId, CoreError> {
        self.expect_same(op, lhs, rhs)?;
        let ty = self.ctx.expr_ty(lhs);
        match self.ctx.ty(ty) {
            Type::Bv { .. } | Type::Int => Ok(ty),
            _ => Err(self.mismatch(op, lhs, "expects bit-vector or integer operands")),
        }
    }

    fn expect_float_pair(
        &self,
        op: &'static str,
        lhs: ExprId,
        rhs: ExprId,
    ) -> Result<TypeId, CoreError> {
        self.expect_same(op, lhs, rhs)?;
        let ty = self.ctx.expr_ty(lhs);
        if self.ctx.ty(ty).is_float() {
            Ok(ty)
        } else {
            Err(self.mismatch(op, lhs, "expects float operands"))
        }
    }

    fn array_member_types(
        &self,
        op: &'static str,
        array: ExprId,
    ) -> Result<(TypeId, TypeId), CoreError> {
        match self.ctx.ty(self.ctx.expr_ty(array)) {
            Type::Array { index, element } => Ok((*index, *element)),
            _ => Err(self.mismatch(op, array, "expects an array operand")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use crate::eval::eval;
    use std::collections::HashMap;

    fn ctx() -> Context {
        Context::new()
    }

    #[test]
    fn hash_consing_same_operands_same_handle() {
        let mut ctx = ctx();
        let bv32 = ctx.bv_type(32);
        let x = ctx.declare_var("x", bv32).unwrap();
        let x_ref = ctx.var_ref(x);
        let mut b = ExprBuilder::new(&mut ctx);
        let y = b.bv_lit(3, 32);
        let e1 = b.sub(x_ref, y).unwrap();
        let e2 = b.sub(x_ref, y).unwrap();
        assert_eq!(e1, e2);
    }

    #[test]
    fn and_with_true_is_identity() {
        let mut ctx = ctx();
        let p = ctx.declare_var("p", TypeId::BOOL).unwrap();
        let p_ref = ctx.var_ref(p);
        let mut b = ExprBuilder::new(&mut ctx);
        let t = b.true_();
        assert_eq!(b.and2(p_ref, t).unwrap(), p_ref);
    }

    #[test]
    fn and_with_false_absorbs() {
        let mut ctx = ctx();
        let p = ctx.declare_var("p", TypeId::BOOL).unwrap();
        let p_ref = ctx.var_ref(p);
        let mut b = ExprBuilder::new(&mut ctx);
        let f = b.false_();
        assert_eq!(b.and2(p_ref, f).unwrap(), f);
    }

    #[test]
    fn or_duals() {
        let mut ctx = ctx();
        let p = ctx.declare_var("p", TypeId::BOOL).unwrap();
        let p_ref = ctx.var_ref(p);
        let mut b = ExprBuilder::new(&mut ctx);
        let t = b.true_();
        let f = b.false_();
        assert_eq!(b.or2(p_ref, f).unwrap(), p_ref);
        assert_eq!(b.or2(p_ref, t).unwrap(), t);
    }

    #[test]
    fn double_negation_cancels() {
        let mut ctx = ctx();
        let p = ctx.declare_var("p", TypeId::BOOL).unwrap();
        let p_ref = ctx.var_ref(p);
        let mut b = ExprBuilder::new(&mut ctx);
        let n = b.not(p_ref).unwrap();
        assert_eq!(b.not(n).unwrap(), p_ref);
    }

    #[test]
    fn not_of_literals() {
        let mut ctx = ctx();
        let mut b = ExprBuilder::new(&mut ctx);
        let f = b.false_();
        let t = b.true_();
        assert_eq!(b.not(f).unwrap(), t);
        assert_eq!(b.not(t).unwrap(), f);
    }

    #[test]
    fn nested_and_flattens() {
        let mut ctx = ctx();
        let p = ctx.declare_var("p", TypeId::BOOL).unwrap();
        let q = ctx.declare_var("q", TypeId::BOOL).unwrap();
        let r = ctx.declare_var("r", TypeId::BOOL).unwrap();
        let (p, q, r) = (ctx.var_ref(p), ctx.var_ref(q), ctx.var_ref(r));
        let mut b = ExprBuilder::new(&mut ctx);
        let inner = b.and2(p, q).unwrap();
        let outer = b.and2(inner, r).unwrap();
        let direct = b.and(&[p, q, r]).unwrap();
        assert_eq!(outer, direct);
        assert_eq!(ctx.expr(outer).operands().len(), 3);
    }

    #[test]
    fn empty_and_singleton_nary() {
        let mut ctx = ctx();
        let p = ctx.declare_var("p", TypeId::BOOL).unwrap();
        let p_ref = ctx.var_ref(p);
        let mut b = ExprBuilder::new(&mut ctx);
        let t = b.true_();
        let f = b.false_();
        assert_eq!(b.and(&[]).unwrap(), t);
        assert_eq!(b.or(&[]).unwrap(), f);
        assert_eq!(b.and(&[p_ref]).unwrap(), p_ref);
        assert_eq!(b.or(&[p_ref]).unwrap(), p_ref);
    }

    #[test]
    fn add_zero_and_mul_one_identities() {
        let mut ctx = ctx();
        let bv32 = ctx.bv_type(32);
        let x = ctx.declare_var("x", bv32).unwrap();
        let x_ref = ctx.var_ref(x);
        let mut b = ExprBuilder::new(&mut ctx);
        let zero = b.bv_lit(0, 32);
        let one = b.bv_lit(1, 32);
        assert_eq!(b.add(x_ref, zero).unwrap(), x_ref);
        assert_eq!(b.add(zero, x_ref).unwrap(), x_ref);
        assert_eq!(b.mul(x_ref, one).unwrap(), x_ref);
        assert_eq!(b.mul(one, x_ref).unwrap(), x_ref);
    }

    #[test]
    fn select_on_literal_condition() {
        let mut ctx = ctx();
        let bv8 = ctx.bv_type(8);
        let x = ctx.declare_var("x", bv8).unwrap();
        let y = ctx.declare_var("y", bv8).unwrap();
        let (x_ref, y_ref) = (ctx.var_ref(x), ctx.var_ref(y));
        let mut b = ExprBuilder::new(&mut ctx);
        let t = b.true_();
        let f = b.false_();
        assert_eq!(b.select(t, x_ref, y_ref).unwrap(), x_ref);
        assert_eq!(b.select(f, x_ref, y_ref).unwrap(), y_ref);
    }

    #[test]
    fn constant_folding_all_literal() {
        let mut ctx = ctx();
        let mut b = ExprBuilder::new(&mut ctx);
        let two = b.bv_lit(2, 32);
        let three = b.bv_lit(3, 32);
        let six = b.bv_lit(6, 32);
        assert_eq!(b.mul(two, three).unwrap(), six);

        let one = b.int_lit(1);
        let other_one = b.int_lit(1);
        let folded = b.eq(one, other_one).unwrap();
        assert_eq!(folded, b.true_());
    }

    #[test]
    fn division_by_zero_stays_symbolic() {
        let mut ctx = ctx();
        let mut b = ExprBuilder::new(&mut ctx);
        let four = b.bv_lit(4, 32);
        let zero = b.bv_lit(0, 32);
        let div = b.sdiv(four, zero).unwrap();
        assert_eq!(ctx.expr(div).kind(), ExprKind::SDiv);
    }

    #[test]
    fn int_bv_mixing_is_rejected() {
        let mut ctx = ctx();
        let mut b = ExprBuilder::new(&mut ctx);
        let i = b.int_lit(1);
        let v = b.bv_lit(1, 32);
        assert!(matches!(
            b.add(i, v),
            Err(CoreError::TypeMismatch { op: "Add", .. })
        ));
    }

    #[test]
    fn width_mismatch_is_rejected() {
        let mut ctx = ctx();
        let mut b = ExprBuilder::new(&mut ctx);
        let narrow = b.bv_lit(1, 8);
        let wide = b.bv_lit(1, 32);
        assert!(b.add(narrow, wide).is_err());
        assert!(b.eq(narrow, wide).is_err());
    }

    #[test]
    fn and_requires_bools() {
        let mut ctx = ctx();
        let mut b = ExprBuilder::new(&mut ctx);
        let v = b.bv_lit(1, 8);
        let t = b.true_();
        assert!(b.and2(v, t).is_err());
    }

    #[test]
    fn eq_on_floats_is_rejected() {
        let mut ctx = ctx();
        let mut b = ExprBuilder::new(&mut ctx);
        let a = b.float_from_f64(1.0, FloatFormat::Double);
        let c = b.float_from_f64(2.0, FloatFormat::Double);
        assert!(b.eq(a, c).is_err());
        assert!(b.feq(a, c).is_ok());
    }

    #[test]
    fn undef_is_unique_per_type() {
        let mut ctx = ctx();
        let bv32 = ctx.bv_type(32);
        let bv64 = ctx.bv_type(64);
        let mut b = ExprBuilder::new(&mut ctx);
        let u1 = b.undef(bv32);
        let u2 = b.undef(bv32);
        let u3 = b.undef(bv64);
        let zero = b.bv_lit(0, 32);
        assert_eq!(u1, u2);
        assert_ne!(u1, u3);
        assert_ne!(u1, zero);
    }

    #[test]
    fn zext_widens_and_checks_direction() {
        let mut ctx = ctx();
        let bv8 = ctx.bv_type(8);
        let x = ctx.declare_var("x", bv8).unwrap();
        let x_ref = ctx.var_ref(x);
        let mut b = ExprBuilder::new(&mut ctx);
        let widened = b.zext(x_ref, 32).unwrap();
        assert!(b.trunc(widened, 8).is_ok());
        assert!(b.zext(x_ref, 8).is_err());
        assert!(b.trunc(x_ref, 8).is_err());
    }

    #[test]
    fn fcmp_of_literals_folds() {
        let mut ctx = ctx();
        let mut b = ExprBuilder::new(&mut ctx);
        let one = b.float_from_f64(1.0, FloatFormat::Double);
        let two = b.float_from_f64(2.0, FloatFormat::Double);
        let lt = b.flt(one, two).unwrap();
        assert_eq!(lt, b.true_());
    }

    #[test]
    fn array_read_write_typing() {
        let mut ctx = ctx();
        let bv32 = ctx.bv_type(32);
        let arr_ty = ctx.array_type(bv32, TypeId::BOOL);
        let a = ctx.declare_var("a", arr_ty).unwrap();
        let a_ref = ctx.var_ref(a);
        let mut b = ExprBuilder::new(&mut ctx);
        let idx = b.bv_lit(0, 32);
        let t = b.true_();

        let written = b.array_write(a_ref, idx, t).unwrap();
        let read = b.array_read(written, idx).unwrap();
        assert_eq!(b.context().expr_ty(read), TypeId::BOOL);
        assert_eq!(b.context().expr_ty(written), arr_ty);

        let bad_idx = b.int_lit(0);
        assert!(b.array_read(a_ref, bad_idx).is_err());
        assert!(b.array_write(a_ref, idx, idx).is_err());
    }

    proptest! {
        /// Hash-consing: rebuilding the same term always yields the same
        /// handle.
        #[test]
        fn hash_consing_is_stable(a in any::<u32>(), c in any::<u32>()) {
            let mut ctx = Context::new();
            let bv32 = ctx.bv_type(32);
            let x = ctx.declare_var("x", bv32).unwrap();
            let x_ref = ctx.var_ref(x);
            let mut b = ExprBuilder::new(&mut ctx);
            let la = b.bv_lit(a as u64, 32);
            let lc = b.bv_lit(c as u64, 32);
            let sum = b.add(x_ref, la).unwrap();
            let e1 = b.bxor(sum, lc).unwrap();
            let sum2 = b.add(x_ref, la).unwrap();
            let e2 = b.bxor(sum2, lc).unwrap();
            prop_assert_eq!(e1, e2);
        }

        /// Constant folding agrees with the evaluator on fully-literal
        /// expressions.
        #[test]
        fn folding_matches_evaluator(a in any::<u32>(), c in any::<u32>()) {
            let mut ctx = Context::new();
            let mut b = ExprBuilder::new(&mut ctx);
            let la = b.bv_lit(a as u64, 32);
            let lc = b.bv_lit(c as u64, 32);
            let folded = b.add(la, lc).unwrap();
            let lit = ctx.expr(folded).as_literal().expect("folded to literal");
            let expected = Literal::Bv {
                value: (a as u64).wrapping_add(c as u64) & 0xFFFF_FFFF,
                width: 32,
            };
            prop_assert_eq!(lit, expected);
            let env = HashMap::new();
            prop_assert_eq!(eval(&ctx, folded, &env), Some(expected));
        }
    }
}
