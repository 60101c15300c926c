//! Literal evaluation of expressions under a partial variable assignment.
//!
//! [`eval`] computes the value of an expression whose free variables are
//! covered by the environment, returning `None` when the value is not
//! determined (unbound variable, `Undef`, an unsupported float format, or
//! division by zero). The same folding helpers back the builder's constant
//! folding, so "fold result == evaluator result" holds by construction.
//!
//! Semantics: bit-vector arithmetic wraps modulo the width; `Int` uses
//! 64-bit two's complement storage; `Half` and `Quad` floats never
//! evaluate; shifts by an amount >= width do not fold.

use std::collections::HashMap;

use crate::context::{Context, VarId};
use crate::expr::{ExprId, ExprKind, Literal};
use crate::types::{FloatFormat, Type};

/// All-ones mask for a bit-vector width (width 64 is the full word).
fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Reinterprets a masked bit-vector value as a signed 64-bit integer.
fn to_signed(value: u64, width: u32) -> i64 {
    if width >= 64 {
        value as i64
    } else if value & (1u64 << (width - 1)) != 0 {
        (value | !mask(width)) as i64
    } else {
        value as i64
    }
}

/// Truncates a signed 64-bit integer back into a bit-vector value.
fn from_signed(value: i64, width: u32) -> u64 {
    (value as u64) & mask(width)
}

/// Evaluates an expression under a partial assignment.
pub fn eval(ctx: &Context, id: ExprId, env: &HashMap<VarId, Literal>) -> Option<Literal> {
    let node = ctx.expr(id);
    match node.kind() {
        ExprKind::BoolLit(_)
        | ExprKind::BvLit { .. }
        | ExprKind::IntLit(_)
        | ExprKind::FloatLit { .. } => node.as_literal(),
        ExprKind::VarRef(var) => env.get(&var).copied(),
        ExprKind::Undef => None,

        // Short-circuiting connectives: a single decided operand can decide
        // the whole expression even when siblings are unknown.
        ExprKind::And => {
            let mut all_known = true;
            for &op in node.operands() {
                match eval(ctx, op, env) {
                    Some(Literal::Bool(false)) => return Some(Literal::Bool(false)),
                    Some(Literal::Bool(true)) => {}
                    _ => all_known = false,
                }
            }
            all_known.then_some(Literal::Bool(true))
        }
        ExprKind::Or => {
            let mut all_known = true;
            for &op in node.operands() {
                match eval(ctx, op, env) {
                    Some(Literal::Bool(true)) => return Some(Literal::Bool(true)),
                    Some(Literal::Bool(false)) => {}
                    _ => all_known = false,
                }
            }
            all_known.then_some(Literal::Bool(false))
        }

        ExprKind::Select => {
            let cond = eval(ctx, node.operands()[0], env)?;
            match cond.as_bool()? {
                true => eval(ctx, node.operands()[1], env),
                false => eval(ctx, node.operands()[2], env),
            }
        }

        ExprKind::Not
        | ExprKind::Neg
        | ExprKind::ZExt
        | ExprKind::SExt
        | ExprKind::Trunc
        | ExprKind::FCast
        | ExprKind::FIsNan => {
            let operand = eval(ctx, node.operands()[0], env)?;
            fold_unary(node.kind(), &operand, ctx.ty(node.ty()))
        }

        ExprKind::ArrayRead | ExprKind::ArrayWrite => None,

        kind => {
            let lhs = eval(ctx, node.operands()[0], env)?;
            let rhs = eval(ctx, node.operands()[1], env)?;
            fold_binary(kind, &lhs, &rhs)
        }
    }
}

/// Folds a unary operator over a literal operand.
///
/// `result_ty` supplies the target width/format for the cast kinds.
pub(crate) fn fold_unary(kind: ExprKind, operand: &Literal, result_ty: &Type) -> Option<Literal> {
    match (kind, operand) {
        (ExprKind::Not, Literal::Bool(value)) => Some(Literal::Bool(!value)),
        (ExprKind::Neg, Literal::Bv { value, width }) => Some(Literal::Bv {
            value: value.wrapping_neg() & mask(*width),
            width: *width,
        }),
        (ExprKind::Neg, Literal::Int(value)) => Some(Literal::Int(value.wrapping_neg())),
        (ExprKind::ZExt, Literal::Bv { value, .. }) => {
            let target = result_ty.bv_width()?;
            Some(Literal::Bv {
                value: *value,
                width: target,
            })
        }
        (ExprKind::SExt, Literal::Bv { value, width }) => {
            let target = result_ty.bv_width()?;
            Some(Literal::Bv {
                value: from_signed(to_signed(*value, *width), target),
                width: target,
            })
        }
        (ExprKind::Trunc, Literal::Bv { value, .. }) => {
            let target = result_ty.bv_width()?;
            Some(Literal::Bv {
                value: value & mask(target),
                width: target,
            })
        }
        (ExprKind::FCast, Literal::Float { .. }) => {
            let value = operand.to_f64()?;
            match result_ty.float_format()? {
                FloatFormat::Single => Some(Literal::Float {
                    bits: (value as f32).to_bits() as u64,
                    format: FloatFormat::Single,
                }),
                FloatFormat::Double => Some(Literal::Float {
                    bits: value.to_bits(),
                    format: FloatFormat::Double,
                }),
                _ => None,
            }
        }
        (ExprKind::FIsNan, Literal::Float { .. }) => {
            Some(Literal::Bool(operand.to_f64()?.is_nan()))
        }
        _ => None,
    }
}

/// Folds a binary operator over two literal operands.
pub(crate) fn fold_binary(kind: ExprKind, lhs: &Literal, rhs: &Literal) -> Option<Literal> {
    use ExprKind::*;

    // Structural (dis)equality is defined for every matching literal pair.
    match kind {
        Eq => return Some(Literal::Bool(lhs == rhs)),
        NotEq => return Some(Literal::Bool(lhs != rhs)),
        Xor => {
            let (a, b) = (lhs.as_bool()?, rhs.as_bool()?);
            return Some(Literal::Bool(a ^ b));
        }
        _ => {}
    }

    match (lhs, rhs) {
        (Literal::Bv { value: a, width }, Literal::Bv { value: b, .. }) => {
            let (a, b, w) = (*a, *b, *width);
            let bv = |value: u64| {
                Some(Literal::Bv {
                    value: value & mask(w),
                    width: w,
                })
            };
            match kind {
                SLt => Some(Literal::Bool(to_signed(a, w) < to_signed(b, w))),
                SLtEq => Some(Literal::Bool(to_signed(a, w) <= to_signed(b, w))),
                ULt => Some(Literal::Bool(a < b)),
                ULtEq => Some(Literal::Bool(a <= b)),
                Add => bv(a.wrapping_add(b)),
                Sub => bv(a.wrapping_sub(b)),
                Mul => bv(a.wrapping_mul(b)),
                SDiv if b != 0 => bv(from_signed(
                    to_signed(a, w).wrapping_div(to_signed(b, w)),
                    w,
                )),
                UDiv if b != 0 => bv(a / b),
                SMod if b != 0 => bv(from_signed(
                    to_signed(a, w).wrapping_rem(to_signed(b, w)),
                    w,
                )),
                URem if b != 0 => bv(a % b),
                BAnd => bv(a & b),
                BOr => bv(a | b),
                BXor => bv(a ^ b),
                Shl if b < w as u64 => bv(a << b),
                LShr if b < w as u64 => bv((a & mask(w)) >> b),
                AShr if b < w as u64 => bv(from_signed(to_signed(a, w) >> b, w)),
                _ => None,
            }
        }
        (Literal::Int(a), Literal::Int(b)) => {
            let (a, b) = (*a, *b);
            match kind {
                SLt => Some(Literal::Bool(a < b)),
                SLtEq => Some(Literal::Bool(a <= b)),
                Add => Some(Literal::Int(a.wrapping_add(b))),
                Sub => Some(Literal::Int(a.wrapping_sub(b))),
                Mul => Some(Literal::Int(a.wrapping_mul(b))),
                SDiv if b != 0 => Some(Literal::Int(a.wrapping_div(b))),
                SMod if b != 0 => Some(Literal::Int(a.wrapping_rem(b))),
                _ => None,
            }
        }
        (Literal::Float { format, .. }, Literal::Float { .. }) => {
            let (a, b) = (lhs.to_f64()?, rhs.to_f64()?);
            let fp = |value: f64| match format {
                FloatFormat::Single => Some(Literal::Float {
                    bits: (value as f32).to_bits() as u64,
                    format: FloatFormat::Single,
                }),
                FloatFormat::Double => Some(Literal::Float {
                    bits: value.to_bits(),
                    format: FloatFormat::Double,
                }),
                _ => None,
            };
            match kind {
                // Ordered comparisons: false whenever either side is NaN.
                FEq => Some(Literal::Bool(a == b)),
                FLt => Some(Literal::Bool(a < b)),
                FLtEq => Some(Literal::Bool(a <= b)),
                FAdd => fp(a + b),
                FSub => fp(a - b),
                FMul => fp(a * b),
                FDiv => fp(a / b),
                _ => None,
            }
        }
        _ => None,
    }
}
