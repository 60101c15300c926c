//! S-expression rendering of the expression DAG.
//!
//! Used by the `--dump-formula` diagnostic and by error messages. Shared
//! subterms are printed in full at each occurrence; the output is for
//! human eyes, not for re-parsing.

use std::fmt;

use crate::context::Context;
use crate::expr::{ExprId, ExprKind};

/// Adapter implementing [`fmt::Display`] for an expression handle.
///
/// Created by [`Context::display_expr`].
pub struct DisplayExpr<'a> {
    ctx: &'a Context,
    id: ExprId,
}

impl<'a> DisplayExpr<'a> {
    pub(crate) fn new(ctx: &'a Context, id: ExprId) -> Self {
        DisplayExpr { ctx, id }
    }

    fn write(&self, f: &mut fmt::Formatter<'_>, id: ExprId) -> fmt::Result {
        let node = self.ctx.expr(id);
        match node.kind() {
            ExprKind::VarRef(var) => write!(f, "{}", self.ctx.var(var).name()),
            ExprKind::Undef => write!(f, "undef"),
            _ if node.kind().is_literal() => {
                write!(f, "{}", node.as_literal().expect("literal leaf"))
            }
            kind => {
                write!(f, "({}", op_name(kind))?;
                for &operand in node.operands() {
                    write!(f, " ")?;
                    self.write(f, operand)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for DisplayExpr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, self.id)
    }
}

fn op_name(kind: ExprKind) -> &'static str {
    match kind {
        ExprKind::Not => "not",
        ExprKind::Neg => "neg",
        ExprKind::ZExt => "zext",
        ExprKind::SExt => "sext",
        ExprKind::Trunc => "trunc",
        ExprKind::FCast => "fcast",
        ExprKind::FIsNan => "fisnan",
        ExprKind::And => "and",
        ExprKind::Or => "or",
        ExprKind::Xor => "xor",
        ExprKind::Eq => "=",
        ExprKind::NotEq => "!=",
        ExprKind::SLt => "<s",
        ExprKind::SLtEq => "<=s",
        ExprKind::ULt => "<u",
        ExprKind::ULtEq => "<=u",
        ExprKind::Add => "+",
        ExprKind::Sub => "-",
        ExprKind::Mul => "*",
        ExprKind::SDiv => "divs",
        ExprKind::UDiv => "divu",
        ExprKind::SMod => "mods",
        ExprKind::URem => "remu",
        ExprKind::BAnd => "bvand",
        ExprKind::BOr => "bvor",
        ExprKind::BXor => "bvxor",
        ExprKind::Shl => "shl",
        ExprKind::LShr => "lshr",
        ExprKind::AShr => "ashr",
        ExprKind::FEq => "feq",
        ExprKind::FLt => "flt",
        ExprKind::FLtEq => "flteq",
        ExprKind::FAdd => "fadd",
        ExprKind::FSub => "fsub",
        ExprKind::FMul => "fmul",
        ExprKind::FDiv => "fdiv",
        ExprKind::Select => "ite",
        ExprKind::ArrayRead => "read",
        ExprKind::ArrayWrite => "write",
        // Leaves are rendered before reaching here.
        _ => "?",
    }
}
