//! Expression nodes of the hash-consed term DAG.
//!
//! An expression is an arena node `(kind, result type, ordered operands)`
//! identified by an [`ExprId`] handle. The [`Context`](crate::context::Context)
//! interns nodes on exactly that triple, so handle equality *is* structural
//! equality, and the DAG is acyclic by construction (operands always exist
//! before the node referencing them).

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::context::VarId;
use crate::types::{FloatFormat, Type, TypeId};

/// Handle of an interned expression node. Only meaningful together with
/// the context that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExprId(pub u32);

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// The closed set of expression kinds.
///
/// Leaf kinds carry their payload inline; operator kinds are payload-free,
/// their operands live in the node's operand list and their result type in
/// the node's type field.
///
/// Note: `FloatLit` stores raw IEEE bits rather than an `f32`/`f64`. Rust
/// floats do not implement `Eq`/`Hash` (NaN), which the interner key
/// requires; storing bits sidesteps that while preserving the value
/// exactly. The conversion happens in [`Literal::to_f64`] and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprKind {
    // -- Leaves --
    /// Reference to a context variable.
    VarRef(VarId),
    /// The single unknown value of the node's type.
    Undef,
    BoolLit(bool),
    BvLit { value: u64, width: u32 },
    IntLit(i64),
    FloatLit { bits: u64, format: FloatFormat },

    // -- Unary --
    Not,
    Neg,
    ZExt,
    SExt,
    Trunc,
    FCast,
    FIsNan,

    // -- Boolean connectives (n-ary for And/Or) --
    And,
    Or,
    Xor,

    // -- Comparison --
    Eq,
    NotEq,
    SLt,
    SLtEq,
    ULt,
    ULtEq,

    // -- Arithmetic --
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SMod,
    URem,

    // -- Bit operations --
    BAnd,
    BOr,
    BXor,
    Shl,
    LShr,
    AShr,

    // -- Floating point --
    FEq,
    FLt,
    FLtEq,
    FAdd,
    FSub,
    FMul,
    FDiv,

    // -- Ternary / arrays --
    Select,
    ArrayRead,
    ArrayWrite,
}

impl ExprKind {
    /// Returns `true` for leaf kinds (no operands).
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            ExprKind::VarRef(_)
                | ExprKind::Undef
                | ExprKind::BoolLit(_)
                | ExprKind::BvLit { .. }
                | ExprKind::IntLit(_)
                | ExprKind::FloatLit { .. }
        )
    }

    /// Returns `true` for defined literal leaves (excludes `Undef` and
    /// `VarRef`).
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            ExprKind::BoolLit(_)
                | ExprKind::BvLit { .. }
                | ExprKind::IntLit(_)
                | ExprKind::FloatLit { .. }
        )
    }

    /// Returns `true` for the floating-point comparison kinds.
    pub fn is_float_compare(&self) -> bool {
        matches!(self, ExprKind::FEq | ExprKind::FLt | ExprKind::FLtEq)
    }
}

/// One node of the expression DAG.
///
/// The triple `(kind, ty, operands)` is the interner key; nodes are
/// immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExprNode {
    pub(crate) kind: ExprKind,
    pub(crate) ty: TypeId,
    pub(crate) operands: SmallVec<[ExprId; 2]>,
}

impl ExprNode {
    pub fn kind(&self) -> ExprKind {
        self.kind
    }

    pub fn ty(&self) -> TypeId {
        self.ty
    }

    pub fn operands(&self) -> &[ExprId] {
        &self.operands
    }

    /// The defined literal value of this node, if it is a literal leaf.
    pub fn as_literal(&self) -> Option<Literal> {
        match self.kind {
            ExprKind::BoolLit(value) => Some(Literal::Bool(value)),
            ExprKind::BvLit { value, width } => Some(Literal::Bv { value, width }),
            ExprKind::IntLit(value) => Some(Literal::Int(value)),
            ExprKind::FloatLit { bits, format } => Some(Literal::Float { bits, format }),
            _ => None,
        }
    }
}

/// A concrete value: the model-side mirror of the literal leaf kinds.
///
/// Solvers assign `Literal`s to variables; the evaluator computes them for
/// literal-closed expressions. `Int` uses 64-bit two's complement storage.
/// Float values are raw IEEE bits, same as [`ExprKind::FloatLit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Literal {
    Bool(bool),
    Bv { value: u64, width: u32 },
    Int(i64),
    Float { bits: u64, format: FloatFormat },
}

impl Literal {
    /// The zero-like literal of a type: `false`, zero, or `+0.0`.
    /// Arrays have no zero-like literal.
    pub fn zero_of(ty: &Type) -> Option<Literal> {
        match ty {
            Type::Bool => Some(Literal::Bool(false)),
            Type::Bv { width } => Some(Literal::Bv {
                value: 0,
                width: *width,
            }),
            Type::Int => Some(Literal::Int(0)),
            Type::Float(format) => Some(Literal::Float {
                bits: 0,
                format: *format,
            }),
            Type::Array { .. } => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Literal::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// The numeric value as an unsigned 64-bit quantity, for bit-vector
    /// and integer literals.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Literal::Bv { value, .. } => Some(*value),
            Literal::Int(value) => Some(*value as u64),
            _ => None,
        }
    }

    /// The floating-point value, for `Single` and `Double` literals.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Literal::Float { bits, format } => match format {
                FloatFormat::Single => Some(f32::from_bits(*bits as u32) as f64),
                FloatFormat::Double => Some(f64::from_bits(*bits)),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(value) => write!(f, "{}", value),
            Literal::Bv { value, width } => write!(f, "{}bv{}", value, width),
            Literal::Int(value) => write!(f, "{}", value),
            Literal::Float { bits, format } => match format {
                FloatFormat::Single => write!(f, "{}", f32::from_bits(*bits as u32)),
                FloatFormat::Double => write!(f, "{}", f64::from_bits(*bits)),
                _ => write!(f, "fp{}#{:#x}", format.width(), bits),
            },
        }
    }
}
