//! Instruction vocabulary of the three-address IR.
//!
//! Operators are grouped into small enums by family (arithmetic, bits,
//! shifts, comparisons, float variants, casts); signedness lives in the
//! operator, not the type, following the LLVM model. A [`Rhs`] is the
//! right-hand side of a value definition; an [`Instr`] pairs it with an
//! optional destination value and an optional source location.

use serde::{Deserialize, Serialize};

use kestrel_core::FloatFormat;

use crate::id::{BlockId, ValueId};

/// Types a front-end can give to IR values.
///
/// `Int { width: 1 }` is the boolean carrier (LLVM `i1`). Pointer-typed
/// values are opaque to the core and handled by the memory model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IrType {
    Int { width: u32 },
    Float(FloatFormat),
    Ptr,
}

impl IrType {
    pub const I1: IrType = IrType::Int { width: 1 };
    pub const I32: IrType = IrType::Int { width: 32 };
    pub const I64: IrType = IrType::Int { width: 64 };
}

/// A constant operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IrConst {
    /// Integer constant of the given width; `width == 1` is a boolean.
    Int { value: u64, width: u32 },
    /// Float constant as raw IEEE bits.
    Float { bits: u64, format: FloatFormat },
}

impl IrConst {
    pub fn bool_(value: bool) -> IrConst {
        IrConst::Int {
            value: value as u64,
            width: 1,
        }
    }

    pub fn i32_(value: i32) -> IrConst {
        IrConst::Int {
            value: value as u32 as u64,
            width: 32,
        }
    }

    pub fn i64_(value: i64) -> IrConst {
        IrConst::Int {
            value: value as u64,
            width: 64,
        }
    }

    pub fn f32_(value: f32) -> IrConst {
        IrConst::Float {
            bits: value.to_bits() as u64,
            format: FloatFormat::Single,
        }
    }

    pub fn f64_(value: f64) -> IrConst {
        IrConst::Float {
            bits: value.to_bits(),
            format: FloatFormat::Double,
        }
    }

    /// The IR type of this constant.
    pub fn ty(&self) -> IrType {
        match self {
            IrConst::Int { width, .. } => IrType::Int { width: *width },
            IrConst::Float { format, .. } => IrType::Float(*format),
        }
    }
}

/// An instruction operand: a prior SSA value or a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Value(ValueId),
    Const(IrConst),
}

/// Binary integer arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
}

/// Bitwise binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitOp {
    And,
    Or,
    Xor,
}

/// Bit shift operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShiftOp {
    Shl,
    LShr,
    AShr,
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Slt,
    Sle,
    Ult,
    Ule,
}

/// Ordered floating-point comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FCmpOp {
    Oeq,
    Olt,
    Ole,
}

/// Floating-point arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FArithOp {
    FAdd,
    FSub,
    FMul,
    FDiv,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
}

/// Width and format conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CastOp {
    ZExt,
    SExt,
    Trunc,
    FCast,
}

/// Right-hand side of an instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rhs {
    /// Bind a constant.
    Const(IrConst),
    /// Binary integer arithmetic.
    Arith { op: ArithOp, lhs: Operand, rhs: Operand },
    /// Bitwise operation.
    Bit { op: BitOp, lhs: Operand, rhs: Operand },
    /// Shift.
    Shift { op: ShiftOp, lhs: Operand, rhs: Operand },
    /// Integer comparison, produces an `i1`.
    Cmp { op: CmpOp, lhs: Operand, rhs: Operand },
    /// Float comparison, produces an `i1`.
    FCmp { op: FCmpOp, lhs: Operand, rhs: Operand },
    /// Float arithmetic.
    FArith { op: FArithOp, lhs: Operand, rhs: Operand },
    /// Unary operator.
    Un { op: UnOp, operand: Operand },
    /// Width/format conversion to `target`.
    Cast {
        op: CastOp,
        operand: Operand,
        target: IrType,
    },
    /// Ternary selection on an `i1` condition.
    Select {
        cond: Operand,
        then_value: Operand,
        else_value: Operand,
    },
    /// Call to a named function (known or external).
    Call { callee: String, args: Vec<Operand> },
    /// Stack allocation of a pointer (memory-model territory).
    Alloc,
    /// Read through a pointer (memory-model territory).
    Load { ptr: Operand },
    /// Write through a pointer (memory-model territory).
    Store { ptr: Operand, value: Operand },
    /// No defined value.
    Undef,
}

/// One three-address instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instr {
    /// Defined value, if the instruction produces one.
    pub dest: Option<ValueId>,
    pub rhs: Rhs,
    /// Source location when debug info is available.
    pub loc: Option<LocationInfo>,
}

impl Instr {
    pub fn new(dest: Option<ValueId>, rhs: Rhs) -> Instr {
        Instr {
            dest,
            rhs,
            loc: None,
        }
    }

    pub fn with_loc(mut self, loc: LocationInfo) -> Instr {
        self.loc = Some(loc);
        self
    }
}

/// An SSA join instruction: selects a value based on the incoming edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phi {
    pub dest: ValueId,
    /// `(predecessor block, incoming value)` pairs.
    pub incoming: Vec<(BlockId, Operand)>,
    pub loc: Option<LocationInfo>,
}

/// Block terminator. The CFG edges of a function are exactly the targets
/// listed here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    /// Unconditional jump.
    Jump { target: BlockId },
    /// Two-way conditional branch on an `i1` operand. Successor position 0
    /// is the true edge, position 1 the false edge.
    CondBr {
        cond: Operand,
        then_target: BlockId,
        else_target: BlockId,
    },
    /// Function return.
    Return { value: Option<Operand> },
    /// Execution cut-off: no successor, not an error. Used for unwinding
    /// bounds.
    Abort,
}

impl Terminator {
    /// Successor blocks in branch-position order.
    pub fn targets(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump { target } => vec![*target],
            Terminator::CondBr {
                then_target,
                else_target,
                ..
            } => vec![*then_target, *else_target],
            Terminator::Return { .. } | Terminator::Abort => Vec::new(),
        }
    }

    /// Rewrites every successor equal to `from` into `to`.
    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        match self {
            Terminator::Jump { target } => {
                if *target == from {
                    *target = to;
                }
            }
            Terminator::CondBr {
                then_target,
                else_target,
                ..
            } => {
                if *then_target == from {
                    *then_target = to;
                }
                if *else_target == from {
                    *else_target = to;
                }
            }
            Terminator::Return { .. } | Terminator::Abort => {}
        }
    }
}

/// Debug location attached to instructions when the front-end has it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_types() {
        assert_eq!(IrConst::bool_(true).ty(), IrType::I1);
        assert_eq!(IrConst::i32_(-1).ty(), IrType::I32);
        assert_eq!(
            IrConst::f64_(1.0).ty(),
            IrType::Float(FloatFormat::Double)
        );
    }

    #[test]
    fn i32_constant_is_masked_to_32_bits() {
        match IrConst::i32_(-1) {
            IrConst::Int { value, width } => {
                assert_eq!(value, 0xFFFF_FFFF);
                assert_eq!(width, 32);
            }
            _ => panic!("expected integer constant"),
        }
    }

    #[test]
    fn terminator_targets_in_branch_order() {
        let t = Terminator::CondBr {
            cond: Operand::Const(IrConst::bool_(true)),
            then_target: BlockId(1),
            else_target: BlockId(2),
        };
        assert_eq!(t.targets(), vec![BlockId(1), BlockId(2)]);
        assert_eq!(Terminator::Abort.targets(), Vec::<BlockId>::new());
    }

    #[test]
    fn retarget_rewrites_all_matching_successors() {
        let mut t = Terminator::CondBr {
            cond: Operand::Const(IrConst::bool_(true)),
            then_target: BlockId(1),
            else_target: BlockId(1),
        };
        t.retarget(BlockId(1), BlockId(9));
        assert_eq!(t.targets(), vec![BlockId(9), BlockId(9)]);
    }

    #[test]
    fn serde_roundtrip_instr() {
        let instr = Instr::new(
            Some(ValueId(0)),
            Rhs::Arith {
                op: ArithOp::Add,
                lhs: Operand::Value(ValueId(1)),
                rhs: Operand::Const(IrConst::i32_(2)),
            },
        )
        .with_loc(LocationInfo {
            file: "main.c".into(),
            line: 3,
            column: 7,
        });
        let json = serde_json::to_string(&instr).unwrap();
        let back: Instr = serde_json::from_str(&json).unwrap();
        assert_eq!(instr, back);
    }

    #[test]
    fn serde_roundtrip_phi_and_terminator() {
        let phi = Phi {
            dest: ValueId(4),
            incoming: vec![
                (BlockId(0), Operand::Const(IrConst::i32_(0))),
                (BlockId(1), Operand::Value(ValueId(3))),
            ],
            loc: None,
        };
        let json = serde_json::to_string(&phi).unwrap();
        let back: Phi = serde_json::from_str(&json).unwrap();
        assert_eq!(phi, back);

        let term = Terminator::Return {
            value: Some(Operand::Const(IrConst::i32_(0))),
        };
        let json = serde_json::to_string(&term).unwrap();
        let back: Terminator = serde_json::from_str(&json).unwrap();
        assert_eq!(term, back);
    }
}
