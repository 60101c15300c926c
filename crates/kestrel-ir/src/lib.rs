//! Reducible intermediate representation consumed by the kestrel checker.
//!
//! A [`Function`] is a control-flow graph of basic blocks; each block holds
//! join (phi) instructions, three-address instructions, and one explicit
//! terminator. The CFG edges are derived from the terminators and kept
//! consistent through the mutation API.
//!
//! This crate is the boundary with the front-end that produced the program:
//! everything the checker needs from the source language is expressed here,
//! nothing else is.

pub mod error;
pub mod function;
pub mod id;
pub mod instr;

pub use error::IrError;
pub use function::{BasicBlock, Function, ValueDef};
pub use id::{BlockId, ValueId};
pub use instr::{
    ArithOp, BitOp, CastOp, CmpOp, FArithOp, FCmpOp, Instr, IrConst, IrType, LocationInfo,
    Operand, Phi, Rhs, ShiftOp, Terminator, UnOp,
};
