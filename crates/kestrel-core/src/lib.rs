//! Core term layer of the kestrel bounded model checker.
//!
//! Provides the typed, hash-consed expression DAG that every other layer
//! builds formulas from:
//!
//! - [`types`]: the type system (Bool, sized bit-vectors, mathematical
//!   integers, IEEE floats, arrays) with interned [`TypeId`] identity.
//! - [`context`]: the process-local [`Context`] owning the type interner,
//!   the expression arena, and the variable registry.
//! - [`expr`]: expression nodes, kinds, and literal values.
//! - [`builder`]: the simplifying, type-checked [`ExprBuilder`].
//! - [`eval`]: literal evaluation of expressions under a partial
//!   variable assignment (also backs constant folding).

pub mod builder;
pub mod context;
pub mod display;
pub mod error;
pub mod eval;
pub mod expr;
pub mod types;

pub use builder::ExprBuilder;
pub use context::{Context, VarId, Variable};
pub use error::CoreError;
pub use eval::eval;
pub use expr::{ExprId, ExprKind, ExprNode, Literal};
pub use types::{FloatFormat, Type, TypeId};
