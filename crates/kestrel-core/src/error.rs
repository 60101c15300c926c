//! Core error types.
//!
//! Uses `thiserror` for structured, matchable error variants. Expression
//! construction can fail only on ill-typed operands; the variable registry
//! can fail only on duplicate names.

use thiserror::Error;

/// Errors produced by the core term layer.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Operand types violate the well-typedness rule of an expression kind.
    #[error("type mismatch in {op}: {details}")]
    TypeMismatch { op: &'static str, details: String },

    /// A variable with the same name is already registered in the context.
    #[error("duplicate variable name: '{name}'")]
    DuplicateVariable { name: String },
}
