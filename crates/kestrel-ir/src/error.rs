//! IR error types.

use thiserror::Error;

use crate::id::{BlockId, ValueId};

/// Errors produced when constructing or mutating IR functions.
#[derive(Debug, Error)]
pub enum IrError {
    /// A block handle does not name a block of this function.
    #[error("unknown block: {id}")]
    UnknownBlock { id: BlockId },

    /// A value handle does not name a value of this function.
    #[error("unknown value: {id}")]
    UnknownValue { id: ValueId },

    /// The control-flow graph violates a structural requirement.
    #[error("malformed control flow: {reason}")]
    MalformedCfg { reason: String },
}
