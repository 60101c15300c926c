//! CFA error types.

use thiserror::Error;

use kestrel_core::CoreError;

use crate::automaton::{CfaId, LocId};

/// Errors produced when constructing automata.
#[derive(Debug, Error)]
pub enum CfaError {
    /// A location handle does not belong to this automaton.
    #[error("unknown location: {id}")]
    UnknownLocation { id: LocId },

    /// An automaton handle does not belong to this system.
    #[error("unknown automaton: {id}")]
    UnknownAutomaton { id: CfaId },

    /// An automaton was nested under a second parent.
    #[error("automaton {id} already has a parent")]
    AlreadyNested { id: CfaId },

    /// Variable registration failed (duplicate name, typically).
    #[error(transparent)]
    Core(#[from] CoreError),
}
