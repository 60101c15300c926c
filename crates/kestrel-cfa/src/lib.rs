//! Control-flow automata: program locations with guarded, assignment- or
//! call-carrying transitions.
//!
//! A [`Cfa`] is a directed graph of [`Location`]s and [`Transition`]s with
//! distinguished entry and exit locations. Automata live in a
//! [`CfaSystem`], which also tracks one level of nesting; member variables
//! are registered in the shared [`Context`](kestrel_core::Context) under
//! the automaton's name prefix, so two automata can both have an `x`
//! without colliding.

pub mod automaton;
pub mod error;

pub use automaton::{Cfa, CfaId, CfaSystem, LocId, Location, Transition, TransitionKind, VariableAssignment};
pub use error::CfaError;
