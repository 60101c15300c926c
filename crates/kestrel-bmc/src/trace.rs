//! Counterexample trace reconstruction.
//!
//! Given a satisfying model, the builder walks backwards from the error
//! block: at a join block the model value of the predecessor variable
//! names the incoming edge, at a single-predecessor block there is
//! nothing to decide. The reversed path is then replayed forwards,
//! emitting one event per observable step. Assignment values come from
//! the model, falling back to the eliminated-binding map (evaluated under
//! the model) and finally to the type's zero-like literal.
//!
//! Reconstruction never fails silently: a reachable join block whose
//! predecessor variable has no model entry yields
//! [`TraceError::Incomplete`] carrying the partial suffix assembled so
//! far.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use kestrel_core::{eval, Context, Literal};
use kestrel_ir::{BlockId, Function, LocationInfo, Rhs, ValueId};

use crate::encode::PredSource;
use crate::lower::Lowering;
use crate::solver::Model;

/// One observable step of a counterexample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraceEvent {
    /// A variable took a concrete value.
    Assign {
        variable: String,
        value: Literal,
        loc: Option<LocationInfo>,
    },
    /// Control entered a function.
    FunctionEntry {
        name: String,
        loc: Option<LocationInfo>,
    },
    /// Control returned from a function.
    FunctionReturn {
        name: String,
        loc: Option<LocationInfo>,
    },
    /// A call happened; the return value is the model's choice for the
    /// call result, when the call produces one.
    FunctionCall {
        name: String,
        return_value: Option<Literal>,
        loc: Option<LocationInfo>,
    },
    /// The execution passed a point whose value the program never
    /// defined; the model was free to choose it.
    UndefinedBehavior { loc: Option<LocationInfo> },
}

/// A finite sequence of events from function entry to the error location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub events: Vec<TraceEvent>,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter()
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for event in &self.events {
            match event {
                TraceEvent::Assign {
                    variable, value, ..
                } => writeln!(f, "  {} := {}", variable, value)?,
                TraceEvent::FunctionEntry { name, .. } => writeln!(f, "  enter {}", name)?,
                TraceEvent::FunctionReturn { name, .. } => writeln!(f, "  return from {}", name)?,
                TraceEvent::FunctionCall {
                    name,
                    return_value: Some(value),
                    ..
                } => writeln!(f, "  call {} -> {}", name, value)?,
                TraceEvent::FunctionCall { name, .. } => writeln!(f, "  call {}", name)?,
                TraceEvent::UndefinedBehavior { .. } => {
                    writeln!(f, "  undefined value chosen here")?
                }
            }
        }
        Ok(())
    }
}

/// Trace reconstruction errors.
#[derive(Debug, Error)]
pub enum TraceError {
    /// The model does not determine the path; the partial suffix that was
    /// recovered is attached.
    #[error("incomplete counterexample: no predecessor choice for block {block}")]
    Incomplete { block: String, partial: Trace },
}

/// Rebuilds the event sequence of one satisfying model.
pub struct BmcTraceBuilder<'a> {
    function: &'a Function,
    topo: &'a [BlockId],
    block_index: &'a HashMap<BlockId, usize>,
    preds: &'a HashMap<BlockId, PredSource>,
    lowering: &'a Lowering,
    error_block: BlockId,
}

impl<'a> BmcTraceBuilder<'a> {
    pub fn new(
        function: &'a Function,
        topo: &'a [BlockId],
        block_index: &'a HashMap<BlockId, usize>,
        preds: &'a HashMap<BlockId, PredSource>,
        lowering: &'a Lowering,
        error_block: BlockId,
    ) -> Self {
        BmcTraceBuilder {
            function,
            topo,
            block_index,
            preds,
            lowering,
            error_block,
        }
    }

    pub fn build(&self, ctx: &Context, model: &Model) -> Result<Trace, TraceError> {
        let mut path = vec![self.error_block];
        let mut current = self.error_block;

        while current != self.function.entry() {
            let next = match self.preds.get(&current) {
                Some(PredSource::Single(j)) => Some(self.topo[*j]),
                Some(PredSource::Variable(var)) => model
                    .get(*var)
                    .and_then(|lit| lit.as_u64())
                    .map(|j| j as usize)
                    .filter(|&j| j < self.topo.len())
                    .map(|j| self.topo[j])
                    // The chosen block must actually precede this one.
                    .filter(|chosen| self.block_index[chosen] < self.block_index[&current]),
                None => None,
            };
            let Some(next) = next else {
                path.reverse();
                return Err(TraceError::Incomplete {
                    block: self
                        .function
                        .block(current)
                        .map(|b| b.name.clone())
                        .unwrap_or_else(|| current.to_string()),
                    partial: Trace {
                        events: self.emit(ctx, model, &path, false),
                    },
                });
            };
            current = next;
            path.push(current);
        }

        path.reverse();
        Ok(Trace {
            events: self.emit(ctx, model, &path, true),
        })
    }

    /// Replays a forward path, emitting events per block.
    fn emit(
        &self,
        ctx: &Context,
        model: &Model,
        path: &[BlockId],
        from_entry: bool,
    ) -> Vec<TraceEvent> {
        let mut events: Vec<TraceEvent> = Vec::new();
        if from_entry {
            events.push(TraceEvent::FunctionEntry {
                name: self.function.name().to_string(),
                loc: None,
            });
        }

        for &block_id in path {
            let Some(block) = self.function.block(block_id) else {
                continue;
            };
            for phi in &block.phis {
                self.push_assign(ctx, model, phi.dest, phi.loc.clone(), &mut events);
            }
            for instr in &block.instrs {
                match &instr.rhs {
                    Rhs::Undef => {
                        events.push(TraceEvent::UndefinedBehavior {
                            loc: instr.loc.clone(),
                        });
                        if let Some(dest) = instr.dest {
                            self.push_assign(ctx, model, dest, instr.loc.clone(), &mut events);
                        }
                    }
                    Rhs::Call { callee, .. } => {
                        let return_value = instr
                            .dest
                            .and_then(|dest| self.value_of(ctx, model, dest));
                        events.push(TraceEvent::FunctionCall {
                            name: callee.clone(),
                            return_value,
                            loc: instr.loc.clone(),
                        });
                    }
                    Rhs::Store { .. } => {}
                    _ => {
                        if let Some(dest) = instr.dest {
                            self.push_assign(ctx, model, dest, instr.loc.clone(), &mut events);
                        }
                    }
                }
            }
        }
        events
    }

    fn push_assign(
        &self,
        ctx: &Context,
        model: &Model,
        value: ValueId,
        loc: Option<LocationInfo>,
        events: &mut Vec<TraceEvent>,
    ) {
        let Some(literal) = self.value_of(ctx, model, value) else {
            return;
        };
        let variable = match self.lowering.value_var(value) {
            Some(var) => ctx.var(var).name().to_string(),
            None => match self.function.value(value).and_then(|d| d.name.clone()) {
                Some(name) => name,
                None => value.to_string(),
            },
        };
        events.push(TraceEvent::Assign {
            variable,
            value: literal,
            loc,
        });
    }

    /// Model value of an IR value: model entry, then eliminated binding
    /// evaluated under the model, then the type's zero-like literal.
    fn value_of(&self, ctx: &Context, model: &Model, value: ValueId) -> Option<Literal> {
        if let Some(var) = self.lowering.value_var(value) {
            if let Some(literal) = model.get(var) {
                return Some(literal);
            }
        }
        if let Some(&expr) = self.lowering.eliminated().get(&value) {
            if let Some(literal) = eval(ctx, expr, model.env()) {
                return Some(literal);
            }
        }
        self.function
            .value_ty(value)
            .map(|ty| self.lowering.zero_literal(ty))
    }
}
