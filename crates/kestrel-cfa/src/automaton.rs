//! Automaton data model and mutation API.
//!
//! Transitions are petgraph edges, so the incoming/outgoing adjacency of a
//! location and the set of transitions referencing it are the same data
//! and cannot disagree. Every transition stays within one automaton;
//! cross-automaton control transfer is expressed by call transitions.

use std::fmt;

use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Directed;

use kestrel_core::{Context, ExprId, TypeId, VarId};

use crate::error::CfaError;

/// Identifier of an automaton within a [`CfaSystem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CfaId(pub u32);

impl fmt::Display for CfaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cfa{}", self.0)
    }
}

/// Identifier of a location. Maps to a petgraph `NodeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocId(pub u32);

impl fmt::Display for LocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loc{}", self.0)
    }
}

impl From<NodeIndex<u32>> for LocId {
    fn from(idx: NodeIndex<u32>) -> Self {
        LocId(idx.index() as u32)
    }
}

impl From<LocId> for NodeIndex<u32> {
    fn from(id: LocId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}

/// A program location. Carries only its creation ordinal; all structure
/// lives on the transitions.
#[derive(Debug, Clone)]
pub struct Location {
    pub ordinal: u32,
}

/// One parallel assignment `variable := value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableAssignment {
    pub variable: VarId,
    pub value: ExprId,
}

/// What a transition does when taken.
#[derive(Debug, Clone)]
pub enum TransitionKind {
    /// A list of semantically parallel assignments.
    Assign(Vec<VariableAssignment>),
    /// A call into another automaton with input and output bindings.
    Call {
        callee: CfaId,
        inputs: Vec<VariableAssignment>,
        outputs: Vec<VariableAssignment>,
    },
}

/// A guarded transition between two locations of the same automaton.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Boolean-typed enabling condition.
    pub guard: ExprId,
    pub kind: TransitionKind,
}

/// A control-flow automaton.
pub struct Cfa {
    name: String,
    graph: StableGraph<Location, Transition, Directed, u32>,
    entry: LocId,
    exit: LocId,
    inputs: Vec<VarId>,
    outputs: Vec<VarId>,
    locals: Vec<VarId>,
    parent: Option<CfaId>,
    next_ordinal: u32,
}

impl Cfa {
    /// Creates an automaton with fresh entry and exit locations.
    fn new(name: String) -> Self {
        let mut cfa = Cfa {
            name,
            graph: StableGraph::new(),
            entry: LocId(0),
            exit: LocId(0),
            inputs: Vec::new(),
            outputs: Vec::new(),
            locals: Vec::new(),
            parent: None,
            next_ordinal: 0,
        };
        cfa.entry = cfa.create_location();
        cfa.exit = cfa.create_location();
        cfa
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> LocId {
        self.entry
    }

    pub fn exit(&self) -> LocId {
        self.exit
    }

    pub fn parent(&self) -> Option<CfaId> {
        self.parent
    }

    // -----------------------------------------------------------------------
    // Locations and transitions
    // -----------------------------------------------------------------------

    pub fn create_location(&mut self) -> LocId {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        LocId::from(self.graph.add_node(Location { ordinal }))
    }

    /// Adds an assignment transition between two locations.
    pub fn create_assign_transition(
        &mut self,
        source: LocId,
        target: LocId,
        guard: ExprId,
        assignments: Vec<VariableAssignment>,
    ) -> Result<(), CfaError> {
        self.check_location(source)?;
        self.check_location(target)?;
        self.graph.add_edge(
            source.into(),
            target.into(),
            Transition {
                guard,
                kind: TransitionKind::Assign(assignments),
            },
        );
        Ok(())
    }

    /// Adds a call transition between two locations.
    pub fn create_call_transition(
        &mut self,
        source: LocId,
        target: LocId,
        guard: ExprId,
        callee: CfaId,
        inputs: Vec<VariableAssignment>,
        outputs: Vec<VariableAssignment>,
    ) -> Result<(), CfaError> {
        self.check_location(source)?;
        self.check_location(target)?;
        self.graph.add_edge(
            source.into(),
            target.into(),
            Transition {
                guard,
                kind: TransitionKind::Call {
                    callee,
                    inputs,
                    outputs,
                },
            },
        );
        Ok(())
    }

    /// Outgoing transitions of a location as `(target, transition)` pairs.
    pub fn outgoing(&self, loc: LocId) -> Vec<(LocId, &Transition)> {
        self.graph
            .edges_directed(loc.into(), petgraph::Direction::Outgoing)
            .map(|e| (LocId::from(e.target()), e.weight()))
            .collect()
    }

    /// Incoming transitions of a location as `(source, transition)` pairs.
    pub fn incoming(&self, loc: LocId) -> Vec<(LocId, &Transition)> {
        self.graph
            .edges_directed(loc.into(), petgraph::Direction::Incoming)
            .map(|e| (LocId::from(e.source()), e.weight()))
            .collect()
    }

    /// All transitions as `(source, target, transition)` triples.
    pub fn transitions(&self) -> Vec<(LocId, LocId, &Transition)> {
        self.graph
            .edge_references()
            .map(|e| {
                (
                    LocId::from(e.source()),
                    LocId::from(e.target()),
                    e.weight(),
                )
            })
            .collect()
    }

    pub fn location_count(&self) -> usize {
        self.graph.node_count()
    }

    fn check_location(&self, id: LocId) -> Result<(), CfaError> {
        if self.graph.node_weight(id.into()).is_some() {
            Ok(())
        } else {
            Err(CfaError::UnknownLocation { id })
        }
    }

    // -----------------------------------------------------------------------
    // Member variables
    // -----------------------------------------------------------------------

    /// Registers a formal input. The variable lands in the context as
    /// `"<cfa-name>/<name>"`.
    pub fn add_input(
        &mut self,
        ctx: &mut Context,
        name: &str,
        ty: TypeId,
    ) -> Result<VarId, CfaError> {
        let var = self.create_member_variable(ctx, name, ty)?;
        self.inputs.push(var);
        Ok(var)
    }

    /// Registers a formal output.
    pub fn add_output(
        &mut self,
        ctx: &mut Context,
        name: &str,
        ty: TypeId,
    ) -> Result<VarId, CfaError> {
        let var = self.create_member_variable(ctx, name, ty)?;
        self.outputs.push(var);
        Ok(var)
    }

    /// Registers a local.
    pub fn add_local(
        &mut self,
        ctx: &mut Context,
        name: &str,
        ty: TypeId,
    ) -> Result<VarId, CfaError> {
        let var = self.create_member_variable(ctx, name, ty)?;
        self.locals.push(var);
        Ok(var)
    }

    fn create_member_variable(
        &mut self,
        ctx: &mut Context,
        name: &str,
        ty: TypeId,
    ) -> Result<VarId, CfaError> {
        let full = format!("{}/{}", self.name, name);
        Ok(ctx.declare_var(&full, ty)?)
    }

    /// Records an already-registered context variable as a local of this
    /// automaton. For translators that pre-register variables under the
    /// automaton's name prefix.
    pub fn adopt_local(&mut self, var: VarId) {
        if !self.locals.contains(&var) {
            self.locals.push(var);
        }
    }

    pub fn inputs(&self) -> &[VarId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[VarId] {
        &self.outputs
    }

    pub fn locals(&self) -> &[VarId] {
        &self.locals
    }
}

/// The set of automata of one program, with one level of nesting.
#[derive(Default)]
pub struct CfaSystem {
    automata: Vec<Cfa>,
}

impl CfaSystem {
    pub fn new() -> Self {
        CfaSystem {
            automata: Vec::new(),
        }
    }

    /// Creates a top-level automaton.
    pub fn create_cfa(&mut self, name: &str) -> CfaId {
        let id = CfaId(self.automata.len() as u32);
        self.automata.push(Cfa::new(name.to_string()));
        id
    }

    /// Creates an automaton nested under `parent`; its full name (and
    /// therefore its variable prefix) is `"<parent-name>/<name>"`.
    pub fn create_nested_cfa(&mut self, parent: CfaId, name: &str) -> Result<CfaId, CfaError> {
        let parent_name = self
            .get(parent)
            .ok_or(CfaError::UnknownAutomaton { id: parent })?
            .name()
            .to_string();
        let id = CfaId(self.automata.len() as u32);
        let mut cfa = Cfa::new(format!("{}/{}", parent_name, name));
        cfa.parent = Some(parent);
        self.automata.push(cfa);
        Ok(id)
    }

    pub fn get(&self, id: CfaId) -> Option<&Cfa> {
        self.automata.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: CfaId) -> Option<&mut Cfa> {
        self.automata.get_mut(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.automata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.automata.is_empty()
    }

    /// Iterates automata in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (CfaId, &Cfa)> {
        self.automata
            .iter()
            .enumerate()
            .map(|(i, c)| (CfaId(i as u32), c))
    }
}
