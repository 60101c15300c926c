//! The process-local context owning all interning tables.
//!
//! A [`Context`] holds three arenas: interned types, interned expression
//! nodes, and registered variables. Everything else in the system works
//! with `Copy` integer handles ([`TypeId`](crate::types::TypeId),
//! [`ExprId`], [`VarId`]) into these tables, so structural identity is
//! handle equality and hashing is free.
//!
//! A context is single-threaded: all mutation goes through `&mut self`,
//! and concurrent verification of independent programs uses independent
//! contexts. Handles are meaningless outside the context that produced
//! them.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::display::DisplayExpr;
use crate::error::CoreError;
use crate::expr::{ExprId, ExprKind, ExprNode};
use crate::types::{FloatFormat, Type, TypeId};

/// Stable identifier of a registered variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarId(pub u32);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A named, typed symbol with a canonical `VarRef` leaf.
///
/// The type is held as a [`TypeId`] into the owning context; variables do
/// not own type structure.
#[derive(Debug, Clone)]
pub struct Variable {
    name: String,
    ty: TypeId,
    ref_expr: ExprId,
}

impl Variable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> TypeId {
        self.ty
    }

    /// The canonical `VarRef` expression of this variable.
    pub fn ref_expr(&self) -> ExprId {
        self.ref_expr
    }
}

/// Owner of the type interner, expression arena, and variable registry.
pub struct Context {
    types: Vec<Type>,
    type_ids: HashMap<Type, TypeId>,
    nodes: Vec<ExprNode>,
    node_ids: HashMap<ExprNode, ExprId>,
    vars: Vec<Variable>,
    var_names: HashMap<String, VarId>,
}

impl Context {
    /// Creates a context with the built-in non-parametric types
    /// pre-registered (`TypeId::BOOL`, `TypeId::INT`, and the four float
    /// formats).
    pub fn new() -> Self {
        let builtins = [
            Type::Bool,
            Type::Int,
            Type::Float(FloatFormat::Half),
            Type::Float(FloatFormat::Single),
            Type::Float(FloatFormat::Double),
            Type::Float(FloatFormat::Quad),
        ];

        let mut ctx = Context {
            types: Vec::new(),
            type_ids: HashMap::new(),
            nodes: Vec::new(),
            node_ids: HashMap::new(),
            vars: Vec::new(),
            var_names: HashMap::new(),
        };
        for ty in builtins {
            ctx.intern_type(ty);
        }
        ctx
    }

    // -----------------------------------------------------------------------
    // Types
    // -----------------------------------------------------------------------

    /// Interns a type, returning the canonical [`TypeId`].
    pub fn intern_type(&mut self, ty: Type) -> TypeId {
        if let Some(&id) = self.type_ids.get(&ty) {
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty);
        self.type_ids.insert(ty, id);
        id
    }

    pub fn bool_type(&self) -> TypeId {
        TypeId::BOOL
    }

    pub fn int_type(&self) -> TypeId {
        TypeId::INT
    }

    pub fn float_type(&self, format: FloatFormat) -> TypeId {
        match format {
            FloatFormat::Half => TypeId::HALF,
            FloatFormat::Single => TypeId::SINGLE,
            FloatFormat::Double => TypeId::DOUBLE,
            FloatFormat::Quad => TypeId::QUAD,
        }
    }

    pub fn bv_type(&mut self, width: u32) -> TypeId {
        self.intern_type(Type::Bv { width })
    }

    pub fn array_type(&mut self, index: TypeId, element: TypeId) -> TypeId {
        self.intern_type(Type::Array { index, element })
    }

    /// Looks up an interned type.
    pub fn ty(&self, id: TypeId) -> &Type {
        &self.types[id.0 as usize]
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    /// Interns an expression node on its `(kind, type, operands)` triple.
    ///
    /// Callers are expected to have type-checked the node; the
    /// [`ExprBuilder`](crate::builder::ExprBuilder) is the public entry
    /// point.
    pub(crate) fn intern_node(
        &mut self,
        kind: ExprKind,
        ty: TypeId,
        operands: SmallVec<[ExprId; 2]>,
    ) -> ExprId {
        let node = ExprNode { kind, ty, operands };
        if let Some(&id) = self.node_ids.get(&node) {
            return id;
        }
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(node.clone());
        self.node_ids.insert(node, id);
        id
    }

    /// Looks up an expression node by handle.
    pub fn expr(&self, id: ExprId) -> &ExprNode {
        &self.nodes[id.0 as usize]
    }

    /// The result type of an expression.
    pub fn expr_ty(&self, id: ExprId) -> TypeId {
        self.expr(id).ty()
    }

    /// Number of interned expression nodes.
    pub fn expr_count(&self) -> usize {
        self.nodes.len()
    }

    /// Renders an expression as an s-expression for diagnostics.
    pub fn display_expr(&self, id: ExprId) -> DisplayExpr<'_> {
        DisplayExpr::new(self, id)
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    /// Registers a variable, creating its canonical `VarRef` leaf.
    ///
    /// Returns [`CoreError::DuplicateVariable`] if the name is taken.
    pub fn declare_var(&mut self, name: &str, ty: TypeId) -> Result<VarId, CoreError> {
        if self.var_names.contains_key(name) {
            return Err(CoreError::DuplicateVariable {
                name: name.to_string(),
            });
        }
        let id = VarId(self.vars.len() as u32);
        let ref_expr = self.intern_node(ExprKind::VarRef(id), ty, SmallVec::new());
        self.vars.push(Variable {
            name: name.to_string(),
            ty,
            ref_expr,
        });
        self.var_names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Looks up a variable by handle.
    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id.0 as usize]
    }

    /// The canonical `VarRef` expression of a variable.
    pub fn var_ref(&self, id: VarId) -> ExprId {
        self.vars[id.0 as usize].ref_expr
    }

    /// Looks up a variable by name.
    pub fn var_by_name(&self, name: &str) -> Option<VarId> {
        self.var_names.get(name).copied()
    }

    /// Iterates all registered variables in declaration order.
    pub fn variables(&self) -> impl Iterator<Item = (VarId, &Variable)> {
        self.vars
            .iter()
            .enumerate()
            .map(|(i, v)| (VarId(i as u32), v))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_type_ids() {
        let ctx = Context::new();
        assert!(matches!(ctx.ty(TypeId::BOOL), Type::Bool));
        assert!(matches!(ctx.ty(TypeId::INT), Type::Int));
        assert!(matches!(
            ctx.ty(TypeId::DOUBLE),
            Type::Float(FloatFormat::Double)
        ));
    }

    #[test]
    fn bv_types_intern_to_one_id() {
        let mut ctx = Context::new();
        let a = ctx.bv_type(32);
        let b = ctx.bv_type(32);
        let c = ctx.bv_type(64);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn array_types_intern_structurally() {
        let mut ctx = Context::new();
        let idx = ctx.bv_type(32);
        let a = ctx.array_type(idx, TypeId::INT);
        let b = ctx.array_type(idx, TypeId::INT);
        let c = ctx.array_type(idx, TypeId::BOOL);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn declare_var_creates_canonical_ref() {
        let mut ctx = Context::new();
        let x = ctx.declare_var("x", TypeId::BOOL).unwrap();
        let r1 = ctx.var_ref(x);
        let r2 = ctx.var_ref(x);
        assert_eq!(r1, r2);
        assert_eq!(ctx.var(x).name(), "x");
        assert_eq!(ctx.var(x).ty(), TypeId::BOOL);
    }

    #[test]
    fn duplicate_variable_name_is_error() {
        let mut ctx = Context::new();
        ctx.declare_var("x", TypeId::BOOL).unwrap();
        let result = ctx.declare_var("x", TypeId::INT);
        assert!(matches!(
            result,
            Err(CoreError::DuplicateVariable { name }) if name == "x"
        ));
    }

    #[test]
    fn var_by_name_lookup() {
        let mut ctx = Context::new();
        let x = ctx.declare_var("f/x", TypeId::INT).unwrap();
        assert_eq!(ctx.var_by_name("f/x"), Some(x));
        assert_eq!(ctx.var_by_name("f/y"), None);
    }

    #[test]
    fn variables_iterate_in_declaration_order() {
        let mut ctx = Context::new();
        ctx.declare_var("a", TypeId::BOOL).unwrap();
        ctx.declare_var("b", TypeId::INT).unwrap();
        let names: Vec<&str> = ctx.variables().map(|(_, v)| v.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
