//! Scope resolution: decides for every name whether it is local, global or shared
//! through a cell, and assigns namespace slots.
//!
//! This runs in two passes over the parsed tree. The first collects, per function, the
//! names it binds, declares and references, which is enough to work out which variables
//! nested functions capture. The second rewrites every [`Identifier`] in place with its
//! slot, and records each function's layout in [`ScopeInfo`].

use ahash::{AHashMap, AHashSet};
use indexmap::IndexSet;

use crate::{
    builtins::Builtins,
    exception_public::CodeRange,
    expressions::{Expr, ExprLoc, FunctionDef, Identifier, NameScope, Node, ScopeInfo, Target},
    fstring::FStringPart,
    intern::{InternerBuilder, StringId},
    namespace::NamespaceId,
    parse::ParseError,
};

/// Layout of the module namespace, which is also the global namespace.
#[derive(Debug)]
pub(crate) struct ModuleScope {
    /// Names of the global slots: external functions, then inputs, then every other
    /// global in order of first use.
    pub global_names: Vec<StringId>,
}

/// Resolves every name in `nodes` in place.
///
/// External functions occupy the first global slots and inputs the ones after them, so
/// the caller can fill them without looking names up.
pub(crate) fn prepare(
    nodes: &mut [Node],
    interner: &InternerBuilder,
    input_names: &[StringId],
    external_names: &[StringId],
) -> Result<ModuleScope, ParseError> {
    let mut global_names: IndexSet<StringId> = IndexSet::new();
    for name in external_names {
        if !global_names.insert(*name) {
            return Err(ParseError::syntax(
                format!("duplicate external function '{}'", interner.get_str(*name)),
                CodeRange::default(),
            ));
        }
    }
    for name in input_names {
        if external_names.contains(name) {
            return Err(ParseError::syntax(
                format!(
                    "input '{}' has the same name as an external function",
                    interner.get_str(*name)
                ),
                CodeRange::default(),
            ));
        }
        if !global_names.insert(*name) {
            return Err(ParseError::syntax(
                format!("duplicate input name '{}'", interner.get_str(*name)),
                CodeRange::default(),
            ));
        }
    }

    let mut analysis = Analysis::default();
    analysis.scopes.push(ScopeData::default());
    analysis.body(0, nodes);

    let mut module_assigned = analysis.scopes[0].assigned.iter().copied().collect::<AHashSet<_>>();
    module_assigned.extend(analysis.declared_global.iter().copied());
    module_assigned.extend(global_names.iter().copied());

    let scopes = analysis.resolve(interner)?;
    let mut resolver = Resolver {
        scopes,
        interner,
        module_assigned,
        global_names,
    };
    resolver.body(0, nodes);
    log::debug!(
        "prepared module: {} globals, {} function scopes",
        resolver.global_names.len(),
        resolver.scopes.len() - 1
    );
    Ok(ModuleScope {
        global_names: resolver.global_names.into_iter().collect(),
    })
}

/// What the first pass learns about one scope; index 0 is the module.
#[derive(Debug, Default)]
struct ScopeData {
    parent: usize,
    params: Vec<StringId>,
    /// Names bound anywhere in the scope, in order of first binding.
    assigned: IndexSet<StringId>,
    globals: AHashMap<StringId, CodeRange>,
    nonlocals: IndexSet<StringId>,
    nonlocal_positions: AHashMap<StringId, CodeRange>,
    referenced: IndexSet<StringId>,
    /// Filled by [`Analysis::resolve`]: params first, then other locals.
    locals: IndexSet<StringId>,
    /// Locals captured by nested functions.
    cells: IndexSet<StringId>,
    /// Variables of enclosing functions used here or in nested functions.
    free: IndexSet<StringId>,
}

impl ScopeData {
    fn is_local(&self, name: StringId) -> bool {
        self.locals.contains(&name)
    }
}

#[derive(Debug, Default)]
struct Analysis {
    scopes: Vec<ScopeData>,
    /// Names any function declares `global`; assigning them rebinds a module name.
    declared_global: AHashSet<StringId>,
}

impl Analysis {
    fn body(&mut self, scope: usize, nodes: &mut [Node]) {
        for node in nodes {
            self.node(scope, node);
        }
    }

    fn node(&mut self, scope: usize, node: &mut Node) {
        match node {
            Node::Expr(expr) => self.expr(scope, expr),
            Node::Return(value, _) | Node::Raise(value, _) => {
                if let Some(value) = value {
                    self.expr(scope, value);
                }
            }
            Node::Assert { test, msg } => {
                self.expr(scope, test);
                if let Some(msg) = msg {
                    self.expr(scope, msg);
                }
            }
            Node::Assign { targets, value } => {
                self.expr(scope, value);
                for target in targets {
                    self.target(scope, target);
                }
            }
            Node::OpAssign { target, value, .. } => {
                if let Target::Name(ident) = target {
                    self.scopes[scope].referenced.insert(ident.name_id);
                }
                self.target(scope, target);
                self.expr(scope, value);
            }
            Node::If { test, body, or_else } | Node::While { test, body, or_else } => {
                self.expr(scope, test);
                self.body(scope, body);
                self.body(scope, or_else);
            }
            Node::For {
                target,
                iter,
                body,
                or_else,
            } => {
                self.expr(scope, iter);
                self.target(scope, target);
                self.body(scope, body);
                self.body(scope, or_else);
            }
            Node::Break(_) | Node::Continue(_) | Node::Pass => {}
            Node::FunctionDef(def) => {
                self.scopes[scope].assigned.insert(def.name.name_id);
                self.function(scope, def);
            }
            Node::Global(names, position) => {
                if scope != 0 {
                    for name in names {
                        self.scopes[scope].globals.insert(*name, *position);
                        self.declared_global.insert(*name);
                    }
                }
            }
            Node::Nonlocal(names, position) => {
                for name in names {
                    self.scopes[scope].nonlocals.insert(*name);
                    self.scopes[scope].nonlocal_positions.insert(*name, *position);
                }
            }
            Node::Try(try_) => {
                self.body(scope, &mut try_.body);
                for handler in &mut try_.handlers {
                    if let Some(exc_type) = &mut handler.exc_type {
                        self.expr(scope, exc_type);
                    }
                    if let Some(name) = &handler.name {
                        self.scopes[scope].assigned.insert(name.name_id);
                    }
                    self.body(scope, &mut handler.body);
                }
                self.body(scope, &mut try_.or_else);
                self.body(scope, &mut try_.finally);
            }
        }
    }

    /// Defaults belong to the enclosing scope; the body gets a new one.
    fn function(&mut self, scope: usize, def: &mut FunctionDef) {
        for param in &mut def.params {
            if let Some(default) = &mut param.default {
                self.expr(scope, default);
            }
        }
        let index = self.scopes.len();
        self.scopes.push(ScopeData {
            parent: scope,
            params: def.params.iter().map(|p| p.name).collect(),
            ..ScopeData::default()
        });
        def.scope.scope_index = index;
        self.body(index, &mut def.body);
    }

    fn target(&mut self, scope: usize, target: &mut Target) {
        match target {
            Target::Name(ident) => {
                self.scopes[scope].assigned.insert(ident.name_id);
            }
            Target::Tuple(items, _) => {
                for item in items {
                    self.target(scope, item);
                }
            }
            Target::Subscript { object, index, .. } => {
                self.expr(scope, object);
                self.expr(scope, index);
            }
            Target::Attr { object, .. } => self.expr(scope, object),
        }
    }

    fn expr(&mut self, scope: usize, expr: &mut ExprLoc) {
        match &mut expr.expr {
            Expr::Literal(_) | Expr::Builtin(_) => {}
            Expr::Name(ident) => {
                self.scopes[scope].referenced.insert(ident.name_id);
            }
            Expr::Call { callable, args } => {
                self.expr(scope, callable);
                for arg in &mut args.args {
                    self.expr(scope, arg);
                }
                for (_, arg) in &mut args.kwargs {
                    self.expr(scope, arg);
                }
            }
            Expr::AttrCall { object, args, .. } => {
                self.expr(scope, object);
                for arg in &mut args.args {
                    self.expr(scope, arg);
                }
                for (_, arg) in &mut args.kwargs {
                    self.expr(scope, arg);
                }
            }
            Expr::Attr { object, .. } | Expr::Not(object) | Expr::Await(object) => self.expr(scope, object),
            Expr::Unary { operand, .. } => self.expr(scope, operand),
            Expr::Op { left, right, .. } | Expr::And(left, right) | Expr::Or(left, right) => {
                self.expr(scope, left);
                self.expr(scope, right);
            }
            Expr::CmpOp { left, ops } => {
                self.expr(scope, left);
                for (_, right) in ops {
                    self.expr(scope, right);
                }
            }
            Expr::List(items) | Expr::Tuple(items) => {
                for item in items {
                    self.expr(scope, item);
                }
            }
            Expr::Dict(pairs) => {
                for (key, value) in pairs {
                    self.expr(scope, key);
                    self.expr(scope, value);
                }
            }
            Expr::Subscript { object, index } => {
                self.expr(scope, object);
                self.expr(scope, index);
            }
            Expr::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.expr(scope, part);
                }
            }
            Expr::FString(parts) => {
                for part in parts {
                    if let FStringPart::Interpolation { expr, .. } = part {
                        self.expr(scope, expr);
                    }
                }
            }
            Expr::IfElse { test, body, orelse } => {
                self.expr(scope, test);
                self.expr(scope, body);
                self.expr(scope, orelse);
            }
            Expr::Lambda(def) => self.function(scope, def),
            Expr::ListComp { elt, generators } => {
                for generator in generators.iter_mut() {
                    self.expr(scope, &mut generator.iter);
                    self.target(scope, &mut generator.target);
                    for cond in &mut generator.ifs {
                        self.expr(scope, cond);
                    }
                }
                self.expr(scope, elt);
            }
            Expr::DictComp { key, value, generators } => {
                for generator in generators.iter_mut() {
                    self.expr(scope, &mut generator.iter);
                    self.target(scope, &mut generator.target);
                    for cond in &mut generator.ifs {
                        self.expr(scope, cond);
                    }
                }
                self.expr(scope, key);
                self.expr(scope, value);
            }
        }
    }

    /// Computes locals, cells and free variables for every function scope.
    ///
    /// Scopes are numbered in pre-order, so a parent's locals are known before any of
    /// its children look names up in it.
    fn resolve(mut self, interner: &InternerBuilder) -> Result<Vec<ScopeData>, ParseError> {
        for index in 1..self.scopes.len() {
            let scope = &mut self.scopes[index];
            for param in &scope.params {
                if let Some(position) = scope.globals.get(param) {
                    return Err(ParseError::syntax(
                        format!("name '{}' is parameter and global", interner.get_str(*param)),
                        *position,
                    ));
                }
                if let Some(position) = scope.nonlocal_positions.get(param) {
                    return Err(ParseError::syntax(
                        format!("name '{}' is parameter and nonlocal", interner.get_str(*param)),
                        *position,
                    ));
                }
            }
            for name in &scope.nonlocals {
                if let Some(position) = scope.globals.get(name) {
                    return Err(ParseError::syntax(
                        format!("name '{}' is nonlocal and global", interner.get_str(*name)),
                        *position,
                    ));
                }
            }
            let locals: IndexSet<StringId> = scope
                .params
                .iter()
                .chain(scope.assigned.iter())
                .copied()
                .filter(|name| !scope.globals.contains_key(name) && !scope.nonlocals.contains(name))
                .collect();
            scope.locals = locals;
        }

        for index in 1..self.scopes.len() {
            let scope = &self.scopes[index];
            let candidates: Vec<StringId> = scope
                .nonlocals
                .iter()
                .chain(scope.referenced.iter())
                .copied()
                .filter(|name| !scope.is_local(*name) && !scope.globals.contains_key(name))
                .collect();
            for name in candidates {
                self.capture(index, name, interner)?;
            }
        }
        Ok(self.scopes)
    }

    /// Looks `name` up in the functions enclosing `index`, marking it as a cell where it
    /// is defined and as free in every function in between.
    fn capture(&mut self, index: usize, name: StringId, interner: &InternerBuilder) -> Result<(), ParseError> {
        let is_nonlocal = self.scopes[index].nonlocals.contains(&name);
        let mut path = vec![index];
        let mut current = self.scopes[index].parent;
        while current != 0 {
            let scope = &self.scopes[current];
            if scope.globals.contains_key(&name) {
                break;
            }
            if scope.is_local(name) {
                self.scopes[current].cells.insert(name);
                for between in path {
                    self.scopes[between].free.insert(name);
                }
                return Ok(());
            }
            path.push(current);
            current = scope.parent;
        }
        if is_nonlocal {
            let position = self.scopes[index].nonlocal_positions[&name];
            return Err(ParseError::syntax(
                format!("no binding for nonlocal '{}' found", interner.get_str(name)),
                position,
            ));
        }
        Ok(())
    }
}

/// Second pass: writes slots into identifiers and layouts into function definitions.
struct Resolver<'i> {
    scopes: Vec<ScopeData>,
    interner: &'i InternerBuilder,
    module_assigned: AHashSet<StringId>,
    global_names: IndexSet<StringId>,
}

impl Resolver<'_> {
    fn body(&mut self, scope: usize, nodes: &mut [Node]) {
        for node in nodes {
            self.node(scope, node);
        }
    }

    /// Where `name` lives when used in `scope`.
    fn lookup(&mut self, scope: usize, name: StringId) -> (NamespaceId, NameScope) {
        if scope != 0 {
            let data = &self.scopes[scope];
            if let Some(idx) = data.cells.get_index_of(&name) {
                return (NamespaceId::new(idx), NameScope::Cell);
            }
            if let Some(idx) = data.free.get_index_of(&name) {
                return (NamespaceId::new(data.cells.len() + idx), NameScope::Cell);
            }
            if data.is_local(name) {
                let slot = data
                    .locals
                    .iter()
                    .filter(|local| !data.cells.contains(*local) || data.params.contains(local))
                    .position(|local| *local == name)
                    .unwrap_or_default();
                return (NamespaceId::new(slot), NameScope::Local);
            }
        }
        let (slot, _) = self.global_names.insert_full(name);
        (NamespaceId::new(slot), NameScope::Global)
    }

    fn identifier(&mut self, scope: usize, ident: &mut Identifier) {
        let (id, name_scope) = self.lookup(scope, ident.name_id);
        ident.resolve(id, name_scope);
    }

    fn node(&mut self, scope: usize, node: &mut Node) {
        match node {
            Node::Expr(expr) => self.expr(scope, expr),
            Node::Return(value, _) | Node::Raise(value, _) => {
                if let Some(value) = value {
                    self.expr(scope, value);
                }
            }
            Node::Assert { test, msg } => {
                self.expr(scope, test);
                if let Some(msg) = msg {
                    self.expr(scope, msg);
                }
            }
            Node::Assign { targets, value } => {
                self.expr(scope, value);
                for target in targets {
                    self.target(scope, target);
                }
            }
            Node::OpAssign { target, value, .. } => {
                self.target(scope, target);
                self.expr(scope, value);
            }
            Node::If { test, body, or_else } | Node::While { test, body, or_else } => {
                self.expr(scope, test);
                self.body(scope, body);
                self.body(scope, or_else);
            }
            Node::For {
                target,
                iter,
                body,
                or_else,
            } => {
                self.expr(scope, iter);
                self.target(scope, target);
                self.body(scope, body);
                self.body(scope, or_else);
            }
            Node::Break(_) | Node::Continue(_) | Node::Pass | Node::Global(..) | Node::Nonlocal(..) => {}
            Node::FunctionDef(def) => {
                self.identifier(scope, &mut def.name);
                self.function(scope, def);
            }
            Node::Try(try_) => {
                self.body(scope, &mut try_.body);
                for handler in &mut try_.handlers {
                    if let Some(exc_type) = &mut handler.exc_type {
                        self.expr(scope, exc_type);
                    }
                    if let Some(name) = &mut handler.name {
                        self.identifier(scope, name);
                    }
                    self.body(scope, &mut handler.body);
                }
                self.body(scope, &mut try_.or_else);
                self.body(scope, &mut try_.finally);
            }
        }
    }

    fn function(&mut self, scope: usize, def: &mut FunctionDef) {
        for param in &mut def.params {
            if let Some(default) = &mut param.default {
                self.expr(scope, default);
            }
        }
        let index = def.scope.scope_index;
        def.scope = self.scope_info(index);
        self.body(index, &mut def.body);
    }

    fn scope_info(&self, index: usize) -> ScopeInfo {
        let data = &self.scopes[index];
        let local_names: Vec<StringId> = data
            .locals
            .iter()
            .copied()
            .filter(|name| !data.cells.contains(name) || data.params.contains(name))
            .collect();
        let cell_param_slots = data
            .cells
            .iter()
            .map(|name| data.params.iter().position(|param| param == name))
            .collect();
        let parent = &self.scopes[data.parent];
        let free_var_sources = data
            .free
            .iter()
            .map(|name| {
                parent
                    .cells
                    .get_index_of(name)
                    .or_else(|| parent.free.get_index_of(name).map(|idx| parent.cells.len() + idx))
                    .unwrap_or_default()
            })
            .collect();
        ScopeInfo {
            scope_index: index,
            local_names,
            cell_names: data.cells.iter().chain(data.free.iter()).copied().collect(),
            cell_param_slots,
            free_var_sources,
        }
    }

    fn target(&mut self, scope: usize, target: &mut Target) {
        match target {
            Target::Name(ident) => self.identifier(scope, ident),
            Target::Tuple(items, _) => {
                for item in items {
                    self.target(scope, item);
                }
            }
            Target::Subscript { object, index, .. } => {
                self.expr(scope, object);
                self.expr(scope, index);
            }
            Target::Attr { object, .. } => self.expr(scope, object),
        }
    }

    fn expr(&mut self, scope: usize, expr: &mut ExprLoc) {
        match &mut expr.expr {
            Expr::Literal(_) | Expr::Builtin(_) => {}
            Expr::Name(ident) => {
                self.identifier(scope, ident);
                if ident.scope == NameScope::Global
                    && !self.module_assigned.contains(&ident.name_id)
                    && let Some(builtin) = Builtins::from_name(self.interner.get_str(ident.name_id))
                {
                    expr.expr = Expr::Builtin(builtin);
                }
            }
            Expr::Call { callable, args } => {
                self.expr(scope, callable);
                for arg in &mut args.args {
                    self.expr(scope, arg);
                }
                for (_, arg) in &mut args.kwargs {
                    self.expr(scope, arg);
                }
            }
            Expr::AttrCall { object, args, .. } => {
                self.expr(scope, object);
                for arg in &mut args.args {
                    self.expr(scope, arg);
                }
                for (_, arg) in &mut args.kwargs {
                    self.expr(scope, arg);
                }
            }
            Expr::Attr { object, .. } | Expr::Not(object) | Expr::Await(object) => self.expr(scope, object),
            Expr::Unary { operand, .. } => self.expr(scope, operand),
            Expr::Op { left, right, .. } | Expr::And(left, right) | Expr::Or(left, right) => {
                self.expr(scope, left);
                self.expr(scope, right);
            }
            Expr::CmpOp { left, ops } => {
                self.expr(scope, left);
                for (_, right) in ops {
                    self.expr(scope, right);
                }
            }
            Expr::List(items) | Expr::Tuple(items) => {
                for item in items {
                    self.expr(scope, item);
                }
            }
            Expr::Dict(pairs) => {
                for (key, value) in pairs {
                    self.expr(scope, key);
                    self.expr(scope, value);
                }
            }
            Expr::Subscript { object, index } => {
                self.expr(scope, object);
                self.expr(scope, index);
            }
            Expr::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.expr(scope, part);
                }
            }
            Expr::FString(parts) => {
                for part in parts {
                    if let FStringPart::Interpolation { expr, .. } = part {
                        self.expr(scope, expr);
                    }
                }
            }
            Expr::IfElse { test, body, orelse } => {
                self.expr(scope, test);
                self.expr(scope, body);
                self.expr(scope, orelse);
            }
            Expr::Lambda(def) => self.function(scope, def),
            Expr::ListComp { elt, generators } => {
                for generator in generators.iter_mut() {
                    self.expr(scope, &mut generator.iter);
                    self.target(scope, &mut generator.target);
                    for cond in &mut generator.ifs {
                        self.expr(scope, cond);
                    }
                }
                self.expr(scope, elt);
            }
            Expr::DictComp { key, value, generators } => {
                for generator in generators.iter_mut() {
                    self.expr(scope, &mut generator.iter);
                    self.target(scope, &mut generator.target);
                    for cond in &mut generator.ifs {
                        self.expr(scope, cond);
                    }
                }
                self.expr(scope, key);
                self.expr(scope, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn prepared(source: &str, inputs: &[&str]) -> Result<(Vec<Node>, ModuleScope, InternerBuilder), ParseError> {
        let mut interner = InternerBuilder::new();
        let mut nodes = parse(source, &mut interner)?;
        let inputs: Vec<StringId> = inputs.iter().map(|name| interner.intern(name)).collect();
        let scope = prepare(&mut nodes, &interner, &inputs, &[])?;
        Ok((nodes, scope, interner))
    }

    fn function_def(nodes: &[Node], idx: usize) -> &FunctionDef {
        match &nodes[idx] {
            Node::FunctionDef(def) => def,
            other => panic!("expected a function definition, got {other:?}"),
        }
    }

    fn names(interner: &InternerBuilder, ids: &[StringId]) -> Vec<String> {
        ids.iter().map(|id| interner.get_str(*id).to_owned()).collect()
    }

    #[test]
    fn inputs_take_the_first_global_slots() {
        let (_, scope, interner) = prepared("y = x + 1\nz = y", &["x"]).unwrap();
        assert_eq!(names(&interner, &scope.global_names), vec!["x", "y", "z"]);
    }

    #[test]
    fn locals_follow_params() {
        let source = "def f(a, b=1):\n    c = a\n    return c + b + g\n";
        let (nodes, scope, interner) = prepared(source, &[]).unwrap();
        let def = function_def(&nodes, 0);
        assert_eq!(names(&interner, &def.scope.local_names), vec!["a", "b", "c"]);
        assert!(def.scope.cell_names.is_empty());
        assert_eq!(names(&interner, &scope.global_names), vec!["f", "g"]);
    }

    #[test]
    fn captured_variables_become_cells() {
        let source = "def outer(n):\n    total = 0\n    def inner():\n        nonlocal total\n        total += n\n    inner()\n    return total\n";
        let (nodes, _, interner) = prepared(source, &[]).unwrap();
        let outer = function_def(&nodes, 0);
        assert_eq!(names(&interner, &outer.scope.cell_names), vec!["total", "n"]);
        assert_eq!(outer.scope.cell_param_slots, vec![None, Some(0)]);
        // `n` keeps its parameter slot, `total` has no slot of its own
        assert_eq!(names(&interner, &outer.scope.local_names), vec!["n", "inner"]);

        let inner = function_def(&outer.body, 1);
        assert_eq!(names(&interner, &inner.scope.cell_names), vec!["total", "n"]);
        assert_eq!(inner.scope.free_var_sources, vec![0, 1]);
        assert!(inner.scope.local_names.is_empty());
    }

    #[test]
    fn capture_passes_through_intermediate_functions() {
        let source = "def a():\n    x = 1\n    def b():\n        def c():\n            return x\n        return c\n    return b\n";
        let (nodes, _, interner) = prepared(source, &[]).unwrap();
        let a = function_def(&nodes, 0);
        let b = function_def(&a.body, 1);
        let Node::FunctionDef(c) = &b.body[0] else { panic!("expected c") };
        assert_eq!(names(&interner, &a.scope.cell_names), vec!["x"]);
        assert_eq!(names(&interner, &b.scope.cell_names), vec!["x"]);
        assert_eq!(b.scope.free_var_sources, vec![0]);
        assert_eq!(c.scope.free_var_sources, vec![0]);
    }

    #[test]
    fn unassigned_builtins_are_resolved_statically() {
        let (nodes, _, _) = prepared("len([1])", &[]).unwrap();
        let Node::Expr(expr) = &nodes[0] else { panic!("expected expression") };
        let Expr::Call { callable, .. } = &expr.expr else { panic!("expected call") };
        assert!(matches!(callable.expr, Expr::Builtin(_)));

        let (nodes, _, _) = prepared("len = 3\nlen", &[]).unwrap();
        let Node::Expr(expr) = &nodes[1] else { panic!("expected expression") };
        assert!(matches!(&expr.expr, Expr::Name(ident) if ident.scope == NameScope::Global));
    }

    #[test]
    fn global_declaration_rebinds_module_name() {
        let source = "def f():\n    global count\n    count = 1\nf()\n";
        let (nodes, scope, interner) = prepared(source, &[]).unwrap();
        let def = function_def(&nodes, 0);
        assert!(def.scope.local_names.is_empty());
        assert!(names(&interner, &scope.global_names).contains(&"count".to_owned()));
    }

    #[test]
    fn scope_errors() {
        let err = prepared("def f():\n    nonlocal x\n    x = 1\n", &[]).unwrap_err();
        assert_eq!(err.message(), "no binding for nonlocal 'x' found");

        let err = prepared("def f(a):\n    global a\n", &[]).unwrap_err();
        assert_eq!(err.message(), "name 'a' is parameter and global");

        let err = prepared("x", &["x", "x"]).unwrap_err();
        assert_eq!(err.message(), "duplicate input name 'x'");
    }
}
