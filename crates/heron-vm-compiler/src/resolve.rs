//! Scope resolution for hand-built trees
//!
//! Fills in what an upstream resolver would: the `vars` list of every
//! function, the `needs_activation` flag, and the `slot` of every identifier
//! that can live in a frame slot. Scripts never get slots; their variables
//! are properties of the global scope object.

use rustc_hash::FxHashMap;

use crate::ast::{
    CatchClause, Expr, ForInTarget, ForInit, FunctionNode, Ident, Script, Stmt, StmtKind,
    SwitchCase, VarDecl,
};

/// Declarations of one function body
#[derive(Debug, Default)]
struct FunctionScope {
    /// Slot ordinal by name
    bindings: FxHashMap<String, u16>,
    /// Names in slot order, parameters first
    names: Vec<String>,
    /// Bindings are looked up by name at runtime
    by_name: bool,
}

impl FunctionScope {
    fn declare(&mut self, name: &str) {
        if self.bindings.contains_key(name) {
            return;
        }
        let index = self.names.len() as u16;
        self.bindings.insert(name.to_string(), index);
        self.names.push(name.to_string());
    }

    /// Parameters keep their positional slot; a repeated name binds to the last one
    fn declare_param(&mut self, name: &str) {
        let index = self.names.len() as u16;
        self.bindings.insert(name.to_string(), index);
        self.names.push(name.to_string());
    }

    fn resolve(&self, name: &str) -> Option<u16> {
        if self.by_name {
            return None;
        }
        self.bindings.get(name).copied()
    }
}

/// Features that force a heap activation
#[derive(Debug, Default)]
struct Capture {
    nested_function: bool,
    with: bool,
    eval: bool,
    arguments: bool,
}

impl Capture {
    fn any(&self) -> bool {
        self.nested_function || self.with || self.eval || self.arguments
    }
}

struct Collector<'a> {
    scope: &'a mut FunctionScope,
    capture: Capture,
}

impl Collector<'_> {
    fn stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn decls(&mut self, decls: &[VarDecl]) {
        for decl in decls {
            self.scope.declare(&decl.name.name);
            if let Some(init) = &decl.init {
                self.expr(init);
            }
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr(e) | StmtKind::Throw(e) => self.expr(e),
            StmtKind::Var(decls) => self.decls(decls),
            StmtKind::Return(e) => {
                if let Some(e) = e {
                    self.expr(e);
                }
            }
            StmtKind::If {
                test,
                then,
                otherwise,
            } => {
                self.expr(test);
                self.stmt(then);
                if let Some(otherwise) = otherwise {
                    self.stmt(otherwise);
                }
            }
            StmtKind::While { test, body } | StmtKind::DoWhile { body, test } => {
                self.expr(test);
                self.stmt(body);
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                match init {
                    Some(ForInit::Var(decls)) => self.decls(decls),
                    Some(ForInit::Expr(e)) => self.expr(e),
                    None => {}
                }
                for e in [test, update].into_iter().flatten() {
                    self.expr(e);
                }
                self.stmt(body);
            }
            StmtKind::ForIn {
                target,
                object,
                body,
            } => {
                match target {
                    ForInTarget::Var(ident) => self.scope.declare(&ident.name),
                    ForInTarget::Expr(e) => self.expr(e),
                }
                self.expr(object);
                self.stmt(body);
            }
            StmtKind::Switch {
                discriminant,
                cases,
            } => {
                self.expr(discriminant);
                for case in cases {
                    if let Some(test) = &case.test {
                        self.expr(test);
                    }
                    self.stmts(&case.body);
                }
            }
            StmtKind::Labeled { body, .. } => self.stmt(body),
            StmtKind::Try {
                block,
                handler,
                finalizer,
            } => {
                self.stmts(block);
                if let Some(handler) = handler {
                    self.scope.declare(&handler.param.name);
                    self.stmts(&handler.body);
                }
                if let Some(finalizer) = finalizer {
                    self.stmts(finalizer);
                }
            }
            StmtKind::With { object, body } => {
                self.capture.with = true;
                self.expr(object);
                self.stmt(body);
            }
            StmtKind::Block(stmts) => self.stmts(stmts),
            StmtKind::Function(node) => {
                self.capture.nested_function = true;
                if let Some(name) = &node.name {
                    self.scope.declare(name);
                }
            }
            StmtKind::Break(_) | StmtKind::Continue(_) | StmtKind::Empty => {}
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Name(ident) => {
                if ident.name == "arguments" {
                    self.capture.arguments = true;
                }
            }
            Expr::Function(_) => self.capture.nested_function = true,
            Expr::Array(items) | Expr::Sequence(items) => {
                for item in items {
                    self.expr(item);
                }
            }
            Expr::Object(props) => {
                for prop in props {
                    self.expr(&prop.value);
                }
            }
            Expr::Unary { argument, .. } => self.expr(argument),
            Expr::Update { target, .. } => self.expr(target),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test);
                self.expr(consequent);
                self.expr(alternate);
            }
            Expr::Assign { target, value, .. } => {
                self.expr(target);
                self.expr(value);
            }
            Expr::Member { object, .. } => self.expr(object),
            Expr::Index { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            Expr::Call { callee, args } | Expr::New { callee, args } => {
                if matches!(&**callee, Expr::Name(ident) if ident.name == "eval") {
                    self.capture.eval = true;
                }
                self.expr(callee);
                for arg in args {
                    self.expr(arg);
                }
            }
            Expr::Number(_)
            | Expr::String(_)
            | Expr::Boolean(_)
            | Expr::Null
            | Expr::Undefined
            | Expr::This
            | Expr::RegExp { .. } => {}
        }
    }
}

struct Binder<'a> {
    scope: &'a FunctionScope,
}

impl Binder<'_> {
    fn ident(&self, ident: &mut Ident) {
        ident.slot = self.scope.resolve(&ident.name);
    }

    fn stmts(&self, stmts: &mut [Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn decls(&self, decls: &mut [VarDecl]) {
        for decl in decls {
            self.ident(&mut decl.name);
            if let Some(init) = &mut decl.init {
                self.expr(init);
            }
        }
    }

    fn stmt(&self, stmt: &mut Stmt) {
        match &mut stmt.kind {
            StmtKind::Expr(e) | StmtKind::Throw(e) => self.expr(e),
            StmtKind::Var(decls) => self.decls(decls),
            StmtKind::Return(e) => {
                if let Some(e) = e {
                    self.expr(e);
                }
            }
            StmtKind::If {
                test,
                then,
                otherwise,
            } => {
                self.expr(test);
                self.stmt(then);
                if let Some(otherwise) = otherwise {
                    self.stmt(otherwise);
                }
            }
            StmtKind::While { test, body } | StmtKind::DoWhile { body, test } => {
                self.expr(test);
                self.stmt(body);
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                match init {
                    Some(ForInit::Var(decls)) => self.decls(decls),
                    Some(ForInit::Expr(e)) => self.expr(e),
                    None => {}
                }
                for e in [test, update].into_iter().flatten() {
                    self.expr(e);
                }
                self.stmt(body);
            }
            StmtKind::ForIn {
                target,
                object,
                body,
            } => {
                match target {
                    ForInTarget::Var(ident) => self.ident(ident),
                    ForInTarget::Expr(e) => self.expr(e),
                }
                self.expr(object);
                self.stmt(body);
            }
            StmtKind::Switch {
                discriminant,
                cases,
            } => {
                self.expr(discriminant);
                for SwitchCase { test, body } in cases {
                    if let Some(test) = test {
                        self.expr(test);
                    }
                    self.stmts(body);
                }
            }
            StmtKind::Labeled { body, .. } => self.stmt(body),
            StmtKind::Try {
                block,
                handler,
                finalizer,
            } => {
                self.stmts(block);
                if let Some(CatchClause { param, body }) = handler {
                    self.ident(param);
                    self.stmts(body);
                }
                if let Some(finalizer) = finalizer {
                    self.stmts(finalizer);
                }
            }
            StmtKind::With { object, body } => {
                self.expr(object);
                self.stmt(body);
            }
            StmtKind::Block(stmts) => self.stmts(stmts),
            StmtKind::Function(node) => resolve_function(node),
            StmtKind::Break(_) | StmtKind::Continue(_) | StmtKind::Empty => {}
        }
    }

    fn expr(&self, expr: &mut Expr) {
        match expr {
            Expr::Name(ident) => self.ident(ident),
            Expr::Function(node) => resolve_function(node),
            Expr::Array(items) | Expr::Sequence(items) => {
                for item in items {
                    self.expr(item);
                }
            }
            Expr::Object(props) => {
                for prop in props {
                    self.expr(&mut prop.value);
                }
            }
            Expr::Unary { argument, .. } => self.expr(argument),
            Expr::Update { target, .. } => self.expr(target),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test);
                self.expr(consequent);
                self.expr(alternate);
            }
            Expr::Assign { target, value, .. } => {
                self.expr(target);
                self.expr(value);
            }
            Expr::Member { object, .. } => self.expr(object),
            Expr::Index { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            Expr::Call { callee, args } | Expr::New { callee, args } => {
                self.expr(callee);
                for arg in args {
                    self.expr(arg);
                }
            }
            Expr::Number(_)
            | Expr::String(_)
            | Expr::Boolean(_)
            | Expr::Null
            | Expr::Undefined
            | Expr::This
            | Expr::RegExp { .. } => {}
        }
    }
}

fn resolve_node(node: &mut FunctionNode, is_script: bool) {
    let mut scope = FunctionScope::default();
    for param in &node.params {
        scope.declare_param(param);
    }
    for var in &node.vars {
        scope.declare(var);
    }

    let mut collector = Collector {
        scope: &mut scope,
        capture: Capture::default(),
    };
    collector.stmts(&node.body);
    let capture = collector.capture;

    if !is_script && capture.any() {
        node.needs_activation = true;
    }
    scope.by_name = is_script || node.needs_activation;
    node.vars = scope.names[node.params.len()..].to_vec();

    Binder { scope: &scope }.stmts(&mut node.body);
}

/// Resolve a function body and everything nested in it
pub fn resolve_function(node: &mut FunctionNode) {
    resolve_node(node, false);
}

/// Resolve a whole script
pub fn resolve_script(script: &mut Script) {
    resolve_node(&mut script.body, true);
}
