//! Tree-to-bytecode compiler

use std::sync::Arc;

use heron_vm_bytecode::instruction::{INCDEC_DECREMENT, INCDEC_POSTFIX};
use heron_vm_bytecode::{FunctionUnit, Label, Opcode, RegExpLiteral, UnitFlags};
use tracing::debug;

use crate::ast::{
    BinaryOp, CatchClause, Expr, ForInTarget, ForInit, FunctionNode, Ident, LogicalOp, Script, Stmt,
    StmtKind, UnaryOp, UpdateOp, VarDecl,
};
use crate::codegen::FunctionContext;
use crate::error::{CompileError, CompileResult};

/// Compiler options
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Keep the script's source text in every compiled unit
    pub keep_source: bool,
}

/// The compiler
#[derive(Debug, Default)]
pub struct Compiler {
    options: CompileOptions,
}

/// Source information shared by every unit of one compilation
struct SourceInfo {
    name: String,
    text: Option<Arc<str>>,
}

impl Compiler {
    /// Create a new compiler
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compiler with options
    pub fn with_options(options: CompileOptions) -> Self {
        Self { options }
    }

    /// Compile a script
    pub fn compile(&self, script: &Script) -> CompileResult<Arc<FunctionUnit>> {
        let source = SourceInfo {
            name: script.source_name.clone(),
            text: if self.options.keep_source {
                script.source.as_deref().map(Arc::from)
            } else {
                None
            },
        };
        Ok(Arc::new(compile_unit(&script.body, true, &source)?))
    }

    /// Compile a single function outside any script
    pub fn compile_function(
        &self,
        node: &FunctionNode,
        source_name: &str,
    ) -> CompileResult<Arc<FunctionUnit>> {
        let source = SourceInfo {
            name: source_name.to_string(),
            text: None,
        };
        Ok(Arc::new(compile_unit(node, false, &source)?))
    }
}

/// Finally handling of an enclosing try statement
#[derive(Debug, Clone, Copy)]
struct Finally {
    /// Entry of the finally body
    body: Label,
    /// Temporary holding the subroutine return position
    ret: u16,
    /// Temporary holding a return value while finally bodies run
    value: u16,
}

/// A construct that `break`, `continue` or `return` may have to leave
#[derive(Debug)]
enum Jumps {
    Loop {
        labels: Vec<String>,
        break_to: Label,
        continue_to: Label,
    },
    Switch {
        labels: Vec<String>,
        break_to: Label,
    },
    Block {
        labels: Vec<String>,
        break_to: Label,
    },
    /// An active try region
    Try { finally: Option<Finally> },
    With,
}

impl Jumps {
    fn labels(&self) -> &[String] {
        match self {
            Jumps::Loop { labels, .. } | Jumps::Switch { labels, .. } | Jumps::Block { labels, .. } => {
                labels
            }
            Jumps::Try { .. } | Jumps::With => &[],
        }
    }
}

struct UnitCompiler<'a> {
    ctx: FunctionContext,
    node: &'a FunctionNode,
    source: &'a SourceInfo,
    is_script: bool,
    use_slots: bool,
    jumps: Vec<Jumps>,
    pending_labels: Vec<String>,
    /// Line of the statement being compiled
    line: u32,
}

fn compile_unit(
    node: &FunctionNode,
    is_script: bool,
    source: &SourceInfo,
) -> CompileResult<FunctionUnit> {
    let use_slots = !is_script && !node.needs_activation;
    let mut unit = UnitCompiler {
        ctx: FunctionContext::new(),
        node,
        source,
        is_script,
        use_slots,
        jumps: Vec::new(),
        pending_labels: Vec::new(),
        line: node.line,
    };

    let mut hoisted = Vec::new();
    collect_function_declarations(&node.body, &mut hoisted);
    for decl in hoisted {
        unit.function_declaration(decl)?;
    }
    unit.statements(&node.body)?;
    unit.ctx.emit(if is_script {
        Opcode::End
    } else {
        Opcode::ReturnUndefined
    });

    let var_names: Vec<String> = node.params.iter().chain(&node.vars).cloned().collect();
    let var_count = if use_slots {
        u16::try_from(var_names.len()).map_err(|_| CompileError::TooManyLocals)?
    } else {
        0
    };
    let param_count = u16::try_from(node.params.len()).map_err(|_| CompileError::TooManyLocals)?;
    let first_line = if node.line != 0 {
        node.line
    } else {
        node.body.iter().map(|s| s.line).find(|&l| l != 0).unwrap_or(0)
    };

    let (emitted, layout, max_call_args) = unit.ctx.finish(var_count)?;
    let compiled = FunctionUnit {
        name: node.name.clone(),
        param_count,
        var_names,
        code: emitted.code,
        strings: emitted.strings,
        numbers: emitted.numbers,
        functions: emitted.functions,
        regexps: emitted.regexps,
        layout,
        max_call_args,
        flags: UnitFlags {
            is_script,
            needs_activation: node.needs_activation,
        },
        source_name: source.name.clone(),
        source: source.text.clone(),
        first_line,
    };
    debug!(
        unit = compiled.display_name(),
        source = %compiled.source_name,
        bytes = compiled.code.len(),
        max_stack = layout.max_stack,
        temps = layout.temp_count,
        "Compiled unit"
    );
    Ok(compiled)
}

/// Function declarations of a body, not descending into nested functions
fn collect_function_declarations<'t>(stmts: &'t [Stmt], out: &mut Vec<&'t FunctionNode>) {
    for stmt in stmts {
        collect_from(stmt, out);
    }
}

fn collect_from<'t>(stmt: &'t Stmt, out: &mut Vec<&'t FunctionNode>) {
    match &stmt.kind {
        StmtKind::Function(node) => out.push(&**node),
        StmtKind::Block(body) => collect_function_declarations(body, out),
        StmtKind::If {
            then, otherwise, ..
        } => {
            collect_from(then, out);
            if let Some(otherwise) = otherwise {
                collect_from(otherwise, out);
            }
        }
        StmtKind::While { body, .. }
        | StmtKind::DoWhile { body, .. }
        | StmtKind::For { body, .. }
        | StmtKind::ForIn { body, .. }
        | StmtKind::Labeled { body, .. }
        | StmtKind::With { body, .. } => collect_from(body, out),
        StmtKind::Switch { cases, .. } => {
            for case in cases {
                collect_function_declarations(&case.body, out);
            }
        }
        StmtKind::Try {
            block,
            handler,
            finalizer,
        } => {
            collect_function_declarations(block, out);
            if let Some(handler) = handler {
                collect_function_declarations(&handler.body, out);
            }
            if let Some(finalizer) = finalizer {
                collect_function_declarations(finalizer, out);
            }
        }
        StmtKind::Expr(_)
        | StmtKind::Var(_)
        | StmtKind::Return(_)
        | StmtKind::Break(_)
        | StmtKind::Continue(_)
        | StmtKind::Throw(_)
        | StmtKind::Empty => {}
    }
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::Shl => Opcode::Shl,
        BinaryOp::Shr => Opcode::Shr,
        BinaryOp::Ushr => Opcode::Ushr,
        BinaryOp::BitAnd => Opcode::BitAnd,
        BinaryOp::BitOr => Opcode::BitOr,
        BinaryOp::BitXor => Opcode::BitXor,
        BinaryOp::Eq => Opcode::Eq,
        BinaryOp::Ne => Opcode::Ne,
        BinaryOp::StrictEq => Opcode::StrictEq,
        BinaryOp::StrictNe => Opcode::StrictNe,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::Le => Opcode::Le,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::Ge => Opcode::Ge,
        BinaryOp::In => Opcode::In,
        BinaryOp::InstanceOf => Opcode::InstanceOf,
    }
}

fn incdec_flags(op: UpdateOp, prefix: bool) -> u8 {
    let mut flags = 0;
    if op == UpdateOp::Decrement {
        flags |= INCDEC_DECREMENT;
    }
    if !prefix {
        flags |= INCDEC_POSTFIX;
    }
    flags
}

fn opens_jump_scope(stmt: &Stmt) -> bool {
    matches!(
        stmt.kind,
        StmtKind::While { .. }
            | StmtKind::DoWhile { .. }
            | StmtKind::For { .. }
            | StmtKind::ForIn { .. }
            | StmtKind::Switch { .. }
            | StmtKind::Labeled { .. }
    )
}

impl UnitCompiler<'_> {
    // ==================== Variables ====================

    /// Slot of a declared name when the unit uses slots
    fn declared_slot(&self, name: &str) -> Option<u16> {
        if !self.use_slots {
            return None;
        }
        self.node
            .params
            .iter()
            .chain(&self.node.vars)
            .position(|n| n == name)
            .map(|i| i as u16)
    }

    fn ident_slot(&self, ident: &Ident) -> Option<u16> {
        if self.use_slots { ident.slot } else { None }
    }

    fn load_ident(&mut self, ident: &Ident) -> CompileResult<()> {
        match self.ident_slot(ident) {
            Some(slot) => self.ctx.emit_u16(Opcode::GetVar, slot),
            None => self.ctx.emit_string(Opcode::Name, &ident.name)?,
        }
        Ok(())
    }

    /// Store the value on top of the stack into a variable, leaving it there
    fn store_top(&mut self, name: &str, slot: Option<u16>) -> CompileResult<()> {
        match slot {
            Some(slot) => self.ctx.emit_u16(Opcode::SetVar, slot),
            None => {
                self.ctx.emit_string(Opcode::BindName, name)?;
                self.ctx.emit(Opcode::Swap);
                self.ctx.emit_string(Opcode::SetName, name)?;
            }
        }
        Ok(())
    }

    /// Evaluate `value` and assign it to a variable, leaving the value
    fn assign_ident(&mut self, ident: &Ident, value: &Expr) -> CompileResult<()> {
        match self.ident_slot(ident) {
            Some(slot) => {
                self.expr(value)?;
                self.ctx.emit_u16(Opcode::SetVar, slot);
            }
            None => {
                self.ctx.emit_string(Opcode::BindName, &ident.name)?;
                self.expr(value)?;
                self.ctx.emit_string(Opcode::SetName, &ident.name)?;
            }
        }
        Ok(())
    }

    fn var_decls(&mut self, decls: &[VarDecl]) -> CompileResult<()> {
        for decl in decls {
            if let Some(init) = &decl.init {
                self.assign_ident(&decl.name, init)?;
                self.ctx.emit(Opcode::Pop);
            }
        }
        Ok(())
    }

    fn function_declaration(&mut self, node: &FunctionNode) -> CompileResult<()> {
        let name = node
            .name
            .as_deref()
            .ok_or_else(|| CompileError::unhandled("function declaration without a name", node.line))?;
        let idx = self.nested_function(node)?;
        self.ctx.emit_closure(idx);
        let slot = self.declared_slot(name);
        self.store_top(name, slot)?;
        self.ctx.emit(Opcode::Pop);
        Ok(())
    }

    fn nested_function(&mut self, node: &FunctionNode) -> CompileResult<u16> {
        let unit = compile_unit(node, false, self.source)?;
        self.ctx.add_function(Arc::new(unit))
    }

    // ==================== Statements ====================

    fn statements(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
        for stmt in stmts {
            self.statement(stmt)?;
        }
        Ok(())
    }

    fn statement(&mut self, stmt: &Stmt) -> CompileResult<()> {
        debug_assert_eq!(self.ctx.depth(), 0, "statement entered with a non-empty stack");
        if stmt.line != 0 {
            self.line = stmt.line;
        }
        self.ctx.line(stmt.line);
        let labels = std::mem::take(&mut self.pending_labels);

        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.expr(e)?;
                self.ctx.emit(if self.is_script {
                    Opcode::PopResult
                } else {
                    Opcode::Pop
                });
            }
            StmtKind::Var(decls) => self.var_decls(decls)?,
            StmtKind::Return(value) => self.return_statement(value.as_ref())?,
            StmtKind::If {
                test,
                then,
                otherwise,
            } => {
                let else_label = self.ctx.new_label();
                self.expr(test)?;
                self.ctx.emit_jump(Opcode::IfFalse, else_label)?;
                self.statement(then)?;
                match otherwise {
                    Some(otherwise) => {
                        let end = self.ctx.new_label();
                        self.ctx.emit_jump(Opcode::Goto, end)?;
                        self.ctx.mark(else_label);
                        self.statement(otherwise)?;
                        self.ctx.mark(end);
                    }
                    None => self.ctx.mark(else_label),
                }
            }
            StmtKind::While { test, body } => {
                let (break_to, continue_to) = self.push_loop(labels);
                self.ctx.mark(continue_to);
                self.expr(test)?;
                self.ctx.emit_jump(Opcode::IfFalse, break_to)?;
                self.statement(body)?;
                self.ctx.emit_jump(Opcode::Goto, continue_to)?;
                self.pop_jumps(break_to);
            }
            StmtKind::DoWhile { body, test } => {
                let (break_to, continue_to) = self.push_loop(labels);
                let top = self.ctx.new_label();
                self.ctx.mark(top);
                self.statement(body)?;
                self.ctx.mark(continue_to);
                self.expr(test)?;
                self.ctx.emit_jump(Opcode::IfTrue, top)?;
                self.pop_jumps(break_to);
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                match init {
                    Some(ForInit::Var(decls)) => self.var_decls(decls)?,
                    Some(ForInit::Expr(e)) => {
                        self.expr(e)?;
                        self.ctx.emit(Opcode::Pop);
                    }
                    None => {}
                }
                let (break_to, continue_to) = self.push_loop(labels);
                let top = self.ctx.new_label();
                self.ctx.mark(top);
                if let Some(test) = test {
                    self.expr(test)?;
                    self.ctx.emit_jump(Opcode::IfFalse, break_to)?;
                }
                self.statement(body)?;
                self.ctx.mark(continue_to);
                if let Some(update) = update {
                    self.expr(update)?;
                    self.ctx.emit(Opcode::Pop);
                }
                self.ctx.emit_jump(Opcode::Goto, top)?;
                self.pop_jumps(break_to);
            }
            StmtKind::ForIn {
                target,
                object,
                body,
            } => self.for_in(labels, target, object, body)?,
            StmtKind::Switch {
                discriminant,
                cases,
            } => {
                let temp = self.ctx.alloc_temp()?;
                self.expr(discriminant)?;
                self.ctx.emit_u16(Opcode::StoreTemp, temp);

                let case_labels: Vec<Label> = cases.iter().map(|_| self.ctx.new_label()).collect();
                let mut default = None;
                for (case, &label) in cases.iter().zip(&case_labels) {
                    match &case.test {
                        Some(test) => {
                            self.ctx.emit_u16(Opcode::LoadTemp, temp);
                            self.expr(test)?;
                            self.ctx.emit(Opcode::StrictEq);
                            self.ctx.emit_jump(Opcode::IfTrue, label)?;
                        }
                        None => default = Some(label),
                    }
                }
                let break_to = self.ctx.new_label();
                self.ctx.emit_jump(Opcode::Goto, default.unwrap_or(break_to))?;

                self.jumps.push(Jumps::Switch { labels, break_to });
                for (case, &label) in cases.iter().zip(&case_labels) {
                    self.ctx.mark(label);
                    self.statements(&case.body)?;
                }
                self.pop_jumps(break_to);
                self.ctx.free_temp(temp);
            }
            StmtKind::Labeled { label, body } => {
                let mut labels = labels;
                labels.push(label.clone());
                if opens_jump_scope(body) {
                    self.pending_labels = labels;
                    self.statement(body)?;
                } else {
                    let break_to = self.ctx.new_label();
                    self.jumps.push(Jumps::Block { labels, break_to });
                    self.statement(body)?;
                    self.pop_jumps(break_to);
                }
            }
            StmtKind::Break(label) => self.break_statement(label.as_deref())?,
            StmtKind::Continue(label) => self.continue_statement(label.as_deref())?,
            StmtKind::Throw(e) => {
                self.expr(e)?;
                self.ctx.emit(Opcode::Throw);
            }
            StmtKind::Try {
                block,
                handler,
                finalizer,
            } => self.try_statement(block, handler.as_ref(), finalizer.as_deref())?,
            StmtKind::With { object, body } => {
                self.expr(object)?;
                self.ctx.emit(Opcode::EnterWith);
                self.jumps.push(Jumps::With);
                self.statement(body)?;
                self.jumps.pop();
                self.ctx.emit(Opcode::LeaveWith);
            }
            StmtKind::Block(body) => self.statements(body)?,
            // Instantiated at unit entry
            StmtKind::Function(_) => {}
            StmtKind::Empty => {}
        }
        Ok(())
    }

    fn push_loop(&mut self, labels: Vec<String>) -> (Label, Label) {
        let break_to = self.ctx.new_label();
        let continue_to = self.ctx.new_label();
        self.jumps.push(Jumps::Loop {
            labels,
            break_to,
            continue_to,
        });
        (break_to, continue_to)
    }

    fn pop_jumps(&mut self, break_to: Label) {
        self.jumps.pop();
        self.ctx.mark(break_to);
    }

    fn for_in(
        &mut self,
        labels: Vec<String>,
        target: &ForInTarget,
        object: &Expr,
        body: &Stmt,
    ) -> CompileResult<()> {
        let enumerator = self.ctx.alloc_temp()?;
        self.expr(object)?;
        self.ctx.emit_u16(Opcode::EnumInit, enumerator);

        let (break_to, continue_to) = self.push_loop(labels);
        self.ctx.mark(continue_to);
        self.ctx.emit_u16(Opcode::EnumNext, enumerator);
        self.ctx.emit_jump(Opcode::IfFalse, break_to)?;
        self.ctx.emit_u16(Opcode::EnumId, enumerator);
        match target {
            ForInTarget::Var(ident) => {
                let slot = self.ident_slot(ident);
                self.store_top(&ident.name, slot)?;
            }
            ForInTarget::Expr(expr) => self.store_top_to(expr)?,
        }
        self.ctx.emit(Opcode::Pop);
        self.statement(body)?;
        self.ctx.emit_jump(Opcode::Goto, continue_to)?;
        self.pop_jumps(break_to);
        self.ctx.free_temp(enumerator);
        Ok(())
    }

    /// Store the value on top of the stack into an arbitrary reference
    fn store_top_to(&mut self, target: &Expr) -> CompileResult<()> {
        match target {
            Expr::Name(ident) => {
                let slot = self.ident_slot(ident);
                self.store_top(&ident.name, slot)
            }
            Expr::Member { object, property } => {
                self.expr(object)?;
                self.ctx.emit(Opcode::Swap);
                self.ctx.emit_string(Opcode::SetProp, property)
            }
            Expr::Index { object, index } => {
                let temp = self.ctx.alloc_temp()?;
                self.ctx.emit_u16(Opcode::StoreTemp, temp);
                self.expr(object)?;
                self.expr(index)?;
                self.ctx.emit_u16(Opcode::LoadTemp, temp);
                self.ctx.emit(Opcode::SetElem);
                self.ctx.free_temp(temp);
                Ok(())
            }
            _ => Err(CompileError::InvalidAssignmentTarget(self.line)),
        }
    }

    /// Emit the exits for every construct above `depth` in the jump stack,
    /// innermost first
    fn leave_to(&mut self, depth: usize) -> CompileResult<()> {
        for i in (depth..self.jumps.len()).rev() {
            match &self.jumps[i] {
                Jumps::Try { finally } => {
                    let finally = *finally;
                    self.ctx.emit(Opcode::EndTry);
                    if let Some(finally) = finally {
                        self.ctx.emit_gosub(finally.body, finally.ret)?;
                    }
                }
                Jumps::With => self.ctx.emit(Opcode::LeaveWith),
                Jumps::Loop { .. } | Jumps::Switch { .. } | Jumps::Block { .. } => {}
            }
        }
        Ok(())
    }

    fn break_statement(&mut self, label: Option<&str>) -> CompileResult<()> {
        let found = self.jumps.iter().enumerate().rev().find_map(|(i, j)| {
            let hit = match (label, j) {
                (None, Jumps::Loop { .. } | Jumps::Switch { .. }) => true,
                (Some(label), _) => j.labels().iter().any(|l| l == label),
                _ => false,
            };
            match j {
                Jumps::Loop { break_to, .. }
                | Jumps::Switch { break_to, .. }
                | Jumps::Block { break_to, .. }
                    if hit =>
                {
                    Some((i, *break_to))
                }
                _ => None,
            }
        });
        let Some((depth, target)) = found else {
            return Err(CompileError::IllegalBreak {
                label: label.map(str::to_string),
                line: self.line,
            });
        };
        self.leave_to(depth + 1)?;
        self.ctx.emit_jump(Opcode::Goto, target)
    }

    fn continue_statement(&mut self, label: Option<&str>) -> CompileResult<()> {
        let found = self.jumps.iter().enumerate().rev().find_map(|(i, j)| {
            let hit = match label {
                None => matches!(j, Jumps::Loop { .. }),
                Some(label) => j.labels().iter().any(|l| l == label),
            };
            hit.then_some((i, j))
        });
        let target = match found {
            Some((i, Jumps::Loop { continue_to, .. })) => Some((i, *continue_to)),
            _ => None,
        };
        let Some((depth, target)) = target else {
            return Err(CompileError::IllegalContinue {
                label: label.map(str::to_string),
                line: self.line,
            });
        };
        self.leave_to(depth + 1)?;
        self.ctx.emit_jump(Opcode::Goto, target)
    }

    fn return_statement(&mut self, value: Option<&Expr>) -> CompileResult<()> {
        match value {
            Some(value) => self.expr(value)?,
            None => self.ctx.emit(Opcode::Undefined),
        }
        // Finally bodies run between evaluating the value and returning it
        let outermost_finally = self.jumps.iter().find_map(|j| match j {
            Jumps::Try {
                finally: Some(finally),
            } => Some(*finally),
            _ => None,
        });
        if let Some(finally) = outermost_finally {
            self.ctx.emit_u16(Opcode::StoreTemp, finally.value);
            self.leave_to(0)?;
            self.ctx.emit_u16(Opcode::LoadTemp, finally.value);
        }
        self.ctx.emit(Opcode::Return);
        Ok(())
    }

    fn try_statement(
        &mut self,
        block: &[Stmt],
        handler: Option<&CatchClause>,
        finalizer: Option<&[Stmt]>,
    ) -> CompileResult<()> {
        let catch_entry = handler.map(|_| self.ctx.new_label());
        let finally = match finalizer {
            Some(_) => Some(Finally {
                body: self.ctx.new_label(),
                ret: self.ctx.alloc_temp()?,
                value: self.ctx.alloc_temp()?,
            }),
            None => None,
        };
        let (finally_entry, exception) = match finally {
            Some(_) => (Some(self.ctx.new_label()), Some(self.ctx.alloc_temp()?)),
            None => (None, None),
        };
        let end = self.ctx.new_label();

        self.ctx.enter_try();
        self.ctx.emit_try(catch_entry, finally_entry)?;
        self.jumps.push(Jumps::Try { finally });
        self.statements(block)?;
        self.jumps.pop();
        self.leave_region(finally, end)?;

        if let (Some(handler), Some(entry)) = (handler, catch_entry) {
            self.ctx.mark(entry);
            self.ctx.set_depth(1);
            let slot = self.ident_slot(&handler.param);
            self.store_top(&handler.param.name, slot)?;
            self.ctx.emit(Opcode::Pop);
            if finally.is_some() {
                // The region stays active for its finally while the catch runs
                self.jumps.push(Jumps::Try { finally });
                self.statements(&handler.body)?;
                self.jumps.pop();
                self.leave_region(finally, end)?;
            } else {
                self.statements(&handler.body)?;
                self.ctx.emit_jump(Opcode::Goto, end)?;
            }
        }

        if let (Some(finally), Some(entry), Some(exception), Some(body)) =
            (finally, finally_entry, exception, finalizer)
        {
            self.ctx.mark(entry);
            self.ctx.set_depth(1);
            self.ctx.emit_u16(Opcode::StoreTemp, exception);
            self.ctx.emit_gosub(finally.body, finally.ret)?;
            self.ctx.emit_u16(Opcode::Rethrow, exception);

            self.ctx.mark(finally.body);
            self.ctx.set_depth(0);
            self.statements(body)?;
            self.ctx.emit_u16(Opcode::RetSub, finally.ret);
            self.ctx.free_temp(exception);
            self.ctx.free_temp(finally.value);
            self.ctx.free_temp(finally.ret);
        }
        self.ctx.exit_try();

        self.ctx.mark(end);
        self.ctx.set_depth(0);
        Ok(())
    }

    /// Normal exit from a try region: close it, run the finally body, skip
    /// the handlers
    fn leave_region(&mut self, finally: Option<Finally>, end: Label) -> CompileResult<()> {
        self.ctx.emit(Opcode::EndTry);
        if let Some(finally) = finally {
            self.ctx.emit_gosub(finally.body, finally.ret)?;
        }
        self.ctx.emit_jump(Opcode::Goto, end)
    }

    // ==================== Expressions ====================

    fn expr(&mut self, expr: &Expr) -> CompileResult<()> {
        match expr {
            Expr::Number(n) => self.ctx.emit_number(*n)?,
            Expr::String(s) => self.ctx.emit_string(Opcode::String, s)?,
            Expr::Boolean(true) => self.ctx.emit(Opcode::True),
            Expr::Boolean(false) => self.ctx.emit(Opcode::False),
            Expr::Null => self.ctx.emit(Opcode::Null),
            Expr::Undefined => self.ctx.emit(Opcode::Undefined),
            Expr::This => self.ctx.emit(Opcode::This),
            Expr::RegExp { pattern, flags } => self
                .ctx
                .emit_regexp(RegExpLiteral::new(pattern.as_str(), flags.as_str()))?,
            Expr::Name(ident) => self.load_ident(ident)?,
            Expr::Array(items) => {
                let count = u16::try_from(items.len())
                    .map_err(|_| CompileError::unhandled("array literal too long", self.line))?;
                for item in items {
                    self.expr(item)?;
                }
                self.ctx.emit_u16(Opcode::NewArray, count);
            }
            Expr::Object(props) => {
                self.ctx.emit(Opcode::NewObject);
                for prop in props {
                    self.ctx.emit(Opcode::Dup);
                    self.expr(&prop.value)?;
                    self.ctx.emit_string(Opcode::SetProp, &prop.key)?;
                    self.ctx.emit(Opcode::Pop);
                }
            }
            Expr::Function(node) => {
                let idx = self.nested_function(node)?;
                self.ctx.emit_closure(idx);
            }
            Expr::Unary { op, argument } => self.unary(*op, argument)?,
            Expr::Update { op, prefix, target } => self.update(*op, *prefix, target)?,
            Expr::Binary { op, left, right } => {
                self.expr(left)?;
                self.expr(right)?;
                self.ctx.emit(binary_opcode(*op));
            }
            Expr::Logical { op, left, right } => {
                let end = self.ctx.new_label();
                self.expr(left)?;
                self.ctx.emit(Opcode::Dup);
                let skip = match op {
                    LogicalOp::And => Opcode::IfFalse,
                    LogicalOp::Or => Opcode::IfTrue,
                };
                self.ctx.emit_jump(skip, end)?;
                self.ctx.emit(Opcode::Pop);
                self.expr(right)?;
                self.ctx.mark(end);
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let otherwise = self.ctx.new_label();
                let end = self.ctx.new_label();
                self.expr(test)?;
                let base = self.ctx.depth();
                self.ctx.emit_jump(Opcode::IfFalse, otherwise)?;
                self.expr(consequent)?;
                self.ctx.emit_jump(Opcode::Goto, end)?;
                self.ctx.mark(otherwise);
                self.ctx.set_depth(base - 1);
                self.expr(alternate)?;
                self.ctx.mark(end);
            }
            Expr::Assign { op, target, value } => self.assign(*op, target, value)?,
            Expr::Member { object, property } => {
                self.expr(object)?;
                self.ctx.emit_string(Opcode::GetProp, property)?;
            }
            Expr::Index { object, index } => {
                self.expr(object)?;
                self.expr(index)?;
                self.ctx.emit(Opcode::GetElem);
            }
            Expr::Call { callee, args } => self.call(callee, args)?,
            Expr::New { callee, args } => {
                self.expr(callee)?;
                for arg in args {
                    self.expr(arg)?;
                }
                let name = callee_name(callee);
                self.ctx.emit_call(Opcode::New, args.len(), name)?;
            }
            Expr::Sequence(items) => {
                let Some((last, init)) = items.split_last() else {
                    return Err(CompileError::unhandled("empty sequence expression", self.line));
                };
                for item in init {
                    self.expr(item)?;
                    self.ctx.emit(Opcode::Pop);
                }
                self.expr(last)?;
            }
        }
        Ok(())
    }

    fn unary(&mut self, op: UnaryOp, argument: &Expr) -> CompileResult<()> {
        match op {
            UnaryOp::Neg | UnaryOp::Plus | UnaryOp::Not | UnaryOp::BitNot => {
                self.expr(argument)?;
                self.ctx.emit(match op {
                    UnaryOp::Neg => Opcode::Neg,
                    UnaryOp::Plus => Opcode::Pos,
                    UnaryOp::Not => Opcode::Not,
                    _ => Opcode::BitNot,
                });
            }
            UnaryOp::TypeOf => match argument {
                // Undeclared names yield "undefined" instead of throwing
                Expr::Name(ident) if self.ident_slot(ident).is_none() => {
                    self.ctx.emit_string(Opcode::TypeOfName, &ident.name)?;
                }
                _ => {
                    self.expr(argument)?;
                    self.ctx.emit(Opcode::TypeOf);
                }
            },
            UnaryOp::Void => {
                self.expr(argument)?;
                self.ctx.emit(Opcode::Pop);
                self.ctx.emit(Opcode::Undefined);
            }
            UnaryOp::Delete => match argument {
                Expr::Member { object, property } => {
                    self.expr(object)?;
                    self.ctx.emit_string(Opcode::String, property)?;
                    self.ctx.emit(Opcode::DelProp);
                }
                Expr::Index { object, index } => {
                    self.expr(object)?;
                    self.expr(index)?;
                    self.ctx.emit(Opcode::DelProp);
                }
                Expr::Name(ident) if self.ident_slot(ident).is_none() => {
                    self.ctx.emit_string(Opcode::BindName, &ident.name)?;
                    self.ctx.emit_string(Opcode::String, &ident.name)?;
                    self.ctx.emit(Opcode::DelProp);
                }
                // Declared variables cannot be deleted
                Expr::Name(_) => self.ctx.emit(Opcode::False),
                _ => {
                    self.expr(argument)?;
                    self.ctx.emit(Opcode::Pop);
                    self.ctx.emit(Opcode::True);
                }
            },
        }
        Ok(())
    }

    fn update(&mut self, op: UpdateOp, prefix: bool, target: &Expr) -> CompileResult<()> {
        let flags = incdec_flags(op, prefix);
        match target {
            Expr::Name(ident) => match self.ident_slot(ident) {
                Some(slot) => self.ctx.emit_slot_u8(Opcode::VarIncDec, slot, flags),
                None => self
                    .ctx
                    .emit_string_u8(Opcode::NameIncDec, &ident.name, flags)?,
            },
            Expr::Member { object, property } => {
                self.expr(object)?;
                self.ctx.emit_string_u8(Opcode::PropIncDec, property, flags)?;
            }
            Expr::Index { object, index } => {
                self.expr(object)?;
                self.expr(index)?;
                self.ctx.emit_u8(Opcode::ElemIncDec, flags);
            }
            _ => return Err(CompileError::InvalidAssignmentTarget(self.line)),
        }
        Ok(())
    }

    fn assign(&mut self, op: Option<BinaryOp>, target: &Expr, value: &Expr) -> CompileResult<()> {
        match (target, op) {
            (Expr::Name(ident), None) => self.assign_ident(ident, value)?,
            (Expr::Name(ident), Some(op)) => match self.ident_slot(ident) {
                Some(slot) => {
                    self.ctx.emit_u16(Opcode::GetVar, slot);
                    self.expr(value)?;
                    self.ctx.emit(binary_opcode(op));
                    self.ctx.emit_u16(Opcode::SetVar, slot);
                }
                None => {
                    self.ctx.emit_string(Opcode::BindName, &ident.name)?;
                    self.ctx.emit_string(Opcode::Name, &ident.name)?;
                    self.expr(value)?;
                    self.ctx.emit(binary_opcode(op));
                    self.ctx.emit_string(Opcode::SetName, &ident.name)?;
                }
            },
            (Expr::Member { object, property }, op) => {
                self.expr(object)?;
                if let Some(op) = op {
                    self.ctx.emit(Opcode::Dup);
                    self.ctx.emit_string(Opcode::GetProp, property)?;
                    self.expr(value)?;
                    self.ctx.emit(binary_opcode(op));
                } else {
                    self.expr(value)?;
                }
                self.ctx.emit_string(Opcode::SetProp, property)?;
            }
            (Expr::Index { object, index }, op) => {
                self.expr(object)?;
                self.expr(index)?;
                if let Some(op) = op {
                    self.ctx.emit(Opcode::Dup2);
                    self.ctx.emit(Opcode::GetElem);
                    self.expr(value)?;
                    self.ctx.emit(binary_opcode(op));
                } else {
                    self.expr(value)?;
                }
                self.ctx.emit(Opcode::SetElem);
            }
            _ => return Err(CompileError::InvalidAssignmentTarget(self.line)),
        }
        Ok(())
    }

    fn call(&mut self, callee: &Expr, args: &[Expr]) -> CompileResult<()> {
        // Leave [function, this] on the stack
        match callee {
            Expr::Member { object, property } => {
                self.expr(object)?;
                self.ctx.emit(Opcode::Dup);
                self.ctx.emit_string(Opcode::GetProp, property)?;
                self.ctx.emit(Opcode::Swap);
            }
            Expr::Index { object, index } => {
                self.expr(object)?;
                self.ctx.emit(Opcode::Dup);
                self.expr(index)?;
                self.ctx.emit(Opcode::GetElem);
                self.ctx.emit(Opcode::Swap);
            }
            Expr::Name(ident) => match self.ident_slot(ident) {
                Some(slot) => {
                    self.ctx.emit_u16(Opcode::GetVar, slot);
                    self.ctx.emit(Opcode::Undefined);
                }
                None => self.ctx.emit_string(Opcode::NameAndThis, &ident.name)?,
            },
            other => {
                self.expr(other)?;
                self.ctx.emit(Opcode::Undefined);
            }
        }
        for arg in args {
            self.expr(arg)?;
        }
        self.ctx.emit_call(Opcode::Call, args.len(), callee_name(callee))
    }
}

/// Name used for the callee in "not a function" diagnostics
fn callee_name(callee: &Expr) -> Option<&str> {
    match callee {
        Expr::Name(ident) => Some(ident.name.as_str()),
        Expr::Member { property, .. } => Some(property.as_str()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Ident, SwitchCase};
    use crate::resolve::{resolve_function, resolve_script};
    use heron_vm_bytecode::Instructions;

    fn opcodes(unit: &FunctionUnit) -> Vec<Opcode> {
        unit.instructions()
            .map(|insn| insn.unwrap().opcode)
            .filter(|op| *op != Opcode::Line)
            .collect()
    }

    fn compile_script(body: Vec<Stmt>) -> Arc<FunctionUnit> {
        let mut script = Script::new("test.js", body);
        resolve_script(&mut script);
        Compiler::new().compile(&script).unwrap()
    }

    fn compile_fn(params: &[&str], body: Vec<Stmt>) -> Arc<FunctionUnit> {
        let mut node = FunctionNode::new(Some("f"), params, body);
        resolve_function(&mut node);
        Compiler::new().compile_function(&node, "test.js").unwrap()
    }

    #[test]
    fn test_slot_access_in_plain_function() {
        let unit = compile_fn(
            &["a"],
            vec![Stmt::ret(Some(Expr::binary(
                BinaryOp::Add,
                Expr::name("a"),
                Expr::num(1.0),
            )))],
        );
        assert_eq!(
            opcodes(&unit),
            vec![
                Opcode::GetVar,
                Opcode::One,
                Opcode::Add,
                Opcode::Return,
                Opcode::ReturnUndefined
            ]
        );
        assert_eq!(unit.layout.var_count, 1);
        assert_eq!(unit.layout.max_stack, 2);
    }

    #[test]
    fn test_script_uses_names_and_completion_value() {
        let unit = compile_script(vec![
            Stmt::var("x", Some(Expr::num(3.0))),
            Stmt::expr(Expr::name("x")),
        ]);
        assert_eq!(
            opcodes(&unit),
            vec![
                Opcode::BindName,
                Opcode::Short,
                Opcode::SetName,
                Opcode::Pop,
                Opcode::Name,
                Opcode::PopResult,
                Opcode::End
            ]
        );
        assert_eq!(unit.var_names, vec!["x".to_string()]);
        assert_eq!(unit.layout.var_count, 0);
    }

    #[test]
    fn test_function_declarations_are_hoisted() {
        let g = FunctionNode::new(Some("g"), &[], vec![Stmt::ret(Some(Expr::num(1.0)))]);
        let unit = compile_script(vec![
            Stmt::expr(Expr::call(Expr::name("g"), vec![])),
            Stmt::function(g),
        ]);
        let ops = opcodes(&unit);
        assert_eq!(ops[0], Opcode::Closure);
        assert_eq!(unit.functions.len(), 1);
        assert_eq!(unit.functions[0].display_name(), "g");
    }

    #[test]
    fn test_try_catch_layout() {
        let unit = compile_script(vec![Stmt::try_stmt(
            vec![Stmt::throw(Expr::str("boom"))],
            Some(("e", vec![Stmt::ret(Some(Expr::name("e")))])),
            None,
        )]);
        let ops = opcodes(&unit);
        assert_eq!(ops[0], Opcode::Try);
        assert!(ops.contains(&Opcode::EndTry));
        assert_eq!(unit.layout.try_depth, 1);
        assert_eq!(unit.layout.temp_count, 0);
    }

    #[test]
    fn test_finally_is_a_subroutine() {
        let unit = compile_fn(
            &[],
            vec![Stmt::try_stmt(
                vec![Stmt::ret(Some(Expr::num(1.0)))],
                None,
                Some(vec![Stmt::expr(Expr::call(Expr::name("log"), vec![]))]),
            )],
        );
        let ops = opcodes(&unit);
        // Return path, normal path and exceptional path each call the body
        assert_eq!(ops.iter().filter(|op| **op == Opcode::Gosub).count(), 3);
        assert_eq!(ops.iter().filter(|op| **op == Opcode::RetSub).count(), 1);
        assert!(ops.contains(&Opcode::Rethrow));
        assert_eq!(unit.layout.temp_count, 3);
    }

    #[test]
    fn test_break_out_of_try_closes_region() {
        let body = vec![Stmt::while_loop(
            Expr::Boolean(true),
            Stmt::block(vec![Stmt::try_stmt(
                vec![Stmt::new(StmtKind::Break(None))],
                Some(("e", vec![])),
                None,
            )]),
        )];
        let unit = compile_fn(&[], body);
        let ops = opcodes(&unit);
        let try_at = ops.iter().position(|op| *op == Opcode::Try).unwrap();
        assert_eq!(ops[try_at + 1], Opcode::EndTry);
        assert_eq!(ops[try_at + 2], Opcode::Goto);
    }

    #[test]
    fn test_illegal_break_and_continue() {
        let mut node = FunctionNode::new(None, &[], vec![Stmt::new(StmtKind::Break(None))]);
        resolve_function(&mut node);
        assert!(matches!(
            Compiler::new().compile_function(&node, "t.js"),
            Err(CompileError::IllegalBreak { label: None, .. })
        ));

        let labeled_block = Stmt::new(StmtKind::Labeled {
            label: "out".into(),
            body: Box::new(Stmt::block(vec![Stmt::new(StmtKind::Continue(Some(
                "out".into(),
            )))])),
        });
        let mut node = FunctionNode::new(None, &[], vec![labeled_block]);
        resolve_function(&mut node);
        assert!(matches!(
            Compiler::new().compile_function(&node, "t.js"),
            Err(CompileError::IllegalContinue { .. })
        ));
    }

    #[test]
    fn test_labeled_break_out_of_block() {
        let labeled_block = Stmt::new(StmtKind::Labeled {
            label: "out".into(),
            body: Box::new(Stmt::block(vec![
                Stmt::new(StmtKind::Break(Some("out".into()))),
                Stmt::expr(Expr::num(1.0)),
            ])),
        });
        let unit = compile_fn(&[], vec![labeled_block]);
        assert_eq!(opcodes(&unit)[0], Opcode::Goto);
    }

    #[test]
    fn test_switch_uses_one_temp() {
        let switch = Stmt::new(StmtKind::Switch {
            discriminant: Expr::name("x"),
            cases: vec![
                SwitchCase {
                    test: Some(Expr::num(1.0)),
                    body: vec![Stmt::new(StmtKind::Break(None))],
                },
                SwitchCase {
                    test: None,
                    body: vec![],
                },
            ],
        });
        let unit = compile_fn(&["x"], vec![switch]);
        let ops = opcodes(&unit);
        assert_eq!(ops[0], Opcode::GetVar);
        assert_eq!(ops[1], Opcode::StoreTemp);
        assert!(ops.contains(&Opcode::StrictEq));
        assert_eq!(unit.layout.temp_count, 1);
    }

    #[test]
    fn test_typeof_undeclared_name() {
        let unit = compile_fn(
            &[],
            vec![Stmt::ret(Some(Expr::unary(UnaryOp::TypeOf, Expr::name("nope"))))],
        );
        assert_eq!(opcodes(&unit)[0], Opcode::TypeOfName);
    }

    #[test]
    fn test_method_call_passes_receiver() {
        let call = Expr::call(Expr::member(Expr::name("o"), "m"), vec![Expr::num(2.0)]);
        let unit = compile_fn(&["o"], vec![Stmt::ret(Some(call))]);
        assert_eq!(
            opcodes(&unit)[..6],
            [
                Opcode::GetVar,
                Opcode::Dup,
                Opcode::GetProp,
                Opcode::Swap,
                Opcode::Short,
                Opcode::Call
            ]
        );
        assert_eq!(unit.max_call_args, 1);
        assert_eq!(unit.strings, vec!["m".to_string()]);
    }

    #[test]
    fn test_invalid_assignment_target() {
        let mut node = FunctionNode::new(
            None,
            &[],
            vec![Stmt::expr(Expr::assign(Expr::num(1.0), Expr::num(2.0))).at(7)],
        );
        resolve_function(&mut node);
        assert!(matches!(
            Compiler::new().compile_function(&node, "t.js"),
            Err(CompileError::InvalidAssignmentTarget(7))
        ));
    }

    #[test]
    fn test_catch_binds_slot_variable() {
        let try_stmt = Stmt::new(StmtKind::Try {
            block: vec![],
            handler: Some(CatchClause {
                param: Ident::new("e"),
                body: vec![],
            }),
            finalizer: None,
        });
        let unit = compile_fn(&[], vec![try_stmt]);
        assert_eq!(unit.var_names, vec!["e".to_string()]);
        let insns: Vec<_> = Instructions::new(&unit.code).map(|i| i.unwrap()).collect();
        assert!(insns.iter().any(|i| i.opcode == Opcode::SetVar && i.u16(0) == 0));
    }

    #[test]
    fn test_line_markers() {
        let unit = compile_fn(
            &[],
            vec![
                Stmt::expr(Expr::num(1.0)).at(3),
                Stmt::expr(Expr::num(2.0)).at(3),
                Stmt::expr(Expr::num(3.0)).at(4),
            ],
        );
        let lines: Vec<u16> = unit
            .instructions()
            .map(|i| i.unwrap())
            .filter(|i| i.opcode == Opcode::Line)
            .map(|i| i.u16(0))
            .collect();
        assert_eq!(lines, vec![3, 4]);
        assert_eq!(unit.first_line, 3);
    }
}
