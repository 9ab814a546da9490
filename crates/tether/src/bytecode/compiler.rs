//! Bytecode compiler for transforming the prepared AST to bytecode.
//!
//! The compiler walks the tree produced by `parse` and resolved by `prepare`, emitting
//! instructions through [`CodeBuilder`]. Functions are compiled recursively: a nested
//! body is finished before the code that defines it, so inner functions get lower ids.
//!
//! # Control flow through `try`
//!
//! There are no setup/teardown opcodes for `try`: protected ranges go into the static
//! exception table. `break`, `continue` and `return` leave blocks by unwinding the
//! compiler's block stack: every `finally` on the way is compiled inline, except blocks
//! on the way emit `ClearException`, and the protected ranges of the left `try` blocks
//! are split so the inlined code is not covered by them.

use super::{
    builder::{CodeBuilder, JumpLabel},
    code::{Code, Constant, ExceptionEntry},
    op::Opcode,
};
use crate::{
    builtins::Builtins,
    exception_private::ExcType,
    exception_public::CodeRange,
    expressions::{
        CallArgs, Comprehension, Expr, ExprLoc, FunctionDef, Identifier, Literal, NameScope, Node, Target, Try,
    },
    fstring::FStringPart,
    function::Function,
    intern::StringId,
    operators::{CmpOperator, Operator, UnaryOperator},
    parse::ParseError,
    signature::Signature,
};

/// Maximum number of positional (or keyword) arguments in one call.
///
/// `CallFunction` and `CallMethod` carry the count in a u8 operand.
const MAX_CALL_ARGS: usize = 255;

/// Result of module compilation: the module code and all compiled functions.
#[derive(Debug)]
pub(crate) struct CompileResult {
    pub code: Code,
    /// Every function in the program, indexed by function id.
    pub functions: Vec<Function>,
}

/// Compiles prepared AST nodes of one code object (the module or a function body).
pub(crate) struct Compiler<'a> {
    code: CodeBuilder,
    /// Compiled functions, indexed by their position in this vector.
    functions: Vec<Function>,
    /// Enclosing loops, `try` blocks and except handlers, innermost last.
    blocks: Vec<Block<'a>>,
    /// Values the enclosing statements keep on the operand stack: `for` iterators and a
    /// pending return value while a `finally` is inlined.
    stack_depth: u16,
    /// Number of exceptions being handled by enclosing except blocks.
    exc_depth: u16,
}

enum Block<'a> {
    Loop(LoopInfo),
    Try(TryInfo<'a>),
    /// Inside an except clause or the exceptional path of a `finally`.
    Handler,
}

struct LoopInfo {
    continue_target: usize,
    break_jumps: Vec<JumpLabel>,
    /// `for` loops keep their iterator on the stack, `break` must pop it.
    is_for: bool,
}

struct TryInfo<'a> {
    finally: Option<&'a [Node]>,
    /// Closed protected ranges.
    ranges: Vec<(usize, usize)>,
    /// Start of the range currently being protected.
    open: Option<usize>,
    stack_depth: u16,
    exc_depth: u16,
}

impl TryInfo<'_> {
    fn pause(&mut self, offset: usize) {
        if let Some(start) = self.open.take()
            && start < offset
        {
            self.ranges.push((start, offset));
        }
    }

    fn resume(&mut self, offset: usize) {
        self.open = Some(offset);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Break,
    Continue,
    Return,
}

type CompileResultOf<T = ()> = Result<T, ParseError>;

impl<'a> Compiler<'a> {
    fn new(functions: Vec<Function>) -> Self {
        Self {
            code: CodeBuilder::new(),
            functions,
            blocks: Vec::new(),
            stack_depth: 0,
            exc_depth: 0,
        }
    }

    /// Compiles module-level code.
    ///
    /// The module returns the value of its last statement when that is an expression,
    /// `None` otherwise.
    pub fn compile_module(nodes: &'a [Node], global_names: Vec<StringId>) -> CompileResultOf<CompileResult> {
        let mut compiler = Compiler::new(Vec::new());
        match nodes.split_last() {
            Some((Node::Expr(last), rest)) => {
                compiler.compile_block(rest)?;
                compiler.compile_expr(last)?;
            }
            _ => {
                compiler.compile_block(nodes)?;
                compiler.code.emit(Opcode::LoadNone);
            }
        }
        compiler.code.emit(Opcode::ReturnValue);

        let Compiler { code, functions, .. } = compiler;
        let code = code
            .build(global_names, Vec::new())
            .map_err(|msg| ParseError::syntax(msg, CodeRange::default()))?;
        log::debug!(
            "compiled module: {} bytes, {} functions",
            code.bytecode().len(),
            functions.len()
        );
        Ok(CompileResult { code, functions })
    }

    /// Compiles a function body with its own builder and block stack.
    fn compile_function_body(def: &FunctionDef, functions: Vec<Function>) -> CompileResultOf<(Function, Vec<Function>)> {
        let mut compiler = Compiler::new(functions);
        compiler.code.set_location(def.position);
        compiler.compile_block(&def.body)?;
        compiler.code.emit(Opcode::LoadNone);
        compiler.code.emit(Opcode::ReturnValue);

        let Compiler { code, functions, .. } = compiler;
        let code = code
            .build(def.scope.local_names.clone(), def.scope.cell_names.clone())
            .map_err(|msg| ParseError::syntax(msg, def.position))?;
        let params = def.params.iter().map(|param| param.name).collect();
        let defaults_count = def.params.iter().filter(|param| param.default.is_some()).count();
        let function = Function::new(
            def.name.name_id,
            Signature::new(params, defaults_count),
            code,
            def.scope.local_names.len(),
            def.scope.cell_param_slots.clone(),
            def.scope.free_var_count(),
        );
        Ok((function, functions))
    }

    fn compile_block(&mut self, nodes: &'a [Node]) -> CompileResultOf {
        for node in nodes {
            self.compile_stmt(node)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, node: &'a Node) -> CompileResultOf {
        match node {
            Node::Expr(expr) => {
                self.compile_expr(expr)?;
                self.code.emit(Opcode::Pop);
            }
            Node::Return(value, position) => {
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => {
                        self.code.set_location(*position);
                        self.code.emit(Opcode::LoadNone);
                    }
                }
                self.compile_exit(Exit::Return, *position)?;
            }
            Node::Raise(value, position) => match value {
                Some(value) => {
                    self.compile_expr(value)?;
                    self.code.set_location(*position);
                    self.code.emit(Opcode::Raise);
                }
                None => {
                    self.code.set_location(*position);
                    self.code.emit(Opcode::Reraise);
                }
            },
            Node::Assert { test, msg } => self.compile_assert(test, msg.as_ref())?,
            Node::Assign { targets, value } => {
                self.compile_expr(value)?;
                if let Some((last, rest)) = targets.split_last() {
                    for target in rest {
                        self.code.emit(Opcode::Dup);
                        self.compile_target_store(target)?;
                    }
                    self.compile_target_store(last)?;
                }
            }
            Node::OpAssign { target, op, value } => self.compile_op_assign(target, *op, value)?,
            Node::If { test, body, or_else } => {
                self.compile_expr(test)?;
                let else_jump = self.code.emit_jump(Opcode::JumpIfFalse);
                self.compile_block(body)?;
                if or_else.is_empty() {
                    self.code.patch_jump(else_jump);
                } else {
                    let end_jump = self.code.emit_jump(Opcode::Jump);
                    self.code.patch_jump(else_jump);
                    self.compile_block(or_else)?;
                    self.code.patch_jump(end_jump);
                }
            }
            Node::While { test, body, or_else } => self.compile_while(test, body, or_else)?,
            Node::For {
                target,
                iter,
                body,
                or_else,
            } => self.compile_for(target, iter, body, or_else)?,
            Node::Break(position) => self.compile_exit(Exit::Break, *position)?,
            Node::Continue(position) => self.compile_exit(Exit::Continue, *position)?,
            Node::Pass | Node::Global(..) | Node::Nonlocal(..) => {}
            Node::FunctionDef(def) => {
                self.compile_function(def)?;
                self.compile_store(&def.name);
            }
            Node::Try(try_) => self.compile_try(try_)?,
        }
        Ok(())
    }

    // ========================================================================
    // Functions
    // ========================================================================

    /// Compiles a `def` or `lambda`, leaving the function object on the stack.
    ///
    /// Defaults are evaluated at definition time in the enclosing scope.
    fn compile_function(&mut self, def: &FunctionDef) -> CompileResultOf {
        let functions = std::mem::take(&mut self.functions);
        let (function, mut functions) = Compiler::compile_function_body(def, functions)?;
        functions.push(function);
        let function_id = functions.len() - 1;
        self.functions = functions;

        let mut defaults_count = 0usize;
        for param in &def.params {
            if let Some(default) = &param.default {
                self.compile_expr(default)?;
                defaults_count += 1;
            }
        }
        let defaults_count = u8::try_from(defaults_count)
            .map_err(|_| ParseError::syntax("too many parameter defaults (limit is 255)", def.position))?;

        self.code.set_location(def.position);
        let function_id = self.code.operand_u16(function_id, "functions");
        let free_vars = &def.scope.free_var_sources;
        if free_vars.is_empty() {
            self.code.emit_u16_u8(Opcode::MakeFunction, function_id, defaults_count);
        } else {
            for source in free_vars {
                let source = self.code.operand_u16(*source, "closure variables");
                self.code.emit_u16(Opcode::LoadClosure, source);
            }
            let cell_count = u8::try_from(free_vars.len())
                .map_err(|_| ParseError::syntax("too many closure variables (limit is 255)", def.position))?;
            self.code
                .emit_u16_u8_u8(Opcode::MakeClosure, function_id, defaults_count, cell_count);
        }
        Ok(())
    }

    // ========================================================================
    // Loops and block exits
    // ========================================================================

    fn compile_while(&mut self, test: &ExprLoc, body: &'a [Node], or_else: &'a [Node]) -> CompileResultOf {
        let loop_start = self.code.current_offset();
        self.compile_expr(test)?;
        let exit_jump = self.code.emit_jump(Opcode::JumpIfFalse);

        self.blocks.push(Block::Loop(LoopInfo {
            continue_target: loop_start,
            break_jumps: Vec::new(),
            is_for: false,
        }));
        self.compile_block(body)?;
        let info = self.pop_loop();
        self.code.emit_jump_to(Opcode::Jump, loop_start);

        self.code.patch_jump(exit_jump);
        self.compile_block(or_else)?;
        for jump in info.break_jumps {
            self.code.patch_jump(jump);
        }
        Ok(())
    }

    /// Compiles a `for` loop; the iterator stays on the stack while the loop runs.
    fn compile_for(
        &mut self,
        target: &Target,
        iter: &ExprLoc,
        body: &'a [Node],
        or_else: &'a [Node],
    ) -> CompileResultOf {
        self.compile_expr(iter)?;
        self.code.set_location(iter.position);
        self.code.emit(Opcode::GetIter);
        self.stack_depth += 1;

        let loop_start = self.code.current_offset();
        let end_jump = self.code.emit_jump(Opcode::ForIter);
        self.compile_target_store(target)?;

        self.blocks.push(Block::Loop(LoopInfo {
            continue_target: loop_start,
            break_jumps: Vec::new(),
            is_for: true,
        }));
        self.compile_block(body)?;
        let info = self.pop_loop();
        self.code.emit_jump_to(Opcode::Jump, loop_start);

        // ForIter pops the exhausted iterator
        self.code.patch_jump(end_jump);
        self.stack_depth -= 1;
        self.compile_block(or_else)?;
        for jump in info.break_jumps {
            self.code.patch_jump(jump);
        }
        Ok(())
    }

    fn pop_loop(&mut self) -> LoopInfo {
        match self.blocks.pop() {
            Some(Block::Loop(info)) => info,
            _ => unreachable!("block stack out of sync: expected loop"),
        }
    }

    /// Compiles `break`, `continue` or `return` (with the return value on the stack).
    ///
    /// Leaves every block up to the target: `finally` bodies run inline, except blocks
    /// drop their exception. The blocks are restored afterwards for the code that follows.
    fn compile_exit(&mut self, exit: Exit, position: CodeRange) -> CompileResultOf {
        if exit == Exit::Return {
            self.stack_depth += 1;
        }
        let mut left = Vec::new();
        let mut found_loop = false;
        while let Some(block) = self.blocks.pop() {
            match block {
                Block::Loop(info) if exit != Exit::Return => {
                    self.blocks.push(Block::Loop(info));
                    found_loop = true;
                    break;
                }
                Block::Loop(info) => left.push(Block::Loop(info)),
                Block::Try(mut info) => {
                    info.pause(self.code.current_offset());
                    let finally = info.finally;
                    left.push(Block::Try(info));
                    if let Some(finally) = finally {
                        self.compile_block(finally)?;
                    }
                }
                Block::Handler => {
                    self.code.set_location(position);
                    self.code.emit(Opcode::ClearException);
                    self.exc_depth -= 1;
                    left.push(Block::Handler);
                }
            }
        }

        self.code.set_location(position);
        match exit {
            Exit::Return => {
                self.code.emit(Opcode::ReturnValue);
                self.stack_depth -= 1;
            }
            Exit::Break | Exit::Continue if !found_loop => {
                let msg = if exit == Exit::Break {
                    "'break' outside loop"
                } else {
                    "'continue' not properly in loop"
                };
                return Err(ParseError::syntax(msg, position));
            }
            Exit::Break => {
                let Some(Block::Loop(info)) = self.blocks.last_mut() else {
                    unreachable!("break target is not a loop")
                };
                if info.is_for {
                    self.code.emit(Opcode::Pop);
                }
                info.break_jumps.push(self.code.emit_jump(Opcode::Jump));
            }
            Exit::Continue => {
                let Some(Block::Loop(info)) = self.blocks.last() else {
                    unreachable!("continue target is not a loop")
                };
                let target = info.continue_target;
                self.code.emit_jump_to(Opcode::Jump, target);
            }
        }

        let resume_at = self.code.current_offset();
        for block in left.into_iter().rev() {
            match block {
                Block::Try(mut info) => {
                    info.resume(resume_at);
                    self.blocks.push(Block::Try(info));
                }
                Block::Handler => {
                    self.exc_depth += 1;
                    self.blocks.push(Block::Handler);
                }
                loop_block @ Block::Loop(_) => self.blocks.push(loop_block),
            }
        }
        Ok(())
    }

    // ========================================================================
    // Exceptions
    // ========================================================================

    /// `try/except/else/finally` compiles as a try-finally wrapping a try-except.
    fn compile_try(&mut self, try_: &'a Try) -> CompileResultOf {
        if try_.finally.is_empty() {
            return self.compile_try_except(try_);
        }

        self.open_try(Some(&try_.finally));
        if try_.handlers.is_empty() {
            self.compile_block(&try_.body)?;
        } else {
            self.compile_try_except(try_)?;
        }
        let info = self.close_try();

        // normal path
        self.compile_block(&try_.finally)?;
        let end_jump = self.code.emit_jump(Opcode::Jump);

        // exceptional path: the exception is on the stack and being handled
        let handler = self.code.current_offset();
        self.add_exception_entries(&info, handler);
        self.enter_handler();
        self.code.emit(Opcode::Pop);
        self.compile_block(&try_.finally)?;
        self.code.set_location(try_.position);
        self.code.emit(Opcode::Reraise);
        self.leave_handler();

        self.code.patch_jump(end_jump);
        Ok(())
    }

    fn compile_try_except(&mut self, try_: &'a Try) -> CompileResultOf {
        self.open_try(None);
        self.compile_block(&try_.body)?;
        let info = self.close_try();
        let else_jump = self.code.emit_jump(Opcode::Jump);

        let handler = self.code.current_offset();
        self.add_exception_entries(&info, handler);
        self.enter_handler();
        let mut end_jumps = Vec::with_capacity(try_.handlers.len());
        let mut last_typed = false;
        for clause in &try_.handlers {
            // stack: [exc]
            let next_clause = match &clause.exc_type {
                Some(exc_type) => {
                    self.compile_expr(exc_type)?;
                    self.code.set_location(clause.position);
                    self.code.emit(Opcode::CheckExcMatch);
                    Some(self.code.emit_jump(Opcode::JumpIfFalse))
                }
                None => None,
            };
            last_typed = next_clause.is_some();
            match &clause.name {
                Some(name) => self.compile_store(name),
                None => self.code.emit(Opcode::Pop),
            }
            self.compile_block(&clause.body)?;
            self.code.emit(Opcode::ClearException);
            end_jumps.push(self.code.emit_jump(Opcode::Jump));
            if let Some(next_clause) = next_clause {
                self.code.patch_jump(next_clause);
            }
        }
        if last_typed {
            self.code.set_location(try_.position);
            self.code.emit(Opcode::Reraise);
        }
        self.leave_handler();

        self.code.patch_jump(else_jump);
        self.compile_block(&try_.or_else)?;
        for jump in end_jumps {
            self.code.patch_jump(jump);
        }
        Ok(())
    }

    fn open_try(&mut self, finally: Option<&'a [Node]>) {
        self.blocks.push(Block::Try(TryInfo {
            finally,
            ranges: Vec::new(),
            open: Some(self.code.current_offset()),
            stack_depth: self.stack_depth,
            exc_depth: self.exc_depth,
        }));
    }

    fn close_try(&mut self) -> TryInfo<'a> {
        match self.blocks.pop() {
            Some(Block::Try(mut info)) => {
                info.pause(self.code.current_offset());
                info
            }
            _ => unreachable!("block stack out of sync: expected try"),
        }
    }

    fn add_exception_entries(&mut self, info: &TryInfo<'_>, handler: usize) {
        // code size is checked against u32 when the builder finishes
        let offset = |value: usize| u32::try_from(value).unwrap_or(u32::MAX);
        for &(start, end) in &info.ranges {
            self.code.add_exception_entry(ExceptionEntry {
                start: offset(start),
                end: offset(end),
                handler: offset(handler),
                stack_depth: info.stack_depth,
                exc_depth: info.exc_depth,
            });
        }
    }

    fn enter_handler(&mut self) {
        self.exc_depth += 1;
        self.blocks.push(Block::Handler);
    }

    fn leave_handler(&mut self) {
        match self.blocks.pop() {
            Some(Block::Handler) => self.exc_depth -= 1,
            _ => unreachable!("block stack out of sync: expected handler"),
        }
    }

    fn compile_assert(&mut self, test: &ExprLoc, msg: Option<&ExprLoc>) -> CompileResultOf {
        self.compile_expr(test)?;
        let skip_jump = self.code.emit_jump(Opcode::JumpIfTrue);

        let exc_idx = self
            .code
            .add_const(Constant::Builtin(Builtins::ExcType(ExcType::AssertionError)));
        self.code.emit_u16(Opcode::LoadConst, exc_idx);
        if let Some(msg) = msg {
            self.compile_expr(msg)?;
            self.code.set_location(test.position);
            self.code.emit_u8(Opcode::CallFunction, 1);
        } else {
            self.code.emit_u8(Opcode::CallFunction, 0);
        }
        self.code.emit(Opcode::Raise);
        self.code.patch_jump(skip_jump);
        Ok(())
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    fn compile_name(&mut self, ident: &Identifier) {
        self.code.set_location(ident.position);
        let slot = self.code.operand_u16(ident.namespace_id().index(), "variables");
        match ident.scope {
            NameScope::Local => self.code.emit_load_local(slot),
            NameScope::Global => self.code.emit_u16(Opcode::LoadGlobal, slot),
            NameScope::Cell => self.code.emit_u16(Opcode::LoadCell, slot),
        }
    }

    fn compile_store(&mut self, ident: &Identifier) {
        let slot = self.code.operand_u16(ident.namespace_id().index(), "variables");
        match ident.scope {
            NameScope::Local => self.code.emit_store_local(slot),
            NameScope::Global => self.code.emit_u16(Opcode::StoreGlobal, slot),
            NameScope::Cell => self.code.emit_u16(Opcode::StoreCell, slot),
        }
    }

    /// Stores the value on top of the stack into `target`.
    fn compile_target_store(&mut self, target: &Target) -> CompileResultOf {
        match target {
            Target::Name(ident) => self.compile_store(ident),
            Target::Tuple(items, position) => {
                let count = u8::try_from(items.len())
                    .map_err(|_| ParseError::syntax("too many targets in unpacking (limit is 255)", *position))?;
                self.code.set_location(*position);
                self.code.emit_u8(Opcode::UnpackSequence, count);
                for item in items {
                    self.compile_target_store(item)?;
                }
            }
            Target::Subscript {
                object,
                index,
                position,
            } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.code.set_location(*position);
                self.code.emit(Opcode::StoreSubscr);
            }
            Target::Attr {
                object,
                attr,
                position,
            } => {
                self.compile_expr(object)?;
                self.code.set_location(*position);
                let name = self.code.operand_u16(attr.index(), "names");
                self.code.emit_u16(Opcode::StoreAttr, name);
            }
        }
        Ok(())
    }

    fn compile_op_assign(&mut self, target: &Target, op: Operator, value: &ExprLoc) -> CompileResultOf {
        let inplace = operator_to_inplace_opcode(op);
        match target {
            Target::Name(ident) => {
                self.compile_name(ident);
                self.compile_expr(value)?;
                self.code.set_location(ident.position);
                self.code.emit(inplace);
                self.compile_store(ident);
            }
            Target::Subscript {
                object,
                index,
                position,
            } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.code.set_location(*position);
                self.code.emit(Opcode::DupTwo);
                self.code.emit(Opcode::BinarySubscr);
                self.compile_expr(value)?;
                self.code.set_location(*position);
                self.code.emit(inplace);
                // [obj, index, result] -> [result, obj, index]
                self.code.emit(Opcode::Rot3);
                self.code.emit(Opcode::StoreSubscr);
            }
            Target::Attr {
                object,
                attr,
                position,
            } => {
                let name = self.code.operand_u16(attr.index(), "names");
                self.compile_expr(object)?;
                self.code.set_location(*position);
                self.code.emit(Opcode::Dup);
                self.code.emit_u16(Opcode::LoadAttr, name);
                self.compile_expr(value)?;
                self.code.set_location(*position);
                self.code.emit(inplace);
                self.code.emit(Opcode::Rot2);
                self.code.emit_u16(Opcode::StoreAttr, name);
            }
            Target::Tuple(_, position) => {
                return Err(ParseError::syntax(
                    "'tuple' is an illegal expression for augmented assignment",
                    *position,
                ));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn compile_expr(&mut self, expr_loc: &ExprLoc) -> CompileResultOf {
        let position = expr_loc.position;
        self.code.set_location(position);
        match &expr_loc.expr {
            Expr::Literal(literal) => self.compile_literal(literal),
            Expr::Builtin(builtin) => {
                let idx = self.code.add_const(Constant::Builtin(*builtin));
                self.code.emit_u16(Opcode::LoadConst, idx);
            }
            Expr::Name(ident) => self.compile_name(ident),
            Expr::Call { callable, args } => {
                self.compile_expr(callable)?;
                self.compile_call_args(args, position)?;
                self.code.set_location(position);
                let pos_count = call_arg_count(args.args.len(), position)?;
                if args.kwargs.is_empty() {
                    self.code.emit_u8(Opcode::CallFunction, pos_count);
                } else {
                    let names: Vec<StringId> = args.kwargs.iter().map(|(name, _)| *name).collect();
                    self.code.emit_call_function_kw(pos_count, &names);
                }
            }
            Expr::AttrCall { object, attr, args } => {
                self.compile_expr(object)?;
                self.compile_call_args(args, position)?;
                self.code.set_location(position);
                let pos_count = call_arg_count(args.args.len(), position)?;
                let name = self.code.operand_u16(attr.index(), "names");
                if args.kwargs.is_empty() {
                    self.code.emit_u16_u8(Opcode::CallMethod, name, pos_count);
                } else {
                    let names: Vec<StringId> = args.kwargs.iter().map(|(name, _)| *name).collect();
                    self.code.emit_call_method_kw(name, pos_count, &names);
                }
            }
            Expr::Attr { object, attr } => {
                self.compile_expr(object)?;
                self.code.set_location(position);
                let name = self.code.operand_u16(attr.index(), "names");
                self.code.emit_u16(Opcode::LoadAttr, name);
            }
            Expr::Op { left, op, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.code.set_location(position);
                self.code.emit(operator_to_opcode(*op));
            }
            Expr::CmpOp { left, ops } => self.compile_compare_chain(left, ops, position)?,
            Expr::And(left, right) => {
                self.compile_expr(left)?;
                let end_jump = self.code.emit_jump(Opcode::JumpIfFalseOrPop);
                self.compile_expr(right)?;
                self.code.patch_jump(end_jump);
            }
            Expr::Or(left, right) => {
                self.compile_expr(left)?;
                let end_jump = self.code.emit_jump(Opcode::JumpIfTrueOrPop);
                self.compile_expr(right)?;
                self.code.patch_jump(end_jump);
            }
            Expr::Not(operand) => {
                self.compile_expr(operand)?;
                self.code.set_location(position);
                self.code.emit(Opcode::UnaryNot);
            }
            Expr::Unary { op, operand } => {
                self.compile_expr(operand)?;
                self.code.set_location(position);
                self.code.emit(match op {
                    UnaryOperator::Neg => Opcode::UnaryNeg,
                    UnaryOperator::Pos => Opcode::UnaryPos,
                    UnaryOperator::Invert => Opcode::UnaryInvert,
                });
            }
            Expr::List(items) => {
                self.compile_items(items)?;
                let count = self.code.operand_u16(items.len(), "list items");
                self.code.set_location(position);
                self.code.emit_u16(Opcode::BuildList, count);
            }
            Expr::Tuple(items) => {
                self.compile_items(items)?;
                let count = self.code.operand_u16(items.len(), "tuple items");
                self.code.set_location(position);
                self.code.emit_u16(Opcode::BuildTuple, count);
            }
            Expr::Dict(pairs) => {
                for (key, value) in pairs {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                let count = self.code.operand_u16(pairs.len(), "dict items");
                self.code.set_location(position);
                self.code.emit_u16(Opcode::BuildDict, count);
            }
            Expr::Subscript { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.code.set_location(position);
                self.code.emit(Opcode::BinarySubscr);
            }
            Expr::Slice { lower, upper, step } => {
                for part in [lower, upper, step] {
                    match part {
                        Some(part) => self.compile_expr(part)?,
                        None => self.code.emit(Opcode::LoadNone),
                    }
                }
                self.code.set_location(position);
                self.code.emit(Opcode::BuildSlice);
            }
            Expr::FString(parts) => self.compile_fstring(parts, position)?,
            Expr::IfElse { test, body, orelse } => {
                self.compile_expr(test)?;
                let else_jump = self.code.emit_jump(Opcode::JumpIfFalse);
                self.compile_expr(body)?;
                let end_jump = self.code.emit_jump(Opcode::Jump);
                self.code.patch_jump(else_jump);
                self.compile_expr(orelse)?;
                self.code.patch_jump(end_jump);
            }
            Expr::Lambda(def) => self.compile_function(def)?,
            Expr::ListComp { elt, generators } => {
                self.code.emit_u16(Opcode::BuildList, 0);
                let depth = comprehension_depth(generators, position)?;
                self.compile_comprehension_generators(generators, 0, |compiler| {
                    compiler.compile_expr(elt)?;
                    compiler.code.emit_u8(Opcode::ListAppend, depth);
                    Ok(())
                })?;
            }
            Expr::DictComp { key, value, generators } => {
                self.code.emit_u16(Opcode::BuildDict, 0);
                let depth = comprehension_depth(generators, position)?;
                self.compile_comprehension_generators(generators, 0, |compiler| {
                    compiler.compile_expr(key)?;
                    compiler.compile_expr(value)?;
                    compiler.code.set_location(position);
                    compiler.code.emit_u8(Opcode::DictSetItem, depth);
                    Ok(())
                })?;
            }
            Expr::Await(value) => {
                self.compile_expr(value)?;
                self.code.set_location(position);
                self.code.emit(Opcode::Await);
            }
        }
        Ok(())
    }

    fn compile_literal(&mut self, literal: &Literal) {
        match literal {
            Literal::None => self.code.emit(Opcode::LoadNone),
            Literal::Bool(true) => self.code.emit(Opcode::LoadTrue),
            Literal::Bool(false) => self.code.emit(Opcode::LoadFalse),
            Literal::Int(i) => match i8::try_from(*i) {
                Ok(small) => self.code.emit_i8(Opcode::LoadSmallInt, small),
                Err(_) => {
                    let idx = self.code.add_const(Constant::Int(*i));
                    self.code.emit_u16(Opcode::LoadConst, idx);
                }
            },
            Literal::LongInt(big) => {
                let idx = self.code.add_const(Constant::LongInt(big.clone()));
                self.code.emit_u16(Opcode::LoadConst, idx);
            }
            Literal::Float(f) => {
                let idx = self.code.add_const(Constant::Float(*f));
                self.code.emit_u16(Opcode::LoadConst, idx);
            }
            Literal::Str(id) => {
                let idx = self.code.add_const(Constant::Str(*id));
                self.code.emit_u16(Opcode::LoadConst, idx);
            }
        }
    }

    fn compile_items(&mut self, items: &[ExprLoc]) -> CompileResultOf {
        for item in items {
            self.compile_expr(item)?;
        }
        Ok(())
    }

    /// Pushes positional arguments, then keyword argument values in call order.
    fn compile_call_args(&mut self, args: &CallArgs, position: CodeRange) -> CompileResultOf {
        call_arg_count(args.kwargs.len(), position)?;
        self.compile_items(&args.args)?;
        for (_, value) in &args.kwargs {
            self.compile_expr(value)?;
        }
        Ok(())
    }

    /// `a < b < c`: each middle operand is evaluated once, the chain stops at the first
    /// false comparison.
    ///
    /// ```text
    ///   a; b; Dup; Rot3; CompareLt; JumpIfFalseOrPop cleanup
    ///   c; CompareLt; Jump end
    /// cleanup:
    ///   Rot2; Pop
    /// end:
    /// ```
    fn compile_compare_chain(
        &mut self,
        left: &ExprLoc,
        ops: &[(CmpOperator, ExprLoc)],
        position: CodeRange,
    ) -> CompileResultOf {
        self.compile_expr(left)?;
        let Some(((last_op, last_right), rest)) = ops.split_last() else {
            return Ok(());
        };
        let mut cleanup_jumps = Vec::with_capacity(rest.len());
        for (op, right) in rest {
            self.compile_expr(right)?;
            self.code.set_location(position);
            self.code.emit(Opcode::Dup);
            self.code.emit(Opcode::Rot3);
            self.code.emit(cmp_operator_to_opcode(*op));
            cleanup_jumps.push(self.code.emit_jump(Opcode::JumpIfFalseOrPop));
        }
        self.compile_expr(last_right)?;
        self.code.set_location(position);
        self.code.emit(cmp_operator_to_opcode(*last_op));
        if !cleanup_jumps.is_empty() {
            let end_jump = self.code.emit_jump(Opcode::Jump);
            for jump in cleanup_jumps {
                self.code.patch_jump(jump);
            }
            self.code.emit(Opcode::Rot2);
            self.code.emit(Opcode::Pop);
            self.code.patch_jump(end_jump);
        }
        Ok(())
    }

    fn compile_fstring(&mut self, parts: &[FStringPart], position: CodeRange) -> CompileResultOf {
        for part in parts {
            match part {
                FStringPart::Literal(id) => {
                    let idx = self.code.add_const(Constant::Str(*id));
                    self.code.emit_u16(Opcode::LoadConst, idx);
                }
                FStringPart::Interpolation {
                    expr,
                    conversion,
                    format_spec,
                } => {
                    self.compile_expr(expr)?;
                    let spec = format_spec
                        .as_ref()
                        .map(|spec| self.code.add_const(Constant::FormatSpec(spec.clone())));
                    self.code.set_location(expr.position);
                    self.code.emit_format_value(conversion.to_bits(), spec);
                }
            }
        }
        if parts.len() != 1 {
            let count = self.code.operand_u16(parts.len(), "f-string parts");
            self.code.set_location(position);
            self.code.emit_u16(Opcode::BuildFString, count);
        }
        Ok(())
    }

    /// Recursively compiles the `for`/`if` clauses of a comprehension.
    ///
    /// Each level keeps its iterator on the stack, so the innermost body reaches the
    /// result collection at `depth` entries below the value it adds.
    fn compile_comprehension_generators(
        &mut self,
        generators: &[Comprehension],
        index: usize,
        body_fn: impl FnOnce(&mut Self) -> CompileResultOf,
    ) -> CompileResultOf {
        let generator = &generators[index];
        self.compile_expr(&generator.iter)?;
        self.code.emit(Opcode::GetIter);

        let loop_start = self.code.current_offset();
        let end_jump = self.code.emit_jump(Opcode::ForIter);
        self.compile_target_store(&generator.target)?;

        for cond in &generator.ifs {
            self.compile_expr(cond)?;
            self.code.emit_jump_to(Opcode::JumpIfFalse, loop_start);
        }

        if index + 1 < generators.len() {
            self.compile_comprehension_generators(generators, index + 1, body_fn)?;
        } else {
            body_fn(self)?;
        }

        self.code.emit_jump_to(Opcode::Jump, loop_start);
        self.code.patch_jump(end_jump);
        Ok(())
    }
}

fn call_arg_count(count: usize, position: CodeRange) -> CompileResultOf<u8> {
    if count > MAX_CALL_ARGS {
        return Err(ParseError::syntax(
            format!("too many arguments in call (limit is {MAX_CALL_ARGS})"),
            position,
        ));
    }
    u8::try_from(count).map_err(|_| ParseError::syntax("too many arguments in call", position))
}

fn comprehension_depth(generators: &[Comprehension], position: CodeRange) -> CompileResultOf<u8> {
    u8::try_from(generators.len())
        .map_err(|_| ParseError::syntax("too many nested 'for' clauses in comprehension", position))
}

fn operator_to_opcode(op: Operator) -> Opcode {
    match op {
        Operator::Add => Opcode::BinaryAdd,
        Operator::Sub => Opcode::BinarySub,
        Operator::Mult => Opcode::BinaryMul,
        Operator::Div => Opcode::BinaryDiv,
        Operator::FloorDiv => Opcode::BinaryFloorDiv,
        Operator::Mod => Opcode::BinaryMod,
        Operator::Pow => Opcode::BinaryPow,
        Operator::LShift => Opcode::BinaryLShift,
        Operator::RShift => Opcode::BinaryRShift,
        Operator::BitAnd => Opcode::BinaryAnd,
        Operator::BitOr => Opcode::BinaryOr,
        Operator::BitXor => Opcode::BinaryXor,
    }
}

/// Maps an `Operator` to its in-place (augmented assignment) `Opcode`.
fn operator_to_inplace_opcode(op: Operator) -> Opcode {
    match op {
        Operator::Add => Opcode::InplaceAdd,
        Operator::Sub => Opcode::InplaceSub,
        Operator::Mult => Opcode::InplaceMul,
        Operator::Div => Opcode::InplaceDiv,
        Operator::FloorDiv => Opcode::InplaceFloorDiv,
        Operator::Mod => Opcode::InplaceMod,
        Operator::Pow => Opcode::InplacePow,
        Operator::LShift => Opcode::InplaceLShift,
        Operator::RShift => Opcode::InplaceRShift,
        Operator::BitAnd => Opcode::InplaceAnd,
        Operator::BitOr => Opcode::InplaceOr,
        Operator::BitXor => Opcode::InplaceXor,
    }
}

fn cmp_operator_to_opcode(op: CmpOperator) -> Opcode {
    match op {
        CmpOperator::Eq => Opcode::CompareEq,
        CmpOperator::NotEq => Opcode::CompareNe,
        CmpOperator::Lt => Opcode::CompareLt,
        CmpOperator::LtE => Opcode::CompareLe,
        CmpOperator::Gt => Opcode::CompareGt,
        CmpOperator::GtE => Opcode::CompareGe,
        CmpOperator::Is => Opcode::CompareIs,
        CmpOperator::IsNot => Opcode::CompareIsNot,
        CmpOperator::In => Opcode::CompareIn,
        CmpOperator::NotIn => Opcode::CompareNotIn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{intern::InternerBuilder, parse::parse, prepare::prepare};

    fn compile(source: &str) -> Result<(CompileResult, InternerBuilder), ParseError> {
        let mut interner = InternerBuilder::new();
        let mut nodes = parse(source, &mut interner)?;
        let scope = prepare(&mut nodes, &interner, &[], &[])?;
        let result = Compiler::compile_module(&nodes, scope.global_names)?;
        Ok((result, interner))
    }

    #[test]
    fn module_returns_last_expression() {
        let (result, _) = compile("1 + 2").unwrap();
        assert_eq!(
            result.code.bytecode(),
            &[
                Opcode::LoadSmallInt as u8,
                1,
                Opcode::LoadSmallInt as u8,
                2,
                Opcode::BinaryAdd as u8,
                Opcode::ReturnValue as u8,
            ]
        );
    }

    #[test]
    fn module_ending_in_statement_returns_none() {
        let (result, _) = compile("x = 1").unwrap();
        let bytes = result.code.bytecode();
        assert_eq!(
            &bytes[bytes.len() - 2..],
            &[Opcode::LoadNone as u8, Opcode::ReturnValue as u8]
        );
    }

    #[test]
    fn try_except_adds_exception_entry() {
        let (result, _) = compile("try:\n    x = 1\nexcept ValueError:\n    x = 2\n").unwrap();
        let table = result.code.exception_table();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].stack_depth, 0);
        assert_eq!(table[0].exc_depth, 0);
        assert!(table[0].start < table[0].end && table[0].end <= table[0].handler);
    }

    #[test]
    fn try_inside_for_loop_keeps_iterator() {
        let (result, _) = compile("for i in [1]:\n    try:\n        pass\n        x = i\n    except:\n        pass\n").unwrap();
        let table = result.code.exception_table();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].stack_depth, 1);
    }

    #[test]
    fn inner_try_entries_come_first() {
        let source = "try:\n    try:\n        x = 1\n    except KeyError:\n        x = 2\nexcept ValueError:\n    x = 3\n";
        let (result, _) = compile(source).unwrap();
        let table = result.code.exception_table();
        assert_eq!(table.len(), 2);
        assert!(table[1].start <= table[0].start && table[0].end <= table[1].end);
        assert!(table[0].handler < table[1].handler);
    }

    #[test]
    fn return_through_finally_splits_the_protected_range() {
        let source = "def f():\n    try:\n        return 1\n    finally:\n        x = 2\n";
        let (result, _) = compile(source).unwrap();
        let table = result.functions[0].code.exception_table();
        assert_eq!(table.len(), 1);
        // the inlined finally and the return follow the protected range
        assert!(table[0].end < table[0].handler);
    }

    #[test]
    fn except_handler_depth_is_recorded() {
        let source = "try:\n    x = 1\nexcept:\n    try:\n        x = 2\n    except:\n        x = 3\n";
        let (result, _) = compile(source).unwrap();
        let table = result.code.exception_table();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].exc_depth, 0);
        assert_eq!(table[1].exc_depth, 1);
    }

    #[test]
    fn nested_functions_are_compiled_first() {
        let source = "def outer():\n    def inner():\n        return 1\n    return inner\n";
        let (result, interner) = compile(source).unwrap();
        let names: Vec<&str> = result
            .functions
            .iter()
            .map(|function| interner.get_str(function.name))
            .collect();
        assert_eq!(names, ["inner", "outer"]);
    }

    #[test]
    fn closures_record_free_variables() {
        let source = "def f():\n    x = 1\n    def g():\n        return x\n    return g\n";
        let (result, _) = compile(source).unwrap();
        assert!(result.functions[0].is_closure());
        assert!(!result.functions[1].is_closure());
        assert_eq!(result.functions[1].cell_param_slots, vec![None]);
    }

    #[test]
    fn defaults_are_counted() {
        let (result, _) = compile("def f(a, b=1, c=2):\n    return a\n").unwrap();
        assert_eq!(result.functions[0].signature.param_count(), 3);
        assert_eq!(result.functions[0].signature.defaults_count(), 2);
    }

    #[test]
    fn too_many_call_arguments() {
        let args = vec!["0"; 256].join(", ");
        let err = compile(&format!("print({args})")).unwrap_err();
        assert_eq!(err.message(), "too many arguments in call (limit is 255)");
    }
}
