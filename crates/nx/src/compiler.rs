//! Bytecode compiler: walks a parsed (and resolver-validated) [`crate::ast::Root`] and
//! emits a [`Chunk`] per function.
//!
//! One `FunctionCompiler` frame per nested function, pushed/popped recursively — the same
//! single-pass "resolve locals and emit at the same time" shape `original_source/compiler2.c`
//! uses, rather than threading a side table of pre-resolved slots from [`crate::resolve`]
//! through to emission. Name operands (`GET_GLOBAL`, `GET_PROPERTY`, `METHOD`, ...) are
//! constant-pool indices pointing at heap-allocated strings, matching `original_source/
//! compiler2.c`'s `identifierConstant` helper.

use std::rc::Rc;

use crate::ast::*;
use crate::chunk::{Chunk, Opcode};
use crate::error::CompileError;
use crate::heap::{Heap, HeapId};
use crate::intern::Interns;
use crate::object::{HeapData, ObjFunction, ObjString, UpvalueSource};

const MAX_LOCALS: usize = 255;
const MAX_JUMP: usize = u16::MAX as usize;

struct Local {
    name: Name,
    depth: i32,
    is_const: bool,
    captured: bool,
}

struct LoopCtx {
    loop_start: usize,
    break_jumps: Vec<usize>,
    local_depth_at_start: usize,
}

struct ClassCtx {
    has_base: bool,
}

struct FunctionFrame {
    function_name: Option<Name>,
    kind: FnKind,
    chunk: Chunk,
    arity: u8,
    locals: Vec<Local>,
    scope_depth: i32,
    upvalues: Vec<UpvalueSource>,
    loops: Vec<LoopCtx>,
}

impl FunctionFrame {
    fn new(function_name: Option<Name>, kind: FnKind) -> Self {
        // Slot 0 is reserved for the receiver (`this`) in methods/ctors, or the called
        // closure itself for plain functions — mirroring the teacher's "slot zero is
        // always occupied" call-frame convention.
        let reserved_name: Name = if matches!(kind, FnKind::Method | FnKind::Constructor) { Rc::from("this") } else { Rc::from("") };
        Self {
            function_name,
            kind,
            chunk: Chunk::new(),
            arity: 0,
            locals: vec![Local { name: reserved_name, depth: 0, is_const: true, captured: false }],
            scope_depth: 0,
            upvalues: Vec::new(),
            loops: Vec::new(),
        }
    }
}

enum VarLoc {
    Local(u16),
    Upvalue(u16),
    Global,
}

pub struct Compiler<'h> {
    frames: Vec<FunctionFrame>,
    classes: Vec<ClassCtx>,
    heap: &'h mut Heap,
    interns: &'h mut Interns,
    /// The module every [`ObjFunction`] produced by this compile pass resolves its free
    /// global names against — see `ObjFunction::globals`.
    globals: HeapId,
    pub errors: CompileError,
}

impl<'h> Compiler<'h> {
    pub fn new(heap: &'h mut Heap, interns: &'h mut Interns, globals: HeapId) -> Self {
        Self { frames: vec![FunctionFrame::new(None, FnKind::Module)], classes: Vec::new(), heap, interns, globals, errors: CompileError::default() }
    }

    pub fn compile(mut self, root: &Root) -> Result<Rc<ObjFunction>, CompileError> {
        for node in &root.body {
            self.compile_node(node);
        }
        let frame = self.frames.pop().unwrap();
        let function =
            Rc::new(ObjFunction { name: None, arity: 0, upvalue_count: frame.upvalues.len() as u8, kind: FnKind::Module, chunk: frame.chunk, globals: self.globals });
        if self.errors.is_empty() {
            Ok(function)
        } else {
            Err(self.errors)
        }
    }

    fn frame(&mut self) -> &mut FunctionFrame {
        self.frames.last_mut().unwrap()
    }

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.frame().chunk
    }

    fn emit(&mut self, op: Opcode, span: SourceSpan) {
        self.chunk().write_op(op, span);
    }

    fn emit_word(&mut self, word: u16, span: SourceSpan) {
        self.chunk().write(word, span);
    }

    /// Adds `value` to the current chunk's constant pool, reporting a compile error and
    /// returning a dummy index instead of panicking when the pool is already full.
    fn add_constant(&mut self, value: crate::value::Value, span: SourceSpan) -> u16 {
        match self.chunk().add_constant(value) {
            Some(idx) => idx,
            None => {
                self.errors.push(span, "too many constants in one chunk (max 65535)".to_string());
                0
            }
        }
    }

    /// Interns `name` as a heap string and adds it to the current chunk's constant pool,
    /// returning the index used as a `GET_GLOBAL`/`GET_PROPERTY`/`METHOD`/... name operand.
    fn name_constant(&mut self, name: &str) -> u16 {
        let id = self.heap.allocate(HeapData::Str(ObjString::new(name)));
        let span = SourceSpan { start: 0, end: 0, line: 0 };
        self.add_constant(crate::value::Value::Ref(id), span)
    }

    fn emit_jump(&mut self, op: Opcode, span: SourceSpan) -> usize {
        self.emit(op, span);
        self.chunk().write_placeholder(span)
    }

    fn patch_jump(&mut self, index: usize) {
        let target = self.chunk().len();
        if target > MAX_JUMP {
            self.errors.push(SourceSpan { start: 0, end: 0, line: 0 }, "jump distance exceeds 65535 words".to_string());
        }
        self.chunk().patch(index, target as u16);
    }

    fn emit_loop(&mut self, loop_start: usize, span: SourceSpan) {
        self.emit(Opcode::Loop, span);
        let offset = self.chunk().len() - loop_start + 1;
        if offset > MAX_JUMP {
            self.errors.push(span, "loop body too large (backward jump exceeds 65535 words)".to_string());
        }
        self.chunk().write(offset as u16, span);
    }

    /// Emits a collection literal's element count, reporting a compile error instead of
    /// truncating when the literal has more than 65535 elements.
    fn emit_count(&mut self, count: usize, span: SourceSpan) {
        if count > MAX_JUMP {
            self.errors.push(span, "collection literal has more than 65535 items".to_string());
        }
        self.emit_word(count as u16, span);
    }

    // --- scopes & locals ---

    fn begin_scope(&mut self) {
        self.frame().scope_depth += 1;
    }

    fn end_scope(&mut self, span: SourceSpan) {
        self.frame().scope_depth -= 1;
        let depth = self.frame().scope_depth;
        while let Some(local) = self.frame().locals.last() {
            if local.depth <= depth {
                break;
            }
            let captured = self.frame().locals.last().unwrap().captured;
            self.frame().locals.pop();
            if captured {
                self.emit(Opcode::CloseUpvalue, span);
            } else {
                self.emit(Opcode::Pop, span);
            }
        }
    }

    fn declare_local(&mut self, name: &Name, is_const: bool) -> u16 {
        let depth = self.frame().scope_depth;
        if self.frame().locals.len() >= MAX_LOCALS {
            self.errors.push(SourceSpan { start: 0, end: 0, line: 0 }, "too many local variables in one function".to_string());
        }
        self.frame().locals.push(Local { name: name.clone(), depth, is_const, captured: false });
        (self.frame().locals.len() - 1) as u16
    }

    fn resolve_local(&self, frame_index: usize, name: &Name) -> Option<(u16, bool)> {
        self.frames[frame_index].locals.iter().enumerate().rev().find(|(_, l)| &l.name == name).map(|(i, l)| (i as u16, l.is_const))
    }

    fn resolve_upvalue(&mut self, frame_index: usize, name: &Name) -> Option<u16> {
        if frame_index == 0 {
            return None;
        }
        if let Some((slot, _)) = self.resolve_local(frame_index - 1, name) {
            self.frames[frame_index - 1].locals[slot as usize].captured = true;
            return Some(self.add_upvalue(frame_index, UpvalueSource::Local(slot)));
        }
        if let Some(idx) = self.resolve_upvalue(frame_index - 1, name) {
            return Some(self.add_upvalue(frame_index, UpvalueSource::Upvalue(idx)));
        }
        None
    }

    fn add_upvalue(&mut self, frame_index: usize, source: UpvalueSource) -> u16 {
        let frame = &mut self.frames[frame_index];
        if let Some(existing) = frame.upvalues.iter().position(|u| *u == source) {
            return existing as u16;
        }
        frame.upvalues.push(source);
        (frame.upvalues.len() - 1) as u16
    }

    fn resolve_var(&mut self, name: &Name) -> VarLoc {
        let top = self.frames.len() - 1;
        if let Some((slot, _)) = self.resolve_local(top, name) {
            return VarLoc::Local(slot);
        }
        if let Some(idx) = self.resolve_upvalue(top, name) {
            return VarLoc::Upvalue(idx);
        }
        VarLoc::Global
    }

    // --- declarations ---

    fn compile_node(&mut self, node: &Node) {
        match node {
            Node::Decl(decl) => self.compile_decl(decl),
            Node::Stmt(stmt) => self.compile_stmt(stmt),
        }
    }

    fn compile_decl(&mut self, decl: &Decl) {
        match decl {
            Decl::Fn(f) => self.compile_fn_decl(f),
            Decl::Class(c) => self.compile_class_decl(c),
            Decl::Variable { is_const, target, init, span } => self.compile_var_decl(*is_const, target, init.as_ref(), *span),
        }
    }

    fn compile_fn_decl(&mut self, f: &FnDecl) {
        let name = f.name.clone().unwrap();
        let is_global = self.frame().scope_depth == 0;
        let slot = if is_global { 0 } else { self.declare_local(&name, false) };
        self.compile_function(f, FnKind::Function, Some(name.clone()));
        if is_global {
            let n = self.name_constant(&name);
            self.emit(Opcode::DefineGlobal, f.span);
            self.emit_word(n, f.span);
        } else {
            let _ = slot; // closure already sits in the local's slot from compile_function's push
        }
    }

    /// Compiles `f` as a nested function, leaving its closure value on the enclosing
    /// frame's stack.
    fn compile_function(&mut self, f: &FnDecl, kind: FnKind, name: Option<Name>) {
        self.frames.push(FunctionFrame::new(name.clone(), kind));
        self.begin_scope();
        for param in &f.params.params {
            self.declare_local(&param.name, false);
        }
        for node in &f.body {
            self.compile_node(node);
        }
        let end_span = f.span;
        self.emit(Opcode::Nil, end_span);
        self.emit(Opcode::Return, end_span);

        let frame = self.frames.pop().unwrap();
        let arity = f.params.params.len() as u8;
        let upvalue_count = frame.upvalues.len() as u8;
        let name_id = name.map(|n| self.interns.intern(n.as_ref()));
        let function = Rc::new(ObjFunction { name: name_id, arity, upvalue_count, kind, chunk: frame.chunk, globals: self.globals });
        let fn_id = self.heap.allocate(HeapData::Function(function));
        let const_index = self.add_constant(crate::value::Value::Ref(fn_id), f.span);

        self.emit(Opcode::Closure, f.span);
        self.emit_word(const_index, f.span);
        self.emit_word(upvalue_count as u16, f.span);
        for upvalue in &frame.upvalues {
            let (is_local, index) = match upvalue {
                UpvalueSource::Local(i) => (1u16, *i),
                UpvalueSource::Upvalue(i) => (0u16, *i),
            };
            self.emit_word(is_local, f.span);
            self.emit_word(index, f.span);
        }
    }

    fn compile_class_decl(&mut self, c: &ClassDecl) {
        let name_const = self.name_constant(&c.name);
        self.emit(Opcode::Class, c.span);
        self.emit_word(name_const, c.span);

        let is_global = self.frame().scope_depth == 0;
        if is_global {
            self.emit(Opcode::DefineGlobal, c.span);
            self.emit_word(name_const, c.span);
            self.emit(Opcode::GetGlobal, c.span);
            self.emit_word(name_const, c.span);
        } else {
            self.declare_local(&c.name, false);
        }

        let has_base = c.base_name.is_some();
        if let Some(base_name) = &c.base_name {
            self.compile_variable_get(&Id { name: base_name.clone(), span: c.span });
            self.emit(Opcode::Inherit, c.span);
        }

        self.classes.push(ClassCtx { has_base });

        if let Some(ctor) = &c.ctor {
            self.compile_function(ctor, FnKind::Constructor, ctor.name.clone());
            let n = self.name_constant("ctor");
            self.emit(Opcode::Method, ctor.span);
            self.emit_word(n, ctor.span);
            self.emit_word(0, ctor.span);
        }
        for method in &c.methods {
            let method_name = method.name.clone().unwrap();
            self.compile_function(method, FnKind::Method, Some(method_name.clone()));
            let n = self.name_constant(&method_name);
            self.emit(Opcode::Method, method.span);
            self.emit_word(n, method.span);
            self.emit_word(0, method.span);
        }

        self.classes.pop();
        self.emit(Opcode::Finalize, c.span);
        self.emit(Opcode::Pop, c.span); // drop the class value duplicated for global def above
    }

    fn compile_var_decl(&mut self, is_const: bool, target: &VarTarget, init: Option<&Expr>, span: SourceSpan) {
        if let Some(init) = init {
            self.compile_expr(init);
        } else {
            self.emit(Opcode::Nil, span);
        }
        match target {
            VarTarget::Name(id) => self.define_binding(&id.name, is_const, span),
            VarTarget::Pattern(pattern) => self.compile_destructure(pattern, is_const, span),
        }
    }

    fn define_binding(&mut self, name: &Name, is_const: bool, span: SourceSpan) {
        if self.frame().scope_depth == 0 {
            let n = self.name_constant(name);
            self.emit(Opcode::DefineGlobal, span);
            self.emit_word(n, span);
        } else {
            self.declare_local(name, is_const);
        }
    }

    /// Destructures the value currently on top of the stack per `pattern`, leaving the
    /// stack unchanged in height (the source value is consumed and each binding is
    /// declared as a fresh local/global initialized from an indexed read).
    fn compile_destructure(&mut self, pattern: &Pattern, is_const: bool, span: SourceSpan) {
        match pattern {
            Pattern::Binding(id) => self.define_binding(&id.name, is_const, span),
            Pattern::Rest(id) => self.define_binding(&id.name, is_const, span),
            Pattern::Tuple(items, rest) | Pattern::Seq(items, rest) => {
                for (i, item) in items.iter().enumerate() {
                    self.emit(Opcode::Dupe, span);
                    self.emit_word(0, span);
                    self.emit(Opcode::Constant, span);
                    let idx_const = self.add_constant(crate::value::Value::Int(i as i64), span);
                    self.emit_word(idx_const, span);
                    self.emit(Opcode::GetSubscript, span);
                    self.compile_destructure(item, is_const, span);
                }
                if let Some(rest) = rest {
                    self.emit(Opcode::Dupe, span);
                    self.emit_word(0, span);
                    self.emit(Opcode::Constant, span);
                    let idx_const = self.add_constant(crate::value::Value::Int(items.len() as i64), span);
                    self.emit_word(idx_const, span);
                    self.emit(Opcode::Nil, span); // open-ended slice end
                    self.emit(Opcode::GetSlice, span);
                    self.compile_destructure(rest, is_const, span);
                }
                self.emit(Opcode::Pop, span);
            }
            Pattern::Obj(entries) => {
                for (key, binding) in entries {
                    self.emit(Opcode::Dupe, span);
                    self.emit_word(0, span);
                    let n = self.name_constant(key);
                    self.emit(Opcode::GetProperty, span);
                    self.emit_word(n, span);
                    self.compile_destructure(binding, is_const, span);
                }
                self.emit(Opcode::Pop, span);
            }
        }
    }

    // --- statements ---

    fn compile_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Import { name, path, bindings, span } => self.compile_import(name, path.as_deref(), bindings, *span),
            Stmt::Block(body, span) => {
                self.begin_scope();
                for node in body {
                    self.compile_node(node);
                }
                self.end_scope(*span);
            }
            Stmt::If { cond, then_branch, else_branch, span } => {
                self.compile_expr(cond);
                let then_jump = self.emit_jump(Opcode::JumpIfFalse, *span);
                self.emit(Opcode::Pop, *span);
                self.compile_node(then_branch);
                let else_jump = self.emit_jump(Opcode::Jump, *span);
                self.patch_jump(then_jump);
                self.emit(Opcode::Pop, *span);
                if let Some(else_branch) = else_branch {
                    self.compile_node(else_branch);
                }
                self.patch_jump(else_jump);
            }
            Stmt::While { cond, body, span } => {
                let loop_start = self.chunk().len();
                self.frame().loops.push(LoopCtx { loop_start, break_jumps: Vec::new(), local_depth_at_start: self.frame().locals.len() });
                self.compile_expr(cond);
                let exit_jump = self.emit_jump(Opcode::JumpIfFalse, *span);
                self.emit(Opcode::Pop, *span);
                self.compile_node(body);
                self.emit_loop(loop_start, *span);
                self.patch_jump(exit_jump);
                self.emit(Opcode::Pop, *span);
                let loop_ctx = self.frame().loops.pop().unwrap();
                for jump in loop_ctx.break_jumps {
                    self.patch_jump(jump);
                }
            }
            Stmt::For { init, cond, incr, body, span } => {
                self.begin_scope();
                if let Some(init) = init {
                    self.compile_node(init);
                }
                let loop_start = self.chunk().len();
                self.frame().loops.push(LoopCtx { loop_start, break_jumps: Vec::new(), local_depth_at_start: self.frame().locals.len() });
                let exit_jump = if let Some(cond) = cond {
                    self.compile_expr(cond);
                    let j = self.emit_jump(Opcode::JumpIfFalse, *span);
                    self.emit(Opcode::Pop, *span);
                    Some(j)
                } else {
                    None
                };
                self.compile_node(body);
                let continue_target_start = self.chunk().len();
                let _ = continue_target_start;
                if let Some(incr) = incr {
                    self.compile_expr(incr);
                    self.emit(Opcode::Pop, *span);
                }
                self.emit_loop(loop_start, *span);
                if let Some(j) = exit_jump {
                    self.patch_jump(j);
                    self.emit(Opcode::Pop, *span);
                }
                let loop_ctx = self.frame().loops.pop().unwrap();
                for jump in loop_ctx.break_jumps {
                    self.patch_jump(jump);
                }
                self.end_scope(*span);
            }
            Stmt::Return(value, span) => {
                if let Some(value) = value {
                    self.compile_expr(value);
                } else {
                    self.emit(Opcode::Nil, *span);
                }
                self.emit(Opcode::Return, *span);
            }
            Stmt::Print(expr, span) => {
                self.compile_expr(expr);
                self.emit(Opcode::Print, *span);
            }
            Stmt::Expr(expr, span) => {
                self.compile_expr(expr);
                self.emit(Opcode::Pop, *span);
            }
            Stmt::Break(span) => {
                if self.frame().loops.is_empty() {
                    self.errors.push(*span, "'break' outside of a loop".to_string());
                    return;
                }
                let depth_at_start = self.frame().loops.last().unwrap().local_depth_at_start;
                for _ in depth_at_start..self.frame().locals.len() {
                    self.emit(Opcode::Pop, *span);
                }
                let jump = self.emit_jump(Opcode::Jump, *span);
                self.frame().loops.last_mut().unwrap().break_jumps.push(jump);
            }
            Stmt::Skip(span) => {
                if self.frame().loops.is_empty() {
                    self.errors.push(*span, "'skip' outside of a loop".to_string());
                    return;
                }
                let depth_at_start = self.frame().loops.last().unwrap().local_depth_at_start;
                for _ in depth_at_start..self.frame().locals.len() {
                    self.emit(Opcode::Pop, *span);
                }
                let loop_start = self.frame().loops.last().unwrap().loop_start;
                self.emit_loop(loop_start, *span);
            }
            Stmt::Throw(expr, span) => {
                self.compile_expr(expr);
                self.emit(Opcode::Throw, *span);
            }
            Stmt::Try { try_block, catch_block, span } => {
                let handler_jump = self.emit_jump(Opcode::Try, *span);
                self.compile_node(try_block);
                let skip_catch = self.emit_jump(Opcode::Jump, *span);
                self.patch_jump(handler_jump);
                self.begin_scope();
                self.declare_local(&Rc::from("error"), false);
                self.compile_node(catch_block);
                self.end_scope(*span);
                self.patch_jump(skip_catch);
            }
        }
    }

    fn compile_import(&mut self, name: &Name, path: Option<&str>, bindings: &Option<(Vec<Name>, Option<Name>)>, span: SourceSpan) {
        let n = self.name_constant(name);
        if let Some(path) = path {
            let p = self.name_constant(path);
            self.emit(Opcode::ImportFrom, span);
            self.emit_word(n, span);
            self.emit_word(p, span);
        } else {
            self.emit(Opcode::Import, span);
            self.emit_word(n, span);
        }
        self.define_binding(name, false, span);

        if let Some((names, rest)) = bindings {
            for bound in names {
                self.compile_variable_get(&Id { name: name.clone(), span });
                let prop = self.name_constant(bound);
                self.emit(Opcode::GetProperty, span);
                self.emit_word(prop, span);
                self.define_binding(bound, false, span);
            }
            if let Some(rest_name) = rest {
                // A rest-import binding pulls the rest of the module's exported names into
                // an object; modeled as a GET_PROPERTY on a synthetic "*" entry the VM's
                // module loader populates with everything not explicitly destructured.
                self.compile_variable_get(&Id { name: name.clone(), span });
                let prop = self.name_constant("*");
                self.emit(Opcode::GetProperty, span);
                self.emit_word(prop, span);
                self.define_binding(rest_name, false, span);
            }
        }
    }

    // --- expressions ---

    fn compile_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Binary { op, left, right, span, .. } => {
                self.compile_expr(left);
                self.compile_expr(right);
                self.emit_binary_op(*op, *span);
            }
            Expr::Postfix { op, inner, span } => self.compile_postfix(*op, inner, *span),
            Expr::Unary { op, inner, span } => {
                if let (UnaryOp::Negate, Expr::Literal(Literal::Number(n, is_int), _)) = (op, inner.as_ref()) {
                    // The one permitted constant-folding optimization: fold a literal
                    // negation into a single constant rather than NEGATE at runtime.
                    self.emit_number_literal(-n, *is_int, *span);
                    return;
                }
                match op {
                    UnaryOp::Not => {
                        self.compile_expr(inner);
                        self.emit(Opcode::Not, *span);
                    }
                    UnaryOp::Negate => {
                        self.compile_expr(inner);
                        self.emit(Opcode::Negate, *span);
                    }
                    UnaryOp::PreIncrement | UnaryOp::PreDecrement => self.compile_pre_incr_decr(*op, inner, *span),
                }
            }
            Expr::Grouping(inner, _) => self.compile_expr(inner),
            Expr::Literal(lit, span) => self.compile_literal(lit, *span),
            Expr::Variable(id) => self.compile_variable_get(id),
            Expr::Assign { op, target, value, span } => self.compile_assign(*op, target, value, *span),
            Expr::And(l, r, span) => {
                self.compile_expr(l);
                let end_jump = self.emit_jump(Opcode::JumpIfFalse, *span);
                self.emit(Opcode::Pop, *span);
                self.compile_expr(r);
                self.patch_jump(end_jump);
            }
            Expr::Or(l, r, span) => {
                self.compile_expr(l);
                let else_jump = self.emit_jump(Opcode::JumpIfFalse, *span);
                let end_jump = self.emit_jump(Opcode::Jump, *span);
                self.patch_jump(else_jump);
                self.emit(Opcode::Pop, *span);
                self.compile_expr(r);
                self.patch_jump(end_jump);
            }
            Expr::Is(l, r, span) => {
                self.compile_expr(l);
                self.compile_expr(r);
                self.emit(Opcode::Is, *span);
            }
            Expr::In(l, r, span) => {
                self.compile_expr(l);
                self.compile_expr(r);
                self.emit(Opcode::In, *span);
            }
            Expr::Call { callee, args, span } => self.compile_call(callee, args, *span),
            Expr::Dot { target, prop, span } => {
                self.compile_expr(target);
                let n = self.name_constant(&prop.name);
                self.emit(Opcode::GetProperty, *span);
                self.emit_word(n, *span);
            }
            Expr::Subscript { target, index, span } => {
                self.compile_expr(target);
                self.compile_expr(index);
                self.emit(Opcode::GetSubscript, *span);
            }
            Expr::Slice { target, start, end, span } => {
                self.compile_expr(target);
                match start {
                    Some(e) => self.compile_expr(e),
                    None => self.emit(Opcode::Nil, *span),
                }
                match end {
                    Some(e) => self.compile_expr(e),
                    None => self.emit(Opcode::Nil, *span),
                }
                self.emit(Opcode::GetSlice, *span);
            }
            Expr::This(span) => self.compile_variable_get(&Id { name: Rc::from("this"), span: *span }),
            Expr::Base(span) => self.compile_variable_get(&Id { name: Rc::from("this"), span: *span }),
            Expr::Lambda(f) => self.compile_function(f, FnKind::Anonymous, f.name.clone()),
            Expr::Ternary { cond, then_expr, else_expr, span } => {
                self.compile_expr(cond);
                let then_jump = self.emit_jump(Opcode::JumpIfFalse, *span);
                self.emit(Opcode::Pop, *span);
                self.compile_expr(then_expr);
                let end_jump = self.emit_jump(Opcode::Jump, *span);
                self.patch_jump(then_jump);
                self.emit(Opcode::Pop, *span);
                self.compile_expr(else_expr);
                self.patch_jump(end_jump);
            }
            Expr::Try { expr, else_expr, span } => {
                let handler_jump = self.emit_jump(Opcode::Try, *span);
                self.compile_expr(expr);
                let skip_catch = self.emit_jump(Opcode::Jump, *span);
                self.patch_jump(handler_jump);
                match else_expr {
                    Some(fallback) => self.compile_expr(fallback),
                    None => self.emit(Opcode::Nil, *span),
                }
                self.patch_jump(skip_catch);
            }
        }
    }

    fn emit_number_literal(&mut self, value: f64, is_int: bool, span: SourceSpan) {
        let v = if is_int { crate::value::Value::Int(value as i64) } else { crate::value::Value::Float(value) };
        let idx = self.add_constant(v, span);
        self.emit(Opcode::Constant, span);
        self.emit_word(idx, span);
    }

    fn emit_binary_op(&mut self, op: BinaryOp, span: SourceSpan) {
        let opcode = match op {
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Subtract,
            BinaryOp::Mul => Opcode::Multiply,
            BinaryOp::Div => Opcode::Divide,
            BinaryOp::Mod => Opcode::Modulo,
            BinaryOp::Eq => Opcode::Eq,
            BinaryOp::Neq => Opcode::Neq,
            BinaryOp::Lt => Opcode::Lt,
            BinaryOp::Gt => Opcode::Gt,
            BinaryOp::Lteq => Opcode::Lteq,
            BinaryOp::Gteq => Opcode::Gteq,
        };
        self.emit(opcode, span);
    }

    fn compile_literal(&mut self, lit: &Literal, span: SourceSpan) {
        match lit {
            Literal::Number(n, is_int) => self.emit_number_literal(*n, *is_int, span),
            Literal::String(s) => {
                let id = self.heap.allocate(HeapData::Str(ObjString::new(s.as_ref())));
                let idx = self.add_constant(crate::value::Value::Ref(id), span);
                self.emit(Opcode::Constant, span);
                self.emit_word(idx, span);
            }
            Literal::Bool(true) => self.emit(Opcode::True, span),
            Literal::Bool(false) => self.emit(Opcode::False, span),
            Literal::Nil => self.emit(Opcode::Nil, span),
            Literal::Tuple(items) => {
                for item in items {
                    self.compile_expr(item);
                }
                self.emit(Opcode::TupleLiteral, span);
                self.emit_count(items.len(), span);
            }
            Literal::Seq(items) => {
                for item in items {
                    self.compile_expr(item);
                }
                self.emit(Opcode::SeqLiteral, span);
                self.emit_count(items.len(), span);
            }
            Literal::Obj(entries) => {
                for (k, v) in entries {
                    self.compile_expr(k);
                    self.compile_expr(v);
                }
                self.emit(Opcode::ObjectLiteral, span);
                self.emit_count(entries.len(), span);
            }
        }
    }

    fn compile_variable_get(&mut self, id: &Id) {
        match self.resolve_var(&id.name) {
            VarLoc::Local(slot) => {
                self.emit(Opcode::GetLocal, id.span);
                self.emit_word(slot, id.span);
            }
            VarLoc::Upvalue(idx) => {
                self.emit(Opcode::GetUpvalue, id.span);
                self.emit_word(idx, id.span);
            }
            VarLoc::Global => {
                let n = self.name_constant(&id.name);
                self.emit(Opcode::GetGlobal, id.span);
                self.emit_word(n, id.span);
            }
        }
    }

    fn compile_variable_set(&mut self, id: &Id) {
        match self.resolve_var(&id.name) {
            VarLoc::Local(slot) => {
                self.emit(Opcode::SetLocal, id.span);
                self.emit_word(slot, id.span);
            }
            VarLoc::Upvalue(idx) => {
                self.emit(Opcode::SetUpvalue, id.span);
                self.emit_word(idx, id.span);
            }
            VarLoc::Global => {
                let n = self.name_constant(&id.name);
                self.emit(Opcode::SetGlobal, id.span);
                self.emit_word(n, id.span);
            }
        }
    }

    fn compile_call(&mut self, callee: &Expr, args: &[Expr], span: SourceSpan) {
        match callee {
            Expr::Dot { target, prop, .. } if matches!(target.as_ref(), Expr::Base(_)) => {
                for arg in args {
                    self.compile_expr(arg);
                }
                let n = self.name_constant(&prop.name);
                self.emit(Opcode::BaseInvoke, span);
                self.emit_word(n, span);
                self.emit_word(args.len() as u16, span);
            }
            Expr::Dot { target, prop, .. } => {
                self.compile_expr(target);
                for arg in args {
                    self.compile_expr(arg);
                }
                let n = self.name_constant(&prop.name);
                self.emit(Opcode::Invoke, span);
                self.emit_word(n, span);
                self.emit_word(args.len() as u16, span);
            }
            _ => {
                self.compile_expr(callee);
                for arg in args {
                    self.compile_expr(arg);
                }
                self.emit(Opcode::Call, span);
                self.emit_word(args.len() as u16, span);
            }
        }
    }

    /// Compound assignment / postfix increment share the same three-shape "prelude" —
    /// duplicate whatever the target needs (nothing for a bare variable, the receiver for
    /// a dotted property, receiver+index for a subscript) so the read-modify-write doesn't
    /// re-evaluate a side-effecting target expression twice.
    fn compile_assign(&mut self, op: AssignOp, target: &Expr, value: &Expr, span: SourceSpan) {
        if op == AssignOp::Assign {
            match target {
                Expr::Variable(id) => {
                    self.compile_expr(value);
                    self.compile_variable_set(id);
                }
                Expr::Dot { target, prop, .. } => {
                    self.compile_expr(target);
                    self.compile_expr(value);
                    let n = self.name_constant(&prop.name);
                    self.emit(Opcode::SetProperty, span);
                    self.emit_word(n, span);
                }
                Expr::Subscript { target, index, .. } => {
                    self.compile_expr(target);
                    self.compile_expr(index);
                    self.compile_expr(value);
                    self.emit(Opcode::SetSubscript, span);
                }
                _ => self.errors.push(span, "invalid assignment target".to_string()),
            }
            return;
        }

        let bin_op = match op {
            AssignOp::Add => BinaryOp::Add,
            AssignOp::Sub => BinaryOp::Sub,
            AssignOp::Mul => BinaryOp::Mul,
            AssignOp::Div => BinaryOp::Div,
            AssignOp::Mod => BinaryOp::Mod,
            AssignOp::Assign => unreachable!(),
        };

        match target {
            Expr::Variable(id) => {
                self.compile_variable_get(id);
                self.compile_expr(value);
                self.emit_binary_op(bin_op, span);
                self.compile_variable_set(id);
            }
            Expr::Dot { target, prop, .. } => {
                self.compile_expr(target);
                self.emit(Opcode::Dupe, span);
                self.emit_word(0, span);
                let n = self.name_constant(&prop.name);
                self.emit(Opcode::GetProperty, span);
                self.emit_word(n, span);
                self.compile_expr(value);
                self.emit_binary_op(bin_op, span);
                self.emit(Opcode::SetProperty, span);
                self.emit_word(n, span);
            }
            Expr::Subscript { target, index, .. } => {
                self.compile_expr(target);
                self.compile_expr(index);
                self.emit(Opcode::Dupe, span);
                self.emit_word(1, span);
                self.emit(Opcode::Dupe, span);
                self.emit_word(1, span);
                self.emit(Opcode::GetSubscript, span);
                self.compile_expr(value);
                self.emit_binary_op(bin_op, span);
                self.emit(Opcode::SetSubscript, span);
            }
            _ => self.errors.push(span, "invalid assignment target".to_string()),
        }
    }

    fn compile_pre_incr_decr(&mut self, op: UnaryOp, target: &Expr, span: SourceSpan) {
        let bin_op = if op == UnaryOp::PreIncrement { BinaryOp::Add } else { BinaryOp::Sub };
        // For `++x`: compiled as `x = x + 1` with the new value as the expression result.
        match target {
            Expr::Variable(id) => {
                self.compile_variable_get(id);
                self.emit_one_literal(span);
                self.emit_binary_op(bin_op, span);
                self.compile_variable_set(id);
            }
            Expr::Dot { target, prop, .. } => {
                self.compile_expr(target);
                self.emit(Opcode::Dupe, span);
                self.emit_word(0, span);
                let n = self.name_constant(&prop.name);
                self.emit(Opcode::GetProperty, span);
                self.emit_word(n, span);
                self.emit_one_literal(span);
                self.emit_binary_op(bin_op, span);
                self.emit(Opcode::SetProperty, span);
                self.emit_word(n, span);
            }
            Expr::Subscript { target, index, .. } => {
                self.compile_expr(target);
                self.compile_expr(index);
                self.emit(Opcode::Dupe, span);
                self.emit_word(1, span);
                self.emit(Opcode::Dupe, span);
                self.emit_word(1, span);
                self.emit(Opcode::GetSubscript, span);
                self.emit_one_literal(span);
                self.emit_binary_op(bin_op, span);
                self.emit(Opcode::SetSubscript, span);
            }
            _ => self.errors.push(span, "invalid increment/decrement target".to_string()),
        }
    }

    fn compile_postfix(&mut self, op: PostfixOp, target: &Expr, span: SourceSpan) {
        let bin_op = if op == PostfixOp::Increment { BinaryOp::Add } else { BinaryOp::Sub };
        // Postfix leaves the *pre*-update value as the expression's result, so the read
        // is duplicated before the arithmetic/store.
        match target {
            Expr::Variable(id) => {
                self.compile_variable_get(id);
                self.emit(Opcode::Dupe, span);
                self.emit_word(0, span);
                self.emit_one_literal(span);
                self.emit_binary_op(bin_op, span);
                self.compile_variable_set(id);
                self.emit(Opcode::Pop, span);
            }
            Expr::Dot { target, prop, .. } => {
                self.compile_expr(target);
                self.emit(Opcode::Dupe, span);
                self.emit_word(0, span);
                let n = self.name_constant(&prop.name);
                self.emit(Opcode::GetProperty, span);
                self.emit_word(n, span);
                self.emit(Opcode::Dupe, span);
                self.emit_word(0, span);
                self.emit_one_literal(span);
                self.emit_binary_op(bin_op, span);
                self.emit(Opcode::SetProperty, span);
                self.emit_word(n, span);
                self.emit(Opcode::Pop, span);
            }
            Expr::Subscript { target, index, .. } => {
                self.compile_expr(target);
                self.compile_expr(index);
                self.emit(Opcode::Dupe, span);
                self.emit_word(1, span);
                self.emit(Opcode::Dupe, span);
                self.emit_word(1, span);
                self.emit(Opcode::GetSubscript, span);
                self.emit(Opcode::Dupe, span);
                self.emit_word(0, span);
                self.emit_one_literal(span);
                self.emit_binary_op(bin_op, span);
                self.emit(Opcode::SetSubscript, span);
                self.emit(Opcode::Pop, span);
            }
            _ => self.errors.push(span, "invalid increment/decrement target".to_string()),
        }
    }

    fn emit_one_literal(&mut self, span: SourceSpan) {
        let idx = self.add_constant(crate::value::Value::Int(1), span);
        self.emit(Opcode::Constant, span);
        self.emit_word(idx, span);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn compile_src(src: &str) -> Result<Rc<ObjFunction>, CompileError> {
        let (root, perrors) = Parser::new(src).parse();
        assert!(perrors.is_empty(), "{:?}", perrors.diagnostics);
        let mut heap = Heap::default();
        let mut interns = Interns::new();
        let globals = heap.allocate(HeapData::Module(crate::table::HashTable::new()));
        Compiler::new(&mut heap, &mut interns, globals).compile(&root)
    }

    #[test]
    fn compiles_simple_arithmetic_to_nonempty_chunk() {
        let function = compile_src("print 1 + 2").unwrap();
        assert!(!function.chunk.is_empty());
    }

    #[test]
    fn compiles_closure_with_upvalue() {
        let function = compile_src("fn make() { let i = 0\n ret fn() { i = i + 1\n ret i } }").unwrap();
        assert!(!function.chunk.is_empty());
    }

    #[test]
    fn while_loop_patches_break_and_skip_jumps() {
        let function = compile_src("while true { break }").unwrap();
        // CONSTANT/TRUE JUMP_IF_FALSE POP ... JUMP(break) ... LOOP ... POP
        assert!(function.chunk.code.contains(&(Opcode::Jump as u16)));
    }

    #[test]
    fn rejects_break_outside_loop() {
        let err = compile_src("break").unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn compiles_class_with_method() {
        let function = compile_src("cls A { ctor(x) { this.x = x } }").unwrap();
        assert!(function.chunk.code.contains(&(Opcode::Class as u16)));
        assert!(function.chunk.code.contains(&(Opcode::Finalize as u16)));
    }
}
