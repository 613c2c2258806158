//! The stack-based bytecode virtual machine.
//!
//! `Vm` owns every live piece of interpreter state: the value stack, call frames, heap,
//! interned-string table, the main module's globals, the imported-module registry, and the
//! open-upvalue chain. The dispatch loop lives here; arithmetic, comparison, call/invoke,
//! property/subscript access, and exception unwinding are split into sibling submodules the
//! way the teacher splits its own `bytecode::vm` dispatch (`binary`/`compare`/`call`/`attr`/
//! `collections`/`exceptions`), each operating on `&mut Vm` rather than owning state of its
//! own.

mod attr;
mod binary;
mod call;
mod collections;
mod compare;
mod exceptions;

use std::collections::HashMap as StdHashMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::rc::Rc;

use ahash::AHashMap;

use crate::chunk::Opcode;
use crate::class::BuiltinClasses;
use crate::error::{InternalError, RunError, RunResult, TraceFrame};
use crate::heap::Heap;
use crate::intern::{Interns, StringId};
use crate::object::{HeapData, ObjClosure, ObjFunction, ObjUpvalue};
use crate::table::HashTable;
use crate::tracer::{NoopTracer, VmTracer};
use crate::heap::HeapId;
use crate::value::Value;

/// The VM's construction-time configuration: stack geometry and GC thresholds, the
/// ambient analogue of a config file (there is no config file for an interpreter whose
/// only input is a source path).
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub max_frames: usize,
    pub stack_slots_per_frame: usize,
    pub gc_grow_factor: usize,
    pub initial_gc_threshold: usize,
    pub max_recursion_depth: usize,
    pub gc_stress: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_frames: 64,
            stack_slots_per_frame: 256,
            gc_grow_factor: crate::heap::GC_GROW_FACTOR,
            initial_gc_threshold: 1024 * 1024,
            max_recursion_depth: 64,
            gc_stress: false,
        }
    }
}

pub(crate) struct CallFrame {
    pub closure: HeapId,
    pub ip: usize,
    pub slots_base: usize,
    pub globals: HeapId,
}

pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) interns: Interns,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) open_upvalues: Vec<HeapId>,
    pub(crate) modules: AHashMap<String, HeapId>,
    pub(crate) builtins: BuiltinClasses,
    pub(crate) native_modules: crate::natives::NativeModules,
    pub(crate) main_module: HeapId,
    pub(crate) current_error: Option<Value>,
    pub limits: ResourceLimits,
    pub tracer: Box<dyn VmTracer>,
    pub cwd: PathBuf,
    /// Sink for `print` statements. Defaults to stdout; the `test` subcommand swaps in an
    /// in-memory buffer so it can compare captured output against `// [Expect ...]` tags.
    pub output: Box<dyn std::io::Write>,
    pub(crate) special_names: StdHashMap<&'static str, StringId>,
}

impl Vm {
    pub fn new(limits: ResourceLimits) -> Self {
        let mut heap = Heap::new(limits.initial_gc_threshold);
        heap.stress_gc = limits.gc_stress;
        let mut interns = Interns::new();
        let builtins = BuiltinClasses::install(&mut heap, &mut interns);
        let native_modules = crate::natives::NativeModules::install(&mut heap, &mut interns);
        let main_module = heap.allocate(HeapData::Module(HashTable::new()));

        let mut special_names = StdHashMap::new();
        for name in ["ctor", "has", "to_str", "slice", "error", "this"] {
            special_names.insert(name, interns.intern(name));
        }

        if let HeapData::Module(t) = heap.get_mut(main_module) {
            let tuple_name = interns.intern("tuple");
            let typeof_name = interns.intern("typeof");
            t.set(tuple_name, Value::Ref(builtins.tuple_fn));
            t.set(typeof_name, Value::Ref(builtins.typeof_fn));
        }
        native_modules.install_globals(&mut heap, &mut interns, main_module);

        Self {
            heap,
            interns,
            stack: Vec::with_capacity(limits.stack_slots_per_frame * 4),
            frames: Vec::with_capacity(limits.max_frames),
            open_upvalues: Vec::new(),
            modules: AHashMap::new(),
            builtins,
            native_modules,
            main_module,
            current_error: None,
            limits,
            tracer: Box::new(NoopTracer),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            output: Box::new(std::io::stdout()),
            special_names,
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn interns(&self) -> &Interns {
        &self.interns
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn interns_mut(&mut self) -> &mut Interns {
        &mut self.interns
    }

    /// Runs a freshly compiled top-level function (the module body) to completion.
    pub fn interpret(&mut self, function: Rc<ObjFunction>) -> RunResult<Value> {
        let closure_id = self.heap.allocate(HeapData::Closure(ObjClosure { function, upvalues: Vec::new() }));
        self.stack.push(Value::Ref(closure_id));
        self.frames.push(CallFrame { closure: closure_id, ip: 0, slots_base: 0, globals: self.main_module });
        self.run_until(0)
    }

    /// Runs a freshly compiled module body to completion with its own `globals` table,
    /// distinct from whatever module is importing it. Used by [`crate::module::import`].
    pub(crate) fn run_module_body(&mut self, function: Rc<ObjFunction>, module_id: HeapId) -> RunResult<Value> {
        let closure_id = self.heap.allocate(HeapData::Closure(ObjClosure { function, upvalues: Vec::new() }));
        self.stack.push(Value::Ref(closure_id));
        let slots_base = self.stack.len() - 1;
        let stop_depth = self.frames.len();
        self.frames.push(CallFrame { closure: closure_id, ip: 0, slots_base, globals: module_id });
        self.run_until(stop_depth)
    }

    /// Invokes an arbitrary callable value with `args` already evaluated, blocking until
    /// it returns. Used by native methods (`seq.map`, `seq.each`, ...) that need to call
    /// back into nx code.
    pub fn call_value(&mut self, callee: Value, args: &[Value]) -> RunResult<Value> {
        self.stack.push(callee);
        for arg in args {
            self.stack.push(*arg);
        }
        let stop_depth = self.frames.len();
        call::call(self, args.len() as u16)?;
        self.run_until(stop_depth)
    }

    fn run_until(&mut self, stop_depth: usize) -> RunResult<Value> {
        loop {
            if self.frames.len() <= stop_depth {
                break;
            }
            if self.heap.should_collect() {
                self.collect_garbage();
            }
            self.tracer.on_instruction(self.frames.len(), self.current_ip());
            let op = self.fetch_opcode()?;
            match self.step(op) {
                Ok(()) => {}
                Err(RunError::Internal(e)) => return Err(RunError::Internal(e)),
                Err(RunError::Exception(exc)) => {
                    // A runtime fault (type error, index error, ...) is itself catchable by
                    // an `nx`-level `try`/catch — reify it as the value the catch block binds.
                    let id = self.heap.allocate(HeapData::Str(crate::object::ObjString::new(exc.message.clone())));
                    exceptions::throw_with_kind(self, Value::Ref(id), exc.kind)?;
                }
            }
        }
        Ok(self.stack.pop().unwrap_or(Value::Nil))
    }

    fn current_ip(&self) -> usize {
        self.frames.last().map(|f| f.ip).unwrap_or(0)
    }

    fn fetch_word(&mut self) -> RunResult<u16> {
        let frame = self.frames.last_mut().unwrap();
        let closure_id = frame.closure;
        let ip = frame.ip;
        let word = match self.heap.get(closure_id) {
            HeapData::Closure(c) => *c.function.chunk.code.get(ip).ok_or_else(|| InternalError::new("instruction pointer ran past end of chunk"))?,
            _ => return Err(InternalError::new("call frame closure is not a closure").into()),
        };
        self.frames.last_mut().unwrap().ip += 1;
        Ok(word)
    }

    fn fetch_opcode(&mut self) -> RunResult<Opcode> {
        let word = self.fetch_word()?;
        Opcode::from_word(word).ok_or_else(|| InternalError::new(format!("unknown opcode word {word}")).into())
    }

    pub(crate) fn current_span(&self) -> crate::ast::SourceSpan {
        let frame = self.frames.last().unwrap();
        let ip = frame.ip.saturating_sub(1);
        match self.heap.get(frame.closure) {
            HeapData::Closure(c) => c.function.chunk.source_views.get(ip).map(|v| v.span).unwrap_or(crate::ast::SourceSpan { start: 0, end: 0, line: 0 }),
            _ => crate::ast::SourceSpan { start: 0, end: 0, line: 0 },
        }
    }

    fn current_globals(&self) -> HeapId {
        self.frames.last().unwrap().globals
    }

    fn slots_base(&self) -> usize {
        self.frames.last().unwrap().slots_base
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    pub(crate) fn peek(&self, depth: usize) -> Value {
        self.stack[self.stack.len() - 1 - depth]
    }

    pub fn stringify(&mut self, value: Value) -> RunResult<String> {
        match value {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(s) => Ok(s.chars.to_string()),
                HeapData::Seq(s) => {
                    let items = s.items.clone();
                    let parts: RunResult<Vec<String>> = items.into_iter().map(|v| self.stringify(v)).collect();
                    Ok(format!("[{}]", parts?.join(", ")))
                }
                HeapData::Tuple(t) => {
                    let items = t.items.clone();
                    let is_single = items.len() == 1;
                    let parts: Vec<String> = items.into_iter().map(|v| self.stringify(v)).collect::<RunResult<_>>()?;
                    if is_single {
                        Ok(format!("({},)", parts.join(", ")))
                    } else {
                        Ok(format!("({})", parts.join(", ")))
                    }
                }
                HeapData::Object(o) => {
                    let class_id = o.class_id;
                    let entries: Vec<(StringId, Value)> = o.fields.iter().collect();
                    if let Some(class_id) = class_id {
                        if let Some(method) = class::find_to_str(self, class_id) {
                            return self.stringify_via_method(method, value);
                        }
                    }
                    let parts: Vec<String> = entries
                        .into_iter()
                        .map(|(k, v)| {
                            let key = self.interns.get(k).to_string();
                            let val = self.stringify(v)?;
                            Ok::<_, RunError>(format!("{key}: {val}"))
                        })
                        .collect::<RunResult<_>>()?;
                    Ok(format!("{{{}}}", parts.join(", ")))
                }
                HeapData::Class(c) => Ok(format!("<class {}>", self.interns.get(c.name))),
                HeapData::Closure(_) | HeapData::Function(_) | HeapData::BoundMethod(_) => Ok("<fn>".to_string()),
                HeapData::Upvalue(_) => Ok("<upvalue>".to_string()),
                HeapData::Module(_) => Ok("<module>".to_string()),
            },
            other => Ok(other.to_string()),
        }
    }

    fn stringify_via_method(&mut self, method: Value, receiver: Value) -> RunResult<String> {
        let result = self.call_value(method, &[receiver])?;
        self.stringify(result)
    }

    /// Walks the live call-frame stack, newest first, naming each frame's function and the
    /// source line its instruction pointer currently sits on. Used both to build an uncaught
    /// exception's trace and, directly (not through the tracer), by `Debug.stack()`.
    pub(crate) fn capture_trace(&self) -> Vec<TraceFrame> {
        self.frames
            .iter()
            .rev()
            .map(|frame| match self.heap.get(frame.closure) {
                HeapData::Closure(c) => {
                    let function_name = c.function.name.map(|n| self.interns.get(n).to_string()).unwrap_or_else(|| "<module>".to_string());
                    let span = c
                        .function
                        .chunk
                        .source_views
                        .get(frame.ip.saturating_sub(1))
                        .map(|v| v.span)
                        .unwrap_or(crate::ast::SourceSpan { start: 0, end: 0, line: 0 });
                    TraceFrame { function_name, span }
                }
                _ => TraceFrame { function_name: "<anonymous>".to_string(), span: crate::ast::SourceSpan { start: 0, end: 0, line: 0 } },
            })
            .collect()
    }

    fn collect_garbage(&mut self) {
        let mut roots: Vec<Value> = self.stack.clone();
        roots.push(Value::Ref(self.main_module));
        for frame in &self.frames {
            roots.push(Value::Ref(frame.closure));
            roots.push(Value::Ref(frame.globals));
        }
        for upvalue in &self.open_upvalues {
            roots.push(Value::Ref(*upvalue));
        }
        if let Some(err) = self.current_error {
            roots.push(err);
        }
        for module_id in self.modules.values() {
            roots.push(Value::Ref(*module_id));
        }
        let builtin_class_ids = self.builtins.class_ids();
        for id in builtin_class_ids {
            roots.push(Value::Ref(id));
        }
        let special_name_ids: Vec<StringId> = self.special_names.values().copied().collect();
        self.heap.collect(&roots, &[], &special_name_ids, &mut self.interns);
        self.tracer.on_gc_cycle(self.heap.cycles_run, self.heap.live_count());
    }

    fn step(&mut self, op: Opcode) -> RunResult<()> {
        use Opcode::*;
        match op {
            Constant => {
                let idx = self.fetch_word()? as usize;
                let value = self.constant(idx);
                self.push(value);
            }
            Nil => self.push(Value::Nil),
            True => self.push(Value::Bool(true)),
            False => self.push(Value::Bool(false)),
            Pop => {
                self.pop();
            }
            Dupe => {
                let depth = self.fetch_word()? as usize;
                let value = self.peek(depth);
                self.push(value);
            }
            GetLocal => {
                let slot = self.fetch_word()? as usize;
                let base = self.slots_base();
                self.push(self.stack[base + slot]);
            }
            SetLocal => {
                let slot = self.fetch_word()? as usize;
                let base = self.slots_base();
                self.stack[base + slot] = self.peek(0);
            }
            GetGlobal => {
                let idx = self.fetch_word()? as usize;
                let name = self.constant_string(idx)?;
                let globals = self.current_globals();
                let value = match self.heap.get(globals) {
                    HeapData::Module(t) => t.get(name),
                    _ => None,
                };
                match value {
                    Some(v) => self.push(v),
                    None => return Err(RunError::name_error(self.interns.get(name))),
                }
            }
            SetGlobal => {
                let idx = self.fetch_word()? as usize;
                let name = self.constant_string(idx)?;
                let globals = self.current_globals();
                let exists = match self.heap.get(globals) {
                    HeapData::Module(t) => t.contains_key(name),
                    _ => false,
                };
                if !exists {
                    return Err(RunError::name_error(self.interns.get(name)));
                }
                let value = self.peek(0);
                if let HeapData::Module(t) = self.heap.get_mut(globals) {
                    t.set(name, value);
                }
            }
            DefineGlobal => {
                let idx = self.fetch_word()? as usize;
                let name = self.constant_string(idx)?;
                let globals = self.current_globals();
                let value = self.pop();
                if let HeapData::Module(t) = self.heap.get_mut(globals) {
                    t.set(name, value);
                }
            }
            GetUpvalue => {
                let idx = self.fetch_word()? as usize;
                let upvalue_id = self.current_upvalue(idx);
                self.push(self.read_upvalue(upvalue_id));
            }
            SetUpvalue => {
                let idx = self.fetch_word()? as usize;
                let upvalue_id = self.current_upvalue(idx);
                let value = self.peek(0);
                self.write_upvalue(upvalue_id, value);
            }
            GetSubscript => attr::get_subscript(self)?,
            SetSubscript => attr::set_subscript(self)?,
            GetProperty => {
                let idx = self.fetch_word()? as usize;
                let name = self.constant_string(idx)?;
                attr::get_property(self, name)?;
            }
            SetProperty => {
                let idx = self.fetch_word()? as usize;
                let name = self.constant_string(idx)?;
                attr::set_property(self, name)?;
            }
            GetBaseMethod => {
                let idx = self.fetch_word()? as usize;
                let name = self.constant_string(idx)?;
                attr::get_base_method(self, name)?;
            }
            Eq => compare::eq(self)?,
            Neq => compare::neq(self)?,
            Gt => compare::gt(self)?,
            Lt => compare::lt(self)?,
            Gteq => compare::gteq(self)?,
            Lteq => compare::lteq(self)?,
            Add => binary::add(self)?,
            Subtract => binary::subtract(self)?,
            Multiply => binary::multiply(self)?,
            Divide => binary::divide(self)?,
            Modulo => binary::modulo(self)?,
            Not => {
                let v = self.pop();
                self.push(Value::Bool(!v.is_truthy()));
            }
            Negate => binary::negate(self)?,
            Print => {
                let v = self.pop();
                let s = self.stringify(v)?;
                let _ = writeln!(self.output, "{s}");
            }
            Jump => {
                let target = self.fetch_word()? as usize;
                self.frames.last_mut().unwrap().ip = target;
            }
            JumpIfFalse => {
                let target = self.fetch_word()? as usize;
                if !self.peek(0).is_truthy() {
                    self.frames.last_mut().unwrap().ip = target;
                }
            }
            Try => {
                let target = self.fetch_word()? as usize;
                self.push(Value::InternalHandler(target as u32));
            }
            Loop => {
                let offset = self.fetch_word()? as usize;
                self.frames.last_mut().unwrap().ip -= offset;
            }
            Call => {
                let argc = self.fetch_word()?;
                call::call(self, argc)?;
            }
            Invoke => {
                let idx = self.fetch_word()? as usize;
                let argc = self.fetch_word()?;
                let name = self.constant_string(idx)?;
                call::invoke(self, name, argc)?;
            }
            BaseInvoke => {
                let idx = self.fetch_word()? as usize;
                let argc = self.fetch_word()?;
                let name = self.constant_string(idx)?;
                call::base_invoke(self, name, argc)?;
            }
            Closure => call::make_closure(self)?,
            CloseUpvalue => {
                let top = self.stack.len() - 1;
                self.close_upvalues_from(top);
                self.pop();
            }
            SeqLiteral => {
                let count = self.fetch_word()? as usize;
                collections::seq_literal(self, count);
            }
            TupleLiteral => {
                let count = self.fetch_word()? as usize;
                collections::tuple_literal(self, count);
            }
            ObjectLiteral => {
                let count = self.fetch_word()? as usize;
                collections::object_literal(self, count)?;
            }
            Return => {
                let result = self.pop();
                let frame = self.frames.pop().unwrap();
                self.close_upvalues_from(frame.slots_base);
                self.stack.truncate(frame.slots_base);
                self.push(result);
            }
            Class => {
                let idx = self.fetch_word()? as usize;
                let name = self.constant_string(idx)?;
                call::begin_class(self, name);
            }
            Inherit => call::inherit(self)?,
            Finalize => call::finalize_class(self),
            Method => {
                let idx = self.fetch_word()? as usize;
                let _kind = self.fetch_word()?;
                let name = self.constant_string(idx)?;
                call::define_method(self, name);
            }
            Import => {
                let idx = self.fetch_word()? as usize;
                let name = self.constant_string(idx)?;
                crate::module::import(self, name, None)?;
            }
            ImportFrom => {
                let idx = self.fetch_word()? as usize;
                let path_idx = self.fetch_word()? as usize;
                let name = self.constant_string(idx)?;
                let path = self.constant_string(path_idx)?;
                crate::module::import(self, name, Some(path))?;
            }
            Throw => {
                let value = self.pop();
                exceptions::throw(self, value)?;
            }
            Is => compare::is_op(self)?,
            In => compare::in_op(self)?,
            GetSlice => attr::get_slice(self)?,
        }
        Ok(())
    }

    fn constant(&self, idx: usize) -> Value {
        let frame = self.frames.last().unwrap();
        match self.heap.get(frame.closure) {
            HeapData::Closure(c) => c.function.chunk.constants[idx],
            _ => Value::Nil,
        }
    }

    fn constant_string(&mut self, idx: usize) -> RunResult<StringId> {
        let value = self.constant(idx);
        match value {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(s) => Ok(self.interns.intern(&s.chars)),
                _ => Err(InternalError::new("name constant is not a string").into()),
            },
            _ => Err(InternalError::new("name constant is not a string").into()),
        }
    }

    fn current_upvalue(&self, idx: usize) -> HeapId {
        let frame = self.frames.last().unwrap();
        match self.heap.get(frame.closure) {
            HeapData::Closure(c) => c.upvalues[idx],
            _ => unreachable!(),
        }
    }

    fn read_upvalue(&self, id: HeapId) -> Value {
        match self.heap.get(id) {
            HeapData::Upvalue(ObjUpvalue::Open { stack_index }) => self.stack[*stack_index],
            HeapData::Upvalue(ObjUpvalue::Closed(v)) => *v,
            _ => unreachable!(),
        }
    }

    fn write_upvalue(&mut self, id: HeapId, value: Value) {
        match self.heap.get_mut(id) {
            HeapData::Upvalue(ObjUpvalue::Open { stack_index }) => {
                let idx = *stack_index;
                self.stack[idx] = value;
            }
            HeapData::Upvalue(closed @ ObjUpvalue::Closed(_)) => *closed = ObjUpvalue::Closed(value),
            _ => unreachable!(),
        }
    }

    /// Finds (or creates) the open upvalue for the given stack slot, matching the
    /// teacher's sorted-descending open-upvalue list so closing a range is a simple scan.
    pub(crate) fn capture_upvalue(&mut self, stack_index: usize) -> HeapId {
        for &id in &self.open_upvalues {
            if let HeapData::Upvalue(ObjUpvalue::Open { stack_index: si }) = self.heap.get(id) {
                if *si == stack_index {
                    return id;
                }
            }
        }
        let id = self.heap.allocate(HeapData::Upvalue(ObjUpvalue::Open { stack_index }));
        self.open_upvalues.push(id);
        id
    }

    pub(crate) fn close_upvalues_from(&mut self, from_stack_index: usize) {
        let mut remaining = Vec::new();
        for id in self.open_upvalues.drain(..) {
            let stack_index = match self.heap.get(id) {
                HeapData::Upvalue(ObjUpvalue::Open { stack_index }) => Some(*stack_index),
                _ => None,
            };
            match stack_index {
                Some(si) if si >= from_stack_index => {
                    let value = self.stack[si];
                    if let HeapData::Upvalue(slot) = self.heap.get_mut(id) {
                        *slot = ObjUpvalue::Closed(value);
                    }
                }
                _ => remaining.push(id),
            }
        }
        self.open_upvalues = remaining;
    }

    pub(crate) fn type_name(&self, value: Value) -> &'static str {
        value.type_name(&self.heap)
    }

    pub(crate) fn class_of(&self, value: Value) -> Option<HeapId> {
        match value {
            Value::Int(_) => Some(self.builtins.int),
            Value::Float(_) => Some(self.builtins.float),
            Value::Bool(_) => Some(self.builtins.bool),
            Value::Nil => Some(self.builtins.nil),
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(_) => Some(self.builtins.str),
                HeapData::Seq(_) => Some(self.builtins.seq),
                HeapData::Tuple(_) => Some(self.builtins.tuple),
                HeapData::Closure(_) | HeapData::Function(_) | HeapData::BoundMethod(_) => Some(self.builtins.function),
                HeapData::Class(_) => Some(self.builtins.class),
                HeapData::Object(o) => o.class_id.or(Some(self.builtins.obj)),
                HeapData::Upvalue(_) | HeapData::Module(_) => None,
            },
            _ => None,
        }
    }
}

use crate::class;
