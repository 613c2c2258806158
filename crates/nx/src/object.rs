//! Heap-resident object kinds, grounded in `original_source/object.h`'s `Obj*` struct
//! family and the teacher's `HeapData` enum (`heap.rs`) for the Rust arena-handle shape.
//! Each variant owns its data directly (no refcounting) since reachability is decided by
//! [`crate::heap::Heap`]'s mark-and-sweep pass, not by per-object counts.

use std::rc::Rc;

use crate::ast::FnKind;
use crate::chunk::Chunk;
use crate::heap::HeapId;
use crate::intern::StringId;
use crate::table::HashTable;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct ObjString {
    pub chars: Rc<str>,
}

impl ObjString {
    pub fn new(s: impl Into<Rc<str>>) -> Self {
        Self { chars: s.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ObjSeq {
    pub items: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ObjTuple {
    pub items: Vec<Value>,
}

/// A key-value object literal/instance-like bag; nx objects are plain property bags,
/// not class instances (those carry a separate `class_id` via [`ObjObject::class_id`]).
#[derive(Debug, Clone, Default)]
pub struct ObjObject {
    pub fields: HashTable,
    pub class_id: Option<HeapId>,
}

/// Static description of a compiled function body, shared (via [`Rc`]) between every
/// closure created from the same `fn`/`ctor`/method declaration.
#[derive(Debug)]
pub struct ObjFunction {
    pub name: Option<StringId>,
    pub arity: u8,
    pub upvalue_count: u8,
    pub kind: FnKind,
    pub chunk: Chunk,
    /// The module whose global table this function's free names resolve against — the
    /// module it was compiled into, not whatever module happens to be calling it.
    pub globals: HeapId,
}

/// Where an upvalue's slot describer points when a closure is created for a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalueSource {
    /// Captures a local slot in the immediately enclosing call frame.
    Local(u16),
    /// Captures an upvalue already captured by the immediately enclosing closure.
    Upvalue(u16),
}

#[derive(Debug)]
pub struct ObjClosure {
    pub function: Rc<ObjFunction>,
    pub upvalues: Vec<HeapId>,
}

/// An open upvalue refers to a live VM stack slot; once the frame that owns that slot
/// returns, `CLOSE_UPVALUE` copies the value in and the upvalue becomes closed.
#[derive(Debug, Clone, Copy)]
pub enum ObjUpvalue {
    Open { stack_index: usize },
    Closed(Value),
}

/// Capability vtable entry: a native function pointer taking the same shape as a normal
/// native (`argc`, `argv`), used for classes (builtin or user-defined) to answer
/// `GET_SUBSCRIPT`/`SET_SUBSCRIPT`/`GET_PROPERTY`/`SET_PROPERTY` uniformly.
pub type NativeFn = fn(&mut crate::vm::Vm, &[Value]) -> crate::error::RunResult<Value>;

#[derive(Debug, Default)]
pub struct ObjClass {
    pub name: StringId,
    pub base: Option<HeapId>,
    pub methods: HashTable,
    /// Cached special methods, resolved once at class-finalization time (`FINALIZE`)
    /// rather than looked up on every call.
    pub ctor: Option<Value>,
    pub has_method: Option<Value>,
    pub to_str_method: Option<Value>,
    pub slice_method: Option<Value>,
    /// Set for builtin classes (int/float/bool/nil/str/seq/tuple/fn/class) whose methods
    /// are native Rust functions rather than nx closures.
    pub natives: Option<&'static [(&'static str, NativeFn)]>,
}

#[derive(Debug, Clone)]
pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: Value,
}

/// Every kind of object that can live in the heap arena.
#[derive(Debug)]
pub enum HeapData {
    Str(ObjString),
    Seq(ObjSeq),
    Tuple(ObjTuple),
    Object(ObjObject),
    Function(Rc<ObjFunction>),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    BoundMethod(ObjBoundMethod),
    /// A still-loading or loaded module's global namespace, keyed by exported name.
    Module(HashTable),
}

impl HeapData {
    pub fn type_name(&self) -> &'static str {
        match self {
            HeapData::Str(_) => "str",
            HeapData::Seq(_) => "seq",
            HeapData::Tuple(_) => "tuple",
            HeapData::Object(_) => "obj",
            HeapData::Function(_) => "fn",
            HeapData::Closure(_) => "fn",
            HeapData::Upvalue(_) => "upvalue",
            HeapData::Class(_) => "cls",
            HeapData::BoundMethod(_) => "fn",
            HeapData::Module(_) => "module",
        }
    }
}
