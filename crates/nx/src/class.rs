//! The builtin class registry: one [`ObjClass`] per primitive/heap type, each carrying a
//! static `natives` table instead of a method table of nx closures. Grounded in the
//! teacher's capability-vtable design (`ObjClass` carries function pointers rather than a
//! dynamic dispatch table) — here every builtin method reaches the VM through the same
//! `INVOKE` dispatch a user-defined method does, since nx has no first-class "bound native
//! function" value (see [`crate::vm::call::invoke`]'s native fallback).
//!
//! A native function's `args[0]` is always the receiver (the same convention `INVOKE`
//! already uses for nx closures, where slot 0 of the callee frame is `this`); `args[1..]`
//! are the explicit call arguments.

use crate::error::{RunError, RunResult};
use crate::heap::{Heap, HeapId};
use crate::intern::Interns;
use crate::object::{HeapData, NativeFn, ObjClass, ObjSeq, ObjString, ObjTuple};
use crate::value::Value;
use crate::vm::Vm;

pub struct BuiltinClasses {
    pub int: HeapId,
    pub float: HeapId,
    pub bool: HeapId,
    pub nil: HeapId,
    pub str: HeapId,
    pub seq: HeapId,
    pub tuple: HeapId,
    pub function: HeapId,
    pub class: HeapId,
    pub obj: HeapId,
    /// Synthetic classes whose only "method" is a native `ctor`, giving nx source a
    /// callable bare identifier (`tuple(seq)`, `typeof(v)`) without a first-class native
    /// function value — see [`crate::vm::call::construct`]'s native-ctor fallback.
    pub tuple_fn: HeapId,
    pub typeof_fn: HeapId,
}

impl BuiltinClasses {
    pub fn install(heap: &mut Heap, interns: &mut Interns) -> Self {
        let mut make = |name: &str, natives: &'static [(&'static str, NativeFn)]| {
            let name_id = interns.intern(name);
            heap.allocate(HeapData::Class(ObjClass { name: name_id, natives: Some(natives), ..ObjClass::default() }))
        };
        Self {
            int: make("int", INT_NATIVES),
            float: make("float", FLOAT_NATIVES),
            bool: make("bool", BOOL_NATIVES),
            nil: make("nil", NIL_NATIVES),
            str: make("str", STR_NATIVES),
            seq: make("seq", SEQ_NATIVES),
            tuple: make("tuple", TUPLE_NATIVES),
            function: make("fn", FN_NATIVES),
            class: make("cls", CLASS_NATIVES),
            obj: make("obj", OBJ_NATIVES),
            tuple_fn: make("tuple", TUPLE_CTOR_NATIVES),
            typeof_fn: make("typeof", TYPEOF_CTOR_NATIVES),
        }
    }

    pub fn class_ids(&self) -> Vec<HeapId> {
        vec![
            self.int, self.float, self.bool, self.nil, self.str, self.seq, self.tuple, self.function, self.class, self.obj,
            self.tuple_fn, self.typeof_fn,
        ]
    }
}

/// Resolves `class_id`'s cached `to_str` method, inheriting from the base chain — used by
/// [`Vm::stringify`] to let user classes override printing.
pub fn find_to_str(vm: &Vm, class_id: HeapId) -> Option<Value> {
    match vm.heap().get(class_id) {
        HeapData::Class(c) => c.to_str_method,
        _ => None,
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).copied().unwrap_or(Value::Nil)
}

fn expect_str(vm: &Vm, v: Value, what: &str) -> RunResult<std::rc::Rc<str>> {
    match v {
        Value::Ref(id) => match vm.heap().get(id) {
            HeapData::Str(s) => Ok(s.chars.clone()),
            _ => Err(RunError::type_error(format!("{what} expects a str"))),
        },
        _ => Err(RunError::type_error(format!("{what} expects a str"))),
    }
}

fn alloc_str(vm: &mut Vm, s: impl Into<std::rc::Rc<str>>) -> HeapId {
    vm.heap_mut().allocate(HeapData::Str(ObjString::new(s.into())))
}

fn to_str_native(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    let s = vm.stringify(arg(args, 0))?;
    Ok(Value::Ref(alloc_str(vm, s)))
}

fn class_native(vm: &mut Vm, args: &[Value]) -> RunResult<Value> {
    match vm.class_of(arg(args, 0)) {
        Some(id) => Ok(Value::Ref(id)),
        None => Ok(Value::Nil),
    }
}

const INT_NATIVES: &[(&str, NativeFn)] = &[
    ("to_str", to_str_native),
    ("class", class_native),
    ("to_float", |_vm, args| match arg(args, 0) {
        Value::Int(i) => Ok(Value::Float(i as f64)),
        other => Ok(other),
    }),
];

const FLOAT_NATIVES: &[(&str, NativeFn)] = &[
    ("to_str", to_str_native),
    ("class", class_native),
    ("to_int", |_vm, args| match arg(args, 0) {
        Value::Float(f) => Ok(Value::Int(f as i64)),
        other => Ok(other),
    }),
];

const BOOL_NATIVES: &[(&str, NativeFn)] = &[("to_str", to_str_native), ("class", class_native)];
const NIL_NATIVES: &[(&str, NativeFn)] = &[("to_str", to_str_native), ("class", class_native)];
const FN_NATIVES: &[(&str, NativeFn)] = &[("to_str", to_str_native), ("class", class_native)];

const CLASS_NATIVES: &[(&str, NativeFn)] = &[
    ("to_str", to_str_native),
    ("class", class_native),
    ("name", |vm, args| match arg(args, 0) {
        Value::Ref(id) => match vm.heap().get(id) {
            HeapData::Class(c) => {
                let s = vm.interns().get(c.name).to_string();
                Ok(Value::Ref(alloc_str(vm, s)))
            }
            _ => Ok(Value::Nil),
        },
        _ => Ok(Value::Nil),
    }),
];

const STR_NATIVES: &[(&str, NativeFn)] = &[
    ("to_str", |_vm, args| Ok(arg(args, 0))),
    ("class", class_native),
    ("len", |vm, args| {
        let s = expect_str(vm, arg(args, 0), "len")?;
        Ok(Value::Int(s.chars().count() as i64))
    }),
    ("upper", |vm, args| {
        let s = expect_str(vm, arg(args, 0), "upper")?;
        let upper = s.to_uppercase();
        Ok(Value::Ref(alloc_str(vm, upper)))
    }),
    ("lower", |vm, args| {
        let s = expect_str(vm, arg(args, 0), "lower")?;
        let lower = s.to_lowercase();
        Ok(Value::Ref(alloc_str(vm, lower)))
    }),
    ("trim", |vm, args| {
        let s = expect_str(vm, arg(args, 0), "trim")?;
        let trimmed = s.trim().to_string();
        Ok(Value::Ref(alloc_str(vm, trimmed)))
    }),
    ("split", |vm, args| {
        let s = expect_str(vm, arg(args, 0), "split")?;
        let sep = expect_str(vm, arg(args, 1), "split")?;
        let parts: Vec<String> = if sep.is_empty() {
            s.chars().map(|c| c.to_string()).collect()
        } else {
            s.split(sep.as_ref()).map(|p| p.to_string()).collect()
        };
        let items: Vec<Value> = parts.into_iter().map(|p| Value::Ref(alloc_str(vm, p))).collect();
        Ok(Value::Ref(vm.heap_mut().allocate(HeapData::Seq(ObjSeq { items }))))
    }),
    ("to_int", |vm, args| {
        let s = expect_str(vm, arg(args, 0), "to_int")?;
        s.trim().parse::<i64>().map(Value::Int).map_err(|_| RunError::type_error(format!("cannot parse '{s}' as int")))
    }),
    ("to_float", |vm, args| {
        let s = expect_str(vm, arg(args, 0), "to_float")?;
        s.trim().parse::<f64>().map(Value::Float).map_err(|_| RunError::type_error(format!("cannot parse '{s}' as float")))
    }),
];

fn expect_seq_items(vm: &Vm, v: Value, what: &str) -> RunResult<Vec<Value>> {
    match v {
        Value::Ref(id) => match vm.heap().get(id) {
            HeapData::Seq(s) => Ok(s.items.clone()),
            _ => Err(RunError::type_error(format!("{what} expects a seq"))),
        },
        _ => Err(RunError::type_error(format!("{what} expects a seq"))),
    }
}

const SEQ_NATIVES: &[(&str, NativeFn)] = &[
    ("to_str", to_str_native),
    ("class", class_native),
    ("len", |vm, args| {
        let items = expect_seq_items(vm, arg(args, 0), "len")?;
        Ok(Value::Int(items.len() as i64))
    }),
    ("push", |vm, args| {
        let receiver = arg(args, 0);
        let item = arg(args, 1);
        if let Value::Ref(id) = receiver {
            if let HeapData::Seq(s) = vm.heap_mut().get_mut(id) {
                s.items.push(item);
                return Ok(receiver);
            }
        }
        Err(RunError::type_error("push expects a seq"))
    }),
    ("map", |vm, args| {
        let items = expect_seq_items(vm, arg(args, 0), "map")?;
        let callback = arg(args, 1);
        let mut mapped = Vec::with_capacity(items.len());
        for item in items {
            mapped.push(vm.call_value(callback, &[item])?);
        }
        Ok(Value::Ref(vm.heap_mut().allocate(HeapData::Seq(ObjSeq { items: mapped }))))
    }),
    ("filter", |vm, args| {
        let items = expect_seq_items(vm, arg(args, 0), "filter")?;
        let callback = arg(args, 1);
        let mut kept = Vec::new();
        for item in items {
            if vm.call_value(callback, &[item])?.is_truthy() {
                kept.push(item);
            }
        }
        Ok(Value::Ref(vm.heap_mut().allocate(HeapData::Seq(ObjSeq { items: kept }))))
    }),
    ("each", |vm, args| {
        let items = expect_seq_items(vm, arg(args, 0), "each")?;
        let callback = arg(args, 1);
        for item in items {
            vm.call_value(callback, &[item])?;
        }
        Ok(Value::Nil)
    }),
    ("join", |vm, args| {
        let items = expect_seq_items(vm, arg(args, 0), "join")?;
        let sep = expect_str(vm, arg(args, 1), "join")?;
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            parts.push(vm.stringify(item)?);
        }
        Ok(Value::Ref(alloc_str(vm, parts.join(sep.as_ref()))))
    }),
    ("entries", |vm, args| {
        let items = expect_seq_items(vm, arg(args, 0), "entries")?;
        let mut entries = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let id = vm.heap_mut().allocate(HeapData::Tuple(ObjTuple { items: vec![Value::Int(i as i64), item] }));
            entries.push(Value::Ref(id));
        }
        Ok(Value::Ref(vm.heap_mut().allocate(HeapData::Seq(ObjSeq { items: entries }))))
    }),
];

const TUPLE_NATIVES: &[(&str, NativeFn)] = &[
    ("to_str", to_str_native),
    ("class", class_native),
    ("len", |vm, args| match arg(args, 0) {
        Value::Ref(id) => match vm.heap().get(id) {
            HeapData::Tuple(t) => Ok(Value::Int(t.items.len() as i64)),
            _ => Err(RunError::type_error("len expects a tuple")),
        },
        _ => Err(RunError::type_error("len expects a tuple")),
    }),
];

fn obj_entries(vm: &Vm, v: Value, what: &str) -> RunResult<Vec<(crate::intern::StringId, Value)>> {
    match v {
        Value::Ref(id) => match vm.heap().get(id) {
            HeapData::Object(o) => Ok(o.fields.iter().collect()),
            _ => Err(RunError::type_error(format!("{what} expects an obj"))),
        },
        _ => Err(RunError::type_error(format!("{what} expects an obj"))),
    }
}

/// Natives for plain `{...}` object literals. These carry `class_id: None` (see
/// [`crate::object::ObjObject`]); [`crate::vm::Vm::class_of`] maps that case to
/// [`BuiltinClasses::obj`] so `INVOKE` resolves `keys`/`values`/`entries`/`has` the same
/// way it resolves any other builtin method.
const OBJ_NATIVES: &[(&str, NativeFn)] = &[
    ("to_str", to_str_native),
    ("has", |vm, args| {
        let key = expect_str(vm, arg(args, 1), "has")?;
        match arg(args, 0) {
            Value::Ref(id) => match vm.heap().get(id) {
                HeapData::Object(o) => {
                    let key_id = vm.interns_mut().intern(&key);
                    Ok(Value::Bool(o.fields.contains_key(key_id)))
                }
                _ => Err(RunError::type_error("has expects an obj")),
            },
            _ => Err(RunError::type_error("has expects an obj")),
        }
    }),
    ("keys", |vm, args| {
        let entries = obj_entries(vm, arg(args, 0), "keys")?;
        let mut items = Vec::with_capacity(entries.len());
        for (k, _) in entries {
            let name = vm.interns().get(k).to_string();
            items.push(Value::Ref(alloc_str(vm, name)));
        }
        Ok(Value::Ref(vm.heap_mut().allocate(HeapData::Seq(ObjSeq { items }))))
    }),
    ("values", |vm, args| {
        let entries = obj_entries(vm, arg(args, 0), "values")?;
        let items: Vec<Value> = entries.into_iter().map(|(_, v)| v).collect();
        Ok(Value::Ref(vm.heap_mut().allocate(HeapData::Seq(ObjSeq { items }))))
    }),
    ("entries", |vm, args| {
        let entries = obj_entries(vm, arg(args, 0), "entries")?;
        let mut items = Vec::with_capacity(entries.len());
        for (k, v) in entries {
            let name = vm.interns().get(k).to_string();
            let key_val = Value::Ref(alloc_str(vm, name));
            let id = vm.heap_mut().allocate(HeapData::Tuple(ObjTuple { items: vec![key_val, v] }));
            items.push(Value::Ref(id));
        }
        Ok(Value::Ref(vm.heap_mut().allocate(HeapData::Seq(ObjSeq { items }))))
    }),
];

/// `tuple(seq)`: the native "ctor" of a synthetic, methodless class bound to the global
/// name `tuple`, called the same way a user class's ctor is (`Call` on a `Class` value) —
/// see [`crate::vm::call::construct`].
const TUPLE_CTOR_NATIVES: &[(&str, NativeFn)] = &[("ctor", |vm, args| {
    let items = expect_seq_items(vm, arg(args, 1), "tuple")?;
    Ok(Value::Ref(vm.heap_mut().allocate(HeapData::Tuple(ObjTuple { items }))))
})];

/// `typeof(v)`: returns `v`'s class, same native-ctor trick as `tuple_fn`.
const TYPEOF_CTOR_NATIVES: &[(&str, NativeFn)] = &[("ctor", |vm, args| {
    let v = arg(args, 1);
    match vm.class_of(v) {
        Some(id) => Ok(Value::Ref(id)),
        None => Ok(Value::Nil),
    }
})];
