//! `File.read/write/exists/join_path`, grounded in `original_source/native_module_file.c`.
//! `args[0]` is the `File` singleton itself (ignored, per the native ABI every builtin
//! method in [`crate::class`] already uses); `args[1..]` are the call arguments.

use std::path::{Path, PathBuf};

use crate::error::{RunError, RunResult};
use crate::heap::{Heap, HeapId};
use crate::intern::Interns;
use crate::object::{HeapData, NativeFn, ObjString};
use crate::value::Value;
use crate::vm::Vm;

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

pub const NATIVES: &[(&str, NativeFn)] = &[
    ("to_str", |vm, args| {
        let s = vm.stringify(arg(args, 0))?;
        Ok(Value::Ref(alloc_str(vm, s)))
    }),
    ("class", |vm, args| match vm.class_of(arg(args, 0)) {
        Some(id) => Ok(Value::Ref(id)),
        None => Ok(Value::Nil),
    }),
    ("read", |vm, args| {
        let path = expect_str(vm, arg(args, 1), "File.read")?;
        match std::fs::read_to_string(path.as_ref()) {
            Ok(content) => Ok(Value::Ref(alloc_str(vm, content))),
            Err(_) => Err(RunError::type_error(format!("File '{path}' does not exist."))),
        }
    }),
    ("write", |vm, args| {
        let path = expect_str(vm, arg(args, 1), "File.write")?;
        let content = expect_str(vm, arg(args, 2), "File.write")?;
        Ok(Value::Bool(std::fs::write(path.as_ref(), content.as_bytes()).is_ok()))
    }),
    ("exists", |vm, args| {
        let path = expect_str(vm, arg(args, 1), "File.exists")?;
        Ok(Value::Bool(Path::new(path.as_ref()).exists()))
    }),
    ("join_path", |vm, args| {
        let a = expect_str(vm, arg(args, 1), "File.join_path")?;
        let b = expect_str(vm, arg(args, 2), "File.join_path")?;
        match PathBuf::from(a.as_ref()).join(b.as_ref()).to_str() {
            Some(joined) => {
                let joined = joined.to_string();
                Ok(Value::Ref(alloc_str(vm, joined)))
            }
            None => Ok(Value::Nil),
        }
    }),
];

/// Sets the `newl`/`sep` constant fields directly on the singleton's field table, the one
/// part of the `File` surface that is a plain property (`File.newl`) rather than an
/// `INVOKE`-dispatched method — matching `native_module_file.c`'s bare `define_value` calls.
pub fn install_constants(heap: &mut Heap, interns: &mut Interns, instance: HeapId) {
    let newline = if cfg!(windows) { "\r\n" } else { "\n" };
    let newl_id = heap.allocate(HeapData::Str(ObjString::new(newline.to_string())));
    let sep_id = heap.allocate(HeapData::Str(ObjString::new(std::path::MAIN_SEPARATOR.to_string())));
    let newl_key = interns.intern("newl");
    let sep_key = interns.intern("sep");
    if let HeapData::Object(o) = heap.get_mut(instance) {
        o.fields.set(newl_key, Value::Ref(newl_id));
        o.fields.set(sep_key, Value::Ref(sep_id));
    }
}
