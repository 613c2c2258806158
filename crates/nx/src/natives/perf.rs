//! `Perf.now`/`Perf.since`, grounded in `original_source/native_module_perf.c`'s
//! high-precision clock pair. The C original measures wall time since an OS-specific
//! epoch; here a process-wide [`std::time::Instant`] anchor gives the same "seconds since
//! some fixed point, only meaningful relative to another `Perf.now()` call" contract.

use std::sync::OnceLock;
use std::time::Instant;

use crate::error::RunError;
use crate::object::{HeapData, NativeFn, ObjString};
use crate::value::Value;

static START: OnceLock<Instant> = OnceLock::new();

fn elapsed_since_start() -> f64 {
    START.get_or_init(Instant::now).elapsed().as_secs_f64()
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).copied().unwrap_or(Value::Nil)
}

pub const NATIVES: &[(&str, NativeFn)] = &[
    ("to_str", |vm, args| {
        let s = vm.stringify(arg(args, 0))?;
        Ok(Value::Ref(vm.heap_mut().allocate(HeapData::Str(ObjString::new(s)))))
    }),
    ("class", |vm, args| match vm.class_of(arg(args, 0)) {
        Some(id) => Ok(Value::Ref(id)),
        None => Ok(Value::Nil),
    }),
    ("now", |_vm, _args| Ok(Value::Float(elapsed_since_start()))),
    ("since", |_vm, args| match arg(args, 1) {
        Value::Float(start) => Ok(Value::Float(elapsed_since_start() - start)),
        _ => Err(RunError::type_error("Perf.since expects a float")),
    }),
];
