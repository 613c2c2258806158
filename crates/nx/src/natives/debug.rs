//! `Debug.stack`/`Debug.gc_stats`: introspection hooks with no C-original counterpart, added
//! per `SPEC_FULL.md`'s note that `Debug.stack()` walks the live call-frame stack directly
//! (not through [`crate::tracer`]) since it must reflect state at the moment of the call.

use crate::object::{HeapData, NativeFn, ObjObject, ObjSeq, ObjString};
use crate::table::HashTable;
use crate::value::Value;

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
    ("stack", |vm, _args| {
        let frames = vm.capture_trace();
        let items: Vec<Value> = frames
            .into_iter()
            .map(|f| {
                let line = format!("at {}(line {})", f.function_name, f.span.line);
                Value::Ref(vm.heap_mut().allocate(HeapData::Str(ObjString::new(line))))
            })
            .collect();
        Ok(Value::Ref(vm.heap_mut().allocate(HeapData::Seq(ObjSeq { items }))))
    }),
    ("gc_stats", |vm, _args| {
        let cycles = vm.heap().cycles_run;
        let live = vm.heap().live_count() as i64;
        let mut fields = HashTable::new();
        let cycles_key = vm.interns_mut().intern("cycles");
        let live_key = vm.interns_mut().intern("live");
        fields.set(cycles_key, Value::Int(cycles as i64));
        fields.set(live_key, Value::Int(live));
        Ok(Value::Ref(vm.heap_mut().allocate(HeapData::Object(ObjObject { fields, class_id: None }))))
    }),
];
