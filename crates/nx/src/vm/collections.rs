//! `SEQ_LITERAL`/`TUPLE_LITERAL`/`OBJECT_LITERAL`: the compiler pushes element expressions
//! left to right and leaves the count as the operand, so these just slice the trailing
//! `count` (or `count * 2`, for key/value pairs) stack values off in push order.

use crate::heap::HeapData;
use crate::object::{ObjObject, ObjSeq, ObjTuple};
use crate::table::HashTable;
use crate::value::Value;

use super::Vm;
use crate::error::RunResult;

fn take_n(vm: &mut Vm, n: usize) -> Vec<Value> {
    let at = vm.stack.len() - n;
    vm.stack.split_off(at)
}

pub fn seq_literal(vm: &mut Vm, count: usize) {
    let items = take_n(vm, count);
    let id = vm.heap.allocate(HeapData::Seq(ObjSeq { items }));
    vm.push(Value::Ref(id));
}

pub fn tuple_literal(vm: &mut Vm, count: usize) {
    let items = take_n(vm, count);
    let id = vm.heap.allocate(HeapData::Tuple(ObjTuple { items }));
    vm.push(Value::Ref(id));
}

pub fn object_literal(vm: &mut Vm, count: usize) -> RunResult<()> {
    let pairs = take_n(vm, count * 2);
    let mut fields = HashTable::new();
    for pair in pairs.chunks_exact(2) {
        let key_str = vm.stringify(pair[0])?;
        let key = vm.interns.intern(&key_str);
        fields.set(key, pair[1]);
    }
    let id = vm.heap.allocate(HeapData::Object(ObjObject { fields, class_id: None }));
    vm.push(Value::Ref(id));
    Ok(())
}
