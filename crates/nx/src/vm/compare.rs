//! Equality, ordering, `is`, and `in`.
//!
//! Equality is structural for immutable values (numbers, bools, nil, strings, tuples) and
//! identity-based (same [`crate::heap::HeapId`]) for mutable heap objects (seqs, objects,
//! classes, closures) — the same split most tree-walkers make between value types and
//! reference types.

use crate::error::RunError;
use crate::heap::HeapData;
use crate::value::Value;

use super::Vm;

pub(crate) fn values_equal(vm: &Vm, a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => x as f64 == y,
        (Value::Ref(x), Value::Ref(y)) => {
            if x == y {
                return true;
            }
            match (vm.heap.get(x), vm.heap.get(y)) {
                (HeapData::Str(sx), HeapData::Str(sy)) => sx.chars == sy.chars,
                (HeapData::Tuple(tx), HeapData::Tuple(ty)) => {
                    tx.items.len() == ty.items.len() && tx.items.iter().zip(ty.items.iter()).all(|(&i, &j)| values_equal(vm, i, j))
                }
                _ => false,
            }
        }
        _ => false,
    }
}

pub fn eq(vm: &mut Vm) -> Result<(), RunError> {
    let b = vm.pop();
    let a = vm.pop();
    vm.push(Value::Bool(values_equal(vm, a, b)));
    Ok(())
}

pub fn neq(vm: &mut Vm) -> Result<(), RunError> {
    let b = vm.pop();
    let a = vm.pop();
    vm.push(Value::Bool(!values_equal(vm, a, b)));
    Ok(())
}

fn numeric_cmp(vm: &Vm, a: Value, b: Value) -> Result<std::cmp::Ordering, RunError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(&y)),
        (Value::Int(x), Value::Float(y)) => (x as f64).partial_cmp(&y).ok_or_else(|| cmp_type_error(vm, a, b)),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(y as f64)).ok_or_else(|| cmp_type_error(vm, a, b)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(&y).ok_or_else(|| cmp_type_error(vm, a, b)),
        (Value::Ref(x), Value::Ref(y)) => match (vm.heap.get(x), vm.heap.get(y)) {
            (HeapData::Str(sx), HeapData::Str(sy)) => Ok(sx.chars.cmp(&sy.chars)),
            _ => Err(cmp_type_error(vm, a, b)),
        },
        _ => Err(cmp_type_error(vm, a, b)),
    }
}

fn cmp_type_error(vm: &Vm, a: Value, b: Value) -> RunError {
    RunError::type_error(format!("'<' not supported between instances of '{}' and '{}'", vm.type_name(a), vm.type_name(b)))
}

macro_rules! ordering_op {
    ($name:ident, $pred:expr) => {
        pub fn $name(vm: &mut Vm) -> Result<(), RunError> {
            let b = vm.pop();
            let a = vm.pop();
            let ord = numeric_cmp(vm, a, b)?;
            let pred: fn(std::cmp::Ordering) -> bool = $pred;
            vm.push(Value::Bool(pred(ord)));
            Ok(())
        }
    };
}

ordering_op!(gt, |o| o == std::cmp::Ordering::Greater);
ordering_op!(lt, |o| o == std::cmp::Ordering::Less);
ordering_op!(gteq, |o| o != std::cmp::Ordering::Less);
ordering_op!(lteq, |o| o != std::cmp::Ordering::Greater);

/// `value is Class`: walks `value`'s runtime class chain looking for `Class`.
pub fn is_op(vm: &mut Vm) -> Result<(), RunError> {
    let rhs = vm.pop();
    let lhs = vm.pop();
    let target_class = match rhs {
        Value::Ref(id) if matches!(vm.heap.get(id), HeapData::Class(_)) => id,
        _ => return Err(RunError::type_error("right-hand side of 'is' must be a class")),
    };
    let mut current = vm.class_of(lhs);
    let mut found = false;
    while let Some(cid) = current {
        if cid == target_class {
            found = true;
            break;
        }
        current = match vm.heap.get(cid) {
            HeapData::Class(c) => c.base,
            _ => None,
        };
    }
    vm.push(Value::Bool(found));
    Ok(())
}

/// `value in container`: membership in a seq/tuple (by [`values_equal`]), substring in a
/// str, or key presence in an obj.
pub fn in_op(vm: &mut Vm) -> Result<(), RunError> {
    let container = vm.pop();
    let needle = vm.pop();

    if let Value::Ref(id) = container {
        if let HeapData::Object(o) = vm.heap.get(id) {
            let has_method = o.class_id.and_then(|cid| match vm.heap.get(cid) {
                HeapData::Class(c) => c.has_method,
                _ => None,
            });
            if let Some(method) = has_method {
                let result = vm.call_value(method, &[container, needle])?;
                vm.push(Value::Bool(result.is_truthy()));
                return Ok(());
            }
        }
    }

    let found = match container {
        Value::Ref(id) => match vm.heap.get(id) {
            HeapData::Seq(s) => {
                let items = s.items.clone();
                items.iter().any(|&v| values_equal(vm, v, needle))
            }
            HeapData::Tuple(t) => {
                let items = t.items.clone();
                items.iter().any(|&v| values_equal(vm, v, needle))
            }
            HeapData::Str(haystack) => {
                let hay = haystack.chars.clone();
                match needle {
                    Value::Ref(nid) => match vm.heap.get(nid) {
                        HeapData::Str(n) => hay.contains(n.chars.as_ref()),
                        _ => return Err(RunError::type_error("'in' on a string requires a string operand")),
                    },
                    _ => return Err(RunError::type_error("'in' on a string requires a string operand")),
                }
            }
            HeapData::Object(o) => match needle {
                Value::Ref(nid) => match vm.heap.get(nid) {
                    HeapData::Str(key) => {
                        let id = vm.interns.intern(&key.chars);
                        o.fields.contains_key(id)
                    }
                    _ => return Err(RunError::type_error("'in' on an obj requires a string key")),
                },
                _ => return Err(RunError::type_error("'in' on an obj requires a string key")),
            },
            _ => return Err(RunError::type_error(format!("'{}' is not a container", vm.type_name(container)))),
        },
        _ => return Err(RunError::type_error(format!("'{}' is not a container", vm.type_name(container)))),
    };
    vm.push(Value::Bool(found));
    Ok(())
}
