//! Property, subscript, and slice access (`GET_PROPERTY`/`SET_PROPERTY`/`GET_SUBSCRIPT`/
//! `SET_SUBSCRIPT`/`GET_SLICE`/`GET_BASE_METHOD`).
//!
//! Builtin types (int/float/str/seq/tuple/...) only expose their native methods through
//! `INVOKE`'s call-site dispatch (see [`super::call::invoke`]) — there is no first-class
//! "bound native method" value, so a bare property read on a builtin (`x.push`, no call)
//! is an attribute error. User objects and classes resolve properties/fields normally.

use crate::error::RunError;
use crate::heap::HeapData;
use crate::intern::StringId;
use crate::object::{ObjBoundMethod, ObjString};
use crate::value::Value;

use super::Vm;

pub fn get_property(vm: &mut Vm, name: StringId) -> Result<(), RunError> {
    let target = vm.pop();
    let result = match target {
        Value::Ref(id) => match vm.heap.get(id) {
            HeapData::Object(o) => {
                if let Some(v) = o.fields.get(name) {
                    v
                } else if let Some(class_id) = o.class_id {
                    match super::call::find_method_in_chain(vm, class_id, name) {
                        Some(method) => {
                            let bound = vm.heap.allocate(HeapData::BoundMethod(ObjBoundMethod { receiver: target, method }));
                            Value::Ref(bound)
                        }
                        None => return Err(RunError::attribute_error(vm.type_name(target), vm.interns.get(name))),
                    }
                } else {
                    return Err(RunError::attribute_error(vm.type_name(target), vm.interns.get(name)));
                }
            }
            HeapData::Class(c) => c.methods.get(name).ok_or_else(|| RunError::attribute_error("cls", vm.interns.get(name)))?,
            HeapData::Module(t) => t.get(name).ok_or_else(|| RunError::name_error(vm.interns.get(name)))?,
            _ => return Err(RunError::attribute_error(vm.type_name(target), vm.interns.get(name))),
        },
        _ => return Err(RunError::attribute_error(vm.type_name(target), vm.interns.get(name))),
    };
    vm.push(result);
    Ok(())
}

pub fn set_property(vm: &mut Vm, name: StringId) -> Result<(), RunError> {
    let value = vm.pop();
    let target = vm.pop();
    match target {
        Value::Ref(id) => match vm.heap.get_mut(id) {
            HeapData::Object(o) => {
                o.fields.set(name, value);
            }
            _ => return Err(RunError::type_error(format!("'{}' object does not support property assignment", vm.type_name(target)))),
        },
        _ => return Err(RunError::type_error(format!("'{}' object does not support property assignment", vm.type_name(target)))),
    }
    vm.push(value);
    Ok(())
}

pub fn get_base_method(vm: &mut Vm, name: StringId) -> Result<(), RunError> {
    let frame = vm.frames.last().unwrap();
    let this_value = vm.stack[frame.slots_base];
    let class_id = vm.class_of(this_value).ok_or_else(|| RunError::type_error("'base' used outside a method"))?;
    let base_class = match vm.heap.get(class_id) {
        HeapData::Class(c) => c.base,
        _ => None,
    };
    let base_class = base_class.ok_or_else(|| RunError::attribute_error(vm.type_name(this_value), "base class"))?;
    let method = super::call::find_method_in_chain(vm, base_class, name).ok_or_else(|| RunError::attribute_error(vm.type_name(this_value), vm.interns.get(name)))?;
    let bound = vm.heap.allocate(HeapData::BoundMethod(ObjBoundMethod { receiver: this_value, method }));
    vm.push(Value::Ref(bound));
    Ok(())
}

fn resolve_index(len: usize, index: i64) -> Option<usize> {
    if index >= 0 {
        let i = index as usize;
        if i < len {
            Some(i)
        } else {
            None
        }
    } else {
        let from_end = len as i64 + index;
        if from_end >= 0 {
            Some(from_end as usize)
        } else {
            None
        }
    }
}

pub fn get_subscript(vm: &mut Vm) -> Result<(), RunError> {
    let index = vm.pop();
    let target = vm.pop();
    let idx = match index {
        Value::Int(i) => i,
        _ => return Err(RunError::type_error("subscript index must be an int")),
    };
    let result = match target {
        Value::Ref(id) => match vm.heap.get(id) {
            HeapData::Seq(s) => match resolve_index(s.items.len(), idx) {
                Some(i) => s.items[i],
                None if idx < 0 => Value::Nil,
                None => return Err(RunError::index_error("seq index out of range")),
            },
            HeapData::Tuple(t) => match resolve_index(t.items.len(), idx) {
                Some(i) => t.items[i],
                None if idx < 0 => Value::Nil,
                None => return Err(RunError::index_error("tuple index out of range")),
            },
            HeapData::Str(s) => {
                let chars: Vec<char> = s.chars.chars().collect();
                match resolve_index(chars.len(), idx) {
                    Some(i) => {
                        let ch = chars[i].to_string();
                        let strid = vm.heap.allocate(HeapData::Str(ObjString::new(ch)));
                        Value::Ref(strid)
                    }
                    None if idx < 0 => Value::Nil,
                    None => return Err(RunError::index_error("str index out of range")),
                }
            }
            HeapData::Object(o) => {
                let key = vm.interns.intern(&idx.to_string());
                o.fields.get(key).unwrap_or(Value::Nil)
            }
            _ => return Err(RunError::type_error(format!("'{}' object is not subscriptable", vm.type_name(target)))),
        },
        _ => return Err(RunError::type_error(format!("'{}' object is not subscriptable", vm.type_name(target)))),
    };
    vm.push(result);
    Ok(())
}

pub fn set_subscript(vm: &mut Vm) -> Result<(), RunError> {
    let value = vm.pop();
    let index = vm.pop();
    let target = vm.pop();
    let idx = match index {
        Value::Int(i) => i,
        _ => return Err(RunError::type_error("subscript index must be an int")),
    };
    match target {
        Value::Ref(id) => match vm.heap.get_mut(id) {
            HeapData::Seq(s) => {
                let len = s.items.len();
                match resolve_index(len, idx) {
                    Some(i) => s.items[i] = value,
                    None => return Err(RunError::index_error("seq index out of range")),
                }
            }
            _ => return Err(RunError::type_error(format!("'{}' object does not support item assignment", vm.type_name(target)))),
        },
        _ => return Err(RunError::type_error(format!("'{}' object does not support item assignment", vm.type_name(target)))),
    }
    vm.push(value);
    Ok(())
}

fn clamp_slice_bounds(len: usize, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
    let to_bound = |v: i64| -> usize {
        if v < 0 {
            let adjusted = len as i64 + v;
            adjusted.max(0) as usize
        } else {
            (v as usize).min(len)
        }
    };
    let s = start.map(to_bound).unwrap_or(0);
    let e = end.map(to_bound).unwrap_or(len);
    if s > e {
        (s, s)
    } else {
        (s, e)
    }
}

pub fn get_slice(vm: &mut Vm) -> Result<(), RunError> {
    let end = vm.pop();
    let start = vm.pop();
    let target = vm.pop();
    let to_opt = |v: Value| -> Result<Option<i64>, RunError> {
        match v {
            Value::Nil => Ok(None),
            Value::Int(i) => Ok(Some(i)),
            _ => Err(RunError::type_error("slice bounds must be int or nil")),
        }
    };
    let start = to_opt(start)?;
    let end = to_opt(end)?;

    if let Value::Ref(id) = target {
        if let HeapData::Object(o) = vm.heap.get(id) {
            let slice_method = o.class_id.and_then(|cid| match vm.heap.get(cid) {
                HeapData::Class(c) => c.slice_method,
                _ => None,
            });
            if let Some(method) = slice_method {
                let start_val = start.map(Value::Int).unwrap_or(Value::Nil);
                let end_val = end.map(Value::Int).unwrap_or(Value::Nil);
                let result = vm.call_value(method, &[target, start_val, end_val])?;
                vm.push(result);
                return Ok(());
            }
        }
    }

    let result = match target {
        Value::Ref(id) => match vm.heap.get(id) {
            HeapData::Seq(s) => {
                let (lo, hi) = clamp_slice_bounds(s.items.len(), start, end);
                let items = s.items[lo..hi].to_vec();
                let new_id = vm.heap.allocate(HeapData::Seq(crate::object::ObjSeq { items }));
                Value::Ref(new_id)
            }
            HeapData::Tuple(t) => {
                let (lo, hi) = clamp_slice_bounds(t.items.len(), start, end);
                let items = t.items[lo..hi].to_vec();
                let new_id = vm.heap.allocate(HeapData::Tuple(crate::object::ObjTuple { items }));
                Value::Ref(new_id)
            }
            HeapData::Str(s) => {
                let chars: Vec<char> = s.chars.chars().collect();
                let (lo, hi) = clamp_slice_bounds(chars.len(), start, end);
                let sliced: String = chars[lo..hi].iter().collect();
                let new_id = vm.heap.allocate(HeapData::Str(ObjString::new(sliced)));
                Value::Ref(new_id)
            }
            _ => return Err(RunError::type_error(format!("'{}' object is not sliceable", vm.type_name(target)))),
        },
        _ => return Err(RunError::type_error(format!("'{}' object is not sliceable", vm.type_name(target)))),
    };
    vm.push(result);
    Ok(())
}
