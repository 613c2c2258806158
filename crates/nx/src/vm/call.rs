//! Calls, invokes, closures, and class construction/finalization.
//!
//! Grounds the CALL/INVOKE/BASE_INVOKE/CLOSURE/CLASS/INHERIT/METHOD/FINALIZE opcode group
//! emitted by [`crate::compiler`]. Every call shape funnels into [`dispatch_closure`], which
//! pushes a [`CallFrame`] whose slot 0 is the callable's receiver (`this`) or, for a plain
//! function, the callee value itself — the same "slot zero is always occupied" convention
//! the compiler's `FunctionFrame::new` reserves a local for.

use std::rc::Rc;

use crate::error::RunError;
use crate::heap::HeapId;
use crate::intern::StringId;
use crate::object::{HeapData, ObjClass, ObjClosure, ObjObject};
use crate::table::HashTable;
use crate::value::Value;

use super::{CallFrame, Vm};

fn closure_arity(vm: &Vm, closure_id: HeapId) -> (u8, Rc<crate::object::ObjFunction>) {
    match vm.heap.get(closure_id) {
        HeapData::Closure(c) => (c.function.arity, c.function.clone()),
        _ => unreachable!("closure_arity called on a non-closure heap slot"),
    }
}

fn check_depth(vm: &Vm) -> Result<(), RunError> {
    if vm.frames.len() >= vm.limits.max_frames {
        return Err(RunError::recursion_error());
    }
    Ok(())
}

/// Pushes a new frame for `closure_id` whose slot 0 is already sitting at `base` on the
/// value stack (either the receiver for a method/ctor or the callee itself for a plain fn).
fn dispatch_closure(vm: &mut Vm, closure_id: HeapId, base: usize, argc: u16, fn_name: &str) -> Result<(), RunError> {
    let (arity, function) = closure_arity(vm, closure_id);
    if arity as u16 != argc {
        return Err(RunError::arity_error(fn_name, arity as usize, argc as usize));
    }
    check_depth(vm)?;
    // The callee's free globals resolve against the module it was defined in, not whatever
    // module's frame is currently calling it — see `ObjFunction::globals`.
    let globals = function.globals;
    vm.frames.push(CallFrame { closure: closure_id, ip: 0, slots_base: base, globals });
    Ok(())
}

fn function_name<'a>(vm: &'a Vm, closure_id: HeapId) -> String {
    match vm.heap.get(closure_id) {
        HeapData::Closure(c) => c.function.name.map(|n| vm.interns.get(n).to_string()).unwrap_or_else(|| "<anonymous>".to_string()),
        _ => "<anonymous>".to_string(),
    }
}

pub fn call(vm: &mut Vm, argc: u16) -> Result<(), RunError> {
    let base = vm.stack.len() - 1 - argc as usize;
    let callee = vm.stack[base];
    match callee {
        Value::Ref(id) => match vm.heap.get(id) {
            HeapData::Closure(_) => {
                let name = function_name(vm, id);
                dispatch_closure(vm, id, base, argc, &name)
            }
            HeapData::BoundMethod(b) => {
                let (receiver, method) = (b.receiver, b.method);
                vm.stack[base] = receiver;
                match method {
                    Value::Ref(mid) => {
                        let name = function_name(vm, mid);
                        dispatch_closure(vm, mid, base, argc, &name)
                    }
                    _ => Err(RunError::type_error("bound method does not wrap a callable")),
                }
            }
            HeapData::Class(_) => construct(vm, id, base, argc),
            other => Err(RunError::type_error(format!("'{}' object is not callable", other.type_name()))),
        },
        other => Err(RunError::type_error(format!("'{}' object is not callable", vm.type_name(other)))),
    }
}

/// A class whose `ctor` cache is empty but whose `natives` table defines one is a
/// synthetic "global function" class (`tuple`, `typeof`) rather than a real instantiable
/// class: its native runs directly and returns whatever value it likes, instead of an
/// `ObjObject` instance being built and threaded through.
fn native_ctor(vm: &Vm, class_id: HeapId) -> Option<crate::object::NativeFn> {
    match vm.heap.get(class_id) {
        HeapData::Class(c) => c.natives.and_then(|table| table.iter().find(|entry| entry.0 == "ctor")).map(|entry| entry.1),
        _ => None,
    }
}

fn construct(vm: &mut Vm, class_id: HeapId, base: usize, argc: u16) -> Result<(), RunError> {
    let ctor = match vm.heap.get(class_id) {
        HeapData::Class(c) => c.ctor,
        _ => unreachable!(),
    };
    if ctor.is_none() {
        if let Some(native) = native_ctor(vm, class_id) {
            let args: Vec<Value> = vm.stack[base..].to_vec();
            let result = native(vm, &args)?;
            vm.stack.truncate(base);
            vm.push(result);
            return Ok(());
        }
    }
    let obj_id = vm.heap.allocate(HeapData::Object(ObjObject { fields: HashTable::new(), class_id: Some(class_id) }));
    match ctor {
        Some(Value::Ref(ctor_id)) => {
            vm.stack[base] = Value::Ref(obj_id);
            let (arity, function) = closure_arity(vm, ctor_id);
            if arity as u16 != argc {
                return Err(RunError::arity_error("ctor", arity as usize, argc as usize));
            }
            check_depth(vm)?;
            let globals = function.globals;
            vm.frames.push(CallFrame { closure: ctor_id, ip: 0, slots_base: base, globals });
            Ok(())
        }
        _ => {
            if argc != 0 {
                return Err(RunError::arity_error("ctor", 0, argc as usize));
            }
            vm.stack.truncate(base);
            vm.push(Value::Ref(obj_id));
            Ok(())
        }
    }
}

/// Walks a class's own method table then its base chain, returning the stored (unbound)
/// value for `name` if any ancestor defines it.
pub(crate) fn find_method_in_chain(vm: &Vm, class_id: HeapId, name: StringId) -> Option<Value> {
    let mut current = Some(class_id);
    while let Some(cid) = current {
        match vm.heap.get(cid) {
            HeapData::Class(c) => {
                if let Some(v) = c.methods.get(name) {
                    return Some(v);
                }
                current = c.base;
            }
            _ => return None,
        }
    }
    None
}

fn natives_in_chain(vm: &Vm, class_id: HeapId, name: &str) -> Option<crate::object::NativeFn> {
    let mut current = Some(class_id);
    while let Some(cid) = current {
        match vm.heap.get(cid) {
            HeapData::Class(c) => {
                if let Some(table) = c.natives {
                    if let Some(entry) = table.iter().find(|entry| entry.0 == name) {
                        return Some(entry.1);
                    }
                }
                current = c.base;
            }
            _ => return None,
        }
    }
    None
}

pub fn invoke(vm: &mut Vm, name: StringId, argc: u16) -> Result<(), RunError> {
    let base = vm.stack.len() - 1 - argc as usize;
    let receiver = vm.stack[base];

    if let Value::Ref(id) = receiver {
        if let HeapData::Object(o) = vm.heap.get(id) {
            if let Some(class_id) = o.class_id {
                if let Some(method) = find_method_in_chain(vm, class_id, name) {
                    return match method {
                        Value::Ref(mid) => {
                            let fname = function_name(vm, mid);
                            dispatch_closure(vm, mid, base, argc, &fname)
                        }
                        _ => Err(RunError::type_error("method table entry is not callable")),
                    };
                }
            }
            if let Some(field_value) = o.fields.get(name) {
                vm.stack[base] = field_value;
                return call(vm, argc);
            }
        }
    }

    if let Some(class_id) = vm.class_of(receiver) {
        let attr_name = vm.interns.get(name).to_string();
        if let Some(native) = natives_in_chain(vm, class_id, &attr_name) {
            let args: Vec<Value> = vm.stack[base..].to_vec();
            let result = native(vm, &args)?;
            vm.stack.truncate(base);
            vm.push(result);
            return Ok(());
        }
        return Err(RunError::attribute_error(vm.type_name(receiver), &attr_name));
    }

    Err(RunError::attribute_error(vm.type_name(receiver), vm.interns.get(name)))
}

/// Calls a method on the superclass of the current method's receiver's own class. nx has
/// single inheritance and no further override depth beyond one level is tracked per
/// closure, so this resolves `base.method()` via the receiver's *runtime* class's `base`
/// link rather than the lexical defining class's base — correct for the common one-level
/// override case.
pub fn base_invoke(vm: &mut Vm, name: StringId, argc: u16) -> Result<(), RunError> {
    let frame = vm.frames.last().unwrap();
    let this_value = vm.stack[frame.slots_base];
    let class_id = vm.class_of(this_value).ok_or_else(|| RunError::type_error("'base' used outside a method"))?;
    let base_class = match vm.heap.get(class_id) {
        HeapData::Class(c) => c.base,
        _ => None,
    };
    let base_class = base_class.ok_or_else(|| RunError::attribute_error(vm.type_name(this_value), "base class"))?;
    let method = find_method_in_chain(vm, base_class, name).ok_or_else(|| RunError::attribute_error(vm.type_name(this_value), vm.interns.get(name)))?;

    let args: Vec<Value> = vm.stack.split_off(vm.stack.len() - argc as usize);
    vm.stack.push(this_value);
    vm.stack.extend(args);
    let base = vm.stack.len() - 1 - argc as usize;

    match method {
        Value::Ref(mid) => {
            let fname = function_name(vm, mid);
            dispatch_closure(vm, mid, base, argc, &fname)
        }
        _ => Err(RunError::type_error("base method table entry is not callable")),
    }
}

pub fn make_closure(vm: &mut Vm) -> Result<(), RunError> {
    let const_idx = vm.fetch_word()? as usize;
    let fn_value = vm.constant(const_idx);
    let fn_id = match fn_value {
        Value::Ref(id) => id,
        _ => return Err(RunError::type_error("CLOSURE constant is not a function")),
    };
    let function = match vm.heap.get(fn_id) {
        HeapData::Function(f) => f.clone(),
        _ => return Err(RunError::type_error("CLOSURE constant is not a function")),
    };
    let upvalue_count = vm.fetch_word()? as usize;
    let mut upvalues = Vec::with_capacity(upvalue_count);
    for _ in 0..upvalue_count {
        let is_local = vm.fetch_word()?;
        let index = vm.fetch_word()? as usize;
        let id = if is_local == 1 {
            let stack_index = vm.slots_base() + index;
            vm.capture_upvalue(stack_index)
        } else {
            vm.current_upvalue(index)
        };
        upvalues.push(id);
    }
    let closure_id = vm.heap.allocate(HeapData::Closure(ObjClosure { function, upvalues }));
    vm.push(Value::Ref(closure_id));
    Ok(())
}

pub fn begin_class(vm: &mut Vm, name: StringId) {
    let class_id = vm.heap.allocate(HeapData::Class(ObjClass { name, ..ObjClass::default() }));
    vm.push(Value::Ref(class_id));
}

pub fn inherit(vm: &mut Vm) -> Result<(), RunError> {
    let base_value = vm.pop();
    let base_id = match base_value {
        Value::Ref(id) if matches!(vm.heap.get(id), HeapData::Class(_)) => id,
        _ => return Err(RunError::type_error("base class must be a class")),
    };
    let class_value = vm.peek(0);
    if let Value::Ref(class_id) = class_value {
        if let HeapData::Class(c) = vm.heap.get_mut(class_id) {
            c.base = Some(base_id);
        }
    }
    Ok(())
}

pub fn define_method(vm: &mut Vm, name: StringId) {
    let method_value = vm.pop();
    let class_value = vm.peek(0);
    if let Value::Ref(class_id) = class_value {
        if let HeapData::Class(c) = vm.heap.get_mut(class_id) {
            c.methods.set(name, method_value);
        }
    }
}

/// Resolves the `ctor`/`has`/`to_str`/`slice` special-method caches from the freshly
/// populated method table, inheriting any that are missing from the base class — matches
/// the FINALIZE step's documented job of linking capability pointers once per class
/// rather than re-walking the method table on every dispatch.
pub fn finalize_class(vm: &mut Vm) {
    let class_value = vm.peek(0);
    let class_id = match class_value {
        Value::Ref(id) => id,
        _ => return,
    };
    let ctor_name = vm.special_names["ctor"];
    let has_name = vm.special_names["has"];
    let to_str_name = vm.special_names["to_str"];
    let slice_name = vm.special_names["slice"];

    let (mut ctor, mut has_method, mut to_str_method, mut slice_method, base) = match vm.heap.get(class_id) {
        HeapData::Class(c) => (c.methods.get(ctor_name), c.methods.get(has_name), c.methods.get(to_str_name), c.methods.get(slice_name), c.base),
        _ => return,
    };
    if let Some(base_id) = base {
        if let HeapData::Class(b) = vm.heap.get(base_id) {
            ctor = ctor.or(b.ctor);
            has_method = has_method.or(b.has_method);
            to_str_method = to_str_method.or(b.to_str_method);
            slice_method = slice_method.or(b.slice_method);
        }
    }
    if let HeapData::Class(c) = vm.heap.get_mut(class_id) {
        c.ctor = ctor;
        c.has_method = has_method;
        c.to_str_method = to_str_method;
        c.slice_method = slice_method;
    }
}
