//! Arithmetic opcodes. Pops `b` then `a` (matching push order `a, b`) and pushes `a op b`.
//!
//! Numeric promotion: `int op int` stays `int`; any float operand promotes the result to
//! `float`. `+` additionally concatenates `str+str` and `seq+seq`. Division and modulo by
//! a zero **int** are runtime errors; float division by zero follows IEEE semantics
//! (`inf`/`nan`), matching the "int/float distinct" numeric model.

use crate::error::RunError;
use crate::heap::HeapData;
use crate::object::{ObjSeq, ObjString};
use crate::value::Value;

use super::Vm;

fn numeric_type_error(op: &str, a: Value, b: Value, vm: &Vm) -> RunError {
    RunError::type_error(format!("unsupported operand types for {op}: '{}' and '{}'", vm.type_name(a), vm.type_name(b)))
}

pub fn add(vm: &mut Vm) -> Result<(), RunError> {
    let b = vm.pop();
    let a = vm.pop();
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => vm.push(Value::Int(x + y)),
        (Value::Int(x), Value::Float(y)) => vm.push(Value::Float(x as f64 + y)),
        (Value::Float(x), Value::Int(y)) => vm.push(Value::Float(x + y as f64)),
        (Value::Float(x), Value::Float(y)) => vm.push(Value::Float(x + y)),
        (Value::Ref(x), Value::Ref(y)) => match (vm.heap.get(x), vm.heap.get(y)) {
            (HeapData::Str(sx), HeapData::Str(sy)) => {
                let joined: std::rc::Rc<str> = format!("{}{}", sx.chars, sy.chars).into();
                let id = vm.heap.allocate(HeapData::Str(ObjString::new(joined)));
                vm.push(Value::Ref(id));
            }
            (HeapData::Seq(sx), HeapData::Seq(sy)) => {
                let mut items = sx.items.clone();
                items.extend_from_slice(&sy.items);
                let id = vm.heap.allocate(HeapData::Seq(ObjSeq { items }));
                vm.push(Value::Ref(id));
            }
            _ => return Err(numeric_type_error("+", a, b, vm)),
        },
        _ => return Err(numeric_type_error("+", a, b, vm)),
    }
    Ok(())
}

macro_rules! numeric_op {
    ($name:ident, $op:tt, $symbol:expr) => {
        pub fn $name(vm: &mut Vm) -> Result<(), RunError> {
            let b = vm.pop();
            let a = vm.pop();
            match (a, b) {
                (Value::Int(x), Value::Int(y)) => vm.push(Value::Int(x $op y)),
                (Value::Int(x), Value::Float(y)) => vm.push(Value::Float(x as f64 $op y)),
                (Value::Float(x), Value::Int(y)) => vm.push(Value::Float(x $op y as f64)),
                (Value::Float(x), Value::Float(y)) => vm.push(Value::Float(x $op y)),
                _ => return Err(numeric_type_error($symbol, a, b, vm)),
            }
            Ok(())
        }
    };
}

numeric_op!(multiply, *, "*");

pub fn subtract(vm: &mut Vm) -> Result<(), RunError> {
    let b = vm.pop();
    let a = vm.pop();
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => vm.push(Value::Int(x - y)),
        (Value::Int(x), Value::Float(y)) => vm.push(Value::Float(x as f64 - y)),
        (Value::Float(x), Value::Int(y)) => vm.push(Value::Float(x - y as f64)),
        (Value::Float(x), Value::Float(y)) => vm.push(Value::Float(x - y)),
        _ => return Err(numeric_type_error("-", a, b, vm)),
    }
    Ok(())
}

pub fn divide(vm: &mut Vm) -> Result<(), RunError> {
    let b = vm.pop();
    let a = vm.pop();
    match (a, b) {
        (Value::Int(_), Value::Int(0)) => return Err(RunError::type_error("division by zero")),
        (Value::Int(x), Value::Int(y)) => vm.push(Value::Int(x / y)),
        (Value::Int(x), Value::Float(y)) => vm.push(Value::Float(x as f64 / y)),
        (Value::Float(x), Value::Int(y)) => vm.push(Value::Float(x / y as f64)),
        (Value::Float(x), Value::Float(y)) => vm.push(Value::Float(x / y)),
        _ => return Err(numeric_type_error("/", a, b, vm)),
    }
    Ok(())
}

pub fn modulo(vm: &mut Vm) -> Result<(), RunError> {
    let b = vm.pop();
    let a = vm.pop();
    match (a, b) {
        (Value::Int(_), Value::Int(0)) => return Err(RunError::type_error("modulo by zero")),
        (Value::Int(x), Value::Int(y)) => vm.push(Value::Int(x % y)),
        (Value::Int(x), Value::Float(y)) => vm.push(Value::Float(x as f64 % y)),
        (Value::Float(x), Value::Int(y)) => vm.push(Value::Float(x % y as f64)),
        (Value::Float(x), Value::Float(y)) => vm.push(Value::Float(x % y)),
        _ => return Err(numeric_type_error("%", a, b, vm)),
    }
    Ok(())
}

pub fn negate(vm: &mut Vm) -> Result<(), RunError> {
    let v = vm.pop();
    match v {
        Value::Int(x) => vm.push(Value::Int(-x)),
        Value::Float(x) => vm.push(Value::Float(-x)),
        _ => return Err(RunError::type_error(format!("bad operand type for unary -: '{}'", vm.type_name(v)))),
    }
    Ok(())
}
